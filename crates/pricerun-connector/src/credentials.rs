use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::HandlerError;

/// Looks up named secrets for handlers. Configs reference credentials by
/// name; the actual values live outside the workflow definition, often
/// behind a vault or environment service, so lookup is async.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
  async fn resolve(&self, name: &str) -> Result<String, HandlerError>;
}

/// In-memory credential store, mostly for wiring up local runs and tests.
#[derive(Debug, Default)]
pub struct StaticCredentialResolver {
  values: HashMap<String, String>,
}

impl StaticCredentialResolver {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.values.insert(name.into(), value.into());
    self
  }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
  async fn resolve(&self, name: &str) -> Result<String, HandlerError> {
    self
      .values
      .get(name)
      .cloned()
      .ok_or_else(|| HandlerError::CredentialNotFound(name.to_string()))
  }
}

/// Resolver for environments with no secrets configured; every lookup
/// fails so misconfigured nodes surface immediately.
#[derive(Debug, Default)]
pub struct NoCredentials;

#[async_trait]
impl CredentialResolver for NoCredentials {
  async fn resolve(&self, name: &str) -> Result<String, HandlerError> {
    Err(HandlerError::CredentialNotFound(name.to_string()))
  }
}
