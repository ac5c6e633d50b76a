use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pricerun_config::NodeKind;
use serde_json::Value;

use crate::credentials::CredentialResolver;
use crate::error::HandlerError;

/// Everything a handler gets for one call: the node's identity and its
/// fully resolved config (all placeholders already substituted), plus a
/// way to fetch secrets the config names.
pub struct Invocation {
  pub node_id: String,
  pub kind: NodeKind,
  pub config: serde_json::Map<String, Value>,
  pub credentials: Arc<dyn CredentialResolver>,
}

impl Invocation {
  /// A required string field from the config.
  pub fn config_str(&self, key: &str) -> Result<&str, HandlerError> {
    self
      .config
      .get(key)
      .and_then(Value::as_str)
      .ok_or_else(|| HandlerError::BadConfig(format!("missing string field '{key}'")))
  }
}

/// One connector implementation, keyed by node type in the registry.
#[async_trait]
pub trait NodeHandler: Send + Sync {
  async fn invoke(&self, invocation: Invocation) -> Result<Value, HandlerError>;

  /// Timeout applied when the node does not set its own `timeout_ms`.
  fn default_timeout(&self) -> Option<Duration> {
    None
  }
}

/// Maps node types to handlers. The engine refuses to run a workflow
/// node whose type has no registration, reporting a `registry` failure
/// for that node.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
  handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, kind: NodeKind, handler: Arc<dyn NodeHandler>) {
    self.handlers.insert(kind, handler);
  }

  pub fn with(mut self, kind: NodeKind, handler: Arc<dyn NodeHandler>) -> Self {
    self.register(kind, handler);
    self
  }

  pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeHandler>> {
    self.handlers.get(&kind).cloned()
  }

  pub fn contains(&self, kind: NodeKind) -> bool {
    self.handlers.contains_key(&kind)
  }
}
