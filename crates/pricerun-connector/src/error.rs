use thiserror::Error;

/// What a handler can report back. The invoker converts these into the
/// failed node result's error kind; it never lets them escape as `Err`.
#[derive(Debug, Error)]
pub enum HandlerError {
  /// The external system rejected or failed the call.
  #[error("{0}")]
  Connector(String),

  /// The node config is missing or malformed for this handler.
  #[error("bad config: {0}")]
  BadConfig(String),

  /// A named credential could not be resolved.
  #[error("credential '{0}' not found")]
  CredentialNotFound(String),
}

impl HandlerError {
  pub(crate) fn kind(&self) -> &'static str {
    match self {
      HandlerError::Connector(_) | HandlerError::BadConfig(_) => "connector",
      HandlerError::CredentialNotFound(_) => "credential",
    }
  }
}
