use thiserror::Error;

/// Everything that can go wrong between a user pressing send and a reply landing
/// in the conversation log.
#[derive(Debug, Error)]
pub enum ChatError {
  /// Missing or unusable endpoint configuration. Detected before any network I/O.
  #[error("{0}")]
  Configuration(String),

  /// User input failed the content or attachment constraints.
  #[error("{0}")]
  Validation(String),

  #[error("the endpoint took too long to respond")]
  Timeout,

  #[error("request failed: {0}")]
  Transport(String),

  /// Non-2xx answer from the endpoint.
  #[error("HTTP {status}: {detail}")]
  Endpoint { status: u16, detail: String },

  /// Malformed cURL command text.
  #[error("{0}")]
  Parse(String),

  #[error("conversation not found: {0}")]
  NotFound(String),

  #[error("a message is already being sent in this conversation")]
  Busy,

  #[error("storage error: {0}")]
  Storage(String),
}

impl ChatError {
  /// Short machine-readable code used by the router's error bodies.
  pub fn code(&self) -> &'static str {
    match self {
      ChatError::Configuration(_) => "configuration_error",
      ChatError::Validation(_) => "validation_error",
      ChatError::Timeout => "timeout",
      ChatError::Transport(_) => "transport_error",
      ChatError::Endpoint { .. } => "endpoint_error",
      ChatError::Parse(_) => "parse_error",
      ChatError::NotFound(_) => "not_found",
      ChatError::Busy => "busy",
      ChatError::Storage(_) => "storage_error",
    }
  }
}

impl From<anyhow::Error> for ChatError {
  fn from(err: anyhow::Error) -> Self {
    ChatError::Storage(err.to_string())
  }
}
