use thiserror::Error;

/// Classified outcome of a network operation.
///
/// Cloneable so one deduplicated result can be delivered to every waiter.
#[derive(Debug, Clone, Error)]
pub enum NetError {
  /// No credential was available; nothing was sent to the network.
  #[error("Not authenticated")]
  Unauthorized,

  #[error("Request timed out")]
  Timeout,

  /// Transport-level failure with no response at all.
  #[error("Network error: {0}")]
  Network(String),

  /// The server answered with a non-success status.
  #[error("HTTP {status}: {message}")]
  Server { status: u16, message: String },

  /// A success status whose body could not be parsed as JSON.
  #[error("Malformed response: {0}")]
  MalformedResponse(String),

  /// Caller-initiated cancellation, not a failure of the remote operation.
  #[error("Operation aborted")]
  Aborted,
}

impl NetError {
  /// Status code as retry policy sees it; 0 stands for "no response received".
  pub fn status(&self) -> Option<u16> {
    match self {
      NetError::Network(_) => Some(0),
      NetError::Server { status, .. } => Some(*status),
      _ => None,
    }
  }
}

/// Failure below the HTTP status level.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
  #[error("Request timed out")]
  Timeout,

  #[error("Unreachable: {0}")]
  Unreachable(String),
}

impl From<TransportError> for NetError {
  fn from(e: TransportError) -> Self {
    match e {
      TransportError::Timeout => NetError::Timeout,
      TransportError::Unreachable(msg) => NetError::Network(msg),
    }
  }
}
