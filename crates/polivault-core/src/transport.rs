use crate::error::TransportError;
use crate::types::{Method, UploadSource};
use std::future::Future;
use std::sync::Arc;

/// Byte-level progress callback: (bytes_sent, bytes_total).
pub type ByteProgress = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// One authenticated exchange with the JSON API.
#[derive(Debug, Clone)]
pub struct ApiRequest {
  pub method: Method,
  pub url: String,
  pub bearer_token: String,
  pub body: Option<String>,
}

/// Raw response before classification.
#[derive(Debug, Clone)]
pub struct RawResponse {
  pub status: u16,
  pub body: String,
}

impl RawResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// API transport (platform-specific implementation).
pub trait ApiTransport: Send + Sync {
  /// Perform one HTTP exchange, returning the raw status and body text.
  fn send(
    &self,
    req: ApiRequest,
  ) -> impl Future<Output = Result<RawResponse, TransportError>> + Send;
}

/// Destination sink for direct object writes (platform-specific implementation).
pub trait BlobSink: Send + Sync {
  /// Write the whole body to a presigned destination in one request,
  /// reporting bytes as they go out.
  fn put(
    &self,
    url: &str,
    body: &UploadSource,
    on_bytes: Option<ByteProgress>,
  ) -> impl Future<Output = Result<RawResponse, TransportError>> + Send;
}
