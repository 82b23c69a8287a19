use std::time::Duration;

/// Client configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
  pub api_origin: String,
  pub request_timeout_secs: u64,
  pub upload_max_retries: u32,
  pub grant_endpoint: String,
  pub upload_chunk_size: usize,
}

impl Config {
  pub fn from_env() -> Self {
    Self {
      api_origin: std::env::var("POLIVAULT_API_ORIGIN")
        .unwrap_or_else(|_| "http://localhost:8080".into()),
      request_timeout_secs: std::env::var("POLIVAULT_REQUEST_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(15),
      upload_max_retries: std::env::var("POLIVAULT_UPLOAD_MAX_RETRIES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(2),
      grant_endpoint: std::env::var("POLIVAULT_GRANT_ENDPOINT")
        .unwrap_or_else(|_| "/documents/upload-url".into()),
      upload_chunk_size: 64 * 1024,
    }
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  /// Absolute URL for an endpoint path relative to the API origin.
  pub fn api_url(&self, endpoint: &str) -> String {
    format!(
      "{}/{}",
      self.api_origin.trim_end_matches('/'),
      endpoint.trim_start_matches('/')
    )
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api_origin: "http://localhost:8080".into(),
      request_timeout_secs: 15,
      upload_max_retries: 2,
      grant_endpoint: "/documents/upload-url".into(),
      upload_chunk_size: 64 * 1024,
    }
  }
}
