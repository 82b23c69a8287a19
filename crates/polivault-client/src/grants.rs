use polivault_core::error::NetError;
use polivault_core::security::validate_grant_url;
use polivault_core::transport::ApiTransport;
use polivault_core::types::{GrantRequest, Method, WriteGrant};

use crate::client::{CallOptions, RequestClient};

impl<T: ApiTransport + 'static> RequestClient<T> {
  /// Negotiate a write grant for one object ahead of its direct upload.
  ///
  /// Never cached; every upload gets a fresh grant.
  pub async fn request_write_grant(&self, req: &GrantRequest) -> Result<WriteGrant, NetError> {
    let body = serde_json::to_value(req).map_err(|e| NetError::MalformedResponse(e.to_string()))?;

    let endpoint = self.config().grant_endpoint.clone();
    let value = self
      .call(Method::Post, &endpoint, Some(body), CallOptions::default())
      .await?;

    let grant: WriteGrant = serde_json::from_value(value)
      .map_err(|e| NetError::MalformedResponse(format!("Grant response: {}", e)))?;

    if let Err(msg) = validate_grant_url(&grant.url) {
      return Err(NetError::MalformedResponse(format!("Grant destination: {}", msg)));
    }

    Ok(grant)
  }
}
