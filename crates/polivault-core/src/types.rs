use crate::error::NetError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// HTTP method for API calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }

  /// Bodyless reads are the only calls eligible for caching.
  pub fn is_read(&self) -> bool {
    matches!(self, Method::Get)
  }
}

/// Request body for the grant-issuing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct GrantRequest {
  pub filename: String,
  pub customer_id: String,
  pub policy_id: String,
  pub document_type: String,
  pub content_type: String,
  pub operation: String,
}

/// Short-lived authorization for one direct upload, issued by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteGrant {
  pub url: String,
  pub object_key: String,
  pub expiration_seconds: u64,
  pub operation: String,
}

/// Where the bytes of an upload come from.
#[derive(Debug, Clone)]
pub enum UploadSource {
  File(PathBuf),
  Bytes(Vec<u8>),
}

/// Terminal result of one upload task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
  Succeeded,
  Failed { status: u16, message: String },
  Aborted,
}

impl UploadOutcome {
  pub fn is_success(&self) -> bool {
    matches!(self, UploadOutcome::Succeeded)
  }

  /// View a non-success outcome through the error taxonomy.
  pub fn into_error(self) -> Option<NetError> {
    match self {
      UploadOutcome::Succeeded => None,
      UploadOutcome::Aborted => Some(NetError::Aborted),
      UploadOutcome::Failed { status: 0, message } => Some(NetError::Network(message)),
      UploadOutcome::Failed { status, message } => Some(NetError::Server { status, message }),
    }
  }
}

/// Identifier for an upload task when the caller did not supply one.
pub fn new_task_id() -> String {
  uuid::Uuid::new_v4().to_string()
}
