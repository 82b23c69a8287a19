use polivault_client::{HttpApiTransport, HttpBlobSink, RequestClient, TransferManager, UploadOptions};
use polivault_core::config::Config;
use polivault_core::types::{GrantRequest, UploadSource};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Two-phase upload against a live API: negotiate a write grant, then
/// stream the file straight to the destination it names.
///
/// Usage: upload_document <file> <customer_id> <policy_id>
#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .init();

  let mut args = std::env::args().skip(1);
  let (file, customer_id, policy_id) = match (args.next(), args.next(), args.next()) {
    (Some(f), Some(c), Some(p)) => (PathBuf::from(f), c, p),
    _ => {
      eprintln!("Usage: upload_document <file> <customer_id> <policy_id>");
      std::process::exit(2);
    }
  };

  let config = Config::from_env();
  let client = RequestClient::new(
    config.clone(),
    HttpApiTransport::new(),
    Arc::new(|| std::env::var("POLIVAULT_TOKEN").ok()),
  );
  let manager = TransferManager::new(&config, HttpBlobSink::new(&config));

  let filename = file
    .file_name()
    .map(|n| n.to_string_lossy().to_string())
    .unwrap_or_else(|| "document".into());

  let grant = match client
    .request_write_grant(&GrantRequest {
      filename,
      customer_id,
      policy_id,
      document_type: "policy".into(),
      content_type: "application/octet-stream".into(),
      operation: "put".into(),
    })
    .await
  {
    Ok(g) => g,
    Err(e) => {
      tracing::error!("Grant negotiation failed: {}", e);
      std::process::exit(1);
    }
  };

  tracing::info!("Grant issued for {} ({}s)", grant.object_key, grant.expiration_seconds);

  let outcome = manager
    .start_upload(
      UploadSource::File(file),
      grant,
      UploadOptions {
        task_id: None,
        on_progress: Some(Arc::new(|percent| {
          tracing::info!("Upload progress: {}%", percent);
        })),
      },
    )
    .await;

  tracing::info!("Upload finished: {:?}", outcome);
  if !outcome.is_success() {
    std::process::exit(1);
  }
}
