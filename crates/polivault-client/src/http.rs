use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::TryStreamExt;
use polivault_core::config::Config;
use polivault_core::error::TransportError;
use polivault_core::transport::{ApiRequest, ApiTransport, BlobSink, ByteProgress, RawResponse};
use polivault_core::types::{Method, UploadSource};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::io::ReaderStream;

/// Reqwest-backed transport for JSON API calls.
///
/// The client carries no cookie store; the bearer header attached per
/// request is the only credential on the wire.
pub struct HttpApiTransport {
  http: reqwest::Client,
}

impl HttpApiTransport {
  pub fn new() -> Self {
    Self {
      http: reqwest::Client::new(),
    }
  }

  /// Share an existing client between transports.
  pub fn with_client(http: reqwest::Client) -> Self {
    Self { http }
  }
}

impl Default for HttpApiTransport {
  fn default() -> Self {
    Self::new()
  }
}

fn to_reqwest(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Delete => reqwest::Method::DELETE,
  }
}

fn transport_error(e: reqwest::Error) -> TransportError {
  if e.is_timeout() {
    TransportError::Timeout
  } else {
    TransportError::Unreachable(e.to_string())
  }
}

impl ApiTransport for HttpApiTransport {
  async fn send(&self, req: ApiRequest) -> Result<RawResponse, TransportError> {
    let mut builder = self
      .http
      .request(to_reqwest(req.method), &req.url)
      .header("Authorization", format!("Bearer {}", req.bearer_token));

    if let Some(body) = req.body {
      builder = builder.header("Content-Type", "application/json").body(body);
    }

    let resp = builder.send().await.map_err(transport_error)?;
    let status = resp.status().as_u16();
    let body = resp.text().await.map_err(transport_error)?;

    Ok(RawResponse { status, body })
  }
}

/// Reqwest-backed PUT sink for presigned destinations.
pub struct HttpBlobSink {
  http: reqwest::Client,
  chunk_size: usize,
}

impl HttpBlobSink {
  pub fn new(config: &Config) -> Self {
    Self {
      http: reqwest::Client::new(),
      chunk_size: config.upload_chunk_size,
    }
  }

  /// Share an existing client between transports.
  pub fn with_client(http: reqwest::Client, chunk_size: usize) -> Self {
    Self { http, chunk_size }
  }
}

impl BlobSink for HttpBlobSink {
  async fn put(
    &self,
    url: &str,
    body: &UploadSource,
    on_bytes: Option<ByteProgress>,
  ) -> Result<RawResponse, TransportError> {
    let (chunks, total) = open_body(body, self.chunk_size).await?;

    let sent = AtomicU64::new(0);
    let counted = chunks.inspect_ok(move |chunk| {
      let so_far = sent.fetch_add(chunk.len() as u64, Ordering::Relaxed) + chunk.len() as u64;
      if let Some(cb) = &on_bytes {
        cb(so_far, total);
      }
    });

    // The presigned URL already carries the authorization; extra headers
    // (even a content-type) would invalidate its signature.
    let resp = self
      .http
      .put(url)
      .body(reqwest::Body::wrap_stream(counted))
      .send()
      .await
      .map_err(transport_error)?;

    let status = resp.status().as_u16();
    let text = resp.text().await.map_err(transport_error)?;

    Ok(RawResponse { status, body: text })
  }
}

/// Open the upload source as a chunk stream plus its total size.
async fn open_body(
  source: &UploadSource,
  chunk_size: usize,
) -> Result<(BoxStream<'static, Result<Bytes, std::io::Error>>, u64), TransportError> {
  match source {
    UploadSource::File(path) => {
      let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| TransportError::Unreachable(format!("Stat {}: {}", path.display(), e)))?;
      let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| TransportError::Unreachable(format!("Open {}: {}", path.display(), e)))?;
      Ok((
        Box::pin(ReaderStream::with_capacity(file, chunk_size)),
        meta.len(),
      ))
    }
    UploadSource::Bytes(data) => {
      let total = data.len() as u64;
      let chunks: Vec<Result<Bytes, std::io::Error>> = data
        .chunks(chunk_size.max(1))
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
      Ok((Box::pin(stream::iter(chunks)), total))
    }
  }
}
