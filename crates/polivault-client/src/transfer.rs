use polivault_core::config::Config;
use polivault_core::error::TransportError;
use polivault_core::retry::RetryPolicy;
use polivault_core::security::validate_grant_url;
use polivault_core::transport::{BlobSink, ByteProgress};
use polivault_core::types::{new_task_id, UploadOutcome, UploadSource, WriteGrant};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Percent progress callback, 0-100.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

#[derive(Default)]
pub struct UploadOptions {
  /// Generated when omitted. Reusing an active task's id aborts that task.
  pub task_id: Option<String>,
  pub on_progress: Option<ProgressFn>,
}

struct ActiveUpload {
  generation: u64,
  abort_tx: watch::Sender<bool>,
}

/// Moves files to grant destinations with progress, retry and cancellation.
///
/// Callers reference tasks only by id; the registry of live transfers is
/// owned exclusively by the manager.
pub struct TransferManager<S: BlobSink> {
  inner: Arc<TransferInner<S>>,
}

impl<S: BlobSink> Clone for TransferManager<S> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

struct TransferInner<S> {
  sink: S,
  retry: RetryPolicy,
  tasks: Mutex<HashMap<String, ActiveUpload>>,
  generation: AtomicU64,
}

impl<S: BlobSink> TransferManager<S> {
  pub fn new(config: &Config, sink: S) -> Self {
    Self {
      inner: Arc::new(TransferInner {
        sink,
        retry: RetryPolicy::new(config.upload_max_retries),
        tasks: Mutex::new(HashMap::new()),
        generation: AtomicU64::new(0),
      }),
    }
  }

  /// Upload one object to its grant destination and settle a terminal outcome.
  pub async fn start_upload(
    &self,
    source: UploadSource,
    grant: WriteGrant,
    options: UploadOptions,
  ) -> UploadOutcome {
    let task_id = options.task_id.unwrap_or_else(new_task_id);

    // Re-validate the destination before any bytes move.
    if let Err(msg) = validate_grant_url(&grant.url) {
      tracing::error!("Upload {} rejected: {}", task_id, msg);
      return UploadOutcome::Failed { status: 0, message: msg };
    }

    let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
    let (abort_tx, abort_rx) = watch::channel(false);

    {
      let mut tasks = self.inner.tasks.lock().unwrap();
      // A new upload under an existing id supersedes the prior one.
      if let Some(prev) = tasks.insert(task_id.clone(), ActiveUpload { generation, abort_tx }) {
        let _ = prev.abort_tx.send(true);
      }
    }

    let outcome = self
      .inner
      .run(&task_id, &source, &grant, options.on_progress, abort_rx)
      .await;

    {
      let mut tasks = self.inner.tasks.lock().unwrap();
      // A successor under the same id owns the slot now; leave it alone.
      let still_ours = matches!(
        tasks.get(&task_id),
        Some(task) if task.generation == generation
      );
      if still_ours {
        tasks.remove(&task_id);
      }
    }

    outcome
  }

  /// Abort the transfer registered under `task_id`.
  ///
  /// Returns whether a task was found; a no-op on ids that already settled.
  pub fn cancel_upload(&self, task_id: &str) -> bool {
    let removed = self.inner.tasks.lock().unwrap().remove(task_id);
    match removed {
      Some(task) => {
        let _ = task.abort_tx.send(true);
        true
      }
      None => false,
    }
  }

  /// Abort every active transfer, returning how many there were.
  pub fn cancel_all_uploads(&self) -> usize {
    let drained: Vec<ActiveUpload> = {
      let mut tasks = self.inner.tasks.lock().unwrap();
      tasks.drain().map(|(_, task)| task).collect()
    };
    for task in &drained {
      let _ = task.abort_tx.send(true);
    }
    drained.len()
  }

  pub fn active_upload_count(&self) -> usize {
    self.inner.tasks.lock().unwrap().len()
  }

  pub fn active_task_ids(&self) -> Vec<String> {
    self.inner.tasks.lock().unwrap().keys().cloned().collect()
  }
}

impl<S: BlobSink> TransferInner<S> {
  async fn run(
    &self,
    task_id: &str,
    source: &UploadSource,
    grant: &WriteGrant,
    on_progress: Option<ProgressFn>,
    mut abort_rx: watch::Receiver<bool>,
  ) -> UploadOutcome {
    let settled = Arc::new(AtomicBool::new(false));
    let mut retries_used: u32 = 0;

    loop {
      // Each attempt reports from its own actual position.
      let last_percent = Arc::new(AtomicU8::new(0));
      let on_bytes = on_progress
        .as_ref()
        .map(|cb| forward_progress(cb, &settled, &last_percent));

      let attempt = self.sink.put(&grant.url, source, on_bytes);
      tokio::pin!(attempt);

      let result = tokio::select! {
        res = &mut attempt => res,
        _ = abort_rx.changed() => {
          settled.store(true, Ordering::Relaxed);
          tracing::info!("Upload {} aborted", task_id);
          return UploadOutcome::Aborted;
        }
      };

      let (status, message) = match result {
        Ok(resp) if resp.is_success() => {
          if let Some(cb) = &on_progress {
            if last_percent.load(Ordering::Relaxed) < 100 {
              cb(100);
            }
          }
          settled.store(true, Ordering::Relaxed);
          return UploadOutcome::Succeeded;
        }
        Ok(resp) => (resp.status, resp.body),
        Err(TransportError::Timeout) => (0, "no response".to_string()),
        Err(TransportError::Unreachable(msg)) => (0, msg),
      };

      if self.retry.should_retry(status, retries_used) {
        retries_used += 1;
        let delay = self.retry.delay(retries_used);
        tracing::warn!(
          "Upload {} got status {}, retry {}/{} in {:?}",
          task_id,
          status,
          retries_used,
          self.retry.max_retries,
          delay
        );
        tokio::select! {
          _ = tokio::time::sleep(delay) => {}
          _ = abort_rx.changed() => {
            settled.store(true, Ordering::Relaxed);
            tracing::info!("Upload {} aborted during backoff", task_id);
            return UploadOutcome::Aborted;
          }
        }
        continue;
      }

      // Whatever landed at the destination before the failure stays there;
      // no compensating delete is issued.
      settled.store(true, Ordering::Relaxed);
      tracing::error!("Upload {} failed with status {}: {}", task_id, status, message);
      return UploadOutcome::Failed { status, message };
    }
  }
}

/// Turn byte counts into a rounded, non-decreasing percent stream that
/// falls silent once the task settles.
fn forward_progress(
  cb: &ProgressFn,
  settled: &Arc<AtomicBool>,
  last_percent: &Arc<AtomicU8>,
) -> ByteProgress {
  let cb = Arc::clone(cb);
  let settled = Arc::clone(settled);
  let last = Arc::clone(last_percent);
  Arc::new(move |sent, total| {
    if settled.load(Ordering::Relaxed) {
      return;
    }
    let percent = if total == 0 {
      100
    } else {
      ((sent as f64 / total as f64) * 100.0).round().min(100.0) as u8
    };
    let prev = last.fetch_max(percent, Ordering::Relaxed);
    if percent >= prev {
      cb(percent);
    }
  })
}
