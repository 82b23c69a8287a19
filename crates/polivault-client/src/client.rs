use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use polivault_core::config::Config;
use polivault_core::error::NetError;
use polivault_core::transport::{ApiRequest, ApiTransport, RawResponse};
use polivault_core::types::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Supplies the current bearer token, or None when unauthenticated.
pub type TokenSupplier = Arc<dyn Fn() -> Option<String> + Send + Sync>;

type SharedCall = Shared<BoxFuture<'static, Result<Value, NetError>>>;

/// How a read participates in the client cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
  /// Issue the call unconditionally.
  #[default]
  None,
  /// Coalesce with an identical in-flight call; drop the entry once settled.
  Dedup,
  /// Coalesce, and keep a successful result until explicitly invalidated.
  Persist,
}

#[derive(Debug, Clone, Default)]
pub struct CallOptions {
  pub cache: CachePolicy,
  /// Defaults to a key derived from the method and endpoint path.
  pub cache_key: Option<String>,
}

impl CallOptions {
  pub fn dedup() -> Self {
    Self {
      cache: CachePolicy::Dedup,
      cache_key: None,
    }
  }

  pub fn dedup_keyed(key: impl Into<String>) -> Self {
    Self {
      cache: CachePolicy::Dedup,
      cache_key: Some(key.into()),
    }
  }

  pub fn persist() -> Self {
    Self {
      cache: CachePolicy::Persist,
      cache_key: None,
    }
  }

  pub fn persist_keyed(key: impl Into<String>) -> Self {
    Self {
      cache: CachePolicy::Persist,
      cache_key: Some(key.into()),
    }
  }
}

/// The in-flight or settled result of one read, shared by every caller
/// that presented the same cache key.
enum CacheSlot {
  Pending { call: SharedCall, generation: u64 },
  Ready(Value),
}

/// Authenticated JSON API client with in-flight de-duplication of reads.
pub struct RequestClient<T: ApiTransport> {
  inner: Arc<ClientInner<T>>,
}

impl<T: ApiTransport> Clone for RequestClient<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

struct ClientInner<T> {
  config: Config,
  transport: T,
  token: TokenSupplier,
  cache: Mutex<HashMap<String, CacheSlot>>,
  slot_generation: AtomicU64,
}

impl<T: ApiTransport + 'static> RequestClient<T> {
  pub fn new(config: Config, transport: T, token: TokenSupplier) -> Self {
    Self {
      inner: Arc::new(ClientInner {
        config,
        transport,
        token,
        cache: Mutex::new(HashMap::new()),
        slot_generation: AtomicU64::new(0),
      }),
    }
  }

  pub fn config(&self) -> &Config {
    &self.inner.config
  }

  /// Issue an authenticated call, coalescing identical in-flight reads.
  ///
  /// Caching applies only to bodyless reads; writes always go out.
  pub async fn call(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<Value>,
    options: CallOptions,
  ) -> Result<Value, NetError> {
    let cacheable = options.cache != CachePolicy::None && method.is_read() && body.is_none();
    if !cacheable {
      return self.inner.execute(method, endpoint, body).await;
    }

    let key = options
      .cache_key
      .unwrap_or_else(|| format!("{} {}", method.as_str(), endpoint));

    let mut cache = self.inner.cache.lock().unwrap();
    match cache.get(&key) {
      Some(CacheSlot::Ready(value)) => return Ok(value.clone()),
      Some(CacheSlot::Pending { call, .. }) => {
        let call = call.clone();
        drop(cache);
        return call.await;
      }
      None => {}
    }

    let generation = self.inner.slot_generation.fetch_add(1, Ordering::Relaxed);
    let call = ClientInner::owned_call(
      &self.inner,
      method,
      endpoint.to_string(),
      key.clone(),
      options.cache,
      generation,
    );
    cache.insert(
      key,
      CacheSlot::Pending {
        call: call.clone(),
        generation,
      },
    );
    drop(cache);

    call.await
  }

  pub async fn get(&self, endpoint: &str, options: CallOptions) -> Result<Value, NetError> {
    self.call(Method::Get, endpoint, None, options).await
  }

  pub async fn post(&self, endpoint: &str, body: Value) -> Result<Value, NetError> {
    self
      .call(Method::Post, endpoint, Some(body), CallOptions::default())
      .await
  }

  pub async fn put(&self, endpoint: &str, body: Value) -> Result<Value, NetError> {
    self
      .call(Method::Put, endpoint, Some(body), CallOptions::default())
      .await
  }

  pub async fn delete(&self, endpoint: &str) -> Result<Value, NetError> {
    self
      .call(Method::Delete, endpoint, None, CallOptions::default())
      .await
  }

  /// Invalidate one cache entry, or all of them.
  pub fn clear_cache(&self, key: Option<&str>) {
    let mut cache = self.inner.cache.lock().unwrap();
    match key {
      Some(k) => {
        cache.remove(k);
      }
      None => cache.clear(),
    }
  }
}

impl<T: ApiTransport + 'static> ClientInner<T> {
  /// Build the single shared future behind a cache key. Settlement runs
  /// inside it, so whichever caller drives it last cleans up the slot.
  fn owned_call(
    inner: &Arc<Self>,
    method: Method,
    endpoint: String,
    key: String,
    policy: CachePolicy,
    generation: u64,
  ) -> SharedCall {
    let inner = Arc::clone(inner);
    async move {
      let result = inner.execute(method, &endpoint, None).await;

      let mut cache = inner.cache.lock().unwrap();
      // Only touch the slot if it is still ours; an explicit invalidation
      // may have replaced it with a newer in-flight call.
      let owns_slot = matches!(
        cache.get(&key),
        Some(CacheSlot::Pending { generation: g, .. }) if *g == generation
      );
      if owns_slot {
        cache.remove(&key);
        if let (Ok(value), CachePolicy::Persist) = (&result, policy) {
          cache.insert(key, CacheSlot::Ready(value.clone()));
        }
      }
      drop(cache);

      result
    }
    .boxed()
    .shared()
  }
}

impl<T: ApiTransport> ClientInner<T> {
  async fn execute(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<Value>,
  ) -> Result<Value, NetError> {
    let token = match (self.token)() {
      Some(t) => t,
      None => return Err(NetError::Unauthorized),
    };

    let req = ApiRequest {
      method,
      url: self.config.api_url(endpoint),
      bearer_token: token,
      body: body.map(|b| b.to_string()),
    };

    let send = self.transport.send(req);
    let resp = match tokio::time::timeout(self.config.request_timeout(), send).await {
      Ok(Ok(resp)) => resp,
      Ok(Err(e)) => {
        tracing::error!("{} {} transport error: {}", method.as_str(), endpoint, e);
        return Err(e.into());
      }
      Err(_) => {
        tracing::error!(
          "{} {} timed out after {}s",
          method.as_str(),
          endpoint,
          self.config.request_timeout_secs
        );
        return Err(NetError::Timeout);
      }
    };

    let result = classify(resp);
    if let Err(e) = &result {
      tracing::warn!("{} {} failed: {}", method.as_str(), endpoint, e);
    }
    result
  }
}

fn classify(resp: RawResponse) -> Result<Value, NetError> {
  if !resp.is_success() {
    return Err(NetError::Server {
      status: resp.status,
      message: error_message(&resp.body),
    });
  }

  serde_json::from_str(&resp.body).map_err(|e| NetError::MalformedResponse(e.to_string()))
}

/// Pull a human-readable message out of an error body when it is JSON.
fn error_message(body: &str) -> String {
  if let Ok(value) = serde_json::from_str::<Value>(body) {
    for field in ["message", "error"] {
      if let Some(msg) = value.get(field).and_then(|v| v.as_str()) {
        return msg.to_string();
      }
    }
  }
  body.to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use polivault_core::error::TransportError;
  use std::collections::VecDeque;
  use std::sync::atomic::AtomicUsize;
  use std::time::Duration;

  struct FakeApi {
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<ApiRequest>>>,
    responses: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    latency: Duration,
  }

  impl FakeApi {
    fn new(responses: Vec<Result<RawResponse, TransportError>>) -> Self {
      Self {
        calls: Arc::new(AtomicUsize::new(0)),
        seen: Arc::new(Mutex::new(Vec::new())),
        responses: Mutex::new(responses.into_iter().collect()),
        latency: Duration::ZERO,
      }
    }

    fn with_latency(mut self, latency: Duration) -> Self {
      self.latency = latency;
      self
    }

    fn call_count(&self) -> Arc<AtomicUsize> {
      Arc::clone(&self.calls)
    }

    fn requests(&self) -> Arc<Mutex<Vec<ApiRequest>>> {
      Arc::clone(&self.seen)
    }
  }

  impl ApiTransport for FakeApi {
    async fn send(&self, req: ApiRequest) -> Result<RawResponse, TransportError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.seen.lock().unwrap().push(req);
      if !self.latency.is_zero() {
        tokio::time::sleep(self.latency).await;
      }
      self.responses.lock().unwrap().pop_front().unwrap_or(Ok(RawResponse {
        status: 200,
        body: "{}".into(),
      }))
    }
  }

  fn ok(body: &str) -> Result<RawResponse, TransportError> {
    Ok(RawResponse {
      status: 200,
      body: body.into(),
    })
  }

  fn status(code: u16, body: &str) -> Result<RawResponse, TransportError> {
    Ok(RawResponse {
      status: code,
      body: body.into(),
    })
  }

  fn make_client(api: FakeApi) -> RequestClient<FakeApi> {
    RequestClient::new(
      Config::default(),
      api,
      Arc::new(|| Some("token-1".to_string())),
    )
  }

  #[tokio::test(start_paused = true)]
  async fn concurrent_reads_share_one_call() {
    let api = FakeApi::new(vec![ok(r#"{"customers":[{"id":1},{"id":2}]}"#)])
      .with_latency(Duration::from_secs(1));
    let calls = api.call_count();
    let client = make_client(api);

    let (a, b) = tokio::join!(
      client.get("/customers", CallOptions::dedup_keyed("customers-list")),
      client.get("/customers", CallOptions::dedup_keyed("customers-list")),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let a = a.unwrap();
    assert_eq!(a, b.unwrap());
    assert_eq!(a["customers"].as_array().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn missing_token_is_unauthorized() {
    let api = FakeApi::new(vec![]);
    let calls = api.call_count();
    let client = RequestClient::new(Config::default(), api, Arc::new(|| None));

    let err = client
      .get("/customers", CallOptions::default())
      .await
      .unwrap_err();
    assert!(matches!(err, NetError::Unauthorized));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn server_error_carries_parsed_message() {
    let api = FakeApi::new(vec![status(404, r#"{"error":"No such customer"}"#)]);
    let client = make_client(api);

    let err = client
      .get("/customers/42", CallOptions::default())
      .await
      .unwrap_err();
    match err {
      NetError::Server { status, message } => {
        assert_eq!(status, 404);
        assert_eq!(message, "No such customer");
      }
      other => panic!("unexpected error: {:?}", other),
    }
  }

  #[tokio::test]
  async fn server_error_falls_back_to_raw_body() {
    let api = FakeApi::new(vec![status(500, "upstream exploded")]);
    let client = make_client(api);

    let err = client
      .get("/customers", CallOptions::default())
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      NetError::Server { status: 500, message } if message == "upstream exploded"
    ));
  }

  #[tokio::test]
  async fn unparseable_success_body_is_malformed() {
    let api = FakeApi::new(vec![ok("<html>login</html>")]);
    let client = make_client(api);

    let err = client
      .get("/customers", CallOptions::default())
      .await
      .unwrap_err();
    assert!(matches!(err, NetError::MalformedResponse(_)));
  }

  #[tokio::test]
  async fn failed_call_does_not_poison_the_cache() {
    let api = FakeApi::new(vec![
      Err(TransportError::Unreachable("connection refused".into())),
      ok(r#"{"customers":[]}"#),
    ]);
    let calls = api.call_count();
    let client = make_client(api);

    let first = client
      .get("/customers", CallOptions::persist_keyed("customers-list"))
      .await;
    assert!(matches!(first, Err(NetError::Network(_))));

    let second = client
      .get("/customers", CallOptions::persist_keyed("customers-list"))
      .await;
    assert!(second.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn dedup_entries_drop_once_settled() {
    let api = FakeApi::new(vec![ok("{}"), ok("{}")]);
    let calls = api.call_count();
    let client = make_client(api);

    client.get("/policies", CallOptions::dedup()).await.unwrap();
    client.get("/policies", CallOptions::dedup()).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn persistent_entries_survive_until_invalidated() {
    let api = FakeApi::new(vec![ok(r#"{"n":1}"#), ok(r#"{"n":2}"#)]);
    let calls = api.call_count();
    let client = make_client(api);

    let first = client.get("/policies", CallOptions::persist()).await.unwrap();
    let second = client.get("/policies", CallOptions::persist()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    client.clear_cache(None);

    let third = client.get("/policies", CallOptions::persist()).await.unwrap();
    assert_eq!(third["n"], 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn clear_cache_scopes_to_one_key() {
    let api = FakeApi::new(vec![
      ok(r#"{"which":"a"}"#),
      ok(r#"{"which":"b"}"#),
      ok(r#"{"which":"a2"}"#),
    ]);
    let calls = api.call_count();
    let client = make_client(api);

    client
      .get("/customers", CallOptions::persist_keyed("a"))
      .await
      .unwrap();
    client
      .get("/policies", CallOptions::persist_keyed("b"))
      .await
      .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    client.clear_cache(Some("a"));

    let re_a = client
      .get("/customers", CallOptions::persist_keyed("a"))
      .await
      .unwrap();
    assert_eq!(re_a["which"], "a2");

    let still_b = client
      .get("/policies", CallOptions::persist_keyed("b"))
      .await
      .unwrap();
    assert_eq!(still_b["which"], "b");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn slow_call_times_out() {
    let api = FakeApi::new(vec![ok("{}")]).with_latency(Duration::from_secs(30));
    let client = make_client(api);

    let err = client
      .get("/customers", CallOptions::default())
      .await
      .unwrap_err();
    assert!(matches!(err, NetError::Timeout));
  }

  #[tokio::test]
  async fn writes_bypass_the_cache() {
    let api = FakeApi::new(vec![ok("{}"), ok("{}")]);
    let calls = api.call_count();
    let client = make_client(api);

    client
      .post("/documents", serde_json::json!({"name": "a"}))
      .await
      .unwrap();
    client
      .post("/documents", serde_json::json!({"name": "a"}))
      .await
      .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn requests_carry_token_and_json_body() {
    let api = FakeApi::new(vec![ok("{}")]);
    let seen = api.requests();
    let client = make_client(api);

    client
      .post("/documents", serde_json::json!({"name": "claim.pdf"}))
      .await
      .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, Method::Post);
    assert_eq!(seen[0].url, "http://localhost:8080/documents");
    assert_eq!(seen[0].bearer_token, "token-1");
    let body: Value = serde_json::from_str(seen[0].body.as_deref().unwrap()).unwrap();
    assert_eq!(body["name"], "claim.pdf");
  }
}
