//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use reqwest::header::AUTHORIZATION;
use tokio::time::Instant;

use tokenwarden::session::{KeyValueStore, StoreError, StoreResult};
use tokenwarden::{
    Credential, HttpRequest, HttpResponse, MemoryStore, RequestRuntime, RuntimeConfig, Transport,
    TransportError,
};

pub const BASE: &str = "http://api.test";

/// A request as the transport saw it.
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub at: Instant,
}

type Handler =
    Arc<dyn Fn(HttpRequest) -> BoxFuture<'static, Result<HttpResponse, TransportError>> + Send + Sync>;

/// In-process transport answering from a closure and recording every call.
#[derive(Clone)]
pub struct ScriptedTransport {
    handler: Handler,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("calls", &self.seen.lock().len())
            .finish()
    }
}

impl ScriptedTransport {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, TransportError>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |request| Box::pin(handler(request))),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }

    /// Calls made to `path`.
    pub fn calls_to(&self, path: &str) -> Vec<Seen> {
        self.seen().into_iter().filter(|s| s.path == path).collect()
    }

    /// Paths of the calls that carried `authorization`, in order.
    pub fn paths_with(&self, authorization: &str) -> Vec<String> {
        self.seen()
            .into_iter()
            .filter(|s| s.authorization.as_deref() == Some(authorization))
            .map(|s| s.path)
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.seen.lock().push(Seen {
            method: request.method.to_string(),
            path: path_of(&request.url),
            authorization: bearer(&request),
            at: Instant::now(),
        });
        (self.handler)(request).await
    }
}

pub fn path_of(url: &str) -> String {
    url.strip_prefix(BASE).unwrap_or(url).to_string()
}

pub fn bearer(request: &HttpRequest) -> Option<String> {
    request
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub fn url(path: &str) -> String {
    format!("{}{}", BASE, path)
}

pub fn config() -> RuntimeConfig {
    RuntimeConfig {
        base_url: BASE.to_string(),
        ..RuntimeConfig::default()
    }
}

pub fn runtime_with(
    transport: &ScriptedTransport,
    store: Arc<dyn KeyValueStore>,
    config: RuntimeConfig,
) -> RequestRuntime {
    RequestRuntime::builder(config)
        .transport(Arc::new(transport.clone()))
        .store(store)
        .build()
        .expect("runtime builds")
}

/// Runtime over `transport` holding the `old` / `r-1` credential.
pub fn signed_in(transport: &ScriptedTransport) -> RequestRuntime {
    let runtime = runtime_with(transport, Arc::new(MemoryStore::new()), config());
    runtime.set_credential(Credential::new("old", Some("r-1".to_string())));
    runtime
}

pub fn json(status: u16, body: serde_json::Value) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::new(status)
        .with_json(&body)
        .expect("serializable body"))
}

/// Polls `condition` until it holds, failing the test after a few seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// A store whose writes always fail.
#[derive(Debug, Default)]
pub struct FailingStore;

impl KeyValueStore for FailingStore {
    fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> StoreResult<()> {
        Err(StoreError::Unavailable("quota exceeded".to_string()))
    }

    fn remove(&self, _key: &str) -> StoreResult<()> {
        Err(StoreError::Unavailable("quota exceeded".to_string()))
    }
}
