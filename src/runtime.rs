//! The constructed runtime that wires every component together.
//!
//! A [`RequestRuntime`] owns one credential, one ledger, one recovery
//! engine and one event bus. Collaborators hold a reference to it instead
//! of reaching for process globals.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::auth::{AuthEndpoints, RefreshCoordinator, Registration};
use crate::error::{ClassifiedFailure, FailureEvent, ScriptFault};
use crate::events::{EventBus, RuntimeEvent};
use crate::gateway::{GatewayError, RequestGateway, RequestOptions};
use crate::ledger::ErrorLedger;
use crate::recovery::{RecoveryAction, RecoveryEngine, SafeMode};
use crate::reporter::{ErrorReport, FailureReporter};
use crate::session::{Credential, CredentialMirror, FileStore, KeyValueStore, MemoryStore, StoreError};
use crate::settings::{ConfigError, RuntimeConfig};
use crate::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};

/// Errors surfaced by runtime operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("failed to open session store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The report endpoint did not accept an error report.
    #[error("error report rejected with HTTP {0}")]
    ReportRejected(u16),

    /// The health endpoint answered with a non-success status.
    #[error("health check failed with HTTP {0}")]
    Unhealthy(u16),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Builder for [`RequestRuntime`].
#[derive(Debug)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn KeyValueStore>>,
    event_capacity: usize,
}

impl RuntimeBuilder {
    /// Uses `transport` instead of the default `reqwest` transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Uses `store` for the session instead of the one `state_dir` selects.
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Events buffered per subscriber.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Builds the runtime, restoring the credential and error history from
    /// the store.
    pub fn build(self) -> RuntimeResult<RequestRuntime> {
        let config = self.config;
        let endpoints = AuthEndpoints {
            refresh_url: config.endpoint(&config.auth.refresh_path)?,
            login_url: config.endpoint(&config.auth.login_path)?,
            register_url: config.endpoint(&config.auth.register_path)?,
        };

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let store: Arc<dyn KeyValueStore> = match (self.store, &config.state_dir) {
            (Some(store), _) => store,
            (None, Some(dir)) => Arc::new(FileStore::new(dir)?),
            (None, None) => Arc::new(MemoryStore::new()),
        };

        let events = EventBus::new(self.event_capacity);
        let safe_mode = SafeMode::new();
        let ledger = Arc::new(ErrorLedger::persistent(
            config.ledger.capacity,
            config.ledger.persist_limit,
            Arc::clone(&store),
        ));
        let engine = Arc::new(RecoveryEngine::new(
            config.recovery_policy(),
            safe_mode.clone(),
            events.clone(),
        ));
        let reporter = FailureReporter::new(Arc::clone(&ledger), Arc::clone(&engine), events.clone());

        let coordinator = Arc::new(RefreshCoordinator::new(
            endpoints,
            Arc::clone(&transport),
            CredentialMirror::new(Arc::clone(&store)),
            reporter.clone(),
            events.clone(),
            config.request_timeout(),
        ));
        let gateway = RequestGateway::new(
            transport,
            Arc::clone(&coordinator),
            reporter.clone(),
            config.request_timeout(),
            config.retry.retry_non_idempotent,
        );

        tracing::debug!(
            base_url = %config.base_url,
            authenticated = coordinator.is_authenticated(),
            restored_errors = ledger.len(),
            "runtime ready"
        );

        Ok(RequestRuntime {
            config,
            gateway,
            coordinator,
            reporter,
            engine,
            safe_mode,
            events,
        })
    }
}

/// Resilient authenticated request runtime.
#[derive(Debug)]
pub struct RequestRuntime {
    config: RuntimeConfig,
    gateway: RequestGateway,
    coordinator: Arc<RefreshCoordinator>,
    reporter: FailureReporter,
    engine: Arc<RecoveryEngine>,
    safe_mode: SafeMode,
    events: EventBus,
}

impl RequestRuntime {
    /// Starts building a runtime for `config`.
    pub fn builder(config: RuntimeConfig) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            transport: None,
            store: None,
            event_capacity: 64,
        }
    }

    /// The configuration the runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The request pipeline.
    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    /// The credential owner.
    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// Sends `request` with default options.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, GatewayError> {
        self.send_with(request, RequestOptions::default()).await
    }

    /// Sends `request` with explicit timeout and cancellation.
    pub async fn send_with(
        &self,
        request: HttpRequest,
        options: RequestOptions,
    ) -> Result<HttpResponse, GatewayError> {
        self.gateway.send(request, options).await
    }

    /// GETs `path`, resolved against the configured base URL.
    pub async fn get(&self, path: &str) -> RuntimeResult<HttpResponse> {
        let url = self.config.endpoint(path)?;
        Ok(self.send(HttpRequest::get(url)).await?)
    }

    /// Logs in with user credentials.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), GatewayError> {
        self.coordinator.login(email, password).await
    }

    /// Creates an account; returns true if it was also signed in.
    pub async fn register(&self, registration: &Registration) -> Result<bool, GatewayError> {
        self.coordinator.register(registration).await
    }

    /// Profile of the signed-in user, if the server sent one.
    pub fn current_user(&self) -> Option<serde_json::Value> {
        self.coordinator.current_user()
    }

    /// Queries the health endpoint and returns its JSON body.
    pub async fn health(&self) -> RuntimeResult<serde_json::Value> {
        let url = self.config.endpoint(&self.config.health_path)?;
        let response = self.send(HttpRequest::get(url)).await?;
        if !response.is_success() {
            return Err(RuntimeError::Unhealthy(response.status));
        }
        Ok(response.json().map_err(GatewayError::from)?)
    }

    /// Installs a credential obtained outside the login endpoint.
    pub fn set_credential(&self, credential: Credential) {
        self.coordinator.set_credential(credential);
    }

    /// Ends the session.
    pub fn logout(&self) {
        self.coordinator.logout();
    }

    /// Returns true if a credential is held.
    pub fn is_authenticated(&self) -> bool {
        self.coordinator.is_authenticated()
    }

    /// Subscribes to runtime events.
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }

    /// Returns true while the session is degraded.
    pub fn safe_mode(&self) -> bool {
        self.safe_mode.is_active()
    }

    /// The error history.
    pub fn ledger(&self) -> &Arc<ErrorLedger> {
        self.reporter.ledger()
    }

    /// The recovery engine and its retry counters.
    pub fn recovery(&self) -> &Arc<RecoveryEngine> {
        &self.engine
    }

    /// Reports a failure raised by application code.
    pub fn report_script_error(
        &self,
        fault: ScriptFault,
        message: impl Into<String>,
        origin: Option<&str>,
    ) -> RecoveryAction {
        let mut event = FailureEvent::script(fault, message);
        if let Some(origin) = origin {
            event = event.with_origin(origin);
        }
        self.reporter.report(event)
    }

    /// Reports a failed background task nobody awaited.
    pub fn report_rejection(&self, message: impl Into<String>) -> RecoveryAction {
        self.reporter.report(FailureEvent::rejection(message))
    }

    /// Spawns `task` and reports its outcome if nobody else will: an `Err`
    /// as a rejection, a panic as a script failure. The handle yields the
    /// task's value on success.
    pub fn spawn_supervised<F, T, E>(&self, name: impl Into<String>, task: F) -> JoinHandle<Option<T>>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let name = name.into();
        let reporter = self.reporter.clone();
        let inner = tokio::spawn(task);

        tokio::spawn(async move {
            match inner.await {
                Ok(Ok(value)) => Some(value),
                Ok(Err(e)) => {
                    reporter.report(FailureEvent::rejection(e.to_string()).with_origin(&name));
                    None
                }
                Err(join) if join.is_panic() => {
                    let message = panic_message(join.into_panic());
                    reporter.report(
                        FailureEvent::script(ScriptFault::Other, message).with_origin(&name),
                    );
                    None
                }
                Err(_) => {
                    tracing::debug!(task = %name, "supervised task cancelled");
                    None
                }
            }
        })
    }

    /// Submits `failure` to the report endpoint with the user's description.
    pub async fn submit_error_report(
        &self,
        failure: ClassifiedFailure,
        description: &str,
    ) -> RuntimeResult<()> {
        let url = self.config.endpoint(&self.config.report_path)?;
        let report = ErrorReport::new(failure, description);
        let request = HttpRequest::post(url)
            .json(&report)
            .map_err(GatewayError::from)?;

        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(RuntimeError::ReportRejected(response.status));
        }
        tracing::info!("error report submitted");
        Ok(())
    }

    /// Leaves safe mode and forgets retry history.
    pub fn reload(&self) {
        if self.safe_mode.exit() {
            tracing::info!("left safe mode");
        }
        self.engine.reset();
    }

    /// Flushes the error history to the store.
    pub fn shutdown(&self) {
        self.ledger().flush();
        tracing::debug!("runtime shut down");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
