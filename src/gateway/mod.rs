//! Outgoing call pipeline.
//!
//! Every authenticated call goes through [`RequestGateway::send`]:
//!
//! 1. attach `Authorization: Bearer <token>` unless the caller set one
//! 2. dispatch through the [`Transport`], bounded by the request timeout
//! 3. hand a `401` on a credentialed call to the [`RefreshCoordinator`]
//! 4. report every other failure and retry it when the recovery policy
//!    asks for a retry
//!
//! Cancellation settles the call with [`GatewayError::Cancelled`] at any
//! stage and is never reported as a failure.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::auth::RefreshCoordinator;
use crate::error::FailureEvent;
use crate::recovery::RecoveryAction;
use crate::reporter::FailureReporter;
use crate::transport::{send_with_timeout, HttpRequest, HttpResponse, Transport, TransportError};

/// Errors a caller of the gateway can see.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No response could be obtained.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The session is over; the caller should log in again.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The caller cancelled the call.
    #[error("request cancelled")]
    Cancelled,

    /// A request or response body could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for gateway operations.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Overrides the default per-attempt timeout. `Some(Duration::ZERO)`
    /// disables the timeout for this call.
    pub timeout: Option<Duration>,
    /// Settles the call with [`GatewayError::Cancelled`] when fired.
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    /// Sets the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the cancellation token.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }
}

struct GatewayInner {
    transport: Arc<dyn Transport>,
    coordinator: Arc<RefreshCoordinator>,
    reporter: FailureReporter,
    default_timeout: Option<Duration>,
    retry_non_idempotent: bool,
}

/// Credential-injecting, retrying front of the transport.
#[derive(Clone)]
pub struct RequestGateway {
    inner: Arc<GatewayInner>,
}

impl std::fmt::Debug for RequestGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGateway")
            .field("transport", &self.inner.transport)
            .field("default_timeout", &self.inner.default_timeout)
            .field("retry_non_idempotent", &self.inner.retry_non_idempotent)
            .finish()
    }
}

impl RequestGateway {
    /// Creates a gateway. A `default_timeout` of `None` disables timeouts.
    pub fn new(
        transport: Arc<dyn Transport>,
        coordinator: Arc<RefreshCoordinator>,
        reporter: FailureReporter,
        default_timeout: Option<Duration>,
        retry_non_idempotent: bool,
    ) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                transport,
                coordinator,
                reporter,
                default_timeout,
                retry_non_idempotent,
            }),
        }
    }

    /// The coordinator owning the credential.
    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.inner.coordinator
    }

    /// Sends `request` and returns its final outcome.
    pub async fn send(
        &self,
        request: HttpRequest,
        options: RequestOptions,
    ) -> GatewayResult<HttpResponse> {
        match options.cancel.clone() {
            Some(cancel) => {
                let target = request.url.clone();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!(url = %target, "request cancelled");
                        Err(GatewayError::Cancelled)
                    }
                    outcome = self.execute(request, options, true) => outcome,
                }
            }
            None => self.execute(request, options, true).await,
        }
    }

    /// Re-dispatches a call parked behind a refresh. A further 401 is
    /// returned to the caller instead of starting another refresh.
    pub(crate) fn replay(
        &self,
        request: HttpRequest,
        options: RequestOptions,
    ) -> BoxFuture<'static, GatewayResult<HttpResponse>> {
        let gateway = self.clone();
        Box::pin(async move {
            if options.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            gateway.execute(request, options, false).await
        })
    }

    async fn execute(
        &self,
        request: HttpRequest,
        options: RequestOptions,
        allow_refresh: bool,
    ) -> GatewayResult<HttpResponse> {
        let timeout = match options.timeout {
            Some(limit) if limit.is_zero() => None,
            Some(limit) => Some(limit),
            None => self.inner.default_timeout,
        };
        let mut retried: Vec<String> = Vec::new();

        loop {
            let (outgoing, sent_with) = self.authorize(request.clone());
            tracing::debug!(method = %outgoing.method, url = %outgoing.url, "dispatching");

            match send_with_timeout(self.inner.transport.as_ref(), outgoing, timeout).await {
                Err(error) => {
                    let event = FailureEvent::network(None, error.to_string())
                        .with_origin(&request.url)
                        .add_context("method", request.method.as_str());
                    let identity = event.identity();
                    let action = self.inner.reporter.report(event);

                    if let Some(delay) = self.retry_delay(&action, &request, &identity) {
                        retried.push(identity);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(error.into());
                }
                Ok(response) if response.is_unauthorized() && allow_refresh => {
                    if let Some(token) = sent_with {
                        return self
                            .inner
                            .coordinator
                            .handle_unauthorized(self, request, &options, token)
                            .await;
                    }
                    self.report_status(&request, &response);
                    return Ok(response);
                }
                Ok(response) if response.is_success() => {
                    for identity in &retried {
                        self.inner.reporter.resolve(identity);
                    }
                    return Ok(response);
                }
                Ok(response) => {
                    let (identity, action) = self.report_status(&request, &response);
                    if let Some(delay) = self.retry_delay(&action, &request, &identity) {
                        retried.push(identity);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Ok(response);
                }
            }
        }
    }

    /// Attaches the current credential unless the caller supplied its own.
    /// Returns the token that was attached.
    fn authorize(&self, mut request: HttpRequest) -> (HttpRequest, Option<String>) {
        if request.has_authorization() {
            return (request, None);
        }
        let Some(credential) = self.inner.coordinator.credential() else {
            return (request, None);
        };

        match HeaderValue::from_str(&credential.bearer()) {
            Ok(mut value) => {
                value.set_sensitive(true);
                request.headers.insert(AUTHORIZATION, value);
                (request, Some(credential.access_token))
            }
            Err(e) => {
                tracing::warn!(error = %e, "access token is not a valid header value");
                (request, None)
            }
        }
    }

    fn report_status(&self, request: &HttpRequest, response: &HttpResponse) -> (String, RecoveryAction) {
        let event = FailureEvent::network(Some(response.status), format!("HTTP {}", response.status))
            .with_origin(&request.url)
            .add_context("method", request.method.as_str());
        let identity = event.identity();
        (identity, self.inner.reporter.report(event))
    }

    /// The backoff to wait before retrying, if the call may be retried.
    fn retry_delay(
        &self,
        action: &RecoveryAction,
        request: &HttpRequest,
        identity: &str,
    ) -> Option<Duration> {
        let RecoveryAction::Retry { attempt, delay } = action else {
            return None;
        };
        if !request.is_idempotent() && !self.inner.retry_non_idempotent {
            tracing::debug!(method = %request.method, "not retrying non-idempotent request");
            self.inner.reporter.resolve(identity);
            return None;
        }
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, url = %request.url, "retrying");
        Some(*delay)
    }
}
