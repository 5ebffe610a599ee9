//! Single-flight credential refresh.
//!
//! The coordinator is the only owner of the [`Credential`]. When a call
//! carrying the credential comes back `401`, the coordinator either starts
//! the one refresh allowed at a time or parks the call behind the refresh
//! already running:
//!
//! ```text
//! Idle --(401)--> Refreshing --(refresh settles, queue drained)--> Idle
//! ```
//!
//! Parked calls are dispatched again in the order they arrived once the
//! refresh succeeds, or all rejected with `AuthenticationFailed` if it fails.
//! The refresh and the replays run on their own task, so a caller that goes
//! away does not strand the callers queued behind it.
//!
//! Every login, logout or externally installed credential starts a new
//! session epoch. A refresh started under an older epoch never installs its
//! result; the calls queued behind it follow whatever session is current
//! when it settles.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;

use super::{AuthEndpoints, LoginRequest, RefreshRequest, Registration, TokenResponse};
use crate::error::FailureEvent;
use crate::events::{EventBus, RuntimeEvent};
use crate::gateway::{GatewayError, RequestGateway, RequestOptions};
use crate::reporter::FailureReporter;
use crate::session::{Credential, CredentialMirror};
use crate::transport::{send_with_timeout, HttpRequest, HttpResponse, Transport};

type Reply = oneshot::Sender<Result<HttpResponse, GatewayError>>;

/// Whether a refresh is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPhase {
    /// No refresh running.
    #[default]
    Idle,
    /// A refresh is in flight; new 401s queue behind it.
    Refreshing,
}

/// A caller parked until the refresh settles. Replayed at most once.
struct PendingCall {
    request: HttpRequest,
    options: RequestOptions,
    reply: Reply,
}

#[derive(Default)]
struct CoordinatorState {
    credential: Option<Credential>,
    phase: RefreshPhase,
    queue: VecDeque<PendingCall>,
    epoch: u64,
}

/// What a 401 turns into, decided under the state lock.
enum Disposition {
    /// Start the refresh for session `epoch` and wait for the replay.
    Lead {
        rx: oneshot::Receiver<Result<HttpResponse, GatewayError>>,
        epoch: u64,
    },
    /// Wait behind the refresh already running.
    Wait(oneshot::Receiver<Result<HttpResponse, GatewayError>>),
    /// The credential changed since the call was sent; replay right away.
    ReplayNow(HttpRequest),
    /// The session is gone.
    Reject,
}

enum RefreshError {
    /// The refresh itself failed.
    Failed(String),
    /// The session changed while the refresh ran.
    Superseded,
}

/// Owner of the credential and of the refresh protocol.
pub struct RefreshCoordinator {
    state: Mutex<CoordinatorState>,
    mirror: CredentialMirror,
    endpoints: AuthEndpoints,
    transport: Arc<dyn Transport>,
    reporter: FailureReporter,
    events: EventBus,
    timeout: Option<Duration>,
    refresh_calls: AtomicU64,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RefreshCoordinator")
            .field("authenticated", &state.credential.is_some())
            .field("phase", &state.phase)
            .field("pending", &state.queue.len())
            .field("epoch", &state.epoch)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

impl RefreshCoordinator {
    /// Creates a coordinator, restoring the persisted credential if any.
    pub fn new(
        endpoints: AuthEndpoints,
        transport: Arc<dyn Transport>,
        mirror: CredentialMirror,
        reporter: FailureReporter,
        events: EventBus,
        timeout: Option<Duration>,
    ) -> Self {
        let credential = mirror.load();
        if credential.is_some() {
            tracing::debug!("restored persisted session");
        }

        Self {
            state: Mutex::new(CoordinatorState {
                credential,
                ..CoordinatorState::default()
            }),
            mirror,
            endpoints,
            transport,
            reporter,
            events,
            timeout,
            refresh_calls: AtomicU64::new(0),
        }
    }

    /// The credential currently attached to outgoing calls.
    pub fn credential(&self) -> Option<Credential> {
        self.state.lock().credential.clone()
    }

    /// The access token currently attached to outgoing calls.
    pub fn access_token(&self) -> Option<String> {
        self.state
            .lock()
            .credential
            .as_ref()
            .map(|c| c.access_token.clone())
    }

    /// Returns true if a credential is held.
    pub fn is_authenticated(&self) -> bool {
        self.state.lock().credential.is_some()
    }

    /// Profile of the signed-in user, as returned by login or registration.
    pub fn current_user(&self) -> Option<serde_json::Value> {
        self.mirror.load_user()
    }

    /// Current refresh phase.
    pub fn phase(&self) -> RefreshPhase {
        self.state.lock().phase
    }

    /// Returns true while a refresh is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.phase() == RefreshPhase::Refreshing
    }

    /// Number of callers waiting on the refresh.
    pub fn pending_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Number of refresh calls issued so far.
    pub fn refresh_calls(&self) -> u64 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Installs a credential obtained elsewhere and persists it. This starts
    /// a new session: a refresh in flight will not overwrite it.
    pub fn set_credential(&self, credential: Credential) {
        let mut state = self.state.lock();
        self.mirror.save(&credential);
        state.credential = Some(credential);
        state.epoch += 1;
    }

    /// Exchanges user credentials for a token pair.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), GatewayError> {
        let response = self
            .post_auth(&self.endpoints.login_url, &LoginRequest { email, password }, "login")
            .await?;

        let tokens: TokenResponse = response.json()?;
        self.start_session(tokens);
        tracing::info!("logged in");
        Ok(())
    }

    /// Creates an account. Returns true if the server also signed the new
    /// account in by returning a token pair.
    pub async fn register(&self, registration: &Registration) -> Result<bool, GatewayError> {
        let response = self
            .post_auth(&self.endpoints.register_url, registration, "registration")
            .await?;

        match response.json::<TokenResponse>() {
            Ok(tokens) => {
                self.start_session(tokens);
                tracing::info!("registered and logged in");
                Ok(true)
            }
            Err(_) => {
                tracing::info!("registered");
                Ok(false)
            }
        }
    }

    /// Drops the credential and ends the session.
    pub fn logout(&self) {
        let had_session = {
            let mut state = self.state.lock();
            state.epoch += 1;
            self.mirror.clear();
            state.credential.take().is_some()
        };
        if had_session {
            tracing::info!("logged out");
            self.events.publish(RuntimeEvent::SessionEnded {
                reason: "logout".to_string(),
            });
        }
    }

    /// Handles a 401 for `request`, which was sent with `sent_with`.
    pub(crate) async fn handle_unauthorized(
        self: &Arc<Self>,
        gateway: &RequestGateway,
        request: HttpRequest,
        options: &RequestOptions,
        sent_with: String,
    ) -> Result<HttpResponse, GatewayError> {
        let disposition = {
            let mut state = self.state.lock();
            let current = state.credential.as_ref().map(|c| c.access_token.clone());

            if state.phase == RefreshPhase::Refreshing {
                let (reply, rx) = oneshot::channel();
                state.queue.push_back(PendingCall {
                    request,
                    options: options.clone(),
                    reply,
                });
                Disposition::Wait(rx)
            } else {
                match current {
                    None => Disposition::Reject,
                    Some(token) if token != sent_with => Disposition::ReplayNow(request),
                    Some(_) => {
                        let (reply, rx) = oneshot::channel();
                        state.phase = RefreshPhase::Refreshing;
                        state.queue.push_back(PendingCall {
                            request,
                            options: options.clone(),
                            reply,
                        });
                        Disposition::Lead {
                            rx,
                            epoch: state.epoch,
                        }
                    }
                }
            }
        };

        match disposition {
            Disposition::Lead { rx, epoch } => {
                tracing::info!("access token rejected, refreshing");
                tokio::spawn(Arc::clone(self).drive(gateway.clone(), epoch));
                settle(rx).await
            }
            Disposition::Wait(rx) => {
                tracing::debug!("refresh in flight, queued unauthorized call");
                settle(rx).await
            }
            Disposition::ReplayNow(request) => {
                tracing::debug!("credential already refreshed, replaying");
                gateway.replay(request, options.clone()).await
            }
            Disposition::Reject => Err(GatewayError::AuthenticationFailed(
                "session has ended".to_string(),
            )),
        }
    }

    async fn drive(self: Arc<Self>, gateway: RequestGateway, epoch: u64) {
        let failure = match self.refresh(epoch).await {
            Ok(()) => return self.drain(&gateway).await,
            Err(RefreshError::Failed(reason)) => Some(reason),
            Err(RefreshError::Superseded) => None,
        };

        if let Some(reason) = failure {
            if self.fail_all(epoch, &reason) {
                return;
            }
        }
        self.resume_after_session_change(&gateway).await;
    }

    /// Issues the refresh call and installs the new credential, unless the
    /// session changed meanwhile.
    async fn refresh(&self, epoch: u64) -> Result<(), RefreshError> {
        let refresh_token = self
            .state
            .lock()
            .credential
            .as_ref()
            .filter(|c| c.can_refresh())
            .and_then(|c| c.refresh_token.clone());
        let Some(refresh_token) = refresh_token else {
            return Err(RefreshError::Failed("no refresh token available".to_string()));
        };

        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let request = HttpRequest::post(&self.endpoints.refresh_url)
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .map_err(|e| RefreshError::Failed(e.to_string()))?;

        let response = match send_with_timeout(self.transport.as_ref(), request, self.timeout).await
        {
            Ok(response) => response,
            Err(error) => {
                let reason = format!("token refresh failed: {}", error);
                self.reporter.report_terminal(
                    FailureEvent::network(None, reason.clone())
                        .with_origin(&self.endpoints.refresh_url),
                );
                return Err(RefreshError::Failed(reason));
            }
        };

        if !response.is_success() {
            self.reporter.report_terminal(
                FailureEvent::network(Some(response.status), format!("HTTP {}", response.status))
                    .with_origin(&self.endpoints.refresh_url),
            );
            return Err(RefreshError::Failed(format!(
                "token refresh rejected with HTTP {}",
                response.status
            )));
        }

        let tokens: TokenResponse = response.json().map_err(|e| {
            let reason = format!("unreadable token refresh response: {}", e);
            self.reporter.report_terminal(
                FailureEvent::network(Some(response.status), reason.clone())
                    .with_origin(&self.endpoints.refresh_url),
            );
            RefreshError::Failed(reason)
        })?;

        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                tracing::info!("session changed during refresh, discarding refreshed token");
                return Err(RefreshError::Superseded);
            }
            let credential = Credential::new(
                tokens.access_token,
                tokens
                    .refresh_token
                    .filter(|t| !t.is_empty())
                    .or(Some(refresh_token)),
            );
            self.mirror.save(&credential);
            state.credential = Some(credential);
        }

        tracing::info!("access token refreshed");
        Ok(())
    }

    /// Dispatches queued calls in arrival order and waits for them together.
    /// Calls queued meanwhile are picked up in a further round.
    async fn drain(&self, gateway: &RequestGateway) {
        let mut replayed = 0usize;
        loop {
            let batch = {
                let mut state = self.state.lock();
                if state.queue.is_empty() {
                    state.phase = RefreshPhase::Idle;
                    break;
                }
                std::mem::take(&mut state.queue)
            };

            let replays: Vec<_> = batch
                .into_iter()
                .filter(|call| {
                    let gone = call.reply.is_closed();
                    if gone {
                        tracing::debug!(url = %call.request.url, "caller gone, skipping replay");
                    }
                    !gone
                })
                .map(|call| {
                    let PendingCall {
                        request,
                        options,
                        reply,
                    } = call;
                    let replay = gateway.replay(request, options);
                    async move {
                        // The caller may have been cancelled while the replay ran.
                        let _ = reply.send(replay.await);
                    }
                })
                .collect();

            replayed += replays.len();
            futures::future::join_all(replays).await;
        }
        tracing::debug!(replayed, "refresh queue drained");
    }

    /// Ends session `epoch` and rejects every queued call. Returns false,
    /// doing nothing, if that session is already over.
    fn fail_all(&self, epoch: u64, reason: &str) -> bool {
        let rejected = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return false;
            }
            self.mirror.clear();
            state.credential = None;
            state.epoch += 1;
            state.phase = RefreshPhase::Idle;
            std::mem::take(&mut state.queue)
        };

        tracing::warn!(reason = %reason, rejected = rejected.len(), "session ended");
        self.events.publish(RuntimeEvent::SessionEnded {
            reason: reason.to_string(),
        });
        reject(rejected, reason);
        true
    }

    /// Settles the queue of a refresh whose session was replaced or ended
    /// while it ran.
    async fn resume_after_session_change(&self, gateway: &RequestGateway) {
        if self.is_authenticated() {
            tracing::debug!("replaying queued calls under the new session");
            return self.drain(gateway).await;
        }

        let rejected = {
            let mut state = self.state.lock();
            state.phase = RefreshPhase::Idle;
            std::mem::take(&mut state.queue)
        };
        tracing::debug!(rejected = rejected.len(), "session ended during refresh");
        reject(rejected, "session ended during refresh");
    }

    fn start_session(&self, tokens: TokenResponse) {
        self.set_credential(Credential::new(
            tokens.access_token,
            tokens.refresh_token.filter(|t| !t.is_empty()),
        ));
        self.mirror.save_user(tokens.user.as_ref());
    }

    /// POSTs `body` to an authentication endpoint. Failures are reported
    /// without scheduling a retry.
    async fn post_auth<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        action: &str,
    ) -> Result<HttpResponse, GatewayError> {
        let request = HttpRequest::post(url).json(body)?;

        let response = match send_with_timeout(self.transport.as_ref(), request, self.timeout).await
        {
            Ok(response) => response,
            Err(error) => {
                self.reporter.report_terminal(
                    FailureEvent::network(None, format!("{} failed: {}", action, error))
                        .with_origin(url),
                );
                return Err(error.into());
            }
        };

        if !response.is_success() {
            self.reporter.report_terminal(
                FailureEvent::network(Some(response.status), format!("HTTP {}", response.status))
                    .with_origin(url),
            );
            return Err(GatewayError::AuthenticationFailed(format!(
                "{} rejected with HTTP {}",
                action, response.status
            )));
        }
        Ok(response)
    }
}

fn reject(calls: VecDeque<PendingCall>, reason: &str) {
    for call in calls {
        let _ = call
            .reply
            .send(Err(GatewayError::AuthenticationFailed(reason.to_string())));
    }
}

async fn settle(
    rx: oneshot::Receiver<Result<HttpResponse, GatewayError>>,
) -> Result<HttpResponse, GatewayError> {
    rx.await.unwrap_or_else(|_| {
        Err(GatewayError::AuthenticationFailed(
            "refresh abandoned".to_string(),
        ))
    })
}
