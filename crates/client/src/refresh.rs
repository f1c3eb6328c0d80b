//! Single-flight token renewal.
//!
//! However many callers hit an expired token at once, exactly one renewal
//! call goes out and every caller receives its outcome:
//!
//! ```text
//! Idle ──request_refresh──▶ Refreshing ──ok──▶ Idle   (session replaced)
//!                               │
//!                               └──fail──▶ Idle       (session cleared, waiters rejected)
//! ```
//!
//! The renewal runs on its own task, so a caller that gives up cannot strand
//! the rest of the queue. It talks to the transport directly; a 401 from the
//! renewal endpoint can never start another renewal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tether_protocol::rest::RefreshResponse;
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::session::{Session, SessionStore};
use crate::transport::{HttpRequest, HttpTransport};

/// Session-level notifications for the application shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A renewal succeeded
    Refreshed,
    /// Renewal failed and the session is gone; send the user to sign-in
    SessionTerminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Refreshing,
}

type Waiter = oneshot::Sender<Result<String>>;

struct RefreshState {
    phase: RefreshPhase,
    waiters: Vec<Waiter>,
}

struct Inner {
    store: SessionStore,
    transport: Arc<dyn HttpTransport>,
    refresh_path: String,
    state: Mutex<RefreshState>,
    events: broadcast::Sender<AuthEvent>,
    renewals: AtomicU64,
}

/// Coordinator handle (cheap to Clone). Create one per [`SessionStore`].
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: SessionStore,
        transport: Arc<dyn HttpTransport>,
        refresh_path: impl Into<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                refresh_path: refresh_path.into(),
                state: Mutex::new(RefreshState {
                    phase: RefreshPhase::Idle,
                    waiters: Vec::new(),
                }),
                events,
                renewals: AtomicU64::new(0),
            }),
        }
    }

    /// Path of the renewal endpoint (never replayed by the pipeline).
    pub fn refresh_path(&self) -> &str {
        &self.inner.refresh_path
    }

    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    /// Number of renewal calls issued so far.
    pub fn renewals_issued(&self) -> u64 {
        self.inner.renewals.load(Ordering::Relaxed)
    }

    pub async fn phase(&self) -> RefreshPhase {
        self.inner.state.lock().await.phase
    }

    /// Obtain a fresh access token, joining an in-flight renewal if one exists.
    ///
    /// `stale_token` is the token the caller was rejected with. If the store
    /// already holds a different one and nothing is in flight, that token is
    /// returned without a new renewal.
    pub async fn request_refresh(&self, stale_token: Option<&str>) -> Result<String> {
        let rx = {
            let mut state = self.inner.state.lock().await;

            if state.phase == RefreshPhase::Idle {
                let Some(session) = self.inner.store.get() else {
                    debug!(
                        component = "refresh",
                        event = "refresh.no_session",
                        "Refresh requested without a session"
                    );
                    return Err(ClientError::SessionTerminated);
                };

                if let Some(stale) = stale_token {
                    if session.access_token != stale {
                        debug!(
                            component = "refresh",
                            event = "refresh.already_current",
                            "Token was renewed since the caller's request"
                        );
                        return Ok(session.access_token);
                    }
                }

                state.phase = RefreshPhase::Refreshing;
                let issued = self.inner.renewals.fetch_add(1, Ordering::Relaxed) + 1;
                info!(
                    component = "refresh",
                    event = "refresh.started",
                    renewal = issued,
                    "Renewing access token"
                );
                tokio::spawn(run_renewal(self.inner.clone(), session.refresh_token));
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            debug!(
                component = "refresh",
                event = "refresh.waiter_enqueued",
                waiters = state.waiters.len(),
                "Caller waiting on renewal"
            );
            rx
        };

        match rx.await {
            Ok(outcome) => outcome,
            // Renewal task vanished (runtime shutdown); treat like a failed refresh.
            Err(_) => Err(ClientError::SessionTerminated),
        }
    }
}

async fn run_renewal(inner: Arc<Inner>, refresh_token: String) {
    let outcome = renew(&inner, &refresh_token).await;

    let (waiters, replaced_by) = {
        let mut state = inner.state.lock().await;
        // The store only follows this renewal while it still holds the
        // session that was renewed; a sign-in or sign-out in the meantime wins.
        let replaced_by = match inner.store.get() {
            Some(current) if current.refresh_token == refresh_token => {
                match &outcome {
                    Ok(renewed) => inner.store.set(renewed.clone()),
                    Err(_) => inner.store.clear(),
                }
                None
            }
            other => Some(other),
        };
        state.phase = RefreshPhase::Idle;
        (std::mem::take(&mut state.waiters), replaced_by)
    };

    let count = waiters.len();
    if let Some(current) = replaced_by {
        info!(
            component = "refresh",
            event = "refresh.superseded",
            waiters = count,
            renewal_ok = outcome.is_ok(),
            "Session changed during renewal, result discarded"
        );
        let result = current
            .map(|session| session.access_token)
            .ok_or(ClientError::SessionTerminated);
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        return;
    }

    let result = match outcome {
        Ok(session) => {
            info!(
                component = "refresh",
                event = "refresh.succeeded",
                waiters = count,
                expires_at = %session.expires_at,
                "Access token renewed"
            );
            let _ = inner.events.send(AuthEvent::Refreshed);
            Ok(session.access_token)
        }
        Err(e) => {
            warn!(
                component = "refresh",
                event = "refresh.failed",
                waiters = count,
                error = %e,
                "Token renewal failed, session terminated"
            );
            let _ = inner.events.send(AuthEvent::SessionTerminated);
            Err(ClientError::SessionTerminated)
        }
    };

    for waiter in waiters {
        let _ = waiter.send(result.clone());
    }
}

async fn renew(inner: &Inner, refresh_token: &str) -> Result<Session> {
    let request = HttpRequest::post(inner.refresh_path.clone()).with_bearer(refresh_token);
    let response = inner.transport.execute(request).await?;
    if !response.is_success() {
        return Err(ClientError::Endpoint {
            status: response.status,
            message: response.text(),
        });
    }
    let body: RefreshResponse = response.json()?;
    let refresh = body
        .refresh_token
        .unwrap_or_else(|| refresh_token.to_string());
    Session::from_tokens(body.access_token, refresh)
}
