//! Coalesces concurrent 401 responses into a single credential refresh.
//!
//! The gate is either idle or refreshing. The first call rejected with 401
//! starts a refresh cycle on its own task and joins the queue; every call
//! rejected while the cycle runs joins the same queue. When the refresh
//! settles, the queue is drained exactly once: each entry is replayed with
//! the new access credential, or failed as unauthenticated if the refresh
//! failed.

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::dispatcher::{Dispatcher, RequestDescriptor};
use super::notify::Notifier;
use super::{ApiError, RefreshError};
use crate::auth::{CredentialRefresher, SessionState, TokenPair};

type Resolution = Result<Value, ApiError>;

/// A call waiting for the current refresh cycle to settle.
pub struct PendingRequest {
    pub descriptor: RequestDescriptor,
    resolver: oneshot::Sender<Resolution>,
}

#[derive(Default)]
struct GateState {
    refreshing: bool,
    pending: Vec<PendingRequest>,
}

/// What to do with a call that was just rejected with 401.
enum Admission {
    /// A cycle is already running; wait for it
    Queued(oneshot::Receiver<Resolution>),
    /// This call starts a new cycle with the given refresh credential
    Leader(oneshot::Receiver<Resolution>, String),
    /// The credential was rotated after this call was sent; resend it
    Rotated(RequestDescriptor),
    /// Nothing to refresh with. `ended` is set when an earlier cycle already
    /// ended the session this call was sent with.
    Terminal { request: RequestDescriptor, ended: bool },
}

pub struct RefreshGate {
    dispatcher: Dispatcher,
    refresher: CredentialRefresher,
    session: Arc<SessionState>,
    notifier: Arc<dyn Notifier>,
    state: Mutex<GateState>,
}

impl RefreshGate {
    pub fn new(
        dispatcher: Dispatcher,
        refresher: CredentialRefresher,
        session: Arc<SessionState>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            dispatcher,
            refresher,
            session,
            notifier,
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock_state().refreshing
    }

    /// Number of calls waiting on the running cycle
    pub fn pending_len(&self) -> usize {
        self.lock_state().pending.len()
    }

    /// Recover a call that was rejected with 401.
    ///
    /// `attempted` is the access credential the call was sent with.
    pub async fn recover(
        self: &Arc<Self>,
        request: RequestDescriptor,
        attempted: Option<String>,
    ) -> Resolution {
        match self.admit(request, attempted) {
            Admission::Queued(rx) => Self::wait(rx).await,
            Admission::Leader(rx, credential) => {
                let gate = Arc::clone(self);
                tokio::spawn(async move {
                    let _ = gate.run_cycle(credential).await;
                });
                Self::wait(rx).await
            }
            Admission::Rotated(request) => {
                debug!(path = %request.path, "Credential already rotated, resending");
                self.replay(&request).await
            }
            Admission::Terminal { request, ended } => {
                warn!(path = %request.path, "Rejected with no refresh credential available");
                if !ended {
                    if let Err(e) = self.session.clear() {
                        warn!(error = %e, "Failed to clear session");
                    }
                    self.notifier.session_expired();
                }
                Err(ApiError::Unauthenticated(
                    "no refresh credential available".to_string(),
                ))
            }
        }
    }

    /// Refresh outside of a 401, sharing the single-cycle guarantee.
    pub async fn refresh_now(self: &Arc<Self>) -> Result<TokenPair, RefreshError> {
        let credential = {
            let mut state = self.lock_state();
            if state.refreshing {
                return Err(RefreshError::InProgress);
            }
            let credential = self
                .session
                .refresh()
                .ok_or(RefreshError::MissingCredential)?;
            state.refreshing = true;
            credential
        };

        let gate = Arc::clone(self);
        tokio::spawn(async move { gate.run_cycle(credential).await })
            .await
            .map_err(|_| RefreshError::Aborted)?
    }

    fn admit(&self, request: RequestDescriptor, attempted: Option<String>) -> Admission {
        let mut state = self.lock_state();

        if state.refreshing {
            let (resolver, rx) = oneshot::channel();
            state.pending.push(PendingRequest {
                descriptor: request,
                resolver,
            });
            debug!(queued = state.pending.len(), "Refresh in progress, request queued");
            return Admission::Queued(rx);
        }

        let current = self.session.access();
        if current.is_some() && current != attempted {
            return Admission::Rotated(request);
        }

        match self.session.refresh() {
            Some(credential) => {
                let (resolver, rx) = oneshot::channel();
                state.refreshing = true;
                state.pending.push(PendingRequest {
                    descriptor: request,
                    resolver,
                });
                Admission::Leader(rx, credential)
            }
            None => Admission::Terminal {
                request,
                ended: attempted.is_some() && current.is_none(),
            },
        }
    }

    /// One full cycle: refresh, update the session, drain the queue.
    async fn run_cycle(&self, credential: String) -> Result<TokenPair, RefreshError> {
        info!("Access credential rejected, refreshing");
        let outcome = self.refresher.refresh(&credential).await;

        // The session is updated before the gate goes idle, so a 401 that
        // lands after the drain sees the rotated (or cleared) credential.
        match &outcome {
            Ok(pair) => {
                if let Err(e) = self
                    .session
                    .set_credentials(&pair.access, pair.refresh.as_deref())
                {
                    warn!(error = %e, "Failed to persist refreshed credentials");
                }
            }
            Err(e) => {
                warn!(error = %e, "Credential refresh failed, ending session");
                if let Err(e) = self.session.clear() {
                    warn!(error = %e, "Failed to clear session");
                }
            }
        }

        let pending = {
            let mut state = self.lock_state();
            state.refreshing = false;
            mem::take(&mut state.pending)
        };

        match &outcome {
            Ok(_) => {
                info!(queued = pending.len(), "Credential refreshed, replaying queued requests");
                join_all(pending.into_iter().map(move |p| async move {
                    let result = self.replay(&p.descriptor).await;
                    let _ = p.resolver.send(result);
                }))
                .await;
            }
            Err(e) => {
                self.notifier.session_expired();
                let reason = e.to_string();
                for p in pending {
                    let _ = p.resolver.send(Err(ApiError::Unauthenticated(reason.clone())));
                }
            }
        }

        outcome
    }

    /// Resend with the current credential. A second 401 is terminal.
    async fn replay(&self, request: &RequestDescriptor) -> Resolution {
        let access = self.session.access();
        let result = self.dispatcher.dispatch(request, access.as_deref()).await;
        if let Err(ref e) = result {
            if e.is_unauthenticated() {
                warn!(path = %request.path, "Replayed request rejected again");
            }
        }
        result
    }

    async fn wait(rx: oneshot::Receiver<Resolution>) -> Resolution {
        rx.await.unwrap_or_else(|_| {
            Err(ApiError::Unauthenticated(
                "refresh cycle ended without settling the request".to_string(),
            ))
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
