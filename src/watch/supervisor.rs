use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::session::{SessionSnapshot, WatchOutcome, WatchParams, WatchSession, WatchState};
use super::task::WatchTask;
use crate::archive::{ArchiveError, DownloadArchive};
use crate::config::WatchConfig;
use crate::source::DocumentSource;
use crate::storage::IdentStore;
use crate::types::CustomerIdent;

/// Answer to a watch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted { session_id: Uuid },
    /// A watch for this customer is still polling; no second task was started.
    AlreadyRunning { session_id: Uuid },
}

impl SubmitOutcome {
    pub fn session_id(&self) -> Uuid {
        match self {
            SubmitOutcome::Accepted { session_id } | SubmitOutcome::AlreadyRunning { session_id } => {
                *session_id
            }
        }
    }
}

type Sessions = Arc<Mutex<HashMap<CustomerIdent, WatchSession>>>;

/// Owns the live watch sessions and allows at most one polling task per customer.
pub struct WatchSupervisor {
    source: Arc<dyn DocumentSource>,
    store: Arc<dyn IdentStore>,
    archive: Arc<DownloadArchive>,
    config: WatchConfig,
    sessions: Sessions,
}

impl WatchSupervisor {
    /// Reconcile the archive, then return a supervisor ready to accept watches.
    ///
    /// A failed reconcile is returned as is; the caller should not serve requests.
    pub async fn start(
        source: Arc<dyn DocumentSource>,
        store: Arc<dyn IdentStore>,
        archive: Arc<DownloadArchive>,
        config: WatchConfig,
    ) -> Result<Self, ArchiveError> {
        let report = archive.reconcile().await?;
        tracing::info!(
            kept = report.kept,
            removed = report.removed,
            "Watch supervisor ready"
        );

        Ok(Self {
            source,
            store,
            archive,
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn archive(&self) -> &Arc<DownloadArchive> {
        &self.archive
    }

    pub fn store(&self) -> &Arc<dyn IdentStore> {
        &self.store
    }

    /// Start watching `customer_ident` unless a watch for it is already polling.
    ///
    /// Returns without waiting on the document API.
    pub fn submit(
        &self,
        customer_ident: &str,
        wait: Option<Duration>,
        poll: Option<Duration>,
    ) -> SubmitOutcome {
        let mut sessions = lock(&self.sessions);
        sweep(&mut sessions, self.config.session_retention);

        if let Some(existing) = sessions.get(customer_ident) {
            if existing.state() == WatchState::Polling {
                tracing::info!(
                    customer_ident,
                    session_id = %existing.session_id,
                    "Watch already running"
                );
                return SubmitOutcome::AlreadyRunning {
                    session_id: existing.session_id,
                };
            }
        }

        let params = self.resolve_params(wait, poll);
        let session = WatchSession::new(customer_ident, params);
        let session_id = session.session_id;
        let deadline = session.deadline;

        let task = WatchTask::new(
            customer_ident,
            params,
            self.source.clone(),
            self.store.clone(),
            self.archive.clone(),
        );
        let registry = self.sessions.clone();
        let customer = customer_ident.to_string();

        // The task cannot record its outcome before the session is inserted:
        // finishing needs the registry lock held here.
        tokio::spawn(async move {
            let outcome = match tokio::spawn(task.run_until(deadline)).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(customer_ident = %customer, error = %e, "Watch task aborted");
                    WatchOutcome::Failed {
                        error: format!("watch task aborted: {}", e),
                        attempts: 0,
                    }
                }
            };
            finish(&registry, &customer, session_id, outcome);
        });

        sessions.insert(customer_ident.to_string(), session);
        tracing::info!(
            customer_ident,
            %session_id,
            wait_ms = params.wait.as_millis() as u64,
            poll_ms = params.poll.as_millis() as u64,
            "Watch accepted"
        );

        SubmitOutcome::Accepted { session_id }
    }

    /// Observe the customer's session. A terminal session is removed once returned.
    pub fn poll(&self, customer_ident: &str) -> Option<SessionSnapshot> {
        let mut sessions = lock(&self.sessions);
        sweep(&mut sessions, self.config.session_retention);

        let snapshot = sessions.get(customer_ident)?.snapshot();
        if snapshot.state.is_terminal() {
            sessions.remove(customer_ident);
        }
        Some(snapshot)
    }

    /// Number of sessions still polling.
    pub fn active_count(&self) -> usize {
        lock(&self.sessions)
            .values()
            .filter(|s| s.state() == WatchState::Polling)
            .count()
    }

    /// Apply configured defaults and limits to requested timings.
    pub fn resolve_params(&self, wait: Option<Duration>, poll: Option<Duration>) -> WatchParams {
        let wait = wait.unwrap_or(self.config.default_wait);
        if wait > self.config.max_wait {
            tracing::debug!(
                requested_ms = wait.as_millis() as u64,
                max_ms = self.config.max_wait.as_millis() as u64,
                "Requested wait capped"
            );
        }

        WatchParams {
            wait: wait.min(self.config.max_wait),
            poll: poll
                .unwrap_or(self.config.default_poll)
                .max(self.config.min_poll),
        }
    }
}

fn finish(sessions: &Sessions, customer_ident: &str, session_id: Uuid, outcome: WatchOutcome) {
    let mut sessions = lock(sessions);
    match sessions.get_mut(customer_ident) {
        Some(session) if session.session_id == session_id => session.finish(outcome),
        // Swept or replaced before the task ended
        _ => tracing::debug!(customer_ident, %session_id, "Watch finished after its session was dropped"),
    }
}

fn sweep(sessions: &mut HashMap<CustomerIdent, WatchSession>, retention: Duration) {
    let now = Instant::now();
    sessions.retain(|customer_ident, session| {
        let expired = session
            .finished_at
            .map(|finished| now.duration_since(finished) >= retention)
            .unwrap_or(false);
        if expired {
            tracing::debug!(customer_ident = %customer_ident, session_id = %session.session_id, "Dropped unclaimed watch result");
        }
        !expired
    });
}

fn lock(sessions: &Sessions) -> MutexGuard<'_, HashMap<CustomerIdent, WatchSession>> {
    sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
