use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::archive::ArchivedFile;
use crate::types::{CustomerIdent, DocumentIdent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    Polling,
    Succeeded,
    TimedOut,
    Failed,
}

impl WatchState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WatchState::Polling)
    }
}

/// Terminal result of a watch task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WatchOutcome {
    Succeeded { file: ArchivedFile, attempts: u32 },
    /// No new document before the deadline; `last_known` is the stored ident at that point.
    TimedOut {
        last_known: Option<DocumentIdent>,
        attempts: u32,
    },
    Failed { error: String, attempts: u32 },
}

impl WatchOutcome {
    pub fn state(&self) -> WatchState {
        match self {
            WatchOutcome::Succeeded { .. } => WatchState::Succeeded,
            WatchOutcome::TimedOut { .. } => WatchState::TimedOut,
            WatchOutcome::Failed { .. } => WatchState::Failed,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            WatchOutcome::Succeeded { attempts, .. }
            | WatchOutcome::TimedOut { attempts, .. }
            | WatchOutcome::Failed { attempts, .. } => *attempts,
        }
    }
}

/// Effective timing of one watch, after defaults and limits were applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchParams {
    pub wait: Duration,
    pub poll: Duration,
}

/// In-memory record of one accepted watch request.
#[derive(Debug, Clone)]
pub struct WatchSession {
    pub session_id: Uuid,
    pub customer_ident: CustomerIdent,
    pub params: WatchParams,
    pub started_at: DateTime<Utc>,
    pub deadline: Instant,
    pub outcome: Option<WatchOutcome>,
    pub finished_at: Option<Instant>,
}

impl WatchSession {
    pub fn new(customer_ident: &str, params: WatchParams) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            customer_ident: customer_ident.to_string(),
            params,
            started_at: Utc::now(),
            deadline: Instant::now() + params.wait,
            outcome: None,
            finished_at: None,
        }
    }

    pub fn state(&self) -> WatchState {
        self.outcome
            .as_ref()
            .map(WatchOutcome::state)
            .unwrap_or(WatchState::Polling)
    }

    /// Record the terminal outcome. A session that already finished keeps its first outcome.
    pub fn finish(&mut self, outcome: WatchOutcome) {
        if self.outcome.is_none() {
            self.outcome = Some(outcome);
            self.finished_at = Some(Instant::now());
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            customer_ident: self.customer_ident.clone(),
            state: self.state(),
            started_at: self.started_at,
            wait_seconds: self.params.wait.as_secs_f64(),
            poll_seconds: self.params.poll.as_secs_f64(),
            outcome: self.outcome.clone(),
        }
    }
}

/// What observers see of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub customer_ident: CustomerIdent,
    pub state: WatchState,
    pub started_at: DateTime<Utc>,
    pub wait_seconds: f64,
    pub poll_seconds: f64,
    pub outcome: Option<WatchOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> WatchParams {
        WatchParams {
            wait: Duration::from_secs(10),
            poll: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_new_session_is_polling() {
        let session = WatchSession::new("abc", params());
        assert_eq!(session.state(), WatchState::Polling);
        assert!(!session.state().is_terminal());
        assert!(session.finished_at.is_none());
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let mut session = WatchSession::new("abc", params());
        session.finish(WatchOutcome::TimedOut {
            last_known: Some("v1".into()),
            attempts: 5,
        });
        session.finish(WatchOutcome::Failed {
            error: "late".into(),
            attempts: 6,
        });

        assert_eq!(session.state(), WatchState::TimedOut);
        assert_eq!(session.outcome.as_ref().unwrap().attempts(), 5);
    }

    #[test]
    fn test_snapshot_serialization() {
        let mut session = WatchSession::new("abc", params());
        session.finish(WatchOutcome::Failed {
            error: "unknown customer".into(),
            attempts: 1,
        });

        let json = serde_json::to_value(session.snapshot()).unwrap();
        assert_eq!(json["customerIdent"], "abc");
        assert_eq!(json["state"], "failed");
        assert_eq!(json["waitSeconds"], 10.0);
        assert_eq!(json["outcome"]["state"], "failed");
        assert_eq!(json["outcome"]["error"], "unknown customer");
    }
}
