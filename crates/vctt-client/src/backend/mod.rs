mod http;
mod mock;


use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::ClientConfig;
use crate::models::{
    ActivityEntry, AuditLogEntry, CommitteeStats, ExecutionStatus, Goal, SessionHistory,
    SessionSummary, StartSessionResponse, StepResponse, Subtask,
};

pub use http::HttpBackend;
pub use mock::{CANNED_RESPONSES, MockBackend};

pub const PATH_SESSION_START: &str = "/api/v1/session/start";
pub const PATH_SESSION_STEP: &str = "/api/v1/session/step";
pub const PATH_ANALYTICS_SESSIONS: &str = "/api/v1/analytics/sessions";
pub const PATH_AUTONOMOUS_STATUS: &str = "/api/autonomous/status";
pub const PATH_AUTONOMOUS_ACTIVITY: &str = "/api/autonomous/activity";
pub const PATH_GOALS: &str = "/api/goals";
pub const PATH_COMMITTEE_STATS: &str = "/api/v1/committee/stats";
pub const PATH_AUDIT_LOGS: &str = "/api/v1/audit/logs";

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOperation {
    StartSession,
    Step,
    ListSessions,
    SessionHistory,
    ExecutionStatus,
    GoalSubtasks,
    ListGoals,
    ActivityFeed,
    CommitteeStats,
    AuditLogs,
}

impl fmt::Display for BackendOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartSession => write!(f, "start_session"),
            Self::Step => write!(f, "step"),
            Self::ListSessions => write!(f, "list_sessions"),
            Self::SessionHistory => write!(f, "session_history"),
            Self::ExecutionStatus => write!(f, "execution_status"),
            Self::GoalSubtasks => write!(f, "goal_subtasks"),
            Self::ListGoals => write!(f, "list_goals"),
            Self::ActivityFeed => write!(f, "activity_feed"),
            Self::CommitteeStats => write!(f, "committee_stats"),
            Self::AuditLogs => write!(f, "audit_logs"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable for {operation}: {message}")]
    Transport {
        operation: BackendOperation,
        message: String,
    },
    #[error("backend request failed for {operation}: status={status}")]
    Status {
        operation: BackendOperation,
        status: u16,
    },
    #[error("backend response invalid for {operation}: {message}")]
    InvalidResponse {
        operation: BackendOperation,
        message: String,
    },
    #[error("backend request invalid for {operation}: {message}")]
    InvalidRequest {
        operation: BackendOperation,
        message: String,
    },
}

impl BackendError {
    pub fn operation(&self) -> BackendOperation {
        match self {
            Self::Transport { operation, .. }
            | Self::Status { operation, .. }
            | Self::InvalidResponse { operation, .. }
            | Self::InvalidRequest { operation, .. } => *operation,
        }
    }
}

pub trait VcttBackend: Send + Sync {
    fn start_session<'a>(
        &'a self,
        user_id: &'a str,
        input: &'a str,
    ) -> BackendFuture<'a, StartSessionResponse>;

    fn step<'a>(&'a self, session_id: &'a str, input: &'a str) -> BackendFuture<'a, StepResponse>;

    fn list_sessions<'a>(
        &'a self,
        user_id: Option<&'a str>,
        limit: u32,
    ) -> BackendFuture<'a, Vec<SessionSummary>>;

    fn session_history<'a>(&'a self, session_id: &'a str) -> BackendFuture<'a, SessionHistory>;

    fn execution_status(&self) -> BackendFuture<'_, ExecutionStatus>;

    fn goal_subtasks<'a>(&'a self, goal_id: &'a str) -> BackendFuture<'a, Vec<Subtask>>;

    fn list_goals(&self) -> BackendFuture<'_, Vec<Goal>>;

    fn activity_feed(&self, limit: u32) -> BackendFuture<'_, Vec<ActivityEntry>>;

    fn committee_stats(&self) -> BackendFuture<'_, CommitteeStats>;

    fn audit_logs(&self, limit: u32) -> BackendFuture<'_, Vec<AuditLogEntry>>;
}

impl<B> VcttBackend for Arc<B>
where
    B: VcttBackend + ?Sized,
{
    fn start_session<'a>(
        &'a self,
        user_id: &'a str,
        input: &'a str,
    ) -> BackendFuture<'a, StartSessionResponse> {
        (**self).start_session(user_id, input)
    }

    fn step<'a>(&'a self, session_id: &'a str, input: &'a str) -> BackendFuture<'a, StepResponse> {
        (**self).step(session_id, input)
    }

    fn list_sessions<'a>(
        &'a self,
        user_id: Option<&'a str>,
        limit: u32,
    ) -> BackendFuture<'a, Vec<SessionSummary>> {
        (**self).list_sessions(user_id, limit)
    }

    fn session_history<'a>(&'a self, session_id: &'a str) -> BackendFuture<'a, SessionHistory> {
        (**self).session_history(session_id)
    }

    fn execution_status(&self) -> BackendFuture<'_, ExecutionStatus> {
        (**self).execution_status()
    }

    fn goal_subtasks<'a>(&'a self, goal_id: &'a str) -> BackendFuture<'a, Vec<Subtask>> {
        (**self).goal_subtasks(goal_id)
    }

    fn list_goals(&self) -> BackendFuture<'_, Vec<Goal>> {
        (**self).list_goals()
    }

    fn activity_feed(&self, limit: u32) -> BackendFuture<'_, Vec<ActivityEntry>> {
        (**self).activity_feed(limit)
    }

    fn committee_stats(&self) -> BackendFuture<'_, CommitteeStats> {
        (**self).committee_stats()
    }

    fn audit_logs(&self, limit: u32) -> BackendFuture<'_, Vec<AuditLogEntry>> {
        (**self).audit_logs(limit)
    }
}

#[derive(Debug, Error)]
#[error("failed to build backend http client: {0}")]
pub struct BackendBuildError(String);

pub fn connect_backend(config: &ClientConfig) -> Result<Arc<dyn VcttBackend>, BackendBuildError> {
    match &config.backend_url {
        Some(base_url) => {
            let mut builder = reqwest::Client::builder();
            if let Some(timeout) = config.request_timeout() {
                builder = builder.timeout(timeout);
            }
            let http_client = builder
                .build()
                .map_err(|err| BackendBuildError(err.to_string()))?;
            info!(base_url = %base_url, "using http backend");
            Ok(Arc::new(HttpBackend::new(base_url.to_string(), http_client)))
        }
        None => {
            info!("no backend url configured; using local mock backend");
            Ok(Arc::new(MockBackend::with_latency(
                config.mock_start_latency(),
                config.mock_step_latency(),
            )))
        }
    }
}
