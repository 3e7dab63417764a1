use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{
    BackendError, BackendFuture, BackendOperation, PATH_ANALYTICS_SESSIONS, PATH_AUDIT_LOGS,
    PATH_AUTONOMOUS_ACTIVITY, PATH_AUTONOMOUS_STATUS, PATH_COMMITTEE_STATS, PATH_GOALS,
    PATH_SESSION_START, PATH_SESSION_STEP, VcttBackend,
};
use crate::models::{
    ActivityEntry, ActivityResponse, AuditLogEntry, AuditLogsResponse, CommitteeStats,
    ExecutionStatus, Goal, GoalsResponse, ListSessionsResponse, SessionHistory, SessionSummary,
    StartSessionRequest, StartSessionResponse, StepRequest, StepResponse, Subtask,
    SubtasksResponse,
};

#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: String, http_client: reqwest::Client) -> Self {
        Self {
            base_url,
            http_client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<Req, Res>(
        &self,
        operation: BackendOperation,
        path: &str,
        payload: &Req,
    ) -> Result<Res, BackendError>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let request = self.http_client.post(self.url(path)).json(payload);
        self.send(operation, request).await
    }

    async fn get_json<Res>(
        &self,
        operation: BackendOperation,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Res, BackendError>
    where
        Res: DeserializeOwned,
    {
        let request = self.http_client.get(self.url(path)).query(query);
        self.send(operation, request).await
    }

    async fn send<Res>(
        &self,
        operation: BackendOperation,
        request: reqwest::RequestBuilder,
    ) -> Result<Res, BackendError>
    where
        Res: DeserializeOwned,
    {
        let response = request
            .send()
            .await
            .map_err(|err| BackendError::Transport {
                operation,
                message: err.to_string(),
            })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| BackendError::Transport {
                operation,
                message: format!("failed to read response body: {err}"),
            })?;

        if !status.is_success() {
            debug!(
                operation = %operation,
                status = status.as_u16(),
                body_len = bytes.len(),
                "backend returned non-success status"
            );
            return Err(BackendError::Status {
                operation,
                status: status.as_u16(),
            });
        }

        serde_json::from_slice::<Res>(&bytes).map_err(|err| BackendError::InvalidResponse {
            operation,
            message: format!("failed to parse response body: {err}"),
        })
    }
}

impl VcttBackend for HttpBackend {
    fn start_session<'a>(
        &'a self,
        user_id: &'a str,
        input: &'a str,
    ) -> BackendFuture<'a, StartSessionResponse> {
        Box::pin(async move {
            let payload = StartSessionRequest {
                user_id: user_id.to_string(),
                input: input.to_string(),
            };
            let response: StartSessionResponse = self
                .post_json(BackendOperation::StartSession, PATH_SESSION_START, &payload)
                .await?;

            if response.session_id.trim().is_empty() {
                return Err(BackendError::InvalidResponse {
                    operation: BackendOperation::StartSession,
                    message: "missing session_id in start response".to_string(),
                });
            }
            Ok(response)
        })
    }

    fn step<'a>(&'a self, session_id: &'a str, input: &'a str) -> BackendFuture<'a, StepResponse> {
        Box::pin(async move {
            let payload = StepRequest {
                session_id: session_id.to_string(),
                input: input.to_string(),
            };
            self.post_json(BackendOperation::Step, PATH_SESSION_STEP, &payload)
                .await
        })
    }

    fn list_sessions<'a>(
        &'a self,
        user_id: Option<&'a str>,
        limit: u32,
    ) -> BackendFuture<'a, Vec<SessionSummary>> {
        Box::pin(async move {
            let mut query = vec![("limit", limit.to_string())];
            if let Some(user_id) = user_id {
                query.push(("user_id", user_id.to_string()));
            }
            let response: ListSessionsResponse = self
                .get_json(BackendOperation::ListSessions, PATH_ANALYTICS_SESSIONS, &query)
                .await?;
            Ok(response.sessions)
        })
    }

    fn session_history<'a>(&'a self, session_id: &'a str) -> BackendFuture<'a, SessionHistory> {
        Box::pin(async move {
            let segment = path_segment(BackendOperation::SessionHistory, session_id)?;
            let path = format!("{PATH_ANALYTICS_SESSIONS}/{segment}/history");
            self.get_json(BackendOperation::SessionHistory, &path, &[])
                .await
        })
    }

    fn execution_status(&self) -> BackendFuture<'_, ExecutionStatus> {
        Box::pin(async move {
            self.get_json(BackendOperation::ExecutionStatus, PATH_AUTONOMOUS_STATUS, &[])
                .await
        })
    }

    fn goal_subtasks<'a>(&'a self, goal_id: &'a str) -> BackendFuture<'a, Vec<Subtask>> {
        Box::pin(async move {
            let segment = path_segment(BackendOperation::GoalSubtasks, goal_id)?;
            let path = format!("{PATH_GOALS}/{segment}/subtasks");
            let response: SubtasksResponse = self
                .get_json(BackendOperation::GoalSubtasks, &path, &[])
                .await?;
            Ok(response.subtasks)
        })
    }

    fn list_goals(&self) -> BackendFuture<'_, Vec<Goal>> {
        Box::pin(async move {
            let response: GoalsResponse = self
                .get_json(BackendOperation::ListGoals, PATH_GOALS, &[])
                .await?;
            Ok(response.goals)
        })
    }

    fn activity_feed(&self, limit: u32) -> BackendFuture<'_, Vec<ActivityEntry>> {
        Box::pin(async move {
            let response: ActivityResponse = self
                .get_json(
                    BackendOperation::ActivityFeed,
                    PATH_AUTONOMOUS_ACTIVITY,
                    &[("limit", limit.to_string())],
                )
                .await?;
            Ok(response.activities)
        })
    }

    fn committee_stats(&self) -> BackendFuture<'_, CommitteeStats> {
        Box::pin(async move {
            self.get_json(BackendOperation::CommitteeStats, PATH_COMMITTEE_STATS, &[])
                .await
        })
    }

    fn audit_logs(&self, limit: u32) -> BackendFuture<'_, Vec<AuditLogEntry>> {
        Box::pin(async move {
            let response: AuditLogsResponse = self
                .get_json(
                    BackendOperation::AuditLogs,
                    PATH_AUDIT_LOGS,
                    &[("limit", limit.to_string())],
                )
                .await?;
            Ok(response.logs)
        })
    }
}

// Ids go into request paths; anything outside the unreserved set is refused.
fn path_segment(operation: BackendOperation, id: &str) -> Result<&str, BackendError> {
    let trimmed = id.trim();
    let valid = !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '~'));
    if !valid {
        return Err(BackendError::InvalidRequest {
            operation,
            message: format!("invalid path id '{id}'"),
        });
    }
    Ok(trimmed)
}
