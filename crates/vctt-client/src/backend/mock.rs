use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::json;
use tokio::time::sleep;
use uuid::Uuid;

use super::{BackendError, BackendFuture, BackendOperation, VcttBackend};
use crate::models::{
    ActivityEntry, AuditLogEntry, CommitteeStats, ExecutionStatus, Goal, HistoryMessage,
    InternalState, QueueCounts, RegulationMode, Role, SessionHistory, SessionSummary, SimScores,
    StartSessionResponse, StepResponse, Subtask,
};

pub const CANNED_RESPONSES: [&str; 5] = [
    "I understand your question. Let me think through this carefully and give you a grounded answer.",
    "That's an interesting point. Here is how I would approach it, step by step.",
    "Let me make sure I have this right before answering, so the reply stays transparent.",
    "Good question. I'll lay out the options and the trade-offs so you can choose.",
    "I've considered a few angles here. This is the one I'm most confident about.",
];

const MAX_REPAIR_COUNT: u32 = 2;
const ACTIVITY_RETENTION: usize = 200;

#[derive(Debug, Clone)]
struct MockSession {
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    messages: Vec<HistoryMessage>,
    last_trust: Option<f64>,
    repair_count: u32,
}

#[derive(Debug, Default)]
struct MockState {
    sessions: HashMap<String, MockSession>,
    activity: VecDeque<ActivityEntry>,
    audit: VecDeque<AuditLogEntry>,
    committee: CommitteeStats,
}

impl MockState {
    fn record(&mut self, kind: &str, message: String) {
        let now = Utc::now();
        self.activity.push_front(ActivityEntry {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            message: message.clone(),
            timestamp: now,
        });
        self.audit.push_front(AuditLogEntry {
            id: Uuid::new_v4().to_string(),
            action: kind.to_string(),
            actor: Some("mock-backend".to_string()),
            timestamp: now,
            details: Some(json!({ "message": message })),
        });
        self.activity.truncate(ACTIVITY_RETENTION);
        self.audit.truncate(ACTIVITY_RETENTION);
    }
}

pub struct MockBackend {
    start_latency: Duration,
    step_latency: Duration,
    query_latency: Duration,
    state: Mutex<MockState>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::with_latency(Duration::from_millis(300), Duration::from_millis(1_500))
    }

    pub fn with_latency(start_latency: Duration, step_latency: Duration) -> Self {
        Self {
            start_latency,
            step_latency,
            query_latency: start_latency,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn instant() -> Self {
        Self::with_latency(Duration::ZERO, Duration::ZERO)
    }

    fn lock_state(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn delay(latency: Duration) {
        if !latency.is_zero() {
            sleep(latency).await;
        }
    }

    fn fabricate_step() -> (String, InternalState) {
        let mut rng = rand::thread_rng();
        let response = CANNED_RESPONSES[rng.gen_range(0..CANNED_RESPONSES.len())].to_string();
        let trust_tau = rng.gen_range(0.70..=0.98);
        let regulation = if trust_tau < 0.75 {
            RegulationMode::Clarify
        } else {
            RegulationMode::Normal
        };
        let internal_state = InternalState {
            sim: SimScores {
                voice: rng.gen_range(0.70..=0.95),
                choice: rng.gen_range(0.60..=0.90),
                transparency: rng.gen_range(0.80..=0.98),
            },
            trust_tau,
            regulation,
            repair_count: rng.gen_range(0..=MAX_REPAIR_COUNT),
        };
        (response, internal_state)
    }

    fn fabricated_goals() -> Vec<Goal> {
        vec![
            Goal {
                id: "goal-onboarding".to_string(),
                title: "Summarize onboarding feedback".to_string(),
                status: "active".to_string(),
                priority: Some(1),
                created_at: None,
            },
            Goal {
                id: "goal-trust-report".to_string(),
                title: "Draft weekly trust report".to_string(),
                status: "pending".to_string(),
                priority: Some(2),
                created_at: None,
            },
            Goal {
                id: "goal-cleanup".to_string(),
                title: "Archive stale sessions".to_string(),
                status: "completed".to_string(),
                priority: Some(3),
                created_at: None,
            },
        ]
    }
}

impl VcttBackend for MockBackend {
    fn start_session<'a>(
        &'a self,
        user_id: &'a str,
        _input: &'a str,
    ) -> BackendFuture<'a, StartSessionResponse> {
        Box::pin(async move {
            Self::delay(self.start_latency).await;

            let session_id = Uuid::new_v4().to_string();
            let now = Utc::now();
            let mut state = self.lock_state();
            state.sessions.insert(
                session_id.clone(),
                MockSession {
                    created_at: now,
                    last_activity: now,
                    messages: Vec::new(),
                    last_trust: None,
                    repair_count: 0,
                },
            );
            state.record(
                "session_started",
                format!("{user_id} started session {session_id}"),
            );

            Ok(StartSessionResponse { session_id })
        })
    }

    fn step<'a>(&'a self, session_id: &'a str, input: &'a str) -> BackendFuture<'a, StepResponse> {
        Box::pin(async move {
            Self::delay(self.step_latency).await;

            let (response, internal_state) = Self::fabricate_step();
            let now = Utc::now();
            let mut state = self.lock_state();
            let session = state
                .sessions
                .entry(session_id.to_string())
                .or_insert_with(|| MockSession {
                    created_at: now,
                    last_activity: now,
                    messages: Vec::new(),
                    last_trust: None,
                    repair_count: 0,
                });
            session.last_activity = now;
            session.last_trust = Some(internal_state.trust_tau);
            session.repair_count = session
                .repair_count
                .saturating_add(internal_state.repair_count);
            session.messages.push(HistoryMessage {
                role: Role::User,
                content: input.to_string(),
                timestamp: Some(now),
                id: None,
            });
            session.messages.push(HistoryMessage {
                role: Role::Assistant,
                content: response.clone(),
                timestamp: Some(now),
                id: None,
            });

            state.committee.total_reviews = state.committee.total_reviews.saturating_add(1);
            if internal_state.regulation == RegulationMode::Normal {
                state.committee.approved = state.committee.approved.saturating_add(1);
            } else {
                state.committee.rejected = state.committee.rejected.saturating_add(1);
            }
            let reviews = f64::from(state.committee.total_reviews);
            let previous = state.committee.average_trust.unwrap_or(0.0);
            state.committee.average_trust =
                Some(previous + (internal_state.trust_tau - previous) / reviews);
            state.record(
                "turn_completed",
                format!(
                    "session {session_id} regulation={} trust={:.2}",
                    internal_state.regulation, internal_state.trust_tau
                ),
            );

            Ok(StepResponse {
                response,
                agent_logs: vec![json!({
                    "agent": "mock",
                    "repair_count": internal_state.repair_count,
                })],
                internal_state,
            })
        })
    }

    fn list_sessions<'a>(
        &'a self,
        _user_id: Option<&'a str>,
        limit: u32,
    ) -> BackendFuture<'a, Vec<SessionSummary>> {
        Box::pin(async move {
            Self::delay(self.query_latency).await;

            let state = self.lock_state();
            let mut summaries = state
                .sessions
                .iter()
                .map(|(session_id, session)| SessionSummary {
                    session_id: session_id.clone(),
                    message_count: u32::try_from(session.messages.len()).unwrap_or(u32::MAX),
                    created_at: Some(session.created_at),
                    last_activity: Some(session.last_activity),
                    trust_score: session.last_trust,
                    repair_count: session.repair_count,
                })
                .collect::<Vec<_>>();
            summaries.sort_by(|left, right| right.last_activity.cmp(&left.last_activity));
            summaries.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            Ok(summaries)
        })
    }

    fn session_history<'a>(&'a self, session_id: &'a str) -> BackendFuture<'a, SessionHistory> {
        Box::pin(async move {
            Self::delay(self.query_latency).await;

            let state = self.lock_state();
            let session = state
                .sessions
                .get(session_id)
                .ok_or(BackendError::Status {
                    operation: BackendOperation::SessionHistory,
                    status: 404,
                })?;
            Ok(SessionHistory {
                session_id: session_id.to_string(),
                messages: session.messages.clone(),
                created_at: Some(session.created_at),
            })
        })
    }

    fn execution_status(&self) -> BackendFuture<'_, ExecutionStatus> {
        Box::pin(async move {
            Self::delay(self.query_latency).await;

            let goals = Self::fabricated_goals();
            let count = |status: &str| {
                u32::try_from(goals.iter().filter(|goal| goal.status == status).count())
                    .unwrap_or(u32::MAX)
            };
            Ok(ExecutionStatus {
                queue: QueueCounts {
                    pending: count("pending"),
                    running: count("active"),
                    completed: count("completed"),
                    failed: count("failed"),
                },
                max_parallel: 3,
            })
        })
    }

    fn goal_subtasks<'a>(&'a self, goal_id: &'a str) -> BackendFuture<'a, Vec<Subtask>> {
        Box::pin(async move {
            Self::delay(self.query_latency).await;

            let Some(goal) = Self::fabricated_goals()
                .into_iter()
                .find(|goal| goal.id == goal_id)
            else {
                return Err(BackendError::Status {
                    operation: BackendOperation::GoalSubtasks,
                    status: 404,
                });
            };

            let done = goal.status == "completed";
            Ok(["gather context", "plan", "execute"]
                .iter()
                .enumerate()
                .map(|(index, title)| Subtask {
                    id: format!("{}-{}", goal.id, index + 1),
                    title: (*title).to_string(),
                    status: if done || index == 0 {
                        "completed".to_string()
                    } else {
                        "pending".to_string()
                    },
                    progress: Some(if done || index == 0 { 100.0 } else { 0.0 }),
                })
                .collect())
        })
    }

    fn list_goals(&self) -> BackendFuture<'_, Vec<Goal>> {
        Box::pin(async move {
            Self::delay(self.query_latency).await;
            Ok(Self::fabricated_goals())
        })
    }

    fn activity_feed(&self, limit: u32) -> BackendFuture<'_, Vec<ActivityEntry>> {
        Box::pin(async move {
            Self::delay(self.query_latency).await;

            let state = self.lock_state();
            Ok(state
                .activity
                .iter()
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .cloned()
                .collect())
        })
    }

    fn committee_stats(&self) -> BackendFuture<'_, CommitteeStats> {
        Box::pin(async move {
            Self::delay(self.query_latency).await;
            Ok(self.lock_state().committee.clone())
        })
    }

    fn audit_logs(&self, limit: u32) -> BackendFuture<'_, Vec<AuditLogEntry>> {
        Box::pin(async move {
            Self::delay(self.query_latency).await;

            let state = self.lock_state();
            Ok(state
                .audit
                .iter()
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .cloned()
                .collect())
        })
    }
}
