use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub message_count: u32,
    pub last_activity: Option<DateTime<Utc>>,
    pub trust_score: Option<f64>,
    pub repair_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub stats: Option<SessionStats>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let created_at = Utc::now();
        Self {
            id: id.into(),
            title: format!("Chat {}", created_at.format("%Y-%m-%d %H:%M")),
            created_at,
            messages: Vec::new(),
            stats: None,
        }
    }

    pub fn is_hydrated(&self) -> bool {
        !self.messages.is_empty()
    }
}

impl From<SessionSummary> for Session {
    fn from(summary: SessionSummary) -> Self {
        let created_at = summary.created_at.unwrap_or_else(Utc::now);
        Self {
            title: format!("Session {}", short_id(&summary.session_id)),
            id: summary.session_id,
            created_at,
            messages: Vec::new(),
            stats: Some(SessionStats {
                message_count: summary.message_count,
                last_activity: summary.last_activity,
                trust_score: summary.trust_score,
                repair_count: summary.repair_count,
            }),
        }
    }
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((index, _)) => &id[..index],
        None => id,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegulationMode {
    #[default]
    Normal,
    Clarify,
    SlowDown,
}

impl RegulationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Clarify => "clarify",
            Self::SlowDown => "slow_down",
        }
    }
}

impl fmt::Display for RegulationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegulationMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "clarify" => Ok(Self::Clarify),
            "slow_down" | "slow-down" => Ok(Self::SlowDown),
            _ => Err(format!(
                "regulation must be one of normal, clarify, slow_down; got '{raw}'"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VcttState {
    pub voice: f64,
    pub choice: f64,
    pub transparency: f64,
    pub trust: f64,
    pub regulation: RegulationMode,
}

impl Default for VcttState {
    fn default() -> Self {
        Self {
            voice: 0.85,
            choice: 0.72,
            transparency: 0.91,
            trust: 0.88,
            regulation: RegulationMode::Normal,
        }
    }
}

impl From<&InternalState> for VcttState {
    fn from(state: &InternalState) -> Self {
        Self {
            voice: clamp_unit(state.sim.voice),
            choice: clamp_unit(state.sim.choice),
            transparency: clamp_unit(state.sim.transparency),
            trust: clamp_unit(state.trust_tau),
            regulation: state.regulation,
        }
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub user_id: String,
    pub input: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRequest {
    pub session_id: String,
    pub input: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimScores {
    #[serde(default)]
    pub voice: f64,
    #[serde(default)]
    pub choice: f64,
    #[serde(default)]
    pub transparency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalState {
    #[serde(default)]
    pub sim: SimScores,
    pub trust_tau: f64,
    #[serde(default)]
    pub regulation: RegulationMode,
    #[serde(default)]
    pub repair_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResponse {
    pub response: String,
    pub internal_state: InternalState,
    #[serde(default)]
    pub agent_logs: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    #[serde(default)]
    pub message_count: u32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trust_score: Option<f64>,
    #[serde(default)]
    pub repair_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub id: Option<String>,
}

impl From<HistoryMessage> for Message {
    fn from(message: HistoryMessage) -> Self {
        Self {
            id: message.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            role: message.role,
            content: message.content,
            timestamp: message.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHistory {
    pub session_id: String,
    pub messages: Vec<HistoryMessage>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueCounts {
    #[serde(default)]
    pub pending: u32,
    #[serde(default)]
    pub running: u32,
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub failed: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    #[serde(default)]
    pub queue: QueueCounts,
    #[serde(default)]
    pub max_parallel: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    pub status: String,
    #[serde(default)]
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtasksResponse {
    pub subtasks: Vec<Subtask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub title: String,
    pub status: String,
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalsResponse {
    pub goals: Vec<Goal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: String,
    pub kind: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityResponse {
    pub activities: Vec<ActivityEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitteeStats {
    #[serde(default)]
    pub total_reviews: u32,
    #[serde(default)]
    pub approved: u32,
    #[serde(default)]
    pub rejected: u32,
    #[serde(default)]
    pub average_trust: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub actor: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogsResponse {
    pub logs: Vec<AuditLogEntry>,
}
