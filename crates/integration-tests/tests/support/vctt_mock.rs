#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Default)]
pub struct ServerState {
    pub sessions: HashMap<String, Vec<(String, String)>>,
    pub start_inputs: Vec<String>,
    pub step_calls: usize,
    pub fail_steps: bool,
    pub fail_history: bool,
}

#[derive(Clone, Default)]
pub struct SharedState(Arc<Mutex<ServerState>>);

impl SharedState {
    pub fn lock(&self) -> MutexGuard<'_, ServerState> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub struct MockVcttServer {
    pub base_url: String,
    pub state: SharedState,
    handle: tokio::task::JoinHandle<()>,
}

#[derive(Deserialize)]
struct StartBody {
    user_id: String,
    input: String,
}

#[derive(Deserialize)]
struct StepBody {
    session_id: String,
    input: String,
}

impl MockVcttServer {
    pub async fn start() -> Self {
        let state = SharedState::default();
        let app = Router::new()
            .route("/api/v1/session/start", post(start_session))
            .route("/api/v1/session/step", post(step))
            .route("/api/v1/analytics/sessions", get(list_sessions))
            .route(
                "/api/v1/analytics/sessions/{session_id}/history",
                get(session_history),
            )
            .route("/api/autonomous/status", get(execution_status))
            .route("/api/goals", get(list_goals))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("mock backend listener should bind");
        let bind_addr = listener
            .local_addr()
            .expect("mock backend listener local address should exist");

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("mock backend server should run");
        });

        Self {
            base_url: format!("http://{bind_addr}"),
            state,
            handle,
        }
    }

    pub fn env(&self) -> HashMap<String, String> {
        HashMap::from([("VCTT_BACKEND_URL".to_string(), self.base_url.clone())])
    }
}

impl Drop for MockVcttServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn start_session(
    State(state): State<SharedState>,
    Json(body): Json<StartBody>,
) -> Json<Value> {
    let mut state = state.lock();
    let session_id = format!("{}-{}", body.user_id, state.start_inputs.len() + 1);
    state.start_inputs.push(body.input);
    state.sessions.insert(session_id.clone(), Vec::new());
    Json(json!({ "session_id": session_id }))
}

async fn step(
    State(state): State<SharedState>,
    Json(body): Json<StepBody>,
) -> Result<Json<Value>, StatusCode> {
    let mut state = state.lock();
    state.step_calls += 1;
    if state.fail_steps {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    let reply = format!("reply to {}", body.input);
    state
        .sessions
        .entry(body.session_id)
        .or_default()
        .push((body.input, reply.clone()));
    Ok(Json(json!({
        "response": reply,
        "internal_state": {
            "sim": { "voice": 0.8, "choice": 0.7, "transparency": 0.9 },
            "trust_tau": 0.72,
            "regulation": "slow_down",
            "repair_count": 2
        },
        "agent_logs": [{ "agent": "analyst" }, { "agent": "skeptic" }]
    })))
}

async fn list_sessions(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let state = state.lock();
    let limit = query
        .get("limit")
        .and_then(|limit| limit.parse::<usize>().ok())
        .unwrap_or(50);
    let mut ids = state.sessions.keys().cloned().collect::<Vec<_>>();
    ids.sort();
    let sessions = ids
        .iter()
        .take(limit)
        .map(|id| {
            json!({
                "session_id": id,
                "message_count": state.sessions[id].len() * 2,
                "last_activity": Utc::now(),
                "trust_score": 0.72,
                "repair_count": 2
            })
        })
        .collect::<Vec<_>>();
    Json(json!({ "sessions": sessions }))
}

async fn session_history(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let state = state.lock();
    if state.fail_history {
        return Err(StatusCode::BAD_GATEWAY);
    }
    let turns = state.sessions.get(&session_id).ok_or(StatusCode::NOT_FOUND)?;
    let messages = turns
        .iter()
        .flat_map(|(input, reply)| {
            [
                json!({ "role": "user", "content": input }),
                json!({ "role": "assistant", "content": reply }),
            ]
        })
        .collect::<Vec<_>>();
    Ok(Json(json!({
        "session_id": session_id,
        "messages": messages,
        "created_at": Utc::now()
    })))
}

async fn execution_status() -> Json<Value> {
    Json(json!({
        "queue": { "pending": 2, "running": 1, "completed": 7, "failed": 0 },
        "max_parallel": 4
    }))
}

async fn list_goals() -> Json<Value> {
    Json(json!({
        "goals": [
            { "id": "g-1", "title": "Index support tickets", "status": "active", "priority": 1 }
        ]
    }))
}
