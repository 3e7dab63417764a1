use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;
use url::Url;
use vctt_client::models::{Role, Session};
use vctt_client::phase_stream::run_phase_stream;
use vctt_client::progress::{PhaseEvent, PhaseStatus, ProgressTracker, ProgressView};
use vctt_client::session::{SelectOutcome, TurnStatus};
use vctt_client::{ClientConfig, SessionStore, VcttBackend};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("failed to read stdin: {0}")]
    Stdin(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplInput<'a> {
    Empty,
    Quit,
    New,
    Sessions,
    Switch(&'a str),
    State,
    Help,
    Message(&'a str),
}

impl<'a> ReplInput<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Message(line);
        };

        let (name, rest) = command
            .split_once(char::is_whitespace)
            .map(|(name, rest)| (name, rest.trim()))
            .unwrap_or((command, ""));
        match (name, rest) {
            ("quit" | "exit", _) => Self::Quit,
            ("new", _) => Self::New,
            ("sessions", _) => Self::Sessions,
            ("switch", id) if !id.is_empty() => Self::Switch(id),
            ("state", _) => Self::State,
            ("help", _) => Self::Help,
            _ => Self::Message(line),
        }
    }
}

pub async fn run_chat(
    config: &ClientConfig,
    backend: Arc<dyn VcttBackend>,
    resume_session: Option<String>,
    follow_phases: bool,
) -> Result<(), ChatError> {
    let mut store = SessionStore::new(backend, config.user_id.clone())
        .with_list_limit(config.session_list_limit);

    if let Some(session_id) = resume_session {
        switch_session(&mut store, &session_id).await;
    }

    let phase_base = match (follow_phases, &config.ws_url) {
        (true, Some(ws_url)) => Some(ws_url.clone()),
        (true, None) => {
            warn!("no websocket url configured; showing local turn progress instead");
            None
        }
        (false, _) => None,
    };

    println!("Type a message, or /help for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match ReplInput::parse(&line) {
            ReplInput::Empty => {}
            ReplInput::Quit => break,
            ReplInput::Help => print_help(),
            ReplInput::New => {
                let created = store.create_session().await;
                println!("started session {} ({:?})", created.id, created.origin);
            }
            ReplInput::Sessions => {
                if let Err(err) = store.refresh_sessions().await {
                    warn!("session list refresh failed: {err}");
                }
                print_sessions(&store);
            }
            ReplInput::Switch(session_id) => switch_session(&mut store, session_id).await,
            ReplInput::State => print_state(&store),
            ReplInput::Message(content) => run_turn(&mut store, content, phase_base.as_ref()).await,
        }
    }

    Ok(())
}

async fn switch_session<B: VcttBackend>(store: &mut SessionStore<B>, session_id: &str) {
    let reference = store
        .sessions()
        .iter()
        .find(|session| session.id == session_id)
        .cloned()
        .unwrap_or_else(|| Session::new(session_id));

    match store.select_session(reference).await {
        SelectOutcome::AlreadyHydrated | SelectOutcome::Hydrated => {}
        SelectOutcome::Unhydrated { error } => {
            println!("(history unavailable: {error})");
        }
    }
    print_transcript(store);
}

async fn run_turn<B: VcttBackend>(
    store: &mut SessionStore<B>,
    content: &str,
    phase_base: Option<&Url>,
) {
    let tracker = ProgressTracker::spawn();
    let printer = spawn_progress_printer(tracker.subscribe());

    let stream = match (phase_base, store.current_session()) {
        (Some(base), Some(session)) if session.is_hydrated() => {
            Some(spawn_phase_stream(base.clone(), session.id.clone(), &tracker))
        }
        _ => None,
    };
    if stream.is_none() {
        tracker
            .observe(PhaseEvent {
                phase: "turn".to_string(),
                description: "waiting for the backend".to_string(),
                progress: 5.0,
                status: PhaseStatus::InProgress,
            })
            .await;
    }

    let outcome = store.send_message(content).await;
    if let Some(stream) = stream {
        stream.abort();
    }
    printer.abort();
    drop(tracker);

    match outcome {
        Ok(turn) => {
            println!("assistant> {}", turn.assistant_message.content);
            if turn.status == TurnStatus::Degraded {
                println!(
                    "(degraded: {})",
                    turn.error.as_deref().unwrap_or("backend unavailable")
                );
            }
        }
        Err(err) => println!("({err})"),
    }
}

fn spawn_phase_stream(base: Url, session_id: String, tracker: &ProgressTracker) -> JoinHandle<()> {
    let sink = tracker.sender();
    tokio::spawn(async move {
        if let Err(err) = run_phase_stream(&base, &session_id, sink).await {
            warn!(session_id = %session_id, "phase stream unavailable: {err}");
        }
    })
}

fn spawn_progress_printer(mut views: watch::Receiver<ProgressView>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while views.changed().await.is_ok() {
            let view = views.borrow_and_update().clone();
            eprintln!(
                "  [{}] {:>5.1}% {} {}",
                view.phase.as_deref().unwrap_or("-"),
                view.progress,
                view.status.as_str(),
                view.description
            );
        }
    })
}

pub fn print_sessions<B: VcttBackend>(store: &SessionStore<B>) {
    if store.sessions().is_empty() {
        println!("no sessions");
        return;
    }

    let current = store.current_session().map(|session| session.id.as_str());
    for session in store.sessions() {
        let marker = if Some(session.id.as_str()) == current {
            "*"
        } else {
            " "
        };
        let (count, trust) = match &session.stats {
            Some(stats) => (stats.message_count as usize, stats.trust_score),
            None => (session.messages.len(), None),
        };
        let trust = trust
            .map(|value| format!("{value:.2}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{marker} {}  {:<40}  messages={count} trust={trust}",
            session.id, session.title
        );
    }
}

fn print_transcript<B: VcttBackend>(store: &SessionStore<B>) {
    let Some(session) = store.current_session() else {
        return;
    };
    println!("== {} ({})", session.title, session.id);
    for message in &session.messages {
        let speaker = match message.role {
            Role::User => "you",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        println!("{speaker}> {}", message.content);
    }
}

fn print_state<B: VcttBackend>(store: &SessionStore<B>) {
    let state = store.vctt_state();
    println!(
        "voice={:.2} choice={:.2} transparency={:.2} trust={:.2} regulation={}",
        state.voice, state.choice, state.transparency, state.trust, state.regulation
    );
    if let Some(response) = store.last_response() {
        println!(
            "repairs={} agent_logs={}",
            response.internal_state.repair_count,
            response.agent_logs.len()
        );
    }
}

fn print_help() {
    println!(
        "/new            start a new session\n\
         /sessions       refresh and list sessions\n\
         /switch <id>    switch to a session, loading its history\n\
         /state          show the latest VCTT metrics\n\
         /quit           leave"
    );
}

#[cfg(test)]
mod tests {
    use super::ReplInput;

    #[test]
    fn slash_commands_are_recognized() {
        assert_eq!(ReplInput::parse("  "), ReplInput::Empty);
        assert_eq!(ReplInput::parse("/quit"), ReplInput::Quit);
        assert_eq!(ReplInput::parse("/switch  abc-123 "), ReplInput::Switch("abc-123"));
        assert_eq!(ReplInput::parse("/state"), ReplInput::State);
    }

    #[test]
    fn plain_text_and_unknown_commands_are_messages() {
        assert_eq!(ReplInput::parse(" hello "), ReplInput::Message("hello"));
        assert_eq!(ReplInput::parse("/switch"), ReplInput::Message("/switch"));
        assert_eq!(ReplInput::parse("/shrug"), ReplInput::Message("/shrug"));
    }
}
