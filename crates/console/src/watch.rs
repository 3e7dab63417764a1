use std::sync::Arc;

use tokio::signal;
use tokio::time::{self, Duration};
use tracing::{info, warn};
use vctt_client::polling::{Dashboard, PollSnapshot};
use vctt_client::{ClientConfig, VcttBackend};

const REPORT_INTERVAL: Duration = Duration::from_secs(5);

pub async fn run_watch(
    config: &ClientConfig,
    backend: Arc<dyn VcttBackend>,
    goal_id: Option<String>,
) {
    let mut dashboard = Dashboard::mount(backend, config.activity_limit);
    if let Some(goal_id) = goal_id {
        dashboard.watch_goal(goal_id);
    }
    info!(
        "watching backend status (report every {} seconds)",
        REPORT_INTERVAL.as_secs()
    );

    let mut ticker = time::interval_at(time::Instant::now() + REPORT_INTERVAL, REPORT_INTERVAL);

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                report(&dashboard);
            }
        }
    }
}

fn report(dashboard: &Dashboard<dyn VcttBackend>) {
    let execution = dashboard.execution.snapshot();
    match &execution.value {
        Some(status) => info!(
            pending = status.queue.pending,
            running = status.queue.running,
            completed = status.queue.completed,
            failed = status.queue.failed,
            max_parallel = status.max_parallel,
            "execution status"
        ),
        None => warn_unavailable("execution status", &execution),
    }

    let goals = dashboard.goals.snapshot();
    match &goals.value {
        Some(goals) => {
            for goal in goals {
                info!(goal_id = %goal.id, status = %goal.status, "goal: {}", goal.title);
            }
        }
        None => warn_unavailable("goals", &goals),
    }

    let committee = dashboard.committee.snapshot();
    if let Some(stats) = &committee.value {
        info!(
            reviews = stats.total_reviews,
            approved = stats.approved,
            rejected = stats.rejected,
            average_trust = stats.average_trust.unwrap_or_default(),
            "committee stats"
        );
    }

    let activity = dashboard.activity.snapshot();
    if let Some(latest) = activity.value.as_ref().and_then(|entries| entries.first()) {
        info!(kind = %latest.kind, "latest activity: {}", latest.message);
    }

    let audit = dashboard.audit.snapshot();
    if let Some(entries) = &audit.value {
        info!(entries = entries.len(), "audit log entries");
    }

    if let Some(subtasks) = dashboard.subtasks() {
        let snapshot = subtasks.snapshot();
        let goal_id = dashboard.watched_goal().unwrap_or_default();
        match &snapshot.value {
            Some(subtasks) => {
                for subtask in subtasks {
                    info!(
                        goal_id,
                        subtask_id = %subtask.id,
                        status = %subtask.status,
                        progress = subtask.progress.unwrap_or_default(),
                        "subtask: {}",
                        subtask.title
                    );
                }
            }
            None => warn_unavailable("goal subtasks", &snapshot),
        }
    }
}

fn warn_unavailable<T>(what: &str, snapshot: &PollSnapshot<T>) {
    warn!(
        failures = snapshot.consecutive_failures,
        "{what} unavailable: {}",
        snapshot.last_error.as_deref().unwrap_or("no response yet")
    );
}
