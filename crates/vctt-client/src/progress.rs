use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

pub const DEBOUNCE: Duration = Duration::from_millis(100);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
pub const SILENCE_BEFORE_CREEP: Duration = Duration::from_secs(8);
pub const CREEP_STEP: f64 = 0.5;
pub const IN_PROGRESS_CEILING: f64 = 98.0;

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
    Error,
}

impl PhaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseEvent {
    pub phase: String,
    #[serde(default)]
    pub description: String,
    pub progress: f64,
    pub status: PhaseStatus,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressView {
    pub phase: Option<String>,
    pub description: String,
    pub status: PhaseStatus,
    pub progress: f64,
}

#[derive(Debug, Clone, Copy)]
struct PendingTarget {
    value: f64,
    due: Instant,
}

#[derive(Debug, Default)]
pub struct ProgressSimulator {
    view: ProgressView,
    pending: Option<PendingTarget>,
    last_update: Option<Instant>,
}

impl ProgressSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> &ProgressView {
        &self.view
    }

    pub fn displayed(&self) -> f64 {
        self.view.progress
    }

    pub fn pending_due(&self) -> Option<Instant> {
        self.pending.map(|pending| pending.due)
    }

    pub fn observe(&mut self, event: PhaseEvent, now: Instant) {
        self.view.phase = Some(event.phase);
        self.view.description = event.description;
        self.view.status = event.status;
        self.last_update = Some(now);

        if event.progress.is_finite() {
            self.pending = Some(PendingTarget {
                value: event.progress.clamp(0.0, 100.0),
                due: now + DEBOUNCE,
            });
        }
    }

    pub fn flush(&mut self, now: Instant) -> bool {
        let Some(pending) = self.pending else {
            return false;
        };
        if now < pending.due {
            return false;
        }
        self.pending = None;

        let mut target = pending.value;
        if self.view.status == PhaseStatus::InProgress {
            target = target.min(IN_PROGRESS_CEILING - CREEP_STEP);
        }
        if target > self.view.progress {
            self.view.progress = target;
            return true;
        }
        false
    }

    pub fn heartbeat(&mut self, now: Instant) -> bool {
        if self.view.status != PhaseStatus::InProgress {
            return false;
        }
        let Some(last_update) = self.last_update else {
            return false;
        };
        if now.saturating_duration_since(last_update) <= SILENCE_BEFORE_CREEP {
            return false;
        }

        let next = self.view.progress + CREEP_STEP;
        if next >= IN_PROGRESS_CEILING {
            return false;
        }
        self.view.progress = next;
        true
    }
}

pub struct ProgressTracker {
    events: mpsc::Sender<PhaseEvent>,
    view: watch::Receiver<ProgressView>,
    task: JoinHandle<()>,
}

impl ProgressTracker {
    pub fn spawn() -> Self {
        let (events, mut inbox) = mpsc::channel::<PhaseEvent>(EVENT_BUFFER);
        let (publisher, view) = watch::channel(ProgressView::default());

        let task = tokio::spawn(async move {
            let mut simulator = ProgressSimulator::new();
            let mut heartbeat =
                time::interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let flush_at = simulator.pending_due();
                let flush_deadline = flush_at.unwrap_or_else(Instant::now);
                tokio::select! {
                    event = inbox.recv() => {
                        let Some(event) = event else {
                            break;
                        };
                        debug!(
                            phase = %event.phase,
                            status = event.status.as_str(),
                            progress = event.progress,
                            "phase event"
                        );
                        simulator.observe(event, Instant::now());
                        publisher.send_replace(simulator.view().clone());
                    }
                    _ = time::sleep_until(flush_deadline), if flush_at.is_some() => {
                        if simulator.flush(Instant::now()) {
                            publisher.send_replace(simulator.view().clone());
                        }
                    }
                    _ = heartbeat.tick() => {
                        if simulator.heartbeat(Instant::now()) {
                            publisher.send_replace(simulator.view().clone());
                        }
                    }
                }
            }
        });

        Self { events, view, task }
    }

    pub fn sender(&self) -> mpsc::Sender<PhaseEvent> {
        self.events.clone()
    }

    pub async fn observe(&self, event: PhaseEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressView> {
        self.view.clone()
    }

    pub fn view(&self) -> ProgressView {
        self.view.borrow().clone()
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::{Instant, sleep};

    use super::{
        CREEP_STEP, DEBOUNCE, IN_PROGRESS_CEILING, PhaseEvent, PhaseStatus, ProgressSimulator,
        ProgressTracker,
    };

    fn event(progress: f64, status: PhaseStatus) -> PhaseEvent {
        PhaseEvent {
            phase: "analysis".to_string(),
            description: "weighing options".to_string(),
            progress,
            status,
        }
    }

    fn settled(progress: f64, status: PhaseStatus, at: Instant) -> ProgressSimulator {
        let mut simulator = ProgressSimulator::new();
        simulator.observe(event(progress, status), at);
        simulator.flush(at + DEBOUNCE);
        simulator
    }

    #[test]
    fn server_value_waits_for_debounce() {
        let start = Instant::now();
        let mut simulator = ProgressSimulator::new();

        simulator.observe(event(40.0, PhaseStatus::InProgress), start);
        assert_eq!(simulator.view().status, PhaseStatus::InProgress);
        assert!(!simulator.flush(start + Duration::from_millis(50)));
        assert_eq!(simulator.displayed(), 0.0);

        assert!(simulator.flush(start + DEBOUNCE));
        assert_eq!(simulator.displayed(), 40.0);
        assert!(simulator.pending_due().is_none());
    }

    #[test]
    fn burst_of_events_applies_latest_value() {
        let start = Instant::now();
        let mut simulator = ProgressSimulator::new();

        simulator.observe(event(10.0, PhaseStatus::InProgress), start);
        simulator.observe(
            event(25.0, PhaseStatus::InProgress),
            start + Duration::from_millis(60),
        );

        assert!(!simulator.flush(start + DEBOUNCE));
        assert!(simulator.flush(start + Duration::from_millis(160)));
        assert_eq!(simulator.displayed(), 25.0);
    }

    #[test]
    fn creeps_only_after_silence() {
        let start = Instant::now();
        let mut simulator = settled(40.0, PhaseStatus::InProgress, start);

        assert!(!simulator.heartbeat(start + Duration::from_secs(8)));
        assert_eq!(simulator.displayed(), 40.0);

        assert!(simulator.heartbeat(start + Duration::from_secs(9)));
        assert!(simulator.heartbeat(start + Duration::from_secs(10)));
        assert_eq!(simulator.displayed(), 40.0 + 2.0 * CREEP_STEP);

        simulator.observe(
            event(41.0, PhaseStatus::InProgress),
            start + Duration::from_secs(11),
        );
        assert!(!simulator.heartbeat(start + Duration::from_secs(12)));
    }

    #[test]
    fn creep_never_reaches_ceiling_while_in_progress() {
        let start = Instant::now();
        let mut simulator = settled(95.0, PhaseStatus::InProgress, start);

        for second in 9..60 {
            simulator.heartbeat(start + Duration::from_secs(second));
            assert!(simulator.displayed() < IN_PROGRESS_CEILING);
        }
        assert_eq!(simulator.displayed(), 97.5);
    }

    #[test]
    fn in_progress_server_values_are_held_below_ceiling() {
        let start = Instant::now();
        let simulator = settled(99.0, PhaseStatus::InProgress, start);

        assert!(simulator.displayed() < IN_PROGRESS_CEILING);
    }

    #[test]
    fn displayed_value_never_decreases() {
        let start = Instant::now();
        let mut simulator = settled(60.0, PhaseStatus::InProgress, start);

        simulator.observe(event(30.0, PhaseStatus::InProgress), start + DEBOUNCE);
        assert!(!simulator.flush(start + 2 * DEBOUNCE));
        assert_eq!(simulator.displayed(), 60.0);

        simulator.observe(event(f64::NAN, PhaseStatus::InProgress), start + 3 * DEBOUNCE);
        assert!(simulator.pending_due().is_none());
        assert_eq!(simulator.displayed(), 60.0);
    }

    #[test]
    fn terminal_status_stops_creep_without_forcing_completion() {
        let start = Instant::now();
        let mut simulator = settled(70.0, PhaseStatus::Complete, start);

        assert!(!simulator.heartbeat(start + Duration::from_secs(30)));
        assert_eq!(simulator.displayed(), 70.0);
        assert_eq!(simulator.view().status, PhaseStatus::Complete);

        let mut failed = settled(20.0, PhaseStatus::Error, start);
        assert!(!failed.heartbeat(start + Duration::from_secs(30)));
        assert_eq!(failed.displayed(), 20.0);
    }

    #[test]
    fn phase_events_use_snake_case_status() {
        let parsed: PhaseEvent = serde_json::from_str(
            r#"{"phase":"synthesis","progress":12.5,"status":"in_progress"}"#,
        )
        .expect("event should parse");

        assert_eq!(parsed.status, PhaseStatus::InProgress);
        assert!(parsed.description.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn tracker_debounces_and_creeps_on_its_own_timers() {
        let tracker = ProgressTracker::spawn();
        assert!(tracker.observe(event(40.0, PhaseStatus::InProgress)).await);

        sleep(Duration::from_millis(50)).await;
        let early = tracker.view();
        assert_eq!(early.status, PhaseStatus::InProgress);
        assert_eq!(early.progress, 0.0);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(tracker.view().progress, 40.0);

        sleep(Duration::from_secs(12)).await;
        let crept = tracker.view().progress;
        assert!(crept > 40.0);
        assert!(crept < IN_PROGRESS_CEILING);

        let sender = tracker.sender();
        drop(tracker);
        tokio::task::yield_now().await;
        sleep(Duration::from_millis(10)).await;
        assert!(sender.is_closed());
    }
}
