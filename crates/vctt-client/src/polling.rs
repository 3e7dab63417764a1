use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use crate::backend::VcttBackend;
use crate::models::{ActivityEntry, AuditLogEntry, CommitteeStats, ExecutionStatus, Goal, Subtask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollCadence {
    SessionActivity,
    ExecutionStatus,
    Subtasks,
    AuditLogs,
    Goals,
    CommitteeStats,
}

impl PollCadence {
    pub fn interval(self) -> Duration {
        match self {
            Self::SessionActivity => Duration::from_secs(3),
            Self::ExecutionStatus | Self::Subtasks | Self::AuditLogs => Duration::from_secs(5),
            Self::Goals | Self::CommitteeStats => Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollSnapshot<T> {
    pub value: Option<T>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub ticks: u64,
}

impl<T> Default for PollSnapshot<T> {
    fn default() -> Self {
        Self {
            value: None,
            last_success: None,
            last_error: None,
            consecutive_failures: 0,
            ticks: 0,
        }
    }
}

// Held while publishing, so no update lands after `stop` returns.
#[derive(Debug, Clone, Default)]
struct StopSignal(Arc<Mutex<bool>>);

impl StopSignal {
    fn lock_state(&self) -> MutexGuard<'_, bool> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn stop(&self) {
        *self.lock_state() = true;
    }

    fn publish<T>(
        &self,
        sender: &watch::Sender<PollSnapshot<T>>,
        update: impl FnOnce(&mut PollSnapshot<T>),
    ) -> bool {
        let stopped = self.lock_state();
        if *stopped {
            return false;
        }
        sender.send_modify(update);
        true
    }
}

pub struct Poller<T> {
    name: &'static str,
    snapshots: watch::Receiver<PollSnapshot<T>>,
    stop: StopSignal,
    task: JoinHandle<()>,
}

impl<T> Poller<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn spawn<F, Fut, E>(name: &'static str, interval: Duration, mut fetch: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let (sender, snapshots) = watch::channel(PollSnapshot::default());
        let stop = StopSignal::default();
        let task_stop = stop.clone();
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let published = match fetch().await {
                    Ok(value) => task_stop.publish(&sender, |snapshot| {
                        snapshot.value = Some(value);
                        snapshot.last_success = Some(Utc::now());
                        snapshot.last_error = None;
                        snapshot.consecutive_failures = 0;
                        snapshot.ticks += 1;
                    }),
                    Err(err) => {
                        let message = err.to_string();
                        warn!(poller = name, "poll failed, keeping last value: {message}");
                        task_stop.publish(&sender, |snapshot| {
                            snapshot.last_error = Some(message);
                            snapshot.consecutive_failures =
                                snapshot.consecutive_failures.saturating_add(1);
                            snapshot.ticks += 1;
                        })
                    }
                };
                if !published {
                    break;
                }
            }
        });

        debug!(poller = name, interval_ms = interval.as_millis() as u64, "poller started");
        Self {
            name,
            snapshots,
            stop,
            task,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot<T>> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> PollSnapshot<T> {
        self.snapshots.borrow().clone()
    }

    pub fn latest(&self) -> Option<T> {
        self.snapshots.borrow().value.clone()
    }
}

impl<T> Drop for Poller<T> {
    fn drop(&mut self) {
        self.stop.stop();
        self.task.abort();
        debug!(poller = self.name, "poller stopped");
    }
}

pub struct Dashboard<B: ?Sized> {
    backend: Arc<B>,
    pub execution: Poller<ExecutionStatus>,
    pub goals: Poller<Vec<Goal>>,
    pub activity: Poller<Vec<ActivityEntry>>,
    pub committee: Poller<CommitteeStats>,
    pub audit: Poller<Vec<AuditLogEntry>>,
    subtasks: Option<(String, Poller<Vec<Subtask>>)>,
}

impl<B> Dashboard<B>
where
    B: VcttBackend + ?Sized + 'static,
{
    pub fn mount(backend: Arc<B>, feed_limit: u32) -> Self {
        let execution = {
            let backend = backend.clone();
            Poller::spawn(
                "execution_status",
                PollCadence::ExecutionStatus.interval(),
                move || {
                    let backend = backend.clone();
                    async move { backend.execution_status().await }
                },
            )
        };
        let goals = {
            let backend = backend.clone();
            Poller::spawn("goals", PollCadence::Goals.interval(), move || {
                let backend = backend.clone();
                async move { backend.list_goals().await }
            })
        };
        let activity = {
            let backend = backend.clone();
            Poller::spawn(
                "activity_feed",
                PollCadence::SessionActivity.interval(),
                move || {
                    let backend = backend.clone();
                    async move { backend.activity_feed(feed_limit).await }
                },
            )
        };
        let committee = {
            let backend = backend.clone();
            Poller::spawn(
                "committee_stats",
                PollCadence::CommitteeStats.interval(),
                move || {
                    let backend = backend.clone();
                    async move { backend.committee_stats().await }
                },
            )
        };
        let audit = {
            let backend = backend.clone();
            Poller::spawn("audit_logs", PollCadence::AuditLogs.interval(), move || {
                let backend = backend.clone();
                async move { backend.audit_logs(feed_limit).await }
            })
        };

        Self {
            backend,
            execution,
            goals,
            activity,
            committee,
            audit,
            subtasks: None,
        }
    }

    pub fn watch_goal(&mut self, goal_id: impl Into<String>) {
        let goal_id = goal_id.into();
        if self
            .subtasks
            .as_ref()
            .is_some_and(|(watched, _)| *watched == goal_id)
        {
            return;
        }

        let backend = self.backend.clone();
        let fetch_goal_id = goal_id.clone();
        let poller = Poller::spawn("goal_subtasks", PollCadence::Subtasks.interval(), move || {
            let backend = backend.clone();
            let goal_id = fetch_goal_id.clone();
            async move { backend.goal_subtasks(&goal_id).await }
        });
        self.subtasks = Some((goal_id, poller));
    }

    pub fn clear_goal(&mut self) {
        self.subtasks = None;
    }

    pub fn watched_goal(&self) -> Option<&str> {
        self.subtasks.as_ref().map(|(goal_id, _)| goal_id.as_str())
    }

    pub fn subtasks(&self) -> Option<&Poller<Vec<Subtask>>> {
        self.subtasks.as_ref().map(|(_, poller)| poller)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex, MutexGuard};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::time::sleep;

    use tokio::sync::watch;

    use super::{Dashboard, PollCadence, PollSnapshot, Poller, StopSignal};
    use crate::backend::{BackendError, BackendOperation, MockBackend};

    fn counting_poller(calls: Arc<AtomicUsize>, succeed_first: usize) -> Poller<usize> {
        Poller::spawn("test", PollCadence::SessionActivity.interval(), move || {
            let calls = calls.clone();
            async move {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                if call < succeed_first {
                    Ok(call)
                } else {
                    Err(BackendError::Status {
                        operation: BackendOperation::ActivityFeed,
                        status: 500,
                    })
                }
            }
        })
    }

    #[test]
    fn cadences_match_view_refresh_rates() {
        assert_eq!(PollCadence::SessionActivity.interval(), Duration::from_secs(3));
        assert_eq!(PollCadence::ExecutionStatus.interval(), Duration::from_secs(5));
        assert_eq!(PollCadence::Subtasks.interval(), Duration::from_secs(5));
        assert_eq!(PollCadence::AuditLogs.interval(), Duration::from_secs(5));
        assert_eq!(PollCadence::Goals.interval(), Duration::from_secs(10));
        assert_eq!(PollCadence::CommitteeStats.interval(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_immediately_then_on_fixed_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let poller = counting_poller(calls.clone(), usize::MAX);

        sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(poller.latest(), Some(0));

        sleep(Duration::from_millis(9_000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let snapshot = poller.snapshot();
        assert_eq!(snapshot.value, Some(3));
        assert_eq!(snapshot.ticks, 4);
        assert!(snapshot.last_success.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_ticks_keep_last_value_without_backoff() {
        let calls = Arc::new(AtomicUsize::new(0));
        let poller = counting_poller(calls.clone(), 1);

        sleep(Duration::from_millis(9_050)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let snapshot = poller.snapshot();
        assert_eq!(snapshot.value, Some(0));
        assert_eq!(snapshot.consecutive_failures, 3);
        assert!(
            snapshot
                .last_error
                .as_deref()
                .is_some_and(|err| err.contains("status=500"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_poller_never_fetches_again() {
        let calls = Arc::new(AtomicUsize::new(0));
        let poller = counting_poller(calls.clone(), usize::MAX);
        let mut updates = poller.subscribe();

        sleep(Duration::from_millis(3_050)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        drop(poller);
        tokio::task::yield_now().await;
        sleep(Duration::from_secs(30)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        updates.borrow_and_update();
        assert!(updates.changed().await.is_err());
    }

    #[test]
    fn stopped_signal_refuses_late_updates() {
        let (sender, mut updates) = watch::channel(PollSnapshot::<u32>::default());
        let stop = StopSignal::default();

        assert!(stop.publish(&sender, |snapshot| snapshot.value = Some(1)));
        assert_eq!(updates.borrow_and_update().value, Some(1));

        stop.stop();

        assert!(!stop.publish(&sender, |snapshot| snapshot.value = Some(2)));
        assert!(!updates.has_changed().expect("sender is alive"));
        assert_eq!(updates.borrow().value, Some(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drop_ends_updates_on_multi_thread_runtime() {
        let calls = Arc::new(AtomicUsize::new(0));
        let poller = Poller::spawn("busy", Duration::from_millis(1), {
            let calls = calls.clone();
            move || {
                let calls = calls.clone();
                async move { Ok::<_, BackendError>(calls.fetch_add(1, Ordering::SeqCst)) }
            }
        });
        let mut updates = poller.subscribe();
        updates
            .wait_for(|snapshot| snapshot.ticks >= 3)
            .await
            .expect("poller should publish");

        drop(poller);
        let seen = updates.borrow_and_update().ticks;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(updates.borrow().ticks, seen);
    }

    #[tokio::test(start_paused = true)]
    async fn dashboard_polls_backend_and_swaps_goal_watch() {
        let backend = Arc::new(MockBackend::instant());
        let mut dashboard = Dashboard::mount(backend, 10);

        sleep(Duration::from_millis(50)).await;
        assert_eq!(
            dashboard
                .execution
                .latest()
                .map(|status| status.max_parallel),
            Some(3)
        );
        assert_eq!(dashboard.goals.latest().map(|goals| goals.len()), Some(3));
        assert!(dashboard.committee.latest().is_some());
        assert!(dashboard.subtasks().is_none());

        dashboard.watch_goal("goal-onboarding");
        sleep(Duration::from_millis(50)).await;
        assert_eq!(dashboard.watched_goal(), Some("goal-onboarding"));
        assert_eq!(
            dashboard
                .subtasks()
                .and_then(|poller| poller.latest())
                .map(|subtasks| subtasks.len()),
            Some(3)
        );

        dashboard.watch_goal("goal-missing");
        sleep(Duration::from_millis(50)).await;
        let snapshot = dashboard.subtasks().expect("subtask poller").snapshot();
        assert!(snapshot.value.is_none());
        assert_eq!(snapshot.consecutive_failures, 1);

        dashboard.clear_goal();
        assert!(dashboard.watched_goal().is_none());
    }
}
