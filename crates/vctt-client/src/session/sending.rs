use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use super::StoreSnapshot;

#[derive(Debug, Clone, Default)]
pub struct SendingFlag(Arc<AtomicBool>);

impl SendingFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn acquire(&self, snapshots: Arc<watch::Sender<StoreSnapshot>>) -> SendingGuard {
        self.0.store(true, Ordering::Release);
        snapshots.send_modify(|snapshot| snapshot.is_sending = true);
        SendingGuard {
            flag: self.0.clone(),
            snapshots,
        }
    }
}

// Clears the flag even when the send future is dropped mid-flight.
#[derive(Debug)]
pub struct SendingGuard {
    flag: Arc<AtomicBool>,
    snapshots: Arc<watch::Sender<StoreSnapshot>>,
}

impl Drop for SendingGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.snapshots.send_modify(|snapshot| snapshot.is_sending = false);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::watch;

    use super::SendingFlag;
    use crate::session::StoreSnapshot;

    #[test]
    fn guard_publishes_flag_until_dropped() {
        let (snapshots, receiver) = watch::channel(StoreSnapshot::default());
        let flag = SendingFlag::default();
        let observer = flag.clone();

        let guard = flag.acquire(Arc::new(snapshots));
        assert!(observer.is_set());
        assert!(receiver.borrow().is_sending);

        drop(guard);
        assert!(!observer.is_set());
        assert!(!receiver.borrow().is_sending);
    }
}
