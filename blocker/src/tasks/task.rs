use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam::channel::{unbounded, Receiver, Sender};

/// Cancels the run it was created for. Dropping the canceller cancels too,
/// so a run never outlives whoever started it.
pub struct TaskCanceller {
    cancel: Arc<AtomicBool>,
}

impl Drop for TaskCanceller {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed)
    }
}

impl TaskCanceller {
    pub fn new() -> (Self, TaskCancelCheck) {
        let cancelled = Arc::new(AtomicBool::new(false));
        (
            Self {
                cancel: Arc::clone(&cancelled),
            },
            TaskCancelCheck { cancelled },
        )
    }

    /// Cancel the run. Only the first call matters.
    pub fn cancel(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

/// The run's side of a [TaskCanceller]. Runs look at it between items, never
/// in the middle of one.
#[derive(Clone)]
pub struct TaskCancelCheck {
    cancelled: Arc<AtomicBool>,
}

impl TaskCancelCheck {
    /// A check that is never cancelled
    pub fn never() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once the run was cancelled
    pub fn check(&self) -> crate::Result<()> {
        if self.was_cancelled() {
            Err(crate::Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

pub trait EventMonitor<T>: Send + Sync {
    fn on_event(&self, evt: T);
}

impl<U> EventMonitor<U> for Box<dyn EventMonitor<U>> {
    fn on_event(&self, evt: U) {
        self.as_ref().on_event(evt)
    }
}

impl<U> EventMonitor<U> for Arc<dyn EventMonitor<U>> {
    fn on_event(&self, evt: U) {
        self.as_ref().on_event(evt)
    }
}

/// An [EventMonitor] that drops everything
pub struct NoopMonitor;

impl<T> EventMonitor<T> for NoopMonitor {
    fn on_event(&self, _evt: T) {}
}

/// An [EventMonitor] that forwards events onto a channel
pub struct ChannelEventMonitor<T>
where
    T: Send,
{
    chan: Sender<T>,
}

impl<T> ChannelEventMonitor<T>
where
    T: Send,
{
    pub fn create() -> (Self, Receiver<T>) {
        let (tx, rx) = unbounded();
        (Self::new(tx), rx)
    }

    pub fn new(chan: Sender<T>) -> Self {
        Self { chan }
    }
}

impl<T> EventMonitor<T> for ChannelEventMonitor<T>
where
    T: Send,
{
    fn on_event(&self, evt: T) {
        let _ = self.chan.send(evt);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_drop_cancels() {
        let (canceller, check) = TaskCanceller::new();
        assert!(check.check().is_ok());
        drop(canceller);
        assert!(matches!(check.check(), Err(crate::Error::Cancelled)));
    }

    #[test]
    fn test_channel_monitor() {
        let (mon, rx) = ChannelEventMonitor::create();
        mon.on_event(1u32);
        mon.on_event(2u32);
        drop(mon);
        assert_eq!(rx.iter().collect::<Vec<_>>(), vec![1, 2]);
    }
}
