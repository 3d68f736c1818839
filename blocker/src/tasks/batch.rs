//! Drives a controller over a list of components.

use crate::controller::{ComponentController, ControlError};
use crate::model::ComponentName;

use super::{Event, EventMonitor, TaskCancelCheck};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    /// Sent after every item, successful or not
    Progress {
        processed: usize,
        total: usize,
        component: ComponentName,
        success: bool,
    },
}

/// Hands batch progress on to a pipeline's monitor
pub struct ForwardBatchEvents<'a> {
    inner: &'a dyn EventMonitor<Event>,
}

impl<'a> ForwardBatchEvents<'a> {
    pub fn new(inner: &'a dyn EventMonitor<Event>) -> Self {
        Self { inner }
    }
}

impl EventMonitor<BatchEvent> for ForwardBatchEvents<'_> {
    fn on_event(&self, evt: BatchEvent) {
        let BatchEvent::Progress {
            processed,
            total,
            component,
            success,
        } = evt;
        self.inner.on_event(Event::ComponentProgress {
            component,
            done: processed,
            total,
            success,
        });
    }
}

#[derive(Debug)]
pub struct BatchReport {
    pub total: usize,
    /// Items attempted, failed ones included
    pub processed: usize,
    pub failures: Vec<(ComponentName, ControlError)>,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.processed - self.failures.len()
    }

    pub fn is_complete_success(&self) -> bool {
        !self.cancelled && self.failures.is_empty() && self.processed == self.total
    }
}

/// Apply `enable` to every component, in order. A failed item is recorded
/// and the run moves on. Cancellation is looked at before each item and
/// never undoes items already applied.
pub fn run(
    components: &[ComponentName],
    enable: bool,
    controller: &dyn ComponentController,
    monitor: &dyn EventMonitor<BatchEvent>,
    cancel: &TaskCancelCheck,
) -> BatchReport {
    let total = components.len();
    let mut report = BatchReport {
        total,
        processed: 0,
        failures: Vec::new(),
        cancelled: false,
    };
    log::trace!(
        "{} {} components through {}",
        if enable { "enabling" } else { "disabling" },
        total,
        controller.name()
    );

    let mut results = controller.batch_set_enabled(components, enable);
    loop {
        if cancel.was_cancelled() {
            log::debug!("batch cancelled after {}/{}", report.processed, total);
            report.cancelled = report.processed < total;
            break;
        }
        let (component, res) = match results.next() {
            Some(v) => v,
            None => break,
        };
        report.processed += 1;
        let success = res.is_ok();
        if let Err(e) = res {
            log::warn!("failed to set state of {}: {}", component, e);
            report.failures.push((component.clone(), e));
        }
        monitor.on_event(BatchEvent::Progress {
            processed: report.processed,
            total,
            component,
            success,
        });
    }
    report
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::ComponentType;
    use crate::tasks::{ChannelEventMonitor, TaskCanceller};
    use crate::testing::MockComponentController;
    use std::sync::Mutex;

    fn names(n: usize) -> Vec<ComponentName> {
        (0..n)
            .map(|i| ComponentName::new("com.a", format!(".C{i}"), ComponentType::Receiver))
            .collect()
    }

    #[test]
    fn test_failures_do_not_stop_the_batch() {
        let mut ctrl = MockComponentController::new();
        ctrl.expect_name().return_const("mock");
        ctrl.expect_set_enabled().times(5).returning(|cn, _| {
            if cn.class.ends_with('1') || cn.class.ends_with('3') {
                Err(ControlError::PermissionDenied(cn.flatten()))
            } else {
                Ok(())
            }
        });
        let (mon, rx) = ChannelEventMonitor::<BatchEvent>::create();
        let items = names(5);
        let report = run(&items, false, &ctrl, &mon, &TaskCancelCheck::never());
        drop(mon);

        assert_eq!(report.processed, 5);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.succeeded(), 3);
        assert!(!report.cancelled);

        let events: Vec<_> = rx.iter().collect();
        assert_eq!(events.len(), 5);
        match &events[4] {
            BatchEvent::Progress {
                processed, total, ..
            } => assert_eq!((*processed, *total), (5, 5)),
        }
    }

    #[test]
    fn test_cancel_between_items() {
        let (canceller, check) = TaskCanceller::new();
        let canceller = Mutex::new(Some(canceller));
        let mut ctrl = MockComponentController::new();
        ctrl.expect_name().return_const("mock");
        // The second item cancels the run once it was applied
        ctrl.expect_set_enabled().times(2).returning(move |cn, _| {
            if cn.class.ends_with('1') {
                if let Some(mut c) = canceller.lock().expect("lock").take() {
                    c.cancel();
                }
            }
            Ok(())
        });
        let items = names(4);
        let report = run(&items, true, &ctrl, &crate::tasks::NoopMonitor, &check);
        assert_eq!(report.processed, 2);
        assert!(report.cancelled);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_forwarded_progress() {
        let mut ctrl = MockComponentController::new();
        ctrl.expect_name().return_const("mock");
        ctrl.expect_set_enabled().times(2).returning(|cn, _| {
            if cn.class.ends_with('0') {
                Err(ControlError::Refused(cn.flatten()))
            } else {
                Ok(())
            }
        });
        let (mon, rx) = ChannelEventMonitor::<Event>::create();
        let items = names(2);
        run(
            &items,
            false,
            &ctrl,
            &ForwardBatchEvents::new(&mon),
            &TaskCancelCheck::never(),
        );
        drop(mon);

        let events: Vec<Event> = rx.iter().collect();
        assert_eq!(
            events,
            vec![
                Event::ComponentProgress {
                    component: items[0].clone(),
                    done: 1,
                    total: 2,
                    success: false,
                },
                Event::ComponentProgress {
                    component: items[1].clone(),
                    done: 2,
                    total: 2,
                    success: true,
                },
            ]
        );
    }
}
