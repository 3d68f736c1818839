//! Tasks described as data and a pool that runs them.

use std::fmt::Display;
use std::sync::Arc;

use crossbeam::channel::{bounded, Receiver};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::Settings;
use crate::controller::{ComponentController, ControllerDeps, ControllerKind};
use crate::ifw::FirewallRuleStore;
use crate::inspector::ComponentInspector;
use crate::root::RootCapability;
use crate::rule::EncodeMode;

use super::export::{export_rules, ExportOptions};
use super::ifw::{export_ifw_rules, import_ifw_rules, reset_ifw_rules, IfwOptions};
use super::import::{import_rules, ImportOptions};
use super::{Event, EventMonitor, FailureReason, TaskCancelCheck, TaskCanceller, WorkOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    ExportRules {
        package: Option<String>,
        mode: EncodeMode,
    },
    ImportRules {
        package: Option<String>,
    },
    ExportIfw {
        package: Option<String>,
    },
    ImportIfw {
        package: Option<String>,
    },
    ResetIfw {
        package: Option<String>,
    },
}

impl Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ExportRules { .. } => "export rules",
            Self::ImportRules { .. } => "import rules",
            Self::ExportIfw { .. } => "export firewall rules",
            Self::ImportIfw { .. } => "import firewall rules",
            Self::ResetIfw { .. } => "reset firewall rules",
        };
        f.write_str(name)
    }
}

/// Everything a task may touch
pub struct TaskEnv {
    pub inspector: Arc<ComponentInspector>,
    /// The configured controller
    pub controller: Arc<dyn ComponentController>,
    pub controller_kind: ControllerKind,
    /// Always the firewall backend, used for firewall rule imports
    pub firewall: Arc<dyn ComponentController>,
    pub store: Arc<dyn FirewallRuleStore>,
    /// Whether `store` is the device's rule directory
    pub store_on_device: bool,
    pub root: Arc<RootCapability>,
    pub settings: Settings,
}

impl TaskEnv {
    pub fn new(
        inspector: Arc<ComponentInspector>,
        deps: &ControllerDeps,
        settings: Settings,
        store_on_device: bool,
    ) -> Self {
        let kind = settings.controller_kind;
        Self {
            inspector,
            controller: Arc::from(kind.build(deps, &settings)),
            controller_kind: kind,
            firewall: Arc::from(ControllerKind::Firewall.build(deps, &settings)),
            store: Arc::clone(&deps.store),
            store_on_device,
            root: Arc::clone(&deps.root),
            settings,
        }
    }

    fn store_needs_root(&self) -> bool {
        self.store_on_device
    }
}

impl Task {
    fn needs_root(&self, env: &TaskEnv) -> bool {
        match self {
            // Firewall state is left out of the export instead
            Self::ExportRules { .. } => false,
            // A local firewall store works without root
            Self::ImportRules { .. } => env.controller_kind.needs_root() && env.store_needs_root(),
            Self::ExportIfw { .. } | Self::ImportIfw { .. } | Self::ResetIfw { .. } => {
                env.store_needs_root()
            }
        }
    }

    /// Run the task on the current thread
    pub fn execute(
        &self,
        env: &TaskEnv,
        monitor: &dyn EventMonitor<Event>,
        cancel: &TaskCancelCheck,
    ) -> WorkOutcome {
        log::trace!("starting {}", self);
        let outcome = if self.needs_root(env) && !env.root.is_granted() {
            log::error!("{} requires root", self);
            WorkOutcome::failed(FailureReason::MissingRootPermission)
        } else if cancel.was_cancelled() {
            WorkOutcome::failed(FailureReason::Cancelled)
        } else {
            self.dispatch(env, monitor, cancel)
        };
        monitor.on_event(Event::Finished {
            outcome: outcome.clone(),
        });
        outcome
    }

    fn dispatch(
        &self,
        env: &TaskEnv,
        monitor: &dyn EventMonitor<Event>,
        cancel: &TaskCancelCheck,
    ) -> WorkOutcome {
        let rules = &env.settings.rules;
        let ifw_opts = |package: &Option<String>| IfwOptions {
            location: rules.backup_location.clone(),
            package: package.clone(),
            restore_system_apps: rules.restore_system_apps,
        };
        match self {
            Self::ExportRules { package, mode } => {
                let firewall = if !env.store_needs_root() || env.root.is_granted() {
                    Some(env.store.as_ref())
                } else {
                    log::warn!("no root, firewall rules are left out of the export");
                    None
                };
                let opts = ExportOptions {
                    location: rules.backup_location.clone(),
                    package: package.clone(),
                    mode: *mode,
                    skip_system_apps: rules.skip_system_apps,
                };
                export_rules(&env.inspector, firewall, &opts, monitor, cancel)
            }
            Self::ImportRules { package } => {
                let opts = ImportOptions {
                    location: rules.backup_location.clone(),
                    package: package.clone(),
                    restore_system_apps: rules.restore_system_apps,
                };
                import_rules(&env.inspector, env.controller.as_ref(), &opts, monitor, cancel)
            }
            Self::ExportIfw { package } => {
                export_ifw_rules(env.store.as_ref(), &ifw_opts(package), monitor, cancel)
            }
            Self::ImportIfw { package } => import_ifw_rules(
                &env.inspector,
                env.firewall.as_ref(),
                &ifw_opts(package),
                monitor,
                cancel,
            ),
            Self::ResetIfw { package } => {
                reset_ifw_rules(env.store.as_ref(), package.as_deref(), monitor, cancel)
            }
        }
    }
}

/// A running task. Dropping the handle cancels the task.
pub struct TaskHandle {
    canceller: TaskCanceller,
    rx: Receiver<WorkOutcome>,
}

impl TaskHandle {
    pub fn cancel(&mut self) {
        self.canceller.cancel();
    }

    /// Block until the task is done
    pub fn wait(self) -> WorkOutcome {
        let Self { canceller, rx } = self;
        let outcome = rx.recv().unwrap_or_else(|_| {
            WorkOutcome::failed(FailureReason::UnexpectedException(
                "task worker went away".into(),
            ))
        });
        drop(canceller);
        outcome
    }
}

pub struct TaskRunner {
    env: Arc<TaskEnv>,
    pool: ThreadPool,
}

impl TaskRunner {
    pub fn new(env: Arc<TaskEnv>) -> crate::Result<Self> {
        let threads = env.settings.worker_threads.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("blocker-task-{i}"))
            .build()
            .map_err(|e| crate::Error::Generic(format!("failed to build task pool: {e}")))?;
        Ok(Self { env, pool })
    }

    pub fn spawn(&self, task: Task, monitor: Arc<dyn EventMonitor<Event>>) -> TaskHandle {
        let (canceller, check) = TaskCanceller::new();
        let (tx, rx) = bounded(1);
        let env = Arc::clone(&self.env);
        self.pool.spawn(move || {
            let outcome = task.execute(&env, &monitor, &check);
            let _ = tx.send(outcome);
        });
        TaskHandle { canceller, rx }
    }

    /// Spawn the task and wait for it
    pub fn run(&self, task: Task, monitor: Arc<dyn EventMonitor<Event>>) -> WorkOutcome {
        self.spawn(task, monitor).wait()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::companion::Companion;
    use crate::ifw::LocalRuleStore;
    use crate::tasks::{ChannelEventMonitor, NoopMonitor, ResultKind};
    use crate::testing::{fake_inspector, mock_adb, tmp_dir, MockAdb, TmpDir};
    use rstest::*;

    fn env(adb: MockAdb, dir: &TmpDir, root: bool, store_on_device: bool) -> TaskEnv {
        let adb: Arc<dyn crate::adb::Adb> = Arc::new(adb);
        let mut settings = Settings::default();
        settings.rules.backup_location = Some(dir.get_path().join("backup"));
        settings.worker_threads = 2;
        let deps = ControllerDeps {
            adb: Arc::clone(&adb),
            root: Arc::new(RootCapability::fixed(root)),
            store: Arc::new(LocalRuleStore::new(dir.get_path().join("ifw"))),
            companion: Arc::new(Companion::from_adb(adb, &settings.companion)),
        };
        TaskEnv::new(
            Arc::new(fake_inspector(&[("com.a", false), ("com.b", false)])),
            &deps,
            settings,
            store_on_device,
        )
    }

    #[rstest]
    fn test_run_export(mock_adb: MockAdb, tmp_dir: TmpDir) {
        let runner = TaskRunner::new(Arc::new(env(mock_adb, &tmp_dir, false, true)))
            .expect("runner");
        let (mon, rx) = ChannelEventMonitor::<Event>::create();
        let outcome = runner.run(
            Task::ExportRules {
                package: None,
                mode: EncodeMode::FullSnapshot,
            },
            Arc::new(mon),
        );
        assert!(outcome.is_success());
        assert_eq!(outcome.processed_count, 2);

        let events: Vec<Event> = rx.iter().collect();
        assert_eq!(events.first(), Some(&Event::Started { total: 2 }));
        assert_eq!(events.last(), Some(&Event::Finished { outcome }));
    }

    #[rstest]
    fn test_missing_root(mock_adb: MockAdb, tmp_dir: TmpDir) {
        let runner = TaskRunner::new(Arc::new(env(mock_adb, &tmp_dir, false, true)))
            .expect("runner");
        let outcome = runner.run(Task::ResetIfw { package: None }, Arc::new(NoopMonitor));
        assert_eq!(outcome.result_kind, ResultKind::Failure);
        assert_eq!(
            outcome.failure_reason,
            Some(FailureReason::MissingRootPermission)
        );
    }

    #[rstest]
    fn test_cancelled_before_start(mock_adb: MockAdb, tmp_dir: TmpDir) {
        let env = env(mock_adb, &tmp_dir, true, false);
        let (canceller, check) = TaskCanceller::new();
        drop(canceller);
        let outcome = Task::ImportIfw { package: None }.execute(&env, &NoopMonitor, &check);
        assert_eq!(outcome.failure_reason, Some(FailureReason::Cancelled));
    }
}
