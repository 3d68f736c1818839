use std::path::PathBuf;
use std::sync::Arc;

use clap::{self, Args};

use blocker::rule::EncodeMode;
use blocker::tasks::runner::{Task, TaskRunner};

use crate::device::Device;
use crate::printer::{report_outcome, PrintMonitor};

/// Options every rule task takes
#[derive(Args)]
pub struct RuleTaskArgs {
    /// Only handle this package
    #[arg(short, long)]
    package: Option<String>,

    /// Backup location, overrides the configured one
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Keep firewall rules in this local directory instead of on the device
    #[arg(long)]
    local_store: Option<PathBuf>,

    /// Don't print progress
    #[arg(short, long)]
    quiet: bool,
}

impl RuleTaskArgs {
    pub fn package(&self) -> Option<String> {
        self.package.clone()
    }

    /// Run the task on the worker pool and wait for it
    pub fn run_task(&self, mut device: Device, task: Task) -> anyhow::Result<()> {
        if let Some(dir) = &self.dir {
            device.settings.rules.backup_location = Some(dir.clone());
        }
        let env = device.task_env(self.local_store.as_deref())?;
        let runner = TaskRunner::new(Arc::new(env))?;
        let what = task.to_string();
        let outcome = runner.run(task, Arc::new(PrintMonitor::new(self.quiet)));
        report_outcome(&what, &outcome)
    }
}

#[derive(Args)]
pub struct Export {
    #[command(flatten)]
    args: RuleTaskArgs,

    /// Write every component instead of only the changed ones
    #[arg(long)]
    full: bool,

    /// Also export system applications
    #[arg(long)]
    include_system: bool,
}

impl Export {
    pub fn run(&self) -> anyhow::Result<()> {
        let mut device = Device::open()?;
        if self.include_system {
            device.settings.rules.skip_system_apps = false;
        }
        let mode = if self.full {
            EncodeMode::FullSnapshot
        } else {
            EncodeMode::Changed
        };
        self.args.run_task(
            device,
            Task::ExportRules {
                package: self.args.package(),
                mode,
            },
        )
    }
}

#[derive(Args)]
pub struct Import {
    #[command(flatten)]
    args: RuleTaskArgs,

    /// Use this controller instead of the configured one
    #[arg(short, long)]
    controller: Option<blocker::ControllerKind>,

    /// Also apply rules to system applications
    #[arg(long)]
    restore_system_apps: bool,
}

impl Import {
    pub fn run(&self) -> anyhow::Result<()> {
        let mut device = Device::open()?.with_controller(self.controller);
        if self.restore_system_apps {
            device.settings.rules.restore_system_apps = true;
        }
        self.args.run_task(
            device,
            Task::ImportRules {
                package: self.args.package(),
            },
        )
    }
}
