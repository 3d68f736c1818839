use clap::{self, Args, Subcommand};

use blocker::tasks::runner::Task;

use crate::device::Device;
use crate::rules::RuleTaskArgs;

#[derive(Args)]
pub struct Ifw {
    #[command(subcommand)]
    command: IfwCommand,
}

#[derive(Subcommand)]
enum IfwCommand {
    /// Copy the firewall rule files into the backup location
    Export(RuleTaskArgs),

    /// Block everything listed in backed up rule files
    Import(RuleTaskArgs),

    /// Delete the firewall rule files
    Reset(RuleTaskArgs),
}

impl Ifw {
    pub fn run(&self) -> anyhow::Result<()> {
        let device = Device::open()?;
        match &self.command {
            IfwCommand::Export(args) => args.run_task(
                device,
                Task::ExportIfw {
                    package: args.package(),
                },
            ),
            IfwCommand::Import(args) => args.run_task(
                device,
                Task::ImportIfw {
                    package: args.package(),
                },
            ),
            IfwCommand::Reset(args) => args.run_task(
                device,
                Task::ResetIfw {
                    package: args.package(),
                },
            ),
        }
    }
}
