use std::io::{stderr, stdout, Write};

use blocker::tasks::{Event, EventMonitor, WorkOutcome};

/// Prints the progress of a task, one line per package
pub struct PrintMonitor {
    quiet: bool,
}

impl PrintMonitor {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl EventMonitor<Event> for PrintMonitor {
    fn on_event(&self, evt: Event) {
        if self.quiet {
            return;
        }
        let mut out = stdout().lock();
        // Closed stdout isn't worth failing the task over
        _ = match evt {
            Event::Started { total } => writeln!(out, "{} packages to go", total),
            Event::PackageProcessed { package } => writeln!(out, "  ok   {}", package),
            Event::PackageSkipped { package, reason } => {
                writeln!(out, "  skip {} ({})", package, reason)
            }
            Event::PackageFailed { package, error } => {
                writeln!(stderr(), "  FAIL {}: {}", package, error)
            }
            Event::ComponentFailed { component, error } => {
                writeln!(stderr(), "       {}: {}", component, error)
            }
            Event::Progress { .. } | Event::ComponentProgress { .. } | Event::Finished { .. } => {
                Ok(())
            }
        };
    }
}

/// Print the final line of a task and turn a failed one into an error
pub fn report_outcome(what: &str, outcome: &WorkOutcome) -> anyhow::Result<()> {
    if outcome.is_success() {
        println!("{}: {}", what, outcome);
        Ok(())
    } else {
        anyhow::bail!("{} {}", what, outcome)
    }
}
