use clap::{self, Args};

use blocker::model::{ComponentDescriptor, ComponentType, EnabledState};

use crate::device::Device;

#[derive(Args)]
pub struct Components {
    /// Package to list the components of
    #[arg()]
    package: String,

    /// Only list components of this type
    #[arg(short, long)]
    kind: Option<ComponentType>,

    /// Print JSON instead of a table
    #[arg(short, long)]
    json: bool,
}

fn state_str(state: EnabledState) -> &'static str {
    match state {
        EnabledState::Enabled => "enabled",
        EnabledState::Disabled => "disabled",
        EnabledState::Default => "default",
    }
}

fn print_table(components: &[ComponentDescriptor]) {
    for it in components {
        println!(
            "{:<8}\t{:<8}\t{}{}{}",
            it.kind.as_str(),
            state_str(it.enabled_state),
            it.name,
            if it.exported { "\texported" } else { "" },
            if it.is_running { "\trunning" } else { "" },
        );
    }
}

impl Components {
    pub fn run(&self) -> anyhow::Result<()> {
        let device = Device::open()?;
        let inspector = device.inspector()?;
        let components = match self.kind {
            Some(kind) => inspector.list(&self.package, kind)?,
            None => inspector.list_all(&self.package)?,
        };

        if self.json {
            let rows: Vec<serde_json::Value> = components
                .iter()
                .map(|it| {
                    serde_json::json!({
                        "name": it.name,
                        "type": it.kind,
                        "enabledState": it.enabled_state,
                        "exported": it.exported,
                        "running": it.is_running,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        } else {
            print_table(&components);
        }
        Ok(())
    }
}
