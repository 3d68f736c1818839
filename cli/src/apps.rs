use clap::{self, Args};

use blocker::inspector::AppFilter;

use crate::device::Device;

#[derive(Args)]
pub struct Apps {
    /// Only list system applications
    #[arg(short, long, conflicts_with = "third_party")]
    system: bool,

    /// Only list third party applications
    #[arg(short, long)]
    third_party: bool,

    /// Print the package names only
    #[arg(short, long)]
    names: bool,
}

impl Apps {
    fn filter(&self) -> AppFilter {
        if self.system {
            AppFilter::System
        } else if self.third_party {
            AppFilter::ThirdParty
        } else {
            AppFilter::All
        }
    }

    pub fn run(&self) -> anyhow::Result<()> {
        let device = Device::open()?;
        let apps = device.inspector()?.list_applications(self.filter())?;
        for app in apps {
            if self.names {
                println!("{}", app.package_name);
                continue;
            }
            println!(
                "{}\t{}\t{}{}",
                app.package_name,
                app.version_name.as_deref().unwrap_or("-"),
                if app.is_system { "system" } else { "user" },
                if app.enabled { "" } else { "\tdisabled" },
            );
        }
        Ok(())
    }
}
