use clap::{self, Args};

use crate::device::Device;

#[derive(Args)]
pub struct CheckRoot {}

impl CheckRoot {
    pub fn run(&self) -> anyhow::Result<()> {
        let device = Device::open()?;
        let granted = device.root.is_granted();
        println!("root: {}", if granted { "granted" } else { "denied" });
        match device.companion.ping() {
            Ok(reply) => println!("companion: {}", reply),
            Err(e) => {
                log::debug!("companion ping failed: {}", e);
                println!("companion: not running");
            }
        }
        Ok(())
    }
}
