use std::path::PathBuf;
use std::sync::Arc;

use clap::{self, Args};

use blocker::controller::{effective_state, ControllerKind, PackageManagerController};
use blocker::model::ComponentType;

use crate::device::Device;
use crate::parsers::{FlatComponent, FlatComponentValueParser};

/// Arguments shared by `enable` and `disable`
#[derive(Args)]
pub struct SetState {
    /// The component as package/class, `.Class` is relative to the package
    #[arg(value_parser = FlatComponentValueParser)]
    component: FlatComponent,

    /// The component's type
    #[arg(short, long)]
    kind: ComponentType,

    /// Use this controller instead of the configured one
    #[arg(short, long)]
    controller: Option<ControllerKind>,

    /// Keep firewall rules in this local directory instead of on the device
    #[arg(long)]
    local_store: Option<PathBuf>,
}

impl SetState {
    pub fn run(&self, enable: bool) -> anyhow::Result<()> {
        let device = Device::open()?.with_controller(self.controller);
        let controller = device.controller(self.local_store.as_deref())?;
        let component = self.component.with_kind(self.kind);
        controller.set_enabled(&component, enable)?;
        println!(
            "{} {} through {}",
            if enable { "enabled" } else { "disabled" },
            component,
            controller.name()
        );
        Ok(())
    }
}

#[derive(Args)]
pub struct State {
    /// The component as package/class
    #[arg(value_parser = FlatComponentValueParser)]
    component: FlatComponent,

    /// The component's type
    #[arg(short, long)]
    kind: ComponentType,

    /// Read firewall rules from this local directory instead of the device
    #[arg(long)]
    local_store: Option<PathBuf>,
}

impl State {
    pub fn run(&self) -> anyhow::Result<()> {
        let device = Device::open()?;
        let (store, _) = device.rule_store(self.local_store.as_deref())?;
        let platform = PackageManagerController::new(
            Arc::clone(&device.adb),
            Arc::clone(&device.root),
            device.settings.device.user,
        );
        let component = self.component.with_kind(self.kind);
        let state = effective_state(&platform, store.as_ref(), &component)?;
        println!("{}", component);
        println!("  platform: {}", if state.platform_enabled { "enabled" } else { "disabled" });
        println!("  firewall: {}", if state.firewall_blocked { "blocked" } else { "allowed" });
        println!("  effective: {}", if state.is_blocked() { "blocked" } else { "enabled" });
        Ok(())
    }
}
