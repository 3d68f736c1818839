pub mod manifest;
pub use manifest::{ManifestDocument, ManifestReader};

pub mod model;

pub mod context;
pub use context::{Context, DefaultContext};

pub mod config;

pub mod errors;
pub use errors::{Error, Result};

pub mod adb;

pub mod command;
pub use command::run_cmd;

pub mod root;
pub use root::RootCapability;

pub mod companion;

pub mod controller;
pub use controller::{ComponentController, ControllerKind};

pub mod ifw;

pub mod inspector;
pub use inspector::ComponentInspector;

pub mod rule;

pub mod tasks;

pub mod version;
pub use version::{Version, VERSION};

pub mod utils;

#[cfg(test)]
pub mod testing;
