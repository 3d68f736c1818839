//! The single place component state gets changed.
//!
//! Three backends exist and they don't agree on much: the package manager
//! flips the platform's enabled flag, the intent firewall leaves that flag
//! alone and blocks intents instead, and the binder backend asks a privileged
//! companion process to do the work. Which one is used is plain
//! configuration data, see [ControllerKind].

use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adb::Adb;
use crate::companion::Companion;
use crate::config::Settings;
use crate::ifw::{FirewallRuleStore, StorageError};
use crate::model::ComponentName;
use crate::root::RootCapability;

mod binder;
mod firewall;
mod pm;

pub use binder::BinderProxyController;
pub use firewall::FirewallController;
pub use pm::PackageManagerController;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("component not found: {0}")]
    NotFound(String),

    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("request refused: {0}")]
    Refused(String),

    #[error("{0} is not supported by this controller")]
    Unsupported(String),

    #[error("rule storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Unexpected(String),
}

impl From<crate::Error> for ControlError {
    fn from(value: crate::Error) -> Self {
        match value {
            crate::Error::NoAdbDevice
            | crate::Error::AdbDeviceNotFound(_)
            | crate::Error::Timeout(_) => {
                Self::BackendUnreachable(value.to_string())
            }
            crate::Error::RootRequired => Self::PermissionDenied(value.to_string()),
            crate::Error::PackageNotFound(p) => Self::NotFound(p),
            e => Self::Unexpected(e.to_string()),
        }
    }
}

impl From<std::io::Error> for ControlError {
    fn from(value: std::io::Error) -> Self {
        Self::BackendUnreachable(value.to_string())
    }
}

pub type ControlResult<T> = std::result::Result<T, ControlError>;

/// Per item outcome of a batch
pub type BatchItem = (ComponentName, ControlResult<()>);

pub trait ComponentController: Send + Sync {
    /// Enable or disable a single component. Setting the state it already
    /// has is not an error.
    fn set_enabled(&self, component: &ComponentName, enabled: bool) -> ControlResult<()>;

    /// Whether the component is enabled as far as this backend can tell
    fn check_enabled(&self, component: &ComponentName) -> ControlResult<bool>;

    /// Apply the same state to many components. Items are attempted in
    /// order and one failure never stops the rest.
    ///
    /// The default applies items lazily, one per call to `next`.
    fn batch_set_enabled<'a>(
        &'a self,
        components: &'a [ComponentName],
        enabled: bool,
    ) -> Box<dyn Iterator<Item = BatchItem> + 'a> {
        Box::new(
            components
                .iter()
                .map(move |it| (it.clone(), self.set_enabled(it, enabled))),
        )
    }

    /// Short name for logging
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    #[serde(rename = "pm")]
    PackageManager,
    #[default]
    #[serde(rename = "ifw")]
    Firewall,
    Binder,
}

impl ControllerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PackageManager => "pm",
            Self::Firewall => "ifw",
            Self::Binder => "binder",
        }
    }

    /// Whether the backend can only work with root
    pub fn needs_root(&self) -> bool {
        matches!(self, Self::Firewall)
    }
}

impl Display for ControllerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControllerKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "pm" | "package-manager" => Self::PackageManager,
            "ifw" | "firewall" => Self::Firewall,
            "binder" | "shizuku" => Self::Binder,
            _ => return Err(crate::Error::Generic(format!("invalid controller kind {s}"))),
        })
    }
}

/// Everything the controllers might need, built once by the caller
#[derive(Clone)]
pub struct ControllerDeps {
    pub adb: Arc<dyn Adb>,
    pub root: Arc<RootCapability>,
    pub store: Arc<dyn FirewallRuleStore>,
    pub companion: Arc<Companion>,
}

impl ControllerKind {
    /// Resolve the kind into the backend
    pub fn build(&self, deps: &ControllerDeps, settings: &Settings) -> Box<dyn ComponentController> {
        match self {
            Self::PackageManager => Box::new(PackageManagerController::new(
                Arc::clone(&deps.adb),
                Arc::clone(&deps.root),
                settings.device.user,
            )),
            Self::Firewall => Box::new(FirewallController::new(
                Arc::clone(&deps.store),
                PackageManagerController::new(
                    Arc::clone(&deps.adb),
                    Arc::clone(&deps.root),
                    settings.device.user,
                ),
            )),
            Self::Binder => Box::new(BinderProxyController::new(Arc::clone(&deps.companion))),
        }
    }
}

/// The two mechanisms that can keep a component from running, reported
/// side by side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveState {
    pub platform_enabled: bool,
    pub firewall_blocked: bool,
}

impl EffectiveState {
    pub fn is_blocked(&self) -> bool {
        !self.platform_enabled || self.firewall_blocked
    }
}

/// The combined view of a component's state, querying the platform flag and
/// the firewall rule separately
pub fn effective_state(
    platform: &PackageManagerController,
    store: &dyn FirewallRuleStore,
    component: &ComponentName,
) -> ControlResult<EffectiveState> {
    let platform_enabled = platform.check_enabled(component)?;
    let rule = store.load(&component.package)?;
    Ok(EffectiveState {
        platform_enabled,
        firewall_blocked: rule.is_blocked(component),
    })
}
