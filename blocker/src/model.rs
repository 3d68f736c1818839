//! Plain data shared by the inspector, the controllers and the rule codec.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentType {
    Activity,
    Service,
    Receiver,
    Provider,
}

impl ComponentType {
    pub const ALL: [ComponentType; 4] = [
        ComponentType::Activity,
        ComponentType::Service,
        ComponentType::Receiver,
        ComponentType::Provider,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::Service => "service",
            Self::Receiver => "receiver",
            Self::Provider => "provider",
        }
    }
}

impl Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "activity" | "activities" => Self::Activity,
            "service" | "services" => Self::Service,
            "receiver" | "receivers" | "broadcast" => Self::Receiver,
            "provider" | "providers" => Self::Provider,
            _ => return Err(crate::Error::Generic(format!("invalid component type {s}"))),
        })
    }
}

/// The platform's enabled-setting for a component. `Default` means no
/// override was ever applied and the manifest value is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnabledState {
    Enabled,
    Disabled,
    #[default]
    Default,
}

impl EnabledState {
    pub fn from_bool(enabled: bool) -> Self {
        if enabled {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }

    /// Resolve the state against the manifest's declared `enabled` value
    pub fn is_enabled(&self, declared_enabled: bool) -> bool {
        match self {
            Self::Enabled => true,
            Self::Disabled => false,
            Self::Default => declared_enabled,
        }
    }
}

/// Identity of a component as the controllers see it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentName {
    pub package: String,
    pub class: String,
    pub kind: ComponentType,
}

impl ComponentName {
    /// Create a new component name, resolving `.Relative` class names
    /// against the package
    pub fn new<P, C>(package: P, class: C, kind: ComponentType) -> Self
    where
        P: Into<String>,
        C: AsRef<str>,
    {
        let package = package.into();
        let class = resolve_class_name(&package, class.as_ref());
        Self {
            package,
            class,
            kind,
        }
    }

    /// Parse a `package/class` string
    pub fn parse(flat: &str, kind: ComponentType) -> Option<Self> {
        let (package, class) = flat.split_once('/')?;
        if package.is_empty() || class.is_empty() {
            return None;
        }
        Some(Self::new(package, class, kind))
    }

    /// The `package/class` form used by `pm` and the intent firewall
    pub fn flatten(&self) -> String {
        format!("{}/{}", self.package, self.class)
    }
}

impl Display for ComponentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.package, self.class)
    }
}

pub fn resolve_class_name(package: &str, class: &str) -> String {
    if class.starts_with('.') {
        format!("{package}{class}")
    } else if !class.contains('.') && !package.is_empty() {
        format!("{package}.{class}")
    } else {
        class.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentDescriptor {
    pub package_name: String,
    pub name: String,
    pub kind: ComponentType,
    pub exported: bool,
    pub enabled_state: EnabledState,
    /// Only ever set for services
    pub is_running: bool,
}

impl ComponentDescriptor {
    pub fn component_name(&self) -> ComponentName {
        ComponentName {
            package: self.package_name.clone(),
            class: self.name.clone(),
            kind: self.kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackageInfo {
    pub package_name: String,
    pub version_code: Option<i64>,
    pub version_name: Option<String>,
    pub is_system: bool,
    pub enabled: bool,
    /// Installed APK path on the device, `base.apk` for split installs
    pub code_path: Option<String>,
}
