//! Lists installed apps and their components.
//!
//! The package database is asked first. When it fails, or admits its answer
//! is incomplete, the components are read from the package's manifest
//! instead and callers get the same descriptors either way.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::manifest::{ManifestDocument, ManifestParseError, ManifestSource};
use crate::model::{
    resolve_class_name, ComponentDescriptor, ComponentName, ComponentType, EnabledState,
    PackageInfo,
};

mod shell;

pub use shell::ShellPackageDatabase;

/// A package database answer for one package and component type
#[derive(Debug, Clone, Default)]
pub struct ComponentListing {
    pub components: Vec<ComponentDescriptor>,
    /// False when the database may have left components out
    pub complete: bool,
}

pub trait PackageDatabase: Send + Sync {
    fn installed_packages(&self) -> crate::Result<Vec<PackageInfo>>;

    /// `None` if the package isn't installed
    fn package_info(&self, package: &str) -> crate::Result<Option<PackageInfo>>;

    fn components(&self, package: &str, kind: ComponentType) -> crate::Result<ComponentListing>;

    /// Every component of the package with an enabled-setting override,
    /// keyed by class name. Components not in the map are in the default
    /// state.
    fn enabled_states(&self, package: &str) -> crate::Result<HashMap<String, EnabledState>>;

    /// Class names of the package's running services
    fn running_services(&self, package: &str) -> crate::Result<Vec<String>>;

    fn component_state(&self, component: &ComponentName) -> crate::Result<EnabledState> {
        Ok(self
            .enabled_states(&component.package)?
            .get(&component.class)
            .copied()
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppFilter {
    #[default]
    All,
    ThirdParty,
    System,
}

impl AppFilter {
    fn accepts(&self, info: &PackageInfo) -> bool {
        match self {
            Self::All => true,
            Self::ThirdParty => !info.is_system,
            Self::System => info.is_system,
        }
    }
}

impl From<ManifestParseError> for crate::Error {
    fn from(value: ManifestParseError) -> Self {
        match value {
            ManifestParseError::Base(e) => e,
            ManifestParseError::Io(e) => Self::IO(e),
            ManifestParseError::Malformed(msg) => Self::Generic(format!("malformed manifest: {msg}")),
        }
    }
}

/// What the manifest fallback knows about a package, loaded at most once
/// per listing
struct Declared {
    manifest: ManifestDocument,
    states: HashMap<String, EnabledState>,
    running: HashSet<String>,
}

impl Declared {
    fn descriptors(&self, package: &str, kind: ComponentType) -> Vec<ComponentDescriptor> {
        self.manifest
            .components(kind)
            .into_iter()
            .filter(|it| !it.name.is_empty())
            .map(|declared| {
                let class = resolve_class_name(package, &declared.name);
                ComponentDescriptor {
                    package_name: package.into(),
                    enabled_state: self.states.get(&class).copied().unwrap_or_default(),
                    is_running: kind == ComponentType::Service && self.running.contains(&class),
                    exported: declared.exported,
                    name: class,
                    kind,
                }
            })
            .collect()
    }
}

enum DeclaredSlot {
    Unloaded,
    Loaded(Declared),
    Unavailable,
}

pub struct ComponentInspector {
    db: Arc<dyn PackageDatabase>,
    manifests: Arc<dyn ManifestSource>,
    host_package: String,
}

impl ComponentInspector {
    pub fn new(
        db: Arc<dyn PackageDatabase>,
        manifests: Arc<dyn ManifestSource>,
        host_package: &str,
    ) -> Self {
        Self {
            db,
            manifests,
            host_package: host_package.into(),
        }
    }

    pub fn host_package(&self) -> &str {
        &self.host_package
    }

    /// Every component of the given type. A package that isn't installed
    /// has no components.
    pub fn list(&self, package: &str, kind: ComponentType) -> crate::Result<Vec<ComponentDescriptor>> {
        if !self.is_app_installed(package)? {
            log::debug!("{} is not installed", package);
            return Ok(Vec::new());
        }
        self.list_kind(package, kind, &mut DeclaredSlot::Unloaded)
    }

    /// Every component of every type. The manifest is read at most once.
    pub fn list_all(&self, package: &str) -> crate::Result<Vec<ComponentDescriptor>> {
        if !self.is_app_installed(package)? {
            log::debug!("{} is not installed", package);
            return Ok(Vec::new());
        }
        let mut declared = DeclaredSlot::Unloaded;
        let mut all = Vec::new();
        for kind in ComponentType::ALL {
            all.extend(self.list_kind(package, kind, &mut declared)?);
        }
        Ok(all)
    }

    fn list_kind(
        &self,
        package: &str,
        kind: ComponentType,
        declared: &mut DeclaredSlot,
    ) -> crate::Result<Vec<ComponentDescriptor>> {
        let partial = match self.db.components(package, kind) {
            Ok(listing) if listing.complete => return Ok(listing.components),
            Ok(listing) => {
                log::debug!("package database listing of {} is incomplete", package);
                Some(listing.components)
            }
            Err(e) => {
                log::warn!("package database failed for {}: {}", package, e);
                None
            }
        };

        if let DeclaredSlot::Unloaded = declared {
            match self.load_declared(package) {
                Ok(v) => *declared = DeclaredSlot::Loaded(v),
                Err(e) => {
                    let Some(components) = partial else {
                        return Err(e);
                    };
                    log::warn!(
                        "manifest fallback for {} failed, using partial listing: {}",
                        package,
                        e
                    );
                    *declared = DeclaredSlot::Unavailable;
                    return Ok(components);
                }
            }
        }

        match declared {
            DeclaredSlot::Loaded(d) => Ok(d.descriptors(package, kind)),
            _ => partial.ok_or_else(|| {
                crate::Error::Generic(format!("manifest of {} is unavailable", package))
            }),
        }
    }

    fn load_declared(&self, package: &str) -> crate::Result<Declared> {
        let manifest = self.manifests.load(package)?;
        let states = self.db.enabled_states(package).unwrap_or_else(|e| {
            log::warn!("no enabled states for {}: {}", package, e);
            HashMap::new()
        });
        let running = self
            .db
            .running_services(package)
            .unwrap_or_default()
            .into_iter()
            .collect();
        Ok(Declared {
            manifest,
            states,
            running,
        })
    }

    /// Whether the component would run. A component in the default state
    /// is enabled unless its manifest says otherwise.
    pub fn check_enabled(&self, component: &ComponentName) -> crate::Result<bool> {
        match self.db.component_state(component)? {
            EnabledState::Enabled => Ok(true),
            EnabledState::Disabled => Ok(false),
            EnabledState::Default => Ok(self.declared_enabled(component)),
        }
    }

    fn declared_enabled(&self, component: &ComponentName) -> bool {
        match self.manifests.load(&component.package) {
            Ok(manifest) => manifest
                .find_component(component.kind, &component.class)
                .map_or(true, |it| it.enabled),
            Err(e) => {
                log::debug!("no manifest for {}: {}", component.package, e);
                true
            }
        }
    }

    pub fn is_app_installed(&self, package: &str) -> crate::Result<bool> {
        Ok(self.db.package_info(package)?.is_some())
    }

    pub fn is_system_app(&self, package: &str) -> crate::Result<bool> {
        Ok(self
            .db
            .package_info(package)?
            .map_or(false, |it| it.is_system))
    }

    pub fn package_info(&self, package: &str) -> crate::Result<Option<PackageInfo>> {
        self.db.package_info(package)
    }

    /// Installed applications matching the filter, sorted by package name.
    /// The host package is never included.
    pub fn list_applications(&self, filter: AppFilter) -> crate::Result<Vec<PackageInfo>> {
        let mut apps: Vec<PackageInfo> = self
            .db
            .installed_packages()?
            .into_iter()
            .filter(|it| it.package_name != self.host_package && filter.accepts(it))
            .collect();
        apps.sort_by(|a, b| a.package_name.cmp(&b.package_name));
        Ok(apps)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::manifest::ManifestParseError;
    use crate::testing::{MockManifestSource, MockPackageDatabase};
    use rstest::*;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.a">
    <application>
        <activity android:name=".Main" android:exported="true" />
        <service android:name=".Sync" android:enabled="false" />
        <service android:name="com.a.Upload" />
        <receiver android:name=".Boot" android:exported="true" />
    </application>
</manifest>
"#;

    fn installed(pkg: &str, system: bool) -> PackageInfo {
        PackageInfo {
            package_name: pkg.into(),
            is_system: system,
            enabled: true,
            ..Default::default()
        }
    }

    fn manifests() -> MockManifestSource {
        let mut src = MockManifestSource::new();
        src.expect_manifest_bytes()
            .returning(|_| Ok(MANIFEST.as_bytes().to_vec()));
        src
    }

    fn db_with_package() -> MockPackageDatabase {
        let mut db = MockPackageDatabase::new();
        db.expect_package_info()
            .returning(|p| Ok(Some(installed(p, false))));
        db
    }

    #[test]
    fn test_fallback_on_error() {
        let mut db = db_with_package();
        db.expect_components()
            .returning(|_, _| Err(crate::Error::new_generic("dumpsys crashed")));
        db.expect_enabled_states().returning(|_| {
            Ok(HashMap::from([(
                "com.a.Upload".to_string(),
                EnabledState::Disabled,
            )]))
        });
        db.expect_running_services()
            .returning(|_| Ok(vec!["com.a.Sync".to_string()]));

        let inspector = ComponentInspector::new(Arc::new(db), Arc::new(manifests()), "host");
        let services = inspector
            .list("com.a", ComponentType::Service)
            .expect("fallback listing");
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].name, "com.a.Sync");
        assert!(services[0].is_running);
        assert_eq!(services[0].enabled_state, EnabledState::Default);
        assert_eq!(services[1].enabled_state, EnabledState::Disabled);
        assert!(!services[1].is_running);
    }

    #[test]
    fn test_fallback_on_incomplete() {
        let mut db = db_with_package();
        db.expect_components().returning(|p, kind| {
            Ok(ComponentListing {
                components: vec![ComponentDescriptor {
                    package_name: p.into(),
                    name: "com.a.Main".into(),
                    kind,
                    exported: true,
                    enabled_state: EnabledState::Default,
                    is_running: false,
                }],
                complete: false,
            })
        });
        db.expect_enabled_states().returning(|_| Ok(HashMap::new()));
        db.expect_running_services().returning(|_| Ok(Vec::new()));
        let inspector = ComponentInspector::new(Arc::new(db), Arc::new(manifests()), "host");
        let receivers = inspector
            .list("com.a", ComponentType::Receiver)
            .expect("listing");
        assert_eq!(receivers.len(), 1);
        assert_eq!(receivers[0].name, "com.a.Boot");
    }

    #[test]
    fn test_partial_listing_when_manifest_unavailable() {
        let mut db = db_with_package();
        db.expect_components().returning(|p, kind| {
            Ok(ComponentListing {
                components: vec![ComponentDescriptor {
                    package_name: p.into(),
                    name: "com.a.Main".into(),
                    kind,
                    exported: true,
                    enabled_state: EnabledState::Default,
                    is_running: false,
                }],
                complete: false,
            })
        });
        let mut src = MockManifestSource::new();
        src.expect_manifest_bytes()
            .returning(|_| Err(ManifestParseError::Malformed("truncated".into())));
        let inspector = ComponentInspector::new(Arc::new(db), Arc::new(src), "host");
        let activities = inspector
            .list("com.a", ComponentType::Activity)
            .expect("partial listing");
        assert_eq!(activities.len(), 1);
    }

    #[test]
    fn test_list_all_reads_manifest_once() {
        let mut db = db_with_package();
        db.expect_components()
            .returning(|_, _| Err(crate::Error::new_generic("dumpsys crashed")));
        db.expect_enabled_states()
            .times(1)
            .returning(|_| Ok(HashMap::new()));
        db.expect_running_services()
            .times(1)
            .returning(|_| Ok(Vec::new()));
        let mut src = MockManifestSource::new();
        src.expect_manifest_bytes()
            .times(1)
            .returning(|_| Ok(MANIFEST.as_bytes().to_vec()));

        let inspector = ComponentInspector::new(Arc::new(db), Arc::new(src), "host");
        let all = inspector.list_all("com.a").expect("listing");
        assert_eq!(all.len(), 4);
        assert_eq!(
            all.iter().filter(|it| it.kind == ComponentType::Service).count(),
            2
        );
    }

    #[test]
    fn test_uninstalled_is_empty() {
        let mut db = MockPackageDatabase::new();
        db.expect_package_info().returning(|_| Ok(None));
        let inspector = ComponentInspector::new(
            Arc::new(db),
            Arc::new(MockManifestSource::new()),
            "host",
        );
        assert!(inspector
            .list("com.gone", ComponentType::Activity)
            .expect("no error")
            .is_empty());
        assert!(!inspector.is_app_installed("com.gone").expect("installed check"));
    }

    #[test]
    fn test_check_enabled_uses_manifest_default() {
        let mut db = db_with_package();
        db.expect_enabled_states().returning(|_| Ok(HashMap::new()));
        let inspector = ComponentInspector::new(Arc::new(db), Arc::new(manifests()), "host");
        let sync = ComponentName::new("com.a", ".Sync", ComponentType::Service);
        let upload = ComponentName::new("com.a", ".Upload", ComponentType::Service);
        assert!(!inspector.check_enabled(&sync).expect("check"));
        assert!(inspector.check_enabled(&upload).expect("check"));
    }

    #[rstest]
    #[case(AppFilter::All, 3)]
    #[case(AppFilter::ThirdParty, 1)]
    #[case(AppFilter::System, 2)]
    fn test_list_applications(#[case] filter: AppFilter, #[case] expected: usize) {
        let mut db = MockPackageDatabase::new();
        db.expect_installed_packages().returning(|| {
            Ok(vec![
                installed("com.android.phone", true),
                installed("com.merxury.blocker", false),
                installed("com.example", false),
                installed("android", true),
            ])
        });
        let inspector = ComponentInspector::new(
            Arc::new(db),
            Arc::new(MockManifestSource::new()),
            "com.merxury.blocker",
        );
        let apps = inspector.list_applications(filter).expect("apps");
        assert_eq!(apps.len(), expected);
        assert!(apps.iter().all(|it| it.package_name != "com.merxury.blocker"));
    }
}
