use std::collections::HashMap;
use std::sync::Arc;

use mockall::mock;

use crate::controller::ControlResult;
use crate::inspector::{ComponentInspector, ComponentListing};
use crate::manifest::ManifestParseError;
use crate::model::{ComponentDescriptor, ComponentName, ComponentType, EnabledState, PackageInfo};

mock! {
    pub RootProbe {}

    impl crate::root::RootProbe for RootProbe {
        fn helper_granted(&self) -> bool;
        fn open_session(&self) -> bool;
        fn exec_root_shell(&self) -> bool;
    }
}

mock! {
    pub PackageDatabase {}

    impl crate::inspector::PackageDatabase for PackageDatabase {
        fn installed_packages(&self) -> crate::Result<Vec<PackageInfo>>;
        fn package_info(&self, package: &str) -> crate::Result<Option<PackageInfo>>;
        fn components(&self, package: &str, kind: ComponentType) -> crate::Result<ComponentListing>;
        fn enabled_states(&self, package: &str) -> crate::Result<HashMap<String, EnabledState>>;
        fn running_services(&self, package: &str) -> crate::Result<Vec<String>>;
    }
}

mock! {
    pub ManifestSource {}

    impl crate::manifest::ManifestSource for ManifestSource {
        fn manifest_bytes(&self, package: &str) -> Result<Vec<u8>, ManifestParseError>;
    }
}

mock! {
    pub ComponentController {}

    impl crate::controller::ComponentController for ComponentController {
        fn set_enabled(&self, component: &ComponentName, enabled: bool) -> ControlResult<()>;
        fn check_enabled(&self, component: &ComponentName) -> ControlResult<bool>;
        fn name(&self) -> &'static str;
    }
}

pub fn fake_package(package: &str, system: bool) -> PackageInfo {
    PackageInfo {
        package_name: package.into(),
        version_code: Some(1),
        version_name: Some("1.0".into()),
        is_system: system,
        enabled: true,
        code_path: None,
    }
}

/// An inspector over the given `(package, is_system)` apps. Every app has a
/// `Main` activity in the default state and a disabled `Tracker` service.
pub fn fake_inspector(apps: &[(&str, bool)]) -> ComponentInspector {
    let installed: Vec<PackageInfo> = apps
        .iter()
        .map(|(pkg, system)| fake_package(pkg, *system))
        .collect();
    let lookup = installed.clone();

    let mut db = MockPackageDatabase::new();
    db.expect_installed_packages()
        .returning(move || Ok(installed.clone()));
    db.expect_package_info().returning(move |pkg| {
        Ok(lookup.iter().find(|it| it.package_name == pkg).cloned())
    });
    db.expect_components().returning(|pkg, kind| {
        let (class, state) = match kind {
            ComponentType::Activity => ("Main", EnabledState::Default),
            ComponentType::Service => ("Tracker", EnabledState::Disabled),
            _ => {
                return Ok(ComponentListing {
                    components: Vec::new(),
                    complete: true,
                })
            }
        };
        Ok(ComponentListing {
            components: vec![ComponentDescriptor {
                package_name: pkg.into(),
                name: format!("{pkg}.{class}"),
                kind,
                exported: false,
                enabled_state: state,
                is_running: false,
            }],
            complete: true,
        })
    });
    db.expect_enabled_states().returning(|pkg| {
        Ok(HashMap::from([(
            format!("{pkg}.Tracker"),
            EnabledState::Disabled,
        )]))
    });
    db.expect_running_services().returning(|_| Ok(Vec::new()));

    ComponentInspector::new(
        Arc::new(db),
        Arc::new(MockManifestSource::new()),
        crate::config::DEFAULT_HOST_PACKAGE,
    )
}
