use std::io;
use std::sync::Arc;

use itertools::Itertools;

use crate::ifw::{lock_package, FirewallRuleStore, PackageLocks, StorageError};
use crate::model::{ComponentName, ComponentType};

use super::{BatchItem, ComponentController, ControlError, ControlResult, PackageManagerController};

/// Blocks components through the intent firewall. The platform's enabled
/// flag is never touched, the platform picks up saved rule files by itself.
pub struct FirewallController {
    store: Arc<dyn FirewallRuleStore>,
    platform: PackageManagerController,
    // Serializes load, modify and save of the same package's rule
    locks: PackageLocks,
}

/// A storage failure reported once per affected item
fn storage_error(e: &StorageError) -> ControlError {
    match e {
        StorageError::Unwritable(s) => ControlError::Storage(StorageError::Unwritable(s.clone())),
        StorageError::NotConfigured => ControlError::Storage(StorageError::NotConfigured),
        StorageError::Io(err) => {
            ControlError::Storage(StorageError::Io(io::Error::new(err.kind(), err.to_string())))
        }
        StorageError::Malformed(s) => ControlError::Storage(StorageError::Malformed(s.clone())),
        StorageError::Base(crate::Error::RootRequired) => {
            ControlError::PermissionDenied(e.to_string())
        }
        StorageError::Base(err) => ControlError::Unexpected(err.to_string()),
    }
}

impl FirewallController {
    pub fn new(store: Arc<dyn FirewallRuleStore>, platform: PackageManagerController) -> Self {
        Self {
            store,
            platform,
            locks: PackageLocks::default(),
        }
    }

    /// Apply `enabled` to every component of a single package with one load
    /// and at most one save
    fn apply_package(
        &self,
        package: &str,
        components: &[&ComponentName],
        enabled: bool,
    ) -> Vec<BatchItem> {
        let lock = self.locks.get(package);
        let _guard = lock_package(&lock);

        let mut rule = match self.store.load(package) {
            Ok(v) => v,
            Err(e) => {
                log::error!("failed to load firewall rule for {}: {}", package, e);
                return components
                    .iter()
                    .map(|it| ((*it).clone(), Err(storage_error(&e))))
                    .collect();
            }
        };

        let mut changed = false;
        let mut results: Vec<BatchItem> = Vec::with_capacity(components.len());
        for component in components {
            if component.kind == ComponentType::Provider {
                results.push((
                    (*component).clone(),
                    Err(ControlError::Unsupported(format!(
                        "firewalling provider {}",
                        component
                    ))),
                ));
                continue;
            }
            changed |= if enabled {
                rule.unblock(component)
            } else {
                rule.block(component).unwrap_or(false)
            };
            results.push(((*component).clone(), Ok(())));
        }

        if changed {
            if let Err(e) = self.store.save(&rule) {
                log::error!("failed to save firewall rule for {}: {}", package, e);
                for (_, res) in results.iter_mut().filter(|(_, r)| r.is_ok()) {
                    *res = Err(storage_error(&e));
                }
            }
        }
        results
    }

    /// Whether the component is listed in its package's rule
    pub fn is_blocked(&self, component: &ComponentName) -> ControlResult<bool> {
        Ok(self.store.load(&component.package)?.is_blocked(component))
    }
}

impl ComponentController for FirewallController {
    fn set_enabled(&self, component: &ComponentName, enabled: bool) -> ControlResult<()> {
        match self
            .apply_package(&component.package, &[component], enabled)
            .pop()
        {
            Some((_, res)) => res,
            None => Err(ControlError::Unexpected(format!(
                "no result for {}",
                component
            ))),
        }
    }

    /// Disabled if either the platform flag is off or the firewall blocks it
    fn check_enabled(&self, component: &ComponentName) -> ControlResult<bool> {
        if self.is_blocked(component)? {
            return Ok(false);
        }
        self.platform.check_enabled(component)
    }

    /// Items are grouped by package, each package's rule is saved once and
    /// results come out one package at a time
    fn batch_set_enabled<'a>(
        &'a self,
        components: &'a [ComponentName],
        enabled: bool,
    ) -> Box<dyn Iterator<Item = BatchItem> + 'a> {
        let packages: Vec<&'a str> = components
            .iter()
            .map(|it| it.package.as_str())
            .unique()
            .collect();
        Box::new(packages.into_iter().flat_map(move |package| {
            let group: Vec<&ComponentName> = components
                .iter()
                .filter(|it| it.package == package)
                .collect();
            self.apply_package(package, &group, enabled)
        }))
    }

    fn name(&self) -> &'static str {
        "ifw"
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ifw::{FirewallRule, LocalRuleStore};
    use crate::root::RootCapability;
    use crate::testing::{mock_adb, ok_output, tmp_dir, MockAdb, TmpDir};
    use rstest::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn platform(adb: MockAdb) -> PackageManagerController {
        PackageManagerController::new(Arc::new(adb), Arc::new(RootCapability::fixed(true)), 0)
    }

    struct CountingStore {
        inner: LocalRuleStore,
        saves: AtomicUsize,
    }

    impl FirewallRuleStore for CountingStore {
        fn load(&self, package: &str) -> Result<FirewallRule, StorageError> {
            self.inner.load(package)
        }

        fn save(&self, rule: &FirewallRule) -> Result<(), StorageError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save(rule)
        }

        fn delete(&self, package: &str) -> Result<bool, StorageError> {
            self.inner.delete(package)
        }

        fn list_all(&self) -> Result<Vec<String>, StorageError> {
            self.inner.list_all()
        }
    }

    #[rstest]
    fn test_blocked_while_platform_enabled(mut mock_adb: MockAdb, tmp_dir: TmpDir) {
        // The platform reports the default state, no `pm disable` is ever run
        mock_adb
            .expect_shell()
            .withf(|cmd| cmd.contains("get-component-enabled-setting"))
            .returning(|_| Ok(ok_output("0\n")));
        let store = Arc::new(LocalRuleStore::new(tmp_dir.get_path().clone()));
        let pm = platform(mock_adb);
        let svc = ComponentName::new("com.a", ".Sync", ComponentType::Service);

        let ctrl = FirewallController::new(store.clone(), pm);
        ctrl.set_enabled(&svc, false).expect("block");
        ctrl.set_enabled(&svc, false).expect("block twice");

        assert!(!ctrl.check_enabled(&svc).expect("effective"));
        assert!(ctrl.platform.check_enabled(&svc).expect("platform"));
        assert_eq!(store.load("com.a").expect("load").len(), 1);

        let state = crate::controller::effective_state(&ctrl.platform, store.as_ref(), &svc)
            .expect("effective state");
        assert!(state.platform_enabled);
        assert!(state.firewall_blocked);
        assert!(state.is_blocked());

        ctrl.set_enabled(&svc, true).expect("unblock");
        assert!(ctrl.check_enabled(&svc).expect("effective"));
        assert!(store.list_all().expect("list").is_empty());
    }

    #[rstest]
    fn test_batch_saves_once_per_package(mock_adb: MockAdb, tmp_dir: TmpDir) {
        let store = Arc::new(CountingStore {
            inner: LocalRuleStore::new(tmp_dir.get_path().clone()),
            saves: AtomicUsize::new(0),
        });
        let ctrl = FirewallController::new(store.clone(), platform(mock_adb));
        let items = vec![
            ComponentName::new("com.a", ".One", ComponentType::Service),
            ComponentName::new("com.b", ".Two", ComponentType::Receiver),
            ComponentName::new("com.a", ".Three", ComponentType::Activity),
            ComponentName::new("com.a", ".Prov", ComponentType::Provider),
        ];
        let results: Vec<_> = ctrl.batch_set_enabled(&items, false).collect();
        assert_eq!(results.len(), 4);
        assert_eq!(store.saves.load(Ordering::SeqCst), 2);

        let failed: Vec<_> = results.iter().filter(|(_, r)| r.is_err()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0.kind, ComponentType::Provider);
        assert!(matches!(failed[0].1, Err(ControlError::Unsupported(_))));
        assert_eq!(store.load("com.a").expect("load").len(), 2);
    }
}
