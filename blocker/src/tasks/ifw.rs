//! Backups of the intent firewall rule files.

use std::path::{Path, PathBuf};

use crate::controller::ComponentController;
use crate::ifw::{package_of_rule_file, rule_file_name, FirewallRule, FirewallRuleStore, StorageError};
use crate::inspector::ComponentInspector;
use crate::model::ComponentName;
use crate::utils::{read_file_bytes, write_file_atomic};

use super::batch::{self, ForwardBatchEvents};
use super::export::prepare_location;
use super::import::{rule_files, should_restore, Verdict};
use super::{Event, EventMonitor, FailureReason, OutcomeTracker, TaskCancelCheck, WorkOutcome};

/// Sub-directory of the backup location holding the rule files
pub const IFW_BACKUP_DIR: &str = "ifw";

#[derive(Debug, Clone, Default)]
pub struct IfwOptions {
    pub location: Option<PathBuf>,
    pub package: Option<String>,
    pub restore_system_apps: bool,
}

impl IfwOptions {
    fn backup_dir(&self) -> Option<PathBuf> {
        self.location.as_ref().map(|it| it.join(IFW_BACKUP_DIR))
    }
}

fn storage_failure(e: &StorageError) -> FailureReason {
    match e {
        StorageError::Base(err) => FailureReason::from(err),
        StorageError::Unwritable(_) => FailureReason::MissingStoragePermission,
        e => FailureReason::UnexpectedException(e.to_string()),
    }
}

fn is_ifw_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|it| it.to_str())
        .and_then(package_of_rule_file)
        .is_some()
}

/// Packages with a stored rule, or just the one asked for
fn stored_packages(
    store: &dyn FirewallRuleStore,
    package: Option<&str>,
) -> Result<Vec<String>, FailureReason> {
    match package {
        Some(pkg) => Ok(vec![pkg.to_string()]),
        None => store.list_all().map_err(|e| {
            log::error!("failed to list firewall rules: {}", e);
            storage_failure(&e)
        }),
    }
}

/// Copy every stored rule file into the `ifw` directory of the backup
/// location. Packages without any rule are skipped.
pub fn export_ifw_rules(
    store: &dyn FirewallRuleStore,
    opts: &IfwOptions,
    monitor: &dyn EventMonitor<Event>,
    cancel: &TaskCancelCheck,
) -> WorkOutcome {
    let dir = match prepare_location(opts.backup_dir().as_deref()) {
        Ok(v) => v,
        Err(reason) => return WorkOutcome::failed(reason),
    };
    let packages = match stored_packages(store, opts.package.as_deref()) {
        Ok(v) => v,
        Err(reason) => return WorkOutcome::failed(reason),
    };

    let mut tracker = OutcomeTracker::new(packages.len());
    monitor.on_event(Event::Started {
        total: packages.len(),
    });

    for package in packages {
        if cancel.was_cancelled() {
            return tracker.fail(FailureReason::Cancelled);
        }
        let res: Result<bool, super::Error> = store.load(&package).map_err(Into::into).and_then(|rule| {
            if rule.is_empty() {
                return Ok(false);
            }
            write_file_atomic(&dir.join(rule_file_name(&package)), &rule.to_xml()?)?;
            Ok(true)
        });
        match res {
            Ok(true) => {
                tracker.processed();
                monitor.on_event(Event::PackageProcessed { package });
            }
            Ok(false) => {
                tracker.skipped();
                monitor.on_event(Event::PackageSkipped {
                    package,
                    reason: "no rules".into(),
                });
            }
            Err(e) => {
                log::error!("failed to export firewall rule of {}: {}", package, e);
                tracker.failed();
                monitor.on_event(Event::PackageFailed {
                    package,
                    error: e.to_string(),
                });
            }
        }
        monitor.on_event(Event::Progress {
            done: tracker.done(),
            total: tracker.total(),
        });
    }

    let outcome = tracker.finish();
    log::info!("firewall rule export finished: {}", outcome);
    outcome
}

fn read_backup(path: &Path) -> Result<FirewallRule, super::Error> {
    let package = path
        .file_name()
        .and_then(|it| it.to_str())
        .and_then(package_of_rule_file)
        .ok_or_else(|| crate::Error::BadPath(path.to_path_buf()))?;
    let raw = read_file_bytes(path)?;
    Ok(FirewallRule::from_xml(package, &raw)?)
}

/// Re-apply backed up rule files. Every listed component is disabled
/// through `firewall`, so rules merge with what the device already has.
pub fn import_ifw_rules(
    inspector: &ComponentInspector,
    firewall: &dyn ComponentController,
    opts: &IfwOptions,
    monitor: &dyn EventMonitor<Event>,
    cancel: &TaskCancelCheck,
) -> WorkOutcome {
    let dir = match opts.backup_dir() {
        Some(v) => v,
        None => return WorkOutcome::failed(FailureReason::FolderNotDefined),
    };
    let files = match rule_files(&dir, opts.package.as_deref(), is_ifw_file, rule_file_name) {
        Ok(v) => v,
        Err(reason) => return WorkOutcome::failed(reason),
    };

    let mut tracker = OutcomeTracker::new(files.len());
    monitor.on_event(Event::Started { total: files.len() });

    for path in &files {
        if cancel.was_cancelled() {
            return tracker.fail(FailureReason::Cancelled);
        }
        let rule = match read_backup(path) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("skipping {}: {}", path.display(), e);
                tracker.skipped();
                monitor.on_event(Event::PackageSkipped {
                    package: path.display().to_string(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let package = rule.package().to_string();

        match should_restore(inspector, &package, opts.restore_system_apps) {
            Ok(Verdict::Apply) => {
                let components: Vec<ComponentName> = rule.components().collect();
                let forward = ForwardBatchEvents::new(monitor);
                let report = batch::run(&components, false, firewall, &forward, cancel);
                for (component, err) in &report.failures {
                    monitor.on_event(Event::ComponentFailed {
                        component: component.clone(),
                        error: err.to_string(),
                    });
                }
                if report.cancelled {
                    return tracker.fail(FailureReason::Cancelled);
                }
                if report.failures.is_empty() {
                    tracker.processed();
                    monitor.on_event(Event::PackageProcessed { package });
                } else {
                    tracker.failed();
                    monitor.on_event(Event::PackageFailed {
                        package,
                        error: format!("{} components could not be blocked", report.failures.len()),
                    });
                }
            }
            Ok(Verdict::Skip(reason)) => {
                log::debug!("skipping {}: {}", package, reason);
                tracker.skipped();
                monitor.on_event(Event::PackageSkipped {
                    package,
                    reason: reason.into(),
                });
            }
            Err(e) => {
                tracker.failed();
                monitor.on_event(Event::PackageFailed {
                    package,
                    error: e.to_string(),
                });
            }
        }
        monitor.on_event(Event::Progress {
            done: tracker.done(),
            total: tracker.total(),
        });
    }

    let outcome = tracker.finish();
    log::info!("firewall rule import finished: {}", outcome);
    outcome
}

/// Delete every stored rule file
pub fn reset_ifw_rules(
    store: &dyn FirewallRuleStore,
    package: Option<&str>,
    monitor: &dyn EventMonitor<Event>,
    cancel: &TaskCancelCheck,
) -> WorkOutcome {
    let packages = match stored_packages(store, package) {
        Ok(v) => v,
        Err(reason) => return WorkOutcome::failed(reason),
    };

    let mut tracker = OutcomeTracker::new(packages.len());
    monitor.on_event(Event::Started {
        total: packages.len(),
    });

    for package in packages {
        if cancel.was_cancelled() {
            return tracker.fail(FailureReason::Cancelled);
        }
        match store.delete(&package) {
            Ok(true) => {
                tracker.processed();
                monitor.on_event(Event::PackageProcessed { package });
            }
            Ok(false) => {
                tracker.skipped();
                monitor.on_event(Event::PackageSkipped {
                    package,
                    reason: "no rules".into(),
                });
            }
            Err(StorageError::Base(crate::Error::RootRequired)) => {
                return tracker.fail(FailureReason::MissingRootPermission)
            }
            Err(e) => {
                log::error!("failed to delete firewall rule of {}: {}", package, e);
                tracker.failed();
                monitor.on_event(Event::PackageFailed {
                    package,
                    error: e.to_string(),
                });
            }
        }
        monitor.on_event(Event::Progress {
            done: tracker.done(),
            total: tracker.total(),
        });
    }

    let outcome = tracker.finish();
    log::info!("firewall rule reset finished: {}", outcome);
    outcome
}
