use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::ifw::FirewallRuleStore;
use crate::inspector::{AppFilter, ComponentInspector};
use crate::model::{EnabledState, PackageInfo};
use crate::rule::{EncodeMode, RuleCodec};
use crate::utils::{ensure_dir_exists, write_file_atomic};

use super::{
    Error, Event, EventMonitor, FailureReason, OutcomeTracker, TaskCancelCheck, WorkOutcome,
};

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub location: Option<PathBuf>,
    /// Export just this package instead of every eligible one
    pub package: Option<String>,
    pub mode: EncodeMode,
    pub skip_system_apps: bool,
}

/// Make sure the backup location exists and takes new files
pub(crate) fn prepare_location(location: Option<&Path>) -> Result<PathBuf, FailureReason> {
    let dir = location.ok_or(FailureReason::FolderNotDefined)?;
    if let Err(e) = ensure_dir_exists(dir) {
        log::error!("failed to create {}: {}", dir.display(), e);
        return Err(FailureReason::MissingStoragePermission);
    }
    if let Err(e) = NamedTempFile::new_in(dir) {
        log::error!("{} is not writable: {}", dir.display(), e);
        return Err(FailureReason::MissingStoragePermission);
    }
    Ok(dir.to_path_buf())
}

/// Packages a run should look at: the one asked for, or every installed
/// app passing the system app setting. The host package is never included.
pub(crate) fn eligible_packages(
    inspector: &ComponentInspector,
    package: Option<&str>,
    skip_system_apps: bool,
) -> crate::Result<Vec<PackageInfo>> {
    match package {
        Some(pkg) if pkg == inspector.host_package() => Ok(Vec::new()),
        Some(pkg) => Ok(inspector.package_info(pkg)?.into_iter().collect()),
        None => {
            let filter = if skip_system_apps {
                AppFilter::ThirdParty
            } else {
                AppFilter::All
            };
            inspector.list_applications(filter)
        }
    }
}

fn export_package(
    inspector: &ComponentInspector,
    firewall: Option<&dyn FirewallRuleStore>,
    dir: &Path,
    info: &PackageInfo,
    mode: EncodeMode,
) -> Result<(), Error> {
    let package = info.package_name.as_str();
    let mut components = inspector.list_all(package)?;

    if let Some(store) = firewall {
        let rule = store.load(package)?;
        for it in components.iter_mut() {
            if rule.is_blocked(&it.component_name()) {
                it.enabled_state = EnabledState::Disabled;
            }
        }
    }

    let doc = RuleCodec::encode(package, &components, mode)
        .with_version(info.version_code, info.version_name.clone());
    let bytes = RuleCodec::to_bytes(&doc)?;
    write_file_atomic(&dir.join(RuleCodec::file_name(package)), &bytes)?;
    log::debug!(
        "exported {} components of {}",
        doc.component_list.len(),
        package
    );
    Ok(())
}

/// Write a rule document for every eligible package. A package that fails
/// is counted and skipped, only an unusable location fails the run.
pub fn export_rules(
    inspector: &ComponentInspector,
    firewall: Option<&dyn FirewallRuleStore>,
    opts: &ExportOptions,
    monitor: &dyn EventMonitor<Event>,
    cancel: &TaskCancelCheck,
) -> WorkOutcome {
    let dir = match prepare_location(opts.location.as_deref()) {
        Ok(v) => v,
        Err(reason) => return WorkOutcome::failed(reason),
    };

    let packages = match eligible_packages(
        inspector,
        opts.package.as_deref(),
        opts.skip_system_apps,
    ) {
        Ok(v) => v,
        Err(e) => return WorkOutcome::failed(FailureReason::from(&e)),
    };

    let mut tracker = OutcomeTracker::new(packages.len());
    monitor.on_event(Event::Started {
        total: packages.len(),
    });

    for info in &packages {
        if cancel.was_cancelled() {
            return tracker.fail(FailureReason::Cancelled);
        }
        let package = info.package_name.clone();
        match export_package(inspector, firewall, &dir, info, opts.mode) {
            Ok(_) => {
                tracker.processed();
                monitor.on_event(Event::PackageProcessed { package });
            }
            Err(e) => {
                log::error!("failed to export {}: {}", package, e);
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
    log::info!("export finished: {}", outcome);
    outcome
}
