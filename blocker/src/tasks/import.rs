use std::fs;
use std::path::{Path, PathBuf};

use crate::controller::ComponentController;
use crate::inspector::ComponentInspector;
use crate::model::EnabledState;
use crate::rule::{BlockerRuleDocument, RuleCodec};
use crate::utils::read_file_bytes;

use super::batch::{self, BatchReport, ForwardBatchEvents};
use super::{Event, EventMonitor, FailureReason, OutcomeTracker, TaskCancelCheck, WorkOutcome};

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub location: Option<PathBuf>,
    /// Import only the document of this package
    pub package: Option<String>,
    pub restore_system_apps: bool,
}

/// Rule documents found in the location, sorted by file name
pub(crate) fn rule_files(
    dir: &Path,
    package: Option<&str>,
    is_rule: fn(&Path) -> bool,
    file_name: fn(&str) -> String,
) -> Result<Vec<PathBuf>, FailureReason> {
    if let Some(pkg) = package {
        let path = dir.join(file_name(pkg));
        if !path.is_file() {
            log::warn!("no rule for {} in {}", pkg, dir.display());
            return Ok(Vec::new());
        }
        return Ok(vec![path]);
    }

    let entries = fs::read_dir(dir).map_err(|e| {
        log::error!("failed to list {}: {}", dir.display(), e);
        FailureReason::MissingStoragePermission
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|it| it.ok())
        .map(|it| it.path())
        .filter(|it| it.is_file() && is_rule(it))
        .collect();
    files.sort();
    Ok(files)
}

pub(crate) enum Verdict {
    Apply,
    Skip(&'static str),
}

pub(crate) fn should_restore(
    inspector: &ComponentInspector,
    package: &str,
    restore_system_apps: bool,
) -> crate::Result<Verdict> {
    if package == inspector.host_package() {
        return Ok(Verdict::Skip("host package"));
    }
    let info = match inspector.package_info(package)? {
        Some(v) => v,
        None => return Ok(Verdict::Skip("not installed")),
    };
    if info.is_system && !restore_system_apps {
        return Ok(Verdict::Skip("system app"));
    }
    Ok(Verdict::Apply)
}

/// Send every failed item of a batch to the monitor, true if there was any
fn report_failures(report: &BatchReport, monitor: &dyn EventMonitor<Event>) -> bool {
    for (component, err) in &report.failures {
        monitor.on_event(Event::ComponentFailed {
            component: component.clone(),
            error: err.to_string(),
        });
    }
    !report.failures.is_empty()
}

/// Apply a document, `None` if the run was cancelled partway
fn apply_document(
    doc: &BlockerRuleDocument,
    controller: &dyn ComponentController,
    monitor: &dyn EventMonitor<Event>,
    cancel: &TaskCancelCheck,
) -> Option<bool> {
    let mut failed = false;
    for (state, enable) in [(EnabledState::Enabled, true), (EnabledState::Disabled, false)] {
        let components = doc.components_in(state);
        if components.is_empty() {
            continue;
        }
        let forward = ForwardBatchEvents::new(monitor);
        let report = batch::run(&components, enable, controller, &forward, cancel);
        failed |= report_failures(&report, monitor);
        if report.cancelled {
            return None;
        }
    }
    Some(failed)
}

/// Apply every rule document in the location through the controller.
/// Documents that don't parse and packages that can't take them are
/// skipped.
pub fn import_rules(
    inspector: &ComponentInspector,
    controller: &dyn ComponentController,
    opts: &ImportOptions,
    monitor: &dyn EventMonitor<Event>,
    cancel: &TaskCancelCheck,
) -> WorkOutcome {
    let dir = match opts.location.as_deref() {
        Some(v) => v,
        None => return WorkOutcome::failed(FailureReason::FolderNotDefined),
    };
    let files = match rule_files(
        dir,
        opts.package.as_deref(),
        RuleCodec::is_rule_file,
        RuleCodec::file_name,
    ) {
        Ok(v) => v,
        Err(reason) => return WorkOutcome::failed(reason),
    };

    let mut tracker = OutcomeTracker::new(files.len());
    monitor.on_event(Event::Started { total: files.len() });

    for path in &files {
        if cancel.was_cancelled() {
            return tracker.fail(FailureReason::Cancelled);
        }
        let name = path.display().to_string();

        let doc = match read_file_bytes(path)
            .map_err(super::Error::from)
            .and_then(|raw| Ok(RuleCodec::decode(&raw)?))
        {
            Ok(v) => v,
            Err(e) => {
                log::warn!("skipping {}: {}", name, e);
                tracker.skipped();
                monitor.on_event(Event::PackageSkipped {
                    package: name,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let package = doc.package_name.clone();

        match should_restore(inspector, &package, opts.restore_system_apps) {
            Ok(Verdict::Apply) => match apply_document(&doc, controller, monitor, cancel) {
                None => return tracker.fail(FailureReason::Cancelled),
                Some(true) => {
                    tracker.failed();
                    monitor.on_event(Event::PackageFailed {
                        package,
                        error: "some components could not be changed".into(),
                    });
                }
                Some(false) => {
                    log::debug!("imported rule of {}", package);
                    tracker.processed();
                    monitor.on_event(Event::PackageProcessed { package });
                }
            },
            Ok(Verdict::Skip(reason)) => {
                log::debug!("skipping {}: {}", package, reason);
                tracker.skipped();
                monitor.on_event(Event::PackageSkipped {
                    package,
                    reason: reason.into(),
                });
            }
            Err(e) => {
                log::error!("failed to look up {}: {}", package, e);
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
    log::info!("import finished: {}", outcome);
    outcome
}
