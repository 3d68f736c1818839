use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tempfile::NamedTempFile;

use crate::adb::Adb;
use crate::command::{quote, CmdOutput};
use crate::root::RootCapability;
use crate::utils::{ensure_dir_exists, remove_file_if_exists, write_file_atomic};

use super::{package_of_rule_file, rule_file_name, FirewallRule, StorageError};

const DEVICE_STAGING_DIR: &str = "/data/local/tmp";

pub trait FirewallRuleStore: Send + Sync {
    /// The package's rule, empty if it has no rule file
    fn load(&self, package: &str) -> Result<FirewallRule, StorageError>;

    /// Replace the package's rule file. Saving an empty rule removes the
    /// file.
    fn save(&self, rule: &FirewallRule) -> Result<(), StorageError>;

    /// Remove the package's rule file, returning whether one existed
    fn delete(&self, package: &str) -> Result<bool, StorageError>;

    /// Every package with a rule file
    fn list_all(&self) -> Result<Vec<String>, StorageError>;
}

/// One lock per package name. Different packages never wait on each other.
#[derive(Default)]
pub struct PackageLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PackageLocks {
    pub fn get(&self, package: &str) -> Arc<Mutex<()>> {
        let mut guard = match self.locks.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(guard.entry(package.to_string()).or_default())
    }
}

/// Lock a package lock, ignoring poisoning since the guarded data is `()`
pub fn lock_package(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    match lock.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Rule files in a directory on this machine
pub struct LocalRuleStore {
    dir: PathBuf,
    locks: PackageLocks,
}

impl LocalRuleStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            locks: PackageLocks::default(),
        }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path(&self, package: &str) -> PathBuf {
        self.dir.join(rule_file_name(package))
    }
}

impl FirewallRuleStore for LocalRuleStore {
    fn load(&self, package: &str) -> Result<FirewallRule, StorageError> {
        let lock = self.locks.get(package);
        let raw = {
            let _guard = lock_package(&lock);
            match fs::read(self.path(package)) {
                Ok(v) => v,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(FirewallRule::new(package)),
                Err(e) => return Err(e.into()),
            }
        };
        FirewallRule::from_xml(package, &raw)
    }

    fn save(&self, rule: &FirewallRule) -> Result<(), StorageError> {
        if rule.is_empty() {
            self.delete(rule.package())?;
            return Ok(());
        }
        let content = rule.to_xml()?;
        ensure_dir_exists(&self.dir)
            .map_err(|e| StorageError::Unwritable(format!("{}: {}", self.dir.display(), e)))?;

        let lock = self.locks.get(rule.package());
        let _guard = lock_package(&lock);
        write_file_atomic(&self.path(rule.package()), &content).map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => {
                StorageError::Unwritable(format!("{}: {}", self.dir.display(), e))
            }
            _ => StorageError::Io(e),
        })
    }

    fn delete(&self, package: &str) -> Result<bool, StorageError> {
        let lock = self.locks.get(package);
        let _guard = lock_package(&lock);
        Ok(remove_file_if_exists(&self.path(package))?)
    }

    fn list_all(&self) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut packages = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(pkg) = name.to_str().and_then(package_of_rule_file) {
                packages.push(pkg.to_string());
            }
        }
        packages.sort();
        Ok(packages)
    }
}

/// Rule files in the device's rule directory, accessed through a root shell
pub struct DeviceRuleStore {
    adb: Arc<dyn Adb>,
    root: Arc<RootCapability>,
    dir: String,
    local_tmp: PathBuf,
    locks: PackageLocks,
}

fn is_missing(out: &CmdOutput) -> bool {
    out.combined_output().contains("No such file")
}

fn command_failed(out: &CmdOutput) -> StorageError {
    StorageError::Base(crate::Error::CommandError(
        out.status.code().unwrap_or(-1),
        out.combined_output().trim().to_string(),
    ))
}

impl DeviceRuleStore {
    /// `local_tmp` is a directory on this machine used to stage files before
    /// they are pushed
    pub fn new(adb: Arc<dyn Adb>, root: Arc<RootCapability>, dir: &str, local_tmp: PathBuf) -> Self {
        Self {
            adb,
            root,
            dir: dir.trim_end_matches('/').to_string(),
            local_tmp,
            locks: PackageLocks::default(),
        }
    }

    fn path(&self, package: &str) -> String {
        format!("{}/{}", self.dir, rule_file_name(package))
    }

    fn root_shell(&self, cmd: &str) -> Result<CmdOutput, StorageError> {
        self.root.require()?;
        let out = self.adb.root_shell(cmd)?;
        crate::adb::check_adb_stderr(&out)?;
        Ok(out)
    }

    fn push_staged(&self, package: &str, content: &[u8]) -> Result<String, StorageError> {
        ensure_dir_exists(&self.local_tmp)?;
        let mut tmp = NamedTempFile::new_in(&self.local_tmp)?;
        tmp.write_all(content)?;
        tmp.flush()?;

        let staged = format!("{}/blocker-{}", DEVICE_STAGING_DIR, rule_file_name(package));
        let local = tmp.path().to_string_lossy().into_owned();
        log::debug!("pushing rule for {} to {}", package, staged);
        let out = self.adb.push(&local, &staged)?;
        crate::adb::check_adb_stderr(&out)?;
        out.err_on_status()?;
        Ok(staged)
    }
}

impl FirewallRuleStore for DeviceRuleStore {
    fn load(&self, package: &str) -> Result<FirewallRule, StorageError> {
        let lock = self.locks.get(package);
        let out = {
            let _guard = lock_package(&lock);
            self.root_shell(&format!("cat {}", quote(&self.path(package))))?
        };
        if !out.ok() {
            if is_missing(&out) {
                return Ok(FirewallRule::new(package));
            }
            return Err(command_failed(&out));
        }
        FirewallRule::from_xml(package, &out.stdout)
    }

    fn save(&self, rule: &FirewallRule) -> Result<(), StorageError> {
        if rule.is_empty() {
            self.delete(rule.package())?;
            return Ok(());
        }
        let content = rule.to_xml()?;
        let package = rule.package();

        let lock = self.locks.get(package);
        let _guard = lock_package(&lock);
        let staged = self.push_staged(package, &content)?;

        let target = self.path(package);
        let tmp_target = format!("{}/.{}.tmp", self.dir, rule_file_name(package));
        let cmd = format!(
            "cp {staged} {tmp} && chmod 644 {tmp} && mv {tmp} {target}; rc=$?; rm -f {staged}; exit $rc",
            staged = quote(&staged),
            tmp = quote(&tmp_target),
            target = quote(&target),
        );
        let out = self.root_shell(&cmd)?;
        if !out.ok() {
            return Err(StorageError::Unwritable(format!(
                "{}: {}",
                self.dir,
                out.combined_output().trim()
            )));
        }
        Ok(())
    }

    fn delete(&self, package: &str) -> Result<bool, StorageError> {
        let lock = self.locks.get(package);
        let _guard = lock_package(&lock);
        let out = self.root_shell(&format!("rm {}", quote(&self.path(package))))?;
        if out.ok() {
            return Ok(true);
        }
        if is_missing(&out) {
            return Ok(false);
        }
        Err(command_failed(&out))
    }

    fn list_all(&self) -> Result<Vec<String>, StorageError> {
        let out = self.root_shell(&format!("ls {}", quote(&self.dir)))?;
        if !out.ok() {
            if is_missing(&out) {
                return Ok(Vec::new());
            }
            return Err(command_failed(&out));
        }
        let mut packages: Vec<String> = out
            .stdout_utf8_lossy()
            .split_whitespace()
            .filter_map(package_of_rule_file)
            .map(String::from)
            .collect();
        packages.sort();
        Ok(packages)
    }
}
