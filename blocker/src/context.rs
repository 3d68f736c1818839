use std::env;
use std::ops::DerefMut;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use blanket::blanket;
use directories::BaseDirs;
use once_cell::sync::OnceCell;
use which::{which, which_in};

use crate::config::{Config, Settings};
use crate::controller::ControllerKind;
use crate::utils::ensure_dir_exists;
use crate::Error;

pub const CONFIG_ENV: &str = "BLOCKER_CONFIG";
pub const PATH_ENV: &str = "BLOCKER_PATH";
pub const CONTROLLER_ENV: &str = "BLOCKER_CONTROLLER";
pub const BACKUP_DIR_ENV: &str = "BLOCKER_BACKUP_DIR";
pub const COMPANION_PORT_ENV: &str = "BLOCKER_COMPANION_PORT";

#[derive(Clone)]
struct CachedBin {
    name: String,
    path: String,
}

fn wrapped_which(bin: &str) -> Option<PathBuf> {
    if let Ok(search_path) = env::var(PATH_ENV) {
        let cwd = env::current_dir().ok()?;
        return which_in(bin, Some(&search_path), &cwd).ok();
    }
    which(bin).ok()
}

#[inline(always)]
fn find_program(prog: &str) -> Option<String> {
    wrapped_which(prog).map(|it| it.to_string_lossy().into())
}

/// Context is a trait for an object that can help standardize file locations,
/// find binaries, lookup env vars and hand out the current [Settings].
///
/// Most methods on this trait have a default implementation that is perfectly
/// safe to leave unchanged.
#[blanket(derive(Ref, Box))]
pub trait Context: Send + Sync {
    /// The configuration file contents with the environment overrides
    /// applied
    fn get_settings(&self) -> crate::Result<Settings>;

    fn maybe_get_env(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn maybe_get_bin(&self, bin: &str) -> Option<String> {
        find_program(bin)
    }

    fn has_bin(&self, bin: &str) -> bool {
        self.maybe_get_bin(bin).is_some()
    }

    fn get_bin(&self, bin: &str) -> crate::Result<String> {
        self.maybe_get_bin(bin)
            .ok_or_else(|| Error::MissingBin(bin.into()))
    }

    fn has_env(&self, key: &str) -> bool {
        self.maybe_get_env(key).is_some()
    }

    fn get_env(&self, key: &str) -> crate::Result<String> {
        self.maybe_get_env(key)
            .ok_or_else(|| Error::MissingEnv(key.into()))
    }

    fn get_config_file(&self) -> crate::Result<PathBuf> {
        if let Some(path) = self.maybe_get_env(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        Ok(self.get_user_config_dir()?.join("blocker.toml"))
    }

    /// Where pulled archives and other scratch files go
    fn get_cache_dir(&self) -> crate::Result<PathBuf> {
        let bd = BaseDirs::new().ok_or(Error::NoBaseDirs)?;
        let cache = bd.cache_dir().join("blocker");
        ensure_dir_exists(&cache)?;
        Ok(cache)
    }

    fn get_cache_dir_child(&self, child: &str) -> crate::Result<PathBuf> {
        let dir = self.get_cache_dir()?.join(child);
        ensure_dir_exists(&dir)?;
        Ok(dir)
    }

    fn get_user_local_dir(&self) -> crate::Result<PathBuf> {
        let bd = BaseDirs::new().ok_or(Error::NoBaseDirs)?;
        Ok(bd.data_local_dir().join("blocker"))
    }

    fn get_user_config_dir(&self) -> crate::Result<PathBuf> {
        let bd = BaseDirs::new().ok_or(Error::NoBaseDirs)?;
        Ok(bd.config_dir().join("blocker"))
    }
}

/// Apply the `BLOCKER_*` environment overrides on top of file settings
pub fn apply_env_overrides(ctx: &dyn Context, settings: &mut Settings) -> crate::Result<()> {
    if let Some(serial) = ctx.maybe_get_env("ANDROID_SERIAL") {
        if settings.device.serial.is_none() {
            settings.device.serial = Some(serial);
        }
    }

    if let Some(kind) = ctx.maybe_get_env(CONTROLLER_ENV) {
        settings.controller_kind = ControllerKind::from_str(&kind)
            .map_err(|_| Error::InvalidEnv(CONTROLLER_ENV.into(), kind))?;
    }

    if let Some(dir) = ctx.maybe_get_env(BACKUP_DIR_ENV) {
        settings.rules.backup_location = Some(PathBuf::from(dir));
    }

    if let Some(port) = ctx.maybe_get_env(COMPANION_PORT_ENV) {
        settings.companion.port = u16::from_str(&port)
            .map_err(|_| Error::InvalidEnv(COMPANION_PORT_ENV.into(), port))?;
    }

    Ok(())
}

pub struct DefaultContext {
    bin_cache: Mutex<Vec<CachedBin>>,
    config: OnceCell<Option<Config>>,
}

impl Clone for DefaultContext {
    fn clone(&self) -> Self {
        let cache = match self.bin_cache.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => Vec::new(),
        };
        Self {
            bin_cache: Mutex::new(cache),
            config: self.config.clone(),
        }
    }
}

impl DefaultContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The parsed configuration file, `None` if there isn't one
    pub fn get_config(&self) -> crate::Result<Option<&Config>> {
        let cfg = self
            .config
            .get_or_try_init(|| -> crate::Result<Option<Config>> {
                let path = self.get_config_file()?;
                if !path.exists() {
                    log::debug!("no configuration file at {}", path.to_string_lossy());
                    Ok(None)
                } else {
                    Ok(Some(Config::parse(&path)?))
                }
            })?;
        Ok(cfg.as_ref())
    }
}

impl Default for DefaultContext {
    fn default() -> Self {
        Self {
            bin_cache: Mutex::new(Vec::new()),
            config: OnceCell::new(),
        }
    }
}

impl Context for DefaultContext {
    fn get_settings(&self) -> crate::Result<Settings> {
        let mut settings = match self.get_config()? {
            Some(cfg) => Settings::from_config(cfg)?,
            None => Settings::default(),
        };
        apply_env_overrides(self, &mut settings)?;
        Ok(settings)
    }

    fn maybe_get_bin(&self, prog: &str) -> Option<String> {
        let mut cache_guard = match self.bin_cache.lock() {
            Ok(guard) => guard,
            Err(_) => return find_program(prog),
        };
        let cache = cache_guard.deref_mut();
        if let Some(val) = cache.iter().find(|it| it.name == prog) {
            return Some(val.path.clone());
        }

        let found = find_program(prog)?;

        cache.push(CachedBin {
            name: prog.into(),
            path: found.clone(),
        });

        Some(found)
    }
}
