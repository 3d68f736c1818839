use std::borrow::Cow;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use toml::{Table, Value};

use crate::controller::ControllerKind;
use crate::utils::read_file;

pub const DEFAULT_HOST_PACKAGE: &str = "com.merxury.blocker";
pub const DEFAULT_IFW_DIR: &str = "/data/system/ifw";
pub const DEFAULT_COMPANION_PORT: u16 = 52099;
pub const DEFAULT_COMPANION_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_WORKER_THREADS: usize = 2;

#[derive(Debug)]
pub enum Error {
    InvalidType,
    MissingKey,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::InvalidType => "InvalidType",
                Self::MissingKey => "MissingKey",
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub struct ConfigMap<'c> {
    path: &'c Path,
    name: Option<Cow<'c, str>>,
    table: &'c Table,
}

#[derive(Clone, Debug)]
pub struct Config {
    path: PathBuf,
    base: Table,
}

impl Config {
    pub fn parse(source: &Path) -> crate::Result<Self> {
        let as_str = read_file(source)?;
        Self::parse_str(source, &as_str)
    }

    pub fn parse_str(source: &Path, content: &str) -> crate::Result<Self> {
        let base: Table = match toml::from_str(content) {
            Ok(v) => v,
            Err(e) => return Err(crate::Error::new_cfg(source, &e)),
        };
        Ok(Self {
            base,
            path: PathBuf::from(source),
        })
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    pub fn get_map(&self) -> ConfigMap {
        ConfigMap {
            name: None,
            path: &self.path,
            table: &self.base,
        }
    }
}

impl<'c> ConfigMap<'c> {
    fn get_full_path(&self) -> Option<&str> {
        self.name.as_ref().map(|it| it.as_ref())
    }

    fn key_path<'a>(&self, key: &'a str) -> Cow<'a, str> {
        match self.get_full_path() {
            None => Cow::Borrowed(key),
            Some(v) => Cow::Owned(format!("{}.{}", v, key)),
        }
    }

    /// Helper to create a crate::Error for an invalid key
    pub fn invalid_key(&self, key: &str, expected: &str) -> crate::Error {
        let path = self.key_path(key);
        crate::Error::new_cfg(
            self.path,
            &format!(
                "invalid value for key: {} (expected type: {})",
                path, expected
            ),
        )
    }

    pub fn has(&self, key: &str) -> bool {
        self.table.contains_key(key)
    }

    fn get(&self, key: &str) -> Option<&'c Value> {
        self.table.get(key)
    }

    pub fn maybe_get_int(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key) {
            Some(v) => v.as_integer().map(Some).ok_or(Error::InvalidType),
            None => Ok(None),
        }
    }

    pub fn maybe_get_int_typecheck(&self, key: &str) -> crate::Result<Option<i64>> {
        self.maybe_get_int(key)
            .map_err(|_| self.invalid_key(key, "int"))
    }

    pub fn get_str(&self, key: &str) -> Result<&'c str> {
        self.maybe_get_str(key)?.ok_or(Error::MissingKey)
    }

    pub fn maybe_get_str(&self, key: &str) -> Result<Option<&'c str>> {
        match self.get(key) {
            Some(v) => v.as_str().map(Some).ok_or(Error::InvalidType),
            None => Ok(None),
        }
    }

    pub fn maybe_get_str_typecheck(&self, key: &str) -> crate::Result<Option<&'c str>> {
        self.maybe_get_str(key)
            .map_err(|_| self.invalid_key(key, "string"))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.get(key)
            .ok_or(Error::MissingKey)?
            .as_bool()
            .ok_or(Error::InvalidType)
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        self.get(key)
            .ok_or(Error::MissingKey)?
            .as_integer()
            .ok_or(Error::InvalidType)
    }

    /// Returns the value for `key`, `default` if it is missing and an error
    /// if it is present with the wrong type
    pub fn get_bool_or_typecheck(&self, key: &str, default: bool) -> crate::Result<bool> {
        match self.get_bool(key) {
            Ok(v) => Ok(v),
            Err(Error::MissingKey) => Ok(default),
            Err(Error::InvalidType) => Err(self.invalid_key(key, "bool")),
        }
    }

    pub fn maybe_get_map(&'c self, key: &'c str) -> Result<Option<ConfigMap<'c>>> {
        match self.get(key) {
            Some(v) => match v.as_table() {
                Some(table) => {
                    let name = match &self.get_full_path() {
                        Some(parents) => Cow::Owned(format!("{parents}.{key}")),
                        None => Cow::Borrowed(key),
                    };
                    Ok(Some(Self {
                        name: Some(name),
                        path: self.path,
                        table,
                    }))
                }
                None => Err(Error::InvalidType),
            },
            None => Ok(None),
        }
    }

    pub fn get_map(&'c self, key: &'c str) -> Result<ConfigMap<'c>> {
        self.maybe_get_map(key)?.ok_or(Error::MissingKey)
    }

    pub fn maybe_get_map_typecheck(&'c self, key: &'c str) -> crate::Result<Option<ConfigMap<'c>>> {
        self.maybe_get_map(key)
            .map_err(|_| self.invalid_key(key, "table"))
    }
}

/// How the tool reaches the device
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceSettings {
    pub serial: Option<String>,
    pub adb: Option<String>,
    /// Android user id passed to `pm --user`
    pub user: u32,
    /// The package that hosts this tool on the device, never exported or
    /// imported
    pub host_package: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            serial: None,
            adb: None,
            user: 0,
            host_package: DEFAULT_HOST_PACKAGE.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleSettings {
    pub backup_location: Option<PathBuf>,
    /// Import rules for system applications too
    pub restore_system_apps: bool,
    /// Leave system applications out of exports
    pub skip_system_apps: bool,
    /// Device directory the intent firewall reads its rules from
    pub ifw_dir: String,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            backup_location: None,
            restore_system_apps: false,
            skip_system_apps: true,
            ifw_dir: DEFAULT_IFW_DIR.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompanionSettings {
    pub package: String,
    pub port: u16,
    /// Bound on connecting and on every read or write
    pub timeout: Duration,
}

impl Default for CompanionSettings {
    fn default() -> Self {
        Self {
            package: DEFAULT_HOST_PACKAGE.into(),
            port: DEFAULT_COMPANION_PORT,
            timeout: DEFAULT_COMPANION_TIMEOUT,
        }
    }
}

/// Everything a caller may configure, as plain data
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub device: DeviceSettings,
    pub controller_kind: ControllerKind,
    pub rules: RuleSettings,
    pub companion: CompanionSettings,
    pub worker_threads: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device: DeviceSettings::default(),
            controller_kind: ControllerKind::default(),
            rules: RuleSettings::default(),
            companion: CompanionSettings::default(),
            worker_threads: DEFAULT_WORKER_THREADS,
        }
    }
}

impl Settings {
    /// Build settings from a parsed configuration file:
    ///
    /// [device]
    /// serial = "emulator-5554"
    /// adb = "/opt/android/platform-tools/adb"
    /// user = 0
    /// host-package = "com.merxury.blocker"
    ///
    /// [controller]
    /// kind = "ifw"  # pm | ifw | binder
    ///
    /// [rules]
    /// backup-location = "/home/me/blocker-rules"
    /// restore-system-apps = false
    /// skip-system-apps = true
    /// ifw-dir = "/data/system/ifw"
    ///
    /// [companion]
    /// package = "com.merxury.blocker"
    /// port = 52099
    /// timeout-ms = 5000
    ///
    /// [tasks]
    /// worker-threads = 2
    pub fn from_config(cfg: &Config) -> crate::Result<Self> {
        let map = cfg.get_map();
        let mut settings = Self::default();

        if let Some(device) = map.maybe_get_map_typecheck("device")? {
            settings.device.serial = device.maybe_get_str_typecheck("serial")?.map(String::from);
            settings.device.adb = device.maybe_get_str_typecheck("adb")?.map(String::from);
            if let Some(user) = device.maybe_get_int_typecheck("user")? {
                settings.device.user =
                    u32::try_from(user).map_err(|_| device.invalid_key("user", "u32"))?;
            }
            if let Some(host) = device.maybe_get_str_typecheck("host-package")? {
                settings.device.host_package = host.into();
            }
        }

        if let Some(controller) = map.maybe_get_map_typecheck("controller")? {
            if let Some(kind) = controller.maybe_get_str_typecheck("kind")? {
                settings.controller_kind = ControllerKind::from_str(kind)
                    .map_err(|_| controller.invalid_key("kind", "pm | ifw | binder"))?;
            }
        }

        if let Some(rules) = map.maybe_get_map_typecheck("rules")? {
            settings.rules.backup_location = rules
                .maybe_get_str_typecheck("backup-location")?
                .map(PathBuf::from);
            settings.rules.restore_system_apps =
                rules.get_bool_or_typecheck("restore-system-apps", false)?;
            settings.rules.skip_system_apps =
                rules.get_bool_or_typecheck("skip-system-apps", true)?;
            if let Some(dir) = rules.maybe_get_str_typecheck("ifw-dir")? {
                settings.rules.ifw_dir = dir.into();
            }
        }

        if let Some(companion) = map.maybe_get_map_typecheck("companion")? {
            if let Some(package) = companion.maybe_get_str_typecheck("package")? {
                settings.companion.package = package.into();
            }
            if let Some(port) = companion.maybe_get_int_typecheck("port")? {
                settings.companion.port =
                    u16::try_from(port).map_err(|_| companion.invalid_key("port", "u16"))?;
            }
            if let Some(ms) = companion.maybe_get_int_typecheck("timeout-ms")? {
                settings.companion.timeout = u64::try_from(ms)
                    .ok()
                    .filter(|it| *it > 0)
                    .map(Duration::from_millis)
                    .ok_or_else(|| companion.invalid_key("timeout-ms", "positive int"))?;
            }
        }

        if let Some(tasks) = map.maybe_get_map_typecheck("tasks")? {
            if let Some(threads) = tasks.maybe_get_int_typecheck("worker-threads")? {
                settings.worker_threads = usize::try_from(threads)
                    .ok()
                    .filter(|it| *it > 0)
                    .ok_or_else(|| tasks.invalid_key("worker-threads", "positive int"))?;
            }
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod test {

    use crate::testing::{global_tmp_context, TestContext};
    use std::fs;

    use super::*;
    use rstest::*;

    #[fixture]
    #[once]
    fn cfg_file(global_tmp_context: &TestContext) -> PathBuf {
        let path = global_tmp_context.get_temp_dir();
        fs::create_dir_all(&path).expect("create tmp dir");
        let file = path.join("blocker.toml");

        let content = r#"
[device]
serial = "emulator-5554"
user = 10

[controller]
kind = "pm"

[rules]
backup-location = "/tmp/rules"
restore-system-apps = true

[companion]
port = 40000
timeout-ms = 1500
"#;

        fs::write(&file, content).expect("failed to write test config");
        file
    }

    #[rstest]
    fn test_config_map(cfg_file: &PathBuf) {
        let cfg = Config::parse(cfg_file).expect("parse config");
        let map = cfg.get_map();
        let device = map.get_map("device").expect("getting device");
        assert_eq!(device.get_str("serial").expect("serial"), "emulator-5554");
        assert_eq!(device.get_int("user").expect("user"), 10);
        assert!(device.get_str("ohno").is_err());
        assert!(matches!(device.get_bool("serial"), Err(Error::InvalidType)));
    }

    #[rstest]
    fn test_settings_from_config(cfg_file: &PathBuf) {
        let cfg = Config::parse(cfg_file).expect("parse config");
        let settings = Settings::from_config(&cfg).expect("settings");
        assert_eq!(settings.device.serial.as_deref(), Some("emulator-5554"));
        assert_eq!(settings.device.user, 10);
        assert_eq!(settings.device.host_package, DEFAULT_HOST_PACKAGE);
        assert_eq!(settings.controller_kind, ControllerKind::PackageManager);
        assert_eq!(
            settings.rules.backup_location,
            Some(PathBuf::from("/tmp/rules"))
        );
        assert!(settings.rules.restore_system_apps);
        assert!(settings.rules.skip_system_apps);
        assert_eq!(settings.rules.ifw_dir, DEFAULT_IFW_DIR);
        assert_eq!(settings.companion.port, 40000);
        assert_eq!(settings.companion.timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_settings_invalid_values() {
        let path = Path::new("inline.toml");
        let cfg = Config::parse_str(path, "[controller]\nkind = \"magic\"\n").expect("parse");
        assert!(matches!(
            Settings::from_config(&cfg),
            Err(crate::Error::InvalidConfig(_, _))
        ));

        let cfg = Config::parse_str(path, "[companion]\nport = 70000\n").expect("parse");
        assert!(Settings::from_config(&cfg).is_err());

        let cfg = Config::parse_str(path, "[companion]\ntimeout-ms = 0\n").expect("parse");
        assert!(Settings::from_config(&cfg).is_err());

        assert!(Config::parse_str(path, "[device\n").is_err());
    }
}
