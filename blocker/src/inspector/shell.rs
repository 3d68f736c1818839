use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use crate::adb::Adb;
use crate::command::quote;
use crate::companion::Companion;
use crate::model::{resolve_class_name, ComponentDescriptor, ComponentType, EnabledState, PackageInfo};

use super::{ComponentListing, PackageDatabase};

lazy_static! {
    static ref RESOLVER_ENTRY: Regex =
        Regex::new(r"^\s+[0-9a-f]+\s+([^\s/]+/\S+)").expect("valid regex");
    static ref PROVIDER_ENTRY: Regex = Regex::new(r"^\s+([^\s/]+/\S+):\s*$").expect("valid regex");
    static ref SERVICE_RECORD: Regex =
        Regex::new(r"ServiceRecord\{[0-9a-f]+ u\d+ ([^\s/]+)/([^\s}]+)\}").expect("valid regex");
    static ref VERSION_CODE: Regex = Regex::new(r"versionCode=(\d+)").expect("valid regex");
    static ref VERSION_NAME: Regex = Regex::new(r"versionName=(\S+)").expect("valid regex");
    static ref CODE_PATH: Regex = Regex::new(r"codePath=(\S+)").expect("valid regex");
    static ref PKG_FLAGS: Regex = Regex::new(r"pkgFlags=\[([^\]]*)\]").expect("valid regex");
    static ref USER_ENABLED: Regex = Regex::new(r"\benabled=(\d+)").expect("valid regex");
}

/// A [PackageDatabase] built from `pm` and `dumpsys` output. The platform
/// only lists components with intent filters in its resolver tables, so the
/// component listing is incomplete unless the companion answers instead.
pub struct ShellPackageDatabase {
    adb: Arc<dyn Adb>,
    user: u32,
    companion: Option<Arc<Companion>>,
}

impl ShellPackageDatabase {
    pub fn new(adb: Arc<dyn Adb>, user: u32) -> Self {
        Self {
            adb,
            user,
            companion: None,
        }
    }

    pub fn with_companion(mut self, companion: Arc<Companion>) -> Self {
        self.companion = Some(companion);
        self
    }

    fn run(&self, cmd: &str) -> crate::Result<String> {
        let out = self.adb.checked_shell(cmd)?.err_on_status()?;
        Ok(out.stdout_utf8_lossy().into_owned())
    }

    fn list_packages(&self, flag: &str) -> crate::Result<String> {
        self.run(&format!("pm list packages {} --user {}", flag, self.user))
    }

    fn dumpsys(&self, package: &str) -> crate::Result<String> {
        self.run(&format!("dumpsys package {}", quote(package)))
    }
}

/// `package:NAME` lines
fn parse_package_names(out: &str) -> HashSet<String> {
    out.lines()
        .filter_map(|l| l.trim().strip_prefix("package:"))
        .filter(|it| !it.is_empty())
        .map(String::from)
        .collect()
}

/// `package:PATH=NAME uid:UID` lines, returning (name, path)
fn parse_package_paths(out: &str) -> Vec<(String, String)> {
    out.lines()
        .filter_map(|l| {
            let l = l.trim().strip_prefix("package:")?;
            let l = match l.split_once(" uid:") {
                Some((before, _)) => before,
                None => l,
            };
            let (path, name) = l.rsplit_once('=')?;
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), path.to_string()))
        })
        .collect()
}

fn leading_ws(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// The package's own block of `dumpsys package` output, without the hidden
/// system package copy that may follow it
fn package_section<'a>(out: &'a str, package: &str) -> Option<&'a str> {
    let header = format!("Package [{package}]");
    let start = out.find(&header)?;
    let rest = &out[start..];
    let end = rest.find("Hidden system packages:").unwrap_or(rest.len());
    Some(&rest[..end])
}

fn parse_package_info(out: &str, package: &str, user: u32) -> Option<PackageInfo> {
    let section = package_section(out, package)?;
    let capture = |re: &Regex| {
        re.captures(section)
            .and_then(|it| it.get(1))
            .map(|it| it.as_str().to_string())
    };

    let is_system = capture(&PKG_FLAGS).map_or(false, |flags| {
        flags.split_whitespace().any(|it| it == "SYSTEM")
    });
    let user_header = format!("User {user}:");
    let enabled = section
        .lines()
        .find(|l| l.trim_start().starts_with(&user_header))
        .and_then(|l| USER_ENABLED.captures(l))
        .and_then(|c| c.get(1))
        // COMPONENT_ENABLED_STATE_DEFAULT and _ENABLED
        .map_or(true, |it| matches!(it.as_str(), "0" | "1"));

    Some(PackageInfo {
        package_name: package.into(),
        version_code: capture(&VERSION_CODE).and_then(|it| it.parse().ok()),
        version_name: capture(&VERSION_NAME),
        is_system,
        enabled,
        code_path: capture(&CODE_PATH),
    })
}

/// The `enabledComponents:`/`disabledComponents:` sets of one user
fn parse_enabled_states(out: &str, package: &str, user: u32) -> HashMap<String, EnabledState> {
    let mut states = HashMap::new();
    let section = match package_section(out, package) {
        Some(v) => v,
        None => return states,
    };
    let user_header = format!("User {user}:");

    let mut user_indent: Option<usize> = None;
    let mut list: Option<(usize, EnabledState)> = None;
    for line in section.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let indent = leading_ws(line);

        match user_indent {
            None => {
                if trimmed.starts_with(&user_header) {
                    user_indent = Some(indent);
                }
                continue;
            }
            Some(ui) if indent <= ui => break,
            Some(_) => {}
        }

        match trimmed {
            "enabledComponents:" => list = Some((indent, EnabledState::Enabled)),
            "disabledComponents:" => list = Some((indent, EnabledState::Disabled)),
            _ => match list {
                Some((li, state)) if indent > li => {
                    states.insert(resolve_class_name(package, trimmed), state);
                }
                _ => list = None,
            },
        }
    }
    states
}

fn resolver_section(kind: ComponentType) -> &'static str {
    match kind {
        ComponentType::Activity => "Activity Resolver Table:",
        ComponentType::Receiver => "Receiver Resolver Table:",
        ComponentType::Service => "Service Resolver Table:",
        ComponentType::Provider => "Registered ContentProviders:",
    }
}

/// Class names of the package's components found in a resolver table, in
/// order of first appearance
fn parse_resolver_components(out: &str, package: &str, kind: ComponentType) -> Vec<String> {
    let header = resolver_section(kind);
    let entry: &Regex = if kind == ComponentType::Provider {
        &PROVIDER_ENTRY
    } else {
        &RESOLVER_ENTRY
    };

    let mut found = Vec::new();
    let mut in_section = false;
    for line in out.lines() {
        if leading_ws(line) == 0 && !line.is_empty() {
            in_section = line.trim_end() == header;
            continue;
        }
        if !in_section {
            continue;
        }
        let caps = match entry.captures(line) {
            Some(v) => v,
            None => continue,
        };
        let flat = match caps.get(1) {
            Some(v) => v.as_str(),
            None => continue,
        };
        if let Some((pkg, cls)) = flat.split_once('/') {
            if pkg != package {
                continue;
            }
            let class = resolve_class_name(pkg, cls);
            if !found.contains(&class) {
                found.push(class);
            }
        }
    }
    found
}

fn parse_running_services(out: &str, package: &str) -> Vec<String> {
    let mut running = Vec::new();
    for caps in SERVICE_RECORD.captures_iter(out) {
        let (pkg, cls) = match (caps.get(1), caps.get(2)) {
            (Some(p), Some(c)) => (p.as_str(), c.as_str()),
            _ => continue,
        };
        if pkg != package {
            continue;
        }
        let class = resolve_class_name(pkg, cls);
        if !running.contains(&class) {
            running.push(class);
        }
    }
    running
}

impl PackageDatabase for ShellPackageDatabase {
    fn installed_packages(&self) -> crate::Result<Vec<PackageInfo>> {
        let all = parse_package_paths(&self.list_packages("-f -U")?);
        let system = parse_package_names(&self.list_packages("-s")?);
        let disabled = parse_package_names(&self.list_packages("-d")?);

        Ok(all
            .into_iter()
            .map(|(name, path)| PackageInfo {
                is_system: system.contains(&name),
                enabled: !disabled.contains(&name),
                code_path: Some(path),
                package_name: name,
                ..Default::default()
            })
            .collect())
    }

    fn package_info(&self, package: &str) -> crate::Result<Option<PackageInfo>> {
        let out = self.dumpsys(package)?;
        Ok(parse_package_info(&out, package, self.user))
    }

    fn components(&self, package: &str, kind: ComponentType) -> crate::Result<ComponentListing> {
        if let Some(companion) = &self.companion {
            match companion.with_client(|c| c.list_components(package, kind)) {
                Ok(components) => {
                    return Ok(ComponentListing {
                        components,
                        complete: true,
                    })
                }
                Err(e) => log::debug!("companion listing of {} failed: {}", package, e),
            }
        }

        let out = self.dumpsys(package)?;
        let states = parse_enabled_states(&out, package, self.user);
        let running: HashSet<String> = if kind == ComponentType::Service {
            self.running_services(package)?.into_iter().collect()
        } else {
            HashSet::new()
        };

        let components = parse_resolver_components(&out, package, kind)
            .into_iter()
            .map(|name| ComponentDescriptor {
                package_name: package.into(),
                enabled_state: states.get(&name).copied().unwrap_or_default(),
                is_running: running.contains(&name),
                // Components with intent filters are exported unless the
                // manifest says otherwise, which this output doesn't show
                exported: kind != ComponentType::Provider,
                name,
                kind,
            })
            .collect();
        Ok(ComponentListing {
            components,
            complete: false,
        })
    }

    fn enabled_states(&self, package: &str) -> crate::Result<HashMap<String, EnabledState>> {
        let out = self.dumpsys(package)?;
        Ok(parse_enabled_states(&out, package, self.user))
    }

    fn running_services(&self, package: &str) -> crate::Result<Vec<String>> {
        let out = self.run(&format!("dumpsys activity services {}", quote(package)))?;
        Ok(parse_running_services(&out, package))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{mock_adb, ok_output, MockAdb};
    use rstest::*;

    const DUMPSYS: &str = "Activity Resolver Table:
  Non-Data Actions:
      android.intent.action.MAIN:
        5f0c1a2 com.example/.MainActivity filter 8d1e3f4
          Action: \"android.intent.action.MAIN\"
        1a2b3c4 com.example/.MainActivity filter 9e8d7c6

Receiver Resolver Table:
  Non-Data Actions:
      android.intent.action.BOOT_COMPLETED:
        7a7a7a7 com.example/com.example.BootReceiver filter 1b1b1b1

Service Resolver Table:
  Non-Data Actions:
      com.example.SYNC:
        2c2c2c2 com.example/.SyncService filter 3d3d3d3

Registered ContentProviders:
  com.example/.DataProvider:
    Provider{4e4e4e4 com.example/.DataProvider}

Packages:
  Package [com.example] (a1b2c3d):
    userId=10123
    codePath=/data/app/~~x==/com.example-1
    versionCode=42 minSdk=21 targetSdk=33
    versionName=1.2.3
    pkgFlags=[ SYSTEM HAS_CODE ALLOW_CLEAR_USER_DATA ]
    User 0: ceDataInode=123 installed=true hidden=false stopped=false enabled=0 instant=false
      disabledComponents:
        com.example.Tracker
        .SyncService
      enabledComponents:
        com.example.BootReceiver
    User 10: ceDataInode=0 installed=true hidden=false stopped=true enabled=3 instant=false
      disabledComponents:
        com.example.MainActivity

Hidden system packages:
  Package [com.example] (f0f0f0f):
    versionCode=1
";

    #[test]
    fn test_parse_package_info() {
        let info = parse_package_info(DUMPSYS, "com.example", 0).expect("installed");
        assert_eq!(info.version_code, Some(42));
        assert_eq!(info.version_name.as_deref(), Some("1.2.3"));
        assert_eq!(info.code_path.as_deref(), Some("/data/app/~~x==/com.example-1"));
        assert!(info.is_system);
        assert!(info.enabled);

        let other_user = parse_package_info(DUMPSYS, "com.example", 10).expect("installed");
        assert!(!other_user.enabled);

        assert!(parse_package_info("Unable to find package: com.gone\n", "com.gone", 0).is_none());
    }

    #[test]
    fn test_parse_enabled_states() {
        let states = parse_enabled_states(DUMPSYS, "com.example", 0);
        assert_eq!(states.len(), 3);
        assert_eq!(states["com.example.Tracker"], EnabledState::Disabled);
        assert_eq!(states["com.example.SyncService"], EnabledState::Disabled);
        assert_eq!(states["com.example.BootReceiver"], EnabledState::Enabled);

        let states = parse_enabled_states(DUMPSYS, "com.example", 10);
        assert_eq!(states.len(), 1);
        assert_eq!(states["com.example.MainActivity"], EnabledState::Disabled);
    }

    #[rstest]
    #[case(ComponentType::Activity, &["com.example.MainActivity"])]
    #[case(ComponentType::Receiver, &["com.example.BootReceiver"])]
    #[case(ComponentType::Service, &["com.example.SyncService"])]
    #[case(ComponentType::Provider, &["com.example.DataProvider"])]
    fn test_parse_resolver_components(#[case] kind: ComponentType, #[case] expected: &[&str]) {
        assert_eq!(
            parse_resolver_components(DUMPSYS, "com.example", kind),
            expected
        );
    }

    #[test]
    fn test_parse_running_services() {
        let out = "ACTIVITY MANAGER SERVICES (dumpsys activity services)
  User 0 active services:
  * ServiceRecord{abc123 u0 com.example/.SyncService}
    intent={cmp=com.example/.SyncService}
  * ServiceRecord{def456 u0 com.other/.Thing}
";
        assert_eq!(
            parse_running_services(out, "com.example"),
            vec!["com.example.SyncService"]
        );
    }

    #[rstest]
    fn test_installed_packages(mut mock_adb: MockAdb) {
        mock_adb.expect_shell().returning(|cmd| {
            Ok(ok_output(match cmd {
                "pm list packages -f -U --user 0" => {
                    "package:/data/app/~~a==/com.example-b==/base.apk=com.example uid:10123\n\
                     package:/system/priv-app/Phone/Phone.apk=com.android.phone uid:1001\n"
                }
                "pm list packages -s --user 0" => "package:com.android.phone\n",
                "pm list packages -d --user 0" => "package:com.example\n",
                _ => panic!("unexpected command {cmd}"),
            }))
        });
        let db = ShellPackageDatabase::new(Arc::new(mock_adb), 0);
        let pkgs = db.installed_packages().expect("packages");
        assert_eq!(pkgs.len(), 2);
        assert_eq!(pkgs[0].package_name, "com.example");
        assert_eq!(
            pkgs[0].code_path.as_deref(),
            Some("/data/app/~~a==/com.example-b==/base.apk")
        );
        assert!(!pkgs[0].enabled);
        assert!(!pkgs[0].is_system);
        assert!(pkgs[1].is_system);
    }

    #[rstest]
    fn test_components_listing_is_incomplete(mut mock_adb: MockAdb) {
        mock_adb.expect_shell().returning(|cmd| {
            Ok(ok_output(if cmd.starts_with("dumpsys package") {
                DUMPSYS
            } else {
                "  * ServiceRecord{abc123 u0 com.example/.SyncService}\n"
            }))
        });
        let db = ShellPackageDatabase::new(Arc::new(mock_adb), 0);
        let listing = db
            .components("com.example", ComponentType::Service)
            .expect("listing");
        assert!(!listing.complete);
        assert_eq!(listing.components.len(), 1);
        let svc = &listing.components[0];
        assert!(svc.is_running);
        assert_eq!(svc.enabled_state, EnabledState::Disabled);
    }
}
