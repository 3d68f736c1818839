use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use crate::adb::Adb;
use crate::command::{quote, CmdOutput};
use crate::model::{ComponentName, EnabledState};
use crate::root::RootCapability;

use super::{ComponentController, ControlError, ControlResult};

lazy_static! {
    static ref NEW_STATE: Regex =
        Regex::new(r"new state:\s*(enabled|disabled|default)").expect("valid regex");
    static ref ENABLED_SETTING: Regex =
        Regex::new(r"^\s*(\d+)\s*$").expect("valid regex");
}

/// Flips the platform's own enabled flag with `pm enable|disable`. Each call
/// changes exactly one component.
pub struct PackageManagerController {
    adb: Arc<dyn Adb>,
    root: Arc<RootCapability>,
    user: u32,
}

impl PackageManagerController {
    pub fn new(adb: Arc<dyn Adb>, root: Arc<RootCapability>, user: u32) -> Self {
        Self { adb, root, user }
    }

    fn shell(&self, cmd: &str) -> ControlResult<CmdOutput> {
        let out = if self.root.is_granted() {
            self.adb.root_shell(cmd)?
        } else {
            self.adb.shell(cmd)?
        };
        crate::adb::check_adb_stderr(&out)?;
        Ok(out)
    }

    /// The platform's enabled setting for the component
    pub fn enabled_setting(&self, component: &ComponentName) -> ControlResult<EnabledState> {
        // `pm` has no getter, but the package service answers through `cmd`
        let cmd = format!(
            "cmd package get-component-enabled-setting --user {} {}",
            self.user,
            quote(&component.flatten())
        );
        let out = self.shell(&cmd)?;
        classify_failure(&out, component)?;
        parse_enabled_setting(&out.stdout_utf8_lossy()).ok_or_else(|| {
            ControlError::Unexpected(format!(
                "unexpected output for {}: {}",
                component,
                out.combined_output().trim()
            ))
        })
    }
}

/// Map `pm` output to the error it represents. `pm` often reports failures
/// with a zero status, so the text is checked regardless.
fn classify_failure(out: &CmdOutput, component: &ComponentName) -> ControlResult<()> {
    let text = out.combined_output();
    if text.contains("SecurityException") || text.contains("Permission Denial") {
        return Err(ControlError::PermissionDenied(component.flatten()));
    }
    if text.contains("Unknown component")
        || text.contains("Unknown package")
        || text.contains("not found")
        || text.contains("does not exist")
    {
        return Err(ControlError::NotFound(component.flatten()));
    }
    if !out.ok() || text.contains("Exception") || text.starts_with("Error") {
        return Err(ControlError::Unexpected(format!(
            "{}: {}",
            component,
            text.trim()
        )));
    }
    Ok(())
}

/// The setting as printed by `get-component-enabled-setting`, either a
/// bare number or a `... new state: x` line
fn parse_enabled_setting(out: &str) -> Option<EnabledState> {
    for line in out.lines() {
        if let Some(caps) = NEW_STATE.captures(line) {
            return match caps.get(1)?.as_str() {
                "enabled" => Some(EnabledState::Enabled),
                "disabled" => Some(EnabledState::Disabled),
                _ => Some(EnabledState::Default),
            };
        }
        if let Some(caps) = ENABLED_SETTING.captures(line) {
            // COMPONENT_ENABLED_STATE_* constants
            return match caps.get(1)?.as_str() {
                "0" => Some(EnabledState::Default),
                "1" => Some(EnabledState::Enabled),
                _ => Some(EnabledState::Disabled),
            };
        }
    }
    None
}

impl ComponentController for PackageManagerController {
    fn set_enabled(&self, component: &ComponentName, enabled: bool) -> ControlResult<()> {
        let verb = if enabled { "enable" } else { "disable" };
        let cmd = format!(
            "pm {} --user {} {}",
            verb,
            self.user,
            quote(&component.flatten())
        );
        let out = self.shell(&cmd)?;
        classify_failure(&out, component)?;
        log::debug!("{} {}", verb, component);
        Ok(())
    }

    fn check_enabled(&self, component: &ComponentName) -> ControlResult<bool> {
        // Default means the manifest decides and the manifest default is on
        Ok(self.enabled_setting(component)? != EnabledState::Disabled)
    }

    fn name(&self) -> &'static str {
        "pm"
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::ComponentType;
    use crate::testing::{mock_adb, ok_output, output, MockAdb};
    use mockall::predicate::eq;
    use rstest::*;

    fn svc() -> ComponentName {
        ComponentName::new("com.a", ".Sync", ComponentType::Service)
    }

    #[rstest]
    fn test_disable_with_root(mut mock_adb: MockAdb) {
        mock_adb
            .expect_shell()
            .with(eq("su -c 'pm disable --user 0 '\"'\"'com.a/com.a.Sync'\"'\"''"))
            .times(1)
            .returning(|_| {
                Ok(ok_output(
                    "Component {com.a/com.a.Sync} new state: disabled\n",
                ))
            });
        let ctrl =
            PackageManagerController::new(Arc::new(mock_adb), Arc::new(RootCapability::fixed(true)), 0);
        ctrl.set_enabled(&svc(), false).expect("disable");
    }

    #[rstest]
    fn test_idempotent_enable(mut mock_adb: MockAdb) {
        mock_adb
            .expect_shell()
            .with(eq("pm enable --user 10 'com.a/com.a.Sync'"))
            .times(2)
            .returning(|_| {
                Ok(ok_output(
                    "Component {com.a/com.a.Sync} new state: enabled\n",
                ))
            });
        let ctrl = PackageManagerController::new(
            Arc::new(mock_adb),
            Arc::new(RootCapability::fixed(false)),
            10,
        );
        ctrl.set_enabled(&svc(), true).expect("first");
        ctrl.set_enabled(&svc(), true).expect("second");
    }

    #[rstest]
    #[case(
        ok_output("java.lang.SecurityException: Permission Denial: attempt to change component state"),
        "denied"
    )]
    #[case(output(255, "", "Error: Unknown component: com.a/com.a.Sync"), "missing")]
    #[case(output(1, "", "Error: something odd"), "unexpected")]
    fn test_classify(mut mock_adb: MockAdb, #[case] out: CmdOutput, #[case] expected: &str) {
        let out = std::sync::Mutex::new(Some(out));
        mock_adb.expect_shell().returning(move |_| {
            Ok(out.lock().expect("lock").take().expect("called once"))
        });
        let ctrl = PackageManagerController::new(
            Arc::new(mock_adb),
            Arc::new(RootCapability::fixed(false)),
            0,
        );
        let res = ctrl.set_enabled(&svc(), false);
        match expected {
            "denied" => assert!(matches!(res, Err(ControlError::PermissionDenied(_)))),
            "missing" => assert!(matches!(res, Err(ControlError::NotFound(_)))),
            _ => assert!(matches!(res, Err(ControlError::Unexpected(_)))),
        }
    }

    #[rstest]
    #[case("2\n", Some(EnabledState::Disabled))]
    #[case("0", Some(EnabledState::Default))]
    #[case("1\n", Some(EnabledState::Enabled))]
    #[case("Component {a/b} new state: disabled", Some(EnabledState::Disabled))]
    #[case("garbage", None)]
    fn test_parse_enabled_setting(#[case] raw: &str, #[case] expected: Option<EnabledState>) {
        assert_eq!(parse_enabled_setting(raw), expected);
    }

    #[rstest]
    fn test_check_enabled(mut mock_adb: MockAdb) {
        mock_adb
            .expect_shell()
            .with(eq(
                "cmd package get-component-enabled-setting --user 0 'com.a/com.a.Sync'",
            ))
            .returning(|_| Ok(ok_output("3\n")));
        let ctrl = PackageManagerController::new(
            Arc::new(mock_adb),
            Arc::new(RootCapability::fixed(false)),
            0,
        );
        assert!(!ctrl.check_enabled(&svc()).expect("check"));
    }
}
