//! Whether the device gives us root, asked once per process.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::adb::Adb;

/// The individual ways of finding out whether root is available, tried in
/// declaration order
pub trait RootProbe: Send + Sync {
    /// adbd is already running as uid 0
    fn helper_granted(&self) -> bool;

    /// A `su -c` session can be opened
    fn open_session(&self) -> bool;

    /// One of the root shell binaries runs when executed directly
    fn exec_root_shell(&self) -> bool;
}

pub const ROOT_SHELL_BINARIES: &[&str] = &["/system/xbin/su", "/system/bin/su"];

/// A [RootProbe] that asks the device through adb
pub struct AdbRootProbe {
    adb: Arc<dyn Adb>,
}

impl AdbRootProbe {
    pub fn new(adb: Arc<dyn Adb>) -> Self {
        Self { adb }
    }

    fn reports_uid_zero(&self, cmd: &str) -> bool {
        match self.adb.checked_shell(cmd) {
            Ok(out) => out.ok() && out.stdout_utf8_lossy().trim() == "0",
            Err(e) => {
                log::debug!("`{}` failed: {}", cmd, e);
                false
            }
        }
    }
}

impl RootProbe for AdbRootProbe {
    fn helper_granted(&self) -> bool {
        self.reports_uid_zero("id -u")
    }

    fn open_session(&self) -> bool {
        self.reports_uid_zero("su -c 'id -u'")
    }

    fn exec_root_shell(&self) -> bool {
        ROOT_SHELL_BINARIES
            .iter()
            .any(|su| self.reports_uid_zero(&format!("{su} 0 id -u")))
    }
}

/// Memoized root check. Construct one, share it behind an `Arc` and every
/// caller sees the same answer. Concurrent first callers block on the same
/// probe instead of running their own.
pub struct RootCapability {
    probe: Box<dyn RootProbe>,
    granted: OnceCell<bool>,
}

impl RootCapability {
    pub fn new(probe: Box<dyn RootProbe>) -> Self {
        Self {
            probe,
            granted: OnceCell::new(),
        }
    }

    pub fn from_adb(adb: Arc<dyn Adb>) -> Self {
        Self::new(Box::new(AdbRootProbe::new(adb)))
    }

    /// A capability with a known answer, nothing is ever probed
    pub fn fixed(granted: bool) -> Self {
        let cell = OnceCell::new();
        _ = cell.set(granted);
        Self {
            probe: Box::new(FixedProbe),
            granted: cell,
        }
    }

    pub fn is_granted(&self) -> bool {
        *self.granted.get_or_init(|| {
            let granted = self.probe.helper_granted()
                || self.probe.open_session()
                || self.probe.exec_root_shell();
            log::info!("root access available: {}", granted);
            granted
        })
    }

    pub fn require(&self) -> crate::Result<()> {
        if self.is_granted() {
            Ok(())
        } else {
            Err(crate::Error::RootRequired)
        }
    }
}

struct FixedProbe;

impl RootProbe for FixedProbe {
    fn helper_granted(&self) -> bool {
        false
    }

    fn open_session(&self) -> bool {
        false
    }

    fn exec_root_shell(&self) -> bool {
        false
    }
}
