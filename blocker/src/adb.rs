use std::fs;
use std::io;

use lazy_static::lazy_static;
use regex::Regex;

use crate::command::{quote, run_cmd, CmdOutput};
use crate::Context;

/// The Adb trait just abstracts the `adb` commands the controllers and
/// stores need
pub trait Adb: Send + Sync {
    fn get_connected_devices(&self) -> crate::Result<Vec<String>>;

    /// Essentially the same as running `adb pull $device $local`
    fn pull(&self, device: &str, local: &str) -> io::Result<CmdOutput>;

    /// Essentially the same as running `adb push $local $device`
    fn push(&self, local: &str, device: &str) -> io::Result<CmdOutput>;

    /// Essentially the same as running `adb shell '...'`
    fn shell(&self, shell_cmd: &str) -> io::Result<CmdOutput>;

    /// Same as `adb forward LOCAL REMOTE`
    fn forward_generic(&self, local: &str, remote: &str) -> io::Result<CmdOutput>;

    /// Same as `adb forward tcp:local_port tcp:remote_port`
    fn forward_tcp_port(&self, local_port: u16, remote_port: u16) -> io::Result<CmdOutput> {
        let local = format!("tcp:{}", local_port);
        let remote = format!("tcp:{}", remote_port);
        self.forward_generic(&local, &remote)
    }

    /// Run the command on the device through `su -c`
    fn root_shell(&self, shell_cmd: &str) -> io::Result<CmdOutput> {
        self.shell(&format!("su -c {}", quote(shell_cmd)))
    }

    /// Run a shell command and turn adb's own failures (no device, unknown
    /// serial) into errors, leaving the command's status for the caller
    fn checked_shell(&self, shell_cmd: &str) -> crate::Result<CmdOutput> {
        let out = self.shell(shell_cmd)?;
        check_adb_stderr(&out)?;
        Ok(out)
    }
}

lazy_static! {
    static ref DEVICE_NOT_FOUND: Regex =
        Regex::new(r"device\s+'([^']+)'\s+not\s+found").expect("valid regex");
}

/// Inspect stderr for messages that come from the adb binary itself rather
/// than the command run on the device
pub fn check_adb_stderr(out: &CmdOutput) -> crate::Result<()> {
    let stderr = out.stderr_utf8_lossy();
    if stderr.contains("no devices/emulators") {
        return Err(crate::Error::NoAdbDevice);
    }
    if let Some(caps) = DEVICE_NOT_FOUND.captures(&stderr) {
        let serial = caps
            .get(1)
            .map(|m| String::from(m.as_str()))
            .unwrap_or_else(|| "?".into());
        return Err(crate::Error::AdbDeviceNotFound(serial));
    }
    Ok(())
}

#[derive(Clone)]
/// An `Adb` implementation that just invokes the external `adb` command.
pub struct ExecAdb {
    bin: String,
    serial: Option<String>,
}

impl ExecAdb {
    /// Creates a new `ExecAdb` from the given context.
    ///
    /// The `[device]` table of the configuration file is consulted first:
    ///
    /// [device]
    /// serial = "..."
    /// adb = "/path/to/adb"
    ///
    /// Missing entries fall back to `ANDROID_SERIAL` and `adb` on the path.
    pub fn new(ctx: &dyn Context) -> crate::Result<Self> {
        let settings = ctx.get_settings()?;
        let bin = match &settings.device.adb {
            Some(v) => v.clone(),
            None => ctx.get_bin("adb")?,
        };
        let serial = settings
            .device
            .serial
            .clone()
            .or_else(|| ctx.maybe_get_env("ANDROID_SERIAL"));
        Ok(Self { bin, serial })
    }

    pub fn has_serial(&self) -> bool {
        self.serial.is_some()
    }

    pub fn with_serial(mut self, serial: String) -> Self {
        self.serial = Some(serial);
        self
    }

    pub fn builder(ctx: &dyn Context) -> Builder {
        Builder::new_from_ctx(ctx)
    }
}

impl Default for ExecAdb {
    fn default() -> Self {
        Self {
            bin: "adb".into(),
            serial: None,
        }
    }
}

/// Used to build an Adb implementation.
pub struct Builder {
    bin: String,
    serial: Option<String>,
}

impl Builder {
    /// Create a new builder from the given context
    pub fn new_from_ctx(ctx: &dyn Context) -> Self {
        let bin = ctx.maybe_get_bin("adb").unwrap_or_else(|| "adb".into());
        let serial = ctx.maybe_get_env("ANDROID_SERIAL");

        Self { bin, serial }
    }

    pub fn with_bin(mut self, bin: String) -> Self {
        self.bin = bin;
        self
    }

    pub fn with_serial(mut self, serial: String) -> Self {
        self.serial = Some(serial);
        self
    }

    /// Consume the builder and return an Adb implementation
    pub fn build(self) -> ExecAdb {
        ExecAdb {
            bin: self.bin,
            serial: self.serial,
        }
    }
}

macro_rules! adb_cmd {
    ($adb:ident, $cmd:literal, $($args:expr),*) => {
        if let Some(ref serial) = $adb.serial {
            run_cmd(&$adb.bin, &["-s", serial, $cmd, $($args),*])
        } else {
            run_cmd(&$adb.bin, &[$cmd, $($args),*])
        }
    }
}

impl ExecAdb {
    fn shell_cat_to_file(&self, device: &str, local: &str) -> io::Result<CmdOutput> {
        let cmd_output = adb_cmd!(self, "shell", "cat", device)?;
        fs::write(local, cmd_output.stdout)?;
        Ok(CmdOutput {
            status: cmd_output.status,
            stdout: Vec::new(),
            stderr: cmd_output.stderr,
        })
    }
}

impl Adb for ExecAdb {
    /// Returns a list of all connected devices (similar to `adb devices -l`)
    fn get_connected_devices(&self) -> crate::Result<Vec<String>> {
        let output = run_cmd(&self.bin, &["devices", "-l"])?;
        let out_str = output.stdout_utf8_lossy();
        let device_list = parse_devices_output(&out_str);

        if device_list.is_empty() {
            return Err(crate::Error::NoAdbDevice);
        }

        Ok(device_list)
    }

    fn pull(&self, device: &str, local: &str) -> io::Result<CmdOutput> {
        let pull_result = adb_cmd!(self, "pull", device, local);

        match &pull_result {
            Ok(out) if out.status.success() => pull_result,
            _ => self.shell_cat_to_file(device, local),
        }
    }

    fn push(&self, local: &str, device: &str) -> io::Result<CmdOutput> {
        adb_cmd!(self, "push", local, device)
    }

    fn shell(&self, shell_cmd: &str) -> io::Result<CmdOutput> {
        adb_cmd!(self, "shell", shell_cmd)
    }

    fn forward_generic(&self, local: &str, remote: &str) -> io::Result<CmdOutput> {
        adb_cmd!(self, "forward", local, remote)
    }
}

fn parse_devices_output(out: &str) -> Vec<String> {
    // The first line is always the `List of devices attached` banner
    out.lines()
        .skip(1)
        .filter_map(|l| {
            let mut split = l.split_ascii_whitespace();
            let id = split.next()?;
            match split.next() {
                Some("device") => Some(id.to_string()),
                _ => None,
            }
        })
        .collect()
}
