use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use crate::command::CmdOutput;

mod adb;
pub use adb::*;

mod context;
pub use context::*;

mod temp;
pub use temp::*;

mod mocks;
pub use mocks::*;

/// Build a [CmdOutput] as if a process exited with `code`
pub fn output(code: i32, stdout: &str, stderr: &str) -> CmdOutput {
    CmdOutput {
        status: ExitStatus::from_raw(code << 8),
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

pub fn ok_output(stdout: &str) -> CmdOutput {
    output(0, stdout, "")
}
