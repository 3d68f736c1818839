use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-env-changed=BLOCKER_GIT_REVISION");
    if let Err(e) = write_version_strings() {
        panic!("Failed to write the version strings: {:?}", e);
    }
}

fn out_dir() -> PathBuf {
    PathBuf::from(env::var("OUT_DIR").expect("cargo sets OUT_DIR"))
}

fn write_version_strings() -> io::Result<()> {
    let version = env::var("CARGO_PKG_VERSION").expect("cargo sets CARGO_PKG_VERSION");
    let target = env::var("TARGET").expect("cargo sets TARGET");
    let rev = git_revision().unwrap_or_else(|| "unknown".into());

    fs::write(
        out_dir().join("simple_version_string"),
        format!("\"{}\"", version),
    )?;
    fs::write(
        out_dir().join("version_string"),
        format!("r#\"{} ({})\nrev {}\"#", version, target, rev.trim()),
    )
}

/// `BLOCKER_GIT_REVISION` wins, then `git rev-parse`, then the ref file of
/// the main branch
fn git_revision() -> Option<String> {
    if let Ok(rev) = env::var("BLOCKER_GIT_REVISION") {
        return Some(rev);
    }
    let from_git = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok());
    if from_git.is_some() {
        return from_git;
    }
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").ok()?);
    fs::read_to_string(manifest_dir.join("../.git/refs/heads/main")).ok()
}
