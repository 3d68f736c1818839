//! Long running, cancellable work: rule export and import, firewall rule
//! backups and the runner that puts them on worker threads.

use thiserror::Error;

mod outcome;
mod task;

pub mod batch;
pub mod export;
pub mod ifw;
pub mod import;
pub mod runner;

pub use outcome::*;
pub use task::*;

/// Why a single package of a run failed
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Base(#[from] crate::Error),

    #[error("{0}")]
    Storage(#[from] crate::ifw::StorageError),

    #[error("{0}")]
    Rule(#[from] crate::rule::RuleParseError),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}
