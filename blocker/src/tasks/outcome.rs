use std::fmt::Display;

use crate::model::ComponentName;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Success,
    Failure,
}

/// Why a whole run failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    FolderNotDefined,
    MissingStoragePermission,
    MissingRootPermission,
    UnexpectedException(String),
    Cancelled,
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FolderNotDefined => f.write_str("no backup location configured"),
            Self::MissingStoragePermission => f.write_str("backup location is not writable"),
            Self::MissingRootPermission => f.write_str("root access is required"),
            Self::UnexpectedException(msg) => write!(f, "unexpected error: {msg}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl From<&crate::Error> for FailureReason {
    fn from(value: &crate::Error) -> Self {
        match value {
            crate::Error::Cancelled => Self::Cancelled,
            crate::Error::RootRequired => Self::MissingRootPermission,
            e => Self::UnexpectedException(e.to_string()),
        }
    }
}

/// The final result of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkOutcome {
    pub result_kind: ResultKind,
    pub processed_count: usize,
    pub total_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
    pub failure_reason: Option<FailureReason>,
}

impl WorkOutcome {
    pub fn is_success(&self) -> bool {
        self.result_kind == ResultKind::Success
    }

    /// A run that failed before it processed anything
    pub fn failed(reason: FailureReason) -> Self {
        OutcomeTracker::new(0).fail(reason)
    }
}

impl Display for WorkOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.failure_reason {
            Some(reason) => write!(
                f,
                "failed after {}/{}: {}",
                self.processed_count, self.total_count, reason
            ),
            None => write!(
                f,
                "{}/{} processed, {} skipped, {} failed",
                self.processed_count, self.total_count, self.skipped_count, self.failed_count
            ),
        }
    }
}

/// The counters of a run in progress. Finishing consumes the tracker, so
/// a run produces exactly one [WorkOutcome].
#[derive(Debug, Default)]
pub struct OutcomeTracker {
    total: usize,
    processed: usize,
    skipped: usize,
    failed: usize,
}

impl OutcomeTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn set_total(&mut self, total: usize) {
        self.total = total;
    }

    pub fn processed(&mut self) {
        self.processed += 1;
    }

    pub fn skipped(&mut self) {
        self.skipped += 1;
    }

    /// An item that was attempted and failed. It counts as processed too.
    pub fn failed(&mut self) {
        self.processed += 1;
        self.failed += 1;
    }

    /// Items handled in any way so far
    pub fn done(&self) -> usize {
        self.processed + self.skipped
    }

    pub fn total(&self) -> usize {
        self.total
    }

    fn outcome(self, result_kind: ResultKind, failure_reason: Option<FailureReason>) -> WorkOutcome {
        WorkOutcome {
            result_kind,
            processed_count: self.processed,
            total_count: self.total,
            skipped_count: self.skipped,
            failed_count: self.failed,
            failure_reason,
        }
    }

    pub fn finish(self) -> WorkOutcome {
        self.outcome(ResultKind::Success, None)
    }

    pub fn fail(self, reason: FailureReason) -> WorkOutcome {
        self.outcome(ResultKind::Failure, Some(reason))
    }
}

/// Progress of the pipelines
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started { total: usize },
    /// One item handled, `done` counts processed and skipped items
    Progress { done: usize, total: usize },
    /// One component of a package's batch was attempted
    ComponentProgress {
        component: ComponentName,
        done: usize,
        total: usize,
        success: bool,
    },
    PackageProcessed { package: String },
    PackageSkipped { package: String, reason: String },
    PackageFailed { package: String, error: String },
    ComponentFailed { component: ComponentName, error: String },
    Finished { outcome: WorkOutcome },
}
