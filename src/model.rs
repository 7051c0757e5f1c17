use std::fmt;

use chrono::{DateTime, Local};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmatchedRecord {
    pub operator_id: String,
    pub new_department: String,
    pub old_department: Option<String>,
}

/// Timestamps identifying one run. `stamp` sorts lexically and is embedded in
/// every artifact name the run produces.
#[derive(Debug, Clone)]
pub struct RunStamp {
    pub when: DateTime<Local>,
    pub stamp: String,
    pub display: String,
    pub date: String,
}

impl RunStamp {
    pub fn now() -> Self {
        Self::from_datetime(Local::now())
    }

    pub fn from_datetime(when: DateTime<Local>) -> Self {
        Self {
            stamp: when.format("%Y-%m-%d_%H%M%S").to_string(),
            display: when.format("%b %d, %Y %H:%M").to_string(),
            date: when.format("%Y-%m-%d").to_string(),
            when,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Ok,
    Issue,
    Success,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Issue => "ISSUE",
            Self::Success => "SUCCESS",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    ExitCode(i32),
    Timeout,
    Exception(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoDocument,
    ExecutableMissing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum LoaderOutcome {
    Success,
    Failed(FailureReason),
    Skipped(SkipReason),
}

impl LoaderOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Only a clean loader exit counts as a successful run.
    pub fn run_status(&self) -> RunStatus {
        if self.is_success() {
            RunStatus::Success
        } else {
            RunStatus::Issue
        }
    }
}

impl fmt::Display for LoaderOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("SUCCESS"),
            Self::Failed(FailureReason::ExitCode(code)) => write!(f, "FAILED (exit code {code})"),
            Self::Failed(FailureReason::Timeout) => f.write_str("FAILED (timeout)"),
            Self::Failed(FailureReason::Exception(message)) => {
                write!(f, "FAILED (exception: {message})")
            }
            Self::Skipped(SkipReason::NoDocument) => f.write_str("SKIPPED (no XML)"),
            Self::Skipped(SkipReason::ExecutableMissing) => {
                f.write_str("SKIPPED (loader executable not found)")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunPaths {
    pub base_dir: String,
    pub run_log: String,
    pub input_copy: Option<String>,
    pub document: Option<String>,
    pub email_report: Option<String>,
    pub loader_log: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunCounts {
    pub records_parsed: usize,
    pub document_rows: usize,
    pub document_rows_excluded: usize,
    pub input_copies_removed: usize,
    pub logs_removed: usize,
    pub emails_removed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub manifest_version: u32,
    pub run_stamp: String,
    pub started_at: String,
    pub finished_at: String,
    pub status: RunStatus,
    pub loader_outcome: LoaderOutcome,
    pub loader_summary: String,
    pub email_sent: bool,
    pub input_sha256: Option<String>,
    pub paths: RunPaths,
    pub counts: RunCounts,
    pub narrative: Vec<String>,
}
