//! Job data model and the JSON shapes exchanged with callers.
//!
//! `Job` is the single source of truth for a run's lifecycle; everything
//! else in this module is a view or envelope over it.

use serde::{Deserialize, Serialize};

/// A job's position in its lifecycle. Terminal states are absorbing —
/// see the invariants on [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut | JobStatus::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
            JobStatus::Canceled => "canceled",
        }
    }
}

/// Submission mode, sticky for the lifetime of the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Sync,
    Async,
}

/// A single tracked invocation of a registered script.
///
/// Field semantics follow spec §3 exactly. `code` is `None` until the job
/// reaches a terminal state, and is `-1` for any non-normal termination
/// (timeout, cancel, signal, spawn error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub script_id: String,
    pub args: Vec<String>,
    pub mode: RunMode,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub stdout_ref: String,
    pub stderr_ref: String,
    #[serde(default)]
    pub stdout_size: u64,
    #[serde(default)]
    pub stderr_size: u64,
    #[serde(default)]
    pub stdout_truncated: bool,
    #[serde(default)]
    pub stderr_truncated: bool,
    #[serde(default)]
    pub stdout_preview: String,
    #[serde(default)]
    pub stderr_preview: String,

    /// Set once a caller requests cancellation; drives the exit-priority
    /// classification in the executor. Not part of the public JSON — it is
    /// internal scheduling state, never read by callers directly.
    #[serde(skip)]
    pub cancel_requested: bool,
}

impl Job {
    pub fn new_queued(job_id: String, script_id: String, args: Vec<String>, mode: RunMode) -> Self {
        let now = now_rfc3339();
        Job {
            stdout_ref: format!("{job_id}.stdout.log"),
            stderr_ref: format!("{job_id}.stderr.log"),
            job_id,
            script_id,
            args,
            mode,
            status: JobStatus::Queued,
            code: None,
            created_at: now,
            started_at: None,
            ended_at: None,
            duration_ms: None,
            stdout_size: 0,
            stderr_size: 0,
            stdout_truncated: false,
            stderr_truncated: false,
            stdout_preview: String::new(),
            stderr_preview: String::new(),
            cancel_requested: false,
        }
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Immutable, configuration-declared script registry entry (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptArgsPolicy {
    pub max_items: usize,
    pub item_pattern: String,
    pub item_max_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptEntry {
    pub id: String,
    pub path: String,
    #[serde(default)]
    pub mode: Option<RunMode>,
    pub timeout_sec: u64,
    pub args: ScriptArgsPolicy,
}

// ---------- API result / error envelopes ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorCode {
    #[error("unknown script id")]
    ScriptNotFound,
    #[error("arguments violate the script's policy")]
    InvalidArgs,
    #[error("unknown job id")]
    JobNotFound,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ScriptNotFound => "SCRIPT_NOT_FOUND",
            ErrorCode::InvalidArgs => "INVALID_ARGS",
            ErrorCode::JobNotFound => "JOB_NOT_FOUND",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            code: code.as_str(),
            message: message.into(),
        }
    }

    /// An unhandled failure outside spec §7's three named domain error
    /// codes (e.g. log-file I/O failing for a reason other than the file
    /// simply not existing yet) — the adapter maps this to a 500, never to
    /// `JOB_NOT_FOUND` or any other lookup/validation code.
    pub fn internal(message: impl Into<String>) -> Self {
        ApiError {
            code: "INTERNAL_ERROR",
            message: message.into(),
        }
    }
}

/// Response payload for `getJobLogs`.
#[derive(Debug, Serialize)]
pub struct LogPage {
    pub job_id: String,
    pub stream: String,
    pub offset: u64,
    pub next_offset: u64,
    pub total_size: u64,
    pub truncated: bool,
    pub data: String,
}
