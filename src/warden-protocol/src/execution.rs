//! Execution status and result records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use strum_macros::Display;

/// Marker appended to stdout when captured output hit the size cap.
pub const TRUNCATION_MARKER: &str = "[output truncated]";

/// Lifecycle state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionState {
    Queued,
    Running,
    Completed,
    Failed,
    Killed,
    TimedOut,
}

impl ExecutionState {
    /// Whether the execution has reached a final state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionState::Queued | ExecutionState::Running)
    }
}

/// Live status of a running execution.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub id: String,
    pub command: String,
    pub state: ExecutionState,
    pub start_time: DateTime<Utc>,
    /// Time since start, recomputed whenever the status is read.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub duration: Duration,
    /// Native process id.
    pub pid: u32,
}

impl ExecutionStatus {
    /// Status for a process that just started.
    pub fn running(
        id: impl Into<String>,
        command: impl Into<String>,
        start_time: DateTime<Utc>,
        pid: u32,
    ) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            state: ExecutionState::Running,
            start_time,
            duration: Duration::ZERO,
            pid,
        }
    }

    /// Recompute `duration` against the current clock.
    pub fn refresh(&mut self) {
        self.duration = (Utc::now() - self.start_time).to_std().unwrap_or_default();
    }
}

/// Terminal record of one execution.
///
/// `exit_code` is meaningful only when `error` is `None` and neither
/// `killed` nor `timed_out` is set.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: String,
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub duration: Duration,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Set when the process could not be started or supervised.
    pub error: Option<String>,
    pub killed: bool,
    pub timed_out: bool,
    /// Bytes of output collected (after truncation).
    pub output_size: u64,
}

impl ExecutionResult {
    /// Empty result for an execution starting now.
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            command: command.into(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
            start_time: now,
            end_time: now,
            error: None,
            killed: false,
            timed_out: false,
            output_size: 0,
        }
    }

    /// Result for an execution that never produced an exit status.
    pub fn failed(
        id: impl Into<String>,
        command: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(id, command);
        result.exit_code = -1;
        result.error = Some(error.into());
        result
    }

    /// Stamp `end_time` and `duration`.
    pub fn finish(&mut self) {
        self.end_time = Utc::now();
        self.duration = (self.end_time - self.start_time)
            .to_std()
            .unwrap_or_default();
    }

    /// Terminal state derived from the result flags.
    pub fn state(&self) -> ExecutionState {
        if self.timed_out {
            ExecutionState::TimedOut
        } else if self.killed {
            ExecutionState::Killed
        } else if self.error.is_some() || self.exit_code != 0 {
            ExecutionState::Failed
        } else {
            ExecutionState::Completed
        }
    }

    /// Command ran to completion with exit code 0.
    pub fn success(&self) -> bool {
        self.state() == ExecutionState::Completed
    }

    /// Whether stdout carries the truncation marker.
    pub fn is_truncated(&self) -> bool {
        self.stdout.ends_with(TRUNCATION_MARKER)
    }
}
