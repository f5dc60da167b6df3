//! Core types for merge attempts and their results.

use serde::Serialize;
use thiserror::Error;

/// Shown to the user for every failed attempt, whatever the internal reason.
pub const MERGE_FAILURE_MESSAGE: &str =
    "Could not merge these images. Check that they are valid, aligned exposures of the same scene.";

/// Why an attempt failed. Carried for logs and telemetry; the user always
/// sees [`MERGE_FAILURE_MESSAGE`].
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum MergeFailure {
    /// Capability load, routine fetch or install failed
    #[error("engine init error: {0}")]
    EngineInit(String),
    /// A staged file could not be read
    #[error("read error: {0}")]
    Read(String),
    /// The routine raised or the host faulted
    #[error("invocation error: {0}")]
    Invocation(String),
    /// The invocation did not finish within the allotted time
    #[error("timed out after {0} ms")]
    Timeout(u64),
}

impl MergeFailure {
    pub fn status(&self) -> AttemptStatus {
        match self {
            Self::Timeout(_) => AttemptStatus::TimedOut,
            _ => AttemptStatus::Failed,
        }
    }
}

/// Orchestrator phase. Terminal phases (`Succeeded`, `Failed`) only return
/// to `Idle` through a new batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "phase", content = "reason")]
pub enum MergePhase {
    Idle,
    AwaitingEngine,
    Submitting,
    Running,
    Succeeded,
    Failed(MergeFailure),
}

impl MergePhase {
    /// True for the span during which the merge trigger must stay disabled.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::AwaitingEngine | Self::Submitting | Self::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AttemptStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

/// Bookkeeping for the latest attempt; the payload itself lives in the presenter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub id: u64,
    pub image_count: usize,
    pub status: AttemptStatus,
    pub result_bytes: Option<usize>,
    pub mime: Option<&'static str>,
}

/// Reference to the single live merge result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRef {
    pub id: u64,
    pub file_name: String,
    pub mime: &'static str,
    pub len: usize,
}

/// How one `merge` call ended, from the caller's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum MergeOutcome {
    Succeeded { download: DownloadRef },
    Failed { reason: MergeFailure, message: &'static str },
    /// A new batch started while this attempt was in flight; its result was discarded
    Superseded,
}
