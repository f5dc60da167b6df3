//! Core application types and state management.
//!
//! This module contains the fundamental types used throughout the application:
//! - [`MergePhase`]: Orchestrator phase for the current attempt
//! - [`MergeFailure`]: Internal reason behind a failed attempt
//! - [`DownloadRef`]: The single live merge result
//! - [`UiState`]: Control enablement derived from the above
//! - `AppState`: Application state managed by Tauri (desktop builds)

#[cfg(feature = "desktop")]
mod state;
mod types;
mod ui;

#[cfg(feature = "desktop")]
pub use state::AppState;
pub use types::{
    AttemptRecord, AttemptStatus, DownloadRef, MERGE_FAILURE_MESSAGE, MergeFailure, MergeOutcome,
    MergePhase,
};
pub use ui::UiState;
