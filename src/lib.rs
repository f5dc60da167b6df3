// Module declarations in dependency order
pub mod utils;
pub mod config;
pub mod telemetry;
pub mod core;
pub mod intake;
pub mod engine;
pub mod processing;
#[cfg(feature = "desktop")]
pub mod commands;
#[cfg(feature = "desktop")]
pub mod app;

// Public exports for external consumers
pub use config::{EngineConfig, HdrConfig, IntakePolicy};
pub use core::{DownloadRef, MergeFailure, MergeOutcome, MergePhase, UiState};
#[cfg(feature = "desktop")]
pub use core::AppState;
pub use engine::{EngineHandle, EngineLifecycle, EngineRuntime, EngineState, RoutineSpec};
pub use intake::{ImageSource, WorkingSet};
pub use processing::{MergeOrchestrator, ResultPresenter};
pub use utils::{HdrError, HdrResult};
#[cfg(feature = "desktop")]
pub use commands::*;

// The desktop shell (`app`, `commands`) needs the `desktop` feature; the rest builds without it.
