//! Merge processing: the attempt state machine and result presentation.

pub mod orchestrator;
pub mod presenter;

pub use orchestrator::MergeOrchestrator;
pub use presenter::{Artifact, ResultPresenter};
