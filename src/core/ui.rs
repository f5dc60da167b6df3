use serde::Serialize;
use crate::core::{DownloadRef, MERGE_FAILURE_MESSAGE, MergePhase};
use crate::engine::EngineState;

/// Control state for the frontend, derived and never stored on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    pub image_count: usize,
    pub upload_enabled: bool,
    pub merge_enabled: bool,
    pub spinner_visible: bool,
    /// Separate indicator while the engine is loading its capabilities
    pub engine_loading: bool,
    /// Progress bar value, 0-100
    pub progress: u8,
    pub download: Option<DownloadRef>,
    pub new_batch_visible: bool,
    pub message: Option<&'static str>,
    pub phase: MergePhase,
    pub engine: EngineState,
}

impl UiState {
    pub fn derive(
        image_count: usize,
        count_valid: bool,
        engine: EngineState,
        phase: &MergePhase,
        download: Option<&DownloadRef>,
    ) -> Self {
        let busy = phase.is_busy();
        let progress = match phase {
            MergePhase::Idle | MergePhase::Failed(_) => 0,
            MergePhase::AwaitingEngine => 10,
            MergePhase::Submitting => 35,
            MergePhase::Running => 60,
            MergePhase::Succeeded => 100,
        };

        Self {
            image_count,
            upload_enabled: !busy,
            merge_enabled: count_valid && matches!(phase, MergePhase::Idle | MergePhase::Failed(_)),
            spinner_visible: busy,
            engine_loading: engine == EngineState::Initializing,
            progress,
            download: match phase {
                MergePhase::Succeeded => download.cloned(),
                _ => None,
            },
            new_batch_visible: matches!(phase, MergePhase::Succeeded | MergePhase::Failed(_)),
            message: match phase {
                MergePhase::Failed(_) => Some(MERGE_FAILURE_MESSAGE),
                _ => None,
            },
            phase: phase.clone(),
            engine,
        }
    }
}
