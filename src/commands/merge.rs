//! Tauri command handlers for the merge workflow.

use std::path::PathBuf;
use serde::Deserialize;
use tauri::State;
use tracing::debug;
use crate::core::{AppState, MergeOutcome, UiState};
use crate::intake::{ImageSource, IntakeReport, RemovalBinding, ThumbnailSheet};
use crate::utils::HdrResult;

/// Longest edge of a thumbnail preview in pixels.
const PREVIEW_EDGE: u32 = 160;

/// File carried by a drag-and-drop payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedImage {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Stages files chosen in the picker.
///
/// Paths that do not exist or are not files are reported as rejected along
/// with anything the type filter skips.
#[tauri::command]
pub async fn add_image_paths(
    state: State<'_, AppState>,
    paths: Vec<PathBuf>,
) -> HdrResult<IntakeReport> {
    debug!("Received add_image_paths command for {} files", paths.len());

    let mut sources = Vec::with_capacity(paths.len());
    let mut unreadable = Vec::new();
    for path in paths {
        match ImageSource::probe(&path).await {
            Ok(source) => sources.push(source),
            Err(e) => {
                debug!("Skipping {}: {}", path.display(), e);
                unreadable.push(path.to_string_lossy().to_string());
            }
        }
    }

    let mut report = state.orchestrator().add_images(sources).await;
    report.rejected.extend(unreadable);
    Ok(report)
}

/// Stages files dropped onto the window.
#[tauri::command]
pub async fn add_dropped_images(
    state: State<'_, AppState>,
    files: Vec<DroppedImage>,
) -> HdrResult<IntakeReport> {
    debug!("Received add_dropped_images command for {} files", files.len());
    let sources = files
        .into_iter()
        .map(|f| ImageSource::from_bytes(f.name, f.bytes))
        .collect();
    Ok(state.orchestrator().add_images(sources).await)
}

#[tauri::command]
pub async fn remove_image(
    state: State<'_, AppState>,
    binding: RemovalBinding,
) -> HdrResult<ThumbnailSheet> {
    let orchestrator = state.orchestrator();
    if orchestrator.remove_thumbnail(binding).await.is_none() {
        debug!("Removal binding {:?} did not match the current set", binding);
    }
    Ok(orchestrator.thumbnails().await)
}

#[tauri::command]
pub async fn thumbnails(state: State<'_, AppState>) -> HdrResult<ThumbnailSheet> {
    Ok(state.orchestrator().thumbnails().await)
}

/// PNG preview for one thumbnail entry.
#[tauri::command]
pub async fn thumbnail_preview(
    state: State<'_, AppState>,
    binding: RemovalBinding,
) -> HdrResult<Vec<u8>> {
    state.orchestrator().thumbnail_preview(binding, PREVIEW_EDGE).await
}

/// Runs one merge attempt to completion.
///
/// # Events Emitted
/// * `hdr-ui-state` - after every phase change, via the state forwarder
#[tauri::command]
pub async fn merge_images(state: State<'_, AppState>) -> HdrResult<MergeOutcome> {
    debug!("Received merge_images command");
    state.orchestrator().merge().await
}

#[tauri::command]
pub async fn start_new_batch(state: State<'_, AppState>) -> HdrResult<UiState> {
    let orchestrator = state.orchestrator();
    orchestrator.new_batch().await;
    Ok(orchestrator.ui_state().await)
}

#[tauri::command]
pub async fn ui_state(state: State<'_, AppState>) -> HdrResult<UiState> {
    Ok(state.orchestrator().ui_state().await)
}

/// Writes the live result into `directory` and returns the saved path.
///
/// A missing directory is a validation error and leaves the result live.
#[tauri::command]
pub async fn save_result(
    state: State<'_, AppState>,
    id: u64,
    directory: PathBuf,
) -> HdrResult<PathBuf> {
    state.orchestrator().save_result(id, directory).await
}
