//! Turns merge output into the single downloadable artifact.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use crate::core::DownloadRef;
use crate::utils::{HdrError, HdrResult, ImageFormat};

/// A presented result: its reference plus the bytes it resolves to.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub reference: DownloadRef,
    pub bytes: Arc<[u8]>,
}

impl Artifact {
    /// Writes the artifact into `dir` under its suggested file name.
    pub async fn save_to(&self, dir: impl AsRef<Path>) -> HdrResult<PathBuf> {
        let path = dir.as_ref().join(&self.reference.file_name);
        tokio::fs::write(&path, &self.bytes)
            .await
            .map_err(|e| HdrError::io(format!("Failed to write {}: {}", path.display(), e)))?;
        Ok(path)
    }
}

/// Holds at most one live result; presenting a new one invalidates the old.
#[derive(Debug, Default)]
pub struct ResultPresenter {
    live: Option<Artifact>,
    counter: u64,
}

impl ResultPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn present(&mut self, bytes: Vec<u8>, format: ImageFormat) -> DownloadRef {
        self.counter += 1;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        let reference = DownloadRef {
            id: self.counter,
            file_name: format!("hdr_result_{}_{}.{}", millis, self.counter, format.primary_extension()),
            mime: format.mime(),
            len: bytes.len(),
        };
        if let Some(old) = self.live.replace(Artifact {
            reference: reference.clone(),
            bytes: bytes.into(),
        }) {
            debug!("Result {} replaced before download", old.reference.id);
        }
        reference
    }

    pub fn current(&self) -> Option<&DownloadRef> {
        self.live.as_ref().map(|a| &a.reference)
    }

    pub fn get(&self, id: u64) -> Option<&Artifact> {
        self.live.as_ref().filter(|a| a.reference.id == id)
    }

    /// Hands out the artifact once; the reference is dead afterwards.
    pub fn take(&mut self, id: u64) -> Option<Artifact> {
        if self.get(id).is_some() {
            self.live.take()
        } else {
            None
        }
    }

    pub fn discard(&mut self) {
        self.live = None;
    }
}
