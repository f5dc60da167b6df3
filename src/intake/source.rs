//! Image handles staged by the user.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use crate::utils::{HdrError, HdrResult, extract_filename, mime_for_name, validate_input_path};

/// One staged image: either a file on disk (picker) or bytes carried by a
/// drag-and-drop payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Path {
        path: PathBuf,
        name: String,
        size: u64,
    },
    Memory {
        name: String,
        bytes: Arc<[u8]>,
    },
}

impl ImageSource {
    /// Probes `path` and builds a source for it.
    pub async fn probe(path: impl AsRef<Path>) -> HdrResult<Self> {
        let path = path.as_ref();
        let size = validate_input_path(path).await?;
        Ok(Self::Path {
            path: path.to_path_buf(),
            name: extract_filename(path),
            size,
        })
    }

    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Memory {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Path { name, .. } | Self::Memory { name, .. } => name,
        }
    }

    /// MIME type inferred from the name, `None` when not a known image type
    pub fn mime(&self) -> Option<&'static str> {
        mime_for_name(self.name())
    }

    pub fn size(&self) -> u64 {
        match self {
            Self::Path { size, .. } => *size,
            Self::Memory { bytes, .. } => bytes.len() as u64,
        }
    }

    /// Reads the full contents.
    pub async fn read_bytes(&self) -> HdrResult<Vec<u8>> {
        match self {
            Self::Path { path, .. } => fs::read(path)
                .await
                .map_err(|e| HdrError::io(format!("Failed to read {}: {}", path.display(), e))),
            Self::Memory { bytes, .. } => Ok(bytes.to_vec()),
        }
    }
}
