//! Session configuration.
//!
//! Loaded once at startup from an optional JSON file; every field falls back
//! to its default so a partial file only overrides what it names.

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::utils::{HdrError, HdrResult, ImageFormat};

/// Bounds and filtering applied by the image intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IntakePolicy {
    pub min_images: usize,
    pub max_images: usize,
    /// Skip files whose extension is not a known image type. When off,
    /// anything is staged and bad input surfaces as a merge failure.
    pub filter_image_types: bool,
}

impl Default for IntakePolicy {
    fn default() -> Self {
        Self {
            min_images: 3,
            max_images: 7,
            filter_image_types: true,
        }
    }
}

/// How the Python engine host is started and what it loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Interpreter executable, resolved through `PATH` when relative
    pub python: PathBuf,
    /// Routine source; relative paths resolve against the resource directory
    pub routine_path: PathBuf,
    /// Module name the routine source is installed under
    pub routine_module: String,
    /// Function inside the routine module that performs the merge
    pub routine_function: String,
    /// Native extensions imported before the routine is installed
    pub capabilities: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            python: PathBuf::from("python3"),
            routine_path: PathBuf::from("hdr_processor.py"),
            routine_module: "hdr_processor".to_string(),
            routine_function: "merge_hdr".to_string(),
            capabilities: vec!["numpy".to_string(), "cv2".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HdrConfig {
    pub intake: IntakePolicy,
    pub engine: EngineConfig,
    /// Upper bound on capability loading plus routine install; `null` waits indefinitely
    pub init_timeout_ms: Option<u64>,
    /// Upper bound on one invocation; `null` waits indefinitely
    pub merge_timeout_ms: Option<u64>,
    /// Upper bound on post-attempt scratch release and garbage collection
    pub cleanup_timeout_ms: u64,
    /// Format the engine emits; drives the download MIME type and extension
    pub output_format: ImageFormat,
    /// Start the engine in the background at launch instead of on first merge
    pub prewarm_engine: bool,
}

impl Default for HdrConfig {
    fn default() -> Self {
        Self {
            intake: IntakePolicy::default(),
            engine: EngineConfig::default(),
            init_timeout_ms: Some(60_000),
            merge_timeout_ms: Some(15_000),
            cleanup_timeout_ms: 2_000,
            output_format: ImageFormat::TIFF,
            prewarm_engine: false,
        }
    }
}

impl HdrConfig {
    /// Reads the config at `path`, using defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> HdrResult<Self> {
        let path = path.as_ref();
        let config = match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str::<Self>(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(HdrError::io(format!("Failed to read {}: {}", path.display(), e))),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> HdrResult<()> {
        let IntakePolicy { min_images, max_images, .. } = self.intake;
        if min_images == 0 {
            return Err(HdrError::validation("minImages must be at least 1"));
        }
        if min_images > max_images {
            return Err(HdrError::validation(format!(
                "minImages ({min_images}) exceeds maxImages ({max_images})"
            )));
        }
        if self.engine.routine_module.trim().is_empty() || self.engine.routine_function.trim().is_empty() {
            return Err(HdrError::validation("Routine module and function must be named"));
        }
        if !self.output_format.is_merge_output() {
            return Err(HdrError::validation(format!(
                "Unsupported merge output format: {:?}", self.output_format
            )));
        }
        if self.merge_timeout_ms == Some(0) {
            return Err(HdrError::validation("mergeTimeoutMs must be positive or null"));
        }
        if self.init_timeout_ms == Some(0) {
            return Err(HdrError::validation("initTimeoutMs must be positive or null"));
        }
        Ok(())
    }

    pub fn init_timeout(&self) -> Option<Duration> {
        self.init_timeout_ms.map(Duration::from_millis)
    }

    pub fn merge_timeout(&self) -> Option<Duration> {
        self.merge_timeout_ms.map(Duration::from_millis)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_timeout_ms)
    }
}
