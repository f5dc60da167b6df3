//! Application state management for Tauri.

use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use crate::config::HdrConfig;
use crate::engine::RoutineSpec;
use crate::engine::python::PythonRuntime;
use crate::processing::MergeOrchestrator;
use crate::telemetry::TelemetrySink;
use crate::utils::HdrResult;

/// Orchestrator driving the Python engine host.
pub type DesktopOrchestrator = MergeOrchestrator<PythonRuntime>;

/// Application state managed by Tauri.
///
/// Holds the single orchestrator for the window's lifetime; command handlers
/// reach it through `State<'_, AppState>` instead of globals.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<DesktopOrchestrator>,
}

impl AppState {
    /// Creates the session orchestrator.
    ///
    /// A relative routine path in `config` is resolved against `resource_dir`,
    /// where the bundle ships `hdr_processor.py`.
    pub fn new(config: HdrConfig, resource_dir: Option<&Path>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        let runtime = PythonRuntime::from_config(&config.engine);
        let routine = RoutineSpec::from_config(&config.engine, resource_dir);
        debug!("Routine source: {:?}", routine.source);

        Self {
            orchestrator: Arc::new(MergeOrchestrator::new(config, runtime, routine, telemetry)),
        }
    }

    pub fn orchestrator(&self) -> &Arc<DesktopOrchestrator> {
        &self.orchestrator
    }

    /// Starts the engine ahead of the first merge when the config asks for it.
    pub async fn warmup_engine(&self) -> HdrResult<()> {
        if !self.orchestrator.config().prewarm_engine {
            debug!("Engine prewarm disabled; it will start on first merge");
            return Ok(());
        }
        self.orchestrator.warmup().await
    }
}
