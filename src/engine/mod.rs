//! The external processing engine.
//!
//! The merge algorithm lives in a routine executed by an interpreter this
//! crate does not control. Everything about it is reached through two traits:
//!
//! - [`EngineRuntime`]: starts an interpreter and hands back a handle
//! - [`EngineHandle`]: capability loading, routine install, invocation, cleanup
//!
//! [`EngineLifecycle`] wraps a runtime with lazy single-flight initialization.
//! [`python::PythonRuntime`] is the production implementation;
//! [`scripted::ScriptedRuntime`] is an in-process stand-in with observable
//! call counts.

mod lifecycle;
pub mod protocol;
pub mod python;
pub mod scripted;

use std::future::Future;
use std::path::PathBuf;
use serde::Serialize;
use crate::config::EngineConfig;
use crate::utils::{EngineError, EngineResult};

pub use lifecycle::EngineLifecycle;

/// Observable engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

pub trait EngineRuntime: Send + Sync + 'static {
    type Handle: EngineHandle;

    /// Acquires a fresh interpreter instance.
    fn init(&self) -> impl Future<Output = EngineResult<Self::Handle>> + Send;
}

pub trait EngineHandle: Send + Sync + 'static {
    fn load_capabilities(&self, names: &[String]) -> impl Future<Output = EngineResult<()>> + Send;

    fn install_routine(&self, source: &str, name: &str) -> impl Future<Output = EngineResult<()>> + Send;

    /// Runs `routine` with the buffers in the given order and returns its raw output.
    fn invoke(&self, routine: &str, args: Vec<Vec<u8>>) -> impl Future<Output = EngineResult<Vec<u8>>> + Send;

    fn release_scratch(&self) -> impl Future<Output = EngineResult<()>> + Send;

    fn collect_garbage(&self) -> impl Future<Output = EngineResult<()>> + Send;

    /// Tears the interpreter down. Must be safe to call while an invocation is pending.
    fn shutdown(&self) -> impl Future<Output = EngineResult<()>> + Send;
}

/// Where the routine text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutineSource {
    File(PathBuf),
    Inline(String),
}

impl RoutineSource {
    pub async fn fetch(&self) -> EngineResult<String> {
        match self {
            Self::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| EngineError::RoutineFetch(format!("{}: {}", path.display(), e))),
            Self::Inline(text) => Ok(text.clone()),
        }
    }
}

/// Everything the lifecycle manager installs into a fresh interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineSpec {
    pub source: RoutineSource,
    pub module: String,
    pub function: String,
    pub capabilities: Vec<String>,
}

impl RoutineSpec {
    /// Builds the routine description from config, resolving a relative routine path against `resource_dir`.
    pub fn from_config(config: &EngineConfig, resource_dir: Option<&std::path::Path>) -> Self {
        let path = match resource_dir {
            Some(dir) if config.routine_path.is_relative() => dir.join(&config.routine_path),
            _ => config.routine_path.clone(),
        };
        Self {
            source: RoutineSource::File(path),
            module: config.routine_module.clone(),
            function: config.routine_function.clone(),
            capabilities: config.capabilities.clone(),
        }
    }

    /// Name passed to `invoke`: `module.function`.
    pub fn entry_point(&self) -> String {
        format!("{}.{}", self.module, self.function)
    }
}
