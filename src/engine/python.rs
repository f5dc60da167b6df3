//! Python interpreter subprocess as the merge engine.
//!
//! The host script (`resources/engine_host.py`) is embedded in the binary and
//! passed with `-c`; it imports capabilities, installs the routine source as a
//! module and runs invocations, all over the framing in [`protocol`].

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use crate::config::EngineConfig;
use crate::engine::protocol::{self, Op, Request};
use crate::engine::{EngineHandle, EngineRuntime};
use crate::utils::{EngineError, EngineResult};

const HOST_SCRIPT: &str = include_str!("../../resources/engine_host.py");

/// Time the host gets to print its ready banner.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
/// Time a polite shutdown gets before the process is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct PythonRuntime {
    python: PathBuf,
}

impl PythonRuntime {
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self { python: python.into() }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.python.clone())
    }
}

impl EngineRuntime for PythonRuntime {
    type Handle = PythonEngine;

    async fn init(&self) -> EngineResult<PythonEngine> {
        let mut child = Command::new(&self.python)
            .arg("-u")
            .arg("-c")
            .arg(HOST_SCRIPT)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::spawn(format!("Failed to start {}: {}", self.python.display(), e)))?;

        let pid = child.id();
        let stdin = child.stdin.take().ok_or_else(|| EngineError::spawn("Engine host has no stdin pipe"))?;
        let stdout = child.stdout.take().ok_or_else(|| EngineError::spawn("Engine host has no stdout pipe"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        let mut channel = Channel {
            stdin,
            stdout: BufReader::new(stdout),
            desynced: false,
        };

        match tokio::time::timeout(STARTUP_TIMEOUT, protocol::read_response(&mut channel.stdout)).await {
            Ok(Ok(reply)) => {
                protocol::into_payloads(reply, EngineError::Spawn)?;
            }
            Ok(Err(e)) => return Err(EngineError::spawn(format!("Engine host did not start: {e}"))),
            Err(_) => return Err(EngineError::spawn("Engine host did not become ready in time")),
        }

        debug!("Engine host started (pid {:?})", pid);
        Ok(PythonEngine {
            pid,
            child: StdMutex::new(Some(child)),
            channel: Mutex::new(channel),
        })
    }
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "engine_host", "{}", line);
    }
}

struct Channel {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    /// Set while an exchange is in progress; still set afterwards means the
    /// exchange was abandoned halfway and the stream can no longer be trusted.
    desynced: bool,
}

pub struct PythonEngine {
    pid: Option<u32>,
    child: StdMutex<Option<Child>>,
    channel: Mutex<Channel>,
}

impl PythonEngine {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn call(
        &self,
        request: Request,
        payloads: &[&[u8]],
        on_error: fn(String) -> EngineError,
    ) -> EngineResult<Vec<Vec<u8>>> {
        let mut channel = self.channel.lock().await;
        if channel.desynced {
            return Err(EngineError::closed("engine stream desynchronized by an abandoned call"));
        }

        channel.desynced = true;
        let Channel { stdin, stdout, .. } = &mut *channel;
        protocol::write_request(stdin, request, payloads).await?;
        let reply = protocol::read_response(stdout).await?;
        channel.desynced = false;

        protocol::into_payloads(reply, on_error)
    }

    fn take_child(&self) -> Option<Child> {
        self.child
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl EngineHandle for PythonEngine {
    async fn load_capabilities(&self, names: &[String]) -> EngineResult<()> {
        let request = Request {
            capabilities: names.to_vec(),
            ..Request::new(Op::Load)
        };
        self.call(request, &[], EngineError::Capability).await?;
        Ok(())
    }

    async fn install_routine(&self, source: &str, name: &str) -> EngineResult<()> {
        self.call(Request::named(Op::Install, name), &[source.as_bytes()], EngineError::Install)
            .await?;
        Ok(())
    }

    async fn invoke(&self, routine: &str, args: Vec<Vec<u8>>) -> EngineResult<Vec<u8>> {
        let payloads: Vec<&[u8]> = args.iter().map(Vec::as_slice).collect();
        let mut result = self
            .call(Request::named(Op::Invoke, routine), &payloads, EngineError::Invocation)
            .await?;
        if result.len() != 1 {
            return Err(EngineError::protocol(format!(
                "Expected one result payload, got {}", result.len()
            )));
        }
        Ok(result.remove(0))
    }

    async fn release_scratch(&self) -> EngineResult<()> {
        self.call(Request::new(Op::Release), &[], EngineError::Invocation).await?;
        Ok(())
    }

    async fn collect_garbage(&self) -> EngineResult<()> {
        self.call(Request::new(Op::Gc), &[], EngineError::Invocation).await?;
        Ok(())
    }

    async fn shutdown(&self) -> EngineResult<()> {
        // Ask nicely only when no call is holding the stream.
        if let Ok(mut channel) = self.channel.try_lock() {
            if !channel.desynced {
                let Channel { stdin, stdout, .. } = &mut *channel;
                let polite = async {
                    protocol::write_request(stdin, Request::new(Op::Shutdown), &[]).await?;
                    protocol::read_response(stdout).await.map(|_| ())
                };
                if let Err(e) = tokio::time::timeout(SHUTDOWN_GRACE, polite)
                    .await
                    .unwrap_or_else(|_| Err(EngineError::closed("shutdown timed out")))
                {
                    debug!("Polite engine shutdown failed: {}", e);
                }
            }
        }

        let Some(mut child) = self.take_child() else {
            return Ok(());
        };
        if let Err(e) = child.start_kill() {
            debug!("Engine host already gone: {}", e);
        }
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!("Engine host {:?} exited: {}", self.pid, status),
            Ok(Err(e)) => warn!("Waiting for engine host failed: {}", e),
            Err(_) => warn!("Engine host {:?} did not exit after kill", self.pid),
        }
        Ok(())
    }
}
