//! In-process engine with scripted behaviour.
//!
//! Used by the test suites and by headless demos: every boundary call is
//! counted, and failures and delays can be switched on at any point.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use crate::engine::{EngineHandle, EngineRuntime};
use crate::utils::{EngineError, EngineResult};

/// TIFF little-endian magic, prefixed to echoed results.
pub const ECHO_MAGIC: &[u8] = b"II*\0";

/// What `invoke` answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `ECHO_MAGIC` followed by every argument concatenated in order
    Echo,
    Bytes(Vec<u8>),
    Fail(String),
}

#[derive(Debug)]
struct Script {
    init_delay: Mutex<Duration>,
    init_failure: Mutex<Option<String>>,
    capability_failure: Mutex<Option<String>>,
    capability_delay: Mutex<Duration>,
    invoke_delay: Mutex<Duration>,
    reply: Mutex<Reply>,
    cleanup_fails: AtomicBool,

    inits: AtomicUsize,
    shutdowns: AtomicUsize,
    releases: AtomicUsize,
    collections: AtomicUsize,
    completed_invocations: AtomicUsize,
    loaded: Mutex<Vec<String>>,
    installed: Mutex<Vec<(String, String)>>,
    invocations: Mutex<Vec<(String, Vec<Vec<u8>>)>>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            init_delay: Mutex::new(Duration::ZERO),
            init_failure: Mutex::new(None),
            capability_failure: Mutex::new(None),
            capability_delay: Mutex::new(Duration::ZERO),
            invoke_delay: Mutex::new(Duration::ZERO),
            reply: Mutex::new(Reply::Echo),
            cleanup_fails: AtomicBool::new(false),
            inits: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            collections: AtomicUsize::new(0),
            completed_invocations: AtomicUsize::new(0),
            loaded: Mutex::new(Vec::new()),
            installed: Mutex::new(Vec::new()),
            invocations: Mutex::new(Vec::new()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cloning shares the script, so a test can keep a clone to steer and observe
/// the runtime it handed to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRuntime {
    script: Arc<Script>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_init_delay(&self, delay: Duration) {
        *lock(&self.script.init_delay) = delay;
    }

    pub fn fail_init(&self, message: Option<&str>) {
        *lock(&self.script.init_failure) = message.map(str::to_string);
    }

    pub fn fail_capabilities(&self, message: Option<&str>) {
        *lock(&self.script.capability_failure) = message.map(str::to_string);
    }

    pub fn set_capability_delay(&self, delay: Duration) {
        *lock(&self.script.capability_delay) = delay;
    }

    pub fn set_invoke_delay(&self, delay: Duration) {
        *lock(&self.script.invoke_delay) = delay;
    }

    pub fn set_reply(&self, reply: Reply) {
        *lock(&self.script.reply) = reply;
    }

    pub fn fail_cleanup(&self, fails: bool) {
        self.script.cleanup_fails.store(fails, Ordering::SeqCst);
    }

    pub fn inits(&self) -> usize {
        self.script.inits.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.script.shutdowns.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.script.releases.load(Ordering::SeqCst)
    }

    pub fn collections(&self) -> usize {
        self.script.collections.load(Ordering::SeqCst)
    }

    /// Invocations that ran to the end, including ones nobody waited for.
    pub fn completed_invocations(&self) -> usize {
        self.script.completed_invocations.load(Ordering::SeqCst)
    }

    pub fn loaded_capabilities(&self) -> Vec<String> {
        lock(&self.script.loaded).clone()
    }

    /// `(module name, source)` pairs in install order.
    pub fn installed(&self) -> Vec<(String, String)> {
        lock(&self.script.installed).clone()
    }

    /// `(routine, args)` for every started invocation.
    pub fn invocations(&self) -> Vec<(String, Vec<Vec<u8>>)> {
        lock(&self.script.invocations).clone()
    }
}

impl EngineRuntime for ScriptedRuntime {
    type Handle = ScriptedHandle;

    async fn init(&self) -> EngineResult<ScriptedHandle> {
        self.script.inits.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.script.init_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = lock(&self.script.init_failure).clone() {
            return Err(EngineError::spawn(message));
        }
        Ok(ScriptedHandle {
            script: Arc::clone(&self.script),
            alive: AtomicBool::new(true),
        })
    }
}

#[derive(Debug)]
pub struct ScriptedHandle {
    script: Arc<Script>,
    alive: AtomicBool,
}

impl ScriptedHandle {
    fn check_alive(&self) -> EngineResult<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::closed("scripted engine was shut down"))
        }
    }

    fn cleanup_result(&self) -> EngineResult<()> {
        self.check_alive()?;
        if self.script.cleanup_fails.load(Ordering::SeqCst) {
            return Err(EngineError::invocation("scripted cleanup failure"));
        }
        Ok(())
    }
}

impl EngineHandle for ScriptedHandle {
    async fn load_capabilities(&self, names: &[String]) -> EngineResult<()> {
        self.check_alive()?;
        let delay = *lock(&self.script.capability_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = lock(&self.script.capability_failure).clone() {
            return Err(EngineError::Capability(message));
        }
        lock(&self.script.loaded).extend(names.iter().cloned());
        Ok(())
    }

    async fn install_routine(&self, source: &str, name: &str) -> EngineResult<()> {
        self.check_alive()?;
        lock(&self.script.installed).push((name.to_string(), source.to_string()));
        Ok(())
    }

    async fn invoke(&self, routine: &str, args: Vec<Vec<u8>>) -> EngineResult<Vec<u8>> {
        self.check_alive()?;
        lock(&self.script.invocations).push((routine.to_string(), args.clone()));

        let delay = *lock(&self.script.invoke_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.script.completed_invocations.fetch_add(1, Ordering::SeqCst);
        // A host killed mid-run never answers.
        self.check_alive()?;

        let reply = lock(&self.script.reply).clone();
        match reply {
            Reply::Echo => {
                let mut out = ECHO_MAGIC.to_vec();
                for arg in &args {
                    out.extend_from_slice(arg);
                }
                Ok(out)
            }
            Reply::Bytes(bytes) => Ok(bytes),
            Reply::Fail(message) => Err(EngineError::invocation(message)),
        }
    }

    async fn release_scratch(&self) -> EngineResult<()> {
        self.script.releases.fetch_add(1, Ordering::SeqCst);
        self.cleanup_result()
    }

    async fn collect_garbage(&self) -> EngineResult<()> {
        self.script.collections.fetch_add(1, Ordering::SeqCst);
        self.cleanup_result()
    }

    async fn shutdown(&self) -> EngineResult<()> {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.script.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
