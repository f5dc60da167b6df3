//! Lazy, single-flight engine initialization.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};
use crate::engine::{EngineHandle, EngineRuntime, EngineState, RoutineSpec};
use crate::utils::{EngineError, EngineResult};

enum Slot<H> {
    Empty,
    Ready(Arc<H>),
    Failed(EngineError),
}

/// Owns the engine handle for one session.
///
/// `slot` is held for the whole of an initialization, so concurrent
/// `ensure_ready` callers queue behind the first one and observe its
/// outcome instead of starting a second load. [`reset`](Self::reset) bumps
/// `resets` before taking the slot, which aborts a pending initialization
/// rather than waiting it out.
pub struct EngineLifecycle<R: EngineRuntime> {
    runtime: R,
    routine: RoutineSpec,
    slot: Mutex<Slot<R::Handle>>,
    state: watch::Sender<EngineState>,
    resets: watch::Sender<u64>,
    init_timeout: Option<Duration>,
    init_sequences: AtomicUsize,
}

/// Puts the observable state back to `Uninitialized` if an initialization
/// future is dropped before it settles.
struct InitGuard<'a> {
    state: &'a watch::Sender<EngineState>,
    settled: bool,
}

impl<'a> InitGuard<'a> {
    fn arm(state: &'a watch::Sender<EngineState>) -> Self {
        state.send_replace(EngineState::Initializing);
        Self { state, settled: false }
    }

    fn settle(mut self, outcome: EngineState) {
        self.settled = true;
        self.state.send_replace(outcome);
    }
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.state.send_replace(EngineState::Uninitialized);
        }
    }
}

impl<R: EngineRuntime> EngineLifecycle<R> {
    pub fn new(runtime: R, routine: RoutineSpec) -> Self {
        let (state, _) = watch::channel(EngineState::Uninitialized);
        let (resets, _) = watch::channel(0);
        Self {
            runtime,
            routine,
            slot: Mutex::new(Slot::Empty),
            state,
            resets,
            init_timeout: None,
            init_sequences: AtomicUsize::new(0),
        }
    }

    /// Bounds capability loading plus routine install; `None` waits indefinitely.
    pub fn with_init_timeout(mut self, limit: Option<Duration>) -> Self {
        self.init_timeout = limit;
        self
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    pub fn routine(&self) -> &RoutineSpec {
        &self.routine
    }

    /// Number of initialization sequences started so far.
    pub fn init_sequences(&self) -> usize {
        self.init_sequences.load(Ordering::SeqCst)
    }

    /// Returns the ready handle, initializing the engine first if needed.
    ///
    /// A failed initialization is remembered until [`reset`](Self::reset):
    /// callers that queued behind it get the same error. A reset issued
    /// after this call began aborts it with [`EngineError::Closed`].
    pub async fn ensure_ready(&self) -> EngineResult<Arc<R::Handle>> {
        // Subscribed before queueing so a reset issued while we wait still counts.
        let mut resets = self.resets.subscribe();
        let mut slot = self.slot.lock().await;
        match &*slot {
            Slot::Ready(handle) => return Ok(Arc::clone(handle)),
            Slot::Failed(err) => return Err(err.clone()),
            Slot::Empty => {}
        }

        let sequence = self.init_sequences.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = InitGuard::arm(&self.state);
        debug!("Engine initialization #{} started", sequence);

        let outcome = tokio::select! {
            outcome = self.initialize() => outcome,
            _ = resets.changed() => {
                info!("Engine initialization #{} aborted by reset", sequence);
                let err = EngineError::closed("engine reset during initialization");
                // Callers already queued see the abort; the reset empties the slot next.
                *slot = Slot::Failed(err.clone());
                guard.settle(EngineState::Uninitialized);
                return Err(err);
            }
        };

        match outcome {
            Ok(handle) => {
                let handle = Arc::new(handle);
                *slot = Slot::Ready(Arc::clone(&handle));
                guard.settle(EngineState::Ready);
                info!("Engine ready (initialization #{})", sequence);
                Ok(handle)
            }
            Err(err) => {
                warn!("Engine initialization #{} failed: {}", sequence, err);
                *slot = Slot::Failed(err.clone());
                guard.settle(EngineState::Failed);
                Err(err)
            }
        }
    }

    /// Drops the current handle and returns to `Uninitialized`.
    ///
    /// The old interpreter is shut down; anything still holding its handle
    /// will see it as closed. An initialization in flight is abandoned and
    /// its half-started interpreter dropped.
    pub async fn reset(&self) {
        self.resets.send_modify(|count| *count += 1);
        let mut slot = self.slot.lock().await;
        let previous = std::mem::replace(&mut *slot, Slot::Empty);
        self.state.send_replace(EngineState::Uninitialized);

        if let Slot::Ready(handle) = previous {
            debug!("Shutting down engine for reset");
            if let Err(e) = handle.shutdown().await {
                debug!("Engine shutdown during reset failed: {}", e);
            }
        }
    }

    async fn initialize(&self) -> EngineResult<R::Handle> {
        let handle = self.runtime.init().await?;
        let prepared = match self.init_timeout {
            Some(limit) => tokio::time::timeout(limit, self.prepare(&handle))
                .await
                .unwrap_or_else(|_| Err(EngineError::InitTimeout(limit.as_millis().try_into().unwrap_or(u64::MAX)))),
            None => self.prepare(&handle).await,
        };
        if let Err(err) = prepared {
            if let Err(e) = handle.shutdown().await {
                debug!("Shutdown of half-initialized engine failed: {}", e);
            }
            return Err(err);
        }
        Ok(handle)
    }

    async fn prepare(&self, handle: &R::Handle) -> EngineResult<()> {
        debug!("Loading capabilities: {:?}", self.routine.capabilities);
        handle.load_capabilities(&self.routine.capabilities).await?;

        let source = self.routine.source.fetch().await?;
        debug!("Installing routine module {} ({} bytes)", self.routine.module, source.len());
        handle.install_routine(&source, &self.routine.module).await
    }
}
