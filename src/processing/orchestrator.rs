//! The merge state machine.
//!
//! One [`MergeOrchestrator`] exists per session. It owns the working set, the
//! engine lifecycle and the presenter, and sequences every attempt through
//! `AwaitingEngine → Submitting → Running → Succeeded | Failed`.
//!
//! Session state sits behind a mutex that is never held across engine or file
//! awaits; each attempt carries an id, and any transition for an id that is no
//! longer current (a new batch started meanwhile) is dropped.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::error::Elapsed;
use tracing::{debug, info, warn};
use crate::config::HdrConfig;
use crate::core::{
    AttemptRecord, AttemptStatus, MERGE_FAILURE_MESSAGE, MergeFailure, MergeOutcome, MergePhase,
    UiState,
};
use crate::engine::{EngineHandle, EngineLifecycle, EngineRuntime, RoutineSpec};
use crate::intake::{self, ImageSource, IntakeReport, RemovalBinding, ThumbnailSheet, WorkingSet};
use crate::processing::presenter::{Artifact, ResultPresenter};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::utils::{EngineError, EngineResult, HdrError, HdrResult, ImageFormat, MergeRejection};

struct Session {
    intake: WorkingSet,
    phase: MergePhase,
    presenter: ResultPresenter,
    attempt_seq: u64,
    /// Attempt whose transitions are still applied; `None` after a new batch
    current_attempt: Option<u64>,
    last_attempt: Option<AttemptRecord>,
}

pub struct MergeOrchestrator<R: EngineRuntime> {
    config: HdrConfig,
    engine: EngineLifecycle<R>,
    telemetry: Arc<dyn TelemetrySink>,
    session: Mutex<Session>,
    ui: watch::Sender<UiState>,
}

impl<R: EngineRuntime> MergeOrchestrator<R> {
    pub fn new(
        config: HdrConfig,
        runtime: R,
        routine: RoutineSpec,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let engine = EngineLifecycle::new(runtime, routine).with_init_timeout(config.init_timeout());
        let intake = WorkingSet::new(config.intake.clone());
        let initial = UiState::derive(0, intake.is_valid(), engine.state(), &MergePhase::Idle, None);
        let (ui, _) = watch::channel(initial);

        Self {
            config,
            engine,
            telemetry,
            session: Mutex::new(Session {
                intake,
                phase: MergePhase::Idle,
                presenter: ResultPresenter::new(),
                attempt_seq: 0,
                current_attempt: None,
                last_attempt: None,
            }),
            ui,
        }
    }

    pub fn config(&self) -> &HdrConfig {
        &self.config
    }

    pub fn engine(&self) -> &EngineLifecycle<R> {
        &self.engine
    }

    /// Receives a fresh [`UiState`] after every transition.
    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.ui.subscribe()
    }

    pub fn page_view(&self) {
        self.telemetry.emit(TelemetryEvent::PageView);
    }

    pub async fn ui_state(&self) -> UiState {
        let session = self.session.lock().await;
        self.derive(&session)
    }

    /// Re-derives and broadcasts the UI state (used when only the engine state moved).
    pub async fn publish(&self) {
        let session = self.session.lock().await;
        self.publish_locked(&session);
    }

    pub async fn phase(&self) -> MergePhase {
        self.session.lock().await.phase.clone()
    }

    pub async fn last_attempt(&self) -> Option<AttemptRecord> {
        self.session.lock().await.last_attempt.clone()
    }

    // ── Intake ───────────────────────────────────────────────────────────────

    pub async fn add_images(&self, sources: Vec<ImageSource>) -> IntakeReport {
        let report = {
            let mut session = self.session.lock().await;
            let report = session.intake.accept(sources);
            self.publish_locked(&session);
            report
        };
        if report.accepted > 0 {
            debug!("Staged {} images ({} total)", report.accepted, report.total);
            self.telemetry.emit(TelemetryEvent::ImagesUploaded);
        }
        report
    }

    /// Removes by position; out of range is ignored. Returns the removed name.
    pub async fn remove_image(&self, index: usize) -> Option<String> {
        let mut session = self.session.lock().await;
        let removed = session.intake.remove(index).map(|s| s.name().to_string());
        self.publish_locked(&session);
        removed
    }

    /// Removes through a thumbnail binding; stale bindings are ignored.
    pub async fn remove_thumbnail(&self, binding: RemovalBinding) -> Option<String> {
        let mut session = self.session.lock().await;
        let removed = session.intake.remove_bound(binding).map(|s| s.name().to_string());
        self.publish_locked(&session);
        removed
    }

    pub async fn thumbnails(&self) -> ThumbnailSheet {
        intake::thumbnails::render(&self.session.lock().await.intake)
    }

    pub async fn thumbnail_preview(&self, binding: RemovalBinding, max_edge: u32) -> HdrResult<Vec<u8>> {
        let source = {
            let session = self.session.lock().await;
            session
                .intake
                .get(binding)
                .cloned()
                .ok_or_else(|| HdrError::not_found("Thumbnail belongs to an older image set"))?
        };
        intake::thumbnails::preview(&source, max_edge).await
    }

    // ── Merge ────────────────────────────────────────────────────────────────

    /// Runs one attempt to a terminal phase.
    ///
    /// Rejected without any state change while the set size is out of bounds
    /// or another attempt is in flight.
    pub async fn merge(&self) -> HdrResult<MergeOutcome> {
        let (id, snapshot) = {
            let mut session = self.session.lock().await;
            if session.phase.is_busy() {
                debug!("Merge request ignored: attempt already in flight");
                return Err(MergeRejection::AttemptInFlight.into());
            }
            if !session.intake.is_valid() {
                let policy = session.intake.policy();
                return Err(MergeRejection::InvalidImageCount {
                    count: session.intake.len(),
                    min: policy.min_images,
                    max: policy.max_images,
                }
                .into());
            }

            session.attempt_seq += 1;
            let id = session.attempt_seq;
            let snapshot = session.intake.snapshot();
            session.current_attempt = Some(id);
            session.phase = MergePhase::AwaitingEngine;
            session.last_attempt = Some(AttemptRecord {
                id,
                image_count: snapshot.len(),
                status: AttemptStatus::Running,
                result_bytes: None,
                mime: None,
            });
            self.publish_locked(&session);
            (id, snapshot)
        };

        info!("Merge attempt {} started with {} images", id, snapshot.len());
        self.telemetry.emit(TelemetryEvent::MergeRequested);
        Ok(self.run_attempt(id, snapshot).await)
    }

    async fn run_attempt(&self, id: u64, snapshot: Vec<ImageSource>) -> MergeOutcome {
        let handle = match self.engine.ensure_ready().await {
            Ok(handle) => handle,
            Err(e) => return self.fail(id, MergeFailure::EngineInit(e.to_string())).await,
        };
        self.publish().await;

        let outcome = self.drive(id, &handle, snapshot).await;
        self.cleanup(id, &handle).await;
        outcome
    }

    async fn drive(&self, id: u64, handle: &Arc<R::Handle>, snapshot: Vec<ImageSource>) -> MergeOutcome {
        if !self.advance(id, MergePhase::Submitting).await {
            return MergeOutcome::Superseded;
        }
        let buffers = match read_in_order(&snapshot, |source| source.read_bytes()).await {
            Ok(buffers) => buffers,
            Err(e) => return self.fail(id, MergeFailure::Read(e.to_string())).await,
        };

        if !self.advance(id, MergePhase::Running).await {
            return MergeOutcome::Superseded;
        }
        match self.invoke(handle, buffers).await {
            Ok(bytes) => self.succeed(id, bytes).await,
            Err(failure) => self.fail(id, failure).await,
        }
    }

    /// Runs the routine on its own task so a timeout can abandon it; a result
    /// that arrives afterwards goes nowhere.
    async fn invoke(&self, handle: &Arc<R::Handle>, buffers: Vec<Vec<u8>>) -> Result<Vec<u8>, MergeFailure> {
        let routine = self.engine.routine().entry_point();
        let handle = Arc::clone(handle);
        let task = tokio::spawn(async move { handle.invoke(&routine, buffers).await });

        let joined = match self.config.merge_timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), task).await {
                Ok(joined) => joined,
                Err(_) => return Err(MergeFailure::Timeout(ms)),
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(MergeFailure::Invocation(e.to_string())),
            Err(e) => Err(MergeFailure::Invocation(format!("invocation task failed: {e}"))),
        }
    }

    async fn advance(&self, id: u64, phase: MergePhase) -> bool {
        let mut session = self.session.lock().await;
        if session.current_attempt != Some(id) {
            debug!("Attempt {} superseded before {:?}", id, phase);
            return false;
        }
        session.phase = phase;
        self.publish_locked(&session);
        true
    }

    async fn succeed(&self, id: u64, bytes: Vec<u8>) -> MergeOutcome {
        let download = {
            let mut session = self.session.lock().await;
            if session.current_attempt != Some(id) {
                debug!("Discarding late result of attempt {} ({} bytes)", id, bytes.len());
                return MergeOutcome::Superseded;
            }

            let format = self.config.output_format;
            if let Some(sniffed) = ImageFormat::sniff(&bytes).filter(|f| *f != format) {
                warn!("Engine returned {:?} data but output is configured as {:?}", sniffed, format);
            }
            let download = session.presenter.present(bytes, format);
            session.phase = MergePhase::Succeeded;
            if let Some(record) = session.last_attempt.as_mut().filter(|r| r.id == id) {
                record.status = AttemptStatus::Succeeded;
                record.result_bytes = Some(download.len);
                record.mime = Some(download.mime);
            }
            self.publish_locked(&session);
            download
        };

        info!("Merge attempt {} succeeded: {} ({} bytes)", id, download.file_name, download.len);
        self.telemetry.emit(TelemetryEvent::MergeSucceeded);
        MergeOutcome::Succeeded { download }
    }

    /// Records a failure. The engine is reset before the phase leaves the busy
    /// span, so a retry can never pick up the old handle.
    async fn fail(&self, id: u64, failure: MergeFailure) -> MergeOutcome {
        if self.session.lock().await.current_attempt != Some(id) {
            debug!("Dropping failure of superseded attempt {}: {}", id, failure);
            return MergeOutcome::Superseded;
        }

        self.engine.reset().await;

        {
            let mut session = self.session.lock().await;
            if session.current_attempt != Some(id) {
                return MergeOutcome::Superseded;
            }
            session.phase = MergePhase::Failed(failure.clone());
            if let Some(record) = session.last_attempt.as_mut().filter(|r| r.id == id) {
                record.status = failure.status();
            }
            self.publish_locked(&session);
        }

        warn!("Merge attempt {} failed: {}", id, failure);
        self.telemetry.emit(TelemetryEvent::MergeFailed);
        MergeOutcome::Failed {
            reason: failure,
            message: MERGE_FAILURE_MESSAGE,
        }
    }

    /// Best-effort release of interpreter memory. Never fails the attempt.
    async fn cleanup(&self, id: u64, handle: &R::Handle) {
        let limit = self.config.cleanup_timeout();
        log_cleanup(id, "scratch release", tokio::time::timeout(limit, handle.release_scratch()).await);
        log_cleanup(id, "garbage collection", tokio::time::timeout(limit, handle.collect_garbage()).await);
    }

    // ── Session ──────────────────────────────────────────────────────────────

    /// Clears the set and the result, and forces the engine to reload.
    /// An attempt still in flight is superseded and its outcome dropped.
    pub async fn new_batch(&self) {
        {
            let mut session = self.session.lock().await;
            if let Some(id) = session.current_attempt.filter(|_| session.phase.is_busy()) {
                info!("Attempt {} superseded by a new batch", id);
            }
            session.intake.clear();
            session.presenter.discard();
            session.phase = MergePhase::Idle;
            session.current_attempt = None;
            self.publish_locked(&session);
        }

        self.engine.reset().await;
        self.publish().await;
        info!("New batch started");
        self.telemetry.emit(TelemetryEvent::NewBatchStarted);
    }

    /// Hands out the live result once.
    pub async fn take_result(&self, id: u64) -> HdrResult<Artifact> {
        let artifact = {
            let mut session = self.session.lock().await;
            let artifact = session
                .presenter
                .take(id)
                .ok_or_else(|| HdrError::not_found(format!("No live result with id {id}")))?;
            self.publish_locked(&session);
            artifact
        };
        self.telemetry.emit(TelemetryEvent::ResultDownloaded);
        Ok(artifact)
    }

    /// Writes the live result into `dir`; the reference is consumed only once
    /// the file is on disk.
    pub async fn save_result(&self, id: u64, dir: impl AsRef<Path>) -> HdrResult<PathBuf> {
        let dir = dir.as_ref();
        let is_dir = tokio::fs::metadata(dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(HdrError::validation(format!(
                "Download directory does not exist: {}", dir.display()
            )));
        }

        let artifact = {
            let session = self.session.lock().await;
            session
                .presenter
                .get(id)
                .cloned()
                .ok_or_else(|| HdrError::not_found(format!("No live result with id {id}")))?
        };
        let path = artifact.save_to(dir).await?;
        self.take_result(id).await?;
        info!("Saved merge result to {}", path.display());
        Ok(path)
    }

    /// Starts the engine ahead of the first merge. A failure leaves it
    /// uninitialized so the next merge retries from scratch.
    pub async fn warmup(&self) -> HdrResult<()> {
        let result = self.engine.ensure_ready().await;
        let outcome = match result {
            Ok(_) => Ok(()),
            Err(e) => {
                self.engine.reset().await;
                Err(HdrError::Engine(e))
            }
        };
        self.publish().await;
        outcome
    }

    fn derive(&self, session: &Session) -> UiState {
        UiState::derive(
            session.intake.len(),
            session.intake.is_valid(),
            self.engine.state(),
            &session.phase,
            session.presenter.current(),
        )
    }

    fn publish_locked(&self, session: &Session) {
        self.ui.send_replace(self.derive(session));
    }
}

/// Reads every source concurrently. Reads finish in any order; the buffers
/// come back in set order.
async fn read_in_order<'a, T, F, Fut>(sources: &'a [T], read: F) -> HdrResult<Vec<Vec<u8>>>
where
    F: FnMut(&'a T) -> Fut,
    Fut: Future<Output = HdrResult<Vec<u8>>>,
{
    futures::future::try_join_all(sources.iter().map(read)).await
}

fn log_cleanup(id: u64, step: &str, result: Result<EngineResult<()>, Elapsed>) {
    match result {
        Ok(Ok(())) => debug!("Attempt {} cleanup: {} done", id, step),
        Ok(Err(EngineError::Closed(_))) => debug!("Attempt {} cleanup: {} skipped, engine already released", id, step),
        Ok(Err(e)) => warn!("Attempt {} cleanup: {} failed: {}", id, step, e),
        Err(_) => warn!("Attempt {} cleanup: {} timed out", id, step),
    }
}
