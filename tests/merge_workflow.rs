//! End-to-end merge workflow against the scripted engine.

use std::sync::Arc;
use std::time::Duration;
use hdr_merge_lib::core::{AttemptStatus, MERGE_FAILURE_MESSAGE};
use hdr_merge_lib::engine::scripted::{ECHO_MAGIC, Reply, ScriptedRuntime};
use hdr_merge_lib::engine::{EngineState, RoutineSource, RoutineSpec};
use hdr_merge_lib::telemetry::{ChannelTelemetry, NoTelemetry, TelemetryEvent, TelemetrySink};
use hdr_merge_lib::utils::MergeRejection;
use hdr_merge_lib::{HdrConfig, HdrError, ImageSource, MergeFailure, MergeOrchestrator, MergeOutcome, MergePhase};

type Session = Arc<MergeOrchestrator<ScriptedRuntime>>;

fn config(merge_timeout_ms: Option<u64>) -> HdrConfig {
    HdrConfig {
        merge_timeout_ms,
        cleanup_timeout_ms: 200,
        ..HdrConfig::default()
    }
}

fn routine() -> RoutineSpec {
    RoutineSpec {
        source: RoutineSource::Inline("def merge_hdr(images):\n    return b''.join(images)\n".to_string()),
        module: "hdr_processor".to_string(),
        function: "merge_hdr".to_string(),
        capabilities: vec!["numpy".to_string(), "cv2".to_string()],
    }
}

fn session_with(runtime: &ScriptedRuntime, config: HdrConfig, telemetry: Arc<dyn TelemetrySink>) -> Session {
    Arc::new(MergeOrchestrator::new(config, runtime.clone(), routine(), telemetry))
}

fn session(runtime: &ScriptedRuntime) -> Session {
    session_with(runtime, config(Some(5_000)), Arc::new(NoTelemetry))
}

/// `count` small in-memory exposures; exposure `i` is four bytes of value `i`.
fn exposures(count: usize) -> Vec<ImageSource> {
    (0..count)
        .map(|i| ImageSource::from_bytes(format!("exposure_{i}.jpg"), vec![i as u8; 4]))
        .collect()
}

async fn wait_for_phase(session: &Session, phase: MergePhase) {
    let mut ui = session.subscribe();
    ui.wait_for(|state| state.phase == phase).await.unwrap();
}

#[tokio::test]
async fn three_exposures_merge_into_a_downloadable_result() {
    let runtime = ScriptedRuntime::new();
    let session = session(&runtime);
    session.add_images(exposures(3)).await;
    assert!(session.ui_state().await.merge_enabled);

    let MergeOutcome::Succeeded { download } = session.merge().await.unwrap() else {
        panic!("merge did not succeed");
    };

    assert_eq!(download.len, ECHO_MAGIC.len() + 12);
    assert_eq!(download.mime, "image/tiff");

    let ui = session.ui_state().await;
    assert_eq!(ui.download.as_ref(), Some(&download));
    assert!(!ui.merge_enabled);
    assert!(!ui.spinner_visible);
    assert!(ui.new_batch_visible);
    assert_eq!(ui.progress, 100);
    assert_eq!(ui.message, None);

    assert_eq!(runtime.loaded_capabilities(), vec!["numpy", "cv2"]);
    assert_eq!(runtime.installed()[0].0, "hdr_processor");
    let invocations = runtime.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].0, "hdr_processor.merge_hdr");
    assert_eq!(invocations[0].1, vec![vec![0u8; 4], vec![1u8; 4], vec![2u8; 4]]);

    let artifact = session.take_result(download.id).await.unwrap();
    assert_eq!(artifact.bytes.len(), download.len);
    assert!(artifact.bytes.starts_with(ECHO_MAGIC));

    let record = session.last_attempt().await.unwrap();
    assert_eq!(record.status, AttemptStatus::Succeeded);
    assert_eq!(record.image_count, 3);
    assert_eq!(record.result_bytes, Some(download.len));
}

#[tokio::test]
async fn merge_control_follows_image_count() {
    let runtime = ScriptedRuntime::new();
    let session = session(&runtime);

    session.add_images(exposures(2)).await;
    assert!(!session.ui_state().await.merge_enabled);
    let rejected = session.merge().await.unwrap_err();
    assert!(matches!(
        rejected,
        HdrError::Rejected(MergeRejection::InvalidImageCount { count: 2, min: 3, max: 7 })
    ));
    assert_eq!(session.phase().await, MergePhase::Idle);
    assert_eq!(runtime.inits(), 0);

    session.add_images(exposures(1)).await;
    assert!(session.ui_state().await.merge_enabled);

    assert!(session.remove_image(0).await.is_some());
    let ui = session.ui_state().await;
    assert_eq!(ui.image_count, 2);
    assert!(!ui.merge_enabled);

    session.add_images(exposures(6)).await;
    assert_eq!(session.ui_state().await.image_count, 8);
    assert!(!session.ui_state().await.merge_enabled);
}

#[tokio::test]
async fn out_of_range_removal_is_ignored() {
    let runtime = ScriptedRuntime::new();
    let session = session(&runtime);
    session.add_images(exposures(3)).await;

    assert!(session.remove_image(3).await.is_none());
    assert_eq!(session.ui_state().await.image_count, 3);
}

#[tokio::test]
async fn stale_thumbnail_binding_removes_nothing() {
    let runtime = ScriptedRuntime::new();
    let session = session(&runtime);
    session.add_images(exposures(3)).await;

    let sheet = session.thumbnails().await;
    assert_eq!(sheet.entries.len(), 3);
    let binding = sheet.entries[1].removal;

    session.add_images(exposures(1)).await;
    assert!(session.remove_thumbnail(binding).await.is_none());
    assert_eq!(session.ui_state().await.image_count, 4);

    let fresh = session.thumbnails().await.entries[1].removal;
    assert_eq!(session.remove_thumbnail(fresh).await.as_deref(), Some("exposure_1.jpg"));
}

#[tokio::test]
async fn non_image_files_are_skipped() {
    let runtime = ScriptedRuntime::new();
    let session = session(&runtime);

    let report = session
        .add_images(vec![
            ImageSource::from_bytes("notes.txt", b"hello".to_vec()),
            ImageSource::from_bytes("bright.png", vec![1u8; 8]),
        ])
        .await;

    assert_eq!(report.accepted, 1);
    assert_eq!(report.rejected, vec!["notes.txt"]);
    assert_eq!(report.total, 1);
}

#[tokio::test]
async fn routine_error_shows_fixed_message_and_resets_engine() {
    let runtime = ScriptedRuntime::new();
    runtime.set_reply(Reply::Fail("ValueError: images differ in size".to_string()));
    let session = session(&runtime);
    session.add_images(exposures(3)).await;

    let outcome = session.merge().await.unwrap();
    let MergeOutcome::Failed { reason, message } = outcome else {
        panic!("merge did not fail");
    };
    assert!(matches!(reason, MergeFailure::Invocation(ref detail) if detail.contains("images differ")));
    assert_eq!(message, MERGE_FAILURE_MESSAGE);

    let ui = session.ui_state().await;
    assert!(!ui.spinner_visible);
    assert!(ui.new_batch_visible);
    assert!(ui.merge_enabled);
    assert!(ui.download.is_none());
    assert_eq!(ui.message, Some(MERGE_FAILURE_MESSAGE));
    assert_eq!(session.engine().state(), EngineState::Uninitialized);
    assert_eq!(runtime.shutdowns(), 1);

    runtime.set_reply(Reply::Echo);
    assert!(matches!(session.merge().await.unwrap(), MergeOutcome::Succeeded { .. }));
    assert_eq!(runtime.inits(), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_invocation_times_out() {
    let runtime = ScriptedRuntime::new();
    runtime.set_invoke_delay(Duration::from_secs(60));
    let session = session_with(&runtime, config(Some(50)), Arc::new(NoTelemetry));
    session.add_images(exposures(3)).await;

    let outcome = session.merge().await.unwrap();
    let MergeOutcome::Failed { reason, message } = outcome else {
        panic!("merge did not fail");
    };
    assert_eq!(reason, MergeFailure::Timeout(50));
    assert_eq!(message, MERGE_FAILURE_MESSAGE);

    assert_eq!(session.last_attempt().await.unwrap().status, AttemptStatus::TimedOut);
    assert_eq!(session.engine().state(), EngineState::Uninitialized);
    assert_eq!(runtime.shutdowns(), 1);
    assert_eq!(runtime.completed_invocations(), 0);

    let ui = session.ui_state().await;
    assert!(!ui.spinner_visible);
    assert!(ui.new_batch_visible);
}

#[tokio::test]
async fn new_batch_after_success_clears_the_session() {
    let runtime = ScriptedRuntime::new();
    let session = session(&runtime);
    session.add_images(exposures(3)).await;
    let MergeOutcome::Succeeded { download } = session.merge().await.unwrap() else {
        panic!("merge did not succeed");
    };

    session.new_batch().await;

    let ui = session.ui_state().await;
    assert_eq!(ui.image_count, 0);
    assert!(ui.download.is_none());
    assert!(!ui.merge_enabled);
    assert!(!ui.new_batch_visible);
    assert!(ui.upload_enabled);
    assert_eq!(ui.phase, MergePhase::Idle);
    assert_eq!(session.engine().state(), EngineState::Uninitialized);
    assert_eq!(runtime.shutdowns(), 1);
    assert!(matches!(session.take_result(download.id).await, Err(HdrError::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn second_merge_while_running_is_rejected() {
    let runtime = ScriptedRuntime::new();
    runtime.set_invoke_delay(Duration::from_millis(200));
    let session = session(&runtime);
    session.add_images(exposures(3)).await;

    let first = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.merge().await }
    });
    wait_for_phase(&session, MergePhase::Running).await;

    let ui = session.ui_state().await;
    assert!(ui.spinner_visible);
    assert!(!ui.merge_enabled);
    assert!(!ui.upload_enabled);
    assert!(matches!(
        session.merge().await,
        Err(HdrError::Rejected(MergeRejection::AttemptInFlight))
    ));

    assert!(matches!(first.await.unwrap().unwrap(), MergeOutcome::Succeeded { .. }));
    assert_eq!(runtime.invocations().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn removal_during_a_merge_leaves_the_submitted_set_alone() {
    let runtime = ScriptedRuntime::new();
    runtime.set_invoke_delay(Duration::from_millis(200));
    let session = session(&runtime);
    session.add_images(exposures(3)).await;

    let attempt = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.merge().await }
    });
    wait_for_phase(&session, MergePhase::Running).await;
    session.remove_image(0).await;

    let MergeOutcome::Succeeded { download } = attempt.await.unwrap().unwrap() else {
        panic!("merge did not succeed");
    };
    assert_eq!(download.len, ECHO_MAGIC.len() + 12);
    assert_eq!(runtime.invocations()[0].1.len(), 3);
    assert_eq!(session.ui_state().await.image_count, 2);
}

#[tokio::test]
async fn cleanup_runs_once_per_attempt_and_its_failure_stays_silent() {
    let runtime = ScriptedRuntime::new();
    runtime.fail_cleanup(true);
    let session = session(&runtime);
    session.add_images(exposures(3)).await;

    assert!(matches!(session.merge().await.unwrap(), MergeOutcome::Succeeded { .. }));
    assert_eq!(runtime.releases(), 1);
    assert_eq!(runtime.collections(), 1);
    assert_eq!(session.phase().await, MergePhase::Succeeded);

    session.new_batch().await;
    session.add_images(exposures(4)).await;
    assert!(matches!(session.merge().await.unwrap(), MergeOutcome::Succeeded { .. }));
    assert_eq!(runtime.releases(), 2);
    assert_eq!(runtime.collections(), 2);
}

#[tokio::test]
async fn capability_failure_fails_the_attempt_and_a_retry_reloads() {
    let runtime = ScriptedRuntime::new();
    runtime.fail_capabilities(Some("No module named 'cv2'"));
    let session = session(&runtime);
    session.add_images(exposures(3)).await;

    let outcome = session.merge().await.unwrap();
    assert!(matches!(
        outcome,
        MergeOutcome::Failed { reason: MergeFailure::EngineInit(_), .. }
    ));
    assert_eq!(session.engine().state(), EngineState::Uninitialized);
    assert_eq!(runtime.releases(), 0);
    assert!(runtime.invocations().is_empty());

    runtime.fail_capabilities(None);
    assert!(matches!(session.merge().await.unwrap(), MergeOutcome::Succeeded { .. }));
    assert_eq!(runtime.inits(), 2);
    assert_eq!(session.engine().init_sequences(), 2);
}

#[tokio::test(start_paused = true)]
async fn engine_loading_is_reported_while_initializing() {
    let runtime = ScriptedRuntime::new();
    runtime.set_init_delay(Duration::from_millis(300));
    let session = session(&runtime);
    session.add_images(exposures(3)).await;

    let attempt = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.merge().await }
    });
    let mut engine = session.engine().subscribe();
    engine.wait_for(|state| *state == EngineState::Initializing).await.unwrap();

    let ui = session.ui_state().await;
    assert!(ui.engine_loading);
    assert!(ui.spinner_visible);
    assert_eq!(ui.phase, MergePhase::AwaitingEngine);

    assert!(matches!(attempt.await.unwrap().unwrap(), MergeOutcome::Succeeded { .. }));
    assert!(!session.ui_state().await.engine_loading);
}

#[tokio::test(start_paused = true)]
async fn result_arriving_after_a_new_batch_is_discarded() {
    let runtime = ScriptedRuntime::new();
    runtime.set_invoke_delay(Duration::from_millis(200));
    let session = session(&runtime);
    session.add_images(exposures(3)).await;

    let attempt = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.merge().await }
    });
    wait_for_phase(&session, MergePhase::Running).await;
    session.new_batch().await;

    assert_eq!(attempt.await.unwrap().unwrap(), MergeOutcome::Superseded);
    let ui = session.ui_state().await;
    assert_eq!(ui.phase, MergePhase::Idle);
    assert!(ui.download.is_none());
    assert!(ui.message.is_none());
    assert_eq!(ui.image_count, 0);
}

#[tokio::test(start_paused = true)]
async fn new_batch_does_not_wait_for_a_slow_engine_start() {
    let runtime = ScriptedRuntime::new();
    runtime.set_init_delay(Duration::from_secs(600));
    let session = session(&runtime);
    session.add_images(exposures(3)).await;

    let attempt = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.merge().await }
    });
    let mut engine = session.engine().subscribe();
    engine.wait_for(|state| *state == EngineState::Initializing).await.unwrap();

    let started = tokio::time::Instant::now();
    session.new_batch().await;
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(attempt.await.unwrap().unwrap(), MergeOutcome::Superseded);
    assert_eq!(session.engine().state(), EngineState::Uninitialized);
    let ui = session.ui_state().await;
    assert_eq!(ui.phase, MergePhase::Idle);
    assert!(!ui.spinner_visible);
    assert!(ui.upload_enabled);

    runtime.set_init_delay(Duration::ZERO);
    session.add_images(exposures(3)).await;
    assert!(matches!(session.merge().await.unwrap(), MergeOutcome::Succeeded { .. }));
    assert_eq!(runtime.inits(), 2);
}

#[tokio::test(start_paused = true)]
async fn hanging_capability_load_fails_the_attempt() {
    let runtime = ScriptedRuntime::new();
    runtime.set_capability_delay(Duration::from_secs(600));
    let config = HdrConfig {
        init_timeout_ms: Some(100),
        ..config(Some(5_000))
    };
    let session = session_with(&runtime, config, Arc::new(NoTelemetry));
    session.add_images(exposures(3)).await;

    let MergeOutcome::Failed { reason, message } = session.merge().await.unwrap() else {
        panic!("merge did not fail");
    };
    assert!(matches!(reason, MergeFailure::EngineInit(ref detail) if detail.contains("timed out")));
    assert_eq!(message, MERGE_FAILURE_MESSAGE);
    assert_eq!(session.engine().state(), EngineState::Uninitialized);
    assert_eq!(runtime.shutdowns(), 1);

    let ui = session.ui_state().await;
    assert!(!ui.spinner_visible);
    assert!(!ui.engine_loading);
    assert!(ui.merge_enabled);

    runtime.set_capability_delay(Duration::ZERO);
    assert!(matches!(session.merge().await.unwrap(), MergeOutcome::Succeeded { .. }));
}

#[tokio::test]
async fn picked_files_are_submitted_in_set_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut sources = Vec::new();
    // Largest file first so the reads are least likely to finish in set order.
    for (i, len) in [(0u8, 256 * 1024), (1, 16), (2, 4 * 1024)] {
        let path = dir.path().join(format!("bracket_{i}.tif"));
        std::fs::write(&path, vec![i; len]).unwrap();
        sources.push(ImageSource::probe(&path).await.unwrap());
    }
    sources.insert(1, ImageSource::from_bytes("dropped.png", vec![9u8; 8]));

    let runtime = ScriptedRuntime::new();
    let session = session(&runtime);
    session.add_images(sources).await;
    assert!(matches!(session.merge().await.unwrap(), MergeOutcome::Succeeded { .. }));

    let submitted = &runtime.invocations()[0].1;
    let firsts: Vec<u8> = submitted.iter().map(|buffer| buffer[0]).collect();
    let lens: Vec<usize> = submitted.iter().map(Vec::len).collect();
    assert_eq!(firsts, vec![0, 9, 1, 2]);
    assert_eq!(lens, vec![256 * 1024, 8, 16, 4 * 1024]);
}

#[tokio::test]
async fn telemetry_follows_the_workflow() {
    let runtime = ScriptedRuntime::new();
    let (telemetry, mut records) = ChannelTelemetry::new(16);
    let session = session_with(&runtime, config(Some(5_000)), Arc::new(telemetry));

    session.page_view();
    session.add_images(exposures(3)).await;
    let MergeOutcome::Succeeded { download } = session.merge().await.unwrap() else {
        panic!("merge did not succeed");
    };
    session.take_result(download.id).await.unwrap();
    session.new_batch().await;

    let mut events = Vec::new();
    while let Ok(record) = records.try_recv() {
        events.push(record.event);
    }
    assert_eq!(
        events,
        vec![
            TelemetryEvent::PageView,
            TelemetryEvent::ImagesUploaded,
            TelemetryEvent::MergeRequested,
            TelemetryEvent::MergeSucceeded,
            TelemetryEvent::ResultDownloaded,
            TelemetryEvent::NewBatchStarted,
        ]
    );
}

#[tokio::test]
async fn saved_result_is_written_once() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = ScriptedRuntime::new();
    let session = session(&runtime);
    session.add_images(exposures(3)).await;
    let MergeOutcome::Succeeded { download } = session.merge().await.unwrap() else {
        panic!("merge did not succeed");
    };

    let path = session.save_result(download.id, dir.path()).await.unwrap();
    assert_eq!(std::fs::read(&path).unwrap().len(), download.len);
    assert!(path.ends_with(&download.file_name));

    assert!(matches!(
        session.save_result(download.id, dir.path()).await,
        Err(HdrError::NotFound(_))
    ));
}

#[tokio::test]
async fn saving_into_a_missing_directory_keeps_the_result() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = ScriptedRuntime::new();
    let session = session(&runtime);
    session.add_images(exposures(3)).await;
    let MergeOutcome::Succeeded { download } = session.merge().await.unwrap() else {
        panic!("merge did not succeed");
    };

    let missing = dir.path().join("not-there");
    assert!(matches!(
        session.save_result(download.id, &missing).await,
        Err(HdrError::Validation(_))
    ));

    let file = dir.path().join("plain.txt");
    std::fs::write(&file, b"x").unwrap();
    assert!(matches!(
        session.save_result(download.id, &file).await,
        Err(HdrError::Validation(_))
    ));

    assert_eq!(session.ui_state().await.download.as_ref(), Some(&download));
    session.save_result(download.id, dir.path()).await.unwrap();
}

#[tokio::test]
async fn warmup_failure_leaves_the_engine_uninitialized() {
    let runtime = ScriptedRuntime::new();
    runtime.fail_init(Some("python3: not found"));
    let session = session(&runtime);

    assert!(matches!(session.warmup().await, Err(HdrError::Engine(_))));
    assert_eq!(session.engine().state(), EngineState::Uninitialized);

    runtime.fail_init(None);
    session.warmup().await.unwrap();
    assert_eq!(session.engine().state(), EngineState::Ready);
    assert!(session.ui_state().await.image_count == 0);
}
