//! Fire-and-forget usage events.
//!
//! Sinks never fail and never block the caller: a missing or saturated
//! backend simply drops the event.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Closed set of events the workflow reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryEvent {
    PageView,
    ImagesUploaded,
    MergeRequested,
    MergeSucceeded,
    MergeFailed,
    NewBatchStarted,
    ResultDownloaded,
}

impl TelemetryEvent {
    pub fn category(&self) -> &'static str {
        match self {
            Self::PageView => "navigation",
            Self::ImagesUploaded => "intake",
            Self::MergeRequested | Self::MergeSucceeded | Self::MergeFailed => "merge",
            Self::NewBatchStarted => "session",
            Self::ResultDownloaded => "result",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::PageView => "page_view",
            Self::ImagesUploaded => "images_uploaded",
            Self::MergeRequested => "merge_requested",
            Self::MergeSucceeded => "merge_succeeded",
            Self::MergeFailed => "merge_failed",
            Self::NewBatchStarted => "new_batch",
            Self::ResultDownloaded => "download",
        }
    }

    pub fn record(self) -> TelemetryRecord {
        TelemetryRecord {
            event: self,
            category: self.category(),
            label: self.label(),
        }
    }
}

/// Event with its analytics mapping resolved, ready for a reporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub event: TelemetryEvent,
    pub category: &'static str,
    pub label: &'static str,
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTelemetry;

impl TelemetrySink for NoTelemetry {
    fn emit(&self, _event: TelemetryEvent) {}
}

/// Reports events as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        info!(category = event.category(), label = event.label(), "telemetry");
    }
}

/// Hands events to an asynchronous reporter through a bounded channel.
///
/// `try_send` keeps `emit` non-blocking; a full or closed channel drops
/// the event.
#[derive(Debug, Clone)]
pub struct ChannelTelemetry {
    tx: mpsc::Sender<TelemetryRecord>,
}

impl ChannelTelemetry {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TelemetryRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl TelemetrySink for ChannelTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        if let Err(e) = self.tx.try_send(event.record()) {
            debug!("Telemetry event {} dropped: {}", event.label(), e);
        }
    }
}
