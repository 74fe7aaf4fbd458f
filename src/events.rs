//! Lifecycle notifications emitted while loading and running a session.

use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::Sender;

use parking_lot::Mutex;

use crate::models::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Load,
    Analyze,
    Plan,
    Prepare,
    Execute,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Load => "load",
            Phase::Analyze => "analyze",
            Phase::Plan => "plan",
            Phase::Prepare => "prepare",
            Phase::Execute => "execute",
        };
        f.write_str(name)
    }
}

/// Sent from worker threads; `index` is the track position in the session.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    PhaseStarted { phase: Phase, tracks: usize },
    PhaseCompleted { phase: Phase },
    TrackLoaded { index: usize, filename: String },
    LoadFailed { index: usize, filename: String, reason: String },
    TrackStarted { phase: Phase, index: usize },
    TrackCompleted { phase: Phase, index: usize },
    DetectorCompleted { index: Option<usize>, detector_id: String, severity: Severity },
    DetectorFailed { index: Option<usize>, detector_id: String, reason: String },
    ProcessorCompleted { index: usize, processor_id: String, gain_db: f64 },
    ProcessorFailed { index: usize, processor_id: String, reason: String },
    FileWritten { index: usize, path: PathBuf },
    WriteFailed { index: usize, reason: String },
}

/// Receives events from any thread.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Forwards events into an mpsc channel. A dropped receiver is ignored.
pub struct ChannelSink {
    sender: Mutex<Sender<PipelineEvent>>,
}

impl ChannelSink {
    pub fn new(sender: Sender<PipelineEvent>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.lock().send(event);
    }
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::PhaseStarted { phase, tracks } => tracing::info!(%phase, tracks, "phase started"),
            PipelineEvent::PhaseCompleted { phase } => tracing::info!(%phase, "phase completed"),
            PipelineEvent::LoadFailed { filename, reason, .. } => {
                tracing::warn!(file = %filename, %reason, "load failed")
            }
            PipelineEvent::DetectorFailed { index, detector_id, reason } => {
                tracing::warn!(?index, detector = %detector_id, %reason, "detector failed")
            }
            PipelineEvent::ProcessorFailed { index, processor_id, reason } => {
                tracing::warn!(index, processor = %processor_id, %reason, "processor failed")
            }
            PipelineEvent::WriteFailed { index, reason } => tracing::warn!(index, %reason, "write failed"),
            other => tracing::trace!(event = ?other),
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: PipelineEvent) {}
}
