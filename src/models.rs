use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cache::TrackCache;
use crate::config::{AnchorStrategy, Config};
use crate::dsp::clip::ClipRange;

/// Planar sample storage: one vector per channel, all of equal length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Build from per-channel vectors. Channels are truncated to the shortest one.
    pub fn from_planar(mut channels: Vec<Vec<f32>>) -> Self {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        for ch in &mut channels {
            ch.truncate(frames);
        }
        Self { channels }
    }

    pub fn from_interleaved(samples: &[f32], channels: usize) -> Self {
        if channels == 0 {
            return Self::default();
        }
        let frames = samples.len() / channels;
        let mut planar = vec![Vec::with_capacity(frames); channels];
        for frame in samples.chunks_exact(channels) {
            for (ch, &s) in frame.iter().enumerate() {
                planar[ch].push(s);
            }
        }
        Self { channels: planar }
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn planar(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn interleaved(&self) -> Vec<f32> {
        let frames = self.frames();
        let mut out = Vec::with_capacity(frames * self.channels());
        for i in 0..frames {
            for ch in &self.channels {
                out.push(ch[i]);
            }
        }
        out
    }

    pub fn scale_in_place(&mut self, gain: f32) {
        for ch in &mut self.channels {
            for s in ch.iter_mut() {
                *s *= gain;
            }
        }
    }
}

/// Stored sample format of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BitDepth {
    Int(u16),
    Float(u16),
    Unknown,
}

impl fmt::Display for BitDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BitDepth::Int(bits) => write!(f, "{}-bit", bits),
            BitDepth::Float(bits) => write!(f, "{}-bit Float", bits),
            BitDepth::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Clean,
    Info,
    Attention,
    Problem,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Clean => "clean",
            Severity::Info => "info",
            Severity::Attention => "attention",
            Severity::Problem => "problem",
        };
        f.write_str(label)
    }
}

/// A located finding on the timeline of one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueLocation {
    pub sample_start: usize,
    /// Inclusive; `None` marks a point event.
    pub sample_end: Option<usize>,
    /// `None` means all channels.
    pub channel: Option<usize>,
    pub severity: Severity,
    pub label: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freq_min_hz: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freq_max_hz: Option<f64>,
}

impl IssueLocation {
    pub fn range(
        start: usize,
        end: usize,
        channel: Option<usize>,
        severity: Severity,
        label: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            sample_start: start,
            sample_end: Some(end),
            channel,
            severity,
            label: label.into(),
            description: description.into(),
            freq_min_hz: None,
            freq_max_hz: None,
        }
    }

    /// Span the entire track on every channel.
    pub fn whole_file(
        total_samples: usize,
        severity: Severity,
        label: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self::range(0, total_samples.saturating_sub(1), None, severity, label, description)
    }

    pub fn with_band(mut self, min_hz: f64, max_hz: f64) -> Self {
        self.freq_min_hz = Some(min_hz);
        self.freq_max_hz = Some(max_hz);
        self
    }
}

/// Label produced by the transient/sustained classifier and echoed by processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Transient,
    Sustained,
    #[serde(rename = "Transient (Forced)")]
    TransientForced,
    #[serde(rename = "Sustained (Forced)")]
    SustainedForced,
    Silent,
    Skip,
    Error,
}

impl Classification {
    pub fn is_transient(self) -> bool {
        matches!(self, Classification::Transient | Classification::TransientForced)
    }

    pub fn is_sustained(self) -> bool {
        matches!(self, Classification::Sustained | Classification::SustainedForced)
    }

    pub fn label(self) -> &'static str {
        match self {
            Classification::Transient => "Transient",
            Classification::Sustained => "Sustained",
            Classification::TransientForced => "Transient (Forced)",
            Classification::SustainedForced => "Sustained (Forced)",
            Classification::Silent => "Silent",
            Classification::Skip => "Skip",
            Classification::Error => "Error",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StereoRegion {
    pub start: usize,
    pub end: usize,
    pub min_correlation: f64,
    pub max_mono_loss_db: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsonicRegion {
    pub start: usize,
    pub end: usize,
    pub channel: Option<usize>,
    pub max_ratio_db: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TailRegion {
    pub start: usize,
    pub end: usize,
    pub max_exceed_db: f64,
}

/// Loudness metrics and the classifier's decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierMetrics {
    pub classification: Classification,
    pub peak_db: f64,
    pub rms_max_db: f64,
    pub rms_anchor_db: f64,
    /// Mean-square value behind `rms_anchor_db`.
    pub rms_anchor_mean: f64,
    pub anchor: AnchorStrategy,
    pub crest_db: f64,
    pub decay_db: f64,
    pub density: f64,
    pub near_threshold: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StereoCompatData {
    pub correlation: f64,
    pub mono_loss_db: f64,
    pub whole_file_warning: bool,
    pub windowed: bool,
    pub regions: Vec<StereoRegion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsonicData {
    pub cutoff_hz: f64,
    pub combined_ratio_db: f64,
    pub channel_ratio_db: Vec<f64>,
    pub warning_channels: Vec<usize>,
    pub regions: Vec<SubsonicRegion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatData {
    pub expected_sample_rate: u32,
    pub actual_sample_rate: u32,
    pub expected_bit_depth: BitDepth,
    pub actual_bit_depth: BitDepth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LengthData {
    pub expected_samples: usize,
    pub actual_samples: usize,
    /// Length of this track at the modal sample rate.
    pub normalized_samples: usize,
    pub expected_duration_secs: f64,
    pub actual_duration_secs: f64,
}

/// Machine-readable payload of a detector result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorData {
    None,
    Silence { peak_db: f64, is_silent: bool },
    Clipping { runs: usize, ranges: Vec<ClipRange> },
    DcOffset { max_dc_db: f64, channel_dc_db: Vec<f64> },
    StereoCompat(StereoCompatData),
    DualMono { is_dual_mono: bool, max_diff: f64 },
    OneSidedSilence { channel_rms_db: Vec<f64>, silent_channel: Option<usize> },
    Subsonic(SubsonicData),
    Classifier(ClassifierMetrics),
    TailExceedance { anchor_db: f64, regions: Vec<TailRegion> },
    Format(FormatData),
    Length(LengthData),
}

impl DetectorData {
    pub fn as_classifier(&self) -> Option<&ClassifierMetrics> {
        match self {
            DetectorData::Classifier(metrics) => Some(metrics),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorResult {
    pub detector_id: String,
    pub severity: Severity,
    pub summary: String,
    pub data: DetectorData,
    #[serde(default)]
    pub detail_lines: Vec<String>,
    pub hint: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub issues: Vec<IssueLocation>,
}

impl DetectorResult {
    pub fn new(
        detector_id: impl Into<String>,
        severity: Severity,
        summary: impl Into<String>,
        data: DetectorData,
    ) -> Self {
        Self {
            detector_id: detector_id.into(),
            severity,
            summary: summary.into(),
            data,
            detail_lines: Vec::new(),
            hint: None,
            error: None,
            issues: Vec::new(),
        }
    }

    pub fn clean(detector_id: impl Into<String>, summary: impl Into<String>, data: DetectorData) -> Self {
        Self::new(detector_id, Severity::Clean, summary, data)
    }

    /// The result recorded when a detector faults or cannot run.
    pub fn failed(detector_id: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        let mut result = Self::new(
            detector_id,
            Severity::Problem,
            format!("detector failed: {}", error),
            DetectorData::None,
        );
        result.error = Some(error);
        result
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, lines: Vec<String>) -> Self {
        self.detail_lines = lines;
        self
    }

    pub fn with_issues(mut self, issues: Vec<IssueLocation>) -> Self {
        self.issues = issues;
        self
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Auxiliary values attached to a processor decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessorData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_db: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rms_anchor_db: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_rms_db: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_peak_db: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gain_for_rms_db: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gain_for_peak_db: Option<f64>,
    /// Gain before group levelling replaced it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_gain_db: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fader_offset_db: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fader_rebalance_shift_db: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_peak_db: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorResult {
    pub processor_id: String,
    pub gain_db: f64,
    pub classification: Classification,
    pub method: String,
    pub data: ProcessorData,
    pub error: Option<String>,
}

impl ProcessorResult {
    pub fn new(
        processor_id: impl Into<String>,
        gain_db: f64,
        classification: Classification,
        method: impl Into<String>,
    ) -> Self {
        Self {
            processor_id: processor_id.into(),
            gain_db,
            classification,
            method: method.into(),
            data: ProcessorData::default(),
            error: None,
        }
    }

    pub fn failed(processor_id: impl Into<String>, error: impl Into<String>) -> Self {
        let mut result = Self::new(processor_id, 0.0, Classification::Error, "Error");
        result.error = Some(error.into());
        result
    }

    pub fn with_data(mut self, data: ProcessorData) -> Self {
        self.data = data;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum TrackStatus {
    Ok,
    Error(String),
}

/// User override for the gain classification of one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassificationOverride {
    Transient,
    Sustained,
    Skip,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackOverrides {
    pub classification: Option<ClassificationOverride>,
    pub anchor: Option<AnchorStrategy>,
    /// Processor ids whose `apply` is skipped for this track.
    pub processor_skip: BTreeSet<String>,
}

/// One loaded source file and everything computed about it.
#[derive(Debug)]
pub struct Track {
    pub filename: String,
    pub path: PathBuf,
    pub audio: AudioBuffer,
    pub sample_rate: u32,
    pub channels: usize,
    pub total_samples: usize,
    pub duration_secs: f64,
    pub bit_depth: BitDepth,
    pub status: TrackStatus,
    pub detector_results: BTreeMap<String, DetectorResult>,
    pub processor_results: BTreeMap<String, ProcessorResult>,
    pub group: Option<String>,
    pub overrides: TrackOverrides,
    pub processed_path: Option<PathBuf>,
    pub applied_processors: Vec<String>,
    pub write_error: Option<String>,
    pub cache: TrackCache,
}

impl Track {
    pub fn new(
        filename: impl Into<String>,
        path: impl Into<PathBuf>,
        audio: AudioBuffer,
        sample_rate: u32,
        bit_depth: BitDepth,
    ) -> Self {
        let channels = audio.channels();
        let total_samples = audio.frames();
        let duration_secs = if sample_rate > 0 {
            total_samples as f64 / sample_rate as f64
        } else {
            0.0
        };
        Self {
            filename: filename.into(),
            path: path.into(),
            audio,
            sample_rate,
            channels,
            total_samples,
            duration_secs,
            bit_depth,
            status: TrackStatus::Ok,
            detector_results: BTreeMap::new(),
            processor_results: BTreeMap::new(),
            group: None,
            overrides: TrackOverrides::default(),
            processed_path: None,
            applied_processors: Vec::new(),
            write_error: None,
            cache: TrackCache::default(),
        }
    }

    /// A placeholder for a file that could not be loaded.
    pub fn failed(filename: impl Into<String>, path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        let mut track = Self::new(filename, path, AudioBuffer::default(), 0, BitDepth::Unknown);
        track.status = TrackStatus::Error(reason.into());
        track
    }

    pub fn is_ok(&self) -> bool {
        self.status == TrackStatus::Ok
    }

    /// Swap in new samples; derived measurements are dropped.
    pub fn replace_audio(&mut self, audio: AudioBuffer) {
        self.channels = audio.channels();
        self.total_samples = audio.frames();
        self.audio = audio;
        self.cache.clear();
    }

    pub fn classification(&self) -> Option<&ClassifierMetrics> {
        self.detector_results
            .get("audio_classifier")
            .and_then(|r| r.data.as_classifier())
    }
}

/// A session detector finding, addressed to a track or to the session as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackFinding {
    pub track: Option<usize>,
    pub result: DetectorResult,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FaderAdjustment {
    pub anchor_offset_db: f64,
    pub rebalance_shift_db: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum FailureSource {
    Load,
    Detector(String),
    SessionDetector(String),
    Processor(String),
    Write,
}

/// One thing that went wrong during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub filename: Option<String>,
    pub source: FailureSource,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct Session {
    pub tracks: Vec<Track>,
    pub config: Config,
    /// Filename to group id.
    pub groups: BTreeMap<String, String>,
    pub warnings: Vec<String>,
    pub session_results: BTreeMap<String, Vec<TrackFinding>>,
    pub fader_adjustments: BTreeMap<String, FaderAdjustment>,
}

impl Session {
    pub fn new(tracks: Vec<Track>, config: Config) -> Self {
        Self {
            tracks,
            config,
            ..Self::default()
        }
    }

    pub fn ok_tracks(&self) -> impl Iterator<Item = (usize, &Track)> {
        self.tracks.iter().enumerate().filter(|(_, t)| t.is_ok())
    }

    pub fn track_index(&self, filename: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.filename == filename)
    }

    /// Every failed load, detector, processor and write, in track order.
    pub fn failures(&self) -> Vec<Failure> {
        let mut failures = Vec::new();
        for track in &self.tracks {
            let filename = Some(track.filename.clone());
            if let TrackStatus::Error(reason) = &track.status {
                failures.push(Failure {
                    filename,
                    source: FailureSource::Load,
                    reason: reason.clone(),
                });
                continue;
            }
            for (id, result) in &track.detector_results {
                if let Some(error) = &result.error {
                    failures.push(Failure {
                        filename: filename.clone(),
                        source: FailureSource::Detector(id.clone()),
                        reason: error.clone(),
                    });
                }
            }
            for (id, result) in &track.processor_results {
                if let Some(error) = &result.error {
                    failures.push(Failure {
                        filename: filename.clone(),
                        source: FailureSource::Processor(id.clone()),
                        reason: error.clone(),
                    });
                }
            }
            if let Some(error) = &track.write_error {
                failures.push(Failure {
                    filename: filename.clone(),
                    source: FailureSource::Write,
                    reason: error.clone(),
                });
            }
        }
        for (id, findings) in &self.session_results {
            for finding in findings.iter().filter(|f| f.track.is_none()) {
                if let Some(error) = &finding.result.error {
                    failures.push(Failure {
                        filename: None,
                        source: FailureSource::SessionDetector(id.clone()),
                        reason: error.clone(),
                    });
                }
            }
        }
        failures
    }
}
