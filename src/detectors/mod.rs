//! Analyzers that inspect tracks (or the whole session) and report findings.

pub mod audio_classifier;
pub mod clipping;
pub mod dc_offset;
pub mod dual_mono;
pub mod format_consistency;
pub mod length_consistency;
pub mod one_sided_silence;
pub mod silence;
pub mod stereo_compat;
pub mod subsonic;
pub mod tail_exceedance;

use std::sync::Arc;

use crate::cache::CacheKey;
use crate::config::{ms_to_samples, AnalysisSettings, ChannelMode, Config, ParamSpec};
use crate::dsp::channels::{channel_stats, ChannelStats};
use crate::dsp::level::{self, GatedRms};
use crate::dsp::spectral::{subsonic_analysis, ChannelSubsonic};
use crate::dsp::stereo::{analyze_stereo, StereoAnalysis};
use crate::error::ConfigError;
use crate::models::{
    AudioBuffer, DetectorResult, Session, Severity, Track, TrackFinding, TrackOverrides,
};

/// Analyzes a single track. Implementations must be pure given the track and
/// their configuration; they never mutate shared state during `analyze`.
pub trait TrackDetector: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Detectors whose results must exist before this one runs.
    fn depends_on(&self) -> &[&str] {
        &["silence"]
    }

    fn config_params(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    fn configure(&mut self, _config: &Config) -> Result<(), ConfigError> {
        Ok(())
    }

    fn analyze(&self, ctx: &DetectorContext<'_>) -> anyhow::Result<DetectorResult>;
}

/// Analyzes all loaded tracks together after every per-track detector finished.
pub trait SessionDetector: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn config_params(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    fn configure(&mut self, _config: &Config) -> Result<(), ConfigError> {
        Ok(())
    }

    fn analyze(&self, session: &Session) -> anyhow::Result<Vec<TrackFinding>>;
}

pub enum Detector {
    Track(Box<dyn TrackDetector>),
    Session(Box<dyn SessionDetector>),
}

impl Detector {
    pub fn id(&self) -> &str {
        match self {
            Detector::Track(d) => d.id(),
            Detector::Session(d) => d.id(),
        }
    }

    pub fn config_params(&self) -> Vec<ParamSpec> {
        match self {
            Detector::Track(d) => d.config_params(),
            Detector::Session(d) => d.config_params(),
        }
    }
}

/// Every built-in detector, in registration order.
pub fn default_detectors() -> Vec<Detector> {
    vec![
        Detector::Track(Box::new(silence::SilenceDetector)),
        Detector::Track(Box::new(clipping::ClippingDetector::default())),
        Detector::Track(Box::new(dc_offset::DcOffsetDetector::default())),
        Detector::Track(Box::new(stereo_compat::StereoCompatDetector::default())),
        Detector::Track(Box::new(dual_mono::DualMonoDetector::default())),
        Detector::Track(Box::new(one_sided_silence::OneSidedSilenceDetector::default())),
        Detector::Track(Box::new(subsonic::SubsonicDetector::default())),
        Detector::Track(Box::new(audio_classifier::AudioClassifier::default())),
        Detector::Track(Box::new(tail_exceedance::TailExceedanceDetector::default())),
        Detector::Session(Box::new(format_consistency::FormatConsistencyDetector)),
        Detector::Session(Box::new(length_consistency::LengthConsistencyDetector)),
    ]
}

/// How a detector's severity is presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportAs {
    Default,
    Problem,
    Attention,
    Info,
    Skip,
}

impl ReportAs {
    pub const CHOICES: &'static [&'static str] = &["default", "problem", "attention", "info", "skip"];

    pub fn key(detector_id: &str) -> String {
        format!("{}_report_as", detector_id)
    }

    pub fn param(detector_id: &str) -> ParamSpec {
        ParamSpec::choice(Self::key(detector_id), "default", Self::CHOICES, "Report as")
    }

    pub fn from_config(config: &Config, detector_id: &str) -> Self {
        match config.str_or(&Self::key(detector_id), "default") {
            "problem" => ReportAs::Problem,
            "attention" => ReportAs::Attention,
            "info" => ReportAs::Info,
            "skip" => ReportAs::Skip,
            _ => ReportAs::Default,
        }
    }

    /// Remap a raw severity. Clean results stay clean; `None` hides the result.
    pub fn apply(self, severity: Severity) -> Option<Severity> {
        if severity == Severity::Clean {
            return Some(Severity::Clean);
        }
        match self {
            ReportAs::Default => Some(severity),
            ReportAs::Problem => Some(Severity::Problem),
            ReportAs::Attention => Some(Severity::Attention),
            ReportAs::Info => Some(Severity::Info),
            ReportAs::Skip => None,
        }
    }
}

/// Read-only view of a track handed to a detector.
///
/// Only results of declared dependencies are visible. Derived measurements
/// go through the track's cache so detectors sharing a measurement compute it once.
pub struct DetectorContext<'a> {
    track: &'a Track,
    declared: &'a [&'a str],
}

impl<'a> DetectorContext<'a> {
    pub fn new(track: &'a Track, declared: &'a [&'a str]) -> Self {
        Self { track, declared }
    }

    pub fn filename(&self) -> &str {
        &self.track.filename
    }

    pub fn audio(&self) -> &AudioBuffer {
        &self.track.audio
    }

    pub fn sample_rate(&self) -> u32 {
        self.track.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.track.channels
    }

    pub fn total_samples(&self) -> usize {
        self.track.total_samples
    }

    pub fn overrides(&self) -> &TrackOverrides {
        &self.track.overrides
    }

    pub fn ms_to_samples(&self, ms: f64) -> usize {
        ms_to_samples(ms, self.track.sample_rate)
    }

    /// Result of a declared dependency; undeclared ids are never visible.
    pub fn dependency(&self, id: &str) -> Option<&'a DetectorResult> {
        if !self.declared.iter().any(|d| *d == id) {
            tracing::debug!(dependency = id, "undeclared dependency requested");
            return None;
        }
        self.track.detector_results.get(id)
    }

    pub fn peak_linear(&self) -> f64 {
        self.track
            .cache
            .get_or_compute(CacheKey::Peak, || Ok(level::peak_linear(&self.track.audio)))
            .map(|p| *p)
            .unwrap_or(0.0)
    }

    pub fn peak_db(&self) -> f64 {
        level::linear_to_db(self.peak_linear())
    }

    pub fn is_silent(&self) -> bool {
        self.peak_linear() == 0.0
    }

    pub fn rms_windows(&self, window_ms: u32, hop_ms: u32, mode: ChannelMode) -> anyhow::Result<Arc<Vec<f64>>> {
        let window = self.ms_to_samples(window_ms as f64);
        let hop = self.ms_to_samples(hop_ms as f64);
        self.track
            .cache
            .get_or_compute(CacheKey::RmsWindows { window, hop, mode }, || {
                Ok(level::window_mean_squares(&self.track.audio, window, hop, mode)?)
            })
    }

    /// Relative-gated window distribution for the given settings and step.
    pub fn gated(&self, settings: &AnalysisSettings, hop_ms: u32) -> anyhow::Result<Arc<GatedRms>> {
        let window = self.ms_to_samples(settings.window_ms as f64);
        let hop = self.ms_to_samples(hop_ms as f64);
        let key = CacheKey::Gated {
            window,
            hop,
            mode: settings.channel_mode,
            margin_bits: settings.gate_relative_db.to_bits(),
        };
        self.track.cache.get_or_compute(key, || {
            let means = self.rms_windows(settings.window_ms, hop_ms, settings.channel_mode)?;
            Ok(level::gate_relative(&means, settings.gate_relative_db)?)
        })
    }

    pub fn channel_stats(&self) -> anyhow::Result<Arc<ChannelStats>> {
        self.track
            .cache
            .get_or_compute(CacheKey::ChannelStats, || Ok(channel_stats(&self.track.audio)))
    }

    pub fn stereo(&self, window_ms: u32) -> anyhow::Result<Arc<StereoAnalysis>> {
        let window = self.ms_to_samples(window_ms as f64);
        self.track.cache.get_or_compute(CacheKey::Stereo { window }, || {
            let audio = &self.track.audio;
            anyhow::ensure!(audio.channels() == 2, "stereo analysis needs two channels");
            Ok(analyze_stereo(audio.channel(0), audio.channel(1), window)?)
        })
    }

    /// Per-channel subsonic analysis, in channel order.
    pub fn subsonic(&self, cutoff_hz: f64, frame_ms: u32) -> anyhow::Result<Arc<Vec<ChannelSubsonic>>> {
        let frame = self.ms_to_samples(frame_ms as f64);
        let key = CacheKey::Subsonic {
            cutoff_bits: cutoff_hz.to_bits(),
            frame,
        };
        self.track.cache.get_or_compute(key, || {
            self.track
                .audio
                .planar()
                .iter()
                .map(|ch| Ok(subsonic_analysis(ch, self.track.sample_rate, cutoff_hz, frame)?))
                .collect()
        })
    }
}

/// Clean result used by detectors that do not apply to silent tracks.
pub(crate) fn silent_skip(id: &str) -> DetectorResult {
    DetectorResult::clean(id, "skipped (silent track)", crate::models::DetectorData::None)
}

/// Merge sorted indices into runs of consecutive values: `(first, last)` pairs.
pub(crate) fn contiguous_runs(indices: impl IntoIterator<Item = usize>) -> Vec<(usize, usize)> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for i in indices {
        match runs.last_mut() {
            Some((_, last)) if *last + 1 == i => *last = i,
            _ => runs.push((i, i)),
        }
    }
    runs
}

/// Most frequent value; ties go to the value seen first.
pub(crate) fn modal<T: PartialEq + Copy>(values: impl IntoIterator<Item = T>) -> Option<T> {
    let mut counts: Vec<(T, usize)> = Vec::new();
    for v in values {
        match counts.iter_mut().find(|(seen, _)| *seen == v) {
            Some((_, n)) => *n += 1,
            None => counts.push((v, 1)),
        }
    }
    // max_by_key keeps the last maximum, so scan in reverse to favour the first
    counts.into_iter().rev().max_by_key(|&(_, n)| n).map(|(v, _)| v)
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::models::{AudioBuffer, BitDepth, Track};

    pub const RATE: u32 = 48000;

    pub fn sine(freq: f64, amp: f64, secs: f64) -> Vec<f32> {
        let len = (RATE as f64 * secs) as usize;
        (0..len)
            .map(|i| (amp * (2.0 * std::f64::consts::PI * freq * i as f64 / RATE as f64).sin()) as f32)
            .collect()
    }

    pub fn track(name: &str, channels: Vec<Vec<f32>>) -> Track {
        Track::new(name, name, AudioBuffer::from_planar(channels), RATE, BitDepth::Int(24))
    }
}
