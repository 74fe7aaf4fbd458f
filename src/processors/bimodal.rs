use anyhow::{bail, Context};

use crate::config::{Config, ParamSpec};
use crate::dsp::level::db_to_linear;
use crate::error::ConfigError;
use crate::models::{
    AudioBuffer, Classification, ClassificationOverride, ProcessorData, ProcessorResult, Track,
};

use super::{enabled_key, priority, AudioProcessor};

/// Peak normalization for transient material, RMS normalization capped by
/// the peak target for sustained material.
pub struct BimodalNormalizeProcessor {
    target_rms_db: f64,
    target_peak_db: f64,
    enabled: bool,
}

impl Default for BimodalNormalizeProcessor {
    fn default() -> Self {
        Self {
            target_rms_db: -18.0,
            target_peak_db: -6.0,
            enabled: true,
        }
    }
}

impl AudioProcessor for BimodalNormalizeProcessor {
    fn id(&self) -> &str {
        "bimodal_normalize"
    }

    fn name(&self) -> &str {
        "Bimodal normalization"
    }

    fn priority(&self) -> i32 {
        priority::NORMALIZE
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn config_params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::float("target_rms", -18.0, "Target RMS (dBFS)").max(0.0),
            ParamSpec::float("target_peak", -6.0, "Target peak (dBFS)").max(0.0),
        ]
    }

    fn configure(&mut self, config: &Config) -> Result<(), ConfigError> {
        config.check(&self.config_params())?;
        self.target_rms_db = config.f64_or("target_rms", self.target_rms_db);
        self.target_peak_db = config.f64_or("target_peak", self.target_peak_db);
        self.enabled = config.bool_or(&enabled_key(self.id()), true);
        Ok(())
    }

    fn process(&self, track: &Track) -> anyhow::Result<ProcessorResult> {
        if track.overrides.classification == Some(ClassificationOverride::Skip) {
            return Ok(ProcessorResult::new(self.id(), 0.0, Classification::Skip, "Skip"));
        }
        if let Some(failed) = track.detector_results.get("audio_classifier").and_then(|r| r.error.as_ref()) {
            bail!("classifier failed: {}", failed);
        }
        let metrics = track
            .classification()
            .context("no classifier result for track")?;
        if metrics.classification == Classification::Silent || metrics.peak_db == f64::NEG_INFINITY {
            return Ok(ProcessorResult::new(self.id(), 0.0, Classification::Silent, "Silent"));
        }

        let classification = match track.overrides.classification {
            Some(ClassificationOverride::Transient) => Classification::TransientForced,
            Some(ClassificationOverride::Sustained) => Classification::SustainedForced,
            _ => metrics.classification,
        };
        let gain_for_peak = self.target_peak_db - metrics.peak_db;
        let gain_for_rms = self.target_rms_db - metrics.rms_anchor_db;
        let mut data = ProcessorData {
            peak_db: Some(metrics.peak_db),
            rms_anchor_db: Some(metrics.rms_anchor_db),
            target_rms_db: Some(self.target_rms_db),
            target_peak_db: Some(self.target_peak_db),
            gain_for_peak_db: Some(gain_for_peak),
            ..ProcessorData::default()
        };

        let (gain_db, method) = if classification.is_transient() {
            (gain_for_peak, format!("Peak → {:.0} dBFS", self.target_peak_db))
        } else if classification.is_sustained() {
            data.gain_for_rms_db = Some(gain_for_rms);
            if gain_for_rms <= gain_for_peak {
                (gain_for_rms, format!("RMS → {:.0} dBFS", self.target_rms_db))
            } else {
                (gain_for_peak, "Peak Limited".to_string())
            }
        } else {
            bail!("cannot normalize a track classified as {}", classification);
        };

        tracing::debug!(file = %track.filename, gain_db, %method, "normalization planned");
        Ok(ProcessorResult::new(self.id(), gain_db, classification, method).with_data(data))
    }

    fn apply(&self, _track: &Track, mut audio: AudioBuffer, result: &ProcessorResult) -> anyhow::Result<AudioBuffer> {
        if result.gain_db == 0.0 || result.classification == Classification::Silent {
            return Ok(audio);
        }
        audio.scale_in_place(db_to_linear(result.gain_db) as f32);
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnchorStrategy;
    use crate::models::{BitDepth, ClassifierMetrics, DetectorData, DetectorResult, Severity};
    use approx::assert_relative_eq;

    fn classified(class: Classification, peak_db: f64, anchor_db: f64) -> Track {
        let mut track = Track::new(
            "t.wav",
            "t.wav",
            AudioBuffer::from_planar(vec![vec![0.25; 64]]),
            48000,
            BitDepth::Int(24),
        );
        let metrics = ClassifierMetrics {
            classification: class,
            peak_db,
            rms_max_db: anchor_db,
            rms_anchor_db: anchor_db,
            rms_anchor_mean: 10f64.powf(anchor_db / 10.0),
            anchor: AnchorStrategy::Percentile,
            crest_db: peak_db - anchor_db,
            decay_db: 0.0,
            density: 1.0,
            near_threshold: false,
        };
        track.detector_results.insert(
            "audio_classifier".into(),
            DetectorResult::new("audio_classifier", Severity::Info, "x", DetectorData::Classifier(metrics)),
        );
        track
    }

    #[test]
    fn test_transient_targets_peak() {
        let track = classified(Classification::Transient, -1.0, -20.0);
        let result = BimodalNormalizeProcessor::default().process(&track).unwrap();
        assert_relative_eq!(result.gain_db, -5.0);
        assert_eq!(result.classification, Classification::Transient);
    }

    #[test]
    fn test_sustained_uses_rms_target() {
        let track = classified(Classification::Sustained, -21.0, -24.0);
        let result = BimodalNormalizeProcessor::default().process(&track).unwrap();
        assert_relative_eq!(result.gain_db, 6.0);
        assert!(result.method.starts_with("RMS"));
    }

    #[test]
    fn test_sustained_is_capped_by_peak_target() {
        let track = classified(Classification::Sustained, -3.0, -30.0);
        let processor = BimodalNormalizeProcessor::default();
        let result = processor.process(&track).unwrap();
        assert_eq!(result.gain_db, -6.0 - -3.0);
        assert_eq!(result.method, "Peak Limited");
    }

    #[test]
    fn test_silent_gets_zero_gain() {
        let track = classified(Classification::Silent, f64::NEG_INFINITY, f64::NEG_INFINITY);
        let result = BimodalNormalizeProcessor::default().process(&track).unwrap();
        assert_eq!(result.gain_db, 0.0);
        assert_eq!(result.classification, Classification::Silent);
    }

    #[test]
    fn test_overrides() {
        let mut track = classified(Classification::Sustained, -21.0, -24.0);
        track.overrides.classification = Some(ClassificationOverride::Transient);
        let result = BimodalNormalizeProcessor::default().process(&track).unwrap();
        assert_eq!(result.classification, Classification::TransientForced);
        assert_relative_eq!(result.gain_db, 15.0);

        track.overrides.classification = Some(ClassificationOverride::Skip);
        let result = BimodalNormalizeProcessor::default().process(&track).unwrap();
        assert_eq!(result.gain_db, 0.0);
        assert_eq!(result.classification, Classification::Skip);
    }

    #[test]
    fn test_missing_classifier_is_an_error() {
        let track = Track::new("t.wav", "t.wav", AudioBuffer::from_planar(vec![vec![0.1; 8]]), 48000, BitDepth::Int(16));
        assert!(BimodalNormalizeProcessor::default().process(&track).is_err());
    }

    #[test]
    fn test_apply_scales_audio() {
        let track = classified(Classification::Transient, -12.0, -20.0);
        let processor = BimodalNormalizeProcessor::default();
        let result = processor.process(&track).unwrap();
        let out = processor.apply(&track, track.audio.clone(), &result).unwrap();
        assert_relative_eq!(out.channel(0)[0] as f64, 0.25 * db_to_linear(6.0), epsilon = 1e-6);
    }

    #[test]
    fn test_disabled_through_config() {
        let mut processor = BimodalNormalizeProcessor::default();
        let mut config = Config::new();
        config.set("bimodal_normalize_enabled", false);
        processor.configure(&config).unwrap();
        assert!(!processor.enabled());
    }
}
