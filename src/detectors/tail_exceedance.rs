use anyhow::Context;

use crate::config::{AnalysisSettings, AnchorStrategy, Config, ParamSpec};
use crate::dsp::level::format_duration;
use crate::error::ConfigError;
use crate::models::{DetectorData, DetectorResult, IssueLocation, Severity, TailRegion};

use super::{contiguous_runs, silent_skip, DetectorContext, TrackDetector};

/// Passages louder than the percentile anchor: the part of the distribution
/// the anchor ignores.
pub struct TailExceedanceDetector {
    settings: AnalysisSettings,
    min_exceed_db: f64,
    max_regions: usize,
    hop_ms: u32,
}

impl Default for TailExceedanceDetector {
    fn default() -> Self {
        Self {
            settings: AnalysisSettings::default(),
            min_exceed_db: 3.0,
            max_regions: 20,
            hop_ms: 10,
        }
    }
}

impl TrackDetector for TailExceedanceDetector {
    fn id(&self) -> &str {
        "tail_exceedance"
    }

    fn name(&self) -> &str {
        "Loud passages above anchor"
    }

    fn depends_on(&self) -> &[&str] {
        &["silence", "audio_classifier"]
    }

    fn config_params(&self) -> Vec<ParamSpec> {
        let mut params = AnalysisSettings::params();
        params.extend([
            ParamSpec::float("tail_min_exceed_db", 3.0, "Minimum exceedance (dB)").min_exclusive(0.0),
            ParamSpec::int("tail_max_regions", 20, "Max regions").min(1.0),
            ParamSpec::int("tail_hop_ms", 10, "Scan step (ms)").min(1.0),
        ]);
        params
    }

    fn configure(&mut self, config: &Config) -> Result<(), ConfigError> {
        config.check(&self.config_params())?;
        self.settings = AnalysisSettings::from_config(config)?;
        self.min_exceed_db = config.f64_or("tail_min_exceed_db", self.min_exceed_db);
        self.max_regions = config.usize_or("tail_max_regions", self.max_regions);
        self.hop_ms = config.usize_or("tail_hop_ms", self.hop_ms as usize) as u32;
        Ok(())
    }

    fn analyze(&self, ctx: &DetectorContext<'_>) -> anyhow::Result<DetectorResult> {
        if ctx.is_silent() {
            return Ok(silent_skip(self.id()));
        }
        let metrics = ctx
            .dependency("audio_classifier")
            .and_then(|r| r.data.as_classifier())
            .context("classifier result missing")?;

        if metrics.anchor != AnchorStrategy::Percentile {
            return Ok(DetectorResult::clean(
                self.id(),
                "not applicable (max anchor)",
                DetectorData::None,
            ));
        }
        let anchor_mean = metrics.rms_anchor_mean;
        if anchor_mean <= 0.0 {
            return Ok(DetectorResult::clean(self.id(), "no anchor", DetectorData::None));
        }

        let means = ctx.rms_windows(self.settings.window_ms, self.hop_ms, self.settings.channel_mode)?;
        let gated = ctx.gated(&self.settings, self.hop_ms)?;
        let exceed_db = |i: usize| 10.0 * (means[i] / anchor_mean).log10();

        let hot = (0..means.len()).filter(|&i| gated.mask[i] && exceed_db(i) > self.min_exceed_db);
        let hop = ctx.ms_to_samples(self.hop_ms as f64);
        let window = ctx.ms_to_samples(self.settings.window_ms as f64);
        let total = ctx.total_samples();

        let mut regions: Vec<TailRegion> = contiguous_runs(hot)
            .into_iter()
            .map(|(first, last)| TailRegion {
                start: first * hop,
                end: (last * hop + window).min(total) - 1,
                max_exceed_db: (first..=last).map(exceed_db).fold(f64::NEG_INFINITY, f64::max),
            })
            .collect();
        regions.sort_by(|a, b| b.max_exceed_db.total_cmp(&a.max_exceed_db));
        regions.truncate(self.max_regions);
        regions.sort_by_key(|r| r.start);

        let anchor_db = metrics.rms_anchor_db;
        if regions.is_empty() {
            return Ok(DetectorResult::clean(
                self.id(),
                "no passages above anchor",
                DetectorData::TailExceedance { anchor_db, regions },
            ));
        }

        let rate = ctx.sample_rate();
        let issues = regions
            .iter()
            .map(|r| {
                IssueLocation::range(
                    r.start,
                    r.end,
                    None,
                    Severity::Info,
                    "above anchor",
                    format!("+{:.1} dB over anchor at {}", r.max_exceed_db, format_duration(r.start, rate)),
                )
            })
            .collect();
        Ok(DetectorResult::new(
            self.id(),
            Severity::Info,
            format!("{} passage(s) above the RMS anchor", regions.len()),
            DetectorData::TailExceedance { anchor_db, regions },
        )
        .with_issues(issues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::audio_classifier::AudioClassifier;
    use crate::detectors::testing::{sine, track, RATE};
    use crate::models::Track;

    fn run(track: &mut Track) -> DetectorResult {
        let classifier = AudioClassifier::default();
        let result = classifier
            .analyze(&DetectorContext::new(track, &["silence"]))
            .unwrap();
        track.detector_results.insert("audio_classifier".into(), result);
        let detector = TailExceedanceDetector::default();
        detector
            .analyze(&DetectorContext::new(track, detector.depends_on()))
            .unwrap()
    }

    #[test]
    fn test_short_loud_burst_is_reported() {
        let mut samples = sine(220.0, 0.1, 20.0);
        let burst_start = RATE as usize * 10;
        for s in &mut samples[burst_start..burst_start + RATE as usize / 4] {
            *s *= 5.0;
        }
        let mut t = track("vox.wav", vec![samples]);
        let result = run(&mut t);
        assert_eq!(result.severity, Severity::Info);
        assert_eq!(result.issues.len(), 1);
        let issue = &result.issues[0];
        assert!(issue.sample_start < burst_start);
        assert!(issue.sample_end.unwrap() >= burst_start);
    }

    #[test]
    fn test_steady_signal_is_clean() {
        let mut t = track("pad.wav", vec![sine(220.0, 0.3, 3.0)]);
        assert_eq!(run(&mut t).severity, Severity::Clean);
    }

    #[test]
    fn test_missing_classifier_is_an_error() {
        let t = track("pad.wav", vec![sine(220.0, 0.3, 1.0)]);
        let detector = TailExceedanceDetector::default();
        assert!(detector
            .analyze(&DetectorContext::new(&t, detector.depends_on()))
            .is_err());
    }

    #[test]
    fn test_max_anchor_is_not_applicable() {
        let mut t = track("pad.wav", vec![sine(220.0, 0.3, 1.0)]);
        t.overrides.anchor = Some(AnchorStrategy::Max);
        let result = run(&mut t);
        assert_eq!(result.severity, Severity::Clean);
        assert_eq!(result.data, DetectorData::None);
    }
}
