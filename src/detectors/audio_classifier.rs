use crate::config::{AnalysisSettings, AnchorStrategy, Config, ParamSpec};
use crate::dsp::envelope::decay_profile;
use crate::dsp::level::{anchor_mean, display_db, power_to_db};
use crate::error::ConfigError;
use crate::models::{Classification, ClassifierMetrics, DetectorData, DetectorResult, Severity};

use super::{DetectorContext, TrackDetector};

/// Envelope length used for the decay measurement.
const ENVELOPE_MS: f64 = 10.0;
/// Metrics closer than this to a threshold are flagged as borderline.
const NEAR_THRESHOLD_DB: f64 = 2.0;

/// Splits tracks into transient and sustained material and measures the
/// loudness anchor used for normalization.
pub struct AudioClassifier {
    settings: AnalysisSettings,
    crest_threshold: f64,
    decay_lookahead_ms: u32,
    decay_db_threshold: f64,
    sparse_density_threshold: f64,
    force_transient: Vec<String>,
    force_sustained: Vec<String>,
}

impl Default for AudioClassifier {
    fn default() -> Self {
        Self {
            settings: AnalysisSettings::default(),
            crest_threshold: 12.0,
            decay_lookahead_ms: 200,
            decay_db_threshold: 12.0,
            sparse_density_threshold: 0.25,
            force_transient: Vec::new(),
            force_sustained: Vec::new(),
        }
    }
}

/// Raw measurements feeding the decision cascade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Indicators {
    pub crest_db: f64,
    pub decay_db: f64,
    pub density: f64,
}

impl AudioClassifier {
    fn forced(&self, filename: &str) -> Option<Classification> {
        let name = filename.to_lowercase();
        let hit = |keywords: &[String]| keywords.iter().any(|k| !k.is_empty() && name.contains(&k.to_lowercase()));
        if hit(&self.force_transient) {
            Some(Classification::TransientForced)
        } else if hit(&self.force_sustained) {
            Some(Classification::SustainedForced)
        } else {
            None
        }
    }

    /// Decision cascade: sparse material with any transient indicator is
    /// transient; otherwise agreement wins and disagreement follows the decay.
    pub fn classify(&self, ind: &Indicators) -> Classification {
        let crest_transient = ind.crest_db > self.crest_threshold;
        let decay_transient = ind.decay_db > self.decay_db_threshold;
        let sparse = ind.density < self.sparse_density_threshold;

        if sparse && (crest_transient || decay_transient) {
            return Classification::Transient;
        }
        match (crest_transient, decay_transient) {
            (true, true) => Classification::Transient,
            (false, false) => Classification::Sustained,
            (true, false) => Classification::Sustained,
            (false, true) => Classification::Transient,
        }
    }

    fn near_threshold(&self, ind: &Indicators) -> bool {
        (ind.crest_db - self.crest_threshold).abs() < NEAR_THRESHOLD_DB
            || (ind.decay_db - self.decay_db_threshold).abs() < NEAR_THRESHOLD_DB
    }
}

impl TrackDetector for AudioClassifier {
    fn id(&self) -> &str {
        "audio_classifier"
    }

    fn name(&self) -> &str {
        "Transient / sustained classification"
    }

    fn config_params(&self) -> Vec<ParamSpec> {
        let mut params = AnalysisSettings::params();
        params.extend([
            ParamSpec::float("crest_threshold", 12.0, "Crest threshold (dB)").min_exclusive(0.0),
            ParamSpec::int("decay_lookahead_ms", 200, "Decay lookahead (ms)").range(50.0, 1000.0),
            ParamSpec::float("decay_db_threshold", 12.0, "Decay threshold (dB)").range(3.0, 30.0),
            ParamSpec::float("sparse_density_threshold", 0.25, "Sparse density").range(0.0, 1.0),
            ParamSpec::list("force_transient", "Force transient keywords"),
            ParamSpec::list("force_sustained", "Force sustained keywords"),
        ]);
        params
    }

    fn configure(&mut self, config: &Config) -> Result<(), ConfigError> {
        config.check(&self.config_params())?;
        self.settings = AnalysisSettings::from_config(config)?;
        self.crest_threshold = config.f64_or("crest_threshold", self.crest_threshold);
        self.decay_lookahead_ms = config.usize_or("decay_lookahead_ms", self.decay_lookahead_ms as usize) as u32;
        self.decay_db_threshold = config.f64_or("decay_db_threshold", self.decay_db_threshold);
        self.sparse_density_threshold = config.f64_or("sparse_density_threshold", self.sparse_density_threshold);
        self.force_transient = config.list("force_transient");
        self.force_sustained = config.list("force_sustained");
        Ok(())
    }

    fn analyze(&self, ctx: &DetectorContext<'_>) -> anyhow::Result<DetectorResult> {
        let mut settings = self.settings;
        if let Some(anchor) = ctx.overrides().anchor {
            settings.anchor = anchor;
        }

        if ctx.is_silent() {
            let metrics = ClassifierMetrics {
                classification: Classification::Silent,
                peak_db: f64::NEG_INFINITY,
                rms_max_db: f64::NEG_INFINITY,
                rms_anchor_db: f64::NEG_INFINITY,
                rms_anchor_mean: 0.0,
                anchor: settings.anchor,
                crest_db: 0.0,
                decay_db: 0.0,
                density: 0.0,
                near_threshold: false,
            };
            return Ok(DetectorResult::clean(self.id(), "Silent", DetectorData::Classifier(metrics)));
        }

        let gated = ctx.gated(&settings, settings.hop_ms)?;
        let anchor = anchor_mean(&gated.active, settings.anchor, settings.percentile)?;
        let peak_db = ctx.peak_db();
        let decay = decay_profile(
            ctx.audio(),
            ctx.ms_to_samples(ENVELOPE_MS),
            ctx.ms_to_samples(self.decay_lookahead_ms as f64),
        )?;

        let indicators = Indicators {
            crest_db: peak_db - gated.max_window_db,
            decay_db: decay.decay_db,
            density: gated.density(),
        };
        let forced = self.forced(ctx.filename());
        let classification = forced.unwrap_or_else(|| self.classify(&indicators));
        let near_threshold = forced.is_none() && self.near_threshold(&indicators);

        tracing::debug!(
            file = ctx.filename(),
            crest = indicators.crest_db,
            decay = indicators.decay_db,
            density = indicators.density,
            %classification,
            "classified"
        );

        let metrics = ClassifierMetrics {
            classification,
            peak_db,
            rms_max_db: gated.max_window_db,
            rms_anchor_db: power_to_db(anchor),
            rms_anchor_mean: anchor,
            anchor: settings.anchor,
            crest_db: indicators.crest_db,
            decay_db: indicators.decay_db,
            density: indicators.density,
            near_threshold,
        };
        let anchor_label = match settings.anchor {
            AnchorStrategy::Percentile => format!("p{:.0}", settings.percentile),
            AnchorStrategy::Max => "max".to_string(),
        };
        let details = vec![
            format!("peak {}", display_db(peak_db)),
            format!("RMS anchor ({}) {}", anchor_label, display_db(metrics.rms_anchor_db)),
            format!("crest {:.1} dB (threshold {:.1})", indicators.crest_db, self.crest_threshold),
            format!("decay {:.1} dB (threshold {:.1})", indicators.decay_db, self.decay_db_threshold),
            format!("density {:.0}%", indicators.density * 100.0),
        ];

        let mut summary = classification.label().to_string();
        if near_threshold {
            summary.push_str(" (borderline)");
        }
        let mut result = DetectorResult::new(self.id(), Severity::Info, summary, DetectorData::Classifier(metrics))
            .with_details(details);
        if near_threshold {
            result = result.with_hint("close to a threshold; override the classification if it sounds wrong");
        }
        Ok(result)
    }
}
