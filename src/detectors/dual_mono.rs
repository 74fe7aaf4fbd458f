use crate::config::{Config, ParamSpec};
use crate::dsp::channels::max_abs_difference;
use crate::error::ConfigError;
use crate::models::{DetectorData, DetectorResult, Severity};

use super::{silent_skip, DetectorContext, TrackDetector};

/// Multichannel files whose channels carry the same signal.
pub struct DualMonoDetector {
    eps: f64,
}

impl Default for DualMonoDetector {
    fn default() -> Self {
        Self { eps: 1e-5 }
    }
}

impl TrackDetector for DualMonoDetector {
    fn id(&self) -> &str {
        "dual_mono"
    }

    fn name(&self) -> &str {
        "Dual mono"
    }

    fn config_params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::float("dual_mono_eps", 1e-5, "Max channel difference").min_exclusive(0.0)]
    }

    fn configure(&mut self, config: &Config) -> Result<(), ConfigError> {
        config.check(&self.config_params())?;
        self.eps = config.f64_or("dual_mono_eps", self.eps);
        Ok(())
    }

    fn analyze(&self, ctx: &DetectorContext<'_>) -> anyhow::Result<DetectorResult> {
        if ctx.channels() < 2 {
            return Ok(DetectorResult::clean(
                self.id(),
                "not applicable (mono)",
                DetectorData::None,
            ));
        }
        if ctx.is_silent() {
            return Ok(silent_skip(self.id()));
        }

        let audio = ctx.audio();
        let reference = audio.channel(0);
        let max_diff = (1..audio.channels())
            .map(|ch| max_abs_difference(reference, audio.channel(ch)))
            .fold(0.0_f64, f64::max);
        let is_dual_mono = max_diff <= self.eps;
        let data = DetectorData::DualMono { is_dual_mono, max_diff };

        if !is_dual_mono {
            return Ok(DetectorResult::clean(self.id(), "channels differ", data));
        }
        Ok(
            DetectorResult::new(self.id(), Severity::Info, "channels are identical", data)
                .with_hint("consider importing as a mono track"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::testing::{sine, track};

    #[test]
    fn test_identical_channels_are_info() {
        let s = sine(220.0, 0.5, 0.2);
        let track = track("keys.wav", vec![s.clone(), s]);
        let result = DualMonoDetector::default()
            .analyze(&DetectorContext::new(&track, &["silence"]))
            .unwrap();
        assert_eq!(result.severity, Severity::Info);
    }

    #[test]
    fn test_different_channels_are_clean() {
        let track = track("keys.wav", vec![sine(220.0, 0.5, 0.2), sine(330.0, 0.5, 0.2)]);
        let result = DualMonoDetector::default()
            .analyze(&DetectorContext::new(&track, &["silence"]))
            .unwrap();
        assert_eq!(result.severity, Severity::Clean);
    }
}
