use crate::config::{Config, ParamSpec};
use crate::dsp::level::{display_db, linear_to_db};
use crate::error::ConfigError;
use crate::models::{DetectorData, DetectorResult, IssueLocation, Severity};

use super::{silent_skip, DetectorContext, TrackDetector};

/// Stereo files with one dead side.
pub struct OneSidedSilenceDetector {
    threshold_db: f64,
}

impl Default for OneSidedSilenceDetector {
    fn default() -> Self {
        Self { threshold_db: -80.0 }
    }
}

impl TrackDetector for OneSidedSilenceDetector {
    fn id(&self) -> &str {
        "one_sided_silence"
    }

    fn name(&self) -> &str {
        "One-sided silence"
    }

    fn config_params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::float("one_sided_silence_db", -80.0, "Silent channel level (dBFS)").max(0.0)]
    }

    fn configure(&mut self, config: &Config) -> Result<(), ConfigError> {
        config.check(&self.config_params())?;
        self.threshold_db = config.f64_or("one_sided_silence_db", self.threshold_db);
        Ok(())
    }

    fn analyze(&self, ctx: &DetectorContext<'_>) -> anyhow::Result<DetectorResult> {
        if ctx.channels() != 2 {
            return Ok(DetectorResult::clean(
                self.id(),
                "not applicable (not stereo)",
                DetectorData::None,
            ));
        }
        if ctx.is_silent() {
            return Ok(silent_skip(self.id()));
        }

        let stats = ctx.channel_stats()?;
        let channel_rms_db: Vec<f64> = stats.dc_removed_rms.iter().map(|&r| linear_to_db(r)).collect();
        let quiet: Vec<bool> = channel_rms_db.iter().map(|&db| db <= self.threshold_db).collect();

        let silent_channel = match (quiet[0], quiet[1]) {
            (true, false) => Some(0),
            (false, true) => Some(1),
            _ => None,
        };
        let data = DetectorData::OneSidedSilence {
            channel_rms_db: channel_rms_db.clone(),
            silent_channel,
        };

        let Some(channel) = silent_channel else {
            return Ok(DetectorResult::clean(self.id(), "both channels carry signal", data));
        };
        let side = if channel == 0 { "left" } else { "right" };
        let issue = IssueLocation::range(
            0,
            ctx.total_samples().saturating_sub(1),
            Some(channel),
            Severity::Attention,
            "one-sided silence",
            format!("{} channel at {}", side, display_db(channel_rms_db[channel])),
        );
        Ok(DetectorResult::new(
            self.id(),
            Severity::Attention,
            format!("{} channel is silent", side),
            data,
        )
        .with_hint("likely a mono source bounced to one side of a stereo file")
        .with_issues(vec![issue]))
    }
}
