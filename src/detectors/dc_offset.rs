use crate::config::{Config, ParamSpec};
use crate::dsp::level::{display_db, linear_to_db};
use crate::error::ConfigError;
use crate::models::{DetectorData, DetectorResult, IssueLocation, Severity};

use super::{silent_skip, DetectorContext, TrackDetector};

pub struct DcOffsetDetector {
    warn_db: f64,
}

impl Default for DcOffsetDetector {
    fn default() -> Self {
        Self { warn_db: -40.0 }
    }
}

impl TrackDetector for DcOffsetDetector {
    fn id(&self) -> &str {
        "dc_offset"
    }

    fn name(&self) -> &str {
        "DC offset"
    }

    fn config_params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::float("dc_offset_warn_db", -40.0, "DC warning level (dBFS)").max(0.0)]
    }

    fn configure(&mut self, config: &Config) -> Result<(), ConfigError> {
        config.check(&self.config_params())?;
        self.warn_db = config.f64_or("dc_offset_warn_db", self.warn_db);
        Ok(())
    }

    fn analyze(&self, ctx: &DetectorContext<'_>) -> anyhow::Result<DetectorResult> {
        if ctx.is_silent() {
            return Ok(silent_skip(self.id()));
        }

        let stats = ctx.channel_stats()?;
        let channel_dc_db: Vec<f64> = stats.means.iter().map(|m| linear_to_db(m.abs())).collect();
        let max_dc_db = channel_dc_db.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let data = DetectorData::DcOffset {
            max_dc_db,
            channel_dc_db: channel_dc_db.clone(),
        };

        if !(max_dc_db.is_finite() && max_dc_db > self.warn_db) {
            return Ok(DetectorResult::clean(
                self.id(),
                format!("DC {}", display_db(max_dc_db)),
                data,
            ));
        }

        let details = channel_dc_db
            .iter()
            .enumerate()
            .map(|(ch, db)| format!("channel {}: {}", ch + 1, display_db(*db)))
            .collect();
        let issue = IssueLocation::whole_file(
            ctx.total_samples(),
            Severity::Attention,
            "dc offset",
            format!("DC offset {}", display_db(max_dc_db)),
        );
        Ok(DetectorResult::new(
            self.id(),
            Severity::Attention,
            format!("DC offset {}", display_db(max_dc_db)),
            data,
        )
        .with_hint("apply a high-pass filter or DC removal before mixing")
        .with_details(details)
        .with_issues(vec![issue]))
    }
}
