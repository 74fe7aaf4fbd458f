use crate::config::{Config, ParamSpec};
use crate::dsp::clip::find_clip_runs;
use crate::dsp::level::format_duration;
use crate::error::ConfigError;
use crate::models::{DetectorData, DetectorResult, IssueLocation, Severity};

use super::{silent_skip, DetectorContext, TrackDetector};

pub struct ClippingDetector {
    consecutive: usize,
    max_ranges: usize,
}

impl Default for ClippingDetector {
    fn default() -> Self {
        Self {
            consecutive: 3,
            max_ranges: 10,
        }
    }
}

impl TrackDetector for ClippingDetector {
    fn id(&self) -> &str {
        "clipping"
    }

    fn name(&self) -> &str {
        "Digital clipping"
    }

    fn config_params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::int("clip_consecutive", 3, "Consecutive full-scale samples").min(1.0),
            ParamSpec::int("clip_report_max_ranges", 10, "Max reported ranges").min(1.0),
        ]
    }

    fn configure(&mut self, config: &Config) -> Result<(), ConfigError> {
        config.check(&self.config_params())?;
        self.consecutive = config.usize_or("clip_consecutive", self.consecutive);
        self.max_ranges = config.usize_or("clip_report_max_ranges", self.max_ranges);
        Ok(())
    }

    fn analyze(&self, ctx: &DetectorContext<'_>) -> anyhow::Result<DetectorResult> {
        if ctx.is_silent() {
            return Ok(silent_skip(self.id()));
        }

        let scan = find_clip_runs(ctx.audio(), self.consecutive, self.max_ranges);
        let data = DetectorData::Clipping {
            runs: scan.runs,
            ranges: scan.ranges.clone(),
        };
        if scan.runs == 0 {
            return Ok(DetectorResult::clean(self.id(), "no clipping", data));
        }

        let rate = ctx.sample_rate();
        let issues: Vec<IssueLocation> = scan
            .ranges
            .iter()
            .map(|r| {
                IssueLocation::range(
                    r.start,
                    r.end,
                    r.channel,
                    Severity::Problem,
                    "clipping",
                    format!("{} clipped samples at {}", r.samples(), format_duration(r.start, rate)),
                )
            })
            .collect();

        let mut details = vec![format!(
            "{} run(s) of {}+ full-scale samples",
            scan.runs, self.consecutive
        )];
        if scan.truncated() {
            details.push(format!("showing the first {} of {}", scan.ranges.len(), scan.runs));
        }

        Ok(DetectorResult::new(
            self.id(),
            Severity::Problem,
            format!("{} clipped run(s)", scan.runs),
            data,
        )
        .with_hint("request a new export with more headroom")
        .with_details(details)
        .with_issues(issues))
    }
}
