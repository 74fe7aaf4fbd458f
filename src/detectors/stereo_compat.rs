use crate::config::{Config, ParamSpec};
use crate::dsp::level::{display_db, format_duration};
use crate::dsp::stereo::StereoWindow;
use crate::error::ConfigError;
use crate::models::{DetectorData, DetectorResult, IssueLocation, Severity, StereoCompatData, StereoRegion};

use super::{contiguous_runs, silent_skip, DetectorContext, TrackDetector};

/// Phase correlation and mono fold-down loss of stereo files.
pub struct StereoCompatDetector {
    corr_warn: f64,
    mono_loss_warn_db: f64,
    windowed: bool,
    window_ms: u32,
    max_regions: usize,
}

impl Default for StereoCompatDetector {
    fn default() -> Self {
        Self {
            corr_warn: -0.3,
            mono_loss_warn_db: 6.0,
            windowed: true,
            window_ms: 500,
            max_regions: 20,
        }
    }
}

impl StereoCompatDetector {
    fn crosses(&self, w: &StereoWindow) -> bool {
        !w.is_silent() && (w.correlation < self.corr_warn || w.mono_loss_db > self.mono_loss_warn_db)
    }

    /// Merge windows selected by `keep` into regions; silent windows always split.
    fn regions(&self, windows: &[StereoWindow], keep: impl Fn(&StereoWindow) -> bool) -> Vec<StereoRegion> {
        let selected = windows.iter().enumerate().filter(|&(_, w)| keep(w)).map(|(i, _)| i);
        let mut regions: Vec<StereoRegion> = contiguous_runs(selected)
            .into_iter()
            .map(|(first, last)| {
                let span = &windows[first..=last];
                StereoRegion {
                    start: span[0].start,
                    end: span[span.len() - 1].end,
                    min_correlation: span.iter().map(|w| w.correlation).fold(f64::INFINITY, f64::min),
                    max_mono_loss_db: span.iter().map(|w| w.mono_loss_db).fold(f64::NEG_INFINITY, f64::max),
                }
            })
            .collect();
        regions.sort_by(|a, b| a.min_correlation.total_cmp(&b.min_correlation));
        regions.truncate(self.max_regions);
        regions
    }

    fn issue(&self, region: &StereoRegion, severity: Severity, rate: u32) -> IssueLocation {
        IssueLocation::range(
            region.start,
            region.end,
            None,
            severity,
            "stereo compatibility",
            format!(
                "corr {:.2}, mono loss {} at {}",
                region.min_correlation,
                display_db(region.max_mono_loss_db),
                format_duration(region.start, rate)
            ),
        )
    }
}

impl TrackDetector for StereoCompatDetector {
    fn id(&self) -> &str {
        "stereo_compat"
    }

    fn name(&self) -> &str {
        "Stereo compatibility"
    }

    fn config_params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::float("corr_warn", -0.3, "Correlation warning").range(-1.0, 1.0),
            ParamSpec::float("mono_loss_warn_db", 6.0, "Mono loss warning (dB)").min_exclusive(0.0),
            ParamSpec::boolean("corr_windowed", true, "Windowed analysis"),
            ParamSpec::int("corr_window_ms", 500, "Window (ms)").range(100.0, 5000.0),
            ParamSpec::int("corr_max_regions", 20, "Max regions").min(1.0),
        ]
    }

    fn configure(&mut self, config: &Config) -> Result<(), ConfigError> {
        config.check(&self.config_params())?;
        self.corr_warn = config.f64_or("corr_warn", self.corr_warn);
        self.mono_loss_warn_db = config.f64_or("mono_loss_warn_db", self.mono_loss_warn_db);
        self.windowed = config.bool_or("corr_windowed", self.windowed);
        self.window_ms = config.usize_or("corr_window_ms", self.window_ms as usize) as u32;
        self.max_regions = config.usize_or("corr_max_regions", self.max_regions);
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

        let analysis = ctx.stereo(self.window_ms)?;
        let whole_file_warning =
            analysis.correlation < self.corr_warn || analysis.mono_loss_db > self.mono_loss_warn_db;
        let summary_metrics = format!(
            "corr {:.2}, mono loss {}",
            analysis.correlation,
            display_db(analysis.mono_loss_db)
        );

        let (severity, regions) = if !self.windowed {
            let severity = if whole_file_warning { Severity::Info } else { Severity::Clean };
            (severity, Vec::new())
        } else {
            let crossing = self.regions(&analysis.windows, |w| self.crosses(w));
            if !crossing.is_empty() {
                (Severity::Attention, crossing)
            } else if whole_file_warning {
                // Locate the program material even though no single window crosses.
                (Severity::Info, self.regions(&analysis.windows, |w| !w.is_silent()))
            } else {
                (Severity::Clean, Vec::new())
            }
        };

        let rate = ctx.sample_rate();
        let issue_severity = if severity == Severity::Attention {
            Severity::Attention
        } else {
            Severity::Info
        };
        let issues = regions.iter().map(|r| self.issue(r, issue_severity, rate)).collect();
        let data = DetectorData::StereoCompat(StereoCompatData {
            correlation: analysis.correlation,
            mono_loss_db: analysis.mono_loss_db,
            whole_file_warning,
            windowed: self.windowed,
            regions: regions.clone(),
        });

        let result = match severity {
            Severity::Clean => DetectorResult::clean(self.id(), summary_metrics, data),
            Severity::Attention => DetectorResult::new(
                self.id(),
                severity,
                format!("{} region(s) with phase issues; {}", regions.len(), summary_metrics),
                data,
            )
            .with_hint("check polarity and mic phase before summing to mono"),
            _ => DetectorResult::new(self.id(), severity, format!("wide stereo; {}", summary_metrics), data),
        };
        Ok(result.with_issues(issues))
    }
}
