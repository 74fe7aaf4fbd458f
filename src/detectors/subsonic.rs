use crate::config::{Config, ParamSpec};
use crate::dsp::level::{display_db, format_duration};
use crate::dsp::spectral::{ChannelSubsonic, SubsonicFrame};
use crate::error::ConfigError;
use crate::models::{DetectorData, DetectorResult, IssueLocation, Severity, SubsonicData, SubsonicRegion};

use super::{contiguous_runs, silent_skip, DetectorContext, TrackDetector};

/// Windowed detection runs this much below the whole-file threshold.
const WINDOW_RELAX_DB: f64 = 6.0;
/// Fallback regions cover windows within this range of the loudest window.
const ACTIVE_RANGE_DB: f64 = 20.0;

/// Energy below the cutoff relative to the full spectrum.
pub struct SubsonicDetector {
    cutoff_hz: f64,
    warn_ratio_db: f64,
    windowed: bool,
    window_ms: u32,
    max_regions: usize,
}

impl Default for SubsonicDetector {
    fn default() -> Self {
        Self {
            cutoff_hz: 30.0,
            warn_ratio_db: -20.0,
            windowed: true,
            window_ms: 500,
            max_regions: 20,
        }
    }
}

impl SubsonicDetector {
    /// Regions for one channel, following the fallback order: frames over the
    /// relaxed threshold, then the active part of the channel, then nothing.
    fn channel_regions(&self, analysis: &ChannelSubsonic, channel: Option<usize>) -> Vec<SubsonicRegion> {
        let relaxed = self.warn_ratio_db - WINDOW_RELAX_DB;
        let frames = &analysis.frames;

        let hot = merge(frames, channel, |f| f.ratio_db >= relaxed, analysis.ratio_db);
        if !hot.is_empty() {
            return hot;
        }

        let loudest = frames.iter().map(|f| f.rms_db).fold(f64::NEG_INFINITY, f64::max);
        if !loudest.is_finite() {
            return Vec::new();
        }
        merge(
            frames,
            channel,
            |f| f.rms_db.is_finite() && f.rms_db >= loudest - ACTIVE_RANGE_DB,
            analysis.ratio_db,
        )
    }
}

/// Merge contiguous frames selected by `keep`. A region's ratio is its hottest
/// frame, or the whole-channel ratio when every frame was gated.
fn merge(
    frames: &[SubsonicFrame],
    channel: Option<usize>,
    keep: impl Fn(&SubsonicFrame) -> bool,
    channel_ratio_db: f64,
) -> Vec<SubsonicRegion> {
    let selected = frames.iter().enumerate().filter(|&(_, f)| keep(f)).map(|(i, _)| i);
    contiguous_runs(selected)
        .into_iter()
        .map(|(first, last)| {
            let span = &frames[first..=last];
            let hottest = span.iter().map(|f| f.ratio_db).fold(f64::NEG_INFINITY, f64::max);
            SubsonicRegion {
                start: span[0].start,
                end: span[span.len() - 1].end,
                channel,
                max_ratio_db: if hottest.is_finite() { hottest } else { channel_ratio_db },
            }
        })
        .collect()
}

impl TrackDetector for SubsonicDetector {
    fn id(&self) -> &str {
        "subsonic"
    }

    fn name(&self) -> &str {
        "Subsonic content"
    }

    fn config_params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::float("subsonic_hz", 30.0, "Cutoff (Hz)").min_exclusive(0.0).max(200.0),
            ParamSpec::float("subsonic_warn_ratio_db", -20.0, "Warning ratio (dB)").max(0.0),
            ParamSpec::boolean("subsonic_windowed", true, "Windowed analysis"),
            ParamSpec::int("subsonic_window_ms", 500, "Window (ms)").range(100.0, 5000.0),
            ParamSpec::int("subsonic_max_regions", 20, "Max regions").min(1.0),
        ]
    }

    fn configure(&mut self, config: &Config) -> Result<(), ConfigError> {
        config.check(&self.config_params())?;
        self.cutoff_hz = config.f64_or("subsonic_hz", self.cutoff_hz);
        self.warn_ratio_db = config.f64_or("subsonic_warn_ratio_db", self.warn_ratio_db);
        self.windowed = config.bool_or("subsonic_windowed", self.windowed);
        self.window_ms = config.usize_or("subsonic_window_ms", self.window_ms as usize) as u32;
        self.max_regions = config.usize_or("subsonic_max_regions", self.max_regions);
        Ok(())
    }

    fn analyze(&self, ctx: &DetectorContext<'_>) -> anyhow::Result<DetectorResult> {
        if ctx.is_silent() {
            return Ok(silent_skip(self.id()));
        }

        let per_channel = ctx.subsonic(self.cutoff_hz, self.window_ms)?;
        let channel_ratio_db: Vec<f64> = per_channel.iter().map(|c| c.ratio_db).collect();
        let combined_ratio_db = channel_ratio_db.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let warning_channels: Vec<usize> = channel_ratio_db
            .iter()
            .enumerate()
            .filter(|(_, &r)| r >= self.warn_ratio_db)
            .map(|(ch, _)| ch)
            .collect();

        let mut data = SubsonicData {
            cutoff_hz: self.cutoff_hz,
            combined_ratio_db,
            channel_ratio_db,
            warning_channels: warning_channels.clone(),
            regions: Vec::new(),
        };
        if warning_channels.is_empty() {
            return Ok(DetectorResult::clean(
                self.id(),
                format!("subsonic ratio {}", display_db(combined_ratio_db)),
                DetectorData::Subsonic(data),
            ));
        }

        let mono = ctx.channels() == 1;
        let label = |ch: usize| if mono { None } else { Some(ch) };

        let mut regions: Vec<SubsonicRegion> = Vec::new();
        if self.windowed {
            for &ch in &warning_channels {
                regions.extend(self.channel_regions(&per_channel[ch], label(ch)));
            }
        }
        if regions.is_empty() {
            let last = ctx.total_samples().saturating_sub(1);
            if mono || warning_channels.len() == ctx.channels() {
                regions.push(SubsonicRegion {
                    start: 0,
                    end: last,
                    channel: None,
                    max_ratio_db: combined_ratio_db,
                });
            } else {
                regions.extend(warning_channels.iter().map(|&ch| SubsonicRegion {
                    start: 0,
                    end: last,
                    channel: Some(ch),
                    max_ratio_db: per_channel[ch].ratio_db,
                }));
            }
        }
        regions.sort_by(|a, b| b.max_ratio_db.total_cmp(&a.max_ratio_db));
        regions.truncate(self.max_regions);

        let rate = ctx.sample_rate();
        let issues = regions
            .iter()
            .map(|r| {
                IssueLocation::range(
                    r.start,
                    r.end,
                    r.channel,
                    Severity::Attention,
                    "subsonic",
                    format!(
                        "energy below {:.0} Hz at {} ({})",
                        self.cutoff_hz,
                        display_db(r.max_ratio_db),
                        format_duration(r.start, rate)
                    ),
                )
                .with_band(0.0, self.cutoff_hz)
            })
            .collect();
        data.regions = regions;

        Ok(DetectorResult::new(
            self.id(),
            Severity::Attention,
            format!(
                "subsonic energy {} below {:.0} Hz",
                display_db(combined_ratio_db),
                self.cutoff_hz
            ),
            DetectorData::Subsonic(data),
        )
        .with_hint("high-pass filter the rumble before mixing")
        .with_issues(issues))
    }
}
