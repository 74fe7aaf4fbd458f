use crate::config::{AnchorStrategy, ChannelMode};
use crate::models::AudioBuffer;

use super::{DspError, DspResult};

/// Floor applied to mean-square values before taking the log (-200 dB).
pub const POWER_FLOOR: f64 = 1e-20;

/// Convert a linear amplitude to dBFS. Zero and below map to negative infinity.
pub fn linear_to_db(linear: f64) -> f64 {
    if linear <= 0.0 {
        -f64::INFINITY
    } else {
        20.0 * linear.log10()
    }
}

pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Convert a mean-square value to dB.
pub fn power_to_db(power: f64) -> f64 {
    10.0 * power.max(POWER_FLOOR).log10()
}

/// Format a sample position as `MM:SS.mmm`.
pub fn format_duration(samples: usize, sample_rate: u32) -> String {
    if sample_rate == 0 {
        return "00:00.000".to_string();
    }
    let total_ms = (samples as u128 * 1000) / sample_rate as u128;
    let minutes = total_ms / 60_000;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}.{:03}", minutes, seconds, millis)
}

/// Render a dB value for humans; infinities print as `-inf` / `+inf`.
pub fn display_db(db: f64) -> String {
    if db.is_nan() {
        "n/a".to_string()
    } else if db == f64::NEG_INFINITY {
        "-inf dB".to_string()
    } else if db == f64::INFINITY {
        "+inf dB".to_string()
    } else {
        format!("{:.1} dB", db)
    }
}

/// Maximum absolute sample over all channels, linear.
pub fn peak_linear(buffer: &AudioBuffer) -> f64 {
    buffer
        .planar()
        .iter()
        .flat_map(|ch| ch.iter())
        .map(|&s| (s as f64).abs())
        .fold(0.0_f64, f64::max)
}

/// Mean-square value of every `window`-sample window, stepping by `hop` samples.
///
/// Inputs no longer than one window yield a single window over the whole signal.
pub fn window_mean_squares(
    buffer: &AudioBuffer,
    window: usize,
    hop: usize,
    mode: ChannelMode,
) -> DspResult<Vec<f64>> {
    let channels = buffer.channels();
    let len = buffer.frames();
    if channels == 0 || len == 0 {
        return Err(DspError::EmptyInput("windowed RMS"));
    }
    let window = window.max(1);
    let hop = hop.max(1);
    let planar = buffer.planar();

    match mode {
        ChannelMode::Avg | ChannelMode::Sum => {
            let scale = if mode == ChannelMode::Avg {
                1.0 / channels as f64
            } else {
                1.0
            };
            let square = |i: usize| {
                planar
                    .iter()
                    .map(|ch| {
                        let v = ch[i] as f64;
                        v * v
                    })
                    .sum::<f64>()
                    * scale
            };
            Ok(sliding_means(len, window, hop, square))
        }
        ChannelMode::Max => {
            let per_channel: Vec<Vec<f64>> = planar
                .iter()
                .map(|ch| {
                    sliding_means(len, window, hop, |i| {
                        let v = ch[i] as f64;
                        v * v
                    })
                })
                .collect();
            let count = per_channel[0].len();
            Ok((0..count)
                .map(|w| per_channel.iter().map(|ch| ch[w]).fold(0.0_f64, f64::max))
                .collect())
        }
    }
}

fn sliding_means(len: usize, window: usize, hop: usize, square: impl Fn(usize) -> f64) -> Vec<f64> {
    if len <= window {
        return vec![(0..len).map(&square).sum::<f64>() / len as f64];
    }

    let count = (len - window) / hop + 1;
    let mut means = Vec::with_capacity(count);
    let mut sum: f64 = (0..window).map(&square).sum();
    let mut start = 0;
    loop {
        means.push((sum / window as f64).max(0.0));
        let next = start + hop;
        if next + window > len {
            break;
        }
        if hop >= window {
            sum = (next..next + window).map(&square).sum();
        } else {
            for i in start..next {
                sum -= square(i);
            }
            for i in start + window..next + window {
                sum += square(i);
            }
        }
        start = next;
    }
    means
}

/// Windows that survived the relative gate.
#[derive(Debug, Clone, PartialEq)]
pub struct GatedRms {
    /// Mean-square values of the active windows, in order.
    pub active: Vec<f64>,
    /// One flag per input window.
    pub mask: Vec<bool>,
    pub max_window_db: f64,
}

impl GatedRms {
    pub fn density(&self) -> f64 {
        if self.mask.is_empty() {
            0.0
        } else {
            self.active.len() as f64 / self.mask.len() as f64
        }
    }
}

/// Keep windows whose level is within `margin_db` of the loudest window.
/// When nothing qualifies every window is kept.
pub fn gate_relative(means: &[f64], margin_db: f64) -> DspResult<GatedRms> {
    if means.is_empty() {
        return Err(DspError::EmptyInput("relative gate"));
    }
    if !(margin_db >= 0.0) {
        return Err(DspError::InvalidParameter {
            name: "margin_db",
            reason: format!("must be non-negative, got {}", margin_db),
        });
    }

    let levels: Vec<f64> = means.iter().map(|&m| power_to_db(m)).collect();
    let max_window_db = levels.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let threshold = max_window_db - margin_db;

    let mut mask: Vec<bool> = levels.iter().map(|&db| db >= threshold).collect();
    if !mask.iter().any(|&m| m) {
        mask = vec![true; means.len()];
    }
    let active = means
        .iter()
        .zip(&mask)
        .filter(|(_, &keep)| keep)
        .map(|(&m, _)| m)
        .collect();

    Ok(GatedRms {
        active,
        mask,
        max_window_db,
    })
}

/// Linear-interpolated percentile (`p` in 0..=100).
pub fn percentile(values: &[f64], p: f64) -> DspResult<f64> {
    if values.is_empty() {
        return Err(DspError::EmptyInput("percentile"));
    }
    if !(0.0..=100.0).contains(&p) {
        return Err(DspError::InvalidParameter {
            name: "percentile",
            reason: format!("must be within 0..=100, got {}", p),
        });
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Ok(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Mean-square anchor of a gated distribution.
pub fn anchor_mean(active: &[f64], strategy: AnchorStrategy, p: f64) -> DspResult<f64> {
    match strategy {
        AnchorStrategy::Percentile => percentile(active, p),
        AnchorStrategy::Max => active
            .iter()
            .copied()
            .reduce(f64::max)
            .ok_or(DspError::EmptyInput("anchor")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn mono(samples: Vec<f32>) -> AudioBuffer {
        AudioBuffer::from_planar(vec![samples])
    }

    #[test]
    fn test_linear_to_db() {
        assert_abs_diff_eq!(linear_to_db(1.0), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(linear_to_db(0.5), -6.0206, epsilon = 1e-3);
        assert!(linear_to_db(0.0).is_infinite());
        assert_abs_diff_eq!(db_to_linear(-6.0206), 0.5, epsilon = 1e-4);
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_duration(48000 * 61 + 24000, 48000), "01:01.500");
        assert_eq!(display_db(f64::NEG_INFINITY), "-inf dB");
        assert_eq!(display_db(-3.04), "-3.0 dB");
    }

    #[test]
    fn test_peak_linear() {
        let buffer = AudioBuffer::from_planar(vec![vec![0.1, -0.7], vec![0.5, 0.2]]);
        assert_abs_diff_eq!(peak_linear(&buffer), 0.7, epsilon = 1e-6);
    }

    #[test]
    fn test_window_mean_squares_constant_signal() {
        let buffer = mono(vec![0.5; 1000]);
        let means = window_mean_squares(&buffer, 100, 50, ChannelMode::Avg).unwrap();
        assert_eq!(means.len(), 19);
        for m in means {
            assert_abs_diff_eq!(m, 0.25, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_short_input_yields_single_window() {
        let buffer = mono(vec![1.0, 0.0, 1.0, 0.0]);
        let means = window_mean_squares(&buffer, 100, 10, ChannelMode::Avg).unwrap();
        assert_eq!(means, vec![0.5]);
    }

    #[test]
    fn test_channel_modes() {
        let buffer = AudioBuffer::from_planar(vec![vec![1.0; 10], vec![0.0; 10]]);
        let avg = window_mean_squares(&buffer, 5, 5, ChannelMode::Avg).unwrap();
        let sum = window_mean_squares(&buffer, 5, 5, ChannelMode::Sum).unwrap();
        let max = window_mean_squares(&buffer, 5, 5, ChannelMode::Max).unwrap();
        assert_abs_diff_eq!(avg[0], 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(sum[0], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(max[0], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_empty_buffer_is_an_error() {
        let buffer = AudioBuffer::default();
        assert!(window_mean_squares(&buffer, 10, 1, ChannelMode::Avg).is_err());
        assert!(gate_relative(&[], 40.0).is_err());
        assert!(percentile(&[], 95.0).is_err());
    }

    #[test]
    fn test_gate_drops_quiet_windows() {
        // 0 dB, -20 dB and -60 dB windows with a 40 dB margin.
        let means = [1.0, 0.01, 1e-6];
        let gated = gate_relative(&means, 40.0).unwrap();
        assert_eq!(gated.mask, vec![true, true, false]);
        assert_eq!(gated.active, vec![1.0, 0.01]);
        assert_abs_diff_eq!(gated.max_window_db, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(gated.density(), 2.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_gate_on_silence_keeps_everything() {
        let gated = gate_relative(&[0.0, 0.0], 40.0).unwrap();
        assert_eq!(gated.active.len(), 2);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_abs_diff_eq!(percentile(&values, 0.0).unwrap(), 1.0);
        assert_abs_diff_eq!(percentile(&values, 50.0).unwrap(), 2.5);
        assert_abs_diff_eq!(percentile(&values, 100.0).unwrap(), 4.0);
        assert_abs_diff_eq!(percentile(&values, 95.0).unwrap(), 3.85, epsilon = 1e-9);
    }

    #[test]
    fn test_anchor_max() {
        let anchor = anchor_mean(&[0.1, 0.4, 0.2], AnchorStrategy::Max, 95.0).unwrap();
        assert_abs_diff_eq!(anchor, 0.4);
    }

    proptest! {
        #[test]
        fn prop_gate_keeps_exactly_windows_within_margin(
            levels in prop::collection::vec(-120.0f64..0.0, 1..64),
            margin in 0.0f64..80.0,
        ) {
            let means: Vec<f64> = levels.iter().map(|db| 10f64.powf(db / 10.0)).collect();
            let gated = gate_relative(&means, margin).unwrap();
            let max_db = means.iter().map(|&m| power_to_db(m)).fold(f64::NEG_INFINITY, f64::max);
            for (m, keep) in means.iter().zip(&gated.mask) {
                prop_assert_eq!(*keep, power_to_db(*m) >= max_db - margin);
            }
        }

        #[test]
        fn prop_wider_margin_never_shrinks_active_set(
            levels in prop::collection::vec(-120.0f64..0.0, 1..64),
            margin in 0.0f64..60.0,
            extra in 0.0f64..20.0,
        ) {
            let means: Vec<f64> = levels.iter().map(|db| 10f64.powf(db / 10.0)).collect();
            let narrow = gate_relative(&means, margin).unwrap();
            let wide = gate_relative(&means, margin + extra).unwrap();
            prop_assert!(wide.active.len() >= narrow.active.len());
        }

        #[test]
        fn prop_percentile_is_monotonic(
            values in prop::collection::vec(0.0f64..1.0, 1..64),
            p in 0.0f64..100.0,
            dp in 0.0f64..10.0,
        ) {
            let lower = percentile(&values, p).unwrap();
            let upper = percentile(&values, (p + dp).min(100.0)).unwrap();
            prop_assert!(upper >= lower - 1e-12);
        }
    }
}
