use crate::models::AudioBuffer;

use super::level::power_to_db;
use super::{DspError, DspResult};

/// How far the short-term envelope falls after its loudest moment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayProfile {
    pub peak_index: usize,
    pub peak_db: f64,
    pub tail_db: f64,
    pub decay_db: f64,
}

/// Measure the envelope decay of the channel-averaged signal.
///
/// The envelope is a `window`-sample moving mean square evaluated at every
/// sample. The tail level is the median of the last quarter of the `lookahead`
/// samples that follow the envelope maximum. Two streaming passes keep memory
/// bounded by the lookahead.
pub fn decay_profile(buffer: &AudioBuffer, window: usize, lookahead: usize) -> DspResult<DecayProfile> {
    let len = buffer.frames();
    let channels = buffer.channels();
    if len == 0 || channels == 0 {
        return Err(DspError::EmptyInput("decay envelope"));
    }
    let planar = buffer.planar();
    let inv = 1.0 / channels as f64;
    let square = |i: usize| {
        planar
            .iter()
            .map(|ch| {
                let v = ch[i] as f64;
                v * v
            })
            .sum::<f64>()
            * inv
    };

    if len <= window {
        let mean = (0..len).map(square).sum::<f64>() / len as f64;
        let db = power_to_db(mean);
        return Ok(DecayProfile {
            peak_index: 0,
            peak_db: db,
            tail_db: db,
            decay_db: 0.0,
        });
    }

    let window = window.max(1);
    let env_len = len - window + 1;

    let mut sum: f64 = (0..window).map(square).sum();
    let mut peak_sum = sum;
    let mut peak_index = 0;
    for i in 1..env_len {
        sum += square(i + window - 1) - square(i - 1);
        if sum > peak_sum {
            peak_sum = sum;
            peak_index = i;
        }
    }
    let peak_mean = (peak_sum / window as f64).max(0.0);

    let tail_start = peak_index + 1;
    let tail_end = (tail_start + lookahead).min(env_len);
    let mut tail = Vec::with_capacity(tail_end.saturating_sub(tail_start));
    if tail_start < tail_end {
        let mut sum: f64 = (tail_start..tail_start + window).map(square).sum();
        tail.push((sum / window as f64).max(0.0));
        for i in tail_start + 1..tail_end {
            sum += square(i + window - 1) - square(i - 1);
            tail.push((sum / window as f64).max(0.0));
        }
    }

    let tail_mean = if tail.is_empty() {
        peak_mean
    } else {
        let quarter = (tail.len() / 4).max(1);
        let from = tail.len() - quarter;
        median(&mut tail[from..])
    };

    let peak_db = power_to_db(peak_mean);
    let tail_db = power_to_db(tail_mean);
    Ok(DecayProfile {
        peak_index,
        peak_db,
        tail_db,
        decay_db: peak_db - tail_db,
    })
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_constant_signal_does_not_decay() {
        let buffer = AudioBuffer::from_planar(vec![vec![0.5; 10_000]]);
        let profile = decay_profile(&buffer, 100, 2000).unwrap();
        assert_abs_diff_eq!(profile.decay_db, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_burst_then_silence_decays_hard() {
        let mut samples = vec![0.0f32; 10_000];
        for s in &mut samples[1000..1200] {
            *s = 0.9;
        }
        let buffer = AudioBuffer::from_planar(vec![samples]);
        let profile = decay_profile(&buffer, 100, 2000).unwrap();
        assert!(profile.peak_index >= 1000 && profile.peak_index <= 1100);
        assert!(profile.decay_db > 100.0, "decay was {}", profile.decay_db);
    }

    #[test]
    fn test_exponential_decay_is_measured() {
        // -60 dB over one second at 10 kHz.
        let samples: Vec<f32> = (0..10_000)
            .map(|i| 0.8 * 10f32.powf(-3.0 * i as f32 / 10_000.0))
            .collect();
        let buffer = AudioBuffer::from_planar(vec![samples]);
        let profile = decay_profile(&buffer, 100, 2000).unwrap();
        assert_eq!(profile.peak_index, 0);
        // The tail median sits about 1.75k samples after the peak: roughly 10 dB down.
        assert!(profile.decay_db > 8.0 && profile.decay_db < 13.0, "decay was {}", profile.decay_db);
    }

    #[test]
    fn test_short_signal_is_a_single_window() {
        let buffer = AudioBuffer::from_planar(vec![vec![0.5; 10]]);
        let profile = decay_profile(&buffer, 100, 2000).unwrap();
        assert_eq!(profile.decay_db, 0.0);
    }
}
