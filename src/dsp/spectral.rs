use std::f64::consts::PI;

use rustfft::{num_complex::Complex, FftPlanner};

use super::level::power_to_db;
use super::{DspError, DspResult};

/// Frames shorter than this carry no usable spectrum.
const MIN_FRAME: usize = 8;
/// Frames quieter than this RMS are treated as silence.
const FRAME_SILENCE_RMS: f64 = 1e-7;
/// Frames whose subsonic energy sits below this absolute level are ignored.
const ABSOLUTE_GATE_DBFS: f64 = -40.0;

/// Subsonic measurement of one frame. `end` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubsonicFrame {
    pub start: usize,
    pub end: usize,
    /// Gated ratio in dB; negative infinity when the frame is silent or below the absolute gate.
    pub ratio_db: f64,
    pub rms_db: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSubsonic {
    /// Whole-channel ratio of energy at or below the cutoff to all energy above DC.
    pub ratio_db: f64,
    pub frames: Vec<SubsonicFrame>,
}

/// Short-time spectral pass over one channel.
///
/// Each `frame`-sample block is mean-removed, Hann-windowed and transformed
/// once. Its band and total powers feed both the per-frame ratio and the
/// whole-channel sums, so the file is transformed a single time.
pub fn subsonic_analysis(
    samples: &[f32],
    sample_rate: u32,
    cutoff_hz: f64,
    frame: usize,
) -> DspResult<ChannelSubsonic> {
    if sample_rate == 0 {
        return Err(DspError::InvalidParameter {
            name: "sample_rate",
            reason: "must be positive".to_string(),
        });
    }
    if !(cutoff_hz > 0.0) {
        return Err(DspError::InvalidParameter {
            name: "cutoff_hz",
            reason: format!("must be positive, got {}", cutoff_hz),
        });
    }
    if samples.len() < MIN_FRAME {
        return Ok(ChannelSubsonic {
            ratio_db: f64::NEG_INFINITY,
            frames: Vec::new(),
        });
    }

    let frame = frame.max(MIN_FRAME).min(samples.len());
    let mut planner = FftPlanner::<f64>::new();
    let mut band_total = 0.0f64;
    let mut power_total = 0.0f64;
    let mut frames = Vec::with_capacity(samples.len().div_ceil(frame));

    for (k, chunk) in samples.chunks(frame).enumerate() {
        let start = k * frame;
        let end = start + chunk.len() - 1;
        if chunk.len() < MIN_FRAME {
            frames.push(SubsonicFrame {
                start,
                end,
                ratio_db: f64::NEG_INFINITY,
                rms_db: f64::NEG_INFINITY,
            });
            continue;
        }

        let n = chunk.len();
        let mean = chunk.iter().map(|&s| s as f64).sum::<f64>() / n as f64;
        let rms = (chunk
            .iter()
            .map(|&s| {
                let d = s as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n as f64)
            .sqrt();

        let mut buffer: Vec<Complex<f64>> = chunk
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                let w = 0.5 - 0.5 * (2.0 * PI * i as f64 / (n - 1) as f64).cos();
                Complex::new((s as f64 - mean) * w, 0.0)
            })
            .collect();
        planner.plan_fft_forward(n).process(&mut buffer);

        let bin_hz = sample_rate as f64 / n as f64;
        let mut band = 0.0f64;
        let mut total = 0.0f64;
        for (bin, c) in buffer.iter().enumerate().take(n / 2 + 1).skip(1) {
            let p = c.norm_sqr();
            total += p;
            if bin as f64 * bin_hz <= cutoff_hz {
                band += p;
            }
        }
        band_total += band;
        power_total += total;

        let rms_db = 20.0 * rms.max(f64::MIN_POSITIVE).log10();
        let ratio_db = if rms < FRAME_SILENCE_RMS {
            f64::NEG_INFINITY
        } else {
            let ratio = band_ratio_db(band, total);
            if rms_db + ratio < ABSOLUTE_GATE_DBFS {
                f64::NEG_INFINITY
            } else {
                ratio
            }
        };
        frames.push(SubsonicFrame {
            start,
            end,
            ratio_db,
            rms_db,
        });
    }

    Ok(ChannelSubsonic {
        ratio_db: band_ratio_db(band_total, power_total),
        frames,
    })
}

fn band_ratio_db(band: f64, total: f64) -> f64 {
    if band <= 0.0 || total <= 0.0 {
        f64::NEG_INFINITY
    } else {
        power_to_db(band / total)
    }
}
