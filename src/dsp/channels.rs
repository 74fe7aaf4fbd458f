use crate::models::AudioBuffer;

/// Per-channel statistics used by the DC and channel-balance detectors.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStats {
    /// Mean sample value (DC component) per channel.
    pub means: Vec<f64>,
    /// RMS after removing each channel's mean.
    pub dc_removed_rms: Vec<f64>,
}

pub fn channel_stats(buffer: &AudioBuffer) -> ChannelStats {
    let mut means = Vec::with_capacity(buffer.channels());
    let mut dc_removed_rms = Vec::with_capacity(buffer.channels());

    for samples in buffer.planar() {
        if samples.is_empty() {
            means.push(0.0);
            dc_removed_rms.push(0.0);
            continue;
        }
        let n = samples.len() as f64;
        let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / n;
        let var = samples
            .iter()
            .map(|&s| {
                let d = s as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        means.push(mean);
        dc_removed_rms.push(var.sqrt());
    }

    ChannelStats {
        means,
        dc_removed_rms,
    }
}

/// Largest absolute sample difference between two channels.
pub fn max_abs_difference(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| (x as f64 - y as f64).abs())
        .fold(0.0_f64, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_channel_stats_separates_dc_from_ac() {
        let left: Vec<f32> = (0..1000).map(|i| if i % 2 == 0 { 0.6 } else { 0.4 }).collect();
        let right = vec![0.0f32; 1000];
        let stats = channel_stats(&AudioBuffer::from_planar(vec![left, right]));

        assert_abs_diff_eq!(stats.means[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(stats.dc_removed_rms[0], 0.1, epsilon = 1e-6);
        assert_eq!(stats.means[1], 0.0);
        assert_eq!(stats.dc_removed_rms[1], 0.0);
    }

    #[test]
    fn test_max_abs_difference() {
        assert_abs_diff_eq!(max_abs_difference(&[0.0, 0.5, 1.0], &[0.0, 0.25, 1.0]), 0.25, epsilon = 1e-9);
    }
}
