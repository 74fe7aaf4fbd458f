use super::{DspError, DspResult};

/// Per-sample energy below which a window counts as silent.
const SILENT_ENERGY: f64 = 1e-14;

/// Correlation and fold-down loss of one window. `end` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoWindow {
    pub start: usize,
    pub end: usize,
    /// NaN for silent windows.
    pub correlation: f64,
    pub mono_loss_db: f64,
}

impl StereoWindow {
    pub fn is_silent(&self) -> bool {
        self.correlation.is_nan()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StereoAnalysis {
    pub correlation: f64,
    pub mono_loss_db: f64,
    pub windows: Vec<StereoWindow>,
}

/// Running dot products of a channel pair.
#[derive(Debug, Clone, Copy, Default)]
struct Moments {
    ll: f64,
    rr: f64,
    lr: f64,
    n: usize,
}

impl Moments {
    fn add(&mut self, other: &Moments) {
        self.ll += other.ll;
        self.rr += other.rr;
        self.lr += other.lr;
        self.n += other.n;
    }

    /// Pearson-style correlation and the level lost summing to mono via (L+R)/2.
    fn metrics(&self) -> (f64, f64) {
        let energy = self.ll + self.rr;
        if self.n == 0 || energy / self.n as f64 <= SILENT_ENERGY {
            return (f64::NAN, f64::NAN);
        }
        let correlation = if self.ll <= 0.0 || self.rr <= 0.0 {
            0.0
        } else {
            (self.lr / (self.ll * self.rr).sqrt()).clamp(-1.0, 1.0)
        };
        let mono_energy = energy + 2.0 * self.lr;
        let mono_loss_db = if mono_energy / self.n as f64 <= SILENT_ENERGY {
            f64::INFINITY
        } else {
            10.0 * (2.0 * energy / mono_energy).log10()
        };
        (correlation, mono_loss_db)
    }
}

/// One pass over a channel pair: every window's correlation and loss come
/// from the same three dot products that build the whole-file figures.
pub fn analyze_stereo(left: &[f32], right: &[f32], window: usize) -> DspResult<StereoAnalysis> {
    if left.len() != right.len() {
        return Err(DspError::InvalidParameter {
            name: "right",
            reason: format!("length {} does not match left length {}", right.len(), left.len()),
        });
    }
    if left.is_empty() {
        return Err(DspError::EmptyInput("stereo analysis"));
    }
    let window = window.max(1);

    let mut total = Moments::default();
    let mut windows = Vec::with_capacity(left.len().div_ceil(window));
    for (k, (l, r)) in left.chunks(window).zip(right.chunks(window)).enumerate() {
        let mut m = Moments::default();
        for (&a, &b) in l.iter().zip(r) {
            let a = a as f64;
            let b = b as f64;
            m.ll += a * a;
            m.rr += b * b;
            m.lr += a * b;
        }
        m.n = l.len();
        let (correlation, mono_loss_db) = m.metrics();
        let start = k * window;
        windows.push(StereoWindow {
            start,
            end: start + l.len() - 1,
            correlation,
            mono_loss_db,
        });
        total.add(&m);
    }

    let (correlation, mono_loss_db) = total.metrics();
    Ok(StereoAnalysis {
        correlation,
        mono_loss_db,
        windows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sine(len: usize, freq: f64, rate: f64) -> Vec<f32> {
        (0..len)
            .map(|i| (0.5 * (2.0 * std::f64::consts::PI * freq * i as f64 / rate).sin()) as f32)
            .collect()
    }

    #[test]
    fn test_identical_channels() {
        let l = sine(48000, 440.0, 48000.0);
        let analysis = analyze_stereo(&l, &l, 4800).unwrap();
        assert_abs_diff_eq!(analysis.correlation, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(analysis.mono_loss_db, 0.0, epsilon = 1e-9);
        assert_eq!(analysis.windows.len(), 10);
    }

    #[test]
    fn test_polarity_inverted_channels_cancel() {
        let l = sine(48000, 440.0, 48000.0);
        let r: Vec<f32> = l.iter().map(|s| -s).collect();
        let analysis = analyze_stereo(&l, &r, 4800).unwrap();
        assert_abs_diff_eq!(analysis.correlation, -1.0, epsilon = 1e-9);
        assert!(analysis.mono_loss_db.is_infinite());
    }

    #[test]
    fn test_orthogonal_channels_lose_three_db() {
        // Sine and cosine over whole cycles are uncorrelated.
        let l = sine(48000, 100.0, 48000.0);
        let r: Vec<f32> = (0..48000)
            .map(|i| (0.5 * (2.0 * std::f64::consts::PI * 100.0 * i as f64 / 48000.0).cos()) as f32)
            .collect();
        let analysis = analyze_stereo(&l, &r, 4800).unwrap();
        assert_abs_diff_eq!(analysis.correlation, 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(analysis.mono_loss_db, 3.0103, epsilon = 1e-2);
    }

    #[test]
    fn test_silent_window_has_no_correlation() {
        let mut l = sine(9600, 440.0, 48000.0);
        for s in &mut l[4800..] {
            *s = 0.0;
        }
        let r = l.clone();
        let analysis = analyze_stereo(&l, &r, 4800).unwrap();
        assert!(!analysis.windows[0].is_silent());
        assert!(analysis.windows[1].is_silent());
        assert_eq!(analysis.windows[1].end, 9599);
    }

    #[test]
    fn test_length_mismatch_is_an_error() {
        assert!(analyze_stereo(&[0.0; 4], &[0.0; 3], 2).is_err());
    }
}
