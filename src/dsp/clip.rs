use serde::{Deserialize, Serialize};

use crate::models::AudioBuffer;

/// Absolute sample level treated as full scale.
pub const CLIP_LEVEL: f32 = 0.9999;

/// Inclusive sample range of one clipped run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipRange {
    pub start: usize,
    pub end: usize,
    /// `None` for mono sources.
    pub channel: Option<usize>,
}

impl ClipRange {
    pub fn samples(&self) -> usize {
        self.end - self.start + 1
    }
}

/// Result of a clip scan. `runs` counts every qualifying run even when
/// `ranges` was truncated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClipScan {
    pub runs: usize,
    pub ranges: Vec<ClipRange>,
}

impl ClipScan {
    pub fn truncated(&self) -> bool {
        self.runs > self.ranges.len()
    }
}

/// Find runs of at least `min_run` consecutive full-scale samples on each channel.
pub fn find_clip_runs(buffer: &AudioBuffer, min_run: usize, max_ranges: usize) -> ClipScan {
    let min_run = min_run.max(1);
    let mono = buffer.channels() == 1;
    let mut scan = ClipScan::default();

    for (ch, samples) in buffer.planar().iter().enumerate() {
        let channel = if mono { None } else { Some(ch) };
        let mut run_start: Option<usize> = None;

        for (i, &s) in samples.iter().enumerate() {
            let clipped = s.abs() >= CLIP_LEVEL;
            match (clipped, run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(start)) => {
                    record_run(&mut scan, start, i - 1, channel, min_run, max_ranges);
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(start) = run_start {
            record_run(&mut scan, start, samples.len() - 1, channel, min_run, max_ranges);
        }
    }
    scan
}

fn record_run(
    scan: &mut ClipScan,
    start: usize,
    end: usize,
    channel: Option<usize>,
    min_run: usize,
    max_ranges: usize,
) {
    if end + 1 - start < min_run {
        return;
    }
    scan.runs += 1;
    if scan.ranges.len() < max_ranges {
        scan.ranges.push(ClipRange { start, end, channel });
    }
}
