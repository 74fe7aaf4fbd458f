use crate::dsp::level::format_duration;
use crate::models::{DetectorData, DetectorResult, IssueLocation, LengthData, Session, Severity, TrackFinding};

use super::{modal, SessionDetector};

/// Track lengths compared at a common sample rate. Stems exported from one
/// session should all share the same length.
pub struct LengthConsistencyDetector;

/// Length of `samples` at `rate` expressed at `target_rate`, rounded to the nearest frame.
pub fn normalized_length(samples: usize, rate: u32, target_rate: u32) -> usize {
    if rate == 0 || rate == target_rate {
        return samples;
    }
    let (n, sr, target) = (samples as u128, rate as u128, target_rate as u128);
    ((n * target + sr / 2) / sr) as usize
}

impl SessionDetector for LengthConsistencyDetector {
    fn id(&self) -> &str {
        "length_consistency"
    }

    fn name(&self) -> &str {
        "Length consistency"
    }

    fn analyze(&self, session: &Session) -> anyhow::Result<Vec<TrackFinding>> {
        let Some(rate) = modal(session.ok_tracks().map(|(_, t)| t.sample_rate)) else {
            return Ok(Vec::new());
        };
        let lengths: Vec<(usize, usize)> = session
            .ok_tracks()
            .map(|(index, t)| (index, normalized_length(t.total_samples, t.sample_rate, rate)))
            .collect();
        let Some(expected) = modal(lengths.iter().map(|&(_, n)| n)) else {
            return Ok(Vec::new());
        };

        let findings = lengths
            .into_iter()
            .map(|(index, normalized)| {
                let track = &session.tracks[index];
                let data = LengthData {
                    expected_samples: expected,
                    actual_samples: track.total_samples,
                    normalized_samples: normalized,
                    expected_duration_secs: expected as f64 / rate as f64,
                    actual_duration_secs: track.duration_secs,
                };
                let result = if normalized == expected {
                    DetectorResult::clean(
                        self.id(),
                        format_duration(normalized, rate),
                        DetectorData::Length(data),
                    )
                } else {
                    let diff = normalized as i64 - expected as i64;
                    let summary = format!(
                        "{} vs session {} ({:+} samples)",
                        format_duration(normalized, rate),
                        format_duration(expected, rate),
                        diff
                    );
                    let issue = IssueLocation::whole_file(
                        track.total_samples,
                        Severity::Problem,
                        "length mismatch",
                        summary.clone(),
                    );
                    DetectorResult::new(self.id(), Severity::Problem, summary, DetectorData::Length(data))
                        .with_hint("re-export every stem from the same start and end point")
                        .with_issues(vec![issue])
                };
                TrackFinding {
                    track: Some(index),
                    result,
                }
            })
            .collect();
        Ok(findings)
    }
}
