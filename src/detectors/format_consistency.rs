use crate::models::{
    BitDepth, DetectorData, DetectorResult, FormatData, IssueLocation, Session, Severity, TrackFinding,
};

use super::{modal, SessionDetector};

/// Sample rate and bit depth compared against the most common format in the session.
pub struct FormatConsistencyDetector;

impl SessionDetector for FormatConsistencyDetector {
    fn id(&self) -> &str {
        "format_consistency"
    }

    fn name(&self) -> &str {
        "Format consistency"
    }

    fn analyze(&self, session: &Session) -> anyhow::Result<Vec<TrackFinding>> {
        let Some(expected_rate) = modal(session.ok_tracks().map(|(_, t)| t.sample_rate)) else {
            return Ok(Vec::new());
        };
        let expected_depth = modal(session.ok_tracks().map(|(_, t)| t.bit_depth)).unwrap_or(BitDepth::Unknown);

        let findings = session
            .ok_tracks()
            .map(|(index, track)| {
                let data = FormatData {
                    expected_sample_rate: expected_rate,
                    actual_sample_rate: track.sample_rate,
                    expected_bit_depth: expected_depth,
                    actual_bit_depth: track.bit_depth,
                };
                let mut mismatches = Vec::new();
                if track.sample_rate != expected_rate {
                    mismatches.push(format!("{} Hz (session {} Hz)", track.sample_rate, expected_rate));
                }
                if track.bit_depth != expected_depth {
                    mismatches.push(format!("{} (session {})", track.bit_depth, expected_depth));
                }

                let result = if mismatches.is_empty() {
                    DetectorResult::clean(
                        self.id(),
                        format!("{} Hz / {}", track.sample_rate, track.bit_depth),
                        DetectorData::Format(data),
                    )
                } else {
                    let summary = mismatches.join(", ");
                    let issue = IssueLocation::whole_file(
                        track.total_samples,
                        Severity::Problem,
                        "format mismatch",
                        summary.clone(),
                    );
                    DetectorResult::new(self.id(), Severity::Problem, summary, DetectorData::Format(data))
                        .with_hint("convert to the session format before importing")
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
