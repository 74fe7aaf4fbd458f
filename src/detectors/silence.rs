use crate::models::{DetectorData, DetectorResult, IssueLocation, Severity};

use super::{DetectorContext, TrackDetector};

/// Flags tracks with no signal at all. Every other per-track detector depends on it.
pub struct SilenceDetector;

impl TrackDetector for SilenceDetector {
    fn id(&self) -> &str {
        "silence"
    }

    fn name(&self) -> &str {
        "Silent files"
    }

    fn depends_on(&self) -> &[&str] {
        &[]
    }

    fn analyze(&self, ctx: &DetectorContext<'_>) -> anyhow::Result<DetectorResult> {
        let peak_db = ctx.peak_db();
        let is_silent = ctx.is_silent();
        let data = DetectorData::Silence { peak_db, is_silent };

        if !is_silent {
            return Ok(DetectorResult::clean(self.id(), "signal present", data));
        }

        let issue = IssueLocation::whole_file(
            ctx.total_samples(),
            Severity::Attention,
            "silent",
            "entire file is digital silence",
        );
        Ok(
            DetectorResult::new(self.id(), Severity::Attention, "file is silent", data)
                .with_hint("check the export; a silent file is usually a bounce mistake")
                .with_issues(vec![issue]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::testing::{sine, track};

    #[test]
    fn test_silent_track() {
        let track = track("empty.wav", vec![vec![0.0; 4800]]);
        let result = SilenceDetector.analyze(&DetectorContext::new(&track, &[])).unwrap();
        assert_eq!(result.severity, Severity::Attention);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].sample_start, 0);
        assert_eq!(result.issues[0].sample_end, Some(4799));
        assert_eq!(result.issues[0].channel, None);
    }

    #[test]
    fn test_quiet_but_not_silent() {
        let mut samples = vec![0.0f32; 4800];
        samples[100] = 1e-6;
        let track = track("quiet.wav", vec![samples]);
        let result = SilenceDetector.analyze(&DetectorContext::new(&track, &[])).unwrap();
        assert_eq!(result.severity, Severity::Clean);

        let track = crate::detectors::testing::track("tone.wav", vec![sine(440.0, 0.5, 0.1)]);
        let result = SilenceDetector.analyze(&DetectorContext::new(&track, &[])).unwrap();
        assert_eq!(result.severity, Severity::Clean);
    }
}
