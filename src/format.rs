use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::dsp::level::display_db;
use crate::models::{BitDepth, Failure, FaderAdjustment, Session, Severity, Track, TrackStatus};
use crate::pipeline::Pipeline;

/// One detector finding as presented to the user, after `report_as`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FindingReport {
    pub detector_id: String,
    pub severity: Severity,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub issues: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackReport {
    pub filename: String,
    pub status: TrackStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub sample_rate: u32,
    pub bit_depth: BitDepth,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gain_db: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fader_offset_db: Option<f64>,
    pub worst: Severity,
    pub findings: Vec<FindingReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_path: Option<PathBuf>,
}

/// Everything a run produced, ready to print or serialize.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub tracks: Vec<TrackReport>,
    pub groups: BTreeMap<String, String>,
    pub fader_adjustments: BTreeMap<String, FaderAdjustment>,
    pub warnings: Vec<String>,
    pub failures: Vec<Failure>,
}

fn track_report(track: &Track, pipeline: &Pipeline, processor_id: Option<&str>) -> TrackReport {
    let findings: Vec<FindingReport> = track
        .detector_results
        .values()
        .filter_map(|result| {
            let severity = pipeline.effective_severity(result)?;
            Some(FindingReport {
                detector_id: result.detector_id.clone(),
                severity,
                summary: result.summary.clone(),
                hint: result.hint.clone(),
                error: result.error.clone(),
                issues: result.issues.len(),
            })
        })
        .collect();
    let worst = findings.iter().map(|f| f.severity).max().unwrap_or(Severity::Clean);
    let decision = processor_id.and_then(|id| track.processor_results.get(id));

    TrackReport {
        filename: track.filename.clone(),
        status: track.status.clone(),
        group: track.group.clone(),
        sample_rate: track.sample_rate,
        bit_depth: track.bit_depth,
        duration_secs: track.duration_secs,
        classification: decision.map(|d| d.classification.to_string()),
        gain_db: decision.filter(|d| d.error.is_none()).map(|d| d.gain_db),
        method: decision.map(|d| d.error.clone().unwrap_or_else(|| d.method.clone())),
        fader_offset_db: decision.and_then(|d| d.data.fader_offset_db),
        worst,
        findings,
        processed_path: track.processed_path.clone(),
    }
}

/// Build the report for a session the pipeline has run over.
pub fn session_report(session: &Session, pipeline: &Pipeline) -> SessionReport {
    let processor_id = pipeline.processor_ids().first().copied();
    SessionReport {
        tracks: session
            .tracks
            .iter()
            .map(|t| track_report(t, pipeline, processor_id))
            .collect(),
        groups: session.groups.clone(),
        fader_adjustments: session.fader_adjustments.clone(),
        warnings: session.warnings.clone(),
        failures: session.failures(),
    }
}

fn severity_tag(severity: Severity) -> &'static str {
    match severity {
        Severity::Clean => "ok",
        Severity::Info => "info",
        Severity::Attention => "ATTN",
        Severity::Problem => "PROB",
    }
}

fn signed_db(db: Option<f64>) -> String {
    match db {
        Some(db) if db.is_finite() => format!("{:+.1} dB", db),
        Some(db) => display_db(db),
        None => "-".to_string(),
    }
}

/// Render the report as a fixed-width table. Findings at attention or
/// above are listed under their track.
pub fn format_table(report: &SessionReport) -> String {
    let separator = "\u{2500}".repeat(78);
    let mut output = String::new();

    output.push_str(&format!(
        "{:<6} {:<20} {:>10} {:>10} {:<12} {}\n",
        "Status", "Class", "Gain", "Fader", "Group", "Track"
    ));
    output.push_str(&separator);
    output.push('\n');

    for track in &report.tracks {
        if let TrackStatus::Error(reason) = &track.status {
            output.push_str(&format!("{:<6} {:<20} {:>10} {:>10} {:<12} {}\n", "FAIL", "-", "-", "-", "-", track.filename));
            output.push_str(&format!("       load failed: {}\n", reason));
            continue;
        }
        output.push_str(&format!(
            "{:<6} {:<20} {:>10} {:>10} {:<12} {}\n",
            severity_tag(track.worst),
            track.classification.as_deref().unwrap_or("-"),
            signed_db(track.gain_db),
            signed_db(track.fader_offset_db),
            track.group.as_deref().unwrap_or("-"),
            track.filename,
        ));
        for finding in track.findings.iter().filter(|f| f.severity >= Severity::Attention) {
            output.push_str(&format!(
                "       [{}] {}: {}\n",
                severity_tag(finding.severity),
                finding.detector_id,
                finding.summary
            ));
        }
    }

    output.push_str(&separator);
    output.push('\n');

    let count = |s: Severity| report.tracks.iter().filter(|t| t.worst == s && t.status == TrackStatus::Ok).count();
    output.push_str(&format!(
        "Tracks: {}  Problem: {}  Attention: {}  Failures: {}",
        report.tracks.len(),
        count(Severity::Problem),
        count(Severity::Attention),
        report.failures.len(),
    ));
    for warning in &report.warnings {
        output.push_str(&format!("\nwarning: {}", warning));
    }

    output
}

/// Render the report as pretty-printed JSON.
pub fn format_json(report: &SessionReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{AudioBuffer, Classification, DetectorData, DetectorResult, ProcessorResult};

    fn report() -> SessionReport {
        let mut kick = Track::new("kick.wav", "kick.wav", AudioBuffer::from_planar(vec![vec![0.1; 4]]), 48000, BitDepth::Int(24));
        kick.group = Some("Drums".into());
        kick.detector_results.insert(
            "clipping".into(),
            DetectorResult::new("clipping", Severity::Problem, "2 clipped ranges", DetectorData::None),
        );
        kick.detector_results.insert(
            "dc_offset".into(),
            DetectorResult::new("dc_offset", Severity::Attention, "DC offset -30.0 dB", DetectorData::None),
        );
        let mut decision = ProcessorResult::new("bimodal_normalize", 4.25, Classification::Transient, "Peak → -6 dBFS");
        decision.data.fader_offset_db = Some(-4.25);
        kick.processor_results.insert("bimodal_normalize".into(), decision);
        let bad = Track::failed("bad.wav", "bad.wav", "unsupported format");

        let mut config = Config::new();
        config.set("dc_offset_report_as", "skip");
        let pipeline = Pipeline::with_defaults(config.clone()).unwrap();
        let mut session = Session::new(vec![kick, bad], config);
        session.warnings.push("'snare.wav' matches groups Drums, Perc".into());
        session_report(&session, &pipeline)
    }

    #[test]
    fn test_report_applies_report_as() {
        let report = report();
        let kick = &report.tracks[0];
        assert_eq!(kick.worst, Severity::Problem);
        assert_eq!(kick.findings.len(), 1);
        assert_eq!(kick.gain_db, Some(4.25));
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_format_table_columns() {
        let table = format_table(&report());
        assert!(table.contains("Status"));
        assert!(table.contains("Transient"));
        assert!(table.contains("+4.2 dB") || table.contains("+4.3 dB"));
        assert!(table.contains("-4.2 dB") || table.contains("-4.3 dB"));
        assert!(table.contains("Drums"));
        assert!(table.contains("[PROB] clipping: 2 clipped ranges"));
        assert!(!table.contains("dc_offset"));
        assert!(table.contains("load failed: unsupported format"));
        assert!(table.contains("Tracks: 2  Problem: 1  Attention: 0  Failures: 1"));
        assert!(table.contains("warning: 'snare.wav' matches groups Drums, Perc"));
    }

    #[test]
    fn test_format_json_fields() {
        let json = format_json(&report());
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["tracks"][0]["filename"], "kick.wav");
        assert_eq!(value["tracks"][0]["worst"], "problem");
        assert_eq!(value["tracks"][0]["classification"], "Transient");
        assert_eq!(value["tracks"][1]["status"]["state"], "error");
        assert_eq!(value["failures"][0]["source"]["kind"], "load");
    }

    #[test]
    fn test_signed_db() {
        assert_eq!(signed_db(Some(6.0)), "+6.0 dB");
        assert_eq!(signed_db(Some(f64::NEG_INFINITY)), "-inf dB");
        assert_eq!(signed_db(None), "-");
    }
}
