use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

use gainstage::audio;
use gainstage::config::Config;
use gainstage::error::{ConfigError, Error};
use gainstage::events::NullSink;
use gainstage::format;
use gainstage::models::{BitDepth, Classification, Session, Severity};
use gainstage::pipeline::{default_config, Pipeline};

const RATE: u32 = 48000;

/// Write mono 32-bit float samples so full-scale values survive exactly.
fn write_wav(dir: &Path, filename: &str, samples: &[f32]) -> PathBuf {
    let path = dir.join(filename);
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
    path
}

fn sine(freq: f64, amplitude: f64, secs: f64) -> Vec<f32> {
    let len = (RATE as f64 * secs) as usize;
    (0..len)
        .map(|i| (amplitude * (2.0 * std::f64::consts::PI * freq * i as f64 / RATE as f64).sin()) as f32)
        .collect()
}

/// Four decaying 60 Hz hits over four seconds, with a five-sample clip on the first.
fn kick() -> Vec<f32> {
    let mut samples = vec![0.0f32; RATE as usize * 4];
    for hit in 0..4 {
        let start = hit * RATE as usize;
        for i in 0..(RATE as usize / 2) {
            let t = i as f64 / RATE as f64;
            let v = 0.8 * (-t / 0.05).exp() * (2.0 * std::f64::consts::PI * 60.0 * t).sin();
            samples[start + i] = v as f32;
        }
    }
    for s in &mut samples[100..105] {
        *s = 1.0;
    }
    samples
}

fn analyzed(dir: &Path, config: Config) -> (Pipeline, Session) {
    let pipeline = Pipeline::with_defaults(config.clone()).unwrap().with_max_workers(2);
    let mut session = audio::load_session(dir, config, &NullSink, Some(2)).unwrap();
    pipeline.analyze(&mut session);
    pipeline.plan(&mut session);
    (pipeline, session)
}

fn three_track_session() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_wav(dir.path(), "kick.wav", &kick());
    write_wav(dir.path(), "gap.wav", &vec![0.0; RATE as usize * 4]);
    write_wav(dir.path(), "pad.wav", &sine(220.0, 0.0893, 4.0));
    dir
}

#[test]
fn test_end_to_end_analysis_and_plan() {
    let dir = three_track_session();
    let (_, session) = analyzed(dir.path(), default_config());
    assert_eq!(session.tracks.len(), 3);

    let kick = &session.tracks[session.track_index("kick.wav").unwrap()];
    assert_eq!(kick.bit_depth, BitDepth::Float(32));
    let clipping = &kick.detector_results["clipping"];
    assert_eq!(clipping.severity, Severity::Problem);
    assert_eq!(clipping.issues.len(), 1);
    assert_eq!(clipping.issues[0].sample_start, 100);
    assert_eq!(clipping.issues[0].sample_end, Some(104));
    assert!(kick.processor_results["bimodal_normalize"].classification.is_transient());

    let gap = &session.tracks[session.track_index("gap.wav").unwrap()];
    assert_eq!(gap.detector_results["silence"].severity, Severity::Attention);
    let gap_gain = &gap.processor_results["bimodal_normalize"];
    assert_eq!(gap_gain.classification, Classification::Silent);
    assert_eq!(gap_gain.gain_db, 0.0);

    let pad = &session.tracks[session.track_index("pad.wav").unwrap()];
    let pad_gain = &pad.processor_results["bimodal_normalize"];
    assert_eq!(pad_gain.classification, Classification::Sustained);
    assert!(pad_gain.method.starts_with("RMS"), "method was {}", pad_gain.method);
    assert!((pad_gain.gain_db - 6.0).abs() < 0.1, "gain was {}", pad_gain.gain_db);

    assert!(session.failures().is_empty());
    assert_eq!(session.session_results["format_consistency"].len(), 3);
}

#[test]
fn test_invalid_config_fails_before_loading() {
    let mut config = default_config();
    config.set("window", 0i64);
    match Pipeline::with_defaults(config) {
        Err(ConfigError::InvalidParams(fields)) => assert_eq!(fields[0].key, "window"),
        _ => panic!("expected invalid params"),
    }
}

#[test]
fn test_unreadable_file_is_isolated() {
    let dir = three_track_session();
    std::fs::write(dir.path().join("broken.wav"), b"RIFF0000WAVEjunk").unwrap();
    let (_, session) = analyzed(dir.path(), default_config());

    assert_eq!(session.tracks.len(), 4);
    let broken = &session.tracks[session.track_index("broken.wav").unwrap()];
    assert!(!broken.is_ok());
    assert!(broken.detector_results.is_empty());
    assert_eq!(session.failures().len(), 1);
    // the other tracks still get a full analysis
    let pad = &session.tracks[session.track_index("pad.wav").unwrap()];
    assert!(pad.processor_results.contains_key("bimodal_normalize"));
}

#[test]
fn test_empty_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = audio::load_session(dir.path(), Config::new(), &NullSink, None);
    assert!(matches!(result, Err(Error::NoAudioFiles(_))));
}

#[test]
fn test_group_members_share_lowest_gain() {
    let dir = tempfile::tempdir().unwrap();
    write_wav(dir.path(), "pad_quiet.wav", &sine(220.0, 0.0893, 4.0));
    write_wav(dir.path(), "pad_loud.wav", &sine(330.0, 0.178, 4.0));
    write_wav(dir.path(), "bass.wav", &sine(110.0, 0.0893, 4.0));

    let mut config = default_config();
    config.set("group", vec!["Keys=pad".to_string()]);
    let (_, session) = analyzed(dir.path(), config);

    let gain = |name: &str| {
        let t = &session.tracks[session.track_index(name).unwrap()];
        t.processor_results["bimodal_normalize"].clone()
    };
    let quiet = gain("pad_quiet.wav");
    let loud = gain("pad_loud.wav");
    assert_eq!(quiet.gain_db, loud.gain_db);
    assert!(loud.gain_db.abs() < 0.2);
    assert!((quiet.data.original_gain_db.unwrap() - 6.0).abs() < 0.1);
    assert!((gain("bass.wav").gain_db - 6.0).abs() < 0.1);
    assert_eq!(session.groups.get("pad_quiet.wav").map(String::as_str), Some("Keys"));
}

#[test]
fn test_prepare_writes_gain_staged_copies() {
    let dir = three_track_session();
    let out = tempfile::tempdir().unwrap();
    let (pipeline, mut session) = analyzed(dir.path(), default_config());
    pipeline.prepare(&mut session, out.path()).unwrap();

    let pad = &session.tracks[session.track_index("pad.wav").unwrap()];
    let written = pad.processed_path.clone().unwrap();
    assert_eq!(written, out.path().join("pad.wav"));
    let reloaded = audio::load_track(&written).unwrap();
    let peak = reloaded
        .audio
        .channel(0)
        .iter()
        .fold(0.0f32, |m, s| m.max(s.abs()));
    assert!((peak - 0.178).abs() < 0.003, "peak was {}", peak);

    // the silent track is copied unchanged
    assert!(out.path().join("gap.wav").exists());
    let report = format::session_report(&session, &pipeline);
    assert_eq!(report.tracks.len(), 3);
}

#[test]
fn test_cli_prints_table() {
    let dir = three_track_session();
    cargo_bin_cmd!("gainstage")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Tracks: 3"))
        .stdout(predicate::str::contains("kick.wav"))
        .stdout(predicate::str::contains("[PROB] clipping"));
}

#[test]
fn test_cli_json_output() {
    let dir = three_track_session();
    let output = cargo_bin_cmd!("gainstage")
        .arg(dir.path())
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["tracks"].as_array().unwrap().len(), 3);
}

#[test]
fn test_cli_rejects_invalid_override() {
    let dir = three_track_session();
    cargo_bin_cmd!("gainstage")
        .arg(dir.path())
        .args(["--set", "window=0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("window"));
}

#[test]
fn test_cli_writes_output_directory() {
    let dir = three_track_session();
    let out = tempfile::tempdir().unwrap();
    cargo_bin_cmd!("gainstage")
        .arg(dir.path())
        .arg("--output")
        .arg(out.path())
        .assert()
        .success();
    assert!(out.path().join("kick.wav").exists());
    assert!(out.path().join("pad.wav").exists());
}

#[test]
fn test_cli_missing_directory() {
    cargo_bin_cmd!("gainstage")
        .arg("/nonexistent/stems")
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not a directory"));
}
