//! Reading source files into tracks and writing processed copies back out.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{
    CodecParameters, DecoderOptions, CODEC_TYPE_NULL, CODEC_TYPE_PCM_F32BE, CODEC_TYPE_PCM_F32LE,
    CODEC_TYPE_PCM_F64BE, CODEC_TYPE_PCM_F64LE,
};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::SampleFormat;

use crate::config::Config;
use crate::error::Error;
use crate::events::{EventSink, Phase, PipelineEvent};
use crate::groups;
use crate::models::{AudioBuffer, BitDepth, Session, Track};
use crate::pool;

/// Lossless containers accepted as session sources.
const AUDIO_EXTENSIONS: &[&str] = &["wav", "wave", "flac"];

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Ordering key: lowercase filename with spaces removed.
fn sort_key(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase().replace(' ', ""))
        .unwrap_or_default()
}

/// Audio files directly inside `dir`, ordered ignoring case and spaces.
pub fn scan_audio_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_audio_file(p))
        .collect();
    files.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)).then_with(|| a.cmp(b)));
    Ok(files)
}

fn bit_depth(params: &CodecParameters) -> BitDepth {
    let float_codec = [CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_F32BE, CODEC_TYPE_PCM_F64LE, CODEC_TYPE_PCM_F64BE]
        .contains(&params.codec);
    match (params.sample_format, params.bits_per_sample) {
        (Some(SampleFormat::F64), _) => BitDepth::Float(64),
        (Some(SampleFormat::F32), _) => BitDepth::Float(32),
        (_, Some(bits)) if float_codec => BitDepth::Float(bits as u16),
        (_, Some(bits)) => BitDepth::Int(bits as u16),
        _ => BitDepth::Unknown,
    }
}

/// Decode a whole file into a planar f32 buffer.
pub fn load_track(path: &Path) -> Result<Track> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .with_context(|| format!("Failed to probe {}", path.display()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio track found")?;
    let codec_params = track.codec_params.clone();
    let track_id = track.id;
    let sample_rate = codec_params.sample_rate.context("Unknown sample rate")?;
    let channels = codec_params
        .channels
        .map(|c| c.count())
        .context("Unknown channel layout")?;
    let depth = bit_depth(&codec_params);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .context("Failed to create decoder")?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut sample_buf_capacity: u64 = 0;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(symphonia::core::errors::Error::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        let capacity = decoded.capacity() as u64;
        // Reuse the SampleBuffer across packets; only reallocate if capacity is insufficient
        if sample_buf_capacity < capacity {
            sample_buf = None;
            sample_buf_capacity = capacity;
        }
        let buf = sample_buf.get_or_insert_with(|| SampleBuffer::new(capacity, spec));
        buf.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(buf.samples());
    }

    let audio = AudioBuffer::from_interleaved(&interleaved, channels);
    if audio.is_empty() {
        bail!("{} contains no audio frames", path.display());
    }

    let filename = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("unknown")
        .to_string();
    tracing::debug!(file = %filename, sample_rate, channels, frames = audio.frames(), bit_depth = %depth, "loaded");
    Ok(Track::new(filename, path, audio, sample_rate, depth))
}

/// Write `audio` as WAV, keeping the source bit depth where WAV can hold it.
/// Integer output is rounded and clamped to full scale.
pub fn write_track(audio: &AudioBuffer, sample_rate: u32, depth: BitDepth, path: &Path) -> Result<()> {
    let (bits_per_sample, sample_format) = match depth {
        BitDepth::Float(_) => (32, hound::SampleFormat::Float),
        BitDepth::Int(bits @ (8 | 16 | 24 | 32)) => (bits, hound::SampleFormat::Int),
        _ => (24, hound::SampleFormat::Int),
    };
    let spec = hound::WavSpec {
        channels: audio.channels() as u16,
        sample_rate,
        bits_per_sample,
        sample_format,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).with_context(|| format!("Failed to create {}", path.display()))?;

    match sample_format {
        hound::SampleFormat::Float => {
            for s in audio.interleaved() {
                writer.write_sample(s)?;
            }
        }
        hound::SampleFormat::Int => {
            let max = ((1i64 << (bits_per_sample - 1)) - 1) as f64;
            for s in audio.interleaved() {
                let v = (s as f64 * max).round().clamp(-max - 1.0, max) as i32;
                writer.write_sample(v)?;
            }
        }
    }
    writer
        .finalize()
        .with_context(|| format!("Failed to finalize {}", path.display()))?;
    Ok(())
}

fn file_stem(track: &Track) -> String {
    Path::new(&track.filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| track.filename.clone())
}

/// Where the processed copy of each track goes inside `output_dir`, in track
/// order. Outputs are named `<stem>.wav`. When sources share a stem, non-WAV
/// ones keep their full name (`kick.flac.wav`), and a name that is still
/// taken, compared case-insensitively, gets a numeric suffix.
pub fn output_paths(tracks: &[Track], output_dir: &Path) -> Vec<PathBuf> {
    let mut stems: HashMap<String, usize> = HashMap::new();
    for track in tracks {
        *stems.entry(file_stem(track).to_lowercase()).or_default() += 1;
    }

    let mut taken: HashSet<String> = HashSet::new();
    tracks
        .iter()
        .map(|track| {
            let stem = file_stem(track);
            let is_wav = Path::new(&track.filename)
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
            let shared = stems.get(&stem.to_lowercase()).copied().unwrap_or(0) > 1;
            let base = if shared && !is_wav { track.filename.clone() } else { stem };

            let mut name = format!("{}.wav", base);
            let mut n = 2;
            while !taken.insert(name.to_lowercase()) {
                name = format!("{}_{}.wav", base, n);
                n += 1;
            }
            output_dir.join(name)
        })
        .collect()
}

/// Load every audio file of `dir` in parallel and assign groups.
///
/// Files that fail to decode become `Error` tracks; the session only fails
/// when the directory cannot be read, holds no audio, or groups overlap under
/// the `error` policy.
pub fn load_session(
    dir: &Path,
    config: Config,
    sink: &dyn EventSink,
    jobs: Option<usize>,
) -> std::result::Result<Session, Error> {
    let files = scan_audio_files(dir).map_err(|source| Error::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    if files.is_empty() {
        return Err(Error::NoAudioFiles(dir.to_path_buf()));
    }

    sink.emit(PipelineEvent::PhaseStarted {
        phase: Phase::Load,
        tracks: files.len(),
    });
    let mut slots: Vec<Option<Track>> = files.iter().map(|_| None).collect();
    pool::for_each_mut(&mut slots, pool::worker_count(jobs, files.len()), |index, slot| {
        let path = &files[index];
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        let track = match load_track(path) {
            Ok(track) => {
                sink.emit(PipelineEvent::TrackLoaded { index, filename });
                track
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                sink.emit(PipelineEvent::LoadFailed {
                    index,
                    filename: filename.clone(),
                    reason: reason.clone(),
                });
                Track::failed(filename, path, reason)
            }
        };
        *slot = Some(track);
    });
    sink.emit(PipelineEvent::PhaseCompleted { phase: Phase::Load });

    let mut session = Session::new(slots.into_iter().flatten().collect(), config);
    groups::apply_groups(&mut session)?;
    Ok(session)
}
