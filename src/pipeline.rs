//! Runs detectors and processors over a session.
//!
//! Construction validates configuration and the detector dependency graph,
//! so a `Pipeline` that exists can always run. Each phase processes tracks
//! in a bounded worker pool, one track per task, and isolates every fault to
//! the component and track where it happened.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use crate::audio;
use crate::config::{session_params, validate_params, AnalysisSettings, Config, ParamSpec};
use crate::detectors::{Detector, DetectorContext, ReportAs, SessionDetector, TrackDetector};
use crate::dsp::level::{linear_to_db, peak_linear};
use crate::error::{ConfigError, Error};
use crate::events::{EventSink, Phase, PipelineEvent, TracingSink};
use crate::models::{DetectorResult, ProcessorResult, Session, Severity, Track, TrackFinding};
use crate::pool;
use crate::processors::post::PostSteps;
use crate::processors::{enabled_param, AudioProcessor};

pub struct Pipeline {
    /// Per-track detectors in dependency order.
    detectors: Vec<Box<dyn TrackDetector>>,
    session_detectors: Vec<Box<dyn SessionDetector>>,
    /// Enabled processors sorted by priority.
    processors: Vec<Box<dyn AudioProcessor>>,
    report_as: BTreeMap<String, ReportAs>,
    post: PostSteps,
    max_workers: Option<usize>,
    sink: Arc<dyn EventSink>,
}

/// Every parameter any of the given components reads.
fn all_params(detectors: &[Detector], processors: &[Box<dyn AudioProcessor>]) -> Vec<ParamSpec> {
    let mut specs = AnalysisSettings::params();
    specs.extend(session_params());
    for detector in detectors {
        specs.extend(detector.config_params());
        specs.push(ReportAs::param(detector.id()));
    }
    for processor in processors {
        specs.extend(processor.config_params());
        specs.push(enabled_param(processor.id()));
    }
    specs
}

/// Defaults for every parameter of the built-in components.
pub fn default_config() -> Config {
    let detectors = crate::detectors::default_detectors();
    let processors = crate::processors::default_processors();
    Config::with_defaults(&all_params(&detectors, &processors))
}

/// Kahn's algorithm; among ready detectors the earliest registered goes first.
fn topological_order(detectors: &[Box<dyn TrackDetector>]) -> Result<Vec<usize>, ConfigError> {
    let index: BTreeMap<&str, usize> = detectors
        .iter()
        .enumerate()
        .map(|(i, d)| (d.id(), i))
        .collect();
    let mut pending: Vec<usize> = detectors.iter().map(|d| d.depends_on().len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); detectors.len()];
    for (i, detector) in detectors.iter().enumerate() {
        for dep in detector.depends_on() {
            let Some(&d) = index.get(dep) else {
                return Err(ConfigError::MissingDependency {
                    detector: detector.id().to_string(),
                    dependency: dep.to_string(),
                });
            };
            dependents[d].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..detectors.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(detectors.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &j in &dependents[i] {
            pending[j] -= 1;
            if pending[j] == 0 {
                ready.insert(j);
            }
        }
    }

    if order.len() < detectors.len() {
        let placed: HashSet<usize> = order.iter().copied().collect();
        let cycle = (0..detectors.len())
            .filter(|i| !placed.contains(i))
            .map(|i| detectors[i].id().to_string())
            .collect();
        return Err(ConfigError::DependencyCycle(cycle));
    }
    Ok(order)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Run `f`, turning both errors and panics into a message.
fn isolate<T>(f: impl FnOnce() -> anyhow::Result<T>) -> Result<T, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(payload) => Err(panic_message(payload)),
    }
}

impl Pipeline {
    /// Validate, order and configure the given components.
    pub fn new(
        detectors: Vec<Detector>,
        mut processors: Vec<Box<dyn AudioProcessor>>,
        config: Config,
    ) -> Result<Self, ConfigError> {
        let mut seen_keys = HashSet::new();
        let errors: Vec<_> = validate_params(&config, &all_params(&detectors, &processors))
            .into_iter()
            .filter(|e| seen_keys.insert(e.key.clone()))
            .collect();
        if !errors.is_empty() {
            return Err(ConfigError::InvalidParams(errors));
        }

        let mut ids = HashSet::new();
        let component_ids = detectors
            .iter()
            .map(|d| d.id())
            .chain(processors.iter().map(|p| p.id()));
        for id in component_ids {
            if !ids.insert(id.to_string()) {
                return Err(ConfigError::DuplicateId(id.to_string()));
            }
        }

        let mut report_as = BTreeMap::new();
        let mut track_detectors = Vec::new();
        let mut session_detectors = Vec::new();
        for detector in detectors {
            report_as.insert(
                detector.id().to_string(),
                ReportAs::from_config(&config, detector.id()),
            );
            match detector {
                Detector::Track(d) => track_detectors.push(d),
                Detector::Session(d) => session_detectors.push(d),
            }
        }

        let order = topological_order(&track_detectors)?;
        let mut slots: Vec<Option<Box<dyn TrackDetector>>> =
            track_detectors.into_iter().map(Some).collect();
        let mut detectors: Vec<Box<dyn TrackDetector>> =
            order.into_iter().filter_map(|i| slots[i].take()).collect();

        for detector in &mut detectors {
            detector.configure(&config)?;
        }
        for detector in &mut session_detectors {
            detector.configure(&config)?;
        }
        for processor in &mut processors {
            processor.configure(&config)?;
        }
        processors.retain(|p| p.enabled());
        processors.sort_by_key(|p| p.priority());

        tracing::debug!(
            order = ?detectors.iter().map(|d| d.id()).collect::<Vec<_>>(),
            processors = processors.len(),
            "pipeline configured"
        );

        Ok(Self {
            detectors,
            session_detectors,
            processors,
            report_as,
            post: PostSteps::from_config(&config)?,
            max_workers: None,
            sink: Arc::new(TracingSink),
        })
    }

    /// The built-in detectors and processors.
    pub fn with_defaults(config: Config) -> Result<Self, ConfigError> {
        Self::new(
            crate::detectors::default_detectors(),
            crate::processors::default_processors(),
            config,
        )
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers.max(1));
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Ids of the per-track detectors in execution order.
    pub fn detector_order(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.id()).collect()
    }

    pub fn processor_ids(&self) -> Vec<&str> {
        self.processors.iter().map(|p| p.id()).collect()
    }

    /// Severity after `<id>_report_as`; `None` when the result is hidden.
    /// Clean results and detector faults are never remapped.
    pub fn effective_severity(&self, result: &DetectorResult) -> Option<Severity> {
        if result.is_failed() {
            return Some(result.severity);
        }
        self.report_as
            .get(&result.detector_id)
            .copied()
            .unwrap_or(ReportAs::Default)
            .apply(result.severity)
    }

    fn workers(&self, tracks: usize) -> usize {
        pool::worker_count(self.max_workers, tracks)
    }

    fn run_tracks(
        &self,
        session: &mut Session,
        phase: Phase,
        task: impl Fn(usize, &mut Track) + Sync,
    ) {
        let tracks = session.tracks.len();
        self.sink.emit(PipelineEvent::PhaseStarted { phase, tracks });
        let sink = &*self.sink;
        pool::for_each_mut(&mut session.tracks, self.workers(tracks), |index, track| {
            if !track.is_ok() {
                return;
            }
            sink.emit(PipelineEvent::TrackStarted { phase, index });
            task(index, track);
            sink.emit(PipelineEvent::TrackCompleted { phase, index });
        });
    }

    /// Run every per-track detector chain, then the session detectors.
    pub fn analyze(&self, session: &mut Session) {
        tracing::info!(tracks = session.tracks.len(), "analyzing");
        self.run_tracks(session, Phase::Analyze, |index, track| self.analyze_track(index, track));

        for detector in &self.session_detectors {
            let id = detector.id();
            let findings = match isolate(|| detector.analyze(&*session)) {
                Ok(findings) => findings,
                Err(reason) => {
                    tracing::warn!(detector = id, %reason, "session detector failed");
                    self.sink.emit(PipelineEvent::DetectorFailed {
                        index: None,
                        detector_id: id.to_string(),
                        reason: reason.clone(),
                    });
                    vec![TrackFinding {
                        track: None,
                        result: DetectorResult::failed(id, reason),
                    }]
                }
            };
            for finding in &findings {
                let Some(track) = finding.track.and_then(|i| session.tracks.get_mut(i)) else {
                    continue;
                };
                track.detector_results.insert(id.to_string(), finding.result.clone());
                self.sink.emit(PipelineEvent::DetectorCompleted {
                    index: finding.track,
                    detector_id: id.to_string(),
                    severity: finding.result.severity,
                });
            }
            session.session_results.insert(id.to_string(), findings);
        }
        self.sink.emit(PipelineEvent::PhaseCompleted { phase: Phase::Analyze });
    }

    fn analyze_track(&self, index: usize, track: &mut Track) {
        let mut faulted: HashSet<&str> = HashSet::new();
        for detector in &self.detectors {
            let id = detector.id();
            let deps = detector.depends_on();
            let result = match deps.iter().find(|d| faulted.contains(*d)) {
                Some(dep) => DetectorResult::failed(id, format!("dependency '{}' failed", dep)),
                None => {
                    let ctx = DetectorContext::new(track, deps);
                    isolate(|| detector.analyze(&ctx))
                        .unwrap_or_else(|reason| DetectorResult::failed(id, reason))
                }
            };

            if let Some(reason) = &result.error {
                faulted.insert(id);
                tracing::warn!(file = %track.filename, detector = id, %reason, "detector failed");
                self.sink.emit(PipelineEvent::DetectorFailed {
                    index: Some(index),
                    detector_id: id.to_string(),
                    reason: reason.clone(),
                });
            } else {
                tracing::debug!(
                    file = %track.filename,
                    detector = id,
                    severity = %result.severity,
                    "detector finished"
                );
                self.sink.emit(PipelineEvent::DetectorCompleted {
                    index: Some(index),
                    detector_id: id.to_string(),
                    severity: result.severity,
                });
            }
            track.detector_results.insert(id.to_string(), result);
        }
    }

    /// Compute gain decisions for every track, then level groups and
    /// derive fader offsets. Processors in a track's skip set record nothing
    /// for it.
    pub fn plan(&self, session: &mut Session) {
        tracing::info!(tracks = session.tracks.len(), "planning");
        self.run_tracks(session, Phase::Plan, |index, track| {
            for processor in &self.processors {
                let id = processor.id();
                if track.overrides.processor_skip.contains(id) {
                    track.processor_results.remove(id);
                    continue;
                }
                let result = isolate(|| processor.process(track)).unwrap_or_else(|reason| {
                    tracing::warn!(
                        file = %track.filename,
                        processor = id,
                        %reason,
                        "processor failed"
                    );
                    self.sink.emit(PipelineEvent::ProcessorFailed {
                        index,
                        processor_id: id.to_string(),
                        reason: reason.clone(),
                    });
                    ProcessorResult::failed(id, reason)
                });
                if result.error.is_none() {
                    self.sink.emit(PipelineEvent::ProcessorCompleted {
                        index,
                        processor_id: id.to_string(),
                        gain_db: result.gain_db,
                    });
                }
                track.processor_results.insert(id.to_string(), result);
            }
        });

        for processor in &self.processors {
            self.post.level_groups(session, processor.id());
            self.post.fader_offsets(session, processor.id());
        }
        self.sink.emit(PipelineEvent::PhaseCompleted { phase: Phase::Plan });
    }

    /// Processors whose decision for `track` should be applied.
    fn applicable<'a>(
        &'a self,
        track: &'a Track,
    ) -> impl Iterator<Item = (&'a dyn AudioProcessor, &'a ProcessorResult)> {
        self.processors.iter().filter_map(move |p| {
            if track.overrides.processor_skip.contains(p.id()) {
                return None;
            }
            let result = track.processor_results.get(p.id())?;
            result.error.is_none().then_some((p.as_ref(), result))
        })
    }

    fn emit_write(
        &self,
        index: usize,
        track: &mut Track,
        path: &Path,
        written: anyhow::Result<()>,
    ) {
        match written {
            Ok(()) => {
                track.processed_path = Some(path.to_path_buf());
                self.sink.emit(PipelineEvent::FileWritten {
                    index,
                    path: path.to_path_buf(),
                });
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                tracing::warn!(file = %track.filename, %reason, "write failed");
                self.sink.emit(PipelineEvent::WriteFailed {
                    index,
                    reason: reason.clone(),
                });
                track.write_error = Some(reason);
            }
        }
    }

    /// Write a processed copy of every track into `output_dir`, leaving the
    /// in-memory audio untouched. Existing files with the same name are replaced.
    pub fn prepare(&self, session: &mut Session, output_dir: &Path) -> Result<(), Error> {
        std::fs::create_dir_all(output_dir).map_err(|source| Error::Io {
            path: output_dir.to_path_buf(),
            source,
        })?;
        tracing::info!(output = %output_dir.display(), "preparing");
        let paths = audio::output_paths(&session.tracks, output_dir);
        self.run_tracks(session, Phase::Prepare, |index, track| {
            track.processed_path = None;
            track.write_error = None;
            track.applied_processors.clear();

            let mut processed = track.audio.clone();
            let mut applied = Vec::new();
            let mut failure = None;
            for (processor, result) in self.applicable(track) {
                match isolate(|| processor.apply(track, std::mem::take(&mut processed), result)) {
                    Ok(out) => {
                        processed = out;
                        applied.push(processor.id().to_string());
                    }
                    Err(reason) => {
                        failure = Some(format!("{}: {}", processor.id(), reason));
                        break;
                    }
                }
            }

            let path = &paths[index];
            let written = match failure {
                Some(reason) => Err(anyhow::anyhow!(reason)),
                None => audio::write_track(&processed, track.sample_rate, track.bit_depth, path),
            };
            if written.is_ok() {
                track.applied_processors = applied;
            }
            self.emit_write(index, track, path, written);
        });
        self.sink.emit(PipelineEvent::PhaseCompleted { phase: Phase::Prepare });
        Ok(())
    }

    /// Apply every decision to the in-memory audio, record the resulting
    /// peak, and write the result into `output_dir`.
    pub fn execute(&self, session: &mut Session, output_dir: &Path) -> Result<(), Error> {
        std::fs::create_dir_all(output_dir).map_err(|source| Error::Io {
            path: output_dir.to_path_buf(),
            source,
        })?;
        tracing::info!(output = %output_dir.display(), "executing");
        let paths = audio::output_paths(&session.tracks, output_dir);
        self.run_tracks(session, Phase::Execute, |index, track| {
            let ids: Vec<String> = self
                .applicable(track)
                .map(|(p, _)| p.id().to_string())
                .collect();
            for id in ids {
                let Some(processor) = self.processors.iter().find(|p| p.id() == id) else {
                    continue;
                };
                let Some(result) = track.processor_results.get(&id).cloned() else {
                    continue;
                };
                match isolate(|| processor.apply(track, track.audio.clone(), &result)) {
                    Ok(out) => {
                        let out_peak_db = linear_to_db(peak_linear(&out));
                        track.replace_audio(out);
                        if let Some(r) = track.processor_results.get_mut(&id) {
                            r.data.out_peak_db = Some(out_peak_db);
                        }
                        track.applied_processors.push(id);
                    }
                    Err(reason) => {
                        if let Some(r) = track.processor_results.get_mut(&id) {
                            r.error = Some(reason.clone());
                        }
                        self.sink.emit(PipelineEvent::ProcessorFailed {
                            index,
                            processor_id: id,
                            reason,
                        });
                    }
                }
            }

            let path = &paths[index];
            let written =
                audio::write_track(&track.audio, track.sample_rate, track.bit_depth, path);
            self.emit_write(index, track, path, written);
        });
        self.sink.emit(PipelineEvent::PhaseCompleted { phase: Phase::Execute });
        Ok(())
    }
}
