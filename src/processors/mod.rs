//! Gain decisions per track and the session-wide steps that reconcile them.

pub mod bimodal;
pub mod post;

use crate::config::{Config, ParamSpec};
use crate::error::ConfigError;
use crate::models::{AudioBuffer, ProcessorResult, Track};

/// Priority bands. Processors run in ascending priority, ties in registration order.
pub mod priority {
    pub const CLEANUP: i32 = 0;
    pub const NORMALIZE: i32 = 100;
    pub const POST: i32 = 200;
    pub const FINALIZE: i32 = 900;
}

/// Decides a gain for one track and, when output is requested, applies it.
pub trait AudioProcessor: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        priority::NORMALIZE
    }

    /// Read from `<id>_enabled` during `configure`.
    fn enabled(&self) -> bool {
        true
    }

    fn config_params(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    fn configure(&mut self, _config: &Config) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Compute the decision without touching audio.
    fn process(&self, track: &Track) -> anyhow::Result<ProcessorResult>;

    /// Apply a decision made by `process` to `audio`.
    fn apply(&self, track: &Track, audio: AudioBuffer, result: &ProcessorResult) -> anyhow::Result<AudioBuffer>;
}

pub fn enabled_key(processor_id: &str) -> String {
    format!("{}_enabled", processor_id)
}

pub fn enabled_param(processor_id: &str) -> ParamSpec {
    ParamSpec::boolean(enabled_key(processor_id), true, "Enabled")
}

pub fn default_processors() -> Vec<Box<dyn AudioProcessor>> {
    vec![Box::new(bimodal::BimodalNormalizeProcessor::default())]
}
