//! Stateless numeric primitives over in-memory sample buffers.

pub mod channels;
pub mod clip;
pub mod envelope;
pub mod level;
pub mod spectral;
pub mod stereo;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DspError {
    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
}

pub type DspResult<T> = std::result::Result<T, DspError>;
