//! Session-prep analysis and gain staging for multitrack audio.
//!
//! Load a directory of stems with [`audio::load_session`], run the
//! [`pipeline::Pipeline`] phases over it, and render the outcome with [`format`].

pub mod audio;
pub mod cache;
pub mod config;
pub mod detectors;
pub mod dsp;
pub mod error;
pub mod events;
pub mod format;
pub mod groups;
pub mod models;
pub mod pipeline;
pub mod pool;
pub mod processors;
