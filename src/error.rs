use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A single parameter that failed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFieldError {
    pub key: String,
    pub message: String,
}

impl fmt::Display for ConfigFieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

/// Fatal configuration problems. Raised before any track is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {}", join_fields(.0))]
    InvalidParams(Vec<ConfigFieldError>),

    #[error("duplicate component id '{0}'")]
    DuplicateId(String),

    #[error("detector '{detector}' depends on unknown detector '{dependency}'")]
    MissingDependency { detector: String, dependency: String },

    #[error("detector dependency cycle involving: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("track '{filename}' matches groups {}", .groups.join(", "))]
    GroupOverlap { filename: String, groups: Vec<String> },

    #[error("invalid override '{0}': expected key=value")]
    MalformedOverride(String),
}

fn join_fields(fields: &[ConfigFieldError]) -> String {
    fields
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Crate-level error for operations that abort a whole run.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no audio files found in {}", .0.display())]
    NoAudioFiles(PathBuf),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_params_lists_every_field() {
        let err = ConfigError::InvalidParams(vec![
            ConfigFieldError {
                key: "window".to_string(),
                message: "must be >= 1".to_string(),
            },
            ConfigFieldError {
                key: "stereo_mode".to_string(),
                message: "must be one of avg, sum, max".to_string(),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("window: must be >= 1"));
        assert!(text.contains("stereo_mode"));
    }

    #[test]
    fn test_cycle_message_names_members() {
        let err = ConfigError::DependencyCycle(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "detector dependency cycle involving: a, b");
    }
}
