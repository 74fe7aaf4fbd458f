use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigFieldError};

/// A single configuration value. Deserializes from plain JSON scalars and string lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<String>),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ParamValue::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => write!(f, "null"),
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Str(v) => write!(f, "{}", v),
            ParamValue::List(v) => write!(f, "[{}]", v.join(", ")),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(v: Vec<String>) -> Self {
        ParamValue::List(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    Int,
    Float,
    Str,
    StrList,
}

/// Declares one tunable parameter: its type, default and accepted range.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub key: String,
    pub kind: ParamKind,
    pub default: ParamValue,
    pub label: &'static str,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_exclusive: bool,
    pub max_exclusive: bool,
    pub choices: &'static [&'static str],
    pub nullable: bool,
}

impl ParamSpec {
    fn new(key: impl Into<String>, kind: ParamKind, default: ParamValue, label: &'static str) -> Self {
        Self {
            key: key.into(),
            kind,
            default,
            label,
            min: None,
            max: None,
            min_exclusive: false,
            max_exclusive: false,
            choices: &[],
            nullable: false,
        }
    }

    pub fn float(key: impl Into<String>, default: f64, label: &'static str) -> Self {
        Self::new(key, ParamKind::Float, ParamValue::Float(default), label)
    }

    pub fn int(key: impl Into<String>, default: i64, label: &'static str) -> Self {
        Self::new(key, ParamKind::Int, ParamValue::Int(default), label)
    }

    pub fn boolean(key: impl Into<String>, default: bool, label: &'static str) -> Self {
        Self::new(key, ParamKind::Bool, ParamValue::Bool(default), label)
    }

    pub fn choice(
        key: impl Into<String>,
        default: &str,
        choices: &'static [&'static str],
        label: &'static str,
    ) -> Self {
        let mut spec = Self::new(key, ParamKind::Str, ParamValue::from(default), label);
        spec.choices = choices;
        spec
    }

    pub fn string(key: impl Into<String>, default: Option<&str>, label: &'static str) -> Self {
        let value = default.map(ParamValue::from).unwrap_or(ParamValue::Null);
        let mut spec = Self::new(key, ParamKind::Str, value, label);
        spec.nullable = default.is_none();
        spec
    }

    pub fn list(key: impl Into<String>, label: &'static str) -> Self {
        Self::new(key, ParamKind::StrList, ParamValue::List(Vec::new()), label)
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn range(self, min: f64, max: f64) -> Self {
        self.min(min).max(max)
    }

    pub fn min_exclusive(mut self, min: f64) -> Self {
        self.min = Some(min);
        self.min_exclusive = true;
        self
    }

    pub fn max_exclusive(mut self, max: f64) -> Self {
        self.max = Some(max);
        self.max_exclusive = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn null_default(mut self) -> Self {
        self.nullable = true;
        self.default = ParamValue::Null;
        self
    }

    /// Check one value against this spec, returning a human-readable reason on failure.
    pub fn validate(&self, value: &ParamValue) -> Result<(), String> {
        if value.is_null() {
            return if self.nullable {
                Ok(())
            } else {
                Err("must not be null".to_string())
            };
        }

        match self.kind {
            ParamKind::Bool => {
                if value.as_bool().is_none() {
                    return Err(format!("expected a boolean, got {}", value));
                }
            }
            ParamKind::Int | ParamKind::Float => {
                let number = if self.kind == ParamKind::Int {
                    value.as_i64().map(|v| v as f64)
                } else {
                    value.as_f64()
                };
                let Some(number) = number else {
                    let expected = if self.kind == ParamKind::Int { "an integer" } else { "a number" };
                    return Err(format!("expected {}, got {}", expected, value));
                };
                if !number.is_finite() {
                    return Err("must be finite".to_string());
                }
                self.check_bounds(number)?;
            }
            ParamKind::Str => {
                let Some(text) = value.as_str() else {
                    return Err(format!("expected a string, got {}", value));
                };
                if !self.choices.is_empty() && !self.choices.contains(&text) {
                    return Err(format!("must be one of {}", self.choices.join(", ")));
                }
            }
            ParamKind::StrList => {
                if value.as_list().is_none() {
                    return Err(format!("expected a list of strings, got {}", value));
                }
            }
        }
        Ok(())
    }

    fn check_bounds(&self, number: f64) -> Result<(), String> {
        if let Some(min) = self.min {
            if self.min_exclusive && number <= min {
                return Err(format!("must be > {}", min));
            }
            if !self.min_exclusive && number < min {
                return Err(format!("must be >= {}", min));
            }
        }
        if let Some(max) = self.max {
            if self.max_exclusive && number >= max {
                return Err(format!("must be < {}", max));
            }
            if !self.max_exclusive && number > max {
                return Err(format!("must be <= {}", max));
            }
        }
        Ok(())
    }
}

/// Validate every key present in `config` that one of `specs` declares.
/// Keys without a spec are left alone so components can share one map.
pub fn validate_params(config: &Config, specs: &[ParamSpec]) -> Vec<ConfigFieldError> {
    specs
        .iter()
        .filter_map(|spec| {
            let value = config.get(&spec.key)?;
            spec.validate(value).err().map(|message| ConfigFieldError {
                key: spec.key.clone(),
                message,
            })
        })
        .collect()
}

/// Flat session-wide configuration map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    values: BTreeMap<String, ParamValue>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// A map populated with the default of every given spec.
    pub fn with_defaults(specs: &[ParamSpec]) -> Self {
        let mut config = Self::new();
        for spec in specs {
            config.values.insert(spec.key.clone(), spec.default.clone());
        }
        config
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Apply a `key=value` override. The value is parsed as JSON when possible
    /// (`3`, `-18.5`, `true`, `["kick"]`, `null`) and taken as a plain string otherwise.
    pub fn set_from_str(&mut self, assignment: &str) -> Result<(), ConfigError> {
        let (key, raw) = assignment
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedOverride(assignment.to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::MalformedOverride(assignment.to_string()));
        }
        let raw = raw.trim();
        let value = serde_json::from_str::<ParamValue>(raw)
            .unwrap_or_else(|_| ParamValue::Str(raw.to_string()));
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }

    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(ParamValue::as_f64).unwrap_or(default)
    }

    pub fn i64_or(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(ParamValue::as_i64).unwrap_or(default)
    }

    pub fn usize_or(&self, key: &str, default: usize) -> usize {
        self.get(key)
            .and_then(ParamValue::as_i64)
            .map(|v| v.max(0) as usize)
            .unwrap_or(default)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(ParamValue::as_bool).unwrap_or(default)
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).and_then(ParamValue::as_str).unwrap_or(default)
    }

    /// A nullable string: missing and `null` both read as `None`.
    pub fn opt_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ParamValue::as_str)
    }

    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .and_then(ParamValue::as_list)
            .map(|v| v.to_vec())
            .unwrap_or_default()
    }

    /// A nullable list: `None` when missing or `null`.
    pub fn opt_list(&self, key: &str) -> Option<Vec<String>> {
        self.get(key).and_then(ParamValue::as_list).map(|v| v.to_vec())
    }

    /// Fail with every invalid field when any of `specs` rejects its value.
    pub fn check(&self, specs: &[ParamSpec]) -> Result<(), ConfigError> {
        let errors = validate_params(self, specs);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::InvalidParams(errors))
        }
    }
}

/// How per-channel squares are reduced before windowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    Avg,
    Sum,
    Max,
}

impl ChannelMode {
    fn parse(value: &str) -> Self {
        match value {
            "sum" => ChannelMode::Sum,
            "max" => ChannelMode::Max,
            _ => ChannelMode::Avg,
        }
    }
}

/// Which statistic of the gated window distribution becomes the loudness anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorStrategy {
    Percentile,
    Max,
}

impl AnchorStrategy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "percentile" => Some(AnchorStrategy::Percentile),
            "max" => Some(AnchorStrategy::Max),
            _ => None,
        }
    }
}

/// Settings shared by everything that measures windowed RMS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisSettings {
    pub window_ms: u32,
    pub hop_ms: u32,
    pub channel_mode: ChannelMode,
    pub anchor: AnchorStrategy,
    pub percentile: f64,
    pub gate_relative_db: f64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            window_ms: 400,
            hop_ms: 10,
            channel_mode: ChannelMode::Avg,
            anchor: AnchorStrategy::Percentile,
            percentile: 95.0,
            gate_relative_db: 40.0,
        }
    }
}

impl AnalysisSettings {
    pub fn params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::int("window", 400, "RMS window (ms)").min(1.0),
            ParamSpec::int("rms_hop_ms", 10, "RMS window step (ms)").min(1.0),
            ParamSpec::choice("stereo_mode", "avg", &["avg", "sum", "max"], "Channel reduction"),
            ParamSpec::choice("rms_anchor", "percentile", &["percentile", "max"], "RMS anchor"),
            ParamSpec::float("rms_percentile", 95.0, "Anchor percentile")
                .min_exclusive(0.0)
                .max_exclusive(100.0),
            ParamSpec::float("gate_relative_db", 40.0, "Relative gate (dB)").min(0.0),
        ]
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.check(&Self::params())?;
        let d = Self::default();
        Ok(Self {
            window_ms: config.usize_or("window", d.window_ms as usize) as u32,
            hop_ms: config.usize_or("rms_hop_ms", d.hop_ms as usize) as u32,
            channel_mode: ChannelMode::parse(config.str_or("stereo_mode", "avg")),
            anchor: AnchorStrategy::parse(config.str_or("rms_anchor", "percentile"))
                .unwrap_or(d.anchor),
            percentile: config.f64_or("rms_percentile", d.percentile),
            gate_relative_db: config.f64_or("gate_relative_db", d.gate_relative_db),
        })
    }
}

/// Session-level parameters read by the loader and the planning post-steps.
pub fn session_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::list("group", "Group keyword specs"),
        ParamSpec::choice("group_overlap", "warn", &["warn", "error", "merge"], "Group overlap policy"),
        ParamSpec::list("gain_linked_groups", "Gain-linked groups").null_default(),
        ParamSpec::string("anchor", None, "Fader anchor track"),
        ParamSpec::boolean("normalize_faders", false, "Normalize faders to loudest"),
        ParamSpec::float("fader_ceiling_db", 12.0, "Fader ceiling (dB)").min_exclusive(0.0),
        ParamSpec::float("fader_headroom_db", 8.0, "Fader headroom (dB)").min(0.0),
    ]
}

/// Convert milliseconds to a sample count, never less than one.
pub fn ms_to_samples(ms: f64, sample_rate: u32) -> usize {
    ((ms * sample_rate as f64 / 1000.0) as usize).max(1)
}
