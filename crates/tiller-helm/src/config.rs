//! Configuration loading and typed config structures for the helm.
//!
//! The canonical configuration lives in `tiller-config.yaml`. This module
//! defines strongly-typed structs that mirror the YAML structure, and
//! provides a loader that reads and validates the file.
//!
//! Behavior parameters stay as text here. Each behavior interprets its own
//! parameters through [`Behavior::apply_param`], which reports problems as
//! [`ConfigError::InvalidParam`] or [`ConfigError::UnknownParam`].
//!
//! [`Behavior::apply_param`]: crate::behavior::Behavior::apply_param

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;
use tiller_ivp::{Domain, DomainError, SolverSettings, text};

/// Errors that can occur when loading configuration or applying parameters.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A parameter value was rejected.
    #[error("invalid value {value:?} for parameter {param}: {reason}")]
    InvalidParam {
        /// Parameter name.
        param: String,
        /// Rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No handler recognizes the parameter.
    #[error("unknown parameter {param}")]
    UnknownParam {
        /// Parameter name.
        param: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

impl ConfigError {
    /// Shorthand for [`ConfigError::InvalidParam`].
    pub fn invalid(param: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParam {
            param: param.to_owned(),
            value: value.to_owned(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`ConfigError::UnknownParam`].
    pub fn unknown(param: &str) -> Self {
        Self::UnknownParam {
            param: param.to_owned(),
        }
    }
}

/// Top-level helm configuration.
///
/// Mirrors the structure of `tiller-config.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HelmConfig {
    /// Decision variables.
    #[serde(default = "default_domain")]
    pub domain: Vec<DomainVarConfig>,

    /// Solver tunables.
    #[serde(default)]
    pub solver: SolverConfig,

    /// Engine and registry settings.
    #[serde(default)]
    pub helm: EngineConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Behaviors created at startup, plus spawn templates.
    #[serde(default)]
    pub behaviors: Vec<BehaviorSpec>,
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            solver: SolverConfig::default(),
            helm: EngineConfig::default(),
            logging: LoggingConfig::default(),
            behaviors: Vec::new(),
        }
    }
}

impl HelmConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }

    /// Build the decision domain from the `domain` section.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError`] if a variable is duplicated or malformed.
    pub fn build_domain(&self) -> Result<Domain, DomainError> {
        self.domain.iter().try_fold(Domain::new(), |domain, var| {
            domain.with_variable(&var.name, var.low, var.high, var.points)
        })
    }

    /// Variables that may go undecided without halting the tick.
    pub fn optional_variables(&self) -> BTreeSet<String> {
        self.domain
            .iter()
            .filter(|var| var.optional)
            .map(|var| var.name.clone())
            .collect()
    }
}

/// One decision variable.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DomainVarConfig {
    /// Variable name, e.g. `speed`.
    pub name: String,
    /// Lowest value.
    pub low: f64,
    /// Highest value.
    pub high: f64,
    /// Number of grid points from `low` to `high` inclusive.
    pub points: u32,
    /// Whether the tick may finish without deciding this variable.
    #[serde(default)]
    pub optional: bool,
}

/// Solver tunables.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SolverConfig {
    /// Minimum improvement for a region to replace the incumbent.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    /// Maps spreading wider than this are normalized first. `null` disables.
    #[serde(default = "default_normalize_range")]
    pub normalize_range: Option<f64>,

    /// Search functions in descending weight order.
    #[serde(default = "default_true")]
    pub sort_by_priority: bool,
}

impl SolverConfig {
    /// Solver settings for these values.
    pub const fn settings(&self) -> SolverSettings {
        SolverSettings {
            epsilon: self.epsilon,
            normalize_range: self.normalize_range,
            sort_by_priority: self.sort_by_priority,
        }
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            epsilon: default_epsilon(),
            normalize_range: default_normalize_range(),
            sort_by_priority: true,
        }
    }
}

/// Engine and registry settings (`helm` section).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Post every accepted function, encoded, as `BHV_IPF`.
    #[serde(default)]
    pub report_functions: bool,

    /// Life events kept in the registry history.
    #[serde(default = "default_life_event_capacity")]
    pub life_event_capacity: usize,

    /// Spawns processed per tick before further requests are aborted.
    #[serde(default = "default_max_spawns_per_tick")]
    pub max_spawns_per_tick: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            report_functions: false,
            life_event_capacity: default_life_event_capacity(),
            max_spawns_per_tick: default_max_spawns_per_tick(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Pretty,
        }
    }
}

/// A behavior parameter value as written in YAML.
///
/// Lists repeat the parameter once per element, so
/// `condition: [A=1, B=2]` sets two conditions.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// `true` or `false`.
    Flag(bool),
    /// Any number.
    Number(f64),
    /// Free text.
    Text(String),
    /// Repeated parameter.
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Text forms of the value, one per repetition.
    pub fn texts(&self) -> Vec<String> {
        match self {
            Self::Flag(flag) => vec![flag.to_string()],
            Self::Number(n) => vec![text::compact(*n)],
            Self::Text(s) => vec![s.clone()],
            Self::List(items) => items.iter().flat_map(Self::texts).collect(),
        }
    }
}

/// A behavior to create at startup, or a template to spawn from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BehaviorSpec {
    /// Kind name registered in the behavior factory.
    pub kind: String,

    /// Parameters applied in order.
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,

    /// Spawn instances from this spec instead of creating it directly.
    #[serde(default)]
    pub template: bool,
}

impl BehaviorSpec {
    /// Spec for `kind` with no parameters.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: BTreeMap::new(),
            template: false,
        }
    }

    /// Builder: add a text parameter, repeating it if already present.
    #[must_use]
    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        let value = ParamValue::Text(value.to_owned());
        match self.params.remove(key) {
            None => {
                self.params.insert(key.to_owned(), value);
            }
            Some(ParamValue::List(mut items)) => {
                items.push(value);
                self.params.insert(key.to_owned(), ParamValue::List(items));
            }
            Some(previous) => {
                self.params
                    .insert(key.to_owned(), ParamValue::List(vec![previous, value]));
            }
        }
        self
    }

    /// Builder: mark as a spawn template.
    #[must_use]
    pub const fn as_template(mut self) -> Self {
        self.template = true;
        self
    }

    /// Flattened `(key, value)` pairs, with `name` first.
    pub fn param_pairs(&self) -> Vec<(String, String)> {
        let (named, rest): (Vec<_>, Vec<_>) = self.params.iter().partition(|(k, _)| *k == "name");
        named
            .into_iter()
            .chain(rest)
            .flat_map(|(key, value)| value.texts().into_iter().map(move |v| (key.clone(), v)))
            .collect()
    }

    /// The `name` parameter, if set.
    pub fn name(&self) -> Option<String> {
        self.params.get("name").and_then(|v| v.texts().into_iter().next())
    }

    /// The `updates` parameter, if set.
    pub fn updates_var(&self) -> Option<String> {
        self.params
            .get("updates")
            .and_then(|v| v.texts().into_iter().next())
    }

    /// The `max_spawns` parameter, if set and numeric.
    pub fn max_spawns(&self) -> Option<usize> {
        self.params
            .get("max_spawns")
            .and_then(|v| v.texts().into_iter().next())
            .and_then(|v| v.parse().ok())
    }
}

// ---------------------------------------------------------------------------
// Default value functions for serde
// ---------------------------------------------------------------------------

fn default_domain() -> Vec<DomainVarConfig> {
    vec![
        DomainVarConfig {
            name: "course".to_owned(),
            low: 0.0,
            high: 359.0,
            points: 360,
            optional: false,
        },
        DomainVarConfig {
            name: "speed".to_owned(),
            low: 0.0,
            high: 5.0,
            points: 26,
            optional: false,
        },
    ]
}

const fn default_epsilon() -> f64 {
    1e-5
}

const fn default_normalize_range() -> Option<f64> {
    Some(100.0)
}

const fn default_true() -> bool {
    true
}

const fn default_life_event_capacity() -> usize {
    1000
}

const fn default_max_spawns_per_tick() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_owned()
}
