//! Metric descriptors, value kinds and samples.

use std::sync::{Arc, OnceLock};

use prometheus::proto::MetricType;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Declared value kind of a source's samples.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ValueKind {
    /// Monotonic counter.
    Counter,
    /// Point-in-time gauge.
    Gauge,
    /// No declared type.
    Untyped,
}

impl ValueKind {
    /// Exposition type for this kind.
    pub fn metric_type(self) -> MetricType {
        match self {
            Self::Counter => MetricType::COUNTER,
            Self::Gauge => MetricType::GAUGE,
            Self::Untyped => MetricType::UNTYPED,
        }
    }
}

/// Immutable metric name and label schema for one value suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    name: String,
    help: String,
    label_keys: Vec<String>,
}

impl Descriptor {
    /// Create a descriptor.
    pub fn new(name: impl Into<String>, help: impl Into<String>, label_keys: Vec<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            label_keys,
        }
    }

    /// Fully qualified metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Help text.
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Ordered label names.
    pub fn label_keys(&self) -> &[String] {
        &self.label_keys
    }

    /// Check the metric and label names against the exposition format rules.
    pub fn validate(&self) -> Result<(), String> {
        static METRIC_NAME: OnceLock<Regex> = OnceLock::new();
        static LABEL_NAME: OnceLock<Regex> = OnceLock::new();

        let metric_re = METRIC_NAME.get_or_init(|| {
            Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("failed to compile metric name regex")
        });
        let label_re = LABEL_NAME.get_or_init(|| {
            Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("failed to compile label name regex")
        });

        if !metric_re.is_match(&self.name) {
            return Err(format!("invalid metric name '{}'", self.name));
        }
        for (i, key) in self.label_keys.iter().enumerate() {
            if !label_re.is_match(key) || key.starts_with("__") {
                return Err(format!("invalid label name '{key}'"));
            }
            if self.label_keys[..i].contains(key) {
                return Err(format!("duplicate label name '{key}'"));
            }
        }
        Ok(())
    }
}

/// One emitted sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Descriptor the sample belongs to.
    pub descriptor: Arc<Descriptor>,
    /// Declared value kind of the source.
    pub kind: ValueKind,
    /// Sample value.
    pub value: f64,
    /// Label values in descriptor order.
    pub label_values: Vec<String>,
}
