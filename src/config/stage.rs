//! Per-stage configuration.
//!
//! A `[[stages]]` entry names the stage kind, its instance name, which
//! observables it should register, and the cut ranges it applies. Free-form
//! `[stages.parameters]` are handed to the stage constructor.

use crate::config::Verbosity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One `[[stages.observable]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservableSpec {
    /// Local name; the table sees `<stage>_<name>`.
    pub name: String,

    /// "ON" or "OFF" (case-insensitive).
    #[serde(default = "default_on")]
    pub value: String,

    #[serde(rename = "type", default = "default_observable_type")]
    pub type_name: String,

    #[serde(default)]
    pub description: String,
}

fn default_on() -> String {
    "ON".to_string()
}

fn default_observable_type() -> String {
    "double".to_string()
}

impl ObservableSpec {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: default_on(),
            type_name: type_name.into(),
            description: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.value.eq_ignore_ascii_case("on")
    }
}

/// One `[[stages.cut]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutSpec {
    /// Observable name. Any table observable may be named; a name the table
    /// does not know is looked up with the `<stage>_` prefix.
    pub name: String,
    /// Accepted `[min, max]`.
    pub value: [f64; 2],
}

/// A cut: observable name plus accepted range.
#[derive(Debug, Clone, PartialEq)]
pub struct CutRange {
    pub observable: String,
    pub min: f64,
    pub max: f64,
}

impl CutRange {
    /// Whether `value` lies outside `[min, max]`.
    #[inline]
    pub fn rejects(&self, value: f64) -> bool {
        value < self.min || value > self.max
    }
}

/// Configuration of one stage instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stage kind, resolved through the stage factory.
    pub kind: String,

    /// Instance name; defaults to the kind.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub verbosity: Verbosity,

    /// `"all"` turns on dynamic observables.
    #[serde(rename = "observables", default, skip_serializing_if = "Option::is_none")]
    pub observables_mode: Option<String>,

    #[serde(default)]
    pub cuts_enabled: bool,

    /// Validate observable completeness on every event, not only during
    /// the calibration run.
    #[serde(default)]
    pub validate_observables: bool,

    #[serde(rename = "observable", default)]
    pub observables: Vec<ObservableSpec>,

    #[serde(rename = "cut", default)]
    pub cuts: Vec<CutSpec>,

    #[serde(default)]
    pub parameters: BTreeMap<String, toml::Value>,
}

impl StageConfig {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            verbosity: Verbosity::default(),
            observables_mode: None,
            cuts_enabled: false,
            validate_observables: false,
            observables: Vec::new(),
            cuts: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    /// Add an enabled observable.
    pub fn with_observable(mut self, name: &str, type_name: &str, description: &str) -> Self {
        let mut spec = ObservableSpec::new(name, type_name);
        spec.description = description.to_string();
        self.observables.push(spec);
        self
    }

    /// Add a cut on local observable `name`; also enables cuts.
    pub fn with_cut(mut self, name: &str, min: f64, max: f64) -> Self {
        self.cuts.push(CutSpec {
            name: name.to_string(),
            value: [min, max],
        });
        self.cuts_enabled = true;
        self
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn with_dynamic_observables(mut self) -> Self {
        self.observables_mode = Some("all".to_string());
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Instance name, falling back to the kind.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.kind
        } else {
            &self.name
        }
    }

    pub fn dynamic_observables(&self) -> bool {
        self.observables_mode
            .as_deref()
            .is_some_and(|mode| mode.eq_ignore_ascii_case("all"))
    }

    pub fn enabled_observables(&self) -> impl Iterator<Item = &ObservableSpec> {
        self.observables.iter().filter(|spec| spec.is_enabled())
    }

    /// Resolve the configured cuts.
    ///
    /// Nothing is collected unless `cuts_enabled`. `[[stages.cut]]` names are
    /// kept as written; the stage prefix is added later, when the name is
    /// not a table observable. Parameters ending in `Cut` or `CutRange` are
    /// cuts too, named by the prefix up to and including `Cut`. Ranges with
    /// `min == max` are dropped.
    pub fn collect_cuts(&self) -> Vec<CutRange> {
        let mut cuts = Vec::new();
        if !self.cuts_enabled {
            return cuts;
        }

        for spec in &self.cuts {
            let [min, max] = spec.value;
            if min == max {
                tracing::debug!("{}: dropping empty cut on '{}'", self.display_name(), spec.name);
                continue;
            }
            cuts.push(CutRange {
                observable: spec.name.clone(),
                min,
                max,
            });
        }

        for (key, value) in &self.parameters {
            let Some(stem) = key
                .strip_suffix("CutRange")
                .or_else(|| key.strip_suffix("Cut"))
            else {
                continue;
            };
            match parse_range(value) {
                Some((min, max)) if min != max => cuts.push(CutRange {
                    observable: format!("{}Cut", stem),
                    min,
                    max,
                }),
                Some(_) => {}
                None => tracing::warn!(
                    "{}: parameter '{}' is not a [min, max] range",
                    self.display_name(),
                    key
                ),
            }
        }

        cuts
    }

    pub fn parameter(&self, key: &str) -> Option<&toml::Value> {
        self.parameters.get(key)
    }

    /// Float parameter; integers are widened.
    pub fn parameter_f64(&self, key: &str, default: f64) -> f64 {
        match self.parameters.get(key) {
            Some(toml::Value::Float(v)) => *v,
            Some(toml::Value::Integer(v)) => *v as f64,
            Some(toml::Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn parameter_i64(&self, key: &str, default: i64) -> i64 {
        match self.parameters.get(key) {
            Some(toml::Value::Integer(v)) => *v,
            Some(toml::Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn parameter_bool(&self, key: &str, default: bool) -> bool {
        match self.parameters.get(key) {
            Some(toml::Value::Boolean(v)) => *v,
            Some(toml::Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "on" => true,
                "false" | "off" => false,
                _ => default,
            },
            _ => default,
        }
    }

    pub fn parameter_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.parameters
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
    }
}

/// Accepts `[min, max]` arrays and `"(min, max)"` strings.
fn parse_range(value: &toml::Value) -> Option<(f64, f64)> {
    fn number(v: &toml::Value) -> Option<f64> {
        match v {
            toml::Value::Float(f) => Some(*f),
            toml::Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    match value {
        toml::Value::Array(items) if items.len() == 2 => Some((number(&items[0])?, number(&items[1])?)),
        toml::Value::String(s) => {
            let inner = s.trim().trim_start_matches('(').trim_end_matches(')');
            let (a, b) = inner.split_once(',')?;
            Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
        }
        _ => None,
    }
}
