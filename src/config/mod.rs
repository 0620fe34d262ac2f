//! Configuration module for EventFlow-RS
//!
//! A pipeline is described by one TOML document:
//!
//! ```toml
//! [runner]
//! threads = 2
//! calibration_run = true
//! events_to_process = 1000
//!
//! [[stages]]
//! kind = "SampleAnalysis"
//! name = "sAna"
//! cuts_enabled = true
//!
//! [[stages.observable]]
//! name = "sum"
//! type = "double"
//!
//! [[stages.cut]]
//! name = "sum"
//! value = [0.0, 1e6]
//!
//! [stages.parameters]
//! baseline_samples = 20
//! ```
//!
//! # Example
//!
//! ```ignore
//! use eventflow_rs::config::PipelineConfig;
//!
//! let config = PipelineConfig::load("pipeline.toml")?;
//! for stage in &config.stages {
//!     println!("{} ({})", stage.display_name(), stage.kind);
//! }
//! ```

pub mod stage;

pub use stage::{CutRange, CutSpec, ObservableSpec, StageConfig};

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of worker threads
pub const DEFAULT_THREADS: usize = 1;

/// Default interval between progress reports in milliseconds
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 1000;

/// Upper bound on worker threads
pub const MAX_THREADS: usize = 64;

// ==================== Verbosity ====================

/// Per-stage diagnostic level.
///
/// Maps onto `tracing` levels when stages log through their context. A
/// worker runs at the highest level of its stages; secondary workers are
/// capped at [`Verbosity::Essential`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Silent,
    #[default]
    Essential,
    Info,
    Debug,
    Extreme,
}

impl Verbosity {
    pub fn at_least(self, level: Verbosity) -> bool {
        self >= level
    }

    pub fn name(&self) -> &'static str {
        match self {
            Verbosity::Silent => "silent",
            Verbosity::Essential => "essential",
            Verbosity::Info => "info",
            Verbosity::Debug => "debug",
            Verbosity::Extreme => "extreme",
        }
    }
}

impl std::fmt::Display for Verbosity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ==================== Runner Config ====================

/// `[runner]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Run one dry event through the chain before processing.
    #[serde(default = "default_true")]
    pub calibration_run: bool,

    /// Stop after this many input events; 0 means all.
    #[serde(default)]
    pub events_to_process: u64,

    /// Skip this many input events first.
    #[serde(default)]
    pub first_entry: u64,

    #[serde(default)]
    pub verbosity: Verbosity,

    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,
}

fn default_threads() -> usize {
    DEFAULT_THREADS
}

fn default_true() -> bool {
    true
}

fn default_progress_interval() -> u64 {
    DEFAULT_PROGRESS_INTERVAL_MS
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            calibration_run: true,
            events_to_process: 0,
            first_entry: 0,
            verbosity: Verbosity::default(),
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }
}

impl RunnerConfig {
    /// Thread count clamped to `1..=MAX_THREADS`.
    pub fn effective_threads(&self) -> usize {
        self.threads.clamp(1, MAX_THREADS)
    }
}

// ==================== Pipeline Config ====================

/// A whole pipeline: runner settings plus the ordered stage list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

impl PipelineConfig {
    pub fn new(stages: Vec<StageConfig>) -> Self {
        Self {
            runner: RunnerConfig::default(),
            stages,
        }
    }

    /// Parse a pipeline from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| EngineError::Config(format!("Failed to parse pipeline: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| EngineError::Serialization(format!("Failed to serialize pipeline: {}", e)))
    }

    /// Load a pipeline file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read pipeline file {:?}: {}", path, e))
        })?;
        tracing::debug!("Loaded pipeline from {:?}", path);
        Self::from_toml_str(&content)
    }

    /// Save a pipeline file, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    EngineError::Config(format!("Failed to create directory {:?}: {}", parent, e))
                })?;
            }
        }
        let content = self.to_toml_string()?;
        std::fs::write(path, content).map_err(|e| {
            EngineError::Config(format!("Failed to write pipeline file {:?}: {}", path, e))
        })?;
        Ok(())
    }

    /// Structural checks that do not need the stage factory.
    fn check(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for stage in &self.stages {
            if stage.kind.trim().is_empty() {
                return Err(EngineError::Config("Stage without a kind".to_string()));
            }
            if !seen.insert(stage.display_name()) {
                return Err(EngineError::Config(format!(
                    "Duplicate stage name '{}'",
                    stage.display_name()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINE: &str = r#"
[runner]
threads = 3
calibration_run = false
events_to_process = 50
verbosity = "info"

[[stages]]
kind = "SampleAnalysis"
name = "sAna"
cuts_enabled = true
verbosity = "debug"

[[stages.observable]]
name = "sum"

[[stages.observable]]
name = "n_samples"
type = "int"
value = "OFF"

[[stages.cut]]
name = "sum"
value = [0.0, 100.0]

[stages.parameters]
baseline_samples = 12

[[stages]]
kind = "PulseFinder"
observables = "all"
"#;

    #[test]
    fn test_parse_pipeline() {
        let config = PipelineConfig::from_toml_str(PIPELINE).unwrap();
        assert_eq!(config.runner.threads, 3);
        assert!(!config.runner.calibration_run);
        assert_eq!(config.runner.events_to_process, 50);
        assert_eq!(config.runner.verbosity, Verbosity::Info);
        assert_eq!(config.stages.len(), 2);

        let sana = &config.stages[0];
        assert_eq!(sana.verbosity, Verbosity::Debug);
        assert_eq!(sana.observables[0].type_name, "double");
        assert!(!sana.observables[1].is_enabled());
        assert_eq!(sana.parameter_i64("baseline_samples", 0), 12);
        assert_eq!(sana.collect_cuts().len(), 1);

        let finder = &config.stages[1];
        assert_eq!(finder.display_name(), "PulseFinder");
        assert!(finder.dynamic_observables());
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config.runner, RunnerConfig::default());
        assert!(config.runner.calibration_run);
        assert!(config.stages.is_empty());
    }

    #[test]
    fn test_duplicate_stage_names_rejected() {
        let text = "[[stages]]\nkind = \"PassThrough\"\n[[stages]]\nkind = \"PassThrough\"\n";
        assert!(matches!(
            PipelineConfig::from_toml_str(text),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pipeline.toml");

        let config = PipelineConfig::from_toml_str(PIPELINE).unwrap();
        config.save(&path).unwrap();
        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let result = PipelineConfig::load("/nonexistent/pipeline.toml");
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_verbosity_ordering() {
        assert!(Verbosity::Extreme > Verbosity::Debug);
        assert!(Verbosity::Info.at_least(Verbosity::Essential));
        assert!(!Verbosity::Silent.at_least(Verbosity::Essential));
        assert_eq!(Verbosity::Debug.to_string(), "debug");
    }

    #[test]
    fn test_effective_threads() {
        let mut runner = RunnerConfig::default();
        runner.threads = 0;
        assert_eq!(runner.effective_threads(), 1);
        runner.threads = 1000;
        assert_eq!(runner.effective_threads(), MAX_THREADS);
    }
}
