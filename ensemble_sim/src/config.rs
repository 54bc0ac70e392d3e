//! Simulator configuration file and error type.

use ensemble_core::{OrchestratorConfig, OrchestratorError, ProvisionError, SinkError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors surfaced by the simulator driver.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("Output failed: {0}")]
    Sink(#[from] SinkError),
}

/// Parameters of one synthetic relaxation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineParams {
    /// Number of grid cells in `zb`
    pub cells: usize,

    /// Native time step
    pub step: f64,

    pub start: f64,
    pub end: f64,

    /// Initial bed level in every cell
    pub initial: f64,

    /// Level the bed relaxes toward
    pub target: f64,

    /// Relaxation rate per unit of simulated time
    pub rate: f64,

    /// Standard deviation of per-step Gaussian noise (0 disables noise)
    pub noise: f64,

    /// Variables whose reads always fail, for fault drills
    pub failing: Vec<String>,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            cells: 10,
            step: 1.0,
            start: 0.0,
            end: 3600.0,
            initial: 0.0,
            target: 1.0,
            rate: 1e-3,
            noise: 0.0,
            failing: Vec::new(),
        }
    }
}

/// Periodic output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// JSON file to write (the `--export` flag takes precedence)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Simulated time between records
    pub interval: f64,

    /// Variables sampled over the running set
    #[serde(default)]
    pub variables: Vec<String>,
}

/// Complete simulator input: the orchestrator section plus driver settings.
///
/// ```json
/// {
///   "instances": ["coarse", "fine"],
///   "scenario": [[0, "coarse"], [600, "fine"]],
///   "exchange": ["zb"],
///   "engines": { "fine": { "step": 0.5, "cells": 10 } },
///   "output": { "interval": 60, "variables": ["zb"] },
///   "workdir": "runs/demo"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(flatten)]
    pub orchestrator: OrchestratorConfig,

    /// Per-instance engine parameters; unnamed instances use defaults
    #[serde(default)]
    pub engines: BTreeMap<String, EngineParams>,

    #[serde(default)]
    pub output: Option<OutputConfig>,

    /// Root for per-instance working directories (none = in memory)
    #[serde(default)]
    pub workdir: Option<PathBuf>,
}

impl SimConfig {
    /// Reads and validates a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path).map_err(|source| SimError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, SimError> {
        let config: SimConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        self.orchestrator.validate()?;

        if let Some(output) = &self.output {
            if !(output.interval > 0.0 && output.interval.is_finite()) {
                return Err(SimError::Config(format!(
                    "output interval must be positive, got {}",
                    output.interval
                )));
            }
        }

        for (name, params) in &self.engines {
            if params.cells == 0 || !(params.step > 0.0) || params.end < params.start {
                return Err(SimError::Config(format!(
                    "engine \"{}\" needs cells > 0, step > 0 and end >= start",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Parameters for `instance`, falling back to defaults.
    pub fn params(&self, instance: &str) -> EngineParams {
        self.engines.get(instance).cloned().unwrap_or_default()
    }
}
