//! Orchestrator configuration surface.
//!
//! The orchestrator consumes this structure; it never reads files itself.
//! Drivers deserialize it from whatever format they own.
//!
//! ```json
//! {
//!   "instances": ["coarse", "fine"],
//!   "scenario": [[0, "coarse"], [3600, ["coarse", "fine"]], [7200, "fine"]],
//!   "exchange": ["zb"],
//!   "aggregate": { "interval": 600, "method": "mean" },
//!   "transition_time": 300
//! }
//! ```

use crate::error::OrchestratorError;
use crate::instance::EngineId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default bound on catch-up calls per engine per synchronizer pass.
pub const DEFAULT_MAX_CATCH_UP_STEPS: usize = 10_000;

/// Configuration for an orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Name the composite reports as its own engine id
    pub name: String,

    /// Static instance list
    pub instances: Vec<String>,

    /// Scripted running-set changes
    pub scenario: Vec<ScenarioStep>,

    /// Variables carried across transitions
    pub exchange: Vec<String>,

    /// Periodic re-aggregation within the running set
    pub aggregate: Option<AggregateConfig>,

    /// Spin-up period for engines joining at a transition.
    ///
    /// A newcomer starts this far behind the handover time and has the
    /// exchanged values re-applied after every update until it catches up.
    pub transition_time: Option<f64>,

    /// Liveness bounds
    pub limits: Limits,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            name: "ensemble".to_string(),
            instances: Vec::new(),
            scenario: Vec::new(),
            exchange: Vec::new(),
            aggregate: None,
            transition_time: None,
            limits: Limits::default(),
        }
    }
}

/// One scenario step: `[time, "name"]` or `[time, ["a", "b"]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStep(pub f64, pub Targets);

impl ScenarioStep {
    pub fn new(time: f64, targets: &[&str]) -> Self {
        let targets = match targets {
            [single] => Targets::One(single.to_string()),
            many => Targets::Many(many.iter().map(|s| s.to_string()).collect()),
        };
        Self(time, targets)
    }

    pub fn time(&self) -> f64 {
        self.0
    }

    pub fn targets(&self) -> Vec<EngineId> {
        self.1.names().into_iter().map(EngineId::from).collect()
    }
}

/// Target instances of a scenario step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Targets {
    One(String),
    Many(Vec<String>),
}

impl Targets {
    pub fn names(&self) -> Vec<String> {
        match self {
            Targets::One(name) => vec![name.clone()],
            Targets::Many(names) => names.clone(),
        }
    }
}

/// Aggregation rule: how often and with which reducer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateConfig {
    /// Interval in simulated time between re-aggregations
    pub interval: f64,

    #[serde(default)]
    pub method: AggregateMethod,

    /// Method parameters (e.g. `q` for `quantile`)
    #[serde(default)]
    pub options: BTreeMap<String, f64>,
}

/// Reducer names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateMethod {
    #[default]
    Mean,
    Sum,
    Min,
    Max,
    Median,
    Quantile,
}

/// Bounds on how long the coordinator waits for engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Catch-up calls per engine per synchronizer pass (`None` = unbounded)
    pub max_catch_up_steps: Option<usize>,

    /// Per-call timeout in milliseconds (`None` = wait forever)
    pub call_timeout_ms: Option<u64>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_catch_up_steps: Some(DEFAULT_MAX_CATCH_UP_STEPS),
            call_timeout_ms: None,
        }
    }
}

impl Limits {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

impl OrchestratorConfig {
    /// Every instance named in the static list or the scenario, first-seen order.
    pub fn instance_names(&self) -> Vec<EngineId> {
        let mut names: Vec<EngineId> = Vec::new();
        let scenario_names = self.scenario.iter().flat_map(|step| step.targets());
        for id in self.instances.iter().map(|n| EngineId::new(n.as_str())).chain(scenario_names) {
            if !names.contains(&id) {
                names.push(id);
            }
        }
        names
    }

    /// Checks the configuration for errors that must abort before any engine starts.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.instance_names().is_empty() {
            return Err(OrchestratorError::config("no instances configured"));
        }

        let mut last: Option<f64> = None;
        for step in &self.scenario {
            if !step.time().is_finite() {
                return Err(OrchestratorError::config(format!(
                    "scenario time must be finite, got {}",
                    step.time()
                )));
            }
            if let Some(prev) = last {
                if step.time() <= prev {
                    return Err(OrchestratorError::config(format!(
                        "scenario times must be strictly increasing ({} after {})",
                        step.time(),
                        prev
                    )));
                }
            }
            if step.targets().is_empty() {
                return Err(OrchestratorError::config(format!(
                    "scenario step at {} has no target instances",
                    step.time()
                )));
            }
            last = Some(step.time());
        }

        if self.exchange.iter().any(|v| v.trim().is_empty()) {
            return Err(OrchestratorError::config("exchange variable names must not be empty"));
        }

        if let Some(aggregate) = &self.aggregate {
            if !(aggregate.interval > 0.0 && aggregate.interval.is_finite()) {
                return Err(OrchestratorError::config(format!(
                    "aggregation interval must be positive, got {}",
                    aggregate.interval
                )));
            }
        }

        if let Some(period) = self.transition_time {
            if !(period >= 0.0 && period.is_finite()) {
                return Err(OrchestratorError::config(format!(
                    "transition_time must be a non-negative number, got {}",
                    period
                )));
            }
        }

        if self.limits.max_catch_up_steps == Some(0) {
            return Err(OrchestratorError::config("max_catch_up_steps must be at least 1"));
        }

        Ok(())
    }
}
