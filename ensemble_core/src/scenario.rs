//! Scripted running-set changes.

use crate::config::ScenarioStep;
use crate::error::OrchestratorError;
use crate::instance::EngineId;

/// One scripted change: from `activation_time` on, run `targets`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioEntry {
    pub activation_time: f64,
    pub targets: Vec<EngineId>,
}

/// Time-ordered list of running-set changes, strictly increasing in time.
///
/// Consumed left to right by the controller's cursor; each entry fires at most once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scenario {
    entries: Vec<ScenarioEntry>,
}

impl Scenario {
    pub fn new(entries: Vec<ScenarioEntry>) -> Result<Self, OrchestratorError> {
        for pair in entries.windows(2) {
            if pair[1].activation_time <= pair[0].activation_time {
                return Err(OrchestratorError::config(format!(
                    "scenario times must be strictly increasing ({} after {})",
                    pair[1].activation_time, pair[0].activation_time
                )));
            }
        }
        if let Some(entry) = entries.iter().find(|e| e.targets.is_empty()) {
            return Err(OrchestratorError::config(format!(
                "scenario entry at {} has no targets",
                entry.activation_time
            )));
        }
        Ok(Self { entries })
    }

    pub fn from_steps(steps: &[ScenarioStep]) -> Result<Self, OrchestratorError> {
        Self::new(
            steps
                .iter()
                .map(|step| ScenarioEntry {
                    activation_time: step.time(),
                    targets: step.targets(),
                })
                .collect(),
        )
    }

    pub fn entries(&self) -> &[ScenarioEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `cursor` if its activation time has been reached.
    pub fn due(&self, cursor: usize, now: f64) -> Option<&ScenarioEntry> {
        self.entries.get(cursor).filter(|e| e.activation_time <= now)
    }

    /// Splits off the entries already active at `start`.
    ///
    /// Returns the targets of the last such entry (the set to start with) and
    /// the remaining scenario.
    pub fn split_initial(self, start: f64) -> (Option<Vec<EngineId>>, Scenario) {
        let split = self
            .entries
            .iter()
            .take_while(|e| e.activation_time <= start)
            .count();
        let mut entries = self.entries;
        let rest = entries.split_off(split);
        let initial = entries.pop().map(|e| e.targets);
        (initial, Scenario { entries: rest })
    }
}
