//! Structured output seam and reporting cadence.

use crate::error::SinkError;
use ensemble_env::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One periodic sample of the composite simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Simulated time of the sample
    pub time: f64,

    /// Running set at sampling time
    pub active: Vec<String>,

    /// Reduced value per sampled variable
    pub variables: BTreeMap<String, Value>,
}

/// Receives output records; owns the file format.
pub trait OutputSink: Send {
    fn append(&mut self, record: OutputRecord) -> Result<(), SinkError>;

    /// Flushes whatever the sink buffered.
    fn finish(&mut self) -> Result<(), SinkError>;
}

/// Keeps records in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub records: Vec<OutputRecord>,
}

impl OutputSink for MemorySink {
    fn append(&mut self, record: OutputRecord) -> Result<(), SinkError> {
        self.records.push(record);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Decides when a periodic report is due in simulated time.
///
/// A report is due when a multiple of `interval` was crossed since the
/// previous check: `t mod interval < t - last`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportCadence {
    interval: f64,
    last: f64,
}

impl ReportCadence {
    pub fn new(interval: f64) -> Self {
        Self::starting_at(interval, 0.0)
    }

    pub fn starting_at(interval: f64, start: f64) -> Self {
        Self {
            interval,
            last: start,
        }
    }

    /// Checks `t` against the previous check and remembers it.
    pub fn due(&mut self, t: f64) -> bool {
        let due = self.interval > 0.0 && t.rem_euclid(self.interval) < t - self.last;
        self.last = t;
        due
    }
}
