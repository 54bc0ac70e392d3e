//! JSON exporter for periodic output records.
//!
//! Records are buffered in memory and written as one pretty-printed
//! document when the run finishes.

use ensemble_core::{OutputRecord, OutputSink, SinkError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Complete run export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunExport {
    /// Unique id of this run
    pub run_id: Uuid,

    /// Orchestrator name
    pub name: String,

    /// Master seed for the synthetic engines
    pub seed: u64,

    /// Periodic samples in time order
    pub records: Vec<OutputRecord>,
}

impl RunExport {
    pub fn new(name: &str, seed: u64) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            name: name.to_string(),
            seed,
            records: Vec::new(),
        }
    }

    /// Simulated time of the last record.
    pub fn last_time(&self) -> Option<f64> {
        self.records.last().map(|r| r.time)
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), SinkError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

/// Output sink that writes a [`RunExport`] on finish.
#[derive(Debug)]
pub struct JsonExporter {
    path: PathBuf,
    export: RunExport,
}

impl JsonExporter {
    pub fn new(path: impl Into<PathBuf>, name: &str, seed: u64) -> Self {
        Self {
            path: path.into(),
            export: RunExport::new(name, seed),
        }
    }

    pub fn export(&self) -> &RunExport {
        &self.export
    }
}

impl OutputSink for JsonExporter {
    fn append(&mut self, record: OutputRecord) -> Result<(), SinkError> {
        self.export.records.push(record);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.export.write_to_file(&self.path)?;
        info!(
            records = self.export.records.len(),
            path = %self.path.display(),
            "Exported run"
        );
        Ok(())
    }
}
