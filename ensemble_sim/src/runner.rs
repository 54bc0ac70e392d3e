//! Run loop: drives a composite engine from initialize to finalize.

use crate::config::{OutputConfig, SimError};
use crate::progress::ProgressIndicator;
use ensemble_core::{ControlSurface, Orchestrator, OutputSink, ReportCadence};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Results from one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub name: String,

    /// Time the composite started and ended at
    pub start_time: f64,
    pub final_time: f64,
    pub end_time: f64,

    /// Composite updates executed
    pub ticks: u64,

    /// Scenario transitions fired
    pub transitions: usize,

    /// Output records written
    pub records: usize,

    /// Running set at the end of the run
    pub active: Vec<String>,

    /// Whether the composite reached its end time
    pub finished: bool,
}

/// Drives an orchestrator the way a host model runner would.
#[derive(Debug, Clone)]
pub struct RunLoop {
    /// Safety bound on composite updates
    max_ticks: Option<u64>,

    output: Option<OutputConfig>,

    /// Progress report every this fraction of the run
    progress_fraction: f64,

    /// Wall-clock bound between progress reports
    progress_interval: Duration,
}

impl Default for RunLoop {
    fn default() -> Self {
        Self {
            max_ticks: None,
            output: None,
            progress_fraction: 0.1,
            progress_interval: Duration::from_secs(60),
        }
    }
}

impl RunLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_ticks(mut self, max_ticks: Option<u64>) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    pub fn with_output(mut self, output: Option<OutputConfig>) -> Self {
        self.output = output;
        self
    }

    pub fn with_progress(mut self, fraction: f64, interval: Duration) -> Self {
        self.progress_fraction = fraction;
        self.progress_interval = interval;
        self
    }

    /// Runs the orchestrator to its end time, writing records into `sink`.
    ///
    /// The sink is flushed and the orchestrator finalized on every path. The
    /// first error wins: a failed run is not masked by a failed cleanup.
    pub async fn run<E: ControlSurface>(
        &self,
        orchestrator: &mut Orchestrator<E>,
        sink: &mut dyn OutputSink,
    ) -> Result<RunSummary, SimError> {
        let result = self.drive(orchestrator, sink).await;
        if let Err(e) = &result {
            error!("Run failed: {}", e);
        }

        let flushed = sink.finish();
        if let Err(e) = &flushed {
            error!("Output flush failed: {}", e);
        }

        let finalized = orchestrator.finalize().await;
        if let Err(e) = &finalized {
            error!("Finalize failed: {}", e);
        }

        let summary = result?;
        flushed?;
        finalized?;
        Ok(summary)
    }

    async fn drive<E: ControlSurface>(
        &self,
        orchestrator: &mut Orchestrator<E>,
        sink: &mut dyn OutputSink,
    ) -> Result<RunSummary, SimError> {
        orchestrator.initialize().await?;

        let start_time = orchestrator.current_time().await?;
        let end_time = orchestrator.end_time().await?;
        info!(name = %orchestrator.id(), start_time, end_time, "Run started");

        let mut progress = ProgressIndicator::new(
            start_time,
            end_time,
            self.progress_fraction,
            self.progress_interval,
        );
        let mut cadence = self
            .output
            .as_ref()
            .map(|output| ReportCadence::starting_at(output.interval, start_time));

        let mut records = 0;
        let mut ticks = 0;
        let mut now = start_time;

        if let Some(output) = &self.output {
            records += self.write_record(orchestrator, sink, &output.variables).await?;
        }

        while now < end_time {
            if self.max_ticks.is_some_and(|max| ticks >= max) {
                warn!(ticks, time = now, "Tick limit reached before end time");
                break;
            }

            orchestrator.update(None).await?;
            ticks += 1;

            let next = orchestrator.current_time().await?;
            if next <= now {
                debug!(time = next, "Composite clock did not advance");
            }
            now = next;
            progress.progress(now);

            if let (Some(cadence), Some(output)) = (cadence.as_mut(), &self.output) {
                if cadence.due(now) {
                    records += self.write_record(orchestrator, sink, &output.variables).await?;
                }
            }
        }

        let summary = RunSummary {
            name: orchestrator.id().to_string(),
            start_time,
            final_time: now,
            end_time,
            ticks,
            transitions: orchestrator.cursor(),
            records,
            active: orchestrator.running().names().iter().map(|n| n.to_string()).collect(),
            finished: now >= end_time,
        };
        info!(
            ticks = summary.ticks,
            transitions = summary.transitions,
            records = summary.records,
            final_time = summary.final_time,
            "Run complete"
        );
        Ok(summary)
    }

    async fn write_record<E: ControlSurface>(
        &self,
        orchestrator: &Orchestrator<E>,
        sink: &mut dyn OutputSink,
        variables: &[String],
    ) -> Result<usize, SimError> {
        let record = orchestrator.snapshot(variables).await?;
        debug!(time = record.time, variables = record.variables.len(), "Output record");
        sink.append(record)?;
        Ok(1)
    }
}
