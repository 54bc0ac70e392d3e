//! Ensemble simulator: run loop, synthetic engines and output for `ensemble_core`.
//!
//! The run loop drives an [`ensemble_core::Orchestrator`] exactly like a host
//! model runner drives a single engine: initialize, read the end time once,
//! update until the composite clock reaches it, write periodic output, then
//! finalize.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── RunLoop ────────────────────────────┐
//! │  ProgressIndicator          ReportCadence ──► OutputSink        │
//! │         │                                  (JsonExporter/Memory)│
//! │         ▼                                                       │
//! │  Orchestrator ── EngineHandle ── worker ── RelaxationEngine     │
//! │       ▲                                                         │
//! │  WorkdirProvisioner (one `.instance` directory each)            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use ensemble_sim::{RelaxationFactory, RunLoop, SimConfig};
//!
//! let config = SimConfig::load(Path::new("configs/demo.json"))?;
//! let factory = Arc::new(RelaxationFactory::new(config.engines.clone(), 42));
//! let mut orchestrator = Orchestrator::launch(config.orchestrator.clone(), &InMemoryProvisioner, factory).await?;
//! let summary = RunLoop::new()
//!     .with_output(config.output.clone())
//!     .run(&mut orchestrator, &mut MemorySink::default())
//!     .await?;
//! ```

pub mod config;
pub mod engine;
pub mod exporter;
pub mod progress;
pub mod provision;
pub mod runner;

pub use config::{EngineParams, OutputConfig, SimConfig, SimError};
pub use engine::{RelaxationEngine, RelaxationFactory, BED_LEVEL};
pub use exporter::{JsonExporter, RunExport};
pub use progress::ProgressIndicator;
pub use provision::WorkdirProvisioner;
pub use runner::{RunLoop, RunSummary};
