//! Ensemble Core - runs several step-based simulation engines as one.
//!
//! The coordinator keeps a time-varying subset of engines running, keeps
//! their clocks aligned, and moves state between them at scripted transitions.
//! A single engine's failure is contained: it is logged and degrades the
//! aggregates, it does not stop the run.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────── Orchestrator ──────────────────────────────┐
//! │  ScenarioController (running set, cursor, aggregation schedule, store)  │
//! │        │                       │                                        │
//! │  TimeSynchronizer          Exchange (collect → Reducer → store → set)   │
//! │        └──────────┬────────────┘                                        │
//! │             EngineHandle (one per instance, rank r)                     │
//! └────────────────────┬─────────────────────────────────────────────────────┘
//!                      │  Transport (ensemble_env)
//!          ┌───────────┼───────────┐
//!       worker r=1  worker r=2  worker r=3      each hosts one ModelEngine
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use ensemble_core::{ControlSurface, InMemoryProvisioner, Orchestrator, OrchestratorConfig};
//!
//! let mut orchestrator = Orchestrator::launch(config, &InMemoryProvisioner, factory).await?;
//! orchestrator.initialize().await?;
//! let end = orchestrator.end_time().await?;
//! while orchestrator.current_time().await? < end {
//!     orchestrator.update(None).await?;
//! }
//! orchestrator.finalize().await?;
//! ```

pub mod cluster;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod handle;
pub mod instance;
pub mod orchestrator;
pub mod output;
pub mod protocol;
pub mod provision;
pub mod reducer;
pub mod scenario;
pub mod surface;
pub mod sync;
pub mod worker;

#[cfg(test)]
mod testing;

pub use cluster::{Cluster, Teardown};
pub use config::{AggregateConfig, AggregateMethod, Limits, OrchestratorConfig, ScenarioStep, Targets};
pub use controller::{AggregationSchedule, ScenarioController, TickOutcome};
pub use engine::{EngineFactory, ModelEngine};
pub use error::{CallFailure, CallName, CallResult, ModelError, OrchestratorError, ProvisionError, SinkError};
pub use exchange::{AggregatedStore, Exchange};
pub use handle::EngineHandle;
pub use instance::{EngineId, Instance, Members, RunningSet};
pub use orchestrator::Orchestrator;
pub use output::{MemorySink, OutputRecord, OutputSink, ReportCadence};
pub use provision::{InMemoryProvisioner, Provisioner};
pub use reducer::Reducer;
pub use scenario::{Scenario, ScenarioEntry};
pub use surface::ControlSurface;
pub use sync::TimeSynchronizer;

// Re-export the transport layer types engines and drivers need
pub use ensemble_env::{Shape, Value};
