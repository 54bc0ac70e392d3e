//! Error taxonomy for the orchestration engine.
//!
//! - **Fatal/Configuration** ([`OrchestratorError`]): crosses the orchestrator
//!   boundary and ends the run.
//! - **Per-call failure** ([`CallFailure`]): one engine's call failed; logged
//!   and absorbed, the rest of the tick continues.

use crate::instance::EngineId;
use ensemble_env::{EnvError, Shape};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a native engine behind its control surface.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Shape mismatch for {name}: expected {expected}, got {actual}")]
    ShapeMismatch {
        name: String,
        expected: Shape,
        actual: Shape,
    },

    #[error("Engine not initialized")]
    NotInitialized,

    #[error("Engine failure: {0}")]
    Failed(String),
}

impl ModelError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Names of the calls on the engine control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallName {
    Initialize,
    Update,
    CurrentTime,
    EndTime,
    GetVariable,
    SetVariable,
    Finalize,
}

impl CallName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallName::Initialize => "initialize",
            CallName::Update => "update",
            CallName::CurrentTime => "get_current_time",
            CallName::EndTime => "get_end_time",
            CallName::GetVariable => "get_var",
            CallName::SetVariable => "set_var",
            CallName::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for CallName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single engine's call failed.
///
/// Carries enough to identify the call in logs; the caller decides whether
/// to substitute a placeholder, skip the engine, or escalate.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Call \"{call}\" on engine \"{engine}\" failed: {reason}")]
pub struct CallFailure {
    pub engine: EngineId,
    pub call: CallName,
    pub reason: String,
}

/// Outcome of one forwarded engine call.
pub type CallResult<T> = Result<T, CallFailure>;

/// Errors from the provisioning collaborator.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Invalid provisioning input: {0}")]
    Invalid(String),

    #[error("I/O error provisioning \"{instance}\": {source}")]
    Io {
        instance: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the structured output sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that cross the orchestrator boundary.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Missing or invalid configuration input
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provisioning collaborator failed
    #[error("Provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    /// Fewer engine processes came up than instances were provisioned
    #[error("Engine count mismatch: expected {expected}, {ready} ready")]
    EngineCountMismatch { expected: usize, ready: usize },

    /// An engine failed to initialize
    #[error("Initialization of \"{engine}\" failed: {reason}")]
    Initialize { engine: EngineId, reason: String },

    /// A transition named an instance that was never provisioned
    #[error("Invalid instance [{0}]")]
    UnknownInstance(String),

    /// Every running engine failed the call
    #[error("No live engine answered {0}")]
    NoLiveMembers(CallName),

    /// Variable could not be read from any running engine
    #[error("Variable unavailable: {0}")]
    VariableUnavailable(String),

    #[error("Orchestrator already finalized")]
    Finalized,

    #[error("Transport error: {0}")]
    Transport(#[from] EnvError),

    #[error("Output sink error: {0}")]
    Sink(#[from] SinkError),
}

impl OrchestratorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true for errors that abort the whole run.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            OrchestratorError::UnknownInstance(_) | OrchestratorError::VariableUnavailable(_)
        )
    }
}
