//! Wire messages between the coordinator and an engine worker.
//!
//! Every message travels JSON-encoded inside an [`ensemble_env::Envelope`].
//! Floats go through [`ensemble_env::wire_f64`] so NaN and the infinities
//! arrive intact. Requests and replies carry the same sequence number so a reply that
//! arrives after its caller gave up can be recognised and dropped.

use crate::error::CallName;
use ensemble_env::Value;
use serde::{Deserialize, Serialize};

/// One call on the engine control surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineCall {
    Initialize,
    /// Advance by `dt`, or one native step when `None`
    Update {
        #[serde(with = "ensemble_env::wire_f64::option")]
        dt: Option<f64>,
    },
    CurrentTime,
    EndTime,
    GetVariable { name: String },
    SetVariable { name: String, value: Value },
    Finalize,
}

impl EngineCall {
    pub fn name(&self) -> CallName {
        match self {
            EngineCall::Initialize => CallName::Initialize,
            EngineCall::Update { .. } => CallName::Update,
            EngineCall::CurrentTime => CallName::CurrentTime,
            EngineCall::EndTime => CallName::EndTime,
            EngineCall::GetVariable { .. } => CallName::GetVariable,
            EngineCall::SetVariable { .. } => CallName::SetVariable,
            EngineCall::Finalize => CallName::Finalize,
        }
    }

    /// Renders the call arguments for log lines.
    pub fn args(&self) -> String {
        match self {
            EngineCall::Update { dt: Some(dt) } => format!("dt={}", dt),
            EngineCall::Update { dt: None } => "dt=native".to_string(),
            EngineCall::GetVariable { name } => format!("name={}", name),
            EngineCall::SetVariable { name, value } => {
                format!("name={}, shape={}", name, value.shape())
            }
            _ => String::new(),
        }
    }
}

/// Coordinator-to-worker message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    Call { seq: u64, call: EngineCall },
    /// Leave the serve loop
    Shutdown,
}

/// Outcome of one call as seen by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Done,
    Time(#[serde(with = "ensemble_env::wire_f64")] f64),
    Value(Value),
    Failed(String),
}

/// Worker-to-coordinator message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub seq: u64,
    pub reply: Reply,
}
