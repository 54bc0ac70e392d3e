//! Coordinator-side proxy for one remote engine.

use crate::error::{CallFailure, CallName, CallResult};
use crate::instance::EngineId;
use crate::protocol::{EngineCall, Reply, ReplyFrame, Request};
use crate::surface::ControlSurface;
use async_trait::async_trait;
use ensemble_env::{EnvError, Envelope, Rank, Transport, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Binds one provisioned instance to the rank hosting its engine.
///
/// Owns no simulation state. Every call is a request/reply pair over the
/// transport; failures come back as [`CallFailure`] after being logged once.
pub struct EngineHandle<T: Transport> {
    id: EngineId,
    rank: Rank,
    transport: Arc<T>,

    /// Last sequence number issued
    seq: AtomicU64,

    /// Per-call timeout (`None` blocks until the engine answers)
    call_timeout: Option<Duration>,
}

impl<T: Transport> EngineHandle<T> {
    pub fn new(id: EngineId, rank: Rank, transport: Arc<T>) -> Self {
        Self {
            id,
            rank,
            transport,
            seq: AtomicU64::new(0),
            call_timeout: None,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Forwards one call and waits for its reply.
    async fn call(&self, call: EngineCall) -> CallResult<Reply> {
        let name = call.name();
        let args = call.args();
        debug!(engine = %self.id, rank = %self.rank, call = %name, args = %args, "Forwarding call");

        match self.round_trip(call).await {
            Ok(Reply::Failed(reason)) => Err(self.failure(name, &args, reason)),
            Ok(reply) => Ok(reply),
            Err(e) => Err(self.failure(name, &args, e.to_string())),
        }
    }

    async fn round_trip(&self, call: EngineCall) -> Result<Reply, EnvError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let request = Envelope::encode(seq, &Request::Call { seq, call })?;
        self.transport.send(self.rank, request).await?;

        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, self.await_reply(seq))
                .await
                .map_err(|_| EnvError::Timeout(limit.as_millis() as u64))?,
            None => self.await_reply(seq).await,
        }
    }

    /// Waits for the reply to `seq`, dropping replies to calls that timed out earlier.
    async fn await_reply(&self, seq: u64) -> Result<Reply, EnvError> {
        loop {
            let envelope = self.transport.recv(self.rank).await?;
            if envelope.seq < seq {
                debug!(engine = %self.id, stale = envelope.seq, expected = seq, "Discarding stale reply");
                continue;
            }
            let frame: ReplyFrame = envelope.decode()?;
            return Ok(frame.reply);
        }
    }

    fn failure(&self, call: CallName, args: &str, reason: String) -> CallFailure {
        error!(engine = %self.id, rank = %self.rank, call = %call, args = %args, "Engine call failed: {}", reason);
        CallFailure {
            engine: self.id.clone(),
            call,
            reason,
        }
    }

    fn unexpected(&self, call: CallName, reply: Reply) -> CallFailure {
        self.failure(call, "", format!("unexpected reply {:?}", reply))
    }

    async fn time(&self, call: EngineCall) -> CallResult<f64> {
        let name = call.name();
        match self.call(call).await? {
            Reply::Time(t) => Ok(t),
            other => Err(self.unexpected(name, other)),
        }
    }

    async fn done(&self, call: EngineCall) -> CallResult<()> {
        let name = call.name();
        match self.call(call).await? {
            Reply::Done => Ok(()),
            other => Err(self.unexpected(name, other)),
        }
    }
}

#[async_trait]
impl<T: Transport> ControlSurface for EngineHandle<T> {
    type Error = CallFailure;

    fn id(&self) -> &EngineId {
        &self.id
    }

    async fn initialize(&mut self) -> CallResult<()> {
        self.done(EngineCall::Initialize).await
    }

    async fn update(&mut self, dt: Option<f64>) -> CallResult<f64> {
        self.time(EngineCall::Update { dt }).await
    }

    async fn current_time(&self) -> CallResult<f64> {
        self.time(EngineCall::CurrentTime).await
    }

    async fn end_time(&self) -> CallResult<f64> {
        self.time(EngineCall::EndTime).await
    }

    async fn get_variable(&self, name: &str) -> CallResult<Value> {
        let call = EngineCall::GetVariable {
            name: name.to_string(),
        };
        match self.call(call).await? {
            Reply::Value(value) => Ok(value),
            other => Err(self.unexpected(CallName::GetVariable, other)),
        }
    }

    async fn set_variable(&mut self, name: &str, value: Value) -> CallResult<()> {
        self.done(EngineCall::SetVariable {
            name: name.to_string(),
            value,
        })
        .await
    }

    async fn finalize(&mut self) -> CallResult<()> {
        self.done(EngineCall::Finalize).await
    }
}
