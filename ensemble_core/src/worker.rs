//! Engine-side serve loop: one per rank, one engine per loop.

use crate::engine::{EngineFactory, ModelEngine};
use crate::error::ModelError;
use crate::instance::Instance;
use crate::protocol::{EngineCall, Reply, ReplyFrame, Request};
use ensemble_env::{EnvError, Envelope, Rank, ReduceOp, Transport, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause before listening again on a severed link.
const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Builds the engine for `instance`, reports readiness, then answers requests.
///
/// The readiness census is a sum-reduce at the coordinator: each worker
/// contributes `1` if its engine was built and `0` otherwise. A worker whose
/// engine failed to build leaves right after the census.
///
/// A severed link is waited out: requests that cannot be received are retried
/// and replies that cannot be sent are dropped, leaving the caller to time out.
/// Returns when the coordinator sends `Shutdown` or its endpoint is gone.
pub async fn serve<T: Transport>(
    instance: Instance,
    factory: Arc<dyn EngineFactory>,
    transport: T,
) -> Result<(), EnvError> {
    let rank = transport.local_rank();
    let engine = match factory.create(&instance) {
        Ok(engine) => Some(engine),
        Err(e) => {
            error!(engine = %instance.id, %rank, "Cannot create engine: {}", e);
            None
        }
    };

    let ready = if engine.is_some() { 1.0 } else { 0.0 };
    transport
        .reduce(Value::Scalar(ready), ReduceOp::Sum, Rank::COORDINATOR)
        .await?;

    let Some(mut engine) = engine else {
        return Ok(());
    };
    debug!(engine = %instance.id, %rank, "Worker ready");

    let mut finalized = false;
    let mut cut_off = false;
    loop {
        let envelope = match transport.recv(Rank::COORDINATOR).await {
            Ok(envelope) => envelope,
            Err(e) if e.is_transient() => {
                if !cut_off {
                    warn!(engine = %instance.id, %rank, "Coordinator unreachable, waiting: {}", e);
                    cut_off = true;
                }
                tokio::time::sleep(RETRY_BACKOFF).await;
                continue;
            }
            Err(e) => return Err(e),
        };
        if cut_off {
            info!(engine = %instance.id, %rank, "Coordinator reachable again");
            cut_off = false;
        }

        let (seq, call) = match envelope.decode::<Request>() {
            Ok(Request::Call { seq, call }) => (seq, call),
            Ok(Request::Shutdown) => {
                info!(engine = %instance.id, %rank, "Worker shutting down");
                return Ok(());
            }
            Err(e) => {
                error!(engine = %instance.id, %rank, "Undecodable request: {}", e);
                continue;
            }
        };

        let reply = if finalized {
            Reply::Failed("engine already finalized".to_string())
        } else {
            finalized = matches!(call, EngineCall::Finalize);
            execute(engine.as_mut(), call)
        };

        let frame = ReplyFrame { seq, reply };
        let envelope = match Envelope::encode(seq, &frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(engine = %instance.id, %rank, seq, "Cannot encode reply: {}", e);
                continue;
            }
        };
        match transport.send(Rank::COORDINATOR, envelope).await {
            Ok(()) => {}
            Err(e) if e.is_transient() => {
                warn!(engine = %instance.id, %rank, seq, "Reply lost: {}", e);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Runs one call against the engine, turning errors and panics into `Failed`.
fn execute(engine: &mut dyn ModelEngine, call: EngineCall) -> Reply {
    let outcome = catch_unwind(AssertUnwindSafe(|| dispatch(engine, call)));
    match outcome {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => Reply::Failed(e.to_string()),
        Err(_) => Reply::Failed("engine panicked".to_string()),
    }
}

fn dispatch(engine: &mut dyn ModelEngine, call: EngineCall) -> Result<Reply, ModelError> {
    let reply = match call {
        EngineCall::Initialize => {
            engine.initialize()?;
            Reply::Done
        }
        EngineCall::Update { dt } => Reply::Time(engine.update(dt)?),
        EngineCall::CurrentTime => Reply::Time(engine.current_time()?),
        EngineCall::EndTime => Reply::Time(engine.end_time()?),
        EngineCall::GetVariable { name } => Reply::Value(engine.get_value(&name)?),
        EngineCall::SetVariable { name, value } => {
            engine.set_value(&name, value)?;
            Reply::Done
        }
        EngineCall::Finalize => {
            engine.finalize()?;
            Reply::Done
        }
    };
    Ok(reply)
}
