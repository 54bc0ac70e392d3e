//! In-process engine cluster: one worker task per instance over a [`LocalWorld`].

use crate::engine::EngineFactory;
use crate::error::OrchestratorError;
use crate::handle::EngineHandle;
use crate::instance::{Instance, Members};
use crate::protocol::Request;
use crate::worker;
use async_trait::async_trait;
use ensemble_env::{EnvError, Envelope, LinkController, LocalTransport, LocalWorld, Rank, ReduceOp, Transport, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long a worker gets to leave its loop after `Shutdown`.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Releases whatever runs the engines once they are finalized.
#[async_trait]
pub trait Teardown: Send + Sync {
    async fn release(self: Box<Self>);
}

/// Worker tasks plus the coordinator's endpoint.
pub struct Cluster {
    transport: Arc<LocalTransport>,
    workers: Vec<JoinHandle<Result<(), EnvError>>>,
    links: LinkController,
}

impl Cluster {
    /// Spawns one worker per instance and checks that every engine came up.
    ///
    /// Instance `i` is hosted on rank `i + 1`. If the readiness census does not
    /// count every instance, all workers are aborted and the launch fails.
    pub async fn launch(
        instances: Vec<Instance>,
        factory: Arc<dyn EngineFactory>,
        call_timeout: Option<Duration>,
    ) -> Result<(Self, Members<EngineHandle<LocalTransport>>), OrchestratorError> {
        if instances.is_empty() {
            return Err(OrchestratorError::config("cannot launch a cluster without instances"));
        }

        let mut world = LocalWorld::new(instances.len() + 1);
        let links = world.links();
        let transport = Arc::new(
            world
                .take(Rank::COORDINATOR)
                .ok_or(EnvError::UnknownRank(Rank::COORDINATOR))?,
        );

        let mut workers = Vec::with_capacity(instances.len());
        let mut members = Members::new();
        for (i, instance) in instances.into_iter().enumerate() {
            let rank = Rank(i as u32 + 1);
            let endpoint = world.take(rank).ok_or(EnvError::UnknownRank(rank))?;
            let handle = EngineHandle::new(instance.id.clone(), rank, transport.clone())
                .with_call_timeout(call_timeout);
            debug!(engine = %instance.id, %rank, "Spawning worker");
            members.insert(instance.id.clone(), handle);
            workers.push(tokio::spawn(worker::serve(instance, factory.clone(), endpoint)));
        }

        let cluster = Self {
            transport,
            workers,
            links,
        };

        let expected = members.len();
        let census = cluster
            .transport
            .reduce(Value::Scalar(0.0), ReduceOp::Sum, Rank::COORDINATOR)
            .await;
        let ready = match census {
            Ok(Some(total)) => total.as_scalar().unwrap_or(0.0).round() as usize,
            Ok(None) => 0,
            Err(e) => {
                cluster.abort().await;
                return Err(e.into());
            }
        };

        if ready != expected {
            error!(expected, ready, "Engine count mismatch, aborting all workers");
            cluster.abort().await;
            return Err(OrchestratorError::EngineCountMismatch { expected, ready });
        }

        info!(engines = expected, "Cluster ready");
        Ok((cluster, members))
    }

    /// Fault-injection table for this cluster's links.
    pub fn links(&self) -> LinkController {
        self.links.clone()
    }

    /// Collective abort: tell every worker to stop, then kill the tasks.
    pub async fn abort(self) {
        if let Err(e) = self.broadcast_shutdown().await {
            debug!("Shutdown broadcast incomplete during abort: {}", e);
        }
        for worker in &self.workers {
            worker.abort();
        }
    }

    async fn broadcast_shutdown(&self) -> Result<(), EnvError> {
        let envelope = Envelope::encode(0, &Request::Shutdown)?;
        self.transport.broadcast(envelope, Rank::COORDINATOR).await?;
        Ok(())
    }
}

#[async_trait]
impl Teardown for Cluster {
    async fn release(self: Box<Self>) {
        if let Err(e) = self.broadcast_shutdown().await {
            warn!("Shutdown broadcast incomplete: {}", e);
        }

        for mut worker in self.workers {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut worker).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => debug!("Worker left with transport error: {}", e),
                Ok(Err(e)) => warn!("Worker task failed: {}", e),
                Err(_) => {
                    warn!("Worker did not stop within {:?}, aborting", SHUTDOWN_GRACE);
                    worker.abort();
                }
            }
        }
        debug!("Cluster released");
    }
}
