//! Transport abstraction between the coordinator and engine ranks.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{Envelope, Rank, ReduceOp, Value};

/// Point-to-point and collective message passing addressed by rank.
///
/// # Implementations
///
/// - **In-process**: [`crate::LocalTransport`], one tokio channel per rank pair
/// - **Multi-process**: a rank-based collective backend satisfies the same contract
///
/// # Blocking
///
/// Every method suspends the caller until the operation completes. There is
/// no queuing beyond one in-flight exchange per peer; callers serialize their
/// own request/reply pairs.
///
/// ```text
/// Coordinator (rank 0)            Engine (rank r)
///   |-- send(r, request) ------------->|
///   |                                  |-- recv(0) -> request
///   |<------------- send(0, reply) ----|
///   |-- recv(r) -> reply               |
/// ```
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends an envelope to one peer.
    ///
    /// # Returns
    /// * `Ok(())` - Envelope handed to the peer's inbox
    /// * `Err(EnvError::PeerUnreachable)` - Link severed
    /// * `Err(EnvError::Disconnected)` - Peer endpoint dropped
    async fn send(&self, to: Rank, envelope: Envelope) -> Result<(), EnvError>;

    /// Receives the next envelope sent by `from`.
    ///
    /// Only messages from `from` are considered; other peers' messages stay queued.
    async fn recv(&self, from: Rank) -> Result<Envelope, EnvError>;

    /// Distributes the root's envelope to every rank.
    ///
    /// On the root, `envelope` is sent to every peer and returned. On any other
    /// rank the argument is ignored and the root's envelope is returned.
    async fn broadcast(&self, envelope: Envelope, root: Rank) -> Result<Envelope, EnvError>;

    /// Reduces one value per rank into a single value at `root`.
    ///
    /// Only the root receives `Some(result)`; every other rank gets `None`.
    async fn reduce(&self, value: Value, op: ReduceOp, root: Rank) -> Result<Option<Value>, EnvError>;

    /// Returns this endpoint's rank.
    fn local_rank(&self) -> Rank;

    /// Returns every other rank in the world, in ascending order.
    fn peers(&self) -> Vec<Rank>;
}
