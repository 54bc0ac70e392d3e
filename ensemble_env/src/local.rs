//! In-process transport backed by tokio channels.

use crate::error::EnvError;
use crate::links::LinkController;
use crate::transport::Transport;
use crate::types::{Envelope, Rank, ReduceOp, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};

/// Default per-link channel capacity.
pub const DEFAULT_CAPACITY: usize = 64;

/// A world of ranks connected pairwise by channels.
///
/// Every ordered pair `(from, to)` gets its own channel, so `recv(from)` is
/// selective without any demultiplexing. Endpoints are handed out once each
/// and then moved into whichever task plays that rank.
pub struct LocalWorld {
    /// Endpoints not yet taken, indexed by rank
    endpoints: Vec<Option<LocalTransport>>,

    /// Shared fault-injection table
    links: LinkController,
}

impl LocalWorld {
    /// Creates a world with `size` ranks (rank 0 is the coordinator).
    pub fn new(size: usize) -> Self {
        Self::with_capacity(size, DEFAULT_CAPACITY)
    }

    /// Creates a world with a custom per-link channel capacity.
    pub fn with_capacity(size: usize, capacity: usize) -> Self {
        let links = LinkController::new();
        let mut outboxes: Vec<HashMap<Rank, mpsc::Sender<Envelope>>> =
            (0..size).map(|_| HashMap::new()).collect();
        let mut inboxes: Vec<HashMap<Rank, Mutex<mpsc::Receiver<Envelope>>>> =
            (0..size).map(|_| HashMap::new()).collect();

        for from in 0..size {
            for to in 0..size {
                if from == to {
                    continue;
                }
                let (tx, rx) = mpsc::channel(capacity.max(1));
                outboxes[from].insert(Rank(to as u32), tx);
                inboxes[to].insert(Rank(from as u32), Mutex::new(rx));
            }
        }

        let endpoints = outboxes
            .into_iter()
            .zip(inboxes)
            .enumerate()
            .map(|(i, (outboxes, inboxes))| {
                Some(LocalTransport {
                    rank: Rank(i as u32),
                    outboxes,
                    inboxes,
                    links: links.clone(),
                })
            })
            .collect();

        Self { endpoints, links }
    }

    /// Takes the endpoint for `rank`. Returns `None` if already taken or out of range.
    pub fn take(&mut self, rank: Rank) -> Option<LocalTransport> {
        self.endpoints.get_mut(rank.index())?.take()
    }

    /// Returns the number of ranks in the world.
    pub fn size(&self) -> usize {
        self.endpoints.len()
    }

    /// Returns a handle to the world's link table.
    pub fn links(&self) -> LinkController {
        self.links.clone()
    }
}

/// One rank's endpoint in a [`LocalWorld`].
pub struct LocalTransport {
    /// This endpoint's rank
    rank: Rank,

    /// Senders to every other rank
    outboxes: HashMap<Rank, mpsc::Sender<Envelope>>,

    /// Receivers from every other rank (behind tokio mutex for async)
    inboxes: HashMap<Rank, Mutex<mpsc::Receiver<Envelope>>>,

    /// Shared fault-injection table
    links: LinkController,
}

impl LocalTransport {
    fn check_link(&self, peer: Rank) -> Result<(), EnvError> {
        if self.links.can_communicate(self.rank, peer) {
            Ok(())
        } else {
            Err(EnvError::unreachable(peer))
        }
    }

    /// Returns the link controller governing this endpoint.
    pub fn links(&self) -> &LinkController {
        &self.links
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, to: Rank, envelope: Envelope) -> Result<(), EnvError> {
        self.check_link(to)?;
        let tx = self.outboxes.get(&to).ok_or(EnvError::UnknownRank(to))?;
        tx.send(envelope).await.map_err(|_| EnvError::Disconnected(to))
    }

    async fn recv(&self, from: Rank) -> Result<Envelope, EnvError> {
        self.check_link(from)?;
        let inbox = self.inboxes.get(&from).ok_or(EnvError::UnknownRank(from))?;
        let mut rx = inbox.lock().await;
        rx.recv().await.ok_or(EnvError::Disconnected(from))
    }

    async fn broadcast(&self, envelope: Envelope, root: Rank) -> Result<Envelope, EnvError> {
        if self.rank != root {
            return self.recv(root).await;
        }

        // Deliver to every reachable peer before reporting a failure
        let mut first_error = None;
        for peer in self.peers() {
            if let Err(e) = self.send(peer, envelope.clone()).await {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(envelope),
        }
    }

    async fn reduce(&self, value: Value, op: ReduceOp, root: Rank) -> Result<Option<Value>, EnvError> {
        if self.rank != root {
            self.send(root, Envelope::encode(0, &value)?).await?;
            return Ok(None);
        }

        let mut acc = value;
        for peer in self.peers() {
            let contribution: Value = self.recv(peer).await?.decode()?;
            acc = acc.combine(&contribution, op)?;
        }
        Ok(Some(acc))
    }

    fn local_rank(&self) -> Rank {
        self.rank
    }

    fn peers(&self) -> Vec<Rank> {
        let mut peers: Vec<Rank> = self.outboxes.keys().copied().collect();
        peers.sort();
        peers
    }
}
