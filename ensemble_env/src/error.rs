//! Error types for the Ensemble transport layer.

use crate::types::{Rank, Shape};
use thiserror::Error;

/// Errors that can occur while moving data between ranks.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Link to the peer is severed; it may come back
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    /// Peer endpoint is gone for good
    #[error("Peer disconnected: {0}")]
    Disconnected(Rank),

    /// Rank is not part of this world
    #[error("Unknown rank: {0}")]
    UnknownRank(Rank),

    /// Envelope payload could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Two values taking part in one reduction have different shapes
    #[error("Shape mismatch: {left} vs {right}")]
    ShapeMismatch { left: Shape, right: Shape },

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates an unreachable error.
    pub fn unreachable(rank: impl std::fmt::Display) -> Self {
        Self::PeerUnreachable(rank.to_string())
    }

    /// Whether retrying the same operation later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::PeerUnreachable(_) | Self::Timeout(_))
    }

    /// Creates a codec error.
    pub fn codec(msg: impl std::fmt::Display) -> Self {
        Self::Codec(msg.to_string())
    }
}

impl From<serde_json::Error> for EnvError {
    fn from(err: serde_json::Error) -> Self {
        Self::codec(err)
    }
}
