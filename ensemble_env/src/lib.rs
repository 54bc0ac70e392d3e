//! Ensemble Transport Abstraction Layer
//!
//! This crate provides the message-passing substrate between the Ensemble
//! coordinator and the engines it drives. It is the only channel between
//! them: the coordinator never touches an engine's memory.
//!
//! # Core Concept: Ranks
//!
//! Every participant has a [`Rank`]. Rank 0 is the coordinator, which owns
//! no simulation state; every other rank hosts exactly one engine.
//! - Point-to-point: `send()`, `recv()`
//! - Collective: `broadcast()`, `reduce()`
//!
//! # Example
//!
//! ```ignore
//! use ensemble_env::{LocalWorld, Rank, Transport, Envelope};
//!
//! let mut world = LocalWorld::new(3);
//! let coordinator = world.take(Rank::COORDINATOR).unwrap();
//! coordinator.broadcast(Envelope::new(0, b"hello".to_vec()), Rank::COORDINATOR).await?;
//! ```

mod error;
mod links;
mod local;
mod transport;
mod types;

pub use error::EnvError;
pub use links::LinkController;
pub use local::{LocalTransport, LocalWorld, DEFAULT_CAPACITY};
pub use transport::Transport;
pub use types::{wire_f64, Envelope, Rank, ReduceOp, Shape, Value, WireF64};
