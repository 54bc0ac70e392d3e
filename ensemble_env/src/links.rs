//! Link fault injection for the in-process transport.

use crate::types::Rank;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Controller for severing ranks from the world.
///
/// Cloning shares the same link table, so a test can hold a controller while
/// the transports it governs are moved into worker tasks.
#[derive(Debug, Clone, Default)]
pub struct LinkController {
    /// Ranks whose links are currently cut
    severed: Arc<Mutex<HashSet<Rank>>>,
}

impl LinkController {
    /// Creates a controller with every link healthy.
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashSet<Rank>> {
        self.severed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cuts every link to and from `rank`.
    pub fn sever(&self, rank: Rank) {
        self.table().insert(rank);
    }

    /// Restores the links of `rank`.
    pub fn heal(&self, rank: Rank) {
        self.table().remove(&rank);
    }

    /// Restores every link.
    pub fn heal_all(&self) {
        self.table().clear();
    }

    /// Checks if `rank` is cut off.
    pub fn is_severed(&self, rank: Rank) -> bool {
        self.table().contains(&rank)
    }

    /// Checks if two ranks can communicate.
    pub fn can_communicate(&self, a: Rank, b: Rank) -> bool {
        let table = self.table();
        !table.contains(&a) && !table.contains(&b)
    }
}
