//! Instance identity and the running set.

use crate::error::OrchestratorError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Name of a provisioned engine instance. Immutable after provisioning.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineId(String);

impl EngineId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EngineId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for EngineId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for EngineId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A named, provisioned configuration for one engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Instance name
    pub id: EngineId,

    /// Private working directory, if the provisioner created one
    pub workdir: Option<PathBuf>,

    /// Template markers available to the engine's input files
    pub markers: BTreeMap<String, String>,
}

impl Instance {
    pub fn new(id: impl Into<EngineId>) -> Self {
        Self {
            id: id.into(),
            workdir: None,
            markers: BTreeMap::new(),
        }
    }
}

/// Engines owned by one orchestrator, keyed by instance name.
pub type Members<E> = BTreeMap<EngineId, E>;

/// The ordered set of instances currently receiving time advances.
///
/// Never empty, never contains duplicates. Replaced whole, never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningSet(Vec<EngineId>);

impl RunningSet {
    /// Builds a running set, dropping duplicates but keeping first-seen order.
    pub fn new(ids: impl IntoIterator<Item = EngineId>) -> Result<Self, OrchestratorError> {
        let mut members: Vec<EngineId> = Vec::new();
        for id in ids {
            if !members.contains(&id) {
                members.push(id);
            }
        }

        if members.is_empty() {
            return Err(OrchestratorError::config("running set must not be empty"));
        }
        Ok(Self(members))
    }

    pub fn members(&self) -> &[EngineId] {
        &self.0
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(EngineId::as_str).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|m| m.as_str() == id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Membership equality, ignoring order.
    pub fn set_eq(&self, other: &RunningSet) -> bool {
        self.len() == other.len() && self.0.iter().all(|id| other.0.contains(id))
    }

    /// Members of `self` followed by members of `other` not already present.
    pub fn union(&self, other: &RunningSet) -> Vec<EngineId> {
        let mut all = self.0.clone();
        all.extend(other.0.iter().filter(|id| !self.0.contains(id)).cloned());
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<EngineId> {
        names.iter().map(|n| EngineId::new(*n)).collect()
    }

    #[test]
    fn test_running_set_dedups_in_order() {
        let set = RunningSet::new(ids(&["b", "a", "b"])).unwrap();
        assert_eq!(set.names(), vec!["b", "a"]);
    }

    #[test]
    fn test_running_set_rejects_empty() {
        assert!(RunningSet::new(Vec::new()).is_err());
    }

    #[test]
    fn test_running_set_equality_ignores_order() {
        let ab = RunningSet::new(ids(&["a", "b"])).unwrap();
        let ba = RunningSet::new(ids(&["b", "a"])).unwrap();
        let a = RunningSet::new(ids(&["a"])).unwrap();

        assert!(ab.set_eq(&ba));
        assert!(!ab.set_eq(&a));
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_running_set_union() {
        let a = RunningSet::new(ids(&["a", "c"])).unwrap();
        let b = RunningSet::new(ids(&["b", "c"])).unwrap();
        assert_eq!(a.union(&b), ids(&["a", "c", "b"]));
    }

    #[test]
    fn test_engine_id_borrows_as_str() {
        let mut map = BTreeMap::new();
        map.insert(EngineId::new("a"), 1);
        assert_eq!(map.get("a"), Some(&1));
    }
}
