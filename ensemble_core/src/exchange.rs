//! Data exchange and aggregation between engine sets.

use crate::error::OrchestratorError;
use crate::instance::{EngineId, Members};
use crate::reducer::Reducer;
use crate::surface::ControlSurface;
use ensemble_env::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Latest reduced value per exchange variable.
///
/// Overwritten by every aggregation, read by the exchange that follows it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedStore {
    values: BTreeMap<String, Value>,
}

impl AggregatedStore {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn insert(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Moves exchange variables from one engine set into another.
#[derive(Debug, Clone, Default)]
pub struct Exchange {
    variables: Vec<String>,
    reducer: Reducer,
}

impl Exchange {
    pub fn new(variables: Vec<String>, reducer: Reducer) -> Self {
        Self { variables, reducer }
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn reducer(&self) -> Reducer {
        self.reducer
    }

    /// Fetches `name` from every source engine.
    ///
    /// A member whose fetch fails contributes zeros shaped like the values that
    /// did arrive, so it still counts toward the reducer's divisor. Returns
    /// `None` when no member delivered a value.
    pub async fn collect<E: ControlSurface>(
        &self,
        members: &Members<E>,
        name: &str,
        sources: &[EngineId],
    ) -> Option<Vec<Value>> {
        let mut fetched: Vec<Option<Value>> = Vec::with_capacity(sources.len());
        for id in sources {
            let value = match members.get(id) {
                Some(engine) => match engine.get_variable(name).await {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!(engine = %id, variable = name, "Fetch failed, contributing zeros: {}", e);
                        None
                    }
                },
                None => None,
            };
            fetched.push(value);
        }

        let shape = fetched.iter().flatten().next()?.shape();
        Some(
            fetched
                .into_iter()
                .map(|value| value.unwrap_or_else(|| Value::zeros(shape)))
                .collect(),
        )
    }

    /// Collects `name` over `sources` and reduces it, without touching any store.
    pub async fn reduce_from<E: ControlSurface>(
        &self,
        members: &Members<E>,
        name: &str,
        sources: &[EngineId],
    ) -> Result<Value, OrchestratorError> {
        let values = self
            .collect(members, name, sources)
            .await
            .ok_or_else(|| OrchestratorError::VariableUnavailable(name.to_string()))?;

        match self.reducer.reduce(&values) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(OrchestratorError::VariableUnavailable(name.to_string())),
            Err(e) => Err(OrchestratorError::VariableUnavailable(format!("{}: {}", name, e))),
        }
    }

    /// Reduces `name` over `sources` into the store.
    pub async fn aggregate<E: ControlSurface>(
        &self,
        members: &Members<E>,
        store: &mut AggregatedStore,
        name: &str,
        sources: &[EngineId],
    ) -> Result<(), OrchestratorError> {
        let value = self.reduce_from(members, name, sources).await?;
        debug!(variable = name, sources = sources.len(), shape = %value.shape(), "Aggregated");
        store.insert(name, value);
        Ok(())
    }

    /// Writes the stored value of `name` into every target engine.
    ///
    /// Failing targets are logged and skipped.
    pub async fn exchange<E: ControlSurface>(
        &self,
        members: &mut Members<E>,
        store: &AggregatedStore,
        name: &str,
        targets: &[EngineId],
    ) {
        let Some(value) = store.get(name) else {
            warn!(variable = name, "Nothing aggregated to exchange");
            return;
        };

        for id in targets {
            if let Some(engine) = members.get_mut(id) {
                if let Err(e) = engine.set_variable(name, value.clone()).await {
                    warn!(engine = %id, variable = name, "Exchange skipped engine: {}", e);
                }
            }
        }
    }

    /// Aggregate over `sources`, then exchange into `targets`, for every variable.
    ///
    /// A variable that no source could deliver is not exchanged.
    pub async fn transfer<E: ControlSurface>(
        &self,
        members: &mut Members<E>,
        store: &mut AggregatedStore,
        sources: &[EngineId],
        targets: &[EngineId],
    ) {
        for name in &self.variables {
            match self.aggregate(members, store, name, sources).await {
                Ok(()) => self.exchange(members, store, name, targets).await,
                Err(e) => warn!(variable = %name, "Not exchanged: {}", e),
            }
        }
    }
}
