//! Orchestrator facade: a set of engines presented as one engine.

use crate::cluster::{Cluster, Teardown};
use crate::config::OrchestratorConfig;
use crate::controller::{ScenarioController, TickOutcome};
use crate::engine::EngineFactory;
use crate::error::{CallName, OrchestratorError, ProvisionError};
use crate::exchange::AggregatedStore;
use crate::handle::EngineHandle;
use crate::instance::{EngineId, Members, RunningSet};
use crate::output::OutputRecord;
use crate::provision::Provisioner;
use crate::surface::ControlSurface;
use async_trait::async_trait;
use ensemble_env::{LinkController, LocalTransport, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Composite engine driving a running set of member engines.
///
/// Owns its members, the controller state and the teardown for whatever
/// hosts the members. Implements [`ControlSurface`] itself, so a run loop
/// cannot tell it from a single engine and another orchestrator can host it.
pub struct Orchestrator<E: ControlSurface> {
    id: EngineId,
    members: Members<E>,
    controller: ScenarioController,
    teardown: Option<Box<dyn Teardown>>,
    links: Option<LinkController>,
    initialized: bool,
    finalized: bool,
}

impl Orchestrator<EngineHandle<LocalTransport>> {
    /// Provisions every instance, starts one engine per instance and wires the facade.
    ///
    /// Any failure here is fatal; engines already started are aborted.
    pub async fn launch(
        config: OrchestratorConfig,
        provisioner: &dyn Provisioner,
        factory: Arc<dyn EngineFactory>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;

        let names = config.instance_names();
        let instances = provisioner.provision(&names)?;
        if let Some(missing) = names.iter().find(|id| !instances.iter().any(|i| &i.id == *id)) {
            return Err(ProvisionError::Invalid(format!("instance \"{}\" was not provisioned", missing)).into());
        }

        info!(name = %config.name, instances = names.len(), "Launching engines");
        let (cluster, members) = Cluster::launch(instances, factory, config.limits.call_timeout()).await?;
        let links = cluster.links();

        let teardown: Box<dyn Teardown> = Box::new(cluster);
        let mut orchestrator = Self::new(&config, members, Some(teardown))?;
        orchestrator.links = Some(links);
        Ok(orchestrator)
    }
}

impl<E: ControlSurface> Orchestrator<E> {
    /// Wraps already running members.
    ///
    /// Every instance named by the configuration must have a member.
    pub fn new(
        config: &OrchestratorConfig,
        members: Members<E>,
        teardown: Option<Box<dyn Teardown>>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let controller = ScenarioController::new(config)?;

        let ready = controller
            .provisioned()
            .iter()
            .filter(|id| members.contains_key(*id))
            .count();
        if ready != controller.provisioned().len() {
            return Err(OrchestratorError::EngineCountMismatch {
                expected: controller.provisioned().len(),
                ready,
            });
        }

        Ok(Self {
            id: EngineId::new(config.name.as_str()),
            members,
            controller,
            teardown,
            links: None,
            initialized: false,
            finalized: false,
        })
    }

    pub fn members(&self) -> &Members<E> {
        &self.members
    }

    pub fn member(&self, id: &str) -> Option<&E> {
        self.members.get(id)
    }

    pub fn running(&self) -> &RunningSet {
        self.controller.running()
    }

    /// Scenario transitions fired so far.
    pub fn cursor(&self) -> usize {
        self.controller.cursor()
    }

    pub fn aggregated(&self) -> &AggregatedStore {
        self.controller.aggregated()
    }

    /// Handover time while engines that just joined are spinning up.
    pub fn handover(&self) -> Option<f64> {
        self.controller.handover()
    }

    /// Fault-injection table, when the members run on an in-process cluster.
    pub fn links(&self) -> Option<&LinkController> {
        self.links.as_ref()
    }

    /// Runs one controller step at the current composite time.
    pub async fn tick(&mut self) -> Result<TickOutcome, OrchestratorError> {
        let now = self.current_time().await?;
        self.controller.tick(&mut self.members, now).await
    }

    /// Switches the running set explicitly.
    ///
    /// Performs the same synchronize/aggregate/exchange sequence as a
    /// scripted transition, even when `names` equals the current set. The
    /// scenario cursor does not move.
    pub async fn set_instances(&mut self, names: &[&str]) -> Result<(), OrchestratorError> {
        self.ensure_live()?;
        let targets = names.iter().map(|n| EngineId::new(*n)).collect();
        self.controller.switch_to(&mut self.members, targets).await?;
        Ok(())
    }

    /// Samples `variables` over the running set without touching the store.
    ///
    /// Variables no running engine can deliver are left out.
    pub async fn snapshot(&self, variables: &[String]) -> Result<OutputRecord, OrchestratorError> {
        let time = self.current_time().await?;
        let running = self.controller.running().members();

        let mut values = BTreeMap::new();
        for name in variables {
            match self.controller.exchange().reduce_from(&self.members, name, running).await {
                Ok(value) => {
                    values.insert(name.clone(), value);
                }
                Err(e) => warn!(variable = %name, "Left out of snapshot: {}", e),
            }
        }

        Ok(OutputRecord {
            time,
            active: self.running().names().iter().map(|n| n.to_string()).collect(),
            variables: values,
        })
    }

    fn ensure_live(&self) -> Result<(), OrchestratorError> {
        if self.finalized {
            Err(OrchestratorError::Finalized)
        } else {
            Ok(())
        }
    }

    async fn release(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown.release().await;
        }
    }
}

#[async_trait]
impl<E: ControlSurface> ControlSurface for Orchestrator<E> {
    type Error = OrchestratorError;

    fn id(&self) -> &EngineId {
        &self.id
    }

    /// Initializes every member; any failure is fatal and releases the engines.
    async fn initialize(&mut self) -> Result<(), OrchestratorError> {
        self.ensure_live()?;
        if self.initialized {
            return Ok(());
        }

        let mut failure = None;
        for (id, engine) in self.members.iter_mut() {
            debug!(engine = %id, "Initializing");
            if let Err(e) = engine.initialize().await {
                failure = Some(OrchestratorError::Initialize {
                    engine: id.clone(),
                    reason: e.to_string(),
                });
                break;
            }
        }
        if let Some(e) = failure {
            error!("{}, aborting run", e);
            self.finalized = true;
            self.release().await;
            return Err(e);
        }

        let all: Vec<EngineId> = self.members.keys().cloned().collect();
        let start = self
            .controller
            .synchronizer()
            .reference_time(&self.members, &all, None)
            .await
            .ok_or(OrchestratorError::NoLiveMembers(CallName::CurrentTime))?;
        self.controller.seed_initial(start)?;

        self.initialized = true;
        info!(
            name = %self.id,
            start,
            running = ?self.running().names(),
            "Orchestrator initialized"
        );
        Ok(())
    }

    /// One composite step: controller tick, then a synchronizer pass.
    ///
    /// `None` (or a negative `dt`) lets every running engine take one native
    /// step before laggards are aligned to the leader. `Some(0.0)` does nothing.
    /// Engines still spinning up after a transition get their exchanged
    /// values back at the end of the step, and the returned interval can be
    /// negative on the step that starts them behind.
    async fn update(&mut self, dt: Option<f64>) -> Result<f64, OrchestratorError> {
        self.ensure_live()?;
        let dt = dt.filter(|dt| *dt >= 0.0);
        if dt == Some(0.0) {
            return Ok(0.0);
        }

        let before = self.current_time().await?;
        let outcome = self.controller.tick(&mut self.members, before).await?;
        if outcome != TickOutcome::Idle {
            debug!(?outcome, "Tick");
        }

        let running = self.controller.running().members().to_vec();
        if dt.is_none() {
            for id in &running {
                if let Some(engine) = self.members.get_mut(id) {
                    if let Err(e) = engine.update(None).await {
                        warn!(engine = %id, "Native step failed: {}", e);
                    }
                }
            }
        }
        self.controller
            .synchronizer()
            .synchronize(&mut self.members, &running, dt)
            .await;
        self.controller.hold_transition(&mut self.members).await;

        let after = self.current_time().await?;
        Ok(after - before)
    }

    /// Latest clock among live running members.
    async fn current_time(&self) -> Result<f64, OrchestratorError> {
        let mut latest: Option<f64> = None;
        for id in self.controller.running().members() {
            if let Some(engine) = self.members.get(id) {
                match engine.current_time().await {
                    Ok(t) => latest = Some(latest.map_or(t, |l| l.max(t))),
                    Err(e) => warn!(engine = %id, "Clock unavailable: {}", e),
                }
            }
        }
        latest.ok_or(OrchestratorError::NoLiveMembers(CallName::CurrentTime))
    }

    /// Earliest end time among all members.
    async fn end_time(&self) -> Result<f64, OrchestratorError> {
        let mut earliest: Option<f64> = None;
        for (id, engine) in &self.members {
            match engine.end_time().await {
                Ok(t) => earliest = Some(earliest.map_or(t, |e| e.min(t))),
                Err(e) => warn!(engine = %id, "End time unavailable: {}", e),
            }
        }
        earliest.ok_or(OrchestratorError::NoLiveMembers(CallName::EndTime))
    }

    async fn get_variable(&self, name: &str) -> Result<Value, OrchestratorError> {
        self.controller
            .exchange()
            .reduce_from(&self.members, name, self.controller.running().members())
            .await
    }

    /// Writes `value` into every running member.
    async fn set_variable(&mut self, name: &str, value: Value) -> Result<(), OrchestratorError> {
        self.ensure_live()?;
        for id in self.controller.running().members() {
            if let Some(engine) = self.members.get_mut(id) {
                if let Err(e) = engine.set_variable(name, value.clone()).await {
                    warn!(engine = %id, variable = name, "Set skipped engine: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Finalizes every member once, then releases the engines. Idempotent.
    async fn finalize(&mut self) -> Result<(), OrchestratorError> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        for (id, engine) in self.members.iter_mut() {
            debug!(engine = %id, "Finalizing");
            if let Err(e) = engine.finalize().await {
                warn!(engine = %id, "Finalize failed: {}", e);
            }
        }
        self.release().await;
        info!(name = %self.id, "Orchestrator finalized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AggregateConfig, ScenarioStep};
    use crate::testing::{launch_fixture, ScriptedEngine};

    fn zb(values: &[f64]) -> ScriptedEngine {
        ScriptedEngine::new(1.0).with_var("zb", Value::array(values))
    }

    fn three_step_config() -> OrchestratorConfig {
        OrchestratorConfig {
            scenario: vec![
                ScenarioStep::new(0.0, &["a"]),
                ScenarioStep::new(10.0, &["a", "b"]),
                ScenarioStep::new(20.0, &["b"]),
            ],
            exchange: vec!["zb".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_scenario_driven_to_25() {
        let mut orch = launch_fixture(three_step_config(), vec![("a", zb(&[1.0])), ("b", zb(&[3.0]))]).await;
        orch.initialize().await.unwrap();
        assert_eq!(orch.running().names(), vec!["a"]);

        while orch.current_time().await.unwrap() < 25.0 {
            orch.update(None).await.unwrap();
        }

        assert_eq!(orch.running().names(), vec!["b"]);
        assert_eq!(orch.cursor(), 2);
        orch.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_transition_time_spins_up_incoming_engine() {
        let config = OrchestratorConfig {
            scenario: vec![ScenarioStep::new(0.0, &["a"]), ScenarioStep::new(4.0, &["b"])],
            exchange: vec!["zb".into()],
            transition_time: Some(2.0),
            ..Default::default()
        };
        let b = zb(&[0.0]);
        let b_sets = b.set_log();
        let b_steps = b.dt_log();
        let mut orch = launch_fixture(config, vec![("a", zb(&[5.0])), ("b", b)]).await;
        orch.initialize().await.unwrap();

        for _ in 0..4 {
            orch.update(None).await.unwrap();
        }
        assert_eq!(orch.current_time().await.unwrap(), 4.0);

        // Transition at 4: b starts at 2, takes its native step and is held
        let elapsed = orch.update(None).await.unwrap();
        assert_eq!(elapsed, -1.0);
        assert_eq!(orch.running().names(), vec!["b"]);
        assert_eq!(orch.handover(), Some(4.0));
        assert_eq!(*b_steps.lock().unwrap(), vec![Some(2.0), None]);
        assert_eq!(b_sets.lock().unwrap().len(), 2);

        // b reaches the handover time and is released
        orch.update(None).await.unwrap();
        assert_eq!(orch.current_time().await.unwrap(), 4.0);
        assert_eq!(orch.handover(), None);
        orch.update(None).await.unwrap();
        assert_eq!(b_sets.lock().unwrap().len(), 2);
        assert_eq!(orch.get_variable("zb").await.unwrap(), Value::array(&[5.0]));
        orch.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_variable_is_running_set_mean() {
        let config = OrchestratorConfig {
            instances: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        let mut orch = launch_fixture(config, vec![("a", zb(&[1.0, 1.0])), ("b", zb(&[3.0, 3.0]))]).await;
        orch.initialize().await.unwrap();

        assert_eq!(orch.get_variable("zb").await.unwrap(), Value::array(&[2.0, 2.0]));
        assert!(orch.aggregated().is_empty());
        orch.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_member_counts_as_zero() {
        let config = OrchestratorConfig {
            instances: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        let a = zb(&[9.0, 9.0]).failing_get("zb");
        let mut orch = launch_fixture(config, vec![("a", a), ("b", zb(&[4.0, 4.0]))]).await;
        orch.initialize().await.unwrap();

        assert_eq!(orch.get_variable("zb").await.unwrap(), Value::array(&[2.0, 2.0]));
        orch.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_dt_changes_nothing() {
        let config = OrchestratorConfig {
            instances: vec!["a".into(), "b".into()],
            exchange: vec!["zb".into()],
            ..Default::default()
        };
        let a = zb(&[1.0]).starting_at(5.0);
        let b = zb(&[3.0]).starting_at(8.0);
        let mut orch = launch_fixture(config, vec![("a", a), ("b", b)]).await;
        orch.initialize().await.unwrap();

        let running = orch.running().clone();
        let store = orch.aggregated().clone();
        assert_eq!(orch.update(Some(0.0)).await.unwrap(), 0.0);

        assert_eq!(orch.running(), &running);
        assert_eq!(orch.aggregated(), &store);
        assert_eq!(orch.member("a").unwrap().current_time().await.unwrap(), 5.0);
        assert_eq!(orch.member("b").unwrap().current_time().await.unwrap(), 8.0);
        orch.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_without_dt_aligns_running_set() {
        let config = OrchestratorConfig {
            instances: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        let a = ScriptedEngine::new(1.0).starting_at(5.0);
        let b = ScriptedEngine::new(1.0).starting_at(8.0);
        let a_log = a.dt_log();
        let mut orch = launch_fixture(config, vec![("a", a), ("b", b)]).await;
        orch.initialize().await.unwrap();

        let elapsed = orch.update(None).await.unwrap();
        assert_eq!(elapsed, 1.0);
        assert_eq!(orch.member("a").unwrap().current_time().await.unwrap(), 9.0);
        assert_eq!(orch.member("b").unwrap().current_time().await.unwrap(), 9.0);
        assert!(a_log.lock().unwrap().iter().flatten().all(|dt| *dt > 0.0));
        orch.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_instances_same_set_refreshes() {
        let config = OrchestratorConfig {
            instances: vec!["a".into(), "b".into()],
            exchange: vec!["zb".into()],
            ..Default::default()
        };
        let mut orch = launch_fixture(config, vec![("a", zb(&[1.0, 1.0])), ("b", zb(&[3.0, 3.0]))]).await;
        orch.initialize().await.unwrap();
        let before = orch.running().clone();

        orch.set_instances(&["a", "b"]).await.unwrap();

        assert!(orch.running().set_eq(&before));
        assert_eq!(orch.aggregated().get("zb"), Some(&Value::array(&[2.0, 2.0])));
        let a = orch.member("a").unwrap().get_variable("zb").await.unwrap();
        assert_eq!(a, Value::array(&[2.0, 2.0]));
        assert_eq!(orch.cursor(), 0);
        orch.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_instances_unknown_is_rejected() {
        let config = OrchestratorConfig {
            instances: vec!["a".into()],
            ..Default::default()
        };
        let mut orch = launch_fixture(config, vec![("a", zb(&[1.0]))]).await;
        orch.initialize().await.unwrap();

        let err = orch.set_instances(&["b"]).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownInstance(ref name) if name == "b"));
        assert_eq!(orch.running().names(), vec!["a"]);
        orch.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_periodic_aggregation_refreshes_running_set() {
        let config = OrchestratorConfig {
            instances: vec!["a".into(), "b".into()],
            exchange: vec!["zb".into()],
            aggregate: Some(AggregateConfig {
                interval: 5.0,
                method: Default::default(),
                options: Default::default(),
            }),
            ..Default::default()
        };
        let mut orch = launch_fixture(config, vec![("a", zb(&[0.0])), ("b", zb(&[4.0]))]).await;
        orch.initialize().await.unwrap();

        orch.update(Some(1.0)).await.unwrap();
        assert_eq!(orch.aggregated().get("zb"), Some(&Value::array(&[2.0])));
        let b = orch.member("b").unwrap().get_variable("zb").await.unwrap();
        assert_eq!(b, Value::array(&[2.0]));
        orch.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_failure_is_fatal() {
        let config = OrchestratorConfig {
            instances: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        let b = ScriptedEngine::new(1.0).failing_initialize();
        let mut orch = launch_fixture(config, vec![("a", ScriptedEngine::new(1.0)), ("b", b)]).await;

        let err = orch.initialize().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Initialize { ref engine, .. } if engine.as_str() == "b"));
        assert!(err.is_fatal());
        assert!(matches!(orch.update(None).await, Err(OrchestratorError::Finalized)));
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent() {
        let config = OrchestratorConfig {
            instances: vec!["a".into()],
            ..Default::default()
        };
        let a = ScriptedEngine::new(1.0);
        let finalized = a.finalize_count();
        let mut orch = launch_fixture(config, vec![("a", a)]).await;
        orch.initialize().await.unwrap();

        orch.finalize().await.unwrap();
        orch.finalize().await.unwrap();
        assert_eq!(*finalized.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_member_degrades_but_run_continues() {
        let config = OrchestratorConfig {
            instances: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        let mut orch = launch_fixture(config, vec![("a", zb(&[2.0])), ("b", zb(&[6.0]))]).await;
        orch.initialize().await.unwrap();

        let rank_b = orch.member("b").unwrap().rank();
        orch.links().unwrap().sever(rank_b);

        orch.update(None).await.unwrap();
        assert_eq!(orch.current_time().await.unwrap(), 1.0);
        assert_eq!(orch.get_variable("zb").await.unwrap(), Value::array(&[1.0]));

        orch.links().unwrap().heal_all();
        orch.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_end_time_is_earliest_member() {
        let config = OrchestratorConfig {
            instances: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        let a = ScriptedEngine::new(1.0).ending_at(50.0);
        let b = ScriptedEngine::new(1.0).ending_at(30.0);
        let mut orch = launch_fixture(config, vec![("a", a), ("b", b)]).await;
        orch.initialize().await.unwrap();

        assert_eq!(orch.end_time().await.unwrap(), 30.0);
        orch.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_orchestrator_nests_as_member() {
        let inner_a = launch_fixture(
            OrchestratorConfig {
                name: "left".into(),
                instances: vec!["a".into()],
                ..Default::default()
            },
            vec![("a", zb(&[1.0]))],
        )
        .await;
        let inner_b = launch_fixture(
            OrchestratorConfig {
                name: "right".into(),
                instances: vec!["b".into()],
                ..Default::default()
            },
            vec![("b", zb(&[5.0]))],
        )
        .await;

        let mut members = Members::new();
        members.insert(EngineId::new("left"), inner_a);
        members.insert(EngineId::new("right"), inner_b);
        let config = OrchestratorConfig {
            name: "outer".into(),
            instances: vec!["left".into(), "right".into()],
            exchange: vec!["zb".into()],
            ..Default::default()
        };
        let mut outer = Orchestrator::new(&config, members, None).unwrap();
        outer.initialize().await.unwrap();

        outer.update(None).await.unwrap();
        assert_eq!(outer.current_time().await.unwrap(), 1.0);
        assert_eq!(outer.get_variable("zb").await.unwrap(), Value::array(&[3.0]));

        outer.set_instances(&["right"]).await.unwrap();
        assert_eq!(
            outer.member("right").unwrap().get_variable("zb").await.unwrap(),
            Value::array(&[3.0])
        );
        outer.finalize().await.unwrap();
    }
}
