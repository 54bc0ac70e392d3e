//! Scenario and aggregation controller: decides what each tick does.
//!
//! # Tick order
//!
//! ```text
//! tick(now)
//!   ├─ aggregation due?  -> aggregate/exchange within the running set, advance boundary
//!   ├─ scenario entry due? -> sync old ∪ new, aggregate old, exchange into new, swap set
//!   └─ otherwise           -> Idle
//! ```
//!
//! At most one of the first two branches runs per tick, and it finishes
//! completely before the tick returns.
//!
//! With a `transition_time`, engines joining at a transition start that far
//! behind the handover time. Until they reach it, the orchestrator calls
//! [`ScenarioController::hold_transition`] after each update to re-apply the
//! values they were handed.

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::exchange::{AggregatedStore, Exchange};
use crate::instance::{EngineId, Members, RunningSet};
use crate::reducer::Reducer;
use crate::scenario::Scenario;
use crate::surface::ControlSurface;
use crate::sync::TimeSynchronizer;
use tracing::{debug, info};

/// What a tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Idle,
    /// Running set re-aggregated in place at `boundary`
    Aggregated { boundary: f64 },
    /// Running set replaced
    Transitioned { from: RunningSet, to: RunningSet },
}

/// Recurring aggregation boundaries at multiples of `interval`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationSchedule {
    interval: f64,
    next: f64,
}

impl AggregationSchedule {
    pub fn new(interval: f64) -> Self {
        Self { interval, next: 0.0 }
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    /// Next boundary not yet fired.
    pub fn boundary(&self) -> f64 {
        self.next
    }

    pub fn is_due(&self, now: f64) -> bool {
        now >= self.next
    }

    /// Moves the boundary to the first multiple of `interval` past `now`.
    ///
    /// Boundaries skipped by a long tick fire once, not once each.
    pub fn advance(&mut self, now: f64) {
        let skipped = ((now - self.next) / self.interval).floor().max(0.0);
        self.next += (skipped + 1.0) * self.interval;
        while self.next <= now {
            self.next += self.interval;
        }
    }
}

/// Engines spinning up after a transition, and what they were handed.
#[derive(Debug, Clone)]
struct SpinUp {
    handover: f64,
    newcomers: Vec<EngineId>,
    captured: AggregatedStore,
}

/// Owns the running set, scenario cursor, aggregation schedule and store.
#[derive(Debug, Clone)]
pub struct ScenarioController {
    provisioned: Vec<EngineId>,
    scenario: Scenario,
    cursor: usize,
    running: RunningSet,
    schedule: Option<AggregationSchedule>,
    exchange: Exchange,
    store: AggregatedStore,
    synchronizer: TimeSynchronizer,
    transition_time: Option<f64>,
    spin_up: Option<SpinUp>,
}

impl ScenarioController {
    pub fn new(config: &OrchestratorConfig) -> Result<Self, OrchestratorError> {
        let provisioned = config.instance_names();
        let reducer = match &config.aggregate {
            Some(aggregate) => Reducer::from_config(aggregate)?,
            None => Reducer::default(),
        };

        Ok(Self {
            running: RunningSet::new(provisioned.clone())?,
            provisioned,
            scenario: Scenario::from_steps(&config.scenario)?,
            cursor: 0,
            schedule: config
                .aggregate
                .as_ref()
                .map(|a| AggregationSchedule::new(a.interval)),
            exchange: Exchange::new(config.exchange.clone(), reducer),
            store: AggregatedStore::default(),
            synchronizer: TimeSynchronizer::new(&config.limits),
            transition_time: config.transition_time.filter(|t| *t > 0.0),
            spin_up: None,
        })
    }

    pub fn running(&self) -> &RunningSet {
        &self.running
    }

    /// Number of scenario transitions fired by ticks.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn aggregated(&self) -> &AggregatedStore {
        &self.store
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    pub fn synchronizer(&self) -> TimeSynchronizer {
        self.synchronizer
    }

    pub fn schedule(&self) -> Option<&AggregationSchedule> {
        self.schedule.as_ref()
    }

    pub fn provisioned(&self) -> &[EngineId] {
        &self.provisioned
    }

    /// Handover time of the transition still spinning up, if any.
    pub fn handover(&self) -> Option<f64> {
        self.spin_up.as_ref().map(|s| s.handover)
    }

    /// No scenario entries left and no aggregation rule: every tick is `Idle`.
    pub fn is_terminal(&self) -> bool {
        self.cursor >= self.scenario.len() && self.schedule.is_none()
    }

    /// Applies the scenario entries already active at `start`.
    ///
    /// The last such entry becomes the running set without any exchange,
    /// since nothing has been simulated yet. These entries do not count
    /// toward [`cursor`](Self::cursor).
    pub fn seed_initial(&mut self, start: f64) -> Result<(), OrchestratorError> {
        let (initial, rest) = std::mem::take(&mut self.scenario).split_initial(start);
        self.scenario = rest;

        if let Some(targets) = initial {
            self.check_provisioned(&targets)?;
            self.running = RunningSet::new(targets)?;
            info!(running = ?self.running.names(), start, "Initial running set");
        }
        Ok(())
    }

    /// One controller step at simulated time `now`.
    pub async fn tick<E: ControlSurface>(
        &mut self,
        members: &mut Members<E>,
        now: f64,
    ) -> Result<TickOutcome, OrchestratorError> {
        if let Some(schedule) = self.schedule.as_mut() {
            if schedule.is_due(now) {
                let boundary = schedule.boundary();
                schedule.advance(now);
                let running = self.running.members().to_vec();
                debug!(boundary, now, "Re-aggregating running set");
                self.exchange
                    .transfer(members, &mut self.store, &running, &running)
                    .await;
                return Ok(TickOutcome::Aggregated { boundary });
            }
        }

        let Some(entry) = self.scenario.due(self.cursor, now) else {
            return Ok(TickOutcome::Idle);
        };
        let targets = entry.targets.clone();
        let outcome = self.switch_to(members, targets).await?;
        self.cursor += 1;
        Ok(outcome)
    }

    /// Replaces the running set with `targets`.
    ///
    /// Synchronizes the union of both sets, captures every exchange variable
    /// from the outgoing set and writes it into the incoming set, then swaps.
    /// With a transition time, engines new to the running set are only caught
    /// up to `transition_time` before the handover and are then held on the
    /// captured values (see [`hold_transition`](Self::hold_transition)).
    /// An unprovisioned name fails before anything is touched.
    pub async fn switch_to<E: ControlSurface>(
        &mut self,
        members: &mut Members<E>,
        targets: Vec<EngineId>,
    ) -> Result<TickOutcome, OrchestratorError> {
        self.check_provisioned(&targets)?;
        let incoming = RunningSet::new(targets)?;

        info!(
            from = ?self.running.names(),
            to = ?incoming.names(),
            "Start transition"
        );

        let newcomers: Vec<EngineId> = incoming
            .members()
            .iter()
            .filter(|id| !self.running.contains(id.as_str()))
            .cloned()
            .collect();

        let handover = match self.transition_time {
            Some(period) if !newcomers.is_empty() => {
                let outgoing = self.running.members().to_vec();
                let handover = self.synchronizer.synchronize(members, &outgoing, None).await;
                if let Some(handover) = handover {
                    debug!(handover, period, "Starting incoming engines behind the handover");
                    for id in &newcomers {
                        if let Some(engine) = members.get_mut(id) {
                            self.synchronizer.catch_up(engine, handover - period).await;
                        }
                    }
                }
                handover
            }
            _ => {
                let union = self.running.union(&incoming);
                self.synchronizer.synchronize(members, &union, None).await;
                None
            }
        };

        let mut captured = AggregatedStore::default();
        self.exchange
            .transfer(members, &mut captured, self.running.members(), incoming.members())
            .await;
        for (name, value) in captured.iter() {
            self.store.insert(name, value.clone());
        }

        let from = std::mem::replace(&mut self.running, incoming);
        self.spin_up = match handover {
            Some(handover) if !captured.is_empty() => {
                info!(running = ?self.running.names(), handover, "Incoming engines spinning up");
                Some(SpinUp {
                    handover,
                    newcomers,
                    captured,
                })
            }
            _ => {
                info!(running = ?self.running.names(), "Transition finished");
                None
            }
        };
        Ok(TickOutcome::Transitioned {
            from,
            to: self.running.clone(),
        })
    }

    /// Re-applies the captured values while newcomers are behind the handover.
    ///
    /// Returns whether the spin-up is still going. Once the newcomers reach
    /// the handover time, or none of them can report a clock, it ends.
    pub async fn hold_transition<E: ControlSurface>(&mut self, members: &mut Members<E>) -> bool {
        let Some(spin_up) = &self.spin_up else {
            return false;
        };

        let now = self
            .synchronizer
            .reference_time(members, &spin_up.newcomers, None)
            .await;
        match now {
            Some(now) if now < spin_up.handover => {
                debug!(now, handover = spin_up.handover, "Holding exchanged state");
                for (name, _) in spin_up.captured.iter() {
                    self.exchange
                        .exchange(members, &spin_up.captured, name, &spin_up.newcomers)
                        .await;
                }
                true
            }
            _ => {
                info!(running = ?self.running.names(), "Transition finished");
                self.spin_up = None;
                false
            }
        }
    }

    fn check_provisioned(&self, targets: &[EngineId]) -> Result<(), OrchestratorError> {
        match targets.iter().find(|id| !self.provisioned.contains(id)) {
            Some(unknown) => Err(OrchestratorError::UnknownInstance(unknown.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AggregateConfig, ScenarioStep};
    use crate::cluster::Teardown;
    use crate::testing::{launch_members, ScriptedEngine};
    use ensemble_env::Value;

    fn zb(value: f64) -> ScriptedEngine {
        ScriptedEngine::new(1.0).with_var("zb", Value::array(&[value, value]))
    }

    #[test]
    fn test_schedule_fires_once_per_long_tick() {
        let mut schedule = AggregationSchedule::new(10.0);
        assert!(schedule.is_due(0.0));
        schedule.advance(0.0);
        assert_eq!(schedule.boundary(), 10.0);

        assert!(!schedule.is_due(9.0));
        schedule.advance(35.0);
        assert_eq!(schedule.boundary(), 40.0);
    }

    #[test]
    fn test_initial_set_without_scenario_is_every_instance() {
        let config = OrchestratorConfig {
            instances: vec!["a".into()],
            scenario: vec![ScenarioStep::new(10.0, &["b"])],
            ..Default::default()
        };
        let controller = ScenarioController::new(&config).unwrap();
        assert_eq!(controller.running().names(), vec!["a", "b"]);
        assert!(!controller.is_terminal());
    }

    #[tokio::test]
    async fn test_transition_exchanges_then_swaps() {
        let config = OrchestratorConfig {
            scenario: vec![ScenarioStep::new(0.0, &["a"]), ScenarioStep::new(5.0, &["b"])],
            exchange: vec!["zb".into()],
            ..Default::default()
        };
        let mut controller = ScenarioController::new(&config).unwrap();
        controller.seed_initial(0.0).unwrap();
        assert_eq!(controller.running().names(), vec!["a"]);
        assert_eq!(controller.cursor(), 0);

        let a = zb(7.0).starting_at(3.0);
        let (cluster, mut members) = launch_members(vec![("a", a), ("b", zb(0.0))]).await;

        assert_eq!(controller.tick(&mut members, 4.0).await.unwrap(), TickOutcome::Idle);
        let outcome = controller.tick(&mut members, 5.0).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Transitioned { .. }));
        assert_eq!(controller.running().names(), vec!["b"]);
        assert_eq!(controller.cursor(), 1);
        assert!(controller.is_terminal());

        let b = members[&EngineId::new("b")].get_variable("zb").await.unwrap();
        assert_eq!(b, Value::array(&[7.0, 7.0]));
        // The incoming engine was synchronized with the outgoing one
        assert_eq!(members[&EngineId::new("b")].current_time().await.unwrap(), 3.0);
        cluster.release().await;
    }

    #[tokio::test]
    async fn test_newcomer_starts_behind_and_is_held_until_handover() {
        let config = OrchestratorConfig {
            scenario: vec![ScenarioStep::new(0.0, &["a"]), ScenarioStep::new(5.0, &["b"])],
            exchange: vec!["zb".into()],
            transition_time: Some(2.0),
            ..Default::default()
        };
        let mut controller = ScenarioController::new(&config).unwrap();
        controller.seed_initial(0.0).unwrap();
        let (cluster, mut members) =
            launch_members(vec![("a", zb(7.0).starting_at(5.0)), ("b", zb(0.0))]).await;

        let outcome = controller.tick(&mut members, 5.0).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Transitioned { .. }));
        assert_eq!(controller.handover(), Some(5.0));
        let b = EngineId::new("b");
        assert_eq!(members[&b].current_time().await.unwrap(), 3.0);
        assert_eq!(members[&b].get_variable("zb").await.unwrap(), Value::array(&[7.0, 7.0]));

        // Whatever the engine does to its state before the handover is overwritten
        let drifted = Value::array(&[1.0, 1.0]);
        members.get_mut(&b).unwrap().set_variable("zb", drifted.clone()).await.unwrap();
        assert!(controller.hold_transition(&mut members).await);
        assert_eq!(members[&b].get_variable("zb").await.unwrap(), Value::array(&[7.0, 7.0]));

        // From the handover on the engine is left alone
        members.get_mut(&b).unwrap().update(Some(2.0)).await.unwrap();
        members.get_mut(&b).unwrap().set_variable("zb", drifted.clone()).await.unwrap();
        assert!(!controller.hold_transition(&mut members).await);
        assert_eq!(controller.handover(), None);
        assert_eq!(members[&b].get_variable("zb").await.unwrap(), drifted);
        cluster.release().await;
    }

    #[tokio::test]
    async fn test_engine_kept_across_transition_is_not_held() {
        let config = OrchestratorConfig {
            scenario: vec![ScenarioStep::new(0.0, &["a"]), ScenarioStep::new(5.0, &["a"])],
            exchange: vec!["zb".into()],
            transition_time: Some(2.0),
            ..Default::default()
        };
        let mut controller = ScenarioController::new(&config).unwrap();
        controller.seed_initial(0.0).unwrap();
        let (cluster, mut members) = launch_members(vec![("a", zb(7.0).starting_at(5.0))]).await;

        controller.tick(&mut members, 5.0).await.unwrap();
        assert_eq!(controller.handover(), None);
        assert_eq!(members[&EngineId::new("a")].current_time().await.unwrap(), 5.0);
        cluster.release().await;
    }

    #[tokio::test]
    async fn test_aggregation_takes_precedence_over_scenario() {
        let config = OrchestratorConfig {
            instances: vec!["a".into(), "b".into()],
            scenario: vec![ScenarioStep::new(1.0, &["b"])],
            exchange: vec!["zb".into()],
            aggregate: Some(AggregateConfig {
                interval: 10.0,
                method: Default::default(),
                options: Default::default(),
            }),
            ..Default::default()
        };
        let mut controller = ScenarioController::new(&config).unwrap();
        controller.seed_initial(0.0).unwrap();
        let (cluster, mut members) = launch_members(vec![("a", zb(1.0)), ("b", zb(3.0))]).await;

        let outcome = controller.tick(&mut members, 1.0).await.unwrap();
        assert_eq!(outcome, TickOutcome::Aggregated { boundary: 0.0 });
        assert_eq!(controller.cursor(), 0);
        assert_eq!(controller.aggregated().get("zb"), Some(&Value::array(&[2.0, 2.0])));
        // Both members now hold the mean
        let a = members[&EngineId::new("a")].get_variable("zb").await.unwrap();
        assert_eq!(a, Value::array(&[2.0, 2.0]));

        let outcome = controller.tick(&mut members, 1.0).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Transitioned { .. }));
        assert_eq!(controller.cursor(), 1);
        cluster.release().await;
    }

    #[tokio::test]
    async fn test_unknown_instance_fails_without_moving_cursor() {
        let config = OrchestratorConfig {
            instances: vec!["a".into()],
            ..Default::default()
        };
        let mut controller = ScenarioController::new(&config).unwrap();
        let (cluster, mut members) = launch_members(vec![("a", zb(1.0))]).await;

        let err = controller
            .switch_to(&mut members, vec![EngineId::new("ghost")])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid instance [ghost]");
        assert_eq!(controller.running().names(), vec!["a"]);
        assert_eq!(controller.cursor(), 0);
        cluster.release().await;
    }
}
