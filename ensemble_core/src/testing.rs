//! Scripted engines and launch helpers for unit tests.

use crate::cluster::Cluster;
use crate::config::OrchestratorConfig;
use crate::engine::{EngineFactory, ModelEngine};
use crate::error::ModelError;
use crate::handle::EngineHandle;
use crate::instance::{Instance, Members};
use crate::orchestrator::Orchestrator;
use crate::provision::InMemoryProvisioner;
use ensemble_env::{LocalTransport, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Engine with a scripted clock and a variable table.
///
/// Clones share the update log, set log and finalize counter, so a test keeps one
/// clone while the factory hands another to the worker.
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    time: f64,
    end: f64,
    step: f64,
    fixed_step: bool,
    vars: BTreeMap<String, Value>,
    failing_gets: HashSet<String>,
    fail_initialize: bool,
    panic_on_update: bool,
    dt_log: Arc<Mutex<Vec<Option<f64>>>>,
    set_log: Arc<Mutex<Vec<String>>>,
    finalized: Arc<Mutex<usize>>,
}

impl ScriptedEngine {
    /// Engine at time 0 whose native step is `step`.
    pub fn new(step: f64) -> Self {
        Self {
            time: 0.0,
            end: 100.0,
            step,
            fixed_step: false,
            vars: BTreeMap::new(),
            failing_gets: HashSet::new(),
            fail_initialize: false,
            panic_on_update: false,
            dt_log: Arc::new(Mutex::new(Vec::new())),
            set_log: Arc::new(Mutex::new(Vec::new())),
            finalized: Arc::new(Mutex::new(0)),
        }
    }

    pub fn starting_at(mut self, time: f64) -> Self {
        self.time = time;
        self
    }

    pub fn ending_at(mut self, end: f64) -> Self {
        self.end = end;
        self
    }

    pub fn with_var(mut self, name: &str, value: Value) -> Self {
        self.vars.insert(name.to_string(), value);
        self
    }

    /// Every `update` advances by the native step, whatever `dt` asks for.
    pub fn fixed_step(mut self) -> Self {
        self.fixed_step = true;
        self
    }

    pub fn failing_get(mut self, name: &str) -> Self {
        self.failing_gets.insert(name.to_string());
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn panicking_on_update(mut self) -> Self {
        self.panic_on_update = true;
        self
    }

    /// The `dt` of every `update` call, in order.
    pub fn dt_log(&self) -> Arc<Mutex<Vec<Option<f64>>>> {
        self.dt_log.clone()
    }

    /// The variable name of every `set_value` call, in order.
    pub fn set_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.set_log.clone()
    }

    pub fn finalize_count(&self) -> Arc<Mutex<usize>> {
        self.finalized.clone()
    }
}

impl ModelEngine for ScriptedEngine {
    fn initialize(&mut self) -> Result<(), ModelError> {
        if self.fail_initialize {
            return Err(ModelError::failed("scripted initialize failure"));
        }
        Ok(())
    }

    fn update(&mut self, dt: Option<f64>) -> Result<f64, ModelError> {
        if self.panic_on_update {
            panic!("scripted panic");
        }
        self.dt_log.lock().unwrap().push(dt);
        let elapsed = match dt {
            Some(dt) if !self.fixed_step => dt,
            _ => self.step,
        };
        self.time += elapsed;
        Ok(elapsed)
    }

    fn current_time(&self) -> Result<f64, ModelError> {
        Ok(self.time)
    }

    fn end_time(&self) -> Result<f64, ModelError> {
        Ok(self.end)
    }

    fn get_value(&self, name: &str) -> Result<Value, ModelError> {
        if self.failing_gets.contains(name) {
            return Err(ModelError::failed(format!("scripted failure reading {}", name)));
        }
        self.vars
            .get(name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownVariable(name.to_string()))
    }

    fn set_value(&mut self, name: &str, value: Value) -> Result<(), ModelError> {
        self.set_log.lock().unwrap().push(name.to_string());
        self.vars.insert(name.to_string(), value);
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), ModelError> {
        *self.finalized.lock().unwrap() += 1;
        Ok(())
    }
}

/// Hands out a clone of the scripted engine registered under each instance name.
#[derive(Debug, Clone, Default)]
pub struct FixtureFactory {
    engines: HashMap<String, ScriptedEngine>,
}

impl FixtureFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, engine: ScriptedEngine) -> Self {
        self.engines.insert(name.to_string(), engine);
        self
    }
}

impl EngineFactory for FixtureFactory {
    fn create(&self, instance: &Instance) -> Result<Box<dyn ModelEngine>, ModelError> {
        self.engines
            .get(instance.id.as_str())
            .cloned()
            .map(|engine| Box::new(engine) as Box<dyn ModelEngine>)
            .ok_or_else(|| ModelError::failed(format!("no fixture for {}", instance.id)))
    }
}

fn factory(engines: Vec<(&str, ScriptedEngine)>) -> FixtureFactory {
    engines
        .into_iter()
        .fold(FixtureFactory::new(), |factory, (name, engine)| factory.with(name, engine))
}

/// Starts a cluster hosting `engines` and returns its handles.
pub async fn launch_members(
    engines: Vec<(&str, ScriptedEngine)>,
) -> (Box<Cluster>, Members<EngineHandle<LocalTransport>>) {
    let instances = engines.iter().map(|(name, _)| Instance::new(*name)).collect();
    let (cluster, members) = Cluster::launch(instances, Arc::new(factory(engines)), None)
        .await
        .unwrap();
    (Box::new(cluster), members)
}

/// Launches a full orchestrator over `engines`.
pub async fn launch_fixture(
    config: OrchestratorConfig,
    engines: Vec<(&str, ScriptedEngine)>,
) -> Orchestrator<EngineHandle<LocalTransport>> {
    Orchestrator::launch(config, &InMemoryProvisioner, Arc::new(factory(engines)))
        .await
        .unwrap()
}
