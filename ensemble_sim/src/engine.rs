//! Synthetic relaxation engine used by the simulator and its tests.
//!
//! Each engine carries one bed profile `zb` that relaxes exponentially toward
//! a target level in fixed native steps. Requests for an arbitrary `dt` are
//! rounded up to whole steps, so engines with different step sizes overshoot
//! by different amounts, which is what the synchronizer has to cope with.

use crate::config::EngineParams;
use ensemble_core::{EngineFactory, Instance, ModelEngine, ModelError, Shape, Value};
use nalgebra::DVector;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;
use tracing::debug;

/// Name of the bed-level variable every relaxation engine exposes.
pub const BED_LEVEL: &str = "zb";

/// Fixed-step engine relaxing `zb` toward a target level.
pub struct RelaxationEngine {
    name: String,
    params: EngineParams,
    time: f64,
    zb: DVector<f64>,

    /// Noise source, seeded per engine
    rng: ChaCha8Rng,
    noise: Option<Normal<f64>>,

    initialized: bool,
}

impl RelaxationEngine {
    pub fn new(name: &str, params: EngineParams, seed: u64) -> Result<Self, ModelError> {
        let noise = if params.noise > 0.0 {
            Some(Normal::new(0.0, params.noise).map_err(|e| ModelError::failed(e.to_string()))?)
        } else {
            None
        };

        Ok(Self {
            name: name.to_string(),
            time: params.start,
            zb: DVector::from_element(params.cells, params.initial),
            rng: ChaCha8Rng::seed_from_u64(seed),
            noise,
            initialized: false,
            params,
        })
    }

    fn step_once(&mut self) {
        let alpha = 1.0 - (-self.params.rate * self.params.step).exp();
        let target = self.params.target;
        self.zb.apply(|z| *z += (target - *z) * alpha);

        if let Some(noise) = self.noise {
            for z in self.zb.iter_mut() {
                *z += noise.sample(&mut self.rng);
            }
        }
        self.time += self.params.step;
    }

    fn ensure_initialized(&self) -> Result<(), ModelError> {
        if self.initialized {
            Ok(())
        } else {
            Err(ModelError::NotInitialized)
        }
    }
}

impl ModelEngine for RelaxationEngine {
    fn initialize(&mut self) -> Result<(), ModelError> {
        self.initialized = true;
        debug!(engine = %self.name, cells = self.params.cells, step = self.params.step, "Engine initialized");
        Ok(())
    }

    fn update(&mut self, dt: Option<f64>) -> Result<f64, ModelError> {
        self.ensure_initialized()?;
        let steps = match dt {
            Some(dt) if dt > 0.0 => (dt / self.params.step).ceil().max(1.0) as u64,
            Some(_) => 0,
            None => 1,
        };

        let before = self.time;
        for _ in 0..steps {
            self.step_once();
        }
        Ok(self.time - before)
    }

    fn current_time(&self) -> Result<f64, ModelError> {
        Ok(self.time)
    }

    fn end_time(&self) -> Result<f64, ModelError> {
        Ok(self.params.end)
    }

    fn get_value(&self, name: &str) -> Result<Value, ModelError> {
        self.ensure_initialized()?;
        if self.params.failing.iter().any(|f| f == name) {
            return Err(ModelError::failed(format!("reading {} is configured to fail", name)));
        }
        match name {
            BED_LEVEL => Ok(Value::Array(self.zb.clone())),
            _ => Err(ModelError::UnknownVariable(name.to_string())),
        }
    }

    fn set_value(&mut self, name: &str, value: Value) -> Result<(), ModelError> {
        self.ensure_initialized()?;
        if name != BED_LEVEL {
            return Err(ModelError::UnknownVariable(name.to_string()));
        }

        let expected = Shape::Array(self.params.cells);
        match value {
            Value::Array(zb) if zb.len() == self.params.cells => {
                self.zb = zb;
                Ok(())
            }
            other => Err(ModelError::ShapeMismatch {
                name: name.to_string(),
                expected,
                actual: other.shape(),
            }),
        }
    }

    fn finalize(&mut self) -> Result<(), ModelError> {
        debug!(engine = %self.name, time = self.time, "Engine finalized");
        self.initialized = false;
        Ok(())
    }
}

/// Builds relaxation engines from per-instance parameters.
#[derive(Debug, Clone, Default)]
pub struct RelaxationFactory {
    engines: BTreeMap<String, EngineParams>,
    seed: u64,
}

impl RelaxationFactory {
    pub fn new(engines: BTreeMap<String, EngineParams>, seed: u64) -> Self {
        Self { engines, seed }
    }

    /// Per-instance seed: same master seed and name give the same noise.
    fn seed_for(&self, name: &str) -> u64 {
        name.bytes()
            .fold(self.seed, |h, b| h.wrapping_mul(0x9e3779b97f4a7c15) ^ b as u64)
    }
}

impl EngineFactory for RelaxationFactory {
    fn create(&self, instance: &Instance) -> Result<Box<dyn ModelEngine>, ModelError> {
        let name = instance.id.as_str();
        let params = self.engines.get(name).cloned().unwrap_or_default();
        let engine = RelaxationEngine::new(name, params, self.seed_for(name))?;
        Ok(Box::new(engine))
    }
}
