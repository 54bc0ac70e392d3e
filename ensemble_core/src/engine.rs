//! The native engine seam: what runs inside each worker.

use crate::error::ModelError;
use crate::instance::Instance;
use ensemble_env::Value;

/// A step-based simulation engine, driven synchronously by its worker.
///
/// The orchestrator never calls this directly. Each engine lives on its own
/// rank and is reached only through [`crate::EngineHandle`].
pub trait ModelEngine: Send {
    fn initialize(&mut self) -> Result<(), ModelError>;

    /// Advances simulated time and returns the time actually elapsed.
    ///
    /// With `Some(dt)` the engine should cover `dt`, though it may overshoot
    /// or undershoot by its own step size. With `None` it takes one native step.
    fn update(&mut self, dt: Option<f64>) -> Result<f64, ModelError>;

    fn current_time(&self) -> Result<f64, ModelError>;

    fn end_time(&self) -> Result<f64, ModelError>;

    fn get_value(&self, name: &str) -> Result<Value, ModelError>;

    fn set_value(&mut self, name: &str, value: Value) -> Result<(), ModelError>;

    fn finalize(&mut self) -> Result<(), ModelError>;
}

/// Builds one engine per provisioned instance.
pub trait EngineFactory: Send + Sync {
    fn create(&self, instance: &Instance) -> Result<Box<dyn ModelEngine>, ModelError>;
}

impl<F> EngineFactory for F
where
    F: Fn(&Instance) -> Result<Box<dyn ModelEngine>, ModelError> + Send + Sync,
{
    fn create(&self, instance: &Instance) -> Result<Box<dyn ModelEngine>, ModelError> {
        self(instance)
    }
}
