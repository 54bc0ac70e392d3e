//! The control surface shared by single engines and whole orchestrators.

use crate::instance::EngineId;
use async_trait::async_trait;
use ensemble_env::Value;

/// Everything the orchestration layers may ask of an engine.
///
/// Implemented by [`crate::EngineHandle`] for one remote engine and by
/// [`crate::Orchestrator`] for a composite, so an orchestrator can host other
/// orchestrators as members.
#[async_trait]
pub trait ControlSurface: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn id(&self) -> &EngineId;

    async fn initialize(&mut self) -> Result<(), Self::Error>;

    /// Advances by `dt`, or lets the engine pick its step when `None`.
    /// Returns the elapsed simulated time.
    async fn update(&mut self, dt: Option<f64>) -> Result<f64, Self::Error>;

    async fn current_time(&self) -> Result<f64, Self::Error>;

    async fn end_time(&self) -> Result<f64, Self::Error>;

    async fn get_variable(&self, name: &str) -> Result<Value, Self::Error>;

    async fn set_variable(&mut self, name: &str, value: Value) -> Result<(), Self::Error>;

    async fn finalize(&mut self) -> Result<(), Self::Error>;
}
