//! Time synchronizer: brings a set of engines to one reference time.

use crate::config::Limits;
use crate::instance::{EngineId, Members};
use crate::surface::ControlSurface;
use tracing::{debug, warn};

/// Drives laggards in a set up to the set's reference time.
///
/// Engines may overshoot or undershoot a requested interval, so catch-up
/// repeats `update(reference - now)` until the engine reaches the reference.
/// The interval passed is always strictly positive.
#[derive(Debug, Clone, Copy)]
pub struct TimeSynchronizer {
    max_catch_up_steps: Option<usize>,
}

impl TimeSynchronizer {
    pub fn new(limits: &Limits) -> Self {
        Self {
            max_catch_up_steps: limits.max_catch_up_steps,
        }
    }

    /// Maximum current time over `set`, plus `dt` when a positive one is given.
    ///
    /// Members whose clock cannot be read are skipped. `None` if no member answers.
    pub async fn reference_time<E: ControlSurface>(
        &self,
        members: &Members<E>,
        set: &[EngineId],
        dt: Option<f64>,
    ) -> Option<f64> {
        let mut latest: Option<f64> = None;
        for id in set {
            let Some(engine) = members.get(id) else {
                continue;
            };
            match engine.current_time().await {
                Ok(t) => latest = Some(latest.map_or(t, |l| l.max(t))),
                Err(e) => warn!(engine = %id, "Skipping engine in reference time: {}", e),
            }
        }

        let step = dt.filter(|dt| *dt > 0.0).unwrap_or(0.0);
        latest.map(|t| t + step)
    }

    /// Brings every engine in `set` to the reference time. Returns the reference used.
    pub async fn synchronize<E: ControlSurface>(
        &self,
        members: &mut Members<E>,
        set: &[EngineId],
        dt: Option<f64>,
    ) -> Option<f64> {
        let reference = self.reference_time(members, set, dt).await?;
        debug!(reference, engines = set.len(), "Synchronizing");

        for id in set {
            if let Some(engine) = members.get_mut(id) {
                self.catch_up(engine, reference).await;
            }
        }
        Some(reference)
    }

    /// Advances one engine until its clock reaches `reference`.
    ///
    /// Gives up on the engine (with a warning) if a call fails or the step
    /// bound is hit; the pass continues with the next engine.
    pub async fn catch_up<E: ControlSurface>(&self, engine: &mut E, reference: f64) {
        let mut steps = 0usize;
        loop {
            let now = match engine.current_time().await {
                Ok(t) => t,
                Err(e) => {
                    warn!(engine = %engine.id(), "Abandoning catch-up: {}", e);
                    return;
                }
            };
            if now >= reference {
                return;
            }

            if let Some(limit) = self.max_catch_up_steps {
                if steps >= limit {
                    warn!(
                        engine = %engine.id(),
                        now,
                        reference,
                        "Engine not caught up after {} steps, abandoning catch-up",
                        limit
                    );
                    return;
                }
            }

            if let Err(e) = engine.update(Some(reference - now)).await {
                warn!(engine = %engine.id(), "Abandoning catch-up: {}", e);
                return;
            }
            steps += 1;
        }
    }
}
