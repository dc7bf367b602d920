//! Behaviors: the units of computation an entity contributes to a simulation.
//!
//! A behavior implements any subset of the capability traits below. The
//! [`Behavior`] trait exposes each capability as a lookup that returns
//! `None` when it is not supported, so callers never need runtime type
//! inspection:
//!
//! ```text
//! temperature -> once before any solve
//! biasing     -> every Newton-Raphson iteration (load + convergence)
//! time        -> transient history, truncation error, breakpoints
//! accept      -> after every accepted time point
//! frequency   -> every frequency point of a small-signal sweep
//! ```

mod parallel;

pub use parallel::{BehaviorGroup, ParallelFlags};

use num_complex::Complex64;

use crate::algebra::StampSink;
use crate::error::Result;
use crate::simulation::{FrequencyState, SimulationState};

/// One-time recomputation of temperature-dependent values.
pub trait TemperatureBehavior {
    fn temperature(&mut self, state: &SimulationState) -> Result<()>;
}

/// Contribution to the real-valued Newton-Raphson system.
pub trait BiasingBehavior {
    /// Add the Jacobian and right-hand side contributions at the current iterate.
    fn load(&mut self, state: &SimulationState, sink: &mut dyn StampSink<f64>) -> Result<()>;

    /// Whether this behavior accepts the latest solution.
    ///
    /// Called after every solve, even when the solution itself has not
    /// converged yet.
    fn is_convergent(&mut self, _state: &SimulationState) -> bool {
        true
    }
}

/// Time-domain state keeping.
pub trait TimeBehavior {
    /// Seed the integration history from the operating point.
    fn initialize_states(&mut self, state: &SimulationState) -> Result<()>;

    /// Largest time step this behavior allows for the point just computed.
    fn truncate(&mut self, _state: &SimulationState) -> f64 {
        f64::INFINITY
    }

    /// The first time strictly after `time` at which the behavior changes abruptly.
    fn next_breakpoint(&mut self, _time: f64) -> Option<f64> {
        None
    }
}

/// Notification that the current time point was accepted.
pub trait AcceptBehavior {
    fn accept(&mut self, state: &SimulationState);
}

/// Contribution to the complex small-signal system.
pub trait FrequencyBehavior {
    fn load_frequency(
        &mut self,
        state: &SimulationState,
        frequency: &FrequencyState,
        sink: &mut dyn StampSink<Complex64>,
    ) -> Result<()>;
}

/// A behavior with optional capabilities.
pub trait Behavior: Send {
    /// Name of the owning entity.
    fn name(&self) -> &str;

    fn as_temperature(&mut self) -> Option<&mut dyn TemperatureBehavior> {
        None
    }

    fn as_biasing(&mut self) -> Option<&mut dyn BiasingBehavior> {
        None
    }

    fn as_time(&mut self) -> Option<&mut dyn TimeBehavior> {
        None
    }

    fn as_accept(&mut self) -> Option<&mut dyn AcceptBehavior> {
        None
    }

    fn as_frequency(&mut self) -> Option<&mut dyn FrequencyBehavior> {
        None
    }

    /// Release anything acquired at bind time.
    fn unbind(&mut self) {}
}

/// The behaviors created for one entity.
pub struct BehaviorContainer {
    entity: String,
    behaviors: Vec<Box<dyn Behavior>>,
}

impl std::fmt::Debug for BehaviorContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorContainer")
            .field("entity", &self.entity)
            .field("behaviors", &self.behaviors.len())
            .finish()
    }
}

impl BehaviorContainer {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            behaviors: Vec::new(),
        }
    }

    /// Builder-style [`Self::push`].
    pub fn with<B: Behavior + 'static>(mut self, behavior: B) -> Self {
        self.push(behavior);
        self
    }

    pub fn push<B: Behavior + 'static>(&mut self, behavior: B) {
        self.behaviors.push(Box::new(behavior));
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    /// Whether any behavior supports a capability, probed with one of the `as_*` lookups.
    pub fn supports(&mut self, probe: fn(&mut dyn Behavior) -> bool) -> bool {
        self.behaviors.iter_mut().any(|b| probe(b.as_mut()))
    }

    pub fn temperature(&mut self, state: &SimulationState) -> Result<()> {
        for behavior in &mut self.behaviors {
            if let Some(b) = behavior.as_temperature() {
                b.temperature(state)?;
            }
        }
        Ok(())
    }

    pub fn load(&mut self, state: &SimulationState, sink: &mut dyn StampSink<f64>) -> Result<()> {
        for behavior in &mut self.behaviors {
            if let Some(b) = behavior.as_biasing() {
                b.load(state, sink)?;
            }
        }
        Ok(())
    }

    /// Every behavior is asked, even after one has refused.
    pub fn is_convergent(&mut self, state: &SimulationState) -> bool {
        self.behaviors.iter_mut().fold(true, |converged, behavior| {
            let ok = behavior
                .as_biasing()
                .map_or(true, |b| b.is_convergent(state));
            converged && ok
        })
    }

    pub fn initialize_states(&mut self, state: &SimulationState) -> Result<()> {
        for behavior in &mut self.behaviors {
            if let Some(b) = behavior.as_time() {
                b.initialize_states(state)?;
            }
        }
        Ok(())
    }

    pub fn truncate(&mut self, state: &SimulationState) -> f64 {
        self.behaviors
            .iter_mut()
            .filter_map(|b| b.as_time().map(|t| t.truncate(state)))
            .fold(f64::INFINITY, f64::min)
    }

    pub fn next_breakpoint(&mut self, time: f64) -> Option<f64> {
        self.behaviors
            .iter_mut()
            .filter_map(|b| b.as_time().and_then(|t| t.next_breakpoint(time)))
            .reduce(f64::min)
    }

    pub fn accept(&mut self, state: &SimulationState) {
        for behavior in &mut self.behaviors {
            if let Some(b) = behavior.as_accept() {
                b.accept(state);
            }
        }
    }

    pub fn load_frequency(
        &mut self,
        state: &SimulationState,
        frequency: &FrequencyState,
        sink: &mut dyn StampSink<Complex64>,
    ) -> Result<()> {
        for behavior in &mut self.behaviors {
            if let Some(b) = behavior.as_frequency() {
                b.load_frequency(state, frequency, sink)?;
            }
        }
        Ok(())
    }

    pub fn unbind(&mut self) {
        for behavior in &mut self.behaviors {
            behavior.unbind();
        }
    }
}
