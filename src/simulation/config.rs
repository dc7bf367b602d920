//! Analysis configuration.

use crate::algebra::{PivotConfig, DEFAULT_ABS_THRESHOLD, DEFAULT_REL_THRESHOLD};
use crate::behaviors::ParallelFlags;
use crate::error::{NodalError, Result};

use super::integration::{IntegrationMethod, TruncationTolerances};
use super::DEFAULT_TEMPERATURE;

/// Default relative tolerance for convergence and truncation error.
pub const DEFAULT_RELTOL: f64 = 1e-3;

/// Default absolute tolerance on node voltages (volts).
pub const DEFAULT_ABSTOL: f64 = 1e-6;

/// Default absolute tolerance on branch currents (amperes).
pub const DEFAULT_CURRENT_ABSTOL: f64 = 1e-12;

/// Default Newton-Raphson iteration limit for operating points.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Default Newton-Raphson iteration limit per time point.
pub const DEFAULT_TRANSIENT_MAX_ITERATIONS: usize = 10;

/// Configuration shared by every analysis of a simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct BiasingConfig {
    pub reltol: f64,
    /// Absolute tolerance on voltages and internal variables.
    pub abstol: f64,
    /// Absolute tolerance on branch currents.
    pub current_abstol: f64,
    /// Newton-Raphson iteration limit for operating points.
    pub max_iterations: usize,
    /// Newton-Raphson iteration limit per time point.
    pub transient_max_iterations: usize,
    /// Circuit temperature in kelvin.
    pub temperature: f64,
    /// Parameter measurement temperature in kelvin.
    pub nominal_temperature: f64,
    /// Initial guesses applied before the first iteration of an operating point.
    pub nodesets: Vec<(String, f64)>,
    pub pivot_rel_threshold: f64,
    pub pivot_abs_threshold: f64,
    /// Parallel dispatch of the top-level behavior list.
    pub parallel: ParallelFlags,
    /// Run the topology checks before binding.
    pub validate: bool,
}

impl Default for BiasingConfig {
    fn default() -> Self {
        Self {
            reltol: DEFAULT_RELTOL,
            abstol: DEFAULT_ABSTOL,
            current_abstol: DEFAULT_CURRENT_ABSTOL,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            transient_max_iterations: DEFAULT_TRANSIENT_MAX_ITERATIONS,
            temperature: DEFAULT_TEMPERATURE,
            nominal_temperature: DEFAULT_TEMPERATURE,
            nodesets: Vec::new(),
            pivot_rel_threshold: DEFAULT_REL_THRESHOLD,
            pivot_abs_threshold: DEFAULT_ABS_THRESHOLD,
            parallel: ParallelFlags::none(),
            validate: true,
        }
    }
}

impl BiasingConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reltol(mut self, reltol: f64) -> Self {
        self.reltol = reltol;
        self
    }

    pub fn with_abstol(mut self, abstol: f64) -> Self {
        self.abstol = abstol;
        self
    }

    /// Set the operating point iteration limit.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the per-time-point iteration limit.
    pub fn with_transient_max_iterations(mut self, max_iterations: usize) -> Self {
        self.transient_max_iterations = max_iterations;
        self
    }

    /// Set the circuit temperature (kelvin).
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Add an initial guess for a node voltage.
    pub fn with_nodeset(mut self, node: impl Into<String>, value: f64) -> Self {
        self.nodesets.push((node.into(), value));
        self
    }

    pub fn with_pivot_thresholds(mut self, relative: f64, absolute: f64) -> Self {
        self.pivot_rel_threshold = relative;
        self.pivot_abs_threshold = absolute;
        self
    }

    pub fn with_parallel(mut self, flags: ParallelFlags) -> Self {
        self.parallel = flags;
        self
    }

    /// Skip the topology checks.
    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    pub fn pivot_config(&self) -> PivotConfig {
        PivotConfig {
            rel_threshold: self.pivot_rel_threshold,
            abs_threshold: self.pivot_abs_threshold,
        }
    }

    /// Reject nonsensical values.
    pub fn check(&self) -> Result<()> {
        if !(self.reltol > 0.0 && self.abstol > 0.0 && self.current_abstol > 0.0) {
            return Err(NodalError::invalid_simulation("tolerances must be positive"));
        }
        if self.max_iterations == 0 || self.transient_max_iterations == 0 {
            return Err(NodalError::invalid_simulation("iteration limits must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.pivot_rel_threshold) || self.pivot_abs_threshold < 0.0 {
            return Err(NodalError::invalid_simulation(format!(
                "invalid pivot thresholds ({}, {})",
                self.pivot_rel_threshold, self.pivot_abs_threshold
            )));
        }
        if self.temperature <= 0.0 || self.nominal_temperature <= 0.0 {
            return Err(NodalError::invalid_simulation("temperatures are absolute and must be positive"));
        }
        Ok(())
    }
}

/// Time-domain analysis configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TransientConfig {
    /// Nominal output step.
    pub step: f64,
    /// Final time.
    pub stop: f64,
    max_step: Option<f64>,
    min_step: Option<f64>,
    pub method: IntegrationMethod,
    /// Truncation error overestimation factor.
    pub trtol: f64,
    /// Charge tolerance.
    pub chgtol: f64,
}

impl TransientConfig {
    pub fn new(step: f64, stop: f64) -> Self {
        Self {
            step,
            stop,
            max_step: None,
            min_step: None,
            method: IntegrationMethod::default(),
            trtol: 7.0,
            chgtol: 1e-14,
        }
    }

    pub fn with_max_step(mut self, max_step: f64) -> Self {
        self.max_step = Some(max_step);
        self
    }

    pub fn with_min_step(mut self, min_step: f64) -> Self {
        self.min_step = Some(min_step);
        self
    }

    pub fn with_method(mut self, method: IntegrationMethod) -> Self {
        self.method = method;
        self
    }

    /// Largest step the controller takes (`min(step, stop / 50)` unless set).
    pub fn max_step(&self) -> f64 {
        self.max_step
            .unwrap_or_else(|| self.step.min(self.stop / 50.0))
    }

    /// Step floor below which the run fails (`1e-9 * max_step` unless set).
    pub fn min_step(&self) -> f64 {
        self.min_step.unwrap_or_else(|| 1e-9 * self.max_step())
    }

    pub(crate) fn tolerances(&self, biasing: &BiasingConfig) -> TruncationTolerances {
        TruncationTolerances {
            reltol: biasing.reltol,
            abstol: biasing.current_abstol,
            chgtol: self.chgtol,
            trtol: self.trtol,
        }
    }

    pub fn check(&self) -> Result<()> {
        if !(self.step > 0.0 && self.stop > 0.0 && self.step.is_finite() && self.stop.is_finite()) {
            return Err(NodalError::invalid_simulation(format!(
                "step ({}) and stop ({}) must be positive",
                self.step, self.stop
            )));
        }
        if !(self.min_step() > 0.0 && self.min_step() < self.max_step()) {
            return Err(NodalError::invalid_simulation(format!(
                "minimum step {} must be positive and below the maximum step {}",
                self.min_step(),
                self.max_step()
            )));
        }
        Ok(())
    }
}
