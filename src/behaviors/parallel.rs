//! Parallel behavior groups.
//!
//! A [`BehaviorGroup`] runs one capability over a list of behavior
//! containers, either sequentially in list order or fanned out over the
//! rayon pool. Every fan-out is a fork-join: all tasks run to completion
//! and the first failure in list order is reported after the join.
//!
//! Loads are recorded into one [`StampBuffer`] per container and replayed
//! in list order afterwards, so a parallel load performs the exact same
//! floating-point additions as a sequential one. Containers dispatched
//! concurrently must still not share mutable state outside their handles;
//! the group cannot verify that.

use log::trace;
use num_complex::Complex64;
use rayon::prelude::*;

use super::BehaviorContainer;
use crate::algebra::{StampBuffer, StampSink};
use crate::error::Result;
use crate::simulation::{FrequencyState, SimulationState};

/// Which operations of a group are dispatched in parallel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParallelFlags {
    pub temperature: bool,
    pub load: bool,
    pub convergence: bool,
    pub time: bool,
    pub accept: bool,
    pub frequency: bool,
}

impl ParallelFlags {
    /// Everything sequential.
    pub fn none() -> Self {
        Self::default()
    }

    /// Everything parallel.
    pub fn all() -> Self {
        Self {
            temperature: true,
            load: true,
            convergence: true,
            time: true,
            accept: true,
            frequency: true,
        }
    }

    pub fn any(&self) -> bool {
        self.temperature || self.load || self.convergence || self.time || self.accept || self.frequency
    }
}

/// A list of behavior containers with a parallel execution policy.
#[derive(Debug, Default)]
pub struct BehaviorGroup {
    containers: Vec<BehaviorContainer>,
    flags: ParallelFlags,
    buffers: Vec<StampBuffer<f64>>,
    complex_buffers: Vec<StampBuffer<Complex64>>,
}

/// Join the results of every task, keeping the first failure in list order.
fn join(results: Vec<Result<()>>) -> Result<()> {
    results.into_iter().collect()
}

impl BehaviorGroup {
    pub fn new(flags: ParallelFlags) -> Self {
        Self {
            containers: Vec::new(),
            flags,
            buffers: Vec::new(),
            complex_buffers: Vec::new(),
        }
    }

    pub fn push(&mut self, container: BehaviorContainer) {
        self.containers.push(container);
    }

    pub fn flags(&self) -> ParallelFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: ParallelFlags) {
        self.flags = flags;
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn containers(&self) -> &[BehaviorContainer] {
        &self.containers
    }

    /// Run a fallible operation on every container.
    fn for_each<F>(&mut self, parallel: bool, operation: F) -> Result<()>
    where
        F: Fn(&mut BehaviorContainer) -> Result<()> + Sync + Send,
    {
        if parallel {
            let results: Vec<Result<()>> = self.containers.par_iter_mut().map(operation).collect();
            join(results)
        } else {
            join(self.containers.iter_mut().map(operation).collect())
        }
    }

    pub fn temperature(&mut self, state: &SimulationState) -> Result<()> {
        self.for_each(self.flags.temperature, |c| c.temperature(state))
    }

    pub fn load(&mut self, state: &SimulationState, sink: &mut dyn StampSink<f64>) -> Result<()> {
        if !self.flags.load {
            return join(self.containers.iter_mut().map(|c| c.load(state, sink)).collect());
        }

        self.buffers.resize_with(self.containers.len(), StampBuffer::new);
        let results: Vec<Result<()>> = self
            .containers
            .par_iter_mut()
            .zip(self.buffers.par_iter_mut())
            .map(|(container, buffer)| container.load(state, buffer))
            .collect();
        let mut recorded = 0;
        for buffer in &mut self.buffers {
            recorded += buffer.len();
            buffer.drain_into(sink);
        }
        trace!("replayed {recorded} contributions from {} containers", self.containers.len());
        join(results)
    }

    /// AND-reduction over every container; all of them are always asked.
    pub fn is_convergent(&mut self, state: &SimulationState) -> bool {
        if self.flags.convergence {
            let flags: Vec<bool> = self
                .containers
                .par_iter_mut()
                .map(|c| c.is_convergent(state))
                .collect();
            flags.into_iter().all(|ok| ok)
        } else {
            self.containers
                .iter_mut()
                .fold(true, |converged, c| c.is_convergent(state) && converged)
        }
    }

    pub fn initialize_states(&mut self, state: &SimulationState) -> Result<()> {
        self.for_each(self.flags.time, |c| c.initialize_states(state))
    }

    /// Smallest step any container allows.
    pub fn truncate(&mut self, state: &SimulationState) -> f64 {
        if self.flags.time {
            self.containers
                .par_iter_mut()
                .map(|c| c.truncate(state))
                .reduce(|| f64::INFINITY, f64::min)
        } else {
            self.containers
                .iter_mut()
                .map(|c| c.truncate(state))
                .fold(f64::INFINITY, f64::min)
        }
    }

    /// Earliest breakpoint after `time` over all containers.
    pub fn next_breakpoint(&mut self, time: f64) -> Option<f64> {
        self.containers
            .iter_mut()
            .filter_map(|c| c.next_breakpoint(time))
            .reduce(f64::min)
    }

    pub fn accept(&mut self, state: &SimulationState) {
        if self.flags.accept {
            self.containers.par_iter_mut().for_each(|c| c.accept(state));
        } else {
            self.containers.iter_mut().for_each(|c| c.accept(state));
        }
    }

    pub fn load_frequency(
        &mut self,
        state: &SimulationState,
        frequency: &FrequencyState,
        sink: &mut dyn StampSink<Complex64>,
    ) -> Result<()> {
        if !self.flags.frequency {
            return join(
                self.containers
                    .iter_mut()
                    .map(|c| c.load_frequency(state, frequency, sink))
                    .collect(),
            );
        }

        self.complex_buffers
            .resize_with(self.containers.len(), StampBuffer::new);
        let results: Vec<Result<()>> = self
            .containers
            .par_iter_mut()
            .zip(self.complex_buffers.par_iter_mut())
            .map(|(container, buffer)| container.load_frequency(state, frequency, buffer))
            .collect();
        for buffer in &mut self.complex_buffers {
            buffer.drain_into(sink);
        }
        join(results)
    }

    pub fn unbind(&mut self) {
        for container in &mut self.containers {
            container.unbind();
        }
    }
}
