//! Small-signal frequency-domain analysis.

use std::f64::consts::PI;

use log::debug;
use num_complex::Complex64;

use crate::error::{NodalError, Result};

use super::Simulation;

/// Frequency of the point being computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyState {
    /// Frequency in hertz.
    pub frequency: f64,
    /// `s = j * 2 * pi * f`.
    pub laplace: Complex64,
}

impl FrequencyState {
    pub fn new(frequency: f64) -> Self {
        Self {
            frequency,
            laplace: Complex64::new(0.0, 2.0 * PI * frequency),
        }
    }
}

/// The frequencies an AC analysis visits.
#[derive(Debug, Clone, PartialEq)]
pub enum FrequencySweep {
    /// Explicit points.
    List(Vec<f64>),
    /// `points` frequencies evenly spaced from `start` to `stop`.
    Linear { start: f64, stop: f64, points: usize },
    /// `points_per_decade` logarithmically spaced frequencies per decade.
    Decade {
        start: f64,
        stop: f64,
        points_per_decade: usize,
    },
}

impl FrequencySweep {
    pub fn points(&self) -> Result<Vec<f64>> {
        match *self {
            FrequencySweep::List(ref points) => {
                if points.iter().any(|f| !(f.is_finite() && *f >= 0.0)) {
                    return Err(NodalError::invalid_simulation(
                        "frequencies must be finite and non-negative",
                    ));
                }
                Ok(points.clone())
            }
            FrequencySweep::Linear { start, stop, points } => {
                if points == 0 || start < 0.0 || stop < start {
                    return Err(NodalError::invalid_simulation(format!(
                        "invalid linear sweep {start}..{stop} with {points} points"
                    )));
                }
                if points == 1 {
                    return Ok(vec![start]);
                }
                let step = (stop - start) / (points - 1) as f64;
                Ok((0..points).map(|i| start + step * i as f64).collect())
            }
            FrequencySweep::Decade {
                start,
                stop,
                points_per_decade,
            } => {
                if points_per_decade == 0 || start <= 0.0 || stop < start {
                    return Err(NodalError::invalid_simulation(format!(
                        "invalid decade sweep {start}..{stop} with {points_per_decade} points per decade"
                    )));
                }
                let ratio = 10f64.powf(1.0 / points_per_decade as f64);
                // Tolerance against the accumulated rounding of repeated multiplication
                let limit = stop * (1.0 + 1e-9);
                let mut points = Vec::new();
                let mut f = start;
                while f <= limit {
                    points.push(f);
                    f *= ratio;
                }
                Ok(points)
            }
        }
    }
}

/// Complex solutions of an AC sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcResult {
    pub frequencies: Vec<f64>,
    /// One solution per frequency, indexed by variable; entry 0 is ground.
    pub solutions: Vec<Vec<Complex64>>,
}

impl AcResult {
    /// `(frequency, value)` pairs of one variable.
    pub fn series(&self, index: usize) -> Vec<(f64, Complex64)> {
        self.frequencies
            .iter()
            .zip(&self.solutions)
            .map(|(&f, solution)| (f, solution.get(index).copied().unwrap_or_default()))
            .collect()
    }
}

impl Simulation {
    /// Linearize around the operating point and sweep the frequency.
    pub fn ac(&mut self, sweep: &FrequencySweep) -> Result<AcResult> {
        let frequencies = sweep.points()?;
        self.operating_point()?;

        let size = self.variables.len();
        let mut result = AcResult::default();
        for &f in &frequencies {
            let frequency = FrequencyState::new(f);
            self.complex.reset();
            self.behaviors
                .load_frequency(&self.state, &frequency, &mut self.complex)?;
            self.complex.factor()?;
            let mut solution = vec![Complex64::default(); size + 1];
            self.complex.solve(&mut solution)?;
            result.solutions.push(solution);
        }
        result.frequencies = frequencies;
        debug!("ac sweep finished: {} points", result.frequencies.len());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::Circuit;
    use crate::components::{Capacitor, Resistor, VoltageSource};
    use crate::simulation::BiasingConfig;
    use approx::assert_relative_eq;

    #[test]
    fn test_decade_sweep_points() {
        let sweep = FrequencySweep::Decade {
            start: 1.0,
            stop: 100.0,
            points_per_decade: 3,
        };
        let points = sweep.points().unwrap();
        assert_eq!(points.len(), 7);
        assert_relative_eq!(points[3], 10.0, max_relative = 1e-12);
        assert!(FrequencySweep::Linear { start: 1.0, stop: 0.5, points: 3 }.points().is_err());
    }

    #[test]
    fn test_rc_lowpass_corner() {
        let corner = 1.0 / (2.0 * PI * 1e3 * 1e-6);
        let mut circuit = Circuit::new();
        circuit
            .add(VoltageSource::new("V1", "in", "0", 0.0).with_ac(1.0, 0.0))
            .unwrap()
            .add(Resistor::new("R1", "in", "out", 1e3))
            .unwrap()
            .add(Capacitor::new("C1", "out", "0", 1e-6))
            .unwrap();
        let mut sim = Simulation::new(&circuit, BiasingConfig::default()).unwrap();
        let result = sim.ac(&FrequencySweep::List(vec![1e-3, corner])).unwrap();
        let out = sim.variables().get("out").unwrap().index();
        let series = result.series(out);
        assert_relative_eq!(series[0].1.norm(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(series[1].1.norm(), 1.0 / 2f64.sqrt(), epsilon = 1e-9);
        assert_relative_eq!(series[1].1.arg(), -PI / 4.0, epsilon = 1e-9);
    }
}
