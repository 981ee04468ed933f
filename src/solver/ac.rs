//! Small-signal AC analysis.

use std::f64::consts::PI;
use std::time::Instant;

use log::{debug, info};
use num_complex::Complex64;

use crate::circuit::{AcDrive, Circuit, CircuitState, Domain, InitMode};
use crate::error::{Result, SimError};

use super::config::{AcConfig, SimulationConfig};
use super::export::ExportData;
use super::op::solve_operating_point;
use super::stats::SolverStats;

/// Frequency sweep around the DC operating point.
#[derive(Debug, Clone)]
pub struct AcAnalysis {
    pub config: SimulationConfig,
    pub sweep: AcConfig,
}

impl AcAnalysis {
    pub fn new(config: SimulationConfig, sweep: AcConfig) -> Self {
        Self { config, sweep }
    }

    /// Run the sweep, firing `export` once per frequency.
    pub fn run<F>(&self, circuit: &mut Circuit, stats: &mut SolverStats, mut export: F) -> Result<()>
    where
        F: FnMut(&ExportData),
    {
        stats.clear();
        let frequencies = self.sweep.frequencies()?;
        info!(
            "AC analysis: {} points from {:.3e} Hz to {:.3e} Hz",
            frequencies.len(),
            self.sweep.start,
            self.sweep.stop
        );
        let mut state = prepare_small_signal(circuit, &self.config, stats)?;
        state.ac_drive = AcDrive::Sources;

        for &frequency in &frequencies {
            solve_at(circuit, &mut state, frequency, stats)?;
            export(&ExportData::new(&state, circuit).at_frequency(frequency));
        }
        state.matrix.set_complex(false);
        stats.reorders = state.matrix.reorders();
        info!("AC analysis done");
        Ok(())
    }
}

/// Bind, solve the operating point and linearize every device around it.
pub(crate) fn prepare_small_signal(
    circuit: &mut Circuit,
    config: &SimulationConfig,
    stats: &mut SolverStats,
) -> Result<CircuitState> {
    let mut state = circuit.bind(config, 2)?;
    circuit.temperature(&state)?;
    state.domain = Domain::Dc;
    state.use_dc = true;
    solve_operating_point(circuit, &mut state, config, stats, InitMode::Junction)?;

    // One more load at the solution stores the small-signal parameters
    state.init = InitMode::SmallSignal;
    state.clear_real();
    circuit.load(&mut state);
    state.init = InitMode::Float;

    state.domain = Domain::Frequency;
    state.matrix.set_complex(true);
    Ok(state)
}

/// Assemble and factor the complex system at `frequency` and solve it for
/// the active AC drive.
pub(crate) fn solve_at(
    circuit: &mut Circuit,
    state: &mut CircuitState,
    frequency: f64,
    stats: &mut SolverStats,
) -> Result<()> {
    state.laplace = Complex64::new(0.0, 2.0 * PI * frequency);

    let started = Instant::now();
    state.clear_complex();
    circuit.load_ac(state);
    stats.load_time += started.elapsed();

    let started = Instant::now();
    state
        .matrix
        .factor()
        .map_err(|p| SimError::SingularMatrix { row: p.row, col: p.col })?;
    let mut rhs = state.complex_rhs.clone();
    state.matrix.solve_complex(&mut rhs, &mut state.complex_solution);
    stats.solve_time += started.elapsed();
    debug!("AC point {:.4e} Hz solved", frequency);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Capacitor, Resistor, VoltageSource};
    use approx::assert_relative_eq;

    #[test]
    fn test_rc_lowpass_corner() {
        let r = 1e3;
        let c = 1e-6;
        let corner = 1.0 / (2.0 * PI * r * c);
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", "in", "0", 0.0).with_ac(1.0, 0.0)).unwrap();
        circuit.add(Resistor::new("R1", "in", "out", r)).unwrap();
        circuit.add(Capacitor::new("C1", "out", "0", c)).unwrap();

        let analysis = AcAnalysis::new(SimulationConfig::default(), AcConfig::linear(1, corner, corner));
        let mut points = Vec::new();
        analysis
            .run(&mut circuit, &mut SolverStats::new(), |data| {
                points.push((data.magnitude("out").unwrap(), data.phase("out").unwrap()));
            })
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_relative_eq!(points[0].0, 1.0 / 2f64.sqrt(), epsilon = 1e-9);
        assert_relative_eq!(points[0].1, -45.0, epsilon = 1e-6);
    }
}
