//! Operating point analysis and its convergence fallbacks.

use log::{debug, info, warn};

use crate::circuit::{Circuit, CircuitState, Domain, InitMode};
use crate::error::{Result, SimError};

use super::config::SimulationConfig;
use super::export::ExportData;
use super::newton::{NewtonRaphson, SolveStatus};
use super::stats::SolverStats;

/// DC operating point analysis.
#[derive(Debug, Clone, Default)]
pub struct OperatingPoint {
    pub config: SimulationConfig,
}

impl OperatingPoint {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Solve the operating point and fire `export` once.
    pub fn run<F>(&self, circuit: &mut Circuit, stats: &mut SolverStats, mut export: F) -> Result<()>
    where
        F: FnMut(&ExportData),
    {
        let state = self.solve(circuit, stats)?;
        export(&ExportData::new(&state, circuit));
        Ok(())
    }

    /// Solve the operating point and hand back the converged state.
    pub fn solve(&self, circuit: &mut Circuit, stats: &mut SolverStats) -> Result<CircuitState> {
        stats.clear();
        info!("operating point: {} devices", circuit.len());
        let mut state = circuit.bind(&self.config, 2)?;
        circuit.temperature(&state)?;
        state.domain = Domain::Dc;
        state.use_dc = true;
        solve_operating_point(circuit, &mut state, &self.config, stats, InitMode::Junction)?;
        stats.reorders = state.matrix.reorders();
        info!("operating point converged after {} iterations", stats.dc_iterations);
        Ok(state)
    }
}

/// Find the operating point, escalating through the fallbacks.
///
/// 1. Plain Newton iteration from `start`.
/// 2. With nodesets present, a solve holding them fixed followed by a
///    release from that solution.
/// 3. Gmin stepping: a large conductance from every node to ground,
///    divided by `gmin_step_factor` after each converged rung.
///
/// Only when every rung fails does the failure become an error.
pub(crate) fn solve_operating_point(
    circuit: &mut Circuit,
    state: &mut CircuitState,
    config: &SimulationConfig,
    stats: &mut SolverStats,
    start: InitMode,
) -> Result<()> {
    let newton = NewtonRaphson::new(config.dc_max_iterations);
    let mut iterations = 0;
    let initial = state.solution.clone();

    state.diag_gmin = 0.0;
    state.init = start;
    let mut status = newton.solve(circuit, state, stats);
    iterations += status.iterations();
    stats.dc_iterations += status.iterations();
    if status.is_converged() {
        return Ok(());
    }
    debug!("direct operating point failed: {:?}", status);

    if !state.nodesets.is_empty() {
        warn!("operating point: retrying with {} nodesets held", state.nodesets.len());
        state.solution.copy_from_slice(&initial);
        state.init = InitMode::Junction;
        status = newton.holding_nodesets().solve(circuit, state, stats);
        iterations += status.iterations();
        stats.dc_iterations += status.iterations();
        if status.is_converged() {
            state.init = InitMode::Float;
            status = newton.solve(circuit, state, stats);
            iterations += status.iterations();
            stats.dc_iterations += status.iterations();
            if status.is_converged() {
                return Ok(());
            }
        }
        debug!("nodeset pass failed: {:?}", status);
    }

    if config.gmin_steps > 0 {
        warn!("operating point: starting Gmin stepping");
        status = gmin_stepping(circuit, state, config, stats, &newton, &initial, &mut iterations);
        if status.is_converged() {
            return Ok(());
        }
        debug!("Gmin stepping failed: {:?}", status);
    }

    state.diag_gmin = 0.0;
    Err(match status {
        SolveStatus::Singular { row, col } => SimError::SingularMatrix { row, col },
        _ => SimError::convergence_failure("operating point", iterations),
    })
}

fn gmin_stepping(
    circuit: &mut Circuit,
    state: &mut CircuitState,
    config: &SimulationConfig,
    stats: &mut SolverStats,
    newton: &NewtonRaphson,
    initial: &[f64],
    iterations: &mut usize,
) -> SolveStatus {
    state.solution.copy_from_slice(initial);
    state.init = InitMode::Junction;
    let mut diag_gmin = config.gmin * config.gmin_step_factor.powi(config.gmin_steps as i32);
    for rung in 0..=config.gmin_steps {
        state.diag_gmin = if rung == config.gmin_steps { 0.0 } else { diag_gmin };
        debug!("Gmin step {}: diagonal gmin = {:.3e}", rung, state.diag_gmin);
        let status = newton.solve(circuit, state, stats);
        *iterations += status.iterations();
        stats.dc_iterations += status.iterations();
        stats.gmin_steps += 1;
        if !status.is_converged() {
            state.diag_gmin = 0.0;
            return status;
        }
        diag_gmin /= config.gmin_step_factor;
        state.init = InitMode::Float;
    }
    state.diag_gmin = 0.0;
    SolveStatus::Converged { iterations: *iterations }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Resistor, VoltageSource};
    use approx::assert_relative_eq;

    #[test]
    fn test_divider_exports_once() {
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", "in", "0", 100.0)).unwrap();
        circuit.add(Resistor::new("R1", "in", "out", 3.0)).unwrap();
        circuit.add(Resistor::new("R2", "out", "0", 1.0)).unwrap();
        let mut calls = 0;
        let mut stats = SolverStats::new();
        OperatingPoint::default()
            .run(&mut circuit, &mut stats, |data| {
                calls += 1;
                assert_relative_eq!(data.voltage("out").unwrap(), 25.0, epsilon = 1e-8);
                assert_eq!(data.time(), 0.0);
            })
            .unwrap();
        assert_eq!(calls, 1);
        assert!(stats.dc_iterations > 0);
        assert_eq!(stats.gmin_steps, 0);
    }

    #[test]
    fn test_nodeset_does_not_change_linear_answer() {
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", "in", "0", 10.0)).unwrap();
        circuit.add(Resistor::new("R1", "in", "out", 1e3)).unwrap();
        circuit.add(Resistor::new("R2", "out", "0", 1e3)).unwrap();
        circuit.set_nodeset("out", 3.0);
        let state = OperatingPoint::default().solve(&mut circuit, &mut SolverStats::new()).unwrap();
        let out = state.nodes.find("out").unwrap().index();
        assert_relative_eq!(state.solution[out], 5.0, epsilon = 1e-8);
    }
}
