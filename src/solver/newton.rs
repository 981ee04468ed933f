//! Newton-Raphson iteration.

use std::time::Instant;

use log::trace;

use crate::circuit::{Circuit, CircuitState, Domain, InitMode, NodeType};

use super::stats::SolverStats;

/// Outcome of one Newton-Raphson solve.
///
/// These are expected numeric outcomes, not errors: drivers match on them
/// to decide which fallback to try next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Solution and every device converged
    Converged { iterations: usize },
    /// The iteration limit was reached first
    MaxIterationsExceeded { iterations: usize },
    /// Factorization found a zero pivot
    Singular { row: usize, col: usize },
}

impl SolveStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, SolveStatus::Converged { .. })
    }

    /// Iterations spent, zero for a singular matrix.
    pub fn iterations(&self) -> usize {
        match *self {
            SolveStatus::Converged { iterations } | SolveStatus::MaxIterationsExceeded { iterations } => iterations,
            SolveStatus::Singular { .. } => 0,
        }
    }
}

/// Newton-Raphson solver over the circuit equations.
#[derive(Debug, Clone, Copy)]
pub struct NewtonRaphson {
    /// Maximum iterations
    pub max_iterations: usize,
    /// Force the nodesets on every iteration instead of only while
    /// initializing
    pub hold_nodesets: bool,
}

impl NewtonRaphson {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            hold_nodesets: false,
        }
    }

    /// Keep the nodeset voltages clamped for the whole solve.
    pub fn holding_nodesets(mut self) -> Self {
        self.hold_nodesets = true;
        self
    }

    /// Iterate from the current `state.solution` and `state.init`.
    ///
    /// The initialization mode advances as the iteration proceeds:
    /// `Junction` becomes `Fix`, `Fix` becomes `Float` once no device
    /// limited its voltages, and the transient modes become `Float` after
    /// one iteration. Convergence is only accepted in `Float`.
    pub fn solve(&self, circuit: &mut Circuit, state: &mut CircuitState, stats: &mut SolverStats) -> SolveStatus {
        let mut iterations = 0;
        loop {
            state.noncon = 0;

            let started = Instant::now();
            state.clear_real();
            circuit.load(state);
            state.matrix.load_gmin(state.diag_gmin);
            self.force_nodes(state);
            stats.load_time += started.elapsed();

            if iterations == 0 && matches!(state.init, InitMode::Junction | InitMode::Transient) {
                state.matrix.request_reorder();
            }

            let started = Instant::now();
            if let Err(pivot) = state.matrix.factor() {
                stats.solve_time += started.elapsed();
                trace!("zero pivot at ({}, {}) after {} iterations", pivot.row, pivot.col, iterations);
                return SolveStatus::Singular {
                    row: pivot.row,
                    col: pivot.col,
                };
            }
            std::mem::swap(&mut state.solution, &mut state.old_solution);
            state.matrix.solve(&mut state.rhs, &mut state.solution);
            stats.solve_time += started.elapsed();
            iterations += 1;

            let converged = state.noncon == 0
                && iterations > 1
                && solution_converged(state)
                && circuit.is_convergent(state);
            trace!(
                "iteration {} ({:?}): noncon = {}, converged = {}",
                iterations,
                state.init,
                state.noncon,
                converged
            );

            match state.init {
                InitMode::Float if converged => return SolveStatus::Converged { iterations },
                InitMode::Float => {}
                InitMode::Junction => state.init = InitMode::Fix,
                InitMode::Fix => {
                    if state.noncon == 0 {
                        state.init = InitMode::Float;
                    }
                }
                InitMode::SmallSignal | InitMode::Transient | InitMode::Predict => {
                    state.init = InitMode::Float;
                }
            }

            if iterations >= self.max_iterations {
                trace!("iteration limit of {} reached", self.max_iterations);
                return SolveStatus::MaxIterationsExceeded { iterations };
            }
        }
    }

    /// Clamp nodeset and initial-condition voltages into the assembled system.
    fn force_nodes(&self, state: &mut CircuitState) {
        let in_dc = !state.is_transient();
        let initializing = matches!(state.init, InitMode::Junction | InitMode::Fix);
        if in_dc && (initializing || self.hold_nodesets) {
            state.apply_nodesets();
        }
        if state.domain == Domain::Time && state.use_dc && !state.use_ic {
            state.apply_ics();
        }
    }
}

/// Whether the latest iterate moved less than the tolerance from the one
/// before it. Voltages are checked against `vntol`, branch currents
/// against `abstol`.
pub(crate) fn solution_converged(state: &CircuitState) -> bool {
    let tol = &state.tolerances;
    (1..=state.size()).all(|i| {
        let new = state.solution[i];
        let old = state.old_solution[i];
        if !new.is_finite() {
            return false;
        }
        let abs = match state.nodes.node_type(i) {
            NodeType::Voltage => tol.vntol,
            NodeType::Current => tol.abstol,
        };
        (new - old).abs() <= tol.bound(new, old, abs)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Diode, DiodeModel, Resistor, VoltageSource};
    use crate::solver::SimulationConfig;
    use approx::assert_relative_eq;

    fn bind(circuit: &mut Circuit) -> CircuitState {
        let state = circuit.bind(&SimulationConfig::default(), 2).unwrap();
        circuit.temperature(&state).unwrap();
        state
    }

    #[test]
    fn test_linear_circuit_converges_quickly() {
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", "in", "0", 10.0)).unwrap();
        circuit.add(Resistor::new("R1", "in", "out", 1e3)).unwrap();
        circuit.add(Resistor::new("R2", "out", "0", 1e3)).unwrap();
        let mut state = bind(&mut circuit);
        let status = NewtonRaphson::new(100).solve(&mut circuit, &mut state, &mut SolverStats::new());
        assert!(status.is_converged());
        // Junction, Fix, then two Float passes
        assert!(status.iterations() <= 4);
        let out = state.nodes.find("out").unwrap().index();
        assert_relative_eq!(state.solution[out], 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_diode_needs_limited_iterations() {
        let mut circuit = Circuit::new();
        circuit.add_model(DiodeModel::new("DMOD")).unwrap();
        circuit.add(VoltageSource::new("V1", "in", "0", 5.0)).unwrap();
        circuit.add(Resistor::new("R1", "in", "a", 1e3)).unwrap();
        circuit.add(Diode::new("D1", "a", "0", "DMOD")).unwrap();
        let mut state = bind(&mut circuit);
        let status = NewtonRaphson::new(100).solve(&mut circuit, &mut state, &mut SolverStats::new());
        assert!(status.is_converged());
        let a = state.nodes.find("a").unwrap().index();
        assert!(state.solution[a] > 0.5 && state.solution[a] < 0.9);
    }

    #[test]
    fn test_iteration_limit_is_reported() {
        let mut circuit = Circuit::new();
        circuit.add_model(DiodeModel::new("DMOD")).unwrap();
        circuit.add(VoltageSource::new("V1", "in", "0", 5.0)).unwrap();
        circuit.add(Resistor::new("R1", "in", "a", 1e3)).unwrap();
        circuit.add(Diode::new("D1", "a", "0", "DMOD")).unwrap();
        let mut state = bind(&mut circuit);
        let mut stats = SolverStats::new();
        let status = NewtonRaphson::new(2).solve(&mut circuit, &mut state, &mut stats);
        // Exactly the configured number of solves, never one more
        assert_eq!(status, SolveStatus::MaxIterationsExceeded { iterations: 2 });
    }
}
