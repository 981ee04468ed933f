//! Mutable simulation state shared by every device and driver.

use num_complex::Complex64;

use crate::integration::{IntegrationMethod, StateHistory};
use crate::sparse::{ElementHandle, Matrix};

use super::nodes::Nodes;
use super::types::NodeType;

/// Analysis domain of the current solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// Operating point and DC sweep
    Dc,
    /// AC and noise
    Frequency,
    /// Transient
    Time,
}

/// Initialization phase of the Newton iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    /// Normal iteration from the previous iterate
    Float,
    /// First iteration: junction voltages start at their critical values
    Junction,
    /// Iterate with devices kept at their initial state
    Fix,
    /// Compute small-signal parameters at the operating point
    SmallSignal,
    /// First solve of a transient run
    Transient,
    /// First solve of a new timestep, devices extrapolate their states
    Predict,
}

/// Convergence tolerances.
#[derive(Debug, Clone, Copy)]
pub struct Tolerances {
    pub reltol: f64,
    /// Current tolerance
    pub abstol: f64,
    /// Voltage tolerance
    pub vntol: f64,
    /// Charge tolerance
    pub chgtol: f64,
}

impl Tolerances {
    /// `reltol * max(|a|, |b|) + abs`
    #[inline]
    pub fn bound(&self, a: f64, b: f64, abs: f64) -> f64 {
        self.reltol * a.abs().max(b.abs()) + abs
    }
}

/// Which independent sources supply AC excitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcDrive {
    /// Every source uses its own AC magnitude and phase
    Sources,
    /// Only the named source is driven, with a unit phasor
    Only(String),
}

/// A node voltage forced by a nodeset or initial condition.
#[derive(Debug, Clone, Copy)]
pub struct ForcedNode {
    pub index: usize,
    pub value: f64,
    pub diagonal: ElementHandle,
}

/// Everything that changes while an analysis runs.
///
/// Devices receive this by reference on every call and must not keep
/// aliases into it.
#[derive(Debug)]
pub struct CircuitState {
    pub nodes: Nodes,
    pub matrix: Matrix,
    pub rhs: Vec<f64>,
    /// Latest iterate
    pub solution: Vec<f64>,
    /// Iterate before the latest solve
    pub old_solution: Vec<f64>,
    pub complex_rhs: Vec<Complex64>,
    pub complex_solution: Vec<Complex64>,
    pub states: StateHistory,
    /// Present only during transient analysis
    pub method: Option<IntegrationMethod>,
    pub domain: Domain,
    pub init: InitMode,
    /// Capacitors open, inductors shorted
    pub use_dc: bool,
    /// Skip the operating point and start from initial conditions
    pub use_ic: bool,
    /// Device junction shunt conductance
    pub gmin: f64,
    /// Extra conductance on every diagonal during Gmin stepping
    pub diag_gmin: f64,
    /// Circuit temperature in Kelvin
    pub temperature: f64,
    /// Temperature at which model parameters were measured, in Kelvin
    pub nominal_temperature: f64,
    /// Laplace variable `s = jω` during AC analysis
    pub laplace: Complex64,
    /// Number of devices which limited their voltages this iteration
    pub noncon: usize,
    pub tolerances: Tolerances,
    pub ac_drive: AcDrive,
    /// Junction voltage limiting threshold in multiples of vt
    pub limit_factor: f64,
    pub nodesets: Vec<ForcedNode>,
    pub ics: Vec<ForcedNode>,
}

impl CircuitState {
    /// Create a state sized for the bound nodes.
    pub fn new(nodes: Nodes, matrix: Matrix, slots: usize, depth: usize, tolerances: Tolerances) -> Self {
        let size = nodes.count() + 1;
        Self {
            nodes,
            matrix,
            rhs: vec![0.0; size],
            solution: vec![0.0; size],
            old_solution: vec![0.0; size],
            complex_rhs: vec![Complex64::new(0.0, 0.0); size],
            complex_solution: vec![Complex64::new(0.0, 0.0); size],
            states: StateHistory::new(slots, depth),
            method: None,
            domain: Domain::Dc,
            init: InitMode::Junction,
            use_dc: true,
            use_ic: false,
            gmin: 1e-12,
            diag_gmin: 0.0,
            temperature: crate::NOMINAL_TEMPERATURE,
            nominal_temperature: crate::NOMINAL_TEMPERATURE,
            laplace: Complex64::new(0.0, 0.0),
            noncon: 0,
            tolerances,
            ac_drive: AcDrive::Sources,
            limit_factor: 2.0,
            nodesets: Vec::new(),
            ics: Vec::new(),
        }
    }

    /// Number of equations.
    pub fn size(&self) -> usize {
        self.nodes.count()
    }

    /// Value of an unknown in the latest iterate (0 for ground).
    #[inline]
    pub fn voltage(&self, index: usize) -> f64 {
        self.solution[index]
    }

    /// Voltage between two unknowns in the latest iterate.
    #[inline]
    pub fn voltage_between(&self, pos: usize, neg: usize) -> f64 {
        self.solution[pos] - self.solution[neg]
    }

    /// Complex value of an unknown in the latest AC solution.
    #[inline]
    pub fn phasor(&self, index: usize) -> Complex64 {
        self.complex_solution[index]
    }

    /// Current simulation time (0 outside transient analysis).
    pub fn time(&self) -> f64 {
        self.method.as_ref().map(|m| m.time).unwrap_or(0.0)
    }

    /// Whether reactive elements should contribute charge dynamics.
    pub fn is_transient(&self) -> bool {
        self.domain == Domain::Time && !self.use_dc
    }

    /// Zero the real matrix and right-hand side.
    pub fn clear_real(&mut self) {
        self.matrix.clear();
        self.rhs.fill(0.0);
    }

    /// Zero the complex matrix and right-hand side.
    pub fn clear_complex(&mut self) {
        self.matrix.clear();
        self.complex_rhs.fill(Complex64::new(0.0, 0.0));
    }

    /// Force the nodeset voltages into the assembled matrix.
    pub fn apply_nodesets(&mut self) {
        force_nodes(&mut self.matrix, &mut self.rhs, &mut self.solution, &self.nodes, &self.nodesets);
    }

    /// Force the initial-condition voltages into the assembled matrix.
    pub fn apply_ics(&mut self) {
        force_nodes(&mut self.matrix, &mut self.rhs, &mut self.solution, &self.nodes, &self.ics);
    }
}

/// Apply forced node voltages to the assembled matrix.
///
/// A row that also couples to a branch current keeps those entries and gets a
/// large conductance to the forced value; any other row is replaced by
/// `v = value`.
fn force_nodes(
    matrix: &mut Matrix,
    rhs: &mut [f64],
    solution: &mut [f64],
    nodes: &Nodes,
    forced: &[ForcedNode],
) {
    for node in forced {
        let has_currents =
            matrix.zero_row(node.index, |col| nodes.node_type(col) == NodeType::Current);
        if has_currents {
            rhs[node.index] = 1e10 * node.value;
            matrix.set(node.diagonal, 1e10);
        } else {
            rhs[node.index] = node.value;
            solution[node.index] = node.value;
            matrix.set(node.diagonal, 1.0);
        }
    }
}
