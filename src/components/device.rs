//! The behavior contract every device implements.

use std::collections::HashMap;
use std::fmt;

use num_complex::Complex64;

use crate::circuit::{CircuitState, NodeType, Nodes};
use crate::error::{Result, SimError};
use crate::sparse::{ElementHandle, Matrix};

use super::model::{Model, ModelKind};

/// A noise generator between two nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseSource {
    /// Device and generator name, e.g. `R1.thermal`
    pub name: String,
    pub pos: usize,
    pub neg: usize,
    /// Current power spectral density in A²/Hz
    pub density: f64,
}

/// A uniform interface over heterogeneous device physics.
///
/// Drivers call the operations in order: [`setup`](Device::setup) once per
/// analysis, [`temperature`](Device::temperature) before iterating, then
/// [`load`](Device::load) or [`load_ac`](Device::load_ac) for every solve.
pub trait Device: fmt::Debug {
    /// Unique instance name.
    fn name(&self) -> &str;

    /// Terminal connections.
    fn pins(&self) -> &Pins;

    fn pins_mut(&mut self) -> &mut Pins;

    /// Reconnect the device. The node count must match the device's pins.
    fn connect(&mut self, nodes: &[&str]) -> Result<()> {
        let name = self.name().to_string();
        self.pins_mut().connect(&name, nodes)
    }

    /// Devices with higher priority are bound first.
    ///
    /// Current-controlled devices bind after the sources they reference.
    fn setup_priority(&self) -> i32 {
        0
    }

    /// Resolve nodes, cache matrix handles and reserve state slots.
    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()>;

    /// Branch current unknown introduced by this device.
    fn branch(&self) -> Option<usize> {
        None
    }

    /// Recompute temperature-dependent parameters.
    fn temperature(&mut self, _state: &CircuitState) -> Result<()> {
        Ok(())
    }

    /// Stamp the linearized DC or transient contribution.
    fn load(&mut self, state: &mut CircuitState);

    /// Stamp the small-signal admittance at `state.laplace`.
    fn load_ac(&mut self, _state: &mut CircuitState) {}

    /// Check the device's own convergence criterion.
    fn is_convergent(&self, _state: &CircuitState) -> bool {
        true
    }

    /// Largest timestep keeping the device's truncation error in tolerance.
    fn truncate(&self, _state: &CircuitState) -> f64 {
        f64::INFINITY
    }

    /// Called after a timepoint has been accepted.
    fn accept(&mut self, _state: &mut CircuitState) {}

    /// Apply device initial conditions when skipping the operating point.
    fn set_ic(&mut self, _state: &mut CircuitState) {}

    /// Contribute noise generators at `frequency`.
    fn noise(&self, _state: &CircuitState, _frequency: f64, _sources: &mut Vec<NoiseSource>) {}

    /// Current through the device in the latest solution.
    fn current(&self, _state: &CircuitState) -> Option<f64> {
        None
    }

    /// Set a parameter by name.
    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()>;

    /// Read a parameter by name.
    fn parameter(&self, name: &str) -> Option<f64>;
}

/// Fixed-count terminal list of a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Pins {
    names: Vec<String>,
}

impl Pins {
    /// Create a connected pin list.
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the connections, checking the count.
    pub fn connect(&mut self, device: &str, nodes: &[&str]) -> Result<()> {
        if nodes.len() != self.names.len() {
            return Err(SimError::PinCountMismatch {
                device: device.to_string(),
                given: nodes.len(),
                expected: self.names.len(),
            });
        }
        self.names = nodes.iter().map(|s| s.to_string()).collect();
        Ok(())
    }

    /// Connected node names.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Map every pin to its equation index.
    pub fn bind<const N: usize>(&self, device: &str, ctx: &mut SetupContext<'_>) -> Result<[usize; N]> {
        if self.names.len() != N {
            return Err(SimError::PinCountMismatch {
                device: device.to_string(),
                given: self.names.len(),
                expected: N,
            });
        }
        let mut indices = [0usize; N];
        for (index, name) in indices.iter_mut().zip(&self.names) {
            if name.trim().is_empty() {
                return Err(SimError::NodeNotFound {
                    node: format!("{} (unconnected pin)", device),
                });
            }
            *index = ctx.map(name);
        }
        Ok(indices)
    }
}

/// Binding context handed to [`Device::setup`].
pub struct SetupContext<'a> {
    nodes: &'a mut Nodes,
    matrix: &'a mut Matrix,
    models: &'a HashMap<String, Model>,
    branches: HashMap<String, usize>,
    slots: usize,
    /// Circuit-wide minimum conductance
    pub gmin: f64,
}

impl<'a> SetupContext<'a> {
    pub fn new(
        nodes: &'a mut Nodes,
        matrix: &'a mut Matrix,
        models: &'a HashMap<String, Model>,
        gmin: f64,
    ) -> Self {
        Self {
            nodes,
            matrix,
            models,
            branches: HashMap::new(),
            slots: 0,
            gmin,
        }
    }

    /// Index of a named node, registering it if new.
    pub fn map(&mut self, name: &str) -> usize {
        self.nodes.map(name).index()
    }

    /// Allocate an internal unknown.
    pub fn create_node(&mut self, name: &str, node_type: NodeType) -> usize {
        let index = self.nodes.create(name, node_type).index();
        self.matrix.resize(index);
        index
    }

    /// Matrix handle for (row, col).
    pub fn element(&mut self, row: usize, col: usize) -> ElementHandle {
        self.matrix.get_element(row, col)
    }

    /// Reserve `count` consecutive state slots, returning the first.
    pub fn allocate_states(&mut self, count: usize) -> usize {
        let first = self.slots;
        self.slots += count;
        first
    }

    /// Total number of reserved state slots.
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Look up a model of the expected kind.
    pub fn model<M: ModelKind>(&self, device: &str, name: &str) -> Result<M> {
        let model = self.models.get(name).ok_or_else(|| SimError::ModelNotFound {
            model: name.to_string(),
            device: device.to_string(),
        })?;
        M::extract(model)
            .cloned()
            .ok_or_else(|| SimError::ModelTypeMismatch {
                model: name.to_string(),
                device: device.to_string(),
                expected: M::KIND,
            })
    }

    /// Record the branch unknown a device introduced.
    pub fn register_branch(&mut self, device: &str, branch: usize) {
        self.branches.insert(device.to_string(), branch);
    }

    /// Branch unknown of a voltage source bound earlier.
    pub fn branch_of(&self, device: &str, source: &str) -> Result<usize> {
        self.branches
            .get(source)
            .copied()
            .ok_or_else(|| SimError::ControllingSourceNotFound {
                vsource: source.to_string(),
                device: device.to_string(),
            })
    }
}

/// The four handles of a two-terminal admittance.
#[derive(Debug, Clone, Copy)]
pub struct TwoTerminal {
    pub pos_pos: ElementHandle,
    pub pos_neg: ElementHandle,
    pub neg_pos: ElementHandle,
    pub neg_neg: ElementHandle,
}

impl TwoTerminal {
    pub fn new(ctx: &mut SetupContext<'_>, pos: usize, neg: usize) -> Self {
        Self {
            pos_pos: ctx.element(pos, pos),
            pos_neg: ctx.element(pos, neg),
            neg_pos: ctx.element(neg, pos),
            neg_neg: ctx.element(neg, neg),
        }
    }

    /// Stamp a real conductance.
    #[inline]
    pub fn stamp(&self, matrix: &mut Matrix, g: f64) {
        matrix.add(self.pos_pos, g);
        matrix.add(self.pos_neg, -g);
        matrix.add(self.neg_pos, -g);
        matrix.add(self.neg_neg, g);
    }

    /// Stamp a complex admittance.
    #[inline]
    pub fn stamp_complex(&self, matrix: &mut Matrix, y: Complex64) {
        matrix.add_complex(self.pos_pos, y);
        matrix.add_complex(self.pos_neg, -y);
        matrix.add_complex(self.neg_pos, -y);
        matrix.add_complex(self.neg_neg, y);
    }
}

/// Handles of a transconductance from a controlling pair to an output pair.
#[derive(Debug, Clone, Copy)]
pub struct Transconductance {
    pub pos_cpos: ElementHandle,
    pub pos_cneg: ElementHandle,
    pub neg_cpos: ElementHandle,
    pub neg_cneg: ElementHandle,
}

impl Transconductance {
    pub fn new(ctx: &mut SetupContext<'_>, pos: usize, neg: usize, cpos: usize, cneg: usize) -> Self {
        Self {
            pos_cpos: ctx.element(pos, cpos),
            pos_cneg: ctx.element(pos, cneg),
            neg_cpos: ctx.element(neg, cpos),
            neg_cneg: ctx.element(neg, cneg),
        }
    }

    /// Stamp a current `gm * (v(cpos) - v(cneg))` flowing from pos to neg.
    #[inline]
    pub fn stamp(&self, matrix: &mut Matrix, gm: f64) {
        matrix.add(self.pos_cpos, gm);
        matrix.add(self.pos_cneg, -gm);
        matrix.add(self.neg_cpos, -gm);
        matrix.add(self.neg_cneg, gm);
    }

    #[inline]
    pub fn stamp_complex(&self, matrix: &mut Matrix, gm: Complex64) {
        matrix.add_complex(self.pos_cpos, gm);
        matrix.add_complex(self.pos_cneg, -gm);
        matrix.add_complex(self.neg_cpos, -gm);
        matrix.add_complex(self.neg_cneg, gm);
    }
}

/// Handles tying a branch current into the KCL rows of two nodes and the
/// branch row back to their voltages.
#[derive(Debug, Clone, Copy)]
pub struct BranchStamp {
    pub pos_branch: ElementHandle,
    pub neg_branch: ElementHandle,
    pub branch_pos: ElementHandle,
    pub branch_neg: ElementHandle,
}

impl BranchStamp {
    pub fn new(ctx: &mut SetupContext<'_>, pos: usize, neg: usize, branch: usize) -> Self {
        Self {
            pos_branch: ctx.element(pos, branch),
            neg_branch: ctx.element(neg, branch),
            branch_pos: ctx.element(branch, pos),
            branch_neg: ctx.element(branch, neg),
        }
    }

    /// Stamp the incidence entries `v(pos) - v(neg)` in the branch row.
    #[inline]
    pub fn stamp(&self, matrix: &mut Matrix) {
        matrix.add(self.pos_branch, 1.0);
        matrix.add(self.neg_branch, -1.0);
        matrix.add(self.branch_pos, 1.0);
        matrix.add(self.branch_neg, -1.0);
    }

    #[inline]
    pub fn stamp_complex(&self, matrix: &mut Matrix) {
        let one = Complex64::new(1.0, 0.0);
        matrix.add_complex(self.pos_branch, one);
        matrix.add_complex(self.neg_branch, -one);
        matrix.add_complex(self.branch_pos, one);
        matrix.add_complex(self.branch_neg, -one);
    }
}

/// Add a current flowing from `pos` to `neg` through the device to the rhs.
#[inline]
pub fn stamp_current(rhs: &mut [f64], pos: usize, neg: usize, current: f64) {
    rhs[pos] -= current;
    rhs[neg] += current;
}

/// Complex counterpart of [`stamp_current`].
#[inline]
pub fn stamp_complex_current(rhs: &mut [Complex64], pos: usize, neg: usize, current: Complex64) {
    rhs[pos] -= current;
    rhs[neg] += current;
}
