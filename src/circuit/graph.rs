//! Circuit structure.

use std::cmp::Reverse;
use std::collections::HashMap;

use log::debug;

use super::nodes::Nodes;
use super::state::{CircuitState, ForcedNode};
use super::types::NodeType;
use super::validate::validate_circuit;
use crate::components::{Device, Model, NoiseSource, SetupContext};
use crate::error::{Result, SimError};
use crate::solver::SimulationConfig;
use crate::sparse::Matrix;

/// A complete circuit: devices, the models they reference and the user's
/// nodesets and initial conditions.
#[derive(Debug, Default)]
pub struct Circuit {
    devices: Vec<Box<dyn Device>>,
    /// Device name to position in `devices`
    index: HashMap<String, usize>,
    models: HashMap<String, Model>,
    /// Initial guesses for the operating point, in insertion order
    nodesets: Vec<(String, f64)>,
    /// Initial conditions for transient analysis, in insertion order
    ics: Vec<(String, f64)>,
}

impl Circuit {
    /// Create an empty circuit.
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_unique(&self, name: &str) -> Result<()> {
        if self.index.contains_key(name) || self.models.contains_key(name) {
            return Err(SimError::DuplicateEntity {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Add a device.
    pub fn add<D: Device + 'static>(&mut self, device: D) -> Result<()> {
        self.add_boxed(Box::new(device))
    }

    /// Add an already boxed device.
    pub fn add_boxed(&mut self, device: Box<dyn Device>) -> Result<()> {
        let name = device.name().to_string();
        self.ensure_unique(&name)?;
        self.index.insert(name, self.devices.len());
        self.devices.push(device);
        Ok(())
    }

    /// Add a model.
    pub fn add_model(&mut self, model: impl Into<Model>) -> Result<()> {
        let model = model.into();
        let name = model.name().to_string();
        self.ensure_unique(&name)?;
        self.models.insert(name, model);
        Ok(())
    }

    /// Number of devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn device(&self, name: &str) -> Option<&dyn Device> {
        self.index.get(name).map(|&i| self.devices[i].as_ref())
    }

    pub fn device_mut(&mut self, name: &str) -> Option<&mut (dyn Device + 'static)> {
        match self.index.get(name) {
            Some(&i) => Some(self.devices[i].as_mut()),
            None => None,
        }
    }

    /// Iterate devices in insertion order.
    pub fn devices(&self) -> impl Iterator<Item = &dyn Device> {
        self.devices.iter().map(|d| d.as_ref())
    }

    pub fn model(&self, name: &str) -> Option<&Model> {
        self.models.get(name)
    }

    pub fn model_mut(&mut self, name: &str) -> Option<&mut Model> {
        self.models.get_mut(name)
    }

    /// Give the operating point an initial guess for a node.
    pub fn set_nodeset(&mut self, node: &str, voltage: f64) {
        upsert(&mut self.nodesets, node, voltage);
    }

    /// Fix a node voltage at the start of a transient run.
    pub fn set_ic(&mut self, node: &str, voltage: f64) {
        upsert(&mut self.ics, node, voltage);
    }

    pub fn nodesets(&self) -> &[(String, f64)] {
        &self.nodesets
    }

    pub fn ics(&self) -> &[(String, f64)] {
        &self.ics
    }

    /// Set a parameter of a device or model.
    pub fn set_parameter(&mut self, entity: &str, param: &str, value: f64) -> Result<()> {
        if let Some(&i) = self.index.get(entity) {
            return self.devices[i].set_parameter(param, value);
        }
        if let Some(model) = self.models.get_mut(entity) {
            return model.set_parameter(param, value);
        }
        Err(SimError::EntityNotFound {
            name: entity.to_string(),
        })
    }

    /// Read a parameter of a device or model.
    pub fn parameter(&self, entity: &str, param: &str) -> Result<f64> {
        let value = if let Some(&i) = self.index.get(entity) {
            self.devices[i].parameter(param)
        } else if let Some(model) = self.models.get(entity) {
            model.parameter(param)
        } else {
            return Err(SimError::EntityNotFound {
                name: entity.to_string(),
            });
        };
        value.ok_or_else(|| SimError::unknown_parameter(entity, param))
    }

    /// Bind every device and build the state for one analysis.
    ///
    /// Devices bind in descending [`Device::setup_priority`], keeping
    /// insertion order among equals, so controlling sources are known
    /// before the devices that sense their current. `depth` is the number
    /// of state history blocks the analysis needs.
    pub fn bind(&mut self, config: &SimulationConfig, depth: usize) -> Result<CircuitState> {
        validate_circuit(self)?;
        config.validate()?;

        let mut nodes = Nodes::new();
        let mut matrix = Matrix::new();
        matrix.rel_threshold = config.pivot_rel_tol;
        matrix.abs_threshold = config.pivot_abs_tol;

        let mut order: Vec<usize> = (0..self.devices.len()).collect();
        order.sort_by_key(|&i| Reverse(self.devices[i].setup_priority()));

        let slots = {
            let mut ctx = SetupContext::new(&mut nodes, &mut matrix, &self.models, config.gmin);
            for &i in &order {
                let device = &mut self.devices[i];
                device.setup(&mut ctx)?;
                if let Some(branch) = device.branch() {
                    ctx.register_branch(device.name(), branch);
                }
            }
            ctx.slots()
        };

        // Every unknown gets a diagonal so Gmin stepping and node forcing
        // always have an element to work on
        let size = nodes.count();
        for index in 1..=size {
            if nodes.node_type(index) == NodeType::Voltage {
                matrix.get_element(index, index);
            }
        }
        matrix.resize(size);

        let nodesets = self.forced_nodes(&nodes, &mut matrix, &self.nodesets)?;
        let ics = self.forced_nodes(&nodes, &mut matrix, &self.ics)?;

        let mut state = CircuitState::new(nodes, matrix, slots, depth, config.tolerances());
        state.gmin = config.gmin;
        state.temperature = config.temperature;
        state.nominal_temperature = config.nominal_temperature;
        state.limit_factor = config.voltage_limit_factor;
        state.nodesets = nodesets;
        state.ics = ics;
        debug!(
            "bound {} devices: {} unknowns, {} matrix elements, {} state slots",
            self.devices.len(),
            state.size(),
            state.matrix.element_count(),
            slots
        );
        Ok(state)
    }

    fn forced_nodes(&self, nodes: &Nodes, matrix: &mut Matrix, forced: &[(String, f64)]) -> Result<Vec<ForcedNode>> {
        let mut resolved = Vec::with_capacity(forced.len());
        for (name, value) in forced {
            let id = nodes.find(name).ok_or_else(|| SimError::NodeNotFound { node: name.clone() })?;
            if id.is_ground() {
                continue;
            }
            resolved.push(ForcedNode {
                index: id.index(),
                value: *value,
                diagonal: matrix.get_element(id.index(), id.index()),
            });
        }
        Ok(resolved)
    }

    /// Update temperature-dependent parameters of every device.
    pub fn temperature(&mut self, state: &CircuitState) -> Result<()> {
        for device in &mut self.devices {
            device.temperature(state)?;
        }
        Ok(())
    }

    /// Stamp every device's DC or transient contribution.
    pub fn load(&mut self, state: &mut CircuitState) {
        for device in &mut self.devices {
            device.load(state);
        }
    }

    /// Stamp every device's small-signal admittance.
    pub fn load_ac(&mut self, state: &mut CircuitState) {
        for device in &mut self.devices {
            device.load_ac(state);
        }
    }

    /// Whether every device accepts the latest iterate.
    pub fn is_convergent(&self, state: &CircuitState) -> bool {
        self.devices.iter().all(|d| d.is_convergent(state))
    }

    /// Smallest timestep any device recommends.
    pub fn truncate(&self, state: &CircuitState) -> f64 {
        self.devices
            .iter()
            .map(|d| d.truncate(state))
            .fold(f64::INFINITY, f64::min)
    }

    /// Notify every device that a timepoint was accepted.
    pub fn accept(&mut self, state: &mut CircuitState) {
        for device in &mut self.devices {
            device.accept(state);
        }
    }

    /// Let devices apply their own initial conditions.
    pub fn set_device_ics(&mut self, state: &mut CircuitState) {
        for device in &mut self.devices {
            device.set_ic(state);
        }
    }

    /// Collect the noise generators of every device at `frequency`.
    pub fn noise_sources(&self, state: &CircuitState, frequency: f64) -> Vec<NoiseSource> {
        let mut sources = Vec::new();
        for device in &self.devices {
            device.noise(state, frequency, &mut sources);
        }
        sources
    }
}

fn upsert(list: &mut Vec<(String, f64)>, node: &str, value: f64) {
    match list.iter_mut().find(|(n, _)| n == node) {
        Some(entry) => entry.1 = value,
        None => list.push((node.to_string(), value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Cccs, Resistor, VoltageSource};

    #[test]
    fn test_duplicate_names_rejected() {
        let mut circuit = Circuit::new();
        circuit.add(Resistor::new("R1", "a", "0", 1e3)).unwrap();
        let err = circuit.add(Resistor::new("R1", "b", "0", 1e3)).unwrap_err();
        assert_eq!(err, SimError::DuplicateEntity { name: "R1".to_string() });
    }

    #[test]
    fn test_parameter_dispatch() {
        let mut circuit = Circuit::new();
        circuit.add(Resistor::new("R1", "a", "0", 1e3)).unwrap();
        circuit.set_parameter("R1", "resistance", 2e3).unwrap();
        assert_eq!(circuit.parameter("R1", "resistance").unwrap(), 2e3);
        assert!(matches!(
            circuit.parameter("R1", "bogus"),
            Err(SimError::UnknownParameter { .. })
        ));
        assert!(matches!(
            circuit.set_parameter("R9", "resistance", 1.0),
            Err(SimError::EntityNotFound { .. })
        ));
    }

    #[test]
    fn test_current_controlled_binds_after_source() {
        // F1 is added before the source it senses
        let mut circuit = Circuit::new();
        circuit.add(Cccs::new("F1", "b", "0", "V1", 2.0)).unwrap();
        circuit.add(Resistor::new("R2", "b", "0", 1e3)).unwrap();
        circuit.add(VoltageSource::new("V1", "a", "0", 1.0)).unwrap();
        circuit.add(Resistor::new("R1", "a", "0", 1e3)).unwrap();
        let state = circuit.bind(&SimulationConfig::default(), 2).unwrap();
        // a, b and the V1 branch
        assert_eq!(state.size(), 3);
    }

    #[test]
    fn test_missing_controlling_source() {
        let mut circuit = Circuit::new();
        circuit.add(Cccs::new("F1", "b", "0", "V9", 2.0)).unwrap();
        circuit.add(Resistor::new("R2", "b", "0", 1e3)).unwrap();
        let err = circuit.bind(&SimulationConfig::default(), 2).unwrap_err();
        assert_eq!(
            err,
            SimError::ControllingSourceNotFound {
                vsource: "V9".to_string(),
                device: "F1".to_string()
            }
        );
    }

    #[test]
    fn test_nodeset_on_unknown_node() {
        let mut circuit = Circuit::new();
        circuit.add(Resistor::new("R1", "a", "0", 1e3)).unwrap();
        circuit.set_nodeset("nowhere", 1.0);
        assert!(matches!(
            circuit.bind(&SimulationConfig::default(), 2),
            Err(SimError::NodeNotFound { .. })
        ));
    }
}
