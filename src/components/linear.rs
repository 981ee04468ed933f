//! Linear passive devices: Resistor, Capacitor, Inductor.

use log::warn;
use num_complex::Complex64;

use crate::circuit::{CircuitState, Domain, InitMode, NodeType};
use crate::error::Result;
use crate::params::{self, Param, ParamDef, Parameterized};
use crate::sparse::ElementHandle;
use crate::{BOLTZMANN, CELSIUS_TO_KELVIN};

use super::device::{stamp_current, BranchStamp, Device, NoiseSource, Pins, SetupContext, TwoTerminal};

/// Resistance used when a resistor evaluates to zero ohms.
const FALLBACK_RESISTANCE: f64 = 1000.0;

/// Shared resistor parameters.
#[derive(Debug, Clone)]
pub struct ResistorModel {
    pub name: String,
    /// Sheet resistance in ohms per square
    pub rsh: Param,
    pub tc1: Param,
    pub tc2: Param,
    /// Nominal temperature in °C
    pub tnom: Param,
    /// Default width
    pub defw: Param,
    /// Narrowing due to side etching
    pub narrow: Param,
}

impl ResistorModel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rsh: Param::new(0.0),
            tc1: Param::new(0.0),
            tc2: Param::new(0.0),
            tnom: Param::new(crate::NOMINAL_TEMPERATURE - CELSIUS_TO_KELVIN),
            defw: Param::new(1e-5),
            narrow: Param::new(0.0),
        }
    }
}

const RESISTOR_MODEL_PARAMS: &[ParamDef<ResistorModel>] = &[
    ParamDef { name: "rsh", info: "Sheet resistance", get: |m| m.rsh.get(), set: |m, v| m.rsh.set(v) },
    ParamDef { name: "tc1", info: "First order temperature coefficient", get: |m| m.tc1.get(), set: |m, v| m.tc1.set(v) },
    ParamDef { name: "tc2", info: "Second order temperature coefficient", get: |m| m.tc2.get(), set: |m, v| m.tc2.set(v) },
    ParamDef { name: "tnom", info: "Parameter measurement temperature", get: |m| m.tnom.get(), set: |m, v| m.tnom.set(v) },
    ParamDef { name: "defw", info: "Default device width", get: |m| m.defw.get(), set: |m, v| m.defw.set(v) },
    ParamDef { name: "narrow", info: "Narrowing of resistor", get: |m| m.narrow.get(), set: |m, v| m.narrow.set(v) },
];

impl Parameterized for ResistorModel {
    fn table() -> &'static [ParamDef<Self>] {
        RESISTOR_MODEL_PARAMS
    }

    fn entity_name(&self) -> &str {
        &self.name
    }
}

/// A resistor.
///
/// The resistance is either given directly or derived from the model's sheet
/// resistance and the device geometry.
#[derive(Debug, Clone)]
pub struct Resistor {
    pub name: String,
    pins: Pins,
    pub model: Option<String>,
    pub resistance: Param,
    pub tc1: Param,
    pub tc2: Param,
    /// Instance temperature in °C
    pub temp: Param,
    pub width: Param,
    pub length: Param,

    bound: Option<ResistorModel>,
    pos: usize,
    neg: usize,
    handles: Option<TwoTerminal>,
    conductance: f64,
    temperature: f64,
}

impl Resistor {
    /// Create a new resistor.
    pub fn new(name: &str, pos: &str, neg: &str, resistance: f64) -> Self {
        Self {
            resistance: Param::given(resistance),
            ..Self::blank(name, pos, neg)
        }
    }

    /// Create a resistor whose value comes from a model and its geometry.
    pub fn with_model(name: &str, pos: &str, neg: &str, model: &str) -> Self {
        Self {
            model: Some(model.to_string()),
            ..Self::blank(name, pos, neg)
        }
    }

    fn blank(name: &str, pos: &str, neg: &str) -> Self {
        Self {
            name: name.to_string(),
            pins: Pins::new(&[pos, neg]),
            model: None,
            resistance: Param::new(0.0),
            tc1: Param::new(0.0),
            tc2: Param::new(0.0),
            temp: Param::new(0.0),
            width: Param::new(0.0),
            length: Param::new(0.0),
            bound: None,
            pos: 0,
            neg: 0,
            handles: None,
            conductance: 0.0,
            temperature: crate::NOMINAL_TEMPERATURE,
        }
    }

    /// Conductance after temperature correction.
    pub fn conductance(&self) -> f64 {
        self.conductance
    }

    fn nominal_resistance(&self) -> f64 {
        if self.resistance.is_given() {
            return self.resistance.get();
        }
        match &self.bound {
            Some(model) if model.rsh.is_given() && self.length.is_given() => {
                let width = if self.width.is_given() {
                    self.width.get()
                } else {
                    model.defw.get()
                };
                let narrow = model.narrow.get();
                model.rsh.get() * (self.length.get() - narrow) / (width - narrow)
            }
            _ => self.resistance.get(),
        }
    }
}

const RESISTOR_PARAMS: &[ParamDef<Resistor>] = &[
    ParamDef { name: "resistance", info: "Resistance", get: |r| r.resistance.get(), set: |r, v| r.resistance.set(v) },
    ParamDef { name: "r", info: "Resistance", get: |r| r.resistance.get(), set: |r, v| r.resistance.set(v) },
    ParamDef { name: "tc1", info: "First order temperature coefficient", get: |r| r.tc1.get(), set: |r, v| r.tc1.set(v) },
    ParamDef { name: "tc2", info: "Second order temperature coefficient", get: |r| r.tc2.get(), set: |r, v| r.tc2.set(v) },
    ParamDef { name: "temp", info: "Instance temperature", get: |r| r.temp.get(), set: |r, v| r.temp.set(v) },
    ParamDef { name: "w", info: "Width", get: |r| r.width.get(), set: |r, v| r.width.set(v) },
    ParamDef { name: "l", info: "Length", get: |r| r.length.get(), set: |r, v| r.length.set(v) },
];

impl Parameterized for Resistor {
    fn table() -> &'static [ParamDef<Self>] {
        RESISTOR_PARAMS
    }

    fn entity_name(&self) -> &str {
        &self.name
    }
}

impl Device for Resistor {
    fn name(&self) -> &str {
        &self.name
    }

    fn pins(&self) -> &Pins {
        &self.pins
    }

    fn pins_mut(&mut self) -> &mut Pins {
        &mut self.pins
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let [pos, neg] = self.pins.bind(&self.name, ctx)?;
        self.pos = pos;
        self.neg = neg;
        self.bound = match &self.model {
            Some(model) => Some(ctx.model::<ResistorModel>(&self.name, model)?),
            None => None,
        };
        self.handles = Some(TwoTerminal::new(ctx, pos, neg));
        Ok(())
    }

    fn temperature(&mut self, state: &CircuitState) -> Result<()> {
        let temperature = if self.temp.is_given() {
            self.temp.get() + CELSIUS_TO_KELVIN
        } else {
            state.temperature
        };
        self.temperature = temperature;

        let (model_tc1, model_tc2, tnom) = match &self.bound {
            Some(m) => {
                let tnom = if m.tnom.is_given() {
                    m.tnom.get() + CELSIUS_TO_KELVIN
                } else {
                    state.nominal_temperature
                };
                (m.tc1.get(), m.tc2.get(), tnom)
            }
            None => (0.0, 0.0, state.nominal_temperature),
        };
        let tc1 = if self.tc1.is_given() { self.tc1.get() } else { model_tc1 };
        let tc2 = if self.tc2.is_given() { self.tc2.get() } else { model_tc2 };

        let dt = temperature - tnom;
        let factor = 1.0 + tc1 * dt + tc2 * dt * dt;
        let mut resistance = self.nominal_resistance() * factor;
        if resistance.abs() < 1e-12 {
            warn!(
                "{}: effective resistance is zero, using {} ohm",
                self.name, FALLBACK_RESISTANCE
            );
            resistance = FALLBACK_RESISTANCE;
        }
        self.conductance = 1.0 / resistance;
        Ok(())
    }

    fn load(&mut self, state: &mut CircuitState) {
        if let Some(h) = &self.handles {
            h.stamp(&mut state.matrix, self.conductance);
        }
    }

    fn load_ac(&mut self, state: &mut CircuitState) {
        if let Some(h) = &self.handles {
            h.stamp_complex(&mut state.matrix, Complex64::new(self.conductance, 0.0));
        }
    }

    fn noise(&self, _state: &CircuitState, _frequency: f64, sources: &mut Vec<NoiseSource>) {
        sources.push(NoiseSource {
            name: format!("{}.thermal", self.name),
            pos: self.pos,
            neg: self.neg,
            density: 4.0 * BOLTZMANN * self.temperature * self.conductance,
        });
    }

    fn current(&self, state: &CircuitState) -> Option<f64> {
        Some(state.voltage_between(self.pos, self.neg) * self.conductance)
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        params::set_parameter(self, name, value)
    }

    fn parameter(&self, name: &str) -> Option<f64> {
        params::get_parameter(self, name)
    }
}

/// Shared capacitor parameters for geometry-based capacitors.
#[derive(Debug, Clone)]
pub struct CapacitorModel {
    pub name: String,
    /// Bottom capacitance per area
    pub cj: Param,
    /// Sidewall capacitance per length
    pub cjsw: Param,
    pub defw: Param,
    pub narrow: Param,
}

impl CapacitorModel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cj: Param::new(0.0),
            cjsw: Param::new(0.0),
            defw: Param::new(1e-5),
            narrow: Param::new(0.0),
        }
    }
}

const CAPACITOR_MODEL_PARAMS: &[ParamDef<CapacitorModel>] = &[
    ParamDef { name: "cj", info: "Bottom capacitance per area", get: |m| m.cj.get(), set: |m, v| m.cj.set(v) },
    ParamDef { name: "cjsw", info: "Sidewall capacitance per meter", get: |m| m.cjsw.get(), set: |m, v| m.cjsw.set(v) },
    ParamDef { name: "defw", info: "Default width", get: |m| m.defw.get(), set: |m, v| m.defw.set(v) },
    ParamDef { name: "narrow", info: "Width correction factor", get: |m| m.narrow.get(), set: |m, v| m.narrow.set(v) },
];

impl Parameterized for CapacitorModel {
    fn table() -> &'static [ParamDef<Self>] {
        CAPACITOR_MODEL_PARAMS
    }

    fn entity_name(&self) -> &str {
        &self.name
    }
}

/// A capacitor.
///
/// The charge lives in state slot `q`, its derivative in `q + 1`.
#[derive(Debug, Clone)]
pub struct Capacitor {
    pub name: String,
    pins: Pins,
    pub model: Option<String>,
    pub capacitance: Param,
    /// Initial voltage used when skipping the operating point
    pub ic: Param,
    pub width: Param,
    pub length: Param,

    pos: usize,
    neg: usize,
    handles: Option<TwoTerminal>,
    q: usize,
    value: f64,
}

impl Capacitor {
    /// Create a new capacitor.
    pub fn new(name: &str, pos: &str, neg: &str, capacitance: f64) -> Self {
        Self {
            capacitance: Param::given(capacitance),
            ..Self::blank(name, pos, neg)
        }
    }

    /// Create a capacitor whose value comes from a model and its geometry.
    pub fn with_model(name: &str, pos: &str, neg: &str, model: &str) -> Self {
        Self {
            model: Some(model.to_string()),
            ..Self::blank(name, pos, neg)
        }
    }

    fn blank(name: &str, pos: &str, neg: &str) -> Self {
        Self {
            name: name.to_string(),
            pins: Pins::new(&[pos, neg]),
            model: None,
            capacitance: Param::new(0.0),
            ic: Param::new(0.0),
            width: Param::new(0.0),
            length: Param::new(0.0),
            pos: 0,
            neg: 0,
            handles: None,
            q: 0,
            value: 0.0,
        }
    }

    /// Set the initial voltage.
    pub fn with_ic(mut self, voltage: f64) -> Self {
        self.ic.set(voltage);
        self
    }

    /// Capacitance in effect for the bound analysis.
    pub fn value(&self) -> f64 {
        self.value
    }
}

const CAPACITOR_PARAMS: &[ParamDef<Capacitor>] = &[
    ParamDef { name: "capacitance", info: "Capacitance", get: |c| c.capacitance.get(), set: |c, v| c.capacitance.set(v) },
    ParamDef { name: "c", info: "Capacitance", get: |c| c.capacitance.get(), set: |c, v| c.capacitance.set(v) },
    ParamDef { name: "ic", info: "Initial voltage", get: |c| c.ic.get(), set: |c, v| c.ic.set(v) },
    ParamDef { name: "w", info: "Width", get: |c| c.width.get(), set: |c, v| c.width.set(v) },
    ParamDef { name: "l", info: "Length", get: |c| c.length.get(), set: |c, v| c.length.set(v) },
];

impl Parameterized for Capacitor {
    fn table() -> &'static [ParamDef<Self>] {
        CAPACITOR_PARAMS
    }

    fn entity_name(&self) -> &str {
        &self.name
    }
}

impl Device for Capacitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn pins(&self) -> &Pins {
        &self.pins
    }

    fn pins_mut(&mut self) -> &mut Pins {
        &mut self.pins
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let [pos, neg] = self.pins.bind(&self.name, ctx)?;
        self.pos = pos;
        self.neg = neg;
        self.value = self.capacitance.get();
        if !self.capacitance.is_given() {
            if let Some(model) = &self.model {
                let m = ctx.model::<CapacitorModel>(&self.name, model)?;
                let width = if self.width.is_given() { self.width.get() } else { m.defw.get() };
                let w = width - m.narrow.get();
                let l = self.length.get() - m.narrow.get();
                self.value = m.cj.get() * w * l + m.cjsw.get() * 2.0 * (w + l);
            }
        }
        self.handles = Some(TwoTerminal::new(ctx, pos, neg));
        self.q = ctx.allocate_states(2);
        Ok(())
    }

    fn load(&mut self, state: &mut CircuitState) {
        if state.domain != Domain::Time {
            return;
        }
        let vcap = if state.use_ic && state.init == InitMode::Transient && self.ic.is_given() {
            self.ic.get()
        } else {
            state.voltage_between(self.pos, self.neg)
        };
        let q = self.q;
        state.states[0][q] = self.value * vcap;
        if state.use_dc {
            return;
        }

        let Some(method) = state.method.as_ref() else {
            return;
        };
        if state.init == InitMode::Transient {
            state.states[1][q] = state.states[0][q];
        }
        let (geq, ceq) = method.integrate(&mut state.states, q, self.value);
        if state.init == InitMode::Transient {
            state.states[1][q + 1] = state.states[0][q + 1];
        }
        if let Some(h) = &self.handles {
            h.stamp(&mut state.matrix, geq);
        }
        stamp_current(&mut state.rhs, self.pos, self.neg, ceq);
    }

    fn load_ac(&mut self, state: &mut CircuitState) {
        if let Some(h) = &self.handles {
            h.stamp_complex(&mut state.matrix, state.laplace * self.value);
        }
    }

    fn truncate(&self, state: &CircuitState) -> f64 {
        match &state.method {
            Some(method) => method.truncation_step(&state.states, self.q),
            None => f64::INFINITY,
        }
    }

    fn current(&self, state: &CircuitState) -> Option<f64> {
        if state.is_transient() {
            Some(state.states[0][self.q + 1])
        } else {
            Some(0.0)
        }
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        params::set_parameter(self, name, value)
    }

    fn parameter(&self, name: &str) -> Option<f64> {
        params::get_parameter(self, name)
    }
}

/// An inductor.
///
/// Adds a branch current unknown; the flux lives in state slot `flux`.
#[derive(Debug, Clone)]
pub struct Inductor {
    pub name: String,
    pins: Pins,
    pub inductance: Param,
    /// Initial current used when skipping the operating point
    pub ic: Param,

    pos: usize,
    neg: usize,
    branch: usize,
    incidence: Option<BranchStamp>,
    branch_branch: ElementHandle,
    flux: usize,
}

impl Inductor {
    /// Create a new inductor.
    pub fn new(name: &str, pos: &str, neg: &str, inductance: f64) -> Self {
        Self {
            name: name.to_string(),
            pins: Pins::new(&[pos, neg]),
            inductance: Param::given(inductance),
            ic: Param::new(0.0),
            pos: 0,
            neg: 0,
            branch: 0,
            incidence: None,
            branch_branch: ElementHandle::TRASH,
            flux: 0,
        }
    }

    /// Set the initial current.
    pub fn with_ic(mut self, current: f64) -> Self {
        self.ic.set(current);
        self
    }
}

const INDUCTOR_PARAMS: &[ParamDef<Inductor>] = &[
    ParamDef { name: "inductance", info: "Inductance", get: |l| l.inductance.get(), set: |l, v| l.inductance.set(v) },
    ParamDef { name: "l", info: "Inductance", get: |l| l.inductance.get(), set: |l, v| l.inductance.set(v) },
    ParamDef { name: "ic", info: "Initial current", get: |l| l.ic.get(), set: |l, v| l.ic.set(v) },
];

impl Parameterized for Inductor {
    fn table() -> &'static [ParamDef<Self>] {
        INDUCTOR_PARAMS
    }

    fn entity_name(&self) -> &str {
        &self.name
    }
}

impl Device for Inductor {
    fn name(&self) -> &str {
        &self.name
    }

    fn pins(&self) -> &Pins {
        &self.pins
    }

    fn pins_mut(&mut self) -> &mut Pins {
        &mut self.pins
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let [pos, neg] = self.pins.bind(&self.name, ctx)?;
        self.pos = pos;
        self.neg = neg;
        self.branch = ctx.create_node(&format!("{}#branch", self.name), NodeType::Current);
        self.incidence = Some(BranchStamp::new(ctx, pos, neg, self.branch));
        self.branch_branch = ctx.element(self.branch, self.branch);
        self.flux = ctx.allocate_states(2);
        Ok(())
    }

    fn branch(&self) -> Option<usize> {
        Some(self.branch)
    }

    fn load(&mut self, state: &mut CircuitState) {
        if let Some(incidence) = &self.incidence {
            incidence.stamp(&mut state.matrix);
        }
        if state.domain != Domain::Time {
            return;
        }

        let l = self.inductance.get();
        let flux = self.flux;
        state.states[0][flux] = if state.use_ic && state.init == InitMode::Transient && self.ic.is_given() {
            l * self.ic.get()
        } else {
            l * state.voltage(self.branch)
        };
        if state.use_dc {
            return;
        }

        let Some(method) = state.method.as_ref() else {
            return;
        };
        if state.init == InitMode::Transient {
            state.states[1][flux] = state.states[0][flux];
        }
        let (req, veq) = method.integrate(&mut state.states, flux, l);
        if state.init == InitMode::Transient {
            state.states[1][flux + 1] = state.states[0][flux + 1];
        }
        state.matrix.add(self.branch_branch, -req);
        state.rhs[self.branch] += veq;
    }

    fn load_ac(&mut self, state: &mut CircuitState) {
        if let Some(incidence) = &self.incidence {
            incidence.stamp_complex(&mut state.matrix);
        }
        let impedance = state.laplace * self.inductance.get();
        state.matrix.add_complex(self.branch_branch, -impedance);
    }

    fn truncate(&self, state: &CircuitState) -> f64 {
        match &state.method {
            Some(method) => method.truncation_step(&state.states, self.flux),
            None => f64::INFINITY,
        }
    }

    fn current(&self, state: &CircuitState) -> Option<f64> {
        Some(state.voltage(self.branch))
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        params::set_parameter(self, name, value)
    }

    fn parameter(&self, name: &str) -> Option<f64> {
        params::get_parameter(self, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_resistor_parameters_by_name() {
        let mut r = Resistor::new("R1", "a", "b", 1e3);
        assert_eq!(r.parameter("R"), Some(1e3));
        r.set_parameter("resistance", 2.2e3).unwrap();
        assert_eq!(r.parameter("r"), Some(2.2e3));
        assert!(r.set_parameter("bogus", 1.0).is_err());
        assert!(r.set_parameter("r", f64::NAN).is_err());
    }

    #[test]
    fn test_resistor_geometry_from_model() {
        let mut model = ResistorModel::new("RPOLY");
        model.rsh.set(50.0);
        let mut r = Resistor::with_model("R1", "a", "b", "RPOLY");
        r.length.set(10e-6);
        r.width.set(1e-6);
        r.bound = Some(model);
        assert_relative_eq!(r.nominal_resistance(), 500.0, epsilon = 1e-9);
    }

    #[test]
    fn test_connect_checks_pin_count() {
        let mut c = Capacitor::new("C1", "a", "0", 1e-6);
        assert!(c.connect(&["x", "y"]).is_ok());
        assert_eq!(c.pins().names(), &["x".to_string(), "y".to_string()]);
        assert!(c.connect(&["x"]).is_err());
    }

    #[test]
    fn test_inductor_ic_builder() {
        let l = Inductor::new("L1", "a", "b", 1e-3).with_ic(0.5);
        assert!(l.ic.is_given());
        assert_eq!(l.parameter("ic"), Some(0.5));
    }
}
