//! Voltage and current controlled switches.
//!
//! A switch is a conductance toggling between `1/ron` and `1/roff` when its
//! controlling quantity crosses `threshold ± hysteresis`. Between the two
//! thresholds the previous state is kept. The on/off state lives in a state
//! slot so a rejected timestep restores it.

use num_complex::Complex64;

use crate::circuit::{CircuitState, InitMode};
use crate::error::Result;
use crate::params::{self, Param, ParamDef, Parameterized};

use super::device::{Device, Pins, SetupContext, TwoTerminal};

const ON: f64 = 1.0;
const OFF: f64 = 0.0;

/// Model of a voltage controlled switch.
#[derive(Debug, Clone)]
pub struct VoltageSwitchModel {
    pub name: String,
    /// On resistance
    pub ron: Param,
    /// Off resistance, defaults to 1/gmin
    pub roff: Param,
    /// Threshold voltage
    pub vt: Param,
    /// Hysteresis voltage
    pub vh: Param,
}

impl VoltageSwitchModel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ron: Param::new(1.0),
            roff: Param::new(0.0),
            vt: Param::new(0.0),
            vh: Param::new(0.0),
        }
    }
}

const VOLTAGE_SWITCH_MODEL_PARAMS: &[ParamDef<VoltageSwitchModel>] = &[
    ParamDef { name: "ron", info: "On resistance", get: |m| m.ron.get(), set: |m, v| m.ron.set(v) },
    ParamDef { name: "roff", info: "Off resistance", get: |m| m.roff.get(), set: |m, v| m.roff.set(v) },
    ParamDef { name: "vt", info: "Threshold voltage", get: |m| m.vt.get(), set: |m, v| m.vt.set(v) },
    ParamDef { name: "vh", info: "Hysteresis voltage", get: |m| m.vh.get(), set: |m, v| m.vh.set(v) },
];

impl Parameterized for VoltageSwitchModel {
    fn table() -> &'static [ParamDef<Self>] {
        VOLTAGE_SWITCH_MODEL_PARAMS
    }

    fn entity_name(&self) -> &str {
        &self.name
    }
}

/// Model of a current controlled switch.
#[derive(Debug, Clone)]
pub struct CurrentSwitchModel {
    pub name: String,
    pub ron: Param,
    pub roff: Param,
    /// Threshold current
    pub it: Param,
    /// Hysteresis current
    pub ih: Param,
}

impl CurrentSwitchModel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ron: Param::new(1.0),
            roff: Param::new(0.0),
            it: Param::new(0.0),
            ih: Param::new(0.0),
        }
    }
}

const CURRENT_SWITCH_MODEL_PARAMS: &[ParamDef<CurrentSwitchModel>] = &[
    ParamDef { name: "ron", info: "On resistance", get: |m| m.ron.get(), set: |m, v| m.ron.set(v) },
    ParamDef { name: "roff", info: "Off resistance", get: |m| m.roff.get(), set: |m, v| m.roff.set(v) },
    ParamDef { name: "it", info: "Threshold current", get: |m| m.it.get(), set: |m, v| m.it.set(v) },
    ParamDef { name: "ih", info: "Hysteresis current", get: |m| m.ih.get(), set: |m, v| m.ih.set(v) },
];

impl Parameterized for CurrentSwitchModel {
    fn table() -> &'static [ParamDef<Self>] {
        CURRENT_SWITCH_MODEL_PARAMS
    }

    fn entity_name(&self) -> &str {
        &self.name
    }
}

/// Switching behavior shared by both switch kinds.
#[derive(Debug, Clone)]
struct SwitchCore {
    g_on: f64,
    g_off: f64,
    threshold: f64,
    hysteresis: f64,
    initially_on: bool,
    pos: usize,
    neg: usize,
    handles: Option<TwoTerminal>,
    slot: usize,
    conductance: f64,
}

impl SwitchCore {
    fn new(initially_on: bool) -> Self {
        Self {
            g_on: 1.0,
            g_off: 0.0,
            threshold: 0.0,
            hysteresis: 0.0,
            initially_on,
            pos: 0,
            neg: 0,
            handles: None,
            slot: 0,
            conductance: 0.0,
        }
    }

    fn bind(&mut self, ctx: &mut SetupContext<'_>, pos: usize, neg: usize, ron: &Param, roff: &Param) {
        self.pos = pos;
        self.neg = neg;
        self.g_on = 1.0 / ron.get();
        self.g_off = if roff.is_given() && roff.get() > 0.0 {
            1.0 / roff.get()
        } else {
            ctx.gmin
        };
        self.handles = Some(TwoTerminal::new(ctx, pos, neg));
        self.slot = ctx.allocate_states(1);
    }

    fn decide(&self, control: f64, previous: f64) -> f64 {
        if control > self.threshold + self.hysteresis {
            ON
        } else if control < self.threshold - self.hysteresis {
            OFF
        } else {
            previous
        }
    }

    fn load(&mut self, state: &mut CircuitState, control: f64) {
        let slot = self.slot;
        let current = match state.init {
            InitMode::Junction | InitMode::Fix => {
                if self.initially_on {
                    ON
                } else {
                    OFF
                }
            }
            InitMode::SmallSignal => state.states[0][slot],
            InitMode::Float => {
                let old = state.states[0][slot];
                let current = self.decide(control, old);
                if current != old {
                    state.noncon += 1;
                }
                current
            }
            InitMode::Transient | InitMode::Predict => {
                let previous = state.states[1][slot];
                self.decide(control, previous)
            }
        };
        state.states[0][slot] = current;
        self.conductance = if current == ON { self.g_on } else { self.g_off };
        if let Some(h) = &self.handles {
            h.stamp(&mut state.matrix, self.conductance);
        }
    }

    fn load_ac(&self, state: &mut CircuitState) {
        let g = if state.states[0][self.slot] == ON {
            self.g_on
        } else {
            self.g_off
        };
        if let Some(h) = &self.handles {
            h.stamp_complex(&mut state.matrix, Complex64::new(g, 0.0));
        }
    }

    fn current(&self, state: &CircuitState) -> f64 {
        self.conductance * state.voltage_between(self.pos, self.neg)
    }
}

/// A switch controlled by the voltage across a second node pair.
#[derive(Debug, Clone)]
pub struct VoltageSwitch {
    pub name: String,
    pins: Pins,
    pub model: String,
    core: SwitchCore,
    cpos: usize,
    cneg: usize,
}

impl VoltageSwitch {
    pub fn new(name: &str, pos: &str, neg: &str, cpos: &str, cneg: &str, model: &str) -> Self {
        Self {
            name: name.to_string(),
            pins: Pins::new(&[pos, neg, cpos, cneg]),
            model: model.to_string(),
            core: SwitchCore::new(false),
            cpos: 0,
            cneg: 0,
        }
    }

    /// Start in the on state.
    pub fn initially_on(mut self) -> Self {
        self.core.initially_on = true;
        self
    }

    /// Whether the switch was on in the latest solution.
    pub fn is_on(&self, state: &CircuitState) -> bool {
        state.states[0][self.core.slot] == ON
    }
}

const VOLTAGE_SWITCH_PARAMS: &[ParamDef<VoltageSwitch>] = &[ParamDef {
    name: "on",
    info: "Initially on",
    get: |s| if s.core.initially_on { 1.0 } else { 0.0 },
    set: |s, v| s.core.initially_on = v != 0.0,
}];

impl Parameterized for VoltageSwitch {
    fn table() -> &'static [ParamDef<Self>] {
        VOLTAGE_SWITCH_PARAMS
    }

    fn entity_name(&self) -> &str {
        &self.name
    }
}

impl Device for VoltageSwitch {
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
        let [pos, neg, cpos, cneg] = self.pins.bind(&self.name, ctx)?;
        let model = ctx.model::<VoltageSwitchModel>(&self.name, &self.model)?;
        self.cpos = cpos;
        self.cneg = cneg;
        self.core.threshold = model.vt.get();
        self.core.hysteresis = model.vh.get().abs();
        self.core.bind(ctx, pos, neg, &model.ron, &model.roff);
        Ok(())
    }

    fn load(&mut self, state: &mut CircuitState) {
        let control = state.voltage_between(self.cpos, self.cneg);
        self.core.load(state, control);
    }

    fn load_ac(&mut self, state: &mut CircuitState) {
        self.core.load_ac(state);
    }

    fn current(&self, state: &CircuitState) -> Option<f64> {
        Some(self.core.current(state))
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        params::set_parameter(self, name, value)
    }

    fn parameter(&self, name: &str) -> Option<f64> {
        params::get_parameter(self, name)
    }
}

/// A switch controlled by the branch current of a voltage source.
#[derive(Debug, Clone)]
pub struct CurrentSwitch {
    pub name: String,
    pins: Pins,
    pub model: String,
    /// Name of the controlling voltage source
    pub control: String,
    core: SwitchCore,
    control_branch: usize,
}

impl CurrentSwitch {
    pub fn new(name: &str, pos: &str, neg: &str, control: &str, model: &str) -> Self {
        Self {
            name: name.to_string(),
            pins: Pins::new(&[pos, neg]),
            model: model.to_string(),
            control: control.to_string(),
            core: SwitchCore::new(false),
            control_branch: 0,
        }
    }

    /// Start in the on state.
    pub fn initially_on(mut self) -> Self {
        self.core.initially_on = true;
        self
    }
}

const CURRENT_SWITCH_PARAMS: &[ParamDef<CurrentSwitch>] = &[ParamDef {
    name: "on",
    info: "Initially on",
    get: |s| if s.core.initially_on { 1.0 } else { 0.0 },
    set: |s, v| s.core.initially_on = v != 0.0,
}];

impl Parameterized for CurrentSwitch {
    fn table() -> &'static [ParamDef<Self>] {
        CURRENT_SWITCH_PARAMS
    }

    fn entity_name(&self) -> &str {
        &self.name
    }
}

impl Device for CurrentSwitch {
    fn name(&self) -> &str {
        &self.name
    }

    fn pins(&self) -> &Pins {
        &self.pins
    }

    fn pins_mut(&mut self) -> &mut Pins {
        &mut self.pins
    }

    fn setup_priority(&self) -> i32 {
        -1
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let [pos, neg] = self.pins.bind(&self.name, ctx)?;
        let model = ctx.model::<CurrentSwitchModel>(&self.name, &self.model)?;
        self.control_branch = ctx.branch_of(&self.name, &self.control)?;
        self.core.threshold = model.it.get();
        self.core.hysteresis = model.ih.get().abs();
        self.core.bind(ctx, pos, neg, &model.ron, &model.roff);
        Ok(())
    }

    fn load(&mut self, state: &mut CircuitState) {
        let control = state.voltage(self.control_branch);
        self.core.load(state, control);
    }

    fn load_ac(&mut self, state: &mut CircuitState) {
        self.core.load_ac(state);
    }

    fn current(&self, state: &CircuitState) -> Option<f64> {
        Some(self.core.current(state))
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

    #[test]
    fn test_hysteresis_band_keeps_state() {
        let mut core = SwitchCore::new(false);
        core.threshold = 1.0;
        core.hysteresis = 0.2;
        assert_eq!(core.decide(1.3, OFF), ON);
        assert_eq!(core.decide(0.7, ON), OFF);
        assert_eq!(core.decide(1.1, OFF), OFF);
        assert_eq!(core.decide(0.9, ON), ON);
    }

    #[test]
    fn test_model_defaults() {
        let m = VoltageSwitchModel::new("SW");
        assert_eq!(m.ron.get(), 1.0);
        assert!(!m.roff.is_given());
        let mut s = VoltageSwitch::new("S1", "a", "0", "c", "0", "SW").initially_on();
        assert_eq!(s.parameter("on"), Some(1.0));
        s.set_parameter("on", 0.0).unwrap();
        assert_eq!(s.parameter("on"), Some(0.0));
    }
}
