//! Linear controlled sources.
//!
//! Voltage-controlled sources sense the voltage across a second node pair.
//! Current-controlled sources sense the branch current of a voltage source
//! named at construction, so they bind after every voltage source.

use num_complex::Complex64;

use crate::circuit::{CircuitState, NodeType};
use crate::error::Result;
use crate::params::{self, Param, ParamDef, Parameterized};
use crate::sparse::ElementHandle;

use super::device::{BranchStamp, Device, Pins, SetupContext, Transconductance};

macro_rules! device_basics {
    () => {
        fn name(&self) -> &str {
            &self.name
        }

        fn pins(&self) -> &Pins {
            &self.pins
        }

        fn pins_mut(&mut self) -> &mut Pins {
            &mut self.pins
        }

        fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
            params::set_parameter(self, name, value)
        }

        fn parameter(&self, name: &str) -> Option<f64> {
            params::get_parameter(self, name)
        }
    };
}

macro_rules! parameterized {
    ($ty:ty, $table:ident) => {
        impl Parameterized for $ty {
            fn table() -> &'static [ParamDef<Self>] {
                $table
            }

            fn entity_name(&self) -> &str {
                &self.name
            }
        }
    };
}

/// Voltage-controlled voltage source.
#[derive(Debug, Clone)]
pub struct Vcvs {
    pub name: String,
    pins: Pins,
    pub gain: Param,

    branch: usize,
    incidence: Option<BranchStamp>,
    branch_cpos: ElementHandle,
    branch_cneg: ElementHandle,
}

impl Vcvs {
    pub fn new(name: &str, pos: &str, neg: &str, cpos: &str, cneg: &str, gain: f64) -> Self {
        Self {
            name: name.to_string(),
            pins: Pins::new(&[pos, neg, cpos, cneg]),
            gain: Param::given(gain),
            branch: 0,
            incidence: None,
            branch_cpos: ElementHandle::TRASH,
            branch_cneg: ElementHandle::TRASH,
        }
    }
}

const VCVS_PARAMS: &[ParamDef<Vcvs>] = &[ParamDef {
    name: "gain",
    info: "Voltage gain",
    get: |e| e.gain.get(),
    set: |e, v| e.gain.set(v),
}];

parameterized!(Vcvs, VCVS_PARAMS);

impl Device for Vcvs {
    device_basics!();

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let [pos, neg, cpos, cneg] = self.pins.bind(&self.name, ctx)?;
        self.branch = ctx.create_node(&format!("{}#branch", self.name), NodeType::Current);
        self.incidence = Some(BranchStamp::new(ctx, pos, neg, self.branch));
        self.branch_cpos = ctx.element(self.branch, cpos);
        self.branch_cneg = ctx.element(self.branch, cneg);
        Ok(())
    }

    fn branch(&self) -> Option<usize> {
        Some(self.branch)
    }

    fn load(&mut self, state: &mut CircuitState) {
        if let Some(incidence) = &self.incidence {
            incidence.stamp(&mut state.matrix);
        }
        let gain = self.gain.get();
        state.matrix.add(self.branch_cpos, -gain);
        state.matrix.add(self.branch_cneg, gain);
    }

    fn load_ac(&mut self, state: &mut CircuitState) {
        if let Some(incidence) = &self.incidence {
            incidence.stamp_complex(&mut state.matrix);
        }
        let gain = Complex64::new(self.gain.get(), 0.0);
        state.matrix.add_complex(self.branch_cpos, -gain);
        state.matrix.add_complex(self.branch_cneg, gain);
    }

    fn current(&self, state: &CircuitState) -> Option<f64> {
        Some(state.voltage(self.branch))
    }
}

/// Voltage-controlled current source.
#[derive(Debug, Clone)]
pub struct Vccs {
    pub name: String,
    pins: Pins,
    pub transconductance: Param,

    cpos: usize,
    cneg: usize,
    handles: Option<Transconductance>,
}

impl Vccs {
    pub fn new(name: &str, pos: &str, neg: &str, cpos: &str, cneg: &str, gm: f64) -> Self {
        Self {
            name: name.to_string(),
            pins: Pins::new(&[pos, neg, cpos, cneg]),
            transconductance: Param::given(gm),
            cpos: 0,
            cneg: 0,
            handles: None,
        }
    }
}

const VCCS_PARAMS: &[ParamDef<Vccs>] = &[
    ParamDef { name: "gain", info: "Transconductance", get: |g| g.transconductance.get(), set: |g, v| g.transconductance.set(v) },
    ParamDef { name: "gm", info: "Transconductance", get: |g| g.transconductance.get(), set: |g, v| g.transconductance.set(v) },
];

parameterized!(Vccs, VCCS_PARAMS);

impl Device for Vccs {
    device_basics!();

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let [pos, neg, cpos, cneg] = self.pins.bind(&self.name, ctx)?;
        self.cpos = cpos;
        self.cneg = cneg;
        self.handles = Some(Transconductance::new(ctx, pos, neg, cpos, cneg));
        Ok(())
    }

    fn load(&mut self, state: &mut CircuitState) {
        if let Some(h) = &self.handles {
            h.stamp(&mut state.matrix, self.transconductance.get());
        }
    }

    fn load_ac(&mut self, state: &mut CircuitState) {
        if let Some(h) = &self.handles {
            h.stamp_complex(&mut state.matrix, Complex64::new(self.transconductance.get(), 0.0));
        }
    }

    fn current(&self, state: &CircuitState) -> Option<f64> {
        Some(self.transconductance.get() * state.voltage_between(self.cpos, self.cneg))
    }
}

/// Current-controlled voltage source.
#[derive(Debug, Clone)]
pub struct Ccvs {
    pub name: String,
    pins: Pins,
    /// Name of the voltage source whose current controls the output
    pub control: String,
    pub transresistance: Param,

    branch: usize,
    incidence: Option<BranchStamp>,
    branch_control: ElementHandle,
}

impl Ccvs {
    pub fn new(name: &str, pos: &str, neg: &str, control: &str, transresistance: f64) -> Self {
        Self {
            name: name.to_string(),
            pins: Pins::new(&[pos, neg]),
            control: control.to_string(),
            transresistance: Param::given(transresistance),
            branch: 0,
            incidence: None,
            branch_control: ElementHandle::TRASH,
        }
    }
}

const CCVS_PARAMS: &[ParamDef<Ccvs>] = &[
    ParamDef { name: "gain", info: "Transresistance", get: |h| h.transresistance.get(), set: |h, v| h.transresistance.set(v) },
    ParamDef { name: "rm", info: "Transresistance", get: |h| h.transresistance.get(), set: |h, v| h.transresistance.set(v) },
];

parameterized!(Ccvs, CCVS_PARAMS);

impl Device for Ccvs {
    device_basics!();

    fn setup_priority(&self) -> i32 {
        -1
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let [pos, neg] = self.pins.bind(&self.name, ctx)?;
        let control = ctx.branch_of(&self.name, &self.control)?;
        self.branch = ctx.create_node(&format!("{}#branch", self.name), NodeType::Current);
        self.incidence = Some(BranchStamp::new(ctx, pos, neg, self.branch));
        self.branch_control = ctx.element(self.branch, control);
        Ok(())
    }

    fn branch(&self) -> Option<usize> {
        Some(self.branch)
    }

    fn load(&mut self, state: &mut CircuitState) {
        if let Some(incidence) = &self.incidence {
            incidence.stamp(&mut state.matrix);
        }
        state.matrix.add(self.branch_control, -self.transresistance.get());
    }

    fn load_ac(&mut self, state: &mut CircuitState) {
        if let Some(incidence) = &self.incidence {
            incidence.stamp_complex(&mut state.matrix);
        }
        state
            .matrix
            .add_complex(self.branch_control, Complex64::new(-self.transresistance.get(), 0.0));
    }

    fn current(&self, state: &CircuitState) -> Option<f64> {
        Some(state.voltage(self.branch))
    }
}

/// Current-controlled current source.
#[derive(Debug, Clone)]
pub struct Cccs {
    pub name: String,
    pins: Pins,
    /// Name of the voltage source whose current controls the output
    pub control: String,
    pub gain: Param,

    control_branch: usize,
    pos_control: ElementHandle,
    neg_control: ElementHandle,
}

impl Cccs {
    pub fn new(name: &str, pos: &str, neg: &str, control: &str, gain: f64) -> Self {
        Self {
            name: name.to_string(),
            pins: Pins::new(&[pos, neg]),
            control: control.to_string(),
            gain: Param::given(gain),
            control_branch: 0,
            pos_control: ElementHandle::TRASH,
            neg_control: ElementHandle::TRASH,
        }
    }
}

const CCCS_PARAMS: &[ParamDef<Cccs>] = &[ParamDef {
    name: "gain",
    info: "Current gain",
    get: |f| f.gain.get(),
    set: |f, v| f.gain.set(v),
}];

parameterized!(Cccs, CCCS_PARAMS);

impl Device for Cccs {
    device_basics!();

    fn setup_priority(&self) -> i32 {
        -1
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let [pos, neg] = self.pins.bind(&self.name, ctx)?;
        self.control_branch = ctx.branch_of(&self.name, &self.control)?;
        self.pos_control = ctx.element(pos, self.control_branch);
        self.neg_control = ctx.element(neg, self.control_branch);
        Ok(())
    }

    fn load(&mut self, state: &mut CircuitState) {
        let gain = self.gain.get();
        state.matrix.add(self.pos_control, gain);
        state.matrix.add(self.neg_control, -gain);
    }

    fn load_ac(&mut self, state: &mut CircuitState) {
        let gain = Complex64::new(self.gain.get(), 0.0);
        state.matrix.add_complex(self.pos_control, gain);
        state.matrix.add_complex(self.neg_control, -gain);
    }

    fn current(&self, state: &CircuitState) -> Option<f64> {
        Some(self.gain.get() * state.voltage(self.control_branch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_controlled_bind_late() {
        let f = Cccs::new("F1", "a", "0", "V1", 2.0);
        let h = Ccvs::new("H1", "a", "0", "V1", 100.0);
        let e = Vcvs::new("E1", "a", "0", "b", "0", 10.0);
        assert!(f.setup_priority() < e.setup_priority());
        assert!(h.setup_priority() < e.setup_priority());
    }

    #[test]
    fn test_controlled_parameter_aliases() {
        let mut g = Vccs::new("G1", "a", "0", "b", "0", 1e-3);
        assert_eq!(g.parameter("gm"), Some(1e-3));
        g.set_parameter("gain", 2e-3).unwrap();
        assert_eq!(g.parameter("gm"), Some(2e-3));
        assert_eq!(g.pins().len(), 4);
    }
}
