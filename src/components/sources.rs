//! Independent voltage and current sources.

use num_complex::Complex64;

use crate::circuit::{AcDrive, CircuitState, Domain, NodeType};
use crate::error::Result;
use crate::params::{self, Param, ParamDef, Parameterized};

use super::device::{stamp_complex_current, stamp_current, BranchStamp, Device, Pins, SetupContext};
use super::waveforms::Waveform;

/// Excitation shared by both source kinds.
#[derive(Debug, Clone)]
pub struct Excitation {
    pub dc: Param,
    pub waveform: Option<Waveform>,
    pub ac_magnitude: Param,
    /// AC phase in degrees
    pub ac_phase: Param,
}

impl Excitation {
    fn new(dc: f64) -> Self {
        Self {
            dc: Param::given(dc),
            waveform: None,
            ac_magnitude: Param::new(0.0),
            ac_phase: Param::new(0.0),
        }
    }

    /// Instantaneous value for the current analysis.
    fn value(&self, state: &CircuitState) -> f64 {
        match (&self.waveform, state.domain) {
            (Some(w), Domain::Time) => w.value_at(state.time()),
            (Some(w), _) if !self.dc.is_given() => w.value_at(0.0),
            _ => self.dc.get(),
        }
    }

    /// Small-signal phasor under the active AC drive.
    fn phasor(&self, name: &str, state: &CircuitState) -> Complex64 {
        match &state.ac_drive {
            AcDrive::Sources => {
                Complex64::from_polar(self.ac_magnitude.get(), self.ac_phase.get().to_radians())
            }
            AcDrive::Only(driven) if driven == name => Complex64::new(1.0, 0.0),
            AcDrive::Only(_) => Complex64::new(0.0, 0.0),
        }
    }

    /// Register the next waveform discontinuity with the integrator.
    fn register_breakpoint(&self, state: &mut CircuitState) {
        let (Some(waveform), Some(method)) = (&self.waveform, state.method.as_mut()) else {
            return;
        };
        if let Some(time) = waveform.next_breakpoint(method.time) {
            method.set_breakpoint(time);
        }
    }
}

macro_rules! excitation_params {
    ($ty:ty) => {
        &[
            ParamDef::<$ty> { name: "dc", info: "DC value", get: |s| s.excitation.dc.get(), set: |s, v| s.excitation.dc.set(v) },
            ParamDef::<$ty> { name: "acmag", info: "AC magnitude", get: |s| s.excitation.ac_magnitude.get(), set: |s, v| s.excitation.ac_magnitude.set(v) },
            ParamDef::<$ty> { name: "ac", info: "AC magnitude", get: |s| s.excitation.ac_magnitude.get(), set: |s, v| s.excitation.ac_magnitude.set(v) },
            ParamDef::<$ty> { name: "acphase", info: "AC phase in degrees", get: |s| s.excitation.ac_phase.get(), set: |s, v| s.excitation.ac_phase.set(v) },
        ]
    };
}

/// An independent voltage source.
///
/// Adds a branch current unknown enforcing `v(pos) - v(neg) = value`.
#[derive(Debug, Clone)]
pub struct VoltageSource {
    pub name: String,
    pins: Pins,
    pub excitation: Excitation,

    pos: usize,
    neg: usize,
    branch: usize,
    incidence: Option<BranchStamp>,
}

impl VoltageSource {
    /// Create a DC voltage source.
    pub fn new(name: &str, pos: &str, neg: &str, dc: f64) -> Self {
        Self {
            name: name.to_string(),
            pins: Pins::new(&[pos, neg]),
            excitation: Excitation::new(dc),
            pos: 0,
            neg: 0,
            branch: 0,
            incidence: None,
        }
    }

    /// Drive the source with a time-varying waveform.
    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.excitation.dc = Param::new(waveform.value_at(0.0));
        self.excitation.waveform = Some(waveform);
        self
    }

    /// Set the small-signal excitation (phase in degrees).
    pub fn with_ac(mut self, magnitude: f64, phase: f64) -> Self {
        self.excitation.ac_magnitude.set(magnitude);
        self.excitation.ac_phase.set(phase);
        self
    }
}

const VOLTAGE_SOURCE_PARAMS: &[ParamDef<VoltageSource>] = excitation_params!(VoltageSource);

impl Parameterized for VoltageSource {
    fn table() -> &'static [ParamDef<Self>] {
        VOLTAGE_SOURCE_PARAMS
    }

    fn entity_name(&self) -> &str {
        &self.name
    }
}

impl Device for VoltageSource {
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
        1
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        if let Some(waveform) = &self.excitation.waveform {
            waveform.validate(&self.name)?;
        }
        let [pos, neg] = self.pins.bind(&self.name, ctx)?;
        self.pos = pos;
        self.neg = neg;
        self.branch = ctx.create_node(&format!("{}#branch", self.name), NodeType::Current);
        self.incidence = Some(BranchStamp::new(ctx, pos, neg, self.branch));
        Ok(())
    }

    fn branch(&self) -> Option<usize> {
        Some(self.branch)
    }

    fn load(&mut self, state: &mut CircuitState) {
        if let Some(incidence) = &self.incidence {
            incidence.stamp(&mut state.matrix);
        }
        let value = self.excitation.value(state);
        state.rhs[self.branch] += value;
    }

    fn load_ac(&mut self, state: &mut CircuitState) {
        if let Some(incidence) = &self.incidence {
            incidence.stamp_complex(&mut state.matrix);
        }
        let phasor = self.excitation.phasor(&self.name, state);
        state.complex_rhs[self.branch] += phasor;
    }

    fn accept(&mut self, state: &mut CircuitState) {
        self.excitation.register_breakpoint(state);
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

/// An independent current source, flowing from `pos` through the source
/// to `neg`.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    pub name: String,
    pins: Pins,
    pub excitation: Excitation,

    pos: usize,
    neg: usize,
}

impl CurrentSource {
    /// Create a DC current source.
    pub fn new(name: &str, pos: &str, neg: &str, dc: f64) -> Self {
        Self {
            name: name.to_string(),
            pins: Pins::new(&[pos, neg]),
            excitation: Excitation::new(dc),
            pos: 0,
            neg: 0,
        }
    }

    /// Drive the source with a time-varying waveform.
    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.excitation.dc = Param::new(waveform.value_at(0.0));
        self.excitation.waveform = Some(waveform);
        self
    }

    /// Set the small-signal excitation (phase in degrees).
    pub fn with_ac(mut self, magnitude: f64, phase: f64) -> Self {
        self.excitation.ac_magnitude.set(magnitude);
        self.excitation.ac_phase.set(phase);
        self
    }
}

const CURRENT_SOURCE_PARAMS: &[ParamDef<CurrentSource>] = excitation_params!(CurrentSource);

impl Parameterized for CurrentSource {
    fn table() -> &'static [ParamDef<Self>] {
        CURRENT_SOURCE_PARAMS
    }

    fn entity_name(&self) -> &str {
        &self.name
    }
}

impl Device for CurrentSource {
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
        if let Some(waveform) = &self.excitation.waveform {
            waveform.validate(&self.name)?;
        }
        let [pos, neg] = self.pins.bind(&self.name, ctx)?;
        self.pos = pos;
        self.neg = neg;
        Ok(())
    }

    fn load(&mut self, state: &mut CircuitState) {
        let value = self.excitation.value(state);
        stamp_current(&mut state.rhs, self.pos, self.neg, value);
    }

    fn load_ac(&mut self, state: &mut CircuitState) {
        let phasor = self.excitation.phasor(&self.name, state);
        stamp_complex_current(&mut state.complex_rhs, self.pos, self.neg, phasor);
    }

    fn accept(&mut self, state: &mut CircuitState) {
        self.excitation.register_breakpoint(state);
    }

    fn current(&self, state: &CircuitState) -> Option<f64> {
        Some(self.excitation.value(state))
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
    fn test_source_parameters() {
        let mut v = VoltageSource::new("V1", "in", "0", 5.0).with_ac(1.0, 45.0);
        assert_eq!(v.parameter("dc"), Some(5.0));
        assert_eq!(v.parameter("ACMAG"), Some(1.0));
        assert_eq!(v.parameter("acphase"), Some(45.0));
        v.set_parameter("dc", 3.0).unwrap();
        assert_eq!(v.excitation.dc.get(), 3.0);
        assert!(v.set_parameter("gain", 1.0).is_err());
    }

    #[test]
    fn test_waveform_sets_dc_default() {
        let v = VoltageSource::new("V1", "in", "0", 0.0)
            .with_waveform(Waveform::pulse(1.0, 2.0, 1e-3, 1e-4, 1e-4, 1e-3, 0.0));
        assert!(!v.excitation.dc.is_given());
        assert_eq!(v.excitation.dc.get(), 1.0);
    }

    #[test]
    fn test_current_source_priority() {
        let i = CurrentSource::new("I1", "0", "a", 1e-3);
        let v = VoltageSource::new("V1", "a", "0", 1.0);
        assert!(v.setup_priority() > i.setup_priority());
    }
}
