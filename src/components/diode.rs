//! Junction diode.
//!
//! Uses the Shockley diode equation with an ideality factor:
//!   I = Is * (exp(V / (n * Vt)) - 1)
//!
//! with a cubic reverse region, optional breakdown, a series resistance on
//! an internal node, and depletion plus diffusion charge. For Newton-Raphson
//! iteration the diode is linearized around the current iterate:
//!   I ≈ I0 + G_d * (V - V0)

use num_complex::Complex64;

use crate::circuit::{CircuitState, Domain, InitMode, NodeType};
use crate::error::Result;
use crate::params::{self, Param, ParamDef, Parameterized};
use crate::sparse::ElementHandle;
use crate::{BOLTZMANN, CELSIUS_TO_KELVIN, CHARGE};

use super::device::{Device, NoiseSource, Pins, SetupContext};
use super::junction::{critical_voltage, depletion, pnjlim, thermal_voltage};

/// Parameters for a diode model.
#[derive(Debug, Clone)]
pub struct DiodeModel {
    pub name: String,
    /// Saturation current
    pub is: Param,
    /// Emission coefficient
    pub n: Param,
    /// Ohmic resistance
    pub rs: Param,
    /// Zero-bias junction capacitance
    pub cjo: Param,
    /// Junction potential
    pub vj: Param,
    /// Grading coefficient
    pub m: Param,
    /// Transit time
    pub tt: Param,
    /// Reverse breakdown voltage
    pub bv: Param,
    /// Current at breakdown voltage
    pub ibv: Param,
    /// Forward bias depletion capacitance coefficient
    pub fc: Param,
    /// Activation energy
    pub eg: Param,
    /// Saturation current temperature exponent
    pub xti: Param,
    /// Flicker noise coefficient
    pub kf: Param,
    /// Flicker noise exponent
    pub af: Param,
    /// Nominal temperature in °C
    pub tnom: Param,
}

impl DiodeModel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is: Param::new(1e-14),
            n: Param::new(1.0),
            rs: Param::new(0.0),
            cjo: Param::new(0.0),
            vj: Param::new(1.0),
            m: Param::new(0.5),
            tt: Param::new(0.0),
            bv: Param::new(f64::INFINITY),
            ibv: Param::new(1e-3),
            fc: Param::new(0.5),
            eg: Param::new(1.11),
            xti: Param::new(3.0),
            kf: Param::new(0.0),
            af: Param::new(1.0),
            tnom: Param::new(crate::NOMINAL_TEMPERATURE - CELSIUS_TO_KELVIN),
        }
    }
}

const DIODE_MODEL_PARAMS: &[ParamDef<DiodeModel>] = &[
    ParamDef { name: "is", info: "Saturation current", get: |m| m.is.get(), set: |m, v| m.is.set(v) },
    ParamDef { name: "n", info: "Emission coefficient", get: |m| m.n.get(), set: |m, v| m.n.set(v) },
    ParamDef { name: "rs", info: "Ohmic resistance", get: |m| m.rs.get(), set: |m, v| m.rs.set(v) },
    ParamDef { name: "cjo", info: "Junction capacitance", get: |m| m.cjo.get(), set: |m, v| m.cjo.set(v) },
    ParamDef { name: "cj0", info: "Junction capacitance", get: |m| m.cjo.get(), set: |m, v| m.cjo.set(v) },
    ParamDef { name: "vj", info: "Junction potential", get: |m| m.vj.get(), set: |m, v| m.vj.set(v) },
    ParamDef { name: "m", info: "Grading coefficient", get: |m| m.m.get(), set: |m, v| m.m.set(v) },
    ParamDef { name: "tt", info: "Transit time", get: |m| m.tt.get(), set: |m, v| m.tt.set(v) },
    ParamDef { name: "bv", info: "Reverse breakdown voltage", get: |m| m.bv.get(), set: |m, v| m.bv.set(v) },
    ParamDef { name: "ibv", info: "Current at reverse breakdown voltage", get: |m| m.ibv.get(), set: |m, v| m.ibv.set(v) },
    ParamDef { name: "fc", info: "Forward bias junction fit parameter", get: |m| m.fc.get(), set: |m, v| m.fc.set(v) },
    ParamDef { name: "eg", info: "Activation energy", get: |m| m.eg.get(), set: |m, v| m.eg.set(v) },
    ParamDef { name: "xti", info: "Saturation current temperature exponent", get: |m| m.xti.get(), set: |m, v| m.xti.set(v) },
    ParamDef { name: "kf", info: "Flicker noise coefficient", get: |m| m.kf.get(), set: |m, v| m.kf.set(v) },
    ParamDef { name: "af", info: "Flicker noise exponent", get: |m| m.af.get(), set: |m, v| m.af.set(v) },
    ParamDef { name: "tnom", info: "Parameter measurement temperature", get: |m| m.tnom.get(), set: |m, v| m.tnom.set(v) },
];

impl Parameterized for DiodeModel {
    fn table() -> &'static [ParamDef<Self>] {
        DIODE_MODEL_PARAMS
    }

    fn entity_name(&self) -> &str {
        &self.name
    }
}

// State slot offsets
const VD: usize = 0;
const ID: usize = 1;
const GD: usize = 2;
const QCAP: usize = 3;

/// Values derived from the model at the analysis temperature.
#[derive(Debug, Clone, Default)]
struct DiodeTemp {
    vt: f64,
    vte: f64,
    sat_current: f64,
    vcrit: f64,
    breakdown: Option<f64>,
    series_conductance: f64,
    czero: f64,
}

#[derive(Debug, Clone, Copy)]
struct DiodeHandles {
    pos_pos: ElementHandle,
    neg_neg: ElementHandle,
    prime_prime: ElementHandle,
    pos_prime: ElementHandle,
    prime_pos: ElementHandle,
    neg_prime: ElementHandle,
    prime_neg: ElementHandle,
}

/// A diode between an anode and a cathode.
#[derive(Debug, Clone)]
pub struct Diode {
    pub name: String,
    pins: Pins,
    pub model: String,
    pub area: Param,
    /// Start the operating point iteration with the junction off
    pub off: bool,
    /// Initial junction voltage when skipping the operating point
    pub ic: Param,
    /// Instance temperature in °C
    pub temp: Param,

    bound: Option<DiodeModel>,
    derived: DiodeTemp,
    pos: usize,
    neg: usize,
    prime: usize,
    handles: Option<DiodeHandles>,
    states: usize,
    capacitance: f64,
    temperature: f64,
}

impl Diode {
    pub fn new(name: &str, anode: &str, cathode: &str, model: &str) -> Self {
        Self {
            name: name.to_string(),
            pins: Pins::new(&[anode, cathode]),
            model: model.to_string(),
            area: Param::new(1.0),
            off: false,
            ic: Param::new(0.0),
            temp: Param::new(0.0),
            bound: None,
            derived: DiodeTemp::default(),
            pos: 0,
            neg: 0,
            prime: 0,
            handles: None,
            states: 0,
            capacitance: 0.0,
            temperature: crate::NOMINAL_TEMPERATURE,
        }
    }

    /// Junction voltage in the latest converged load.
    pub fn junction_voltage(&self, state: &CircuitState) -> f64 {
        state.states[0][self.states + VD]
    }

    /// Junction current and conductance at `vd`.
    fn evaluate(&self, vd: f64, gmin: f64) -> (f64, f64) {
        let t = &self.derived;
        let csat = t.sat_current;
        let vte = t.vte;
        if vd >= -3.0 * vte {
            let evd = (vd / vte).exp();
            (csat * (evd - 1.0) + gmin * vd, csat * evd / vte + gmin)
        } else if t.breakdown.map_or(true, |xbv| vd >= -xbv) {
            let arg = 3.0 * vte / (vd * std::f64::consts::E);
            let arg = arg * arg * arg;
            (-csat * (1.0 + arg) + gmin * vd, csat * 3.0 * arg / vd + gmin)
        } else {
            let xbv = t.breakdown.unwrap_or(f64::INFINITY);
            let evrev = (-(xbv + vd) / vte).exp();
            (-csat * evrev + gmin * vd, csat * evrev / vte + gmin)
        }
    }

    /// Limit the new junction voltage against the previous iterate.
    fn limit(&self, vd: f64, vold: f64, factor: f64) -> (f64, bool) {
        let t = &self.derived;
        match t.breakdown {
            Some(xbv) if vd < (-xbv + 10.0 * t.vte).min(0.0) => {
                let (vdtemp, limited) = pnjlim(-(vd + xbv), -(vold + xbv), t.vte, t.vcrit, factor);
                (-(vdtemp + xbv), limited)
            }
            _ => pnjlim(vd, vold, t.vte, t.vcrit, factor),
        }
    }
}

const DIODE_PARAMS: &[ParamDef<Diode>] = &[
    ParamDef { name: "area", info: "Area factor", get: |d| d.area.get(), set: |d, v| d.area.set(v) },
    ParamDef { name: "ic", info: "Initial junction voltage", get: |d| d.ic.get(), set: |d, v| d.ic.set(v) },
    ParamDef { name: "temp", info: "Instance temperature", get: |d| d.temp.get(), set: |d, v| d.temp.set(v) },
    ParamDef { name: "off", info: "Initially off", get: |d| if d.off { 1.0 } else { 0.0 }, set: |d, v| d.off = v != 0.0 },
];

impl Parameterized for Diode {
    fn table() -> &'static [ParamDef<Self>] {
        DIODE_PARAMS
    }

    fn entity_name(&self) -> &str {
        &self.name
    }
}

impl Device for Diode {
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
        let model = ctx.model::<DiodeModel>(&self.name, &self.model)?;
        self.pos = pos;
        self.neg = neg;
        self.prime = if model.rs.get() > 0.0 {
            ctx.create_node(&format!("{}#internal", self.name), NodeType::Voltage)
        } else {
            pos
        };
        let prime = self.prime;
        self.handles = Some(DiodeHandles {
            pos_pos: ctx.element(pos, pos),
            neg_neg: ctx.element(neg, neg),
            prime_prime: ctx.element(prime, prime),
            pos_prime: ctx.element(pos, prime),
            prime_pos: ctx.element(prime, pos),
            neg_prime: ctx.element(neg, prime),
            prime_neg: ctx.element(prime, neg),
        });
        self.states = ctx.allocate_states(5);
        self.bound = Some(model);
        Ok(())
    }

    fn temperature(&mut self, state: &CircuitState) -> Result<()> {
        let Some(model) = &self.bound else {
            return Ok(());
        };
        let temperature = if self.temp.is_given() {
            self.temp.get() + CELSIUS_TO_KELVIN
        } else {
            state.temperature
        };
        let tnom = if model.tnom.is_given() {
            model.tnom.get() + CELSIUS_TO_KELVIN
        } else {
            state.nominal_temperature
        };
        self.temperature = temperature;

        let area = self.area.get();
        let n = model.n.get();
        let vt = thermal_voltage(temperature);
        let vte = n * vt;
        let ratio = temperature / tnom;
        let factor = (ratio - 1.0) * model.eg.get() / vte + model.xti.get() / n * ratio.ln();
        let sat_current = model.is.get() * factor.exp() * area;

        let breakdown = if model.bv.get().is_finite() {
            let bv = model.bv.get();
            let cbv = model.ibv.get() * area;
            if cbv < sat_current * bv / vt {
                Some(bv)
            } else {
                let tol = state.tolerances.reltol * cbv;
                let mut xbv = bv - vt * (1.0 + cbv / sat_current).ln();
                for _ in 0..25 {
                    xbv = bv - vt * (cbv / sat_current + 1.0 - xbv / vt).ln();
                    let cbv_new = sat_current * (((bv - xbv) / vt).exp() - 1.0 + xbv / vt);
                    if (cbv_new - cbv).abs() <= tol {
                        break;
                    }
                }
                Some(xbv)
            }
        } else {
            None
        };

        self.derived = DiodeTemp {
            vt,
            vte,
            sat_current,
            vcrit: critical_voltage(vte, sat_current),
            breakdown,
            series_conductance: if model.rs.get() > 0.0 {
                area / model.rs.get()
            } else {
                0.0
            },
            czero: model.cjo.get() * area,
        };
        Ok(())
    }

    fn load(&mut self, state: &mut CircuitState) {
        let Some(model) = &self.bound else {
            return;
        };
        let s = self.states;
        let gmin = state.gmin;

        let mut limited = false;
        let vd = match state.init {
            InitMode::SmallSignal => state.states[0][s + VD],
            InitMode::Transient => state.states[1][s + VD],
            InitMode::Junction if state.domain == Domain::Time && state.use_ic => self.ic.get(),
            InitMode::Junction if self.off => 0.0,
            InitMode::Junction => self.derived.vcrit,
            InitMode::Fix if self.off => 0.0,
            _ => {
                let vd = if state.init == InitMode::Predict {
                    let extrapolated = match &state.method {
                        Some(method) => method.extrapolate(&state.states, s + VD),
                        None => state.states[1][s + VD],
                    };
                    state.states.copy_slot(s + VD, 1, 0);
                    state.states.copy_slot(s + ID, 1, 0);
                    state.states.copy_slot(s + GD, 1, 0);
                    extrapolated
                } else {
                    state.voltage_between(self.prime, self.neg)
                };
                let (vd, was_limited) = self.limit(vd, state.states[0][s + VD], state.limit_factor);
                limited = was_limited;
                vd
            }
        };

        let (mut cd, mut gd) = self.evaluate(vd, gmin);

        if state.domain == Domain::Time || state.init == InitMode::SmallSignal {
            let (qdep, cdep) = depletion(vd, self.derived.czero, model.vj.get(), model.m.get(), model.fc.get());
            let tt = model.tt.get();
            state.states[0][s + QCAP] = tt * cd + qdep;
            self.capacitance = tt * gd + cdep;

            if state.is_transient() {
                if let Some(method) = state.method.as_ref() {
                    if state.init == InitMode::Transient {
                        state.states[1][s + QCAP] = state.states[0][s + QCAP];
                    }
                    let (geq, _) = method.integrate(&mut state.states, s + QCAP, self.capacitance);
                    gd += geq;
                    cd += state.states[0][s + QCAP + 1];
                    if state.init == InitMode::Transient {
                        state.states[1][s + QCAP + 1] = state.states[0][s + QCAP + 1];
                    }
                }
            }
        }

        if limited && !(state.init == InitMode::Fix && self.off) {
            state.noncon += 1;
        }

        state.states[0][s + VD] = vd;
        state.states[0][s + ID] = cd;
        state.states[0][s + GD] = gd;

        let cdeq = cd - gd * vd;
        state.rhs[self.neg] += cdeq;
        state.rhs[self.prime] -= cdeq;

        let gspr = self.derived.series_conductance;
        if let Some(h) = &self.handles {
            let m = &mut state.matrix;
            m.add(h.pos_pos, gspr);
            m.add(h.neg_neg, gd);
            m.add(h.prime_prime, gd + gspr);
            m.add(h.pos_prime, -gspr);
            m.add(h.prime_pos, -gspr);
            m.add(h.neg_prime, -gd);
            m.add(h.prime_neg, -gd);
        }
    }

    fn load_ac(&mut self, state: &mut CircuitState) {
        let gd = state.states[0][self.states + GD];
        let y = Complex64::new(gd, 0.0) + state.laplace * self.capacitance;
        let gspr = Complex64::new(self.derived.series_conductance, 0.0);
        if let Some(h) = &self.handles {
            let m = &mut state.matrix;
            m.add_complex(h.pos_pos, gspr);
            m.add_complex(h.neg_neg, y);
            m.add_complex(h.prime_prime, y + gspr);
            m.add_complex(h.pos_prime, -gspr);
            m.add_complex(h.prime_pos, -gspr);
            m.add_complex(h.neg_prime, -y);
            m.add_complex(h.prime_neg, -y);
        }
    }

    fn is_convergent(&self, state: &CircuitState) -> bool {
        let s = self.states;
        let vd = state.voltage_between(self.prime, self.neg);
        let delvd = vd - state.states[0][s + VD];
        let cd = state.states[0][s + ID];
        let cdhat = cd + state.states[0][s + GD] * delvd;
        let tol = state.tolerances.bound(cdhat, cd, state.tolerances.abstol);
        (cdhat - cd).abs() <= tol
    }

    fn truncate(&self, state: &CircuitState) -> f64 {
        let has_charge = self.bound.as_ref().is_some_and(|m| m.tt.get() > 0.0) || self.derived.czero > 0.0;
        match &state.method {
            Some(method) if has_charge => method.truncation_step(&state.states, self.states + QCAP),
            _ => f64::INFINITY,
        }
    }

    fn noise(&self, state: &CircuitState, frequency: f64, sources: &mut Vec<NoiseSource>) {
        let Some(model) = &self.bound else {
            return;
        };
        let id = state.states[0][self.states + ID];
        sources.push(NoiseSource {
            name: format!("{}.shot", self.name),
            pos: self.prime,
            neg: self.neg,
            density: 2.0 * CHARGE * id.abs(),
        });
        if model.kf.get() > 0.0 && frequency > 0.0 {
            sources.push(NoiseSource {
                name: format!("{}.flicker", self.name),
                pos: self.prime,
                neg: self.neg,
                density: model.kf.get() * id.abs().powf(model.af.get()) / frequency,
            });
        }
        if self.derived.series_conductance > 0.0 {
            sources.push(NoiseSource {
                name: format!("{}.thermal", self.name),
                pos: self.pos,
                neg: self.prime,
                density: 4.0 * BOLTZMANN * self.temperature * self.derived.series_conductance,
            });
        }
    }

    fn current(&self, state: &CircuitState) -> Option<f64> {
        Some(state.states[0][self.states + ID])
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

    fn diode() -> Diode {
        let mut d = Diode::new("D1", "a", "0", "DMOD");
        let vt = thermal_voltage(crate::NOMINAL_TEMPERATURE);
        d.derived = DiodeTemp {
            vt,
            vte: vt,
            sat_current: 1e-14,
            vcrit: critical_voltage(vt, 1e-14),
            breakdown: None,
            series_conductance: 0.0,
            czero: 0.0,
        };
        d
    }

    #[test]
    fn test_forward_bias_current() {
        let d = diode();
        let (i_small, _) = d.evaluate(0.3, 0.0);
        let (i_large, g) = d.evaluate(0.6, 0.0);
        assert!(i_large > i_small * 100.0);
        assert_relative_eq!(g, (i_large + 1e-14) / d.derived.vte, max_relative = 1e-9);
    }

    #[test]
    fn test_reverse_bias_saturates() {
        let d = diode();
        let (i_rev, g) = d.evaluate(-1.0, 0.0);
        assert!(i_rev < 0.0);
        assert!(i_rev > -2.0e-14);
        assert!(g > 0.0);
    }

    #[test]
    fn test_breakdown_region_conducts() {
        let mut d = diode();
        d.derived.breakdown = Some(5.0);
        let (i, _) = d.evaluate(-5.2, 0.0);
        assert!(i < -1e-12);
    }

    #[test]
    fn test_model_parameter_table() {
        let mut m = DiodeModel::new("DMOD");
        params::set_parameter(&mut m, "CJ0", 2e-12).unwrap();
        assert_eq!(params::get_parameter(&m, "cjo"), Some(2e-12));
        assert!(params::set_parameter(&mut m, "xyz", 1.0).is_err());
    }
}
