//! Level 1 MOSFET (Shichman-Hodges).
//!
//! Square-law channel current with channel length modulation and body
//! effect, bulk junction diodes to the drain and source, ohmic drain and
//! source resistances on internal nodes, and constant gate overlap
//! capacitances.

use num_complex::Complex64;

use crate::circuit::{CircuitState, Domain, InitMode, NodeType};
use crate::error::{Result, SimError};
use crate::params::{self, Param, ParamDef, Parameterized};
use crate::sparse::{ElementHandle, Matrix};
use crate::{BOLTZMANN, CELSIUS_TO_KELVIN};

use super::bjt::set_ic;
use super::device::{stamp_current, Device, NoiseSource, Pins, SetupContext, TwoTerminal};
use super::junction::{critical_voltage, fetlim, limvds, pnjlim, thermal_voltage};

/// Permittivity of silicon dioxide in F/m.
const EPSILON_OX: f64 = 3.9 * 8.854_214_871e-12;

/// Largest exponent argument used for the bulk diodes.
const MAX_EXP_ARG: f64 = 709.0;

/// MOSFET channel type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MosfetType {
    Nmos,
    Pmos,
}

impl MosfetType {
    fn sign(self) -> f64 {
        match self {
            MosfetType::Nmos => 1.0,
            MosfetType::Pmos => -1.0,
        }
    }
}

/// Parameters for a level 1 MOSFET model.
#[derive(Debug, Clone)]
pub struct MosfetModel {
    pub name: String,
    pub mos_type: MosfetType,
    /// Zero-bias threshold voltage
    pub vto: Param,
    /// Transconductance parameter
    pub kp: Param,
    /// Bulk threshold parameter
    pub gamma: Param,
    /// Surface potential
    pub phi: Param,
    /// Channel length modulation
    pub lambda: Param,
    pub rd: Param,
    pub rs: Param,
    /// Gate-source overlap capacitance per meter of width
    pub cgso: Param,
    /// Gate-drain overlap capacitance per meter of width
    pub cgdo: Param,
    /// Gate-bulk overlap capacitance per meter of length
    pub cgbo: Param,
    /// Bulk junction saturation current
    pub is: Param,
    /// Oxide thickness
    pub tox: Param,
    pub kf: Param,
    pub af: Param,
    pub tnom: Param,
}

impl MosfetModel {
    pub fn new(name: &str, mos_type: MosfetType) -> Self {
        Self {
            name: name.to_string(),
            mos_type,
            vto: Param::new(0.0),
            kp: Param::new(2e-5),
            gamma: Param::new(0.0),
            phi: Param::new(0.6),
            lambda: Param::new(0.0),
            rd: Param::new(0.0),
            rs: Param::new(0.0),
            cgso: Param::new(0.0),
            cgdo: Param::new(0.0),
            cgbo: Param::new(0.0),
            is: Param::new(1e-14),
            tox: Param::new(0.0),
            kf: Param::new(0.0),
            af: Param::new(1.0),
            tnom: Param::new(crate::NOMINAL_TEMPERATURE - CELSIUS_TO_KELVIN),
        }
    }

    pub fn nmos(name: &str) -> Self {
        Self::new(name, MosfetType::Nmos)
    }

    pub fn pmos(name: &str) -> Self {
        Self::new(name, MosfetType::Pmos)
    }
}

const MOSFET_MODEL_PARAMS: &[ParamDef<MosfetModel>] = &[
    ParamDef { name: "vto", info: "Threshold voltage", get: |m| m.vto.get(), set: |m, v| m.vto.set(v) },
    ParamDef { name: "vt0", info: "Threshold voltage", get: |m| m.vto.get(), set: |m, v| m.vto.set(v) },
    ParamDef { name: "kp", info: "Transconductance parameter", get: |m| m.kp.get(), set: |m, v| m.kp.set(v) },
    ParamDef { name: "gamma", info: "Bulk threshold parameter", get: |m| m.gamma.get(), set: |m, v| m.gamma.set(v) },
    ParamDef { name: "phi", info: "Surface potential", get: |m| m.phi.get(), set: |m, v| m.phi.set(v) },
    ParamDef { name: "lambda", info: "Channel length modulation", get: |m| m.lambda.get(), set: |m, v| m.lambda.set(v) },
    ParamDef { name: "rd", info: "Drain ohmic resistance", get: |m| m.rd.get(), set: |m, v| m.rd.set(v) },
    ParamDef { name: "rs", info: "Source ohmic resistance", get: |m| m.rs.get(), set: |m, v| m.rs.set(v) },
    ParamDef { name: "cgso", info: "Gate-source overlap capacitance", get: |m| m.cgso.get(), set: |m, v| m.cgso.set(v) },
    ParamDef { name: "cgdo", info: "Gate-drain overlap capacitance", get: |m| m.cgdo.get(), set: |m, v| m.cgdo.set(v) },
    ParamDef { name: "cgbo", info: "Gate-bulk overlap capacitance", get: |m| m.cgbo.get(), set: |m, v| m.cgbo.set(v) },
    ParamDef { name: "is", info: "Bulk junction saturation current", get: |m| m.is.get(), set: |m, v| m.is.set(v) },
    ParamDef { name: "tox", info: "Oxide thickness", get: |m| m.tox.get(), set: |m, v| m.tox.set(v) },
    ParamDef { name: "kf", info: "Flicker noise coefficient", get: |m| m.kf.get(), set: |m, v| m.kf.set(v) },
    ParamDef { name: "af", info: "Flicker noise exponent", get: |m| m.af.get(), set: |m, v| m.af.set(v) },
    ParamDef { name: "tnom", info: "Parameter measurement temperature", get: |m| m.tnom.get(), set: |m, v| m.tnom.set(v) },
];

impl Parameterized for MosfetModel {
    fn table() -> &'static [ParamDef<Self>] {
        MOSFET_MODEL_PARAMS
    }

    fn entity_name(&self) -> &str {
        &self.name
    }
}

// State slot offsets
const VBS: usize = 0;
const VGS: usize = 1;
const VDS: usize = 2;
const CD: usize = 3;
const CBS: usize = 4;
const CBD: usize = 5;
const GM: usize = 6;
const GDS: usize = 7;
const GMBS: usize = 8;
const GBD: usize = 9;
const GBS: usize = 10;
const QGS: usize = 11;
const QGD: usize = 13;
const QGB: usize = 15;
const SLOTS: usize = 17;

/// Channel current and small-signal parameters in normalized polarity.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Channel {
    cdrain: f64,
    gm: f64,
    gds: f64,
    gmbs: f64,
    von: f64,
}

#[derive(Debug, Clone, Default)]
struct MosfetTemp {
    vt: f64,
    beta: f64,
    vcrit: f64,
}

#[derive(Debug, Clone, Copy)]
struct MosfetHandles {
    dd: ElementHandle,
    ss: ElementHandle,
    bb: ElementHandle,
    dpdp: ElementHandle,
    spsp: ElementHandle,
    d_dp: ElementHandle,
    s_sp: ElementHandle,
    b_dp: ElementHandle,
    b_sp: ElementHandle,
    dp_d: ElementHandle,
    dp_g: ElementHandle,
    dp_b: ElementHandle,
    dp_sp: ElementHandle,
    sp_g: ElementHandle,
    sp_s: ElementHandle,
    sp_b: ElementHandle,
    sp_dp: ElementHandle,
    gate_source: TwoTerminal,
    gate_drain: TwoTerminal,
    gate_bulk: TwoTerminal,
}

/// A four-terminal MOSFET with drain, gate, source and bulk pins.
#[derive(Debug, Clone)]
pub struct Mosfet {
    pub name: String,
    pins: Pins,
    pub model: String,
    pub width: Param,
    pub length: Param,
    pub off: bool,
    /// Initial conditions `[vds, vgs, vbs]`
    pub ic: Option<Vec<f64>>,
    pub temp: Param,

    bound: Option<MosfetModel>,
    derived: MosfetTemp,
    drain: usize,
    gate: usize,
    source: usize,
    bulk: usize,
    dprime: usize,
    sprime: usize,
    handles: Option<MosfetHandles>,
    states: usize,
    /// Channel orientation of the latest load: 1 normal, -1 drain and source swapped
    mode: f64,
    von: f64,
    temperature: f64,
}

impl Mosfet {
    pub fn new(name: &str, drain: &str, gate: &str, source: &str, bulk: &str, model: &str) -> Self {
        Self {
            name: name.to_string(),
            pins: Pins::new(&[drain, gate, source, bulk]),
            model: model.to_string(),
            width: Param::new(1e-4),
            length: Param::new(1e-4),
            off: false,
            ic: None,
            temp: Param::new(0.0),
            bound: None,
            derived: MosfetTemp::default(),
            drain: 0,
            gate: 0,
            source: 0,
            bulk: 0,
            dprime: 0,
            sprime: 0,
            handles: None,
            states: 0,
            mode: 1.0,
            von: 0.0,
            temperature: crate::NOMINAL_TEMPERATURE,
        }
    }

    /// Set the channel geometry.
    pub fn with_size(mut self, width: f64, length: f64) -> Self {
        self.width.set(width);
        self.length.set(length);
        self
    }

    /// Set the initial conditions `[vds, vgs, vbs]`.
    pub fn with_ic(mut self, ic: Vec<f64>) -> Self {
        self.ic = Some(ic);
        self
    }

    fn ic_value(&self, index: usize) -> f64 {
        self.ic
            .as_ref()
            .and_then(|ic| ic.get(index).copied())
            .unwrap_or(0.0)
    }

    /// Square-law channel evaluated with `vgs`, `vds >= 0` and `vbs` in the
    /// orientation where the drain is the higher terminal.
    fn channel(model: &MosfetModel, beta: f64, vgs: f64, vds: f64, vbs: f64) -> Channel {
        let sign = model.mos_type.sign();
        let phi = model.phi.get();
        let gamma = model.gamma.get();
        let lambda = model.lambda.get();

        let mut sarg = if vbs <= 0.0 {
            (phi - vbs).sqrt()
        } else {
            let s = phi.sqrt();
            s - vbs / (s + s)
        };
        sarg = sarg.max(0.0);
        let von = sign * model.vto.get() + gamma * (sarg - phi.sqrt());
        let vgst = vgs - von;
        if vgst <= 0.0 {
            return Channel {
                von,
                ..Channel::default()
            };
        }

        let arg = if sarg <= 0.0 { 0.0 } else { gamma / (sarg + sarg) };
        let betap = beta * (1.0 + lambda * vds);
        if vgst <= vds {
            // Saturation
            let gm = betap * vgst;
            Channel {
                cdrain: betap * vgst * vgst * 0.5,
                gm,
                gds: lambda * beta * vgst * vgst * 0.5,
                gmbs: gm * arg,
                von,
            }
        } else {
            // Linear region
            let gm = betap * vds;
            Channel {
                cdrain: betap * vds * (vgst - 0.5 * vds),
                gm,
                gds: betap * (vgst - vds) + lambda * beta * vds * (vgst - 0.5 * vds),
                gmbs: gm * arg,
                von,
            }
        }
    }

    fn bulk_diode(&self, v: f64, gmin: f64) -> (f64, f64) {
        let sat = self.bound.as_ref().map_or(0.0, |m| m.is.get());
        let vt = self.derived.vt;
        if v <= 0.0 {
            let g = sat / vt + gmin;
            (g * v, g)
        } else {
            let ev = (v / vt).min(MAX_EXP_ARG).exp();
            (sat * (ev - 1.0) + gmin * v, sat * ev / vt + gmin)
        }
    }

    /// Normalized (vbs, vgs, vds) of the latest solution.
    fn terminal_voltages(&self, state: &CircuitState) -> (f64, f64, f64) {
        let sign = self.bound.as_ref().map_or(1.0, |m| m.mos_type.sign());
        (
            sign * state.voltage_between(self.bulk, self.sprime),
            sign * state.voltage_between(self.gate, self.sprime),
            sign * state.voltage_between(self.dprime, self.sprime),
        )
    }

    fn overlap_capacitances(&self, model: &MosfetModel) -> (f64, f64, f64) {
        let w = self.width.get();
        let l = self.length.get();
        (model.cgso.get() * w, model.cgdo.get() * w, model.cgbo.get() * l)
    }

    /// Stamp the real channel and junction conductances through `add`.
    fn stamp_conductances<F: FnMut(ElementHandle, f64)>(&self, h: &MosfetHandles, st: &[f64], mut add: F) {
        let s = self.states;
        let (gm, gds, gmbs, gbd, gbs) = (st[s + GM], st[s + GDS], st[s + GMBS], st[s + GBD], st[s + GBS]);
        let (xnrm, xrev) = if self.mode >= 0.0 { (1.0, 0.0) } else { (0.0, 1.0) };
        let (gdpr, gspr) = self.bound.as_ref().map_or((0.0, 0.0), |m| {
            (ohmic(&m.rd), ohmic(&m.rs))
        });
        add(h.dd, gdpr);
        add(h.ss, gspr);
        add(h.bb, gbd + gbs);
        add(h.dpdp, gdpr + gds + gbd + xrev * (gm + gmbs));
        add(h.spsp, gspr + gds + gbs + xnrm * (gm + gmbs));
        add(h.d_dp, -gdpr);
        add(h.s_sp, -gspr);
        add(h.b_dp, -gbd);
        add(h.b_sp, -gbs);
        add(h.dp_d, -gdpr);
        add(h.dp_g, (xnrm - xrev) * gm);
        add(h.dp_b, -gbd + (xnrm - xrev) * gmbs);
        add(h.dp_sp, -gds - xnrm * (gm + gmbs));
        add(h.sp_g, -(xnrm - xrev) * gm);
        add(h.sp_s, -gspr);
        add(h.sp_b, -gbs - (xnrm - xrev) * gmbs);
        add(h.sp_dp, -gds - xrev * (gm + gmbs));
    }

    /// Integrate one overlap capacitance and stamp its companion model.
    fn load_overlap(state: &mut CircuitState, slot: usize, cap: f64, pair: &TwoTerminal, pos: usize, neg: usize) {
        if cap == 0.0 {
            return;
        }
        state.states[0][slot] = cap * state.voltage_between(pos, neg);
        if !state.is_transient() {
            return;
        }
        let Some(method) = state.method.as_ref() else {
            return;
        };
        if state.init == InitMode::Transient {
            state.states[1][slot] = state.states[0][slot];
        }
        let (geq, ceq) = method.integrate(&mut state.states, slot, cap);
        if state.init == InitMode::Transient {
            state.states[1][slot + 1] = state.states[0][slot + 1];
        }
        pair.stamp(&mut state.matrix, geq);
        stamp_current(&mut state.rhs, pos, neg, ceq);
    }
}

fn ohmic(resistance: &Param) -> f64 {
    if resistance.get() > 0.0 {
        1.0 / resistance.get()
    } else {
        0.0
    }
}

const MOSFET_PARAMS: &[ParamDef<Mosfet>] = &[
    ParamDef { name: "w", info: "Width", get: |m| m.width.get(), set: |m, v| m.width.set(v) },
    ParamDef { name: "l", info: "Length", get: |m| m.length.get(), set: |m, v| m.length.set(v) },
    ParamDef { name: "temp", info: "Instance temperature", get: |m| m.temp.get(), set: |m, v| m.temp.set(v) },
    ParamDef { name: "off", info: "Initially off", get: |m| if m.off { 1.0 } else { 0.0 }, set: |m, v| m.off = v != 0.0 },
    ParamDef { name: "icvds", info: "Initial D-S voltage", get: |m| m.ic_value(0), set: |m, v| set_ic(&mut m.ic, 0, v) },
    ParamDef { name: "icvgs", info: "Initial G-S voltage", get: |m| m.ic_value(1), set: |m, v| set_ic(&mut m.ic, 1, v) },
    ParamDef { name: "icvbs", info: "Initial B-S voltage", get: |m| m.ic_value(2), set: |m, v| set_ic(&mut m.ic, 2, v) },
];

impl Parameterized for Mosfet {
    fn table() -> &'static [ParamDef<Self>] {
        MOSFET_PARAMS
    }

    fn entity_name(&self) -> &str {
        &self.name
    }
}

impl Device for Mosfet {
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
        if let Some(ic) = &self.ic {
            if ic.len() != 3 {
                return Err(SimError::InvalidInitialConditions {
                    device: self.name.clone(),
                    given: ic.len(),
                    expected: 3,
                });
            }
        }
        let [drain, gate, source, bulk] = self.pins.bind(&self.name, ctx)?;
        let model = ctx.model::<MosfetModel>(&self.name, &self.model)?;
        self.drain = drain;
        self.gate = gate;
        self.source = source;
        self.bulk = bulk;
        self.dprime = if model.rd.get() > 0.0 {
            ctx.create_node(&format!("{}#drain", self.name), NodeType::Voltage)
        } else {
            drain
        };
        self.sprime = if model.rs.get() > 0.0 {
            ctx.create_node(&format!("{}#source", self.name), NodeType::Voltage)
        } else {
            source
        };
        let (d, g, s, b, dp, sp) = (drain, gate, source, bulk, self.dprime, self.sprime);
        self.handles = Some(MosfetHandles {
            dd: ctx.element(d, d),
            ss: ctx.element(s, s),
            bb: ctx.element(b, b),
            dpdp: ctx.element(dp, dp),
            spsp: ctx.element(sp, sp),
            d_dp: ctx.element(d, dp),
            s_sp: ctx.element(s, sp),
            b_dp: ctx.element(b, dp),
            b_sp: ctx.element(b, sp),
            dp_d: ctx.element(dp, d),
            dp_g: ctx.element(dp, g),
            dp_b: ctx.element(dp, b),
            dp_sp: ctx.element(dp, sp),
            sp_g: ctx.element(sp, g),
            sp_s: ctx.element(sp, s),
            sp_b: ctx.element(sp, b),
            sp_dp: ctx.element(sp, dp),
            gate_source: TwoTerminal::new(ctx, g, sp),
            gate_drain: TwoTerminal::new(ctx, g, dp),
            gate_bulk: TwoTerminal::new(ctx, g, b),
        });
        self.states = ctx.allocate_states(SLOTS);
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
        let vt = thermal_voltage(temperature);
        let ratio = temperature / tnom;
        let kp = model.kp.get() / (ratio * ratio.sqrt());
        self.derived = MosfetTemp {
            vt,
            beta: kp * self.width.get() / self.length.get(),
            vcrit: critical_voltage(vt, model.is.get()),
        };
        self.von = model.mos_type.sign() * model.vto.get();
        Ok(())
    }

    fn load(&mut self, state: &mut CircuitState) {
        let Some(model) = self.bound.clone() else {
            return;
        };
        let s = self.states;
        let sign = model.mos_type.sign();
        let vt = self.derived.vt;
        let vcrit = self.derived.vcrit;

        let mut limited = false;
        let (vbs, vgs, vds) = match state.init {
            InitMode::SmallSignal => (state.states[0][s + VBS], state.states[0][s + VGS], state.states[0][s + VDS]),
            InitMode::Transient => (state.states[1][s + VBS], state.states[1][s + VGS], state.states[1][s + VDS]),
            InitMode::Junction if state.domain == Domain::Time && state.use_ic => {
                (sign * self.ic_value(2), sign * self.ic_value(1), sign * self.ic_value(0))
            }
            InitMode::Junction if !self.off => (-1.0, sign * model.vto.get(), 0.0),
            InitMode::Junction | InitMode::Fix if self.off => (0.0, 0.0, 0.0),
            _ => {
                let (vbs, vgs, vds) = if state.init == InitMode::Predict {
                    let predicted = match &state.method {
                        Some(m) => (
                            m.extrapolate(&state.states, s + VBS),
                            m.extrapolate(&state.states, s + VGS),
                            m.extrapolate(&state.states, s + VDS),
                        ),
                        None => (state.states[1][s + VBS], state.states[1][s + VGS], state.states[1][s + VDS]),
                    };
                    for slot in VBS..=GBS {
                        state.states.copy_slot(s + slot, 1, 0);
                    }
                    predicted
                } else {
                    self.terminal_voltages(state)
                };

                let old = &state.states[0];
                let (vbs_old, vgs_old, vds_old) = (old[s + VBS], old[s + VGS], old[s + VDS]);
                let vgd_old = vgs_old - vds_old;
                let mut vgs = vgs;
                let mut vds = vds;
                let mut vbs = vbs;
                let von = self.von;
                if vds_old >= 0.0 {
                    let vgd = vgs - vds;
                    vgs = fetlim(vgs, vgs_old, von);
                    vds = limvds(vgs - vgd, vds_old);
                } else {
                    let vgd = fetlim(vgs - vds, vgd_old, von);
                    vds = vgs - vgd;
                    vds = -limvds(-vds, -vds_old);
                    vgs = vgd + vds;
                }
                if vds >= 0.0 {
                    let (v, l) = pnjlim(vbs, vbs_old, vt, vcrit, state.limit_factor);
                    vbs = v;
                    limited = l;
                } else {
                    let vbd_old = vbs_old - vds_old;
                    let (vbd, l) = pnjlim(vbs - vds, vbd_old, vt, vcrit, state.limit_factor);
                    vbs = vbd + vds;
                    limited = l;
                }
                (vbs, vgs, vds)
            }
        };

        let vbd = vbs - vds;
        let vgd = vgs - vds;
        let (cbs, gbs) = self.bulk_diode(vbs, state.gmin);
        let (cbd, gbd) = self.bulk_diode(vbd, state.gmin);

        let beta = self.derived.beta;
        let (mode, channel) = if vds >= 0.0 {
            (1.0, Self::channel(&model, beta, vgs, vds, vbs))
        } else {
            (-1.0, Self::channel(&model, beta, vgd, -vds, vbd))
        };
        self.mode = mode;
        self.von = channel.von;
        let cd = mode * channel.cdrain - cbd;

        if limited && !(state.init == InitMode::Fix && self.off) {
            state.noncon += 1;
        }

        let st = &mut state.states[0];
        st[s + VBS] = vbs;
        st[s + VGS] = vgs;
        st[s + VDS] = vds;
        st[s + CD] = cd;
        st[s + CBS] = cbs;
        st[s + CBD] = cbd;
        st[s + GM] = channel.gm;
        st[s + GDS] = channel.gds;
        st[s + GMBS] = channel.gmbs;
        st[s + GBD] = gbd;
        st[s + GBS] = gbs;

        let Channel { cdrain, gm, gds, gmbs, .. } = channel;
        let ceqbs = sign * (cbs - gbs * vbs);
        let ceqbd = sign * (cbd - gbd * vbd);
        let cdreq = if mode >= 0.0 {
            sign * (cdrain - gds * vds - gm * vgs - gmbs * vbs)
        } else {
            -sign * (cdrain + gds * vds - gm * vgd - gmbs * vbd)
        };
        state.rhs[self.bulk] -= ceqbs + ceqbd;
        state.rhs[self.dprime] += ceqbd - cdreq;
        state.rhs[self.sprime] += cdreq + ceqbs;

        let Some(h) = self.handles else {
            return;
        };
        {
            let matrix: &mut Matrix = &mut state.matrix;
            let st = &state.states[0];
            self.stamp_conductances(&h, st, |handle, value| matrix.add(handle, value));
        }

        if state.domain == Domain::Time {
            let (cgs, cgd, cgb) = self.overlap_capacitances(&model);
            Self::load_overlap(state, s + QGS, cgs, &h.gate_source, self.gate, self.sprime);
            Self::load_overlap(state, s + QGD, cgd, &h.gate_drain, self.gate, self.dprime);
            Self::load_overlap(state, s + QGB, cgb, &h.gate_bulk, self.gate, self.bulk);
        }
    }

    fn load_ac(&mut self, state: &mut CircuitState) {
        let (Some(model), Some(h)) = (&self.bound, self.handles) else {
            return;
        };
        {
            let matrix = &mut state.matrix;
            let st = &state.states[0];
            self.stamp_conductances(&h, st, |handle, value| {
                matrix.add_complex(handle, Complex64::new(value, 0.0))
            });
        }
        let (cgs, cgd, cgb) = self.overlap_capacitances(model);
        let s = state.laplace;
        h.gate_source.stamp_complex(&mut state.matrix, s * cgs);
        h.gate_drain.stamp_complex(&mut state.matrix, s * cgd);
        h.gate_bulk.stamp_complex(&mut state.matrix, s * cgb);
    }

    fn is_convergent(&self, state: &CircuitState) -> bool {
        let s = self.states;
        let st = &state.states[0];
        let (vbs, vgs, vds) = self.terminal_voltages(state);
        let vbd = vbs - vds;
        let vgd = vgs - vds;
        let vgd_old = st[s + VGS] - st[s + VDS];
        let delvbs = vbs - st[s + VBS];
        let delvbd = vbd - (st[s + VBS] - st[s + VDS]);
        let delvgs = vgs - st[s + VGS];
        let delvds = vds - st[s + VDS];
        let delvgd = vgd - vgd_old;

        let cd = st[s + CD];
        let (gm, gds, gmbs, gbd, gbs) = (st[s + GM], st[s + GDS], st[s + GMBS], st[s + GBD], st[s + GBS]);
        let cdhat = if self.mode >= 0.0 {
            cd - gbd * delvbd + gmbs * delvbs + gm * delvgs + gds * delvds
        } else {
            cd - (gbd - gmbs) * delvbd - gm * delvgd + gds * delvds
        };
        let cb = st[s + CBS] + st[s + CBD];
        let cbhat = cb + gbd * delvbd + gbs * delvbs;
        let tol = &state.tolerances;
        (cdhat - cd).abs() <= tol.bound(cdhat, cd, tol.abstol)
            && (cbhat - cb).abs() <= tol.bound(cbhat, cb, tol.abstol)
    }

    fn truncate(&self, state: &CircuitState) -> f64 {
        let (Some(method), Some(model)) = (&state.method, &self.bound) else {
            return f64::INFINITY;
        };
        let (cgs, cgd, cgb) = self.overlap_capacitances(model);
        [(cgs, QGS), (cgd, QGD), (cgb, QGB)]
            .iter()
            .filter(|(cap, _)| *cap > 0.0)
            .map(|(_, slot)| method.truncation_step(&state.states, self.states + slot))
            .fold(f64::INFINITY, f64::min)
    }

    fn noise(&self, state: &CircuitState, frequency: f64, sources: &mut Vec<NoiseSource>) {
        let Some(model) = &self.bound else {
            return;
        };
        let st = &state.states[0];
        let thermal = 4.0 * BOLTZMANN * self.temperature;
        for (suffix, g, pos, neg) in [
            ("rd", ohmic(&model.rd), self.drain, self.dprime),
            ("rs", ohmic(&model.rs), self.source, self.sprime),
        ] {
            if g > 0.0 {
                sources.push(NoiseSource {
                    name: format!("{}.{}", self.name, suffix),
                    pos,
                    neg,
                    density: thermal * g,
                });
            }
        }
        sources.push(NoiseSource {
            name: format!("{}.channel", self.name),
            pos: self.dprime,
            neg: self.sprime,
            density: thermal * 2.0 / 3.0 * st[self.states + GM].abs(),
        });
        if model.kf.get() > 0.0 && model.tox.get() > 0.0 && frequency > 0.0 {
            let cox = EPSILON_OX / model.tox.get();
            let l = self.length.get();
            let cd = st[self.states + CD].abs();
            sources.push(NoiseSource {
                name: format!("{}.flicker", self.name),
                pos: self.dprime,
                neg: self.sprime,
                density: model.kf.get() * cd.powf(model.af.get()) / (frequency * cox * l * l),
            });
        }
    }

    fn current(&self, state: &CircuitState) -> Option<f64> {
        let sign = self.bound.as_ref().map_or(1.0, |m| m.mos_type.sign());
        Some(sign * state.states[0][self.states + CD])
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
    fn test_cutoff_below_threshold() {
        let mut model = MosfetModel::nmos("M");
        model.vto.set(1.0);
        let ch = Mosfet::channel(&model, 1e-3, 0.5, 1.0, 0.0);
        assert_eq!(ch.cdrain, 0.0);
        assert_eq!(ch.gm, 0.0);
        assert_relative_eq!(ch.von, 1.0);
    }

    #[test]
    fn test_saturation_square_law() {
        let mut model = MosfetModel::nmos("M");
        model.vto.set(1.0);
        let ch = Mosfet::channel(&model, 1e-3, 3.0, 5.0, 0.0);
        assert_relative_eq!(ch.cdrain, 0.5e-3 * 4.0);
        assert_relative_eq!(ch.gm, 2e-3);
    }

    #[test]
    fn test_linear_region() {
        let mut model = MosfetModel::nmos("M");
        model.vto.set(1.0);
        let ch = Mosfet::channel(&model, 1e-3, 3.0, 0.5, 0.0);
        assert_relative_eq!(ch.cdrain, 1e-3 * 0.5 * (2.0 - 0.25));
        assert_relative_eq!(ch.gds, 1e-3 * 1.5);
    }

    #[test]
    fn test_body_effect_raises_threshold() {
        let mut model = MosfetModel::nmos("M");
        model.vto.set(1.0);
        model.gamma.set(0.5);
        let ch = Mosfet::channel(&model, 1e-3, 3.0, 5.0, -2.0);
        assert!(ch.von > 1.0);
    }

    #[test]
    fn test_pmos_threshold_is_normalized() {
        let mut model = MosfetModel::pmos("M");
        model.vto.set(-1.0);
        let ch = Mosfet::channel(&model, 1e-3, 2.0, 1.0, 0.0);
        assert_relative_eq!(ch.von, 1.0);
        assert!(ch.cdrain > 0.0);
    }
}
