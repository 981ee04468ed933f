//! BJT (Bipolar Junction Transistor) model.
//!
//! Transport Ebers-Moll with forward and reverse Early voltages. Ohmic
//! base, collector and emitter resistances add internal nodes when nonzero.
//! Junction charge combines depletion and diffusion (transit time) parts.

use num_complex::Complex64;

use crate::circuit::{CircuitState, Domain, InitMode, NodeType};
use crate::error::{Result, SimError};
use crate::params::{self, Param, ParamDef, Parameterized};
use crate::sparse::ElementHandle;
use crate::{BOLTZMANN, CELSIUS_TO_KELVIN, CHARGE};

use super::device::{Device, NoiseSource, Pins, SetupContext};
use super::junction::{critical_voltage, depletion, pnjlim, thermal_voltage};

/// BJT type (NPN or PNP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BjtType {
    Npn,
    Pnp,
}

impl BjtType {
    fn sign(self) -> f64 {
        match self {
            BjtType::Npn => 1.0,
            BjtType::Pnp => -1.0,
        }
    }
}

/// Parameters for a BJT model.
#[derive(Debug, Clone)]
pub struct BjtModel {
    pub name: String,
    pub bjt_type: BjtType,
    /// Transport saturation current
    pub is: Param,
    /// Ideal maximum forward beta
    pub bf: Param,
    /// Ideal maximum reverse beta
    pub br: Param,
    pub nf: Param,
    pub nr: Param,
    /// Forward Early voltage, infinite when not given
    pub vaf: Param,
    /// Reverse Early voltage, infinite when not given
    pub var: Param,
    pub rb: Param,
    pub rc: Param,
    pub re: Param,
    pub cje: Param,
    pub vje: Param,
    pub mje: Param,
    pub cjc: Param,
    pub vjc: Param,
    pub mjc: Param,
    /// Forward transit time
    pub tf: Param,
    /// Reverse transit time
    pub tr: Param,
    pub fc: Param,
    pub eg: Param,
    pub xti: Param,
    pub kf: Param,
    pub af: Param,
    pub tnom: Param,
}

impl BjtModel {
    pub fn new(name: &str, bjt_type: BjtType) -> Self {
        Self {
            name: name.to_string(),
            bjt_type,
            is: Param::new(1e-16),
            bf: Param::new(100.0),
            br: Param::new(1.0),
            nf: Param::new(1.0),
            nr: Param::new(1.0),
            vaf: Param::new(0.0),
            var: Param::new(0.0),
            rb: Param::new(0.0),
            rc: Param::new(0.0),
            re: Param::new(0.0),
            cje: Param::new(0.0),
            vje: Param::new(0.75),
            mje: Param::new(0.33),
            cjc: Param::new(0.0),
            vjc: Param::new(0.75),
            mjc: Param::new(0.33),
            tf: Param::new(0.0),
            tr: Param::new(0.0),
            fc: Param::new(0.5),
            eg: Param::new(1.11),
            xti: Param::new(3.0),
            kf: Param::new(0.0),
            af: Param::new(1.0),
            tnom: Param::new(crate::NOMINAL_TEMPERATURE - CELSIUS_TO_KELVIN),
        }
    }

    pub fn npn(name: &str) -> Self {
        Self::new(name, BjtType::Npn)
    }

    pub fn pnp(name: &str) -> Self {
        Self::new(name, BjtType::Pnp)
    }

    fn inverse_early(voltage: &Param) -> f64 {
        if voltage.is_given() && voltage.get() != 0.0 {
            1.0 / voltage.get()
        } else {
            0.0
        }
    }
}

const BJT_MODEL_PARAMS: &[ParamDef<BjtModel>] = &[
    ParamDef { name: "is", info: "Saturation current", get: |m| m.is.get(), set: |m, v| m.is.set(v) },
    ParamDef { name: "bf", info: "Ideal forward beta", get: |m| m.bf.get(), set: |m, v| m.bf.set(v) },
    ParamDef { name: "br", info: "Ideal reverse beta", get: |m| m.br.get(), set: |m, v| m.br.set(v) },
    ParamDef { name: "nf", info: "Forward emission coefficient", get: |m| m.nf.get(), set: |m, v| m.nf.set(v) },
    ParamDef { name: "nr", info: "Reverse emission coefficient", get: |m| m.nr.get(), set: |m, v| m.nr.set(v) },
    ParamDef { name: "vaf", info: "Forward Early voltage", get: |m| m.vaf.get(), set: |m, v| m.vaf.set(v) },
    ParamDef { name: "va", info: "Forward Early voltage", get: |m| m.vaf.get(), set: |m, v| m.vaf.set(v) },
    ParamDef { name: "var", info: "Reverse Early voltage", get: |m| m.var.get(), set: |m, v| m.var.set(v) },
    ParamDef { name: "rb", info: "Base resistance", get: |m| m.rb.get(), set: |m, v| m.rb.set(v) },
    ParamDef { name: "rc", info: "Collector resistance", get: |m| m.rc.get(), set: |m, v| m.rc.set(v) },
    ParamDef { name: "re", info: "Emitter resistance", get: |m| m.re.get(), set: |m, v| m.re.set(v) },
    ParamDef { name: "cje", info: "Zero-bias B-E depletion capacitance", get: |m| m.cje.get(), set: |m, v| m.cje.set(v) },
    ParamDef { name: "vje", info: "B-E built in potential", get: |m| m.vje.get(), set: |m, v| m.vje.set(v) },
    ParamDef { name: "mje", info: "B-E junction grading coefficient", get: |m| m.mje.get(), set: |m, v| m.mje.set(v) },
    ParamDef { name: "cjc", info: "Zero-bias B-C depletion capacitance", get: |m| m.cjc.get(), set: |m, v| m.cjc.set(v) },
    ParamDef { name: "vjc", info: "B-C built in potential", get: |m| m.vjc.get(), set: |m, v| m.vjc.set(v) },
    ParamDef { name: "mjc", info: "B-C junction grading coefficient", get: |m| m.mjc.get(), set: |m, v| m.mjc.set(v) },
    ParamDef { name: "tf", info: "Ideal forward transit time", get: |m| m.tf.get(), set: |m, v| m.tf.set(v) },
    ParamDef { name: "tr", info: "Ideal reverse transit time", get: |m| m.tr.get(), set: |m, v| m.tr.set(v) },
    ParamDef { name: "fc", info: "Forward bias junction fit parameter", get: |m| m.fc.get(), set: |m, v| m.fc.set(v) },
    ParamDef { name: "eg", info: "Energy gap", get: |m| m.eg.get(), set: |m, v| m.eg.set(v) },
    ParamDef { name: "xti", info: "Temperature exponent for IS", get: |m| m.xti.get(), set: |m, v| m.xti.set(v) },
    ParamDef { name: "kf", info: "Flicker noise coefficient", get: |m| m.kf.get(), set: |m, v| m.kf.set(v) },
    ParamDef { name: "af", info: "Flicker noise exponent", get: |m| m.af.get(), set: |m, v| m.af.set(v) },
    ParamDef { name: "tnom", info: "Parameter measurement temperature", get: |m| m.tnom.get(), set: |m, v| m.tnom.set(v) },
];

impl Parameterized for BjtModel {
    fn table() -> &'static [ParamDef<Self>] {
        BJT_MODEL_PARAMS
    }

    fn entity_name(&self) -> &str {
        &self.name
    }
}

// State slot offsets
const VBE: usize = 0;
const VBC: usize = 1;
const CC: usize = 2;
const CB: usize = 3;
const GPI: usize = 4;
const GMU: usize = 5;
const GM: usize = 6;
const GO: usize = 7;
const QBE: usize = 8;
const QBC: usize = 10;
const SLOTS: usize = 12;

#[derive(Debug, Clone, Copy)]
struct BjtHandles {
    col_col: ElementHandle,
    base_base: ElementHandle,
    emit_emit: ElementHandle,
    colp_colp: ElementHandle,
    basep_basep: ElementHandle,
    emitp_emitp: ElementHandle,
    col_colp: ElementHandle,
    base_basep: ElementHandle,
    emit_emitp: ElementHandle,
    colp_col: ElementHandle,
    colp_basep: ElementHandle,
    colp_emitp: ElementHandle,
    basep_base: ElementHandle,
    basep_colp: ElementHandle,
    basep_emitp: ElementHandle,
    emitp_emit: ElementHandle,
    emitp_colp: ElementHandle,
    emitp_basep: ElementHandle,
}

/// Small-signal quantities at one bias point.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct BjtBias {
    cc: f64,
    cb: f64,
    gpi: f64,
    gmu: f64,
    gm: f64,
    go: f64,
    /// Forward and reverse diode currents and conductances
    cbe: f64,
    gbe: f64,
    cbc: f64,
    gbc: f64,
}

#[derive(Debug, Clone, Default)]
struct BjtTemp {
    vt: f64,
    sat_current: f64,
    vcrit: f64,
}

/// A bipolar junction transistor with collector, base and emitter pins.
#[derive(Debug, Clone)]
pub struct Bjt {
    pub name: String,
    pins: Pins,
    pub model: String,
    pub area: Param,
    pub off: bool,
    /// Initial conditions `[vbe, vce]`
    pub ic: Option<Vec<f64>>,
    pub temp: Param,

    bound: Option<BjtModel>,
    derived: BjtTemp,
    col: usize,
    base: usize,
    emit: usize,
    colp: usize,
    basep: usize,
    emitp: usize,
    handles: Option<BjtHandles>,
    states: usize,
    capbe: f64,
    capbc: f64,
    temperature: f64,
}

impl Bjt {
    pub fn new(name: &str, collector: &str, base: &str, emitter: &str, model: &str) -> Self {
        Self {
            name: name.to_string(),
            pins: Pins::new(&[collector, base, emitter]),
            model: model.to_string(),
            area: Param::new(1.0),
            off: false,
            ic: None,
            temp: Param::new(0.0),
            bound: None,
            derived: BjtTemp::default(),
            col: 0,
            base: 0,
            emit: 0,
            colp: 0,
            basep: 0,
            emitp: 0,
            handles: None,
            states: 0,
            capbe: 0.0,
            capbc: 0.0,
            temperature: crate::NOMINAL_TEMPERATURE,
        }
    }

    /// Set the initial conditions `[vbe, vce]`.
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

    /// Evaluate the transport model at the given junction voltages.
    fn evaluate(model: &BjtModel, t: &BjtTemp, vbe: f64, vbc: f64, gmin: f64) -> BjtBias {
        let csat = t.sat_current;
        let vte = model.nf.get() * t.vt;
        let (cbe, gbe) = if vbe >= -3.0 * vte {
            let evbe = (vbe / vte).exp();
            (csat * (evbe - 1.0) + gmin * vbe, csat * evbe / vte + gmin)
        } else {
            let arg = 3.0 * vte / (vbe * std::f64::consts::E);
            let arg = arg * arg * arg;
            (-csat * (1.0 + arg) + gmin * vbe, csat * 3.0 * arg / vbe + gmin)
        };
        let vtc = model.nr.get() * t.vt;
        let (cbc, gbc) = if vbc >= -3.0 * vtc {
            let evbc = (vbc / vtc).exp();
            (csat * (evbc - 1.0) + gmin * vbc, csat * evbc / vtc + gmin)
        } else {
            let arg = 3.0 * vtc / (vbc * std::f64::consts::E);
            let arg = arg * arg * arg;
            (-csat * (1.0 + arg) + gmin * vbc, csat * 3.0 * arg / vbc + gmin)
        };

        let inv_vaf = BjtModel::inverse_early(&model.vaf);
        let inv_var = BjtModel::inverse_early(&model.var);
        let qb = 1.0 / (1.0 - inv_vaf * vbc - inv_var * vbe);
        let dqbdve = qb * qb * inv_var;
        let dqbdvc = qb * qb * inv_vaf;

        let bf = model.bf.get();
        let br = model.br.get();
        let transport = cbe - cbc;
        BjtBias {
            cc: transport / qb - cbc / br,
            cb: cbe / bf + cbc / br,
            gpi: gbe / bf,
            gmu: gbc / br,
            gm: (gbe - transport * dqbdve / qb) / qb,
            go: (gbc + transport * dqbdvc / qb) / qb,
            cbe,
            gbe,
            cbc,
            gbc,
        }
    }

    fn junctions(&self, state: &CircuitState) -> (f64, f64) {
        let sign = self.bound.as_ref().map_or(1.0, |m| m.bjt_type.sign());
        (
            sign * state.voltage_between(self.basep, self.emitp),
            sign * state.voltage_between(self.basep, self.colp),
        )
    }
}

const BJT_PARAMS: &[ParamDef<Bjt>] = &[
    ParamDef { name: "area", info: "Area factor", get: |q| q.area.get(), set: |q, v| q.area.set(v) },
    ParamDef { name: "temp", info: "Instance temperature", get: |q| q.temp.get(), set: |q, v| q.temp.set(v) },
    ParamDef { name: "off", info: "Initially off", get: |q| if q.off { 1.0 } else { 0.0 }, set: |q, v| q.off = v != 0.0 },
    ParamDef { name: "icvbe", info: "Initial B-E voltage", get: |q| q.ic_value(0), set: |q, v| set_ic(&mut q.ic, 0, v) },
    ParamDef { name: "icvce", info: "Initial C-E voltage", get: |q| q.ic_value(1), set: |q, v| set_ic(&mut q.ic, 1, v) },
];

/// Write one entry of an initial condition vector, growing it as needed.
pub(crate) fn set_ic(ic: &mut Option<Vec<f64>>, index: usize, value: f64) {
    let values = ic.get_or_insert_with(Vec::new);
    if values.len() <= index {
        values.resize(index + 1, 0.0);
    }
    values[index] = value;
}

impl Parameterized for Bjt {
    fn table() -> &'static [ParamDef<Self>] {
        BJT_PARAMS
    }

    fn entity_name(&self) -> &str {
        &self.name
    }
}

impl Device for Bjt {
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
            if ic.len() != 2 {
                return Err(SimError::InvalidInitialConditions {
                    device: self.name.clone(),
                    given: ic.len(),
                    expected: 2,
                });
            }
        }
        let [col, base, emit] = self.pins.bind(&self.name, ctx)?;
        let model = ctx.model::<BjtModel>(&self.name, &self.model)?;
        self.col = col;
        self.base = base;
        self.emit = emit;
        self.colp = if model.rc.get() > 0.0 {
            ctx.create_node(&format!("{}#col", self.name), NodeType::Voltage)
        } else {
            col
        };
        self.basep = if model.rb.get() > 0.0 {
            ctx.create_node(&format!("{}#base", self.name), NodeType::Voltage)
        } else {
            base
        };
        self.emitp = if model.re.get() > 0.0 {
            ctx.create_node(&format!("{}#emit", self.name), NodeType::Voltage)
        } else {
            emit
        };
        let (c, b, e, cp, bp, ep) = (col, base, emit, self.colp, self.basep, self.emitp);
        self.handles = Some(BjtHandles {
            col_col: ctx.element(c, c),
            base_base: ctx.element(b, b),
            emit_emit: ctx.element(e, e),
            colp_colp: ctx.element(cp, cp),
            basep_basep: ctx.element(bp, bp),
            emitp_emitp: ctx.element(ep, ep),
            col_colp: ctx.element(c, cp),
            base_basep: ctx.element(b, bp),
            emit_emitp: ctx.element(e, ep),
            colp_col: ctx.element(cp, c),
            colp_basep: ctx.element(cp, bp),
            colp_emitp: ctx.element(cp, ep),
            basep_base: ctx.element(bp, b),
            basep_colp: ctx.element(bp, cp),
            basep_emitp: ctx.element(bp, ep),
            emitp_emit: ctx.element(ep, e),
            emitp_colp: ctx.element(ep, cp),
            emitp_basep: ctx.element(ep, bp),
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
        let factor = (ratio - 1.0) * model.eg.get() / vt + model.xti.get() * ratio.ln();
        let sat_current = model.is.get() * factor.exp() * self.area.get();
        self.derived = BjtTemp {
            vt,
            sat_current,
            vcrit: critical_voltage(vt, sat_current),
        };
        Ok(())
    }

    fn load(&mut self, state: &mut CircuitState) {
        let Some(model) = &self.bound else {
            return;
        };
        let s = self.states;
        let sign = model.bjt_type.sign();
        let area = self.area.get();

        let mut limited = false;
        let (vbe, vbc) = match state.init {
            InitMode::SmallSignal => (state.states[0][s + VBE], state.states[0][s + VBC]),
            InitMode::Transient => (state.states[1][s + VBE], state.states[1][s + VBC]),
            InitMode::Junction if state.domain == Domain::Time && state.use_ic => {
                let vbe = sign * self.ic_value(0);
                let vce = sign * self.ic_value(1);
                (vbe, vbe - vce)
            }
            InitMode::Junction if !self.off => (self.derived.vcrit, 0.0),
            InitMode::Junction | InitMode::Fix if self.off => (0.0, 0.0),
            _ => {
                let (vbe, vbc) = if state.init == InitMode::Predict {
                    let predicted = match &state.method {
                        Some(m) => (m.extrapolate(&state.states, s + VBE), m.extrapolate(&state.states, s + VBC)),
                        None => (state.states[1][s + VBE], state.states[1][s + VBC]),
                    };
                    for slot in VBE..=GO {
                        state.states.copy_slot(s + slot, 1, 0);
                    }
                    predicted
                } else {
                    self.junctions(state)
                };
                let vt = self.derived.vt;
                let vcrit = self.derived.vcrit;
                let (vbe, l1) = pnjlim(vbe, state.states[0][s + VBE], vt, vcrit, state.limit_factor);
                let (vbc, l2) = pnjlim(vbc, state.states[0][s + VBC], vt, vcrit, state.limit_factor);
                limited = l1 || l2;
                (vbe, vbc)
            }
        };

        let bias = Self::evaluate(model, &self.derived, vbe, vbc, state.gmin);
        let (mut cc, mut cb, mut gpi, mut gmu) = (bias.cc, bias.cb, bias.gpi, bias.gmu);
        let (gm, go) = (bias.gm, bias.go);

        if state.domain == Domain::Time || state.init == InitMode::SmallSignal {
            let fc = model.fc.get();
            let (qbe_dep, cbe_dep) = depletion(vbe, model.cje.get() * area, model.vje.get(), model.mje.get(), fc);
            let (qbc_dep, cbc_dep) = depletion(vbc, model.cjc.get() * area, model.vjc.get(), model.mjc.get(), fc);
            let tf = model.tf.get();
            let tr = model.tr.get();
            state.states[0][s + QBE] = qbe_dep + tf * bias.cbe;
            state.states[0][s + QBC] = qbc_dep + tr * bias.cbc;
            self.capbe = cbe_dep + tf * bias.gbe;
            self.capbc = cbc_dep + tr * bias.gbc;

            if state.is_transient() {
                if let Some(method) = state.method.as_ref() {
                    if state.init == InitMode::Transient {
                        state.states[1][s + QBE] = state.states[0][s + QBE];
                        state.states[1][s + QBC] = state.states[0][s + QBC];
                    }
                    let (geq, _) = method.integrate(&mut state.states, s + QBE, self.capbe);
                    gpi += geq;
                    cb += state.states[0][s + QBE + 1];
                    let (geq, _) = method.integrate(&mut state.states, s + QBC, self.capbc);
                    gmu += geq;
                    cb += state.states[0][s + QBC + 1];
                    cc -= state.states[0][s + QBC + 1];
                    if state.init == InitMode::Transient {
                        state.states[1][s + QBE + 1] = state.states[0][s + QBE + 1];
                        state.states[1][s + QBC + 1] = state.states[0][s + QBC + 1];
                    }
                }
            }
        }

        if limited && !(state.init == InitMode::Fix && self.off) {
            state.noncon += 1;
        }

        let st = &mut state.states[0];
        st[s + VBE] = vbe;
        st[s + VBC] = vbc;
        st[s + CC] = cc;
        st[s + CB] = cb;
        st[s + GPI] = gpi;
        st[s + GMU] = gmu;
        st[s + GM] = gm;
        st[s + GO] = go;

        let ceqbe = sign * (cc + cb - vbe * (gm + go + gpi) + vbc * go);
        let ceqbc = sign * (-cc + vbe * (gm + go) - vbc * (gmu + go));
        state.rhs[self.colp] += ceqbc;
        state.rhs[self.basep] += -ceqbe - ceqbc;
        state.rhs[self.emitp] += ceqbe;

        let gcpr = conductance(&model.rc, area);
        let gx = conductance(&model.rb, area);
        let gepr = conductance(&model.re, area);
        if let Some(h) = &self.handles {
            let m = &mut state.matrix;
            m.add(h.col_col, gcpr);
            m.add(h.base_base, gx);
            m.add(h.emit_emit, gepr);
            m.add(h.colp_colp, gmu + go + gcpr);
            m.add(h.basep_basep, gx + gpi + gmu);
            m.add(h.emitp_emitp, gpi + gepr + gm + go);
            m.add(h.col_colp, -gcpr);
            m.add(h.base_basep, -gx);
            m.add(h.emit_emitp, -gepr);
            m.add(h.colp_col, -gcpr);
            m.add(h.colp_basep, -gmu + gm);
            m.add(h.colp_emitp, -gm - go);
            m.add(h.basep_base, -gx);
            m.add(h.basep_colp, -gmu);
            m.add(h.basep_emitp, -gpi);
            m.add(h.emitp_emit, -gepr);
            m.add(h.emitp_colp, -go);
            m.add(h.emitp_basep, -gpi - gm);
        }
    }

    fn load_ac(&mut self, state: &mut CircuitState) {
        let Some(model) = &self.bound else {
            return;
        };
        let area = self.area.get();
        let st = &state.states[0];
        let s = self.states;
        let (gpi, gmu, gm, go) = (st[s + GPI], st[s + GMU], st[s + GM], st[s + GO]);
        let real = |g: f64| Complex64::new(g, 0.0);
        let gcpr = real(conductance(&model.rc, area));
        let gx = real(conductance(&model.rb, area));
        let gepr = real(conductance(&model.re, area));
        let ypi = real(gpi) + state.laplace * self.capbe;
        let ymu = real(gmu) + state.laplace * self.capbc;
        let (gm, go) = (real(gm), real(go));
        if let Some(h) = &self.handles {
            let m = &mut state.matrix;
            m.add_complex(h.col_col, gcpr);
            m.add_complex(h.base_base, gx);
            m.add_complex(h.emit_emit, gepr);
            m.add_complex(h.colp_colp, ymu + go + gcpr);
            m.add_complex(h.basep_basep, gx + ypi + ymu);
            m.add_complex(h.emitp_emitp, ypi + gepr + gm + go);
            m.add_complex(h.col_colp, -gcpr);
            m.add_complex(h.base_basep, -gx);
            m.add_complex(h.emit_emitp, -gepr);
            m.add_complex(h.colp_col, -gcpr);
            m.add_complex(h.colp_basep, -ymu + gm);
            m.add_complex(h.colp_emitp, -gm - go);
            m.add_complex(h.basep_base, -gx);
            m.add_complex(h.basep_colp, -ymu);
            m.add_complex(h.basep_emitp, -ypi);
            m.add_complex(h.emitp_emit, -gepr);
            m.add_complex(h.emitp_colp, -go);
            m.add_complex(h.emitp_basep, -ypi - gm);
        }
    }

    fn is_convergent(&self, state: &CircuitState) -> bool {
        let s = self.states;
        let st = &state.states[0];
        let (vbe, vbc) = self.junctions(state);
        let delvbe = vbe - st[s + VBE];
        let delvbc = vbc - st[s + VBC];
        let cc = st[s + CC];
        let cb = st[s + CB];
        let cchat = cc + (st[s + GM] + st[s + GO]) * delvbe - (st[s + GO] + st[s + GMU]) * delvbc;
        let cbhat = cb + st[s + GPI] * delvbe + st[s + GMU] * delvbc;
        let tol = &state.tolerances;
        (cchat - cc).abs() <= tol.bound(cchat, cc, tol.abstol)
            && (cbhat - cb).abs() <= tol.bound(cbhat, cb, tol.abstol)
    }

    fn truncate(&self, state: &CircuitState) -> f64 {
        let Some(method) = &state.method else {
            return f64::INFINITY;
        };
        let s = self.states;
        method
            .truncation_step(&state.states, s + QBE)
            .min(method.truncation_step(&state.states, s + QBC))
    }

    fn noise(&self, state: &CircuitState, frequency: f64, sources: &mut Vec<NoiseSource>) {
        let Some(model) = &self.bound else {
            return;
        };
        let area = self.area.get();
        let st = &state.states[0];
        let cc = st[self.states + CC];
        let cb = st[self.states + CB];
        let thermal = 4.0 * BOLTZMANN * self.temperature;
        let mut push = |suffix: &str, pos: usize, neg: usize, density: f64| {
            sources.push(NoiseSource {
                name: format!("{}.{}", self.name, suffix),
                pos,
                neg,
                density,
            });
        };
        for (suffix, param, pos, neg) in [
            ("rc", &model.rc, self.col, self.colp),
            ("rb", &model.rb, self.base, self.basep),
            ("re", &model.re, self.emit, self.emitp),
        ] {
            let g = conductance(param, area);
            if g > 0.0 {
                push(suffix, pos, neg, thermal * g);
            }
        }
        push("ic", self.colp, self.emitp, 2.0 * CHARGE * cc.abs());
        push("ib", self.basep, self.emitp, 2.0 * CHARGE * cb.abs());
        if model.kf.get() > 0.0 && frequency > 0.0 {
            let density = model.kf.get() * cb.abs().powf(model.af.get()) / frequency;
            push("flicker", self.basep, self.emitp, density);
        }
    }

    fn current(&self, state: &CircuitState) -> Option<f64> {
        let sign = self.bound.as_ref().map_or(1.0, |m| m.bjt_type.sign());
        Some(sign * state.states[0][self.states + CC])
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        params::set_parameter(self, name, value)
    }

    fn parameter(&self, name: &str) -> Option<f64> {
        params::get_parameter(self, name)
    }
}

/// Conductance of an ohmic resistance scaled by area, zero when absent.
fn conductance(resistance: &Param, area: f64) -> f64 {
    if resistance.get() > 0.0 {
        area / resistance.get()
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn derived(model: &BjtModel) -> BjtTemp {
        let vt = thermal_voltage(crate::NOMINAL_TEMPERATURE);
        BjtTemp {
            vt,
            sat_current: model.is.get(),
            vcrit: critical_voltage(vt, model.is.get()),
        }
    }

    #[test]
    fn test_forward_active_beta() {
        let model = BjtModel::npn("Q");
        let t = derived(&model);
        let bias = Bjt::evaluate(&model, &t, 0.65, -5.0, 0.0);
        assert!(bias.cc > 0.0);
        assert_relative_eq!(bias.cc / bias.cb, 100.0, max_relative = 1e-6);
    }

    #[test]
    fn test_early_effect_gives_output_conductance() {
        let mut model = BjtModel::npn("Q");
        model.vaf.set(50.0);
        let t = derived(&model);
        let low = Bjt::evaluate(&model, &t, 0.65, -1.0, 0.0);
        let high = Bjt::evaluate(&model, &t, 0.65, -5.0, 0.0);
        assert!(high.cc > low.cc);
        assert!(high.go > 0.0);
    }

    #[test]
    fn test_ic_vector_parameters() {
        let mut q = Bjt::new("Q1", "c", "b", "e", "Q");
        q.set_parameter("icvce", 5.0).unwrap();
        assert_eq!(q.ic, Some(vec![0.0, 5.0]));
        q.set_parameter("icvbe", 0.7).unwrap();
        assert_eq!(q.parameter("icvbe"), Some(0.7));
    }
}
