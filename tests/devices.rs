//! Semiconductor, reactive and switching devices inside complete circuits.

use approx::{assert_abs_diff_eq, assert_relative_eq};
use nodal_core::components::{
    Bjt, BjtModel, Inductor, Mosfet, MosfetModel, Resistor, VoltageSource, VoltageSwitch,
    VoltageSwitchModel, Waveform,
};
use nodal_core::integration::MethodKind;
use nodal_core::solver::{
    OperatingPoint, SimulationConfig, SolverStats, TransientAnalysis, TransientConfig,
};
use nodal_core::{Circuit, SimError};

fn voltage_divider_bias() -> Circuit {
    let mut c = Circuit::new();
    c.add_model(BjtModel::npn("QN")).unwrap();
    c.add(VoltageSource::new("VCC", "vcc", "0", 12.0)).unwrap();
    c.add(Resistor::new("RB1", "vcc", "base", 68e3)).unwrap();
    c.add(Resistor::new("RB2", "base", "0", 10e3)).unwrap();
    c.add(Resistor::new("RC", "vcc", "col", 4.7e3)).unwrap();
    c.add(Resistor::new("RE", "emit", "0", 1e3)).unwrap();
    c.add(Bjt::new("Q1", "col", "base", "emit", "QN")).unwrap();
    c
}

#[test]
fn test_bjt_common_emitter_bias() {
    let mut circuit = voltage_divider_bias();
    let mut bias = None;
    OperatingPoint::default()
        .run(&mut circuit, &mut SolverStats::new(), |data| {
            bias = Some((
                data.voltage("base").unwrap(),
                data.voltage("col").unwrap(),
                data.voltage("emit").unwrap(),
                data.current("Q1").unwrap(),
            ));
        })
        .unwrap();
    let (vb, vc, ve, ic) = bias.unwrap();

    assert!(vb - ve > 0.6 && vb - ve < 0.85, "vbe {}", vb - ve);
    // Forward active: the collector sits between the emitter and the rail
    assert!(vc > ve + 0.3 && vc < 12.0, "vc {}", vc);
    assert_relative_eq!(ic, (12.0 - vc) / 4.7e3, max_relative = 1e-3);
    // Emitter current is the collector current plus Ic / bf
    let ie = ve / 1e3;
    assert_relative_eq!(ic / ie, 100.0 / 101.0, max_relative = 1e-3);
}

fn inverter(vin: f64) -> Circuit {
    let mut nmos = MosfetModel::nmos("NMOS1");
    nmos.vto.set(0.7);
    nmos.kp.set(110e-6);
    let mut pmos = MosfetModel::pmos("PMOS1");
    pmos.vto.set(-0.7);
    pmos.kp.set(50e-6);

    let mut c = Circuit::new();
    c.add_model(nmos).unwrap();
    c.add_model(pmos).unwrap();
    c.add(VoltageSource::new("VDD", "vdd", "0", 5.0)).unwrap();
    c.add(VoltageSource::new("VIN", "in", "0", vin)).unwrap();
    c.add(Mosfet::new("MN", "out", "in", "0", "0", "NMOS1").with_size(10e-6, 1e-6)).unwrap();
    c.add(Mosfet::new("MP", "out", "in", "vdd", "vdd", "PMOS1").with_size(20e-6, 1e-6)).unwrap();
    c
}

#[test]
fn test_cmos_inverter_rails() {
    for (vin, expected) in [(0.0, 5.0), (5.0, 0.0)] {
        let mut circuit = inverter(vin);
        let state = OperatingPoint::default()
            .solve(&mut circuit, &mut SolverStats::new())
            .unwrap();
        let out = state.solution[state.nodes.find("out").unwrap().index()];
        assert_abs_diff_eq!(out, expected, epsilon = 1e-3);
    }
}

#[test]
fn test_rl_current_rise_with_gear() {
    let (r, l, v) = (10.0, 1e-3, 1.0);
    let tau = l / r;
    let mut circuit = Circuit::new();
    circuit.add(VoltageSource::new("V1", "in", "0", v)).unwrap();
    circuit.add(Resistor::new("R1", "in", "a", r)).unwrap();
    circuit.add(Inductor::new("L1", "a", "0", l).with_ic(0.0)).unwrap();

    let tran = TransientConfig::new(5e-6, 10.0 * tau)
        .with_method(MethodKind::Gear, 2)
        .with_use_ic(true);
    let mut points = Vec::new();
    let mut stats = SolverStats::new();
    TransientAnalysis::new(SimulationConfig::default(), tran)
        .run(&mut circuit, &mut stats, |data| {
            points.push((data.time(), data.current("L1").unwrap()));
        })
        .unwrap();

    let final_current = v / r;
    for &(t, i) in &points {
        assert_abs_diff_eq!(i, final_current * (1.0 - (-t / tau).exp()), epsilon = 2e-3);
    }
    let (_, i_end) = *points.last().unwrap();
    assert_abs_diff_eq!(i_end, final_current, epsilon = 1e-4);
    assert!(stats.accepted > 10);
}

#[test]
fn test_voltage_switch_follows_control_pulse() {
    let (td, tr, tf, pw) = (1e-4, 1e-6, 1e-6, 2e-4);
    let mut model = VoltageSwitchModel::new("SW");
    model.ron.set(1.0);
    model.roff.set(1e6);
    model.vt.set(2.5);

    let mut circuit = Circuit::new();
    circuit.add_model(model).unwrap();
    circuit.add(VoltageSource::new("V1", "in", "0", 10.0)).unwrap();
    circuit
        .add(VoltageSource::new("VCTL", "ctl", "0", 0.0).with_waveform(Waveform::pulse(0.0, 5.0, td, tr, tf, pw, 0.0)))
        .unwrap();
    circuit.add(Resistor::new("R1", "in", "out", 1e3)).unwrap();
    circuit.add(VoltageSwitch::new("S1", "out", "0", "ctl", "0", "SW")).unwrap();

    let mut points = Vec::new();
    TransientAnalysis::new(SimulationConfig::default(), TransientConfig::new(1e-5, 4e-4))
        .run(&mut circuit, &mut SolverStats::new(), |data| {
            points.push((data.time(), data.voltage("out").unwrap()));
        })
        .unwrap();

    let off = 10.0 * 1e6 / (1e6 + 1e3);
    let on = 10.0 * 1.0 / (1.0 + 1e3);
    let (mut seen_off, mut seen_on) = (0, 0);
    for &(t, vout) in &points {
        if t < td {
            assert_abs_diff_eq!(vout, off, epsilon = 1e-6);
            seen_off += 1;
        } else if t > td + tr && t < td + tr + pw {
            assert_abs_diff_eq!(vout, on, epsilon = 1e-6);
            seen_on += 1;
        } else if t > td + tr + pw + tf {
            assert_abs_diff_eq!(vout, off, epsilon = 1e-6);
        }
    }
    assert!(seen_off > 0 && seen_on > 0);
}

#[test]
fn test_initial_condition_length_is_checked() {
    let mut circuit = Circuit::new();
    circuit.add_model(BjtModel::npn("QN")).unwrap();
    circuit.add(VoltageSource::new("VCC", "vcc", "0", 5.0)).unwrap();
    circuit.add(Resistor::new("RB", "vcc", "base", 100e3)).unwrap();
    circuit.add(Bjt::new("Q1", "vcc", "base", "0", "QN").with_ic(vec![0.7])).unwrap();
    let err = OperatingPoint::default()
        .solve(&mut circuit, &mut SolverStats::new())
        .unwrap_err();
    assert!(
        matches!(err, SimError::InvalidInitialConditions { given: 1, expected: 2, .. }),
        "{err}"
    );

    let mut circuit = Circuit::new();
    circuit.add_model(MosfetModel::nmos("NM")).unwrap();
    circuit.add(VoltageSource::new("VDD", "vdd", "0", 5.0)).unwrap();
    circuit.add(Resistor::new("RD", "vdd", "d", 1e3)).unwrap();
    circuit
        .add(Mosfet::new("M1", "d", "vdd", "0", "0", "NM").with_ic(vec![1.0, 2.0]))
        .unwrap();
    let err = OperatingPoint::default()
        .solve(&mut circuit, &mut SolverStats::new())
        .unwrap_err();
    assert!(
        matches!(err, SimError::InvalidInitialConditions { given: 2, expected: 3, .. }),
        "{err}"
    );
}
