//! Analysis-level behavior of the simulator on small reference circuits.

use approx::{assert_abs_diff_eq, assert_relative_eq};
use nodal_core::components::{
    Capacitor, CurrentSource, Diode, DiodeModel, Resistor, Vcvs, VoltageSource, Waveform,
};
use nodal_core::solver::{
    DcSweep, DcSweepConfig, OperatingPoint, SimulationConfig, SolverStats, TransientAnalysis,
    TransientConfig,
};
use nodal_core::sparse::Matrix;
use nodal_core::{Circuit, SimError};

fn op_voltages(circuit: &mut Circuit, nodes: &[&str]) -> Vec<f64> {
    let mut out = Vec::new();
    OperatingPoint::default()
        .run(circuit, &mut SolverStats::new(), |data| {
            out = nodes.iter().map(|n| data.voltage(n).unwrap()).collect();
        })
        .unwrap();
    out
}

#[test]
fn test_resistor_current_is_v_over_r() {
    let mut circuit = Circuit::new();
    circuit.add(VoltageSource::new("V1", "a", "0", 10.0)).unwrap();
    circuit.add(Resistor::new("R1", "a", "0", 1000.0)).unwrap();

    let mut currents = None;
    OperatingPoint::default()
        .run(&mut circuit, &mut SolverStats::new(), |data| {
            currents = Some((data.current("R1").unwrap(), data.current("V1").unwrap()));
        })
        .unwrap();
    let (ir, iv) = currents.unwrap();
    assert_abs_diff_eq!(ir, 0.01, epsilon = 1e-8);
    // The source branch carries the same current, entering at its positive pin
    assert_abs_diff_eq!(iv.abs(), 0.01, epsilon = 1e-8);
}

#[test]
fn test_series_divider() {
    let mut circuit = Circuit::new();
    circuit.add(VoltageSource::new("V1", "in", "0", 100.0)).unwrap();
    circuit.add(Resistor::new("R1", "in", "out", 3.0)).unwrap();
    circuit.add(Resistor::new("R2", "out", "0", 1.0)).unwrap();
    let v = op_voltages(&mut circuit, &["in", "out"]);
    assert_abs_diff_eq!(v[0], 100.0, epsilon = 1e-8);
    assert_abs_diff_eq!(v[1], 25.0, epsilon = 1e-8);
}

#[test]
fn test_parallel_branch_currents() {
    let mut circuit = Circuit::new();
    circuit.add(VoltageSource::new("V1", "a", "0", 100.0)).unwrap();
    circuit.add(Resistor::new("R1", "a", "0", 2.0)).unwrap();
    circuit.add(Resistor::new("R2", "a", "0", 1.0)).unwrap();

    let mut currents = (0.0, 0.0);
    OperatingPoint::default()
        .run(&mut circuit, &mut SolverStats::new(), |data| {
            currents = (data.current("R1").unwrap(), data.current("R2").unwrap());
        })
        .unwrap();
    assert_abs_diff_eq!(currents.0, 50.0, epsilon = 1e-8);
    assert_abs_diff_eq!(currents.1, 100.0, epsilon = 1e-8);
}

#[test]
fn test_operating_point_is_repeatable() {
    let mut circuit = Circuit::new();
    circuit.add_model(DiodeModel::new("D")).unwrap();
    circuit.add(VoltageSource::new("V1", "in", "0", 5.0)).unwrap();
    circuit.add(Resistor::new("R1", "in", "a", 1e3)).unwrap();
    circuit.add(Diode::new("D1", "a", "0", "D")).unwrap();

    let op = OperatingPoint::default();
    let first = op.solve(&mut circuit, &mut SolverStats::new()).unwrap();
    let second = op.solve(&mut circuit, &mut SolverStats::new()).unwrap();
    assert_eq!(first.solution, second.solution);

    let vd = first.solution[first.nodes.find("a").unwrap().index()];
    assert!(vd > 0.6 && vd < 0.8, "diode drop {}", vd);
}

#[test]
fn test_matrix_accumulate_clear_and_solve() {
    // G = [[3, -1], [-1, 2]], rhs = [1, 2] => x = [0.8, 1.4]
    let mut m = Matrix::new();
    let h11 = m.get_element(1, 1);
    let h12 = m.get_element(1, 2);
    let h21 = m.get_element(2, 1);
    let h22 = m.get_element(2, 2);
    for _ in 0..2 {
        m.clear();
        m.add(h11, 1.0);
        m.add(h11, 2.0);
        m.add(h12, -1.0);
        m.add(h21, -1.0);
        m.add(h22, 2.0);
        m.factor().unwrap();

        let mut rhs = vec![0.0, 1.0, 2.0];
        let mut x = vec![0.0; 3];
        m.solve(&mut rhs, &mut x);
        assert_relative_eq!(x[1], 0.8, epsilon = 1e-12);
        assert_relative_eq!(x[2], 1.4, epsilon = 1e-12);
    }
    assert_eq!(m.get_element(1, 2), h12);
}

#[test]
fn test_rc_step_control_and_asymptote() {
    let tau = 1e-3;
    let mut circuit = Circuit::new();
    circuit.add(VoltageSource::new("V1", "in", "0", 2.0)).unwrap();
    circuit.add(Resistor::new("R1", "in", "out", 1e3)).unwrap();
    circuit.add(Capacitor::new("C1", "out", "0", 1e-6).with_ic(0.0)).unwrap();

    let tran = TransientConfig::new(1e-4, 10.0 * tau).with_use_ic(true);
    let max_step = tran.max_step();
    let mut points = Vec::new();
    let mut stats = SolverStats::new();
    TransientAnalysis::new(SimulationConfig::default(), tran)
        .run(&mut circuit, &mut stats, |data| {
            points.push((data.time(), data.voltage("out").unwrap()));
        })
        .unwrap();

    let steps: Vec<f64> = points.windows(2).map(|w| w[1].0 - w[0].0).collect();
    assert!(steps.iter().all(|&h| h > 0.0 && h <= max_step * (1.0 + 1e-9)));
    // Growth between accepted steps is capped at a factor of two
    for w in steps.windows(2) {
        assert!(w[1] <= 2.0 * w[0] * (1.0 + 1e-9), "step grew from {} to {}", w[0], w[1]);
    }
    // Tracks the analytic curve and settles at the source value
    for &(t, v) in &points {
        assert_abs_diff_eq!(v, 2.0 * (1.0 - (-t / tau).exp()), epsilon = 2e-2);
    }
    let (t_end, v_end) = *points.last().unwrap();
    assert_abs_diff_eq!(t_end, 10.0 * tau, epsilon = 1e-12);
    assert_abs_diff_eq!(v_end, 2.0, epsilon = 1e-3);
    assert_eq!(stats.accepted + 1, points.len());
    // Every solved timepoint was either accepted or rejected
    assert_eq!(stats.timepoints, stats.accepted + stats.rejected);
}

#[test]
fn test_tight_truncation_tolerance_rejects_steps() {
    let tau = 1e-3;
    let mut circuit = Circuit::new();
    circuit.add(VoltageSource::new("V1", "in", "0", 2.0)).unwrap();
    circuit.add(Resistor::new("R1", "in", "out", 1e3)).unwrap();
    circuit.add(Capacitor::new("C1", "out", "0", 1e-6).with_ic(0.0)).unwrap();

    let tran = TransientConfig::new(1e-4, 2.0 * tau).with_use_ic(true).with_trtol(0.01);
    let mut points = Vec::new();
    let mut stats = SolverStats::new();
    TransientAnalysis::new(SimulationConfig::default(), tran)
        .run(&mut circuit, &mut stats, |data| {
            points.push((data.time(), data.voltage("out").unwrap()));
        })
        .unwrap();

    assert!(stats.rejected > 0, "no step was rejected");
    assert_eq!(stats.timepoints, stats.accepted + stats.rejected);
    // Rejected points never reach the export
    assert_eq!(stats.accepted + 1, points.len());
    for &(t, v) in &points {
        assert_abs_diff_eq!(v, 2.0 * (1.0 - (-t / tau).exp()), epsilon = 2e-3);
    }
}

#[test]
fn test_pulse_edges_are_timepoints() {
    let (td, tr, tf, pw) = (1e-4, 1e-6, 2e-6, 2e-4);
    let mut circuit = Circuit::new();
    let pulse = Waveform::pulse(0.0, 1.0, td, tr, tf, pw, 0.0);
    circuit.add(VoltageSource::new("V1", "in", "0", 0.0).with_waveform(pulse)).unwrap();
    circuit.add(Resistor::new("R1", "in", "out", 1e3)).unwrap();
    circuit.add(Capacitor::new("C1", "out", "0", 1e-8)).unwrap();

    let mut times = Vec::new();
    TransientAnalysis::new(SimulationConfig::default(), TransientConfig::new(1e-5, 5e-4))
        .run(&mut circuit, &mut SolverStats::new(), |data| times.push(data.time()))
        .unwrap();

    for edge in [td, td + tr, td + tr + pw, td + tr + pw + tf] {
        assert!(
            times.iter().any(|&t| (t - edge).abs() <= 1e-15),
            "no timepoint at edge {:e}",
            edge
        );
    }
}

#[test]
fn test_pathological_op_terminates() {
    // An ideal source straight across a diode leaves the exponential unbounded
    let mut circuit = Circuit::new();
    circuit.add_model(DiodeModel::new("D")).unwrap();
    circuit.add(VoltageSource::new("V1", "a", "0", 5.0)).unwrap();
    circuit.add(Diode::new("D1", "a", "0", "D")).unwrap();
    circuit.set_nodeset("a", -5.0);

    let config = SimulationConfig::default().with_dc_max_iterations(20);
    let mut stats = SolverStats::new();
    match OperatingPoint::new(config.clone()).solve(&mut circuit, &mut stats) {
        Ok(_) => {}
        Err(SimError::ConvergenceFailure { iterations, .. }) => {
            assert!(stats.gmin_steps > 0);
            assert!(iterations > 0);
        }
        Err(other) => panic!("unexpected error {other}"),
    }
    let bound = config.dc_max_iterations * (config.gmin_steps + 4);
    assert!(stats.dc_iterations <= bound);
}

#[test]
fn test_gmin_ladder_runs_when_direct_solve_fails() {
    let mut circuit = Circuit::new();
    circuit.add_model(DiodeModel::new("D")).unwrap();
    circuit.add(VoltageSource::new("V1", "in", "0", 5.0)).unwrap();
    circuit.add(Resistor::new("R1", "in", "a", 100.0)).unwrap();
    circuit.add(Diode::new("D1", "a", "b", "D")).unwrap();
    circuit.add(Diode::new("D2", "b", "c", "D")).unwrap();
    circuit.add(Diode::new("D3", "c", "0", "D")).unwrap();

    // Two iterations cannot leave the junction and fix passes
    let config = SimulationConfig::default().with_dc_max_iterations(2);
    let mut stats = SolverStats::new();
    let err = OperatingPoint::new(config).solve(&mut circuit, &mut stats).unwrap_err();
    assert!(
        matches!(err, SimError::ConvergenceFailure { iterations: 4, .. }),
        "{err}"
    );
    // The first rung fails and ends the ladder
    assert_eq!(stats.gmin_steps, 1);
    assert_eq!(stats.dc_iterations, 4);

    // With a normal budget the same stack converges directly
    let mut stats = SolverStats::new();
    let state = OperatingPoint::default().solve(&mut circuit, &mut stats).unwrap();
    assert_eq!(stats.gmin_steps, 0);
    let va = state.solution[state.nodes.find("a").unwrap().index()];
    assert!(va > 1.8 && va < 2.6, "stack drop {}", va);
}

#[test]
fn test_parallel_voltage_sources_are_singular() {
    let mut circuit = Circuit::new();
    circuit.add(VoltageSource::new("V1", "a", "0", 5.0)).unwrap();
    circuit.add(VoltageSource::new("V2", "a", "0", 10.0)).unwrap();
    circuit.add(Resistor::new("R1", "a", "0", 1e3)).unwrap();
    let err = OperatingPoint::default()
        .solve(&mut circuit, &mut SolverStats::new())
        .unwrap_err();
    assert!(matches!(err, SimError::SingularMatrix { .. }), "{err}");
}

#[test]
fn test_current_source_into_resistor() {
    let mut circuit = Circuit::new();
    circuit.add(CurrentSource::new("I1", "0", "a", 2e-3)).unwrap();
    circuit.add(Resistor::new("R1", "a", "0", 1e3)).unwrap();
    let v = op_voltages(&mut circuit, &["a"]);
    assert_abs_diff_eq!(v[0], 2.0, epsilon = 1e-9);
}

#[test]
fn test_vcvs_gain_and_dc_sweep() {
    let mut circuit = Circuit::new();
    circuit.add(VoltageSource::new("VIN", "in", "0", 0.0)).unwrap();
    circuit.add(Resistor::new("RIN", "in", "0", 1e3)).unwrap();
    circuit.add(Vcvs::new("E1", "out", "0", "in", "0", 10.0)).unwrap();
    circuit.add(Resistor::new("RL", "out", "0", 1e3)).unwrap();

    let mut rows = Vec::new();
    DcSweep::new(SimulationConfig::default(), DcSweepConfig::new("VIN", -1.0, 1.0, 0.25))
        .run(&mut circuit, &mut SolverStats::new(), |data| {
            rows.push((data.sweep_value().unwrap(), data.voltage("out").unwrap()));
        })
        .unwrap();
    assert_eq!(rows.len(), 9);
    for (vin, vout) in rows {
        assert_abs_diff_eq!(vout, 10.0 * vin, epsilon = 1e-8);
    }
}

#[test]
fn test_unknown_node_in_nodeset() {
    let mut circuit = Circuit::new();
    circuit.add(VoltageSource::new("V1", "a", "0", 1.0)).unwrap();
    circuit.add(Resistor::new("R1", "a", "0", 1e3)).unwrap();
    circuit.set_nodeset("nowhere", 1.0);
    let err = OperatingPoint::default()
        .solve(&mut circuit, &mut SolverStats::new())
        .unwrap_err();
    assert!(matches!(err, SimError::NodeNotFound { .. }));
}
