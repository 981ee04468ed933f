//! Nodal - demo runner for the circuit simulator core
//!
//! Runs a built-in circuit through one analysis and prints the exported
//! points as CSV.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=debug nodal rectifier tran --step 1e-5 --stop 5e-3 > rectifier.csv
//! ```

use clap::{Parser, ValueEnum};
use log::info;
use nodal_core::{
    components::{
        Bjt, BjtModel, Capacitor, Diode, DiodeModel, Mosfet, MosfetModel, Resistor, VoltageSource,
        Waveform,
    },
    error::Result,
    solver::{
        AcAnalysis, AcConfig, ExportData, NoiseAnalysis, NoiseConfig, OperatingPoint,
        SimulationConfig, SolverStats, TransientAnalysis, TransientConfig,
    },
    Circuit,
};

/// Demo circuits shipped with the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Demo {
    /// Resistive divider
    Divider,
    /// RC low-pass driven by a pulse
    Rc,
    /// Half-wave rectifier with a smoothing capacitor
    Rectifier,
    /// Common-emitter BJT amplifier
    Amplifier,
    /// CMOS inverter
    Inverter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Analysis {
    Op,
    Ac,
    Tran,
    Noise,
}

/// Analog circuit simulator demo runner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Circuit to simulate
    #[arg(value_enum)]
    demo: Demo,

    /// Analysis to run
    #[arg(value_enum, default_value_t = Analysis::Op)]
    analysis: Analysis,

    /// Transient output step in seconds
    #[arg(long, default_value_t = 1e-5)]
    step: f64,

    /// Transient stop time in seconds
    #[arg(long, default_value_t = 2e-3)]
    stop: f64,

    /// AC/noise sweep start frequency in Hz
    #[arg(long, default_value_t = 10.0)]
    fstart: f64,

    /// AC/noise sweep stop frequency in Hz
    #[arg(long, default_value_t = 1e6)]
    fstop: f64,

    /// AC/noise points per decade
    #[arg(long, default_value_t = 10)]
    points: usize,

    /// Circuit temperature in °C
    #[arg(long, default_value_t = 27.0)]
    temp: f64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let (mut circuit, probe) = build(args.demo)?;
    let config = SimulationConfig::default().with_temperature_celsius(args.temp);
    let mut stats = SolverStats::new();
    info!("running {:?} on the {:?} demo", args.analysis, args.demo);

    match args.analysis {
        Analysis::Op => {
            println!("unknown,value");
            OperatingPoint::new(config).run(&mut circuit, &mut stats, |data| {
                let state = data.state();
                for node in state.nodes.iter() {
                    println!("{},{:.9e}", node, state.solution[node.id.index()]);
                }
            })?;
        }
        Analysis::Ac => {
            println!("frequency,magnitude_db,phase_deg");
            let sweep = AcConfig::decade(args.points, args.fstart, args.fstop);
            AcAnalysis::new(config, sweep).run(&mut circuit, &mut stats, |data| {
                print_ac_row(data, probe);
            })?;
        }
        Analysis::Tran => {
            println!("time,{}", probe);
            let tran = TransientConfig::new(args.step, args.stop);
            TransientAnalysis::new(config, tran).run(&mut circuit, &mut stats, |data| {
                if let Some(v) = data.voltage(probe) {
                    println!("{:.9e},{:.9e}", data.time(), v);
                }
            })?;
        }
        Analysis::Noise => {
            println!("frequency,output_density,input_density");
            let sweep = AcConfig::decade(args.points, args.fstart, args.fstop);
            let noise = NoiseConfig::new(probe, "VIN", sweep);
            let totals = NoiseAnalysis::new(config, noise).run(&mut circuit, &mut stats, |data| {
                if let (Some(f), Some(point)) = (data.frequency(), data.noise()) {
                    println!("{:.6e},{:.6e},{:.6e}", f, point.output_density, point.input_density);
                }
            })?;
            info!("total output noise {:.4e} V^2", totals.output);
        }
    }

    info!(
        "{} iterations, {} accepted, {} rejected, load {:?}, solve {:?}",
        stats.iterations(),
        stats.accepted,
        stats.rejected,
        stats.load_time,
        stats.solve_time
    );
    Ok(())
}

fn print_ac_row(data: &ExportData, probe: &str) {
    if let (Some(f), Some(db), Some(phase)) = (data.frequency(), data.decibels(probe), data.phase(probe)) {
        println!("{:.6e},{:.6e},{:.6e}", f, db, phase);
    }
}

/// Build a demo circuit and name the node worth probing.
///
/// Every demo drives its input from a source named `VIN` with a unit AC
/// magnitude.
fn build(demo: Demo) -> Result<(Circuit, &'static str)> {
    let mut c = Circuit::new();
    let probe = match demo {
        Demo::Divider => {
            c.add(VoltageSource::new("VIN", "in", "0", 10.0).with_ac(1.0, 0.0))?;
            c.add(Resistor::new("R1", "in", "out", 10e3))?;
            c.add(Resistor::new("R2", "out", "0", 10e3))?;
            "out"
        }
        Demo::Rc => {
            let pulse = Waveform::pulse(0.0, 1.0, 1e-4, 1e-6, 1e-6, 5e-4, 1e-3);
            c.add(VoltageSource::new("VIN", "in", "0", 0.0).with_waveform(pulse).with_ac(1.0, 0.0))?;
            c.add(Resistor::new("R1", "in", "out", 1e3))?;
            c.add(Capacitor::new("C1", "out", "0", 100e-9))?;
            "out"
        }
        Demo::Rectifier => {
            c.add_model(DiodeModel::new("D1N4148"))?;
            c.add(VoltageSource::new("VIN", "in", "0", 0.0).with_waveform(Waveform::sine(0.0, 5.0, 1e3)).with_ac(1.0, 0.0))?;
            c.add(Diode::new("D1", "in", "out", "D1N4148"))?;
            c.add(Resistor::new("RL", "out", "0", 10e3))?;
            c.add(Capacitor::new("CL", "out", "0", 1e-6))?;
            "out"
        }
        Demo::Amplifier => {
            let mut model = BjtModel::npn("Q2N3904");
            model.is.set(6.734e-15);
            model.bf.set(416.4);
            model.vaf.set(74.03);
            model.cje.set(4.493e-12);
            model.cjc.set(3.638e-12);
            model.tf.set(301.2e-12);
            c.add_model(model)?;
            c.add(VoltageSource::new("VCC", "vcc", "0", 12.0))?;
            c.add(VoltageSource::new("VIN", "in", "0", 0.0).with_waveform(Waveform::sine(0.0, 10e-3, 1e3)).with_ac(1.0, 0.0))?;
            c.add(Capacitor::new("CIN", "in", "base", 10e-6))?;
            c.add(Resistor::new("RB1", "vcc", "base", 68e3))?;
            c.add(Resistor::new("RB2", "base", "0", 10e3))?;
            c.add(Resistor::new("RC", "vcc", "out", 4.7e3))?;
            c.add(Resistor::new("RE", "emitter", "0", 1e3))?;
            c.add(Capacitor::new("CE", "emitter", "0", 100e-6))?;
            c.add(Bjt::new("Q1", "out", "base", "emitter", "Q2N3904"))?;
            "out"
        }
        Demo::Inverter => {
            let mut nmos = MosfetModel::nmos("NMOS1");
            nmos.vto.set(0.7);
            nmos.kp.set(110e-6);
            nmos.cgso.set(1e-10);
            nmos.cgdo.set(1e-10);
            let mut pmos = MosfetModel::pmos("PMOS1");
            pmos.vto.set(-0.7);
            pmos.kp.set(50e-6);
            pmos.cgso.set(1e-10);
            pmos.cgdo.set(1e-10);
            c.add_model(nmos)?;
            c.add_model(pmos)?;
            let pulse = Waveform::pulse(0.0, 5.0, 1e-4, 1e-5, 1e-5, 4e-4, 1e-3);
            c.add(VoltageSource::new("VDD", "vdd", "0", 5.0))?;
            c.add(VoltageSource::new("VIN", "in", "0", 0.0).with_waveform(pulse).with_ac(1.0, 0.0))?;
            c.add(Mosfet::new("MN", "out", "in", "0", "0", "NMOS1").with_size(10e-6, 1e-6))?;
            c.add(Mosfet::new("MP", "out", "in", "vdd", "vdd", "PMOS1").with_size(20e-6, 1e-6))?;
            c.add(Capacitor::new("CL", "out", "0", 1e-12))?;
            "out"
        }
    };
    Ok((c, probe))
}
