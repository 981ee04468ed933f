//! # Nodal Core
//!
//! The numerical core of an analog circuit simulator.
//!
//! This library provides:
//! - A sparse LU engine with Markowitz pivoting for real and complex systems
//! - Circuit topology with named nodes, ground aliases and branch unknowns
//! - A device contract implemented by passive, source, controlled and
//!   semiconductor devices
//! - Operating point, DC sweep, AC, noise and adaptive transient analyses
//!
//! ## Architecture
//!
//! - [`sparse`] - Sparse matrix storage, ordering and factorization
//! - [`circuit`] - Circuit container, node table and per-analysis state
//! - [`components`] - Device models and the [`Device`](components::Device) trait
//! - [`integration`] - Trapezoidal and Gear formulas, truncation error, breakpoints
//! - [`solver`] - Newton-Raphson engine and the analysis drivers
//! - [`params`] - Named parameter tables shared by devices and models
//!
//! ## Usage
//!
//! ```no_run
//! use nodal_core::components::{Resistor, VoltageSource};
//! use nodal_core::solver::{OperatingPoint, SolverStats};
//! use nodal_core::Circuit;
//!
//! let mut circuit = Circuit::new();
//! circuit.add(VoltageSource::new("V1", "in", "0", 100.0))?;
//! circuit.add(Resistor::new("R1", "in", "out", 3.0))?;
//! circuit.add(Resistor::new("R2", "out", "0", 1.0))?;
//!
//! let mut stats = SolverStats::new();
//! OperatingPoint::default().run(&mut circuit, &mut stats, |data| {
//!     println!("v(out) = {:?}", data.voltage("out"));
//! })?;
//! # Ok::<(), nodal_core::SimError>(())
//! ```
//!
//! ## Simulation Method
//!
//! Every analysis builds one Modified Nodal Analysis system per solve:
//!
//! 1. Devices stamp their linearized conductances and currents into A and z
//! 2. The sparse engine factors A and solves for node voltages and branch currents
//! 3. Nonlinear devices are re-linearized until the Newton iteration converges
//!
//! Reactive elements are discretized with the trapezoidal rule or the Gear
//! formulas, with the timestep chosen from the local truncation error.

pub mod circuit;
pub mod components;
pub mod error;
pub mod integration;
pub mod params;
pub mod solver;
pub mod sparse;

// Re-export main types for convenience
pub use circuit::Circuit;
pub use error::{Result, SimError};

/// Boltzmann constant in J/K
pub const BOLTZMANN: f64 = 1.380_648_52e-23;

/// Elementary charge in C
pub const CHARGE: f64 = 1.602_176_62e-19;

/// Offset between the Celsius and Kelvin scales
pub const CELSIUS_TO_KELVIN: f64 = 273.15;

/// Default circuit and model temperature in K (27 °C)
pub const NOMINAL_TEMPERATURE: f64 = 300.15;
