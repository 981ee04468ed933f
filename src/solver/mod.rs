//! Analysis drivers built on the Newton-Raphson engine.
//!
//! ## Modified Nodal Analysis
//!
//! Every analysis assembles a system `A x = z` where:
//! - x contains node voltages and branch currents
//! - A holds conductances plus the branch incidence of voltage-defined devices
//! - z collects independent sources and companion currents
//!
//! ```text
//! [ G   B ] [ v ]   [ i ]
//! [ C   D ] [ j ] = [ e ]
//! ```
//!
//! Nonlinear devices are linearized around the last iterate on every
//! [`NewtonRaphson`] pass. The drivers decide what to do with the returned
//! [`SolveStatus`]:
//!
//! - [`OperatingPoint`] escalates through nodesets and Gmin stepping
//! - [`AcAnalysis`] and [`NoiseAnalysis`] solve one complex system per frequency
//! - [`TransientAnalysis`] retries with a smaller step
//! - [`DcSweep`] solves one operating point per source value
//!
//! Each driver fires its export callback with an [`ExportData`] view of the
//! solution once per solved point.

mod ac;
mod config;
mod export;
mod newton;
mod noise;
mod op;
mod stats;
mod sweep;
mod transient;

pub use ac::AcAnalysis;
pub use config::{AcConfig, DcSweepConfig, NoiseConfig, SimulationConfig, Sweep, TransientConfig};
pub use export::{ExportData, NoisePoint};
pub use newton::{NewtonRaphson, SolveStatus};
pub use noise::{NoiseAnalysis, NoiseTotals};
pub use op::OperatingPoint;
pub use stats::SolverStats;
pub use sweep::DcSweep;
pub use transient::TransientAnalysis;
