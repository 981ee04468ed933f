//! Numerical integration for transient analysis.
//!
//! Reactive devices store a charge (or flux) in their state history slot `q`
//! and its time derivative in slot `q + 1`. The [`IntegrationMethod`] turns
//! the charge history into a companion conductance and current for the
//! Newton solve, estimates the local truncation error of each charge, and
//! keeps the [`Breakpoints`] the step control must land on.
//!
//! ## Formulas
//!
//! - Trapezoidal, order 1 (backward Euler): `i0 = (q0 - q1) / h`
//! - Trapezoidal, order 2: `i0 = 2 (q0 - q1) / h - i1`
//! - Gear order k: `i0 = sum(ag[j] * q[j], j = 0..=k)` with the
//!   coefficients solved for the actual (variable) step history

mod breakpoints;
mod history;
mod method;

pub use breakpoints::Breakpoints;
pub use history::StateHistory;
pub use method::{IntegrationMethod, MethodKind, TruncationTolerances, MAX_ORDER};
