//! Sparse matrix engine.
//!
//! The circuit equations are assembled into a [`Matrix`] whose nonzero
//! positions are stored as elements threaded on two sorted linked lists: one
//! per row, one per column. Devices obtain an [`ElementHandle`] for every
//! position they stamp while binding, then accumulate into it in O(1) on
//! every Load pass.
//!
//! ## Factorization
//!
//! [`Matrix::factor`] performs an in-place LU decomposition:
//!
//! - The first factorization (and any factorization after the structure
//!   changed) searches for pivots with the Markowitz criterion, preferring
//!   diagonal candidates, and creates fill-in elements as needed. Each such
//!   search increments [`Matrix::reorders`].
//! - Later factorizations reuse the stored pivot sequence as long as every
//!   pivot passes the relative threshold test
//!   `|pivot| >= rel_threshold * max|column|`. When a pivot fails the test the
//!   values are restored and a full reorder runs instead.
//!
//! Element values are stored as real and imaginary parts so that one
//! structure serves both the real (DC/transient) and the complex (AC/noise)
//! passes. Row and column index 0 is ground: handles for it point at a trash
//! element whose value is never read.

mod factor;
mod matrix;

pub use factor::SingularPivot;
pub use matrix::{ElementHandle, Matrix};
