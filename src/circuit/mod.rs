//! Circuit representation and per-analysis state.
//!
//! A [`Circuit`] owns the device instances, the models they reference and
//! the user's nodesets and initial conditions. Binding it produces a
//! [`CircuitState`]: the node registry, the sparse matrix with every handle
//! the devices cached, the solution vectors and the state history.

mod graph;
mod nodes;
mod state;
mod types;
mod validate;

pub use graph::Circuit;
pub use nodes::{Nodes, GROUND_NAMES};
pub use state::{AcDrive, CircuitState, Domain, ForcedNode, InitMode, Tolerances};
pub use types::{Node, NodeId, NodeType};
pub use validate::validate_circuit;
