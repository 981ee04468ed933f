//! Circuit validation.

use std::collections::HashMap;

use log::warn;

use crate::error::{Result, SimError};

use super::nodes::Nodes;
use super::Circuit;

/// Validate a circuit before binding.
///
/// Checks:
/// - The circuit has at least one device
/// - Some device connects to ground
///
/// Nodes with a single connection are reported as warnings only.
pub fn validate_circuit(circuit: &Circuit) -> Result<()> {
    if circuit.is_empty() {
        return Err(SimError::invalid_analysis("circuit has no devices"));
    }

    let mut connections: HashMap<&str, usize> = HashMap::new();
    let mut grounded = false;
    for device in circuit.devices() {
        for name in device.pins().names() {
            if Nodes::is_ground_name(name) {
                grounded = true;
            } else {
                *connections.entry(name.as_str()).or_default() += 1;
            }
        }
    }
    if !grounded {
        return Err(SimError::NodeNotFound {
            node: "0 (no device connects to ground)".to_string(),
        });
    }

    let mut dangling: Vec<&str> = connections
        .iter()
        .filter(|(_, &count)| count == 1)
        .map(|(&name, _)| name)
        .collect();
    dangling.sort_unstable();
    for name in dangling {
        warn!("node '{}' has only one connection", name);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Resistor;

    #[test]
    fn test_empty_circuit_rejected() {
        assert!(validate_circuit(&Circuit::new()).is_err());
    }

    #[test]
    fn test_floating_circuit_rejected() {
        let mut circuit = Circuit::new();
        circuit.add(Resistor::new("R1", "a", "b", 1e3)).unwrap();
        assert!(matches!(
            validate_circuit(&circuit),
            Err(SimError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn test_grounded_circuit_passes() {
        let mut circuit = Circuit::new();
        circuit.add(Resistor::new("R1", "a", "0", 1e3)).unwrap();
        circuit.add(Resistor::new("R2", "a", "gnd", 1e3)).unwrap();
        assert!(validate_circuit(&circuit).is_ok());
    }
}
