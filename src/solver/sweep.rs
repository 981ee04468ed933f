//! DC sweep analysis.

use log::{debug, info};

use crate::circuit::{Circuit, Domain, InitMode};
use crate::error::{Result, SimError};

use super::config::{DcSweepConfig, SimulationConfig};
use super::export::ExportData;
use super::op::solve_operating_point;
use super::stats::SolverStats;

/// Operating points over a range of one independent source's DC value.
#[derive(Debug, Clone)]
pub struct DcSweep {
    pub config: SimulationConfig,
    pub sweep: DcSweepConfig,
}

impl DcSweep {
    pub fn new(config: SimulationConfig, sweep: DcSweepConfig) -> Self {
        Self { config, sweep }
    }

    /// Solve every sweep point, firing `export` for each.
    ///
    /// Each point starts from the previous solution. The source's own DC
    /// value is restored afterwards, also when a point fails.
    pub fn run<F>(&self, circuit: &mut Circuit, stats: &mut SolverStats, mut export: F) -> Result<()>
    where
        F: FnMut(&ExportData),
    {
        stats.clear();
        let values = self.sweep.values()?;
        let source = self.sweep.source.as_str();
        let saved = match circuit.device(source) {
            Some(device) => device.parameter("dc").ok_or_else(|| {
                SimError::invalid_analysis(format!("'{}' is not an independent source", source))
            })?,
            None => {
                return Err(SimError::EntityNotFound {
                    name: source.to_string(),
                })
            }
        };
        info!(
            "DC sweep of {} from {} to {} ({} points)",
            source,
            self.sweep.start,
            self.sweep.stop,
            values.len()
        );

        let result = self.sweep_points(circuit, stats, &values, &mut export);
        circuit.set_parameter(source, "dc", saved)?;
        result
    }

    fn sweep_points<F>(&self, circuit: &mut Circuit, stats: &mut SolverStats, values: &[f64], export: &mut F) -> Result<()>
    where
        F: FnMut(&ExportData),
    {
        let source = self.sweep.source.as_str();
        let mut state = circuit.bind(&self.config, 2)?;
        circuit.temperature(&state)?;
        state.domain = Domain::Dc;
        state.use_dc = true;

        let mut start = InitMode::Junction;
        for &value in values {
            circuit.set_parameter(source, "dc", value)?;
            debug!("sweep point {} = {}", source, value);
            solve_operating_point(circuit, &mut state, &self.config, stats, start)?;
            export(&ExportData::new(&state, circuit).at_sweep_value(value));
            start = InitMode::Float;
        }
        stats.reorders = state.matrix.reorders();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Resistor, VoltageSource};
    use approx::assert_relative_eq;

    #[test]
    fn test_sweep_tracks_source_and_restores_it() {
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", "in", "0", 7.0)).unwrap();
        circuit.add(Resistor::new("R1", "in", "out", 1e3)).unwrap();
        circuit.add(Resistor::new("R2", "out", "0", 1e3)).unwrap();

        let mut rows = Vec::new();
        DcSweep::new(SimulationConfig::default(), DcSweepConfig::new("V1", 0.0, 2.0, 0.5))
            .run(&mut circuit, &mut SolverStats::new(), |data| {
                rows.push((data.sweep_value().unwrap(), data.voltage("out").unwrap()));
            })
            .unwrap();
        assert_eq!(rows.len(), 5);
        for (v, out) in rows {
            assert_relative_eq!(out, v / 2.0, epsilon = 1e-9);
        }
        assert_eq!(circuit.parameter("V1", "dc").unwrap(), 7.0);
    }

    #[test]
    fn test_sweep_of_resistor_rejected() {
        let mut circuit = Circuit::new();
        circuit.add(Resistor::new("R1", "in", "0", 1e3)).unwrap();
        let sweep = DcSweep::new(SimulationConfig::default(), DcSweepConfig::new("R1", 0.0, 1.0, 0.5));
        assert!(sweep.run(&mut circuit, &mut SolverStats::new(), |_| {}).is_err());
    }
}
