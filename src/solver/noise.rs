//! Small-signal noise analysis.
//!
//! At every frequency the input source is driven with a unit phasor to get
//! the gain to the output. A solve with the transposed matrix then gives,
//! in one pass, the transfer impedance from every node to the output, so
//! each generator's contribution is its density times the squared transfer.

use log::info;
use num_complex::Complex64;

use crate::circuit::{AcDrive, Circuit};
use crate::error::{Result, SimError};

use super::ac::{prepare_small_signal, solve_at};
use super::config::{NoiseConfig, SimulationConfig};
use super::export::{ExportData, NoisePoint};
use super::stats::SolverStats;

/// Noise integrated over the analysed band.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NoiseTotals {
    /// Total output noise power in V²
    pub output: f64,
    /// Total input-referred noise power
    pub input: f64,
}

/// Noise analysis.
#[derive(Debug, Clone)]
pub struct NoiseAnalysis {
    pub config: SimulationConfig,
    pub noise: NoiseConfig,
}

impl NoiseAnalysis {
    pub fn new(config: SimulationConfig, noise: NoiseConfig) -> Self {
        Self { config, noise }
    }

    /// Run the sweep, firing `export` once per frequency, and return the
    /// noise integrated over the band.
    pub fn run<F>(&self, circuit: &mut Circuit, stats: &mut SolverStats, mut export: F) -> Result<NoiseTotals>
    where
        F: FnMut(&ExportData),
    {
        stats.clear();
        self.noise.validate()?;
        let frequencies = self.noise.sweep.frequencies()?;
        match circuit.device(&self.noise.input) {
            Some(device) if device.parameter("acmag").is_some() => {}
            Some(_) => {
                return Err(SimError::invalid_analysis(format!(
                    "noise input '{}' is not an independent source",
                    self.noise.input
                )))
            }
            None => {
                return Err(SimError::EntityNotFound {
                    name: self.noise.input.clone(),
                })
            }
        }
        info!(
            "noise analysis: output {}, input {}, {} points",
            self.noise.output,
            self.noise.input,
            frequencies.len()
        );

        let mut state = prepare_small_signal(circuit, &self.config, stats)?;
        let output = node_index(&state.nodes, &self.noise.output)?;
        let reference = match &self.noise.reference {
            Some(name) => node_index(&state.nodes, name)?,
            None => 0,
        };
        state.ac_drive = AcDrive::Only(self.noise.input.clone());

        let size = state.size() + 1;
        let mut selector = vec![Complex64::new(0.0, 0.0); size];
        selector[output] += Complex64::new(1.0, 0.0);
        selector[reference] -= Complex64::new(1.0, 0.0);
        selector[0] = Complex64::new(0.0, 0.0);
        let mut transfer = vec![Complex64::new(0.0, 0.0); size];

        let mut totals = NoiseTotals::default();
        let mut previous: Option<(f64, NoisePoint)> = None;
        for &frequency in &frequencies {
            solve_at(circuit, &mut state, frequency, stats)?;
            let gain = state.phasor(output) - state.phasor(reference);
            state.matrix.solve_transposed_complex(&selector, &mut transfer);

            let mut point = NoisePoint::default();
            for source in circuit.noise_sources(&state, frequency) {
                let h = transfer[source.pos] - transfer[source.neg];
                let contribution = source.density * h.norm_sqr();
                point.output_density += contribution;
                point.contributions.push((source.name, contribution));
            }
            let gain_sqr = gain.norm_sqr();
            point.input_density = if gain_sqr > 0.0 {
                point.output_density / gain_sqr
            } else {
                0.0
            };

            if let Some((f0, p0)) = &previous {
                let df = frequency - f0;
                totals.output += 0.5 * df * (p0.output_density + point.output_density);
                totals.input += 0.5 * df * (p0.input_density + point.input_density);
            }
            export(&ExportData::new(&state, circuit).at_frequency(frequency).with_noise(&point));
            previous = Some((frequency, point));
        }

        state.matrix.set_complex(false);
        stats.reorders = state.matrix.reorders();
        info!(
            "total output noise {:.4e} V^2, input-referred {:.4e}",
            totals.output, totals.input
        );
        Ok(totals)
    }
}

fn node_index(nodes: &crate::circuit::Nodes, name: &str) -> Result<usize> {
    nodes
        .find(name)
        .map(|id| id.index())
        .ok_or_else(|| SimError::NodeNotFound { node: name.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Resistor, VoltageSource};
    use crate::solver::AcConfig;
    use crate::BOLTZMANN;
    use approx::assert_relative_eq;

    #[test]
    fn test_divider_thermal_noise() {
        // Two equal resistors: output sees R/2, so S = 4kT (R/2)
        let r = 1e3;
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", "in", "0", 1.0)).unwrap();
        circuit.add(Resistor::new("R1", "in", "out", r)).unwrap();
        circuit.add(Resistor::new("R2", "out", "0", r)).unwrap();

        let config = NoiseConfig::new("out", "V1", AcConfig::linear(2, 1e3, 2e3));
        let mut densities = Vec::new();
        let totals = NoiseAnalysis::new(SimulationConfig::default(), config)
            .run(&mut circuit, &mut SolverStats::new(), |data| {
                densities.push(data.noise().unwrap().clone());
            })
            .unwrap();

        let expected = 4.0 * BOLTZMANN * crate::NOMINAL_TEMPERATURE * r / 2.0;
        assert_eq!(densities.len(), 2);
        assert_relative_eq!(densities[0].output_density, expected, max_relative = 1e-6);
        assert_eq!(densities[0].contributions.len(), 2);
        // Gain is 1/2, so the input-referred density is four times larger
        assert_relative_eq!(densities[0].input_density, 4.0 * expected, max_relative = 1e-6);
        assert_relative_eq!(totals.output, expected * 1e3, max_relative = 1e-6);
    }

    #[test]
    fn test_unknown_input_source() {
        let mut circuit = Circuit::new();
        circuit.add(Resistor::new("R1", "a", "0", 1e3)).unwrap();
        let config = NoiseConfig::new("a", "V9", AcConfig::linear(1, 1e3, 1e3));
        let err = NoiseAnalysis::new(SimulationConfig::default(), config)
            .run(&mut circuit, &mut SolverStats::new(), |_| {})
            .unwrap_err();
        assert!(matches!(err, SimError::EntityNotFound { .. }));
    }
}
