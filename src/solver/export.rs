//! Read-only view of an accepted solution.

use num_complex::Complex64;

use crate::circuit::{Circuit, CircuitState};

/// Noise densities at one frequency.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoisePoint {
    /// Output noise voltage density in V²/Hz
    pub output_density: f64,
    /// Output noise referred to the input source, in V²/Hz or A²/Hz
    pub input_density: f64,
    /// Contribution of every noise generator to the output, in V²/Hz
    pub contributions: Vec<(String, f64)>,
}

/// What the export callback sees after every accepted solve.
///
/// Node lookups return `None` for names the circuit does not know.
pub struct ExportData<'a> {
    state: &'a CircuitState,
    circuit: &'a Circuit,
    frequency: Option<f64>,
    sweep_value: Option<f64>,
    noise: Option<&'a NoisePoint>,
}

impl<'a> ExportData<'a> {
    pub(crate) fn new(state: &'a CircuitState, circuit: &'a Circuit) -> Self {
        Self {
            state,
            circuit,
            frequency: None,
            sweep_value: None,
            noise: None,
        }
    }

    pub(crate) fn at_frequency(mut self, frequency: f64) -> Self {
        self.frequency = Some(frequency);
        self
    }

    pub(crate) fn at_sweep_value(mut self, value: f64) -> Self {
        self.sweep_value = Some(value);
        self
    }

    pub(crate) fn with_noise(mut self, noise: &'a NoisePoint) -> Self {
        self.noise = Some(noise);
        self
    }

    fn index(&self, node: &str) -> Option<usize> {
        self.state.nodes.find(node).map(|id| id.index())
    }

    /// Real value of a node (a branch current for current unknowns).
    pub fn voltage(&self, node: &str) -> Option<f64> {
        self.index(node).map(|i| self.state.voltage(i))
    }

    pub fn voltage_between(&self, pos: &str, neg: &str) -> Option<f64> {
        Some(self.voltage(pos)? - self.voltage(neg)?)
    }

    /// Complex value of a node in a frequency-domain analysis.
    pub fn phasor(&self, node: &str) -> Option<Complex64> {
        self.index(node).map(|i| self.state.phasor(i))
    }

    pub fn magnitude(&self, node: &str) -> Option<f64> {
        self.phasor(node).map(|v| v.norm())
    }

    /// `10 log10 |v|²`
    pub fn decibels(&self, node: &str) -> Option<f64> {
        self.phasor(node).map(|v| 10.0 * v.norm_sqr().log10())
    }

    /// Phase in degrees.
    pub fn phase(&self, node: &str) -> Option<f64> {
        self.phasor(node).map(|v| v.arg().to_degrees())
    }

    /// Current through a device in the real solution.
    pub fn current(&self, device: &str) -> Option<f64> {
        self.circuit.device(device)?.current(self.state)
    }

    /// Simulation time, zero outside transient analysis.
    pub fn time(&self) -> f64 {
        self.state.time()
    }

    /// Analysis frequency in AC and noise analysis.
    pub fn frequency(&self) -> Option<f64> {
        self.frequency
    }

    /// Value of the swept source in a DC sweep.
    pub fn sweep_value(&self) -> Option<f64> {
        self.sweep_value
    }

    /// Noise densities in noise analysis.
    pub fn noise(&self) -> Option<&NoisePoint> {
        self.noise
    }

    /// The full solver state.
    pub fn state(&self) -> &CircuitState {
        self.state
    }
}
