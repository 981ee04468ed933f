//! Analysis configuration.

use crate::circuit::Tolerances;
use crate::error::{Result, SimError};
use crate::integration::{MethodKind, TruncationTolerances};

/// Circuit-wide solver settings shared by every analysis.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Relative convergence tolerance.
    pub reltol: f64,
    /// Absolute current tolerance (A).
    pub abstol: f64,
    /// Absolute voltage tolerance (V).
    pub vntol: f64,
    /// Absolute charge tolerance (C).
    pub chgtol: f64,
    /// Junction shunt conductance (S).
    pub gmin: f64,
    /// Smallest acceptable pivot magnitude.
    pub pivot_abs_tol: f64,
    /// Pivot threshold relative to the largest entry of its column.
    pub pivot_rel_tol: f64,
    /// Newton iteration limit of one operating point solve.
    pub dc_max_iterations: usize,
    /// Number of decades Gmin stepping starts above `gmin`.
    pub gmin_steps: usize,
    /// Ratio between consecutive Gmin stepping conductances.
    pub gmin_step_factor: f64,
    /// Circuit temperature (K).
    pub temperature: f64,
    /// Temperature model parameters were measured at (K).
    pub nominal_temperature: f64,
    /// Junction limiting threshold in multiples of the thermal voltage.
    pub voltage_limit_factor: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            reltol: 1e-3,
            abstol: 1e-12,
            vntol: 1e-6,
            chgtol: 1e-14,
            gmin: 1e-12,
            pivot_abs_tol: 1e-13,
            pivot_rel_tol: 1e-3,
            dc_max_iterations: 100,
            gmin_steps: 10,
            gmin_step_factor: 10.0,
            temperature: crate::NOMINAL_TEMPERATURE,
            nominal_temperature: crate::NOMINAL_TEMPERATURE,
            voltage_limit_factor: 2.0,
        }
    }
}

impl SimulationConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the relative tolerance.
    pub fn with_reltol(mut self, reltol: f64) -> Self {
        self.reltol = reltol;
        self
    }

    /// Set the absolute current tolerance.
    pub fn with_abstol(mut self, abstol: f64) -> Self {
        self.abstol = abstol;
        self
    }

    /// Set the absolute voltage tolerance.
    pub fn with_vntol(mut self, vntol: f64) -> Self {
        self.vntol = vntol;
        self
    }

    pub fn with_chgtol(mut self, chgtol: f64) -> Self {
        self.chgtol = chgtol;
        self
    }

    pub fn with_gmin(mut self, gmin: f64) -> Self {
        self.gmin = gmin;
        self
    }

    /// Set the absolute and relative pivot thresholds.
    pub fn with_pivot_tolerances(mut self, abs: f64, rel: f64) -> Self {
        self.pivot_abs_tol = abs;
        self.pivot_rel_tol = rel;
        self
    }

    /// Set the operating point iteration limit.
    pub fn with_dc_max_iterations(mut self, iterations: usize) -> Self {
        self.dc_max_iterations = iterations;
        self
    }

    /// Configure Gmin stepping: `steps` rungs, each `factor` times smaller.
    pub fn with_gmin_stepping(mut self, steps: usize, factor: f64) -> Self {
        self.gmin_steps = steps;
        self.gmin_step_factor = factor;
        self
    }

    /// Set the circuit temperature in degrees Celsius.
    pub fn with_temperature_celsius(mut self, celsius: f64) -> Self {
        self.temperature = celsius + crate::CELSIUS_TO_KELVIN;
        self
    }

    /// Set the nominal temperature in degrees Celsius.
    pub fn with_nominal_temperature_celsius(mut self, celsius: f64) -> Self {
        self.nominal_temperature = celsius + crate::CELSIUS_TO_KELVIN;
        self
    }

    pub fn with_voltage_limit_factor(mut self, factor: f64) -> Self {
        self.voltage_limit_factor = factor;
        self
    }

    pub(crate) fn tolerances(&self) -> Tolerances {
        Tolerances {
            reltol: self.reltol,
            abstol: self.abstol,
            vntol: self.vntol,
            chgtol: self.chgtol,
        }
    }

    /// Reject settings no solve could work with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("reltol", self.reltol),
            ("abstol", self.abstol),
            ("vntol", self.vntol),
            ("temperature", self.temperature),
            ("nominal_temperature", self.nominal_temperature),
            ("voltage_limit_factor", self.voltage_limit_factor),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(SimError::invalid_analysis(format!("{} must be positive, got {}", name, value)));
            }
        }
        if self.dc_max_iterations == 0 {
            return Err(SimError::invalid_analysis("dc_max_iterations must be at least 1"));
        }
        if self.gmin_steps > 0 && !(self.gmin_step_factor > 1.0) {
            return Err(SimError::invalid_analysis("gmin_step_factor must be larger than 1"));
        }
        Ok(())
    }
}

/// Transient analysis settings.
#[derive(Debug, Clone)]
pub struct TransientConfig {
    /// Suggested output step.
    pub step: f64,
    pub stop: f64,
    /// Largest allowed timestep, `min(step, stop / 50)` when `None`.
    pub max_step: Option<f64>,
    pub method: MethodKind,
    pub max_order: usize,
    /// Truncation error overestimation factor.
    pub trtol: f64,
    /// Newton iteration limit per timepoint.
    pub tran_max_iterations: usize,
    /// Skip the operating point and start from initial conditions.
    pub use_ic: bool,
}

impl TransientConfig {
    /// Trapezoidal integration from 0 to `stop`.
    pub fn new(step: f64, stop: f64) -> Self {
        Self {
            step,
            stop,
            max_step: None,
            method: MethodKind::Trapezoidal,
            max_order: 2,
            trtol: 7.0,
            tran_max_iterations: 10,
            use_ic: false,
        }
    }

    pub fn with_max_step(mut self, max_step: f64) -> Self {
        self.max_step = Some(max_step);
        self
    }

    /// Select the integration formula and its highest order.
    pub fn with_method(mut self, method: MethodKind, max_order: usize) -> Self {
        self.method = method;
        self.max_order = max_order;
        self
    }

    pub fn with_trtol(mut self, trtol: f64) -> Self {
        self.trtol = trtol;
        self
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.tran_max_iterations = iterations;
        self
    }

    /// Start from initial conditions instead of an operating point.
    pub fn with_use_ic(mut self, use_ic: bool) -> Self {
        self.use_ic = use_ic;
        self
    }

    /// Effective maximum timestep.
    pub fn max_step(&self) -> f64 {
        self.max_step.unwrap_or_else(|| self.step.min(self.stop / 50.0))
    }

    pub(crate) fn truncation_tolerances(&self, sim: &SimulationConfig) -> TruncationTolerances {
        TruncationTolerances {
            reltol: sim.reltol,
            abstol: sim.abstol,
            chgtol: sim.chgtol,
            trtol: self.trtol,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.step > 0.0) {
            return Err(SimError::invalid_analysis(format!("transient step must be positive, got {}", self.step)));
        }
        if !(self.stop > 0.0) {
            return Err(SimError::invalid_analysis(format!("transient stop time must be positive, got {}", self.stop)));
        }
        if let Some(max_step) = self.max_step {
            if !(max_step > 0.0) {
                return Err(SimError::invalid_analysis(format!("maximum timestep must be positive, got {}", max_step)));
            }
        }
        if self.max_order == 0 || self.max_order > self.method.max_supported_order() {
            return Err(SimError::invalid_analysis(format!(
                "order {} is not supported by {:?} integration",
                self.max_order, self.method
            )));
        }
        if self.tran_max_iterations == 0 {
            return Err(SimError::invalid_analysis("tran_max_iterations must be at least 1"));
        }
        Ok(())
    }
}

/// Frequency point spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    /// `points` frequencies spread evenly over the range
    Linear,
    /// `points` per decade
    Decade,
    /// `points` per octave
    Octave,
}

/// AC analysis settings.
#[derive(Debug, Clone)]
pub struct AcConfig {
    pub sweep: Sweep,
    pub points: usize,
    pub start: f64,
    pub stop: f64,
}

impl AcConfig {
    pub fn new(sweep: Sweep, points: usize, start: f64, stop: f64) -> Self {
        Self {
            sweep,
            points,
            start,
            stop,
        }
    }

    /// Logarithmic sweep with `points` per decade.
    pub fn decade(points: usize, start: f64, stop: f64) -> Self {
        Self::new(Sweep::Decade, points, start, stop)
    }

    pub fn octave(points: usize, start: f64, stop: f64) -> Self {
        Self::new(Sweep::Octave, points, start, stop)
    }

    pub fn linear(points: usize, start: f64, stop: f64) -> Self {
        Self::new(Sweep::Linear, points, start, stop)
    }

    pub fn validate(&self) -> Result<()> {
        if self.points == 0 {
            return Err(SimError::invalid_analysis("frequency sweep needs at least one point"));
        }
        if !(self.stop >= self.start) {
            return Err(SimError::invalid_analysis(format!(
                "stop frequency {} is below start frequency {}",
                self.stop, self.start
            )));
        }
        if self.sweep != Sweep::Linear && !(self.start > 0.0) {
            return Err(SimError::invalid_analysis("logarithmic sweeps need a positive start frequency"));
        }
        if self.start < 0.0 {
            return Err(SimError::invalid_analysis("frequencies cannot be negative"));
        }
        Ok(())
    }

    /// Every frequency of the sweep in ascending order.
    pub fn frequencies(&self) -> Result<Vec<f64>> {
        self.validate()?;
        let frequencies = match self.sweep {
            Sweep::Linear => {
                if self.points == 1 {
                    vec![self.start]
                } else {
                    let delta = (self.stop - self.start) / (self.points - 1) as f64;
                    (0..self.points).map(|i| self.start + delta * i as f64).collect()
                }
            }
            Sweep::Decade | Sweep::Octave => {
                let base: f64 = if self.sweep == Sweep::Decade { 10.0 } else { 2.0 };
                let ratio = base.powf(1.0 / self.points as f64);
                // Allow for rounding on the last point
                let limit = self.stop * (1.0 + 1e-9);
                let mut frequencies = Vec::new();
                let mut f = self.start;
                while f <= limit {
                    frequencies.push(f);
                    f *= ratio;
                }
                frequencies
            }
        };
        Ok(frequencies)
    }
}

/// Noise analysis settings.
#[derive(Debug, Clone)]
pub struct NoiseConfig {
    /// Node the output noise is measured at
    pub output: String,
    /// Reference node of the output, ground when `None`
    pub reference: Option<String>,
    /// Independent source the noise is referred to
    pub input: String,
    pub sweep: AcConfig,
}

impl NoiseConfig {
    pub fn new(output: &str, input: &str, sweep: AcConfig) -> Self {
        Self {
            output: output.to_string(),
            reference: None,
            input: input.to_string(),
            sweep,
        }
    }

    /// Measure the output between `output` and `reference`.
    pub fn with_reference(mut self, reference: &str) -> Self {
        self.reference = Some(reference.to_string());
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.sweep.validate()
    }
}

/// DC sweep settings.
#[derive(Debug, Clone)]
pub struct DcSweepConfig {
    /// Independent source whose DC value is swept
    pub source: String,
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl DcSweepConfig {
    pub fn new(source: &str, start: f64, stop: f64, step: f64) -> Self {
        Self {
            source: source.to_string(),
            start,
            stop,
            step,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.step == 0.0 || !self.step.is_finite() {
            return Err(SimError::invalid_analysis("sweep step must be nonzero"));
        }
        if (self.stop - self.start) * self.step < 0.0 {
            return Err(SimError::invalid_analysis(format!(
                "sweep from {} to {} can never be reached with step {}",
                self.start, self.stop, self.step
            )));
        }
        Ok(())
    }

    /// Swept values including both end points.
    pub fn values(&self) -> Result<Vec<f64>> {
        self.validate()?;
        let count = ((self.stop - self.start) / self.step + 1e-9).floor() as usize + 1;
        Ok((0..count).map(|i| self.start + self.step * i as f64).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_decade_sweep_points() {
        let f = AcConfig::decade(10, 1.0, 100.0).frequencies().unwrap();
        assert_eq!(f.len(), 21);
        assert_relative_eq!(f[10], 10.0, epsilon = 1e-9);
        assert_relative_eq!(f[20], 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_linear_sweep_includes_ends() {
        let f = AcConfig::linear(5, 0.0, 100.0).frequencies().unwrap();
        assert_eq!(f, vec![0.0, 25.0, 50.0, 75.0, 100.0]);
    }

    #[test]
    fn test_invalid_configs() {
        assert!(AcConfig::decade(0, 1.0, 10.0).validate().is_err());
        assert!(AcConfig::decade(10, 0.0, 10.0).validate().is_err());
        assert!(TransientConfig::new(0.0, 1.0).validate().is_err());
        assert!(TransientConfig::new(1e-3, 1.0)
            .with_method(MethodKind::Trapezoidal, 3)
            .validate()
            .is_err());
        assert!(DcSweepConfig::new("V1", 0.0, 1.0, -0.1).validate().is_err());
    }

    #[test]
    fn test_dc_sweep_values() {
        let v = DcSweepConfig::new("V1", 0.0, 1.0, 0.25).values().unwrap();
        assert_eq!(v.len(), 5);
        assert_relative_eq!(v[4], 1.0);
        let down = DcSweepConfig::new("V1", 1.0, 0.0, -0.5).values().unwrap();
        assert_eq!(down, vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn test_default_max_step() {
        let cfg = TransientConfig::new(1e-3, 1e-2);
        assert_relative_eq!(cfg.max_step(), 2e-4);
    }
}
