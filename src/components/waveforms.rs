//! Time-varying waveforms driving independent sources.

use std::f64::consts::PI;

use crate::error::{Result, SimError};

/// A time-to-value function with known discontinuities.
#[derive(Debug, Clone, PartialEq)]
pub enum Waveform {
    /// PULSE(V1 V2 TD TR TF PW PER)
    ///
    /// A period of zero or less means a single pulse.
    Pulse {
        v1: f64,
        v2: f64,
        td: f64,
        tr: f64,
        tf: f64,
        pw: f64,
        per: f64,
    },

    /// SIN(VO VA FREQ TD THETA PHASE), phase in degrees
    Sine {
        vo: f64,
        va: f64,
        freq: f64,
        td: f64,
        theta: f64,
        phase: f64,
    },

    /// Piecewise linear (time, value) pairs in increasing time order
    Pwl { points: Vec<(f64, f64)> },
}

impl Waveform {
    pub fn pulse(v1: f64, v2: f64, td: f64, tr: f64, tf: f64, pw: f64, per: f64) -> Self {
        Waveform::Pulse {
            v1,
            v2,
            td,
            tr,
            tf,
            pw,
            per,
        }
    }

    pub fn sine(vo: f64, va: f64, freq: f64) -> Self {
        Waveform::Sine {
            vo,
            va,
            freq,
            td: 0.0,
            theta: 0.0,
            phase: 0.0,
        }
    }

    pub fn pwl(points: Vec<(f64, f64)>) -> Self {
        Waveform::Pwl { points }
    }

    /// Reject parameter combinations that cannot describe a waveform.
    pub fn validate(&self, source: &str) -> Result<()> {
        match self {
            Waveform::Pulse {
                td, tr, tf, pw, per, ..
            } => {
                if *tr < 0.0 || *tf < 0.0 || *pw < 0.0 || *td < 0.0 {
                    return Err(SimError::invalid_parameter(
                        source,
                        "pulse",
                        "delay, rise, fall and width must be non-negative",
                    ));
                }
                if *per > 0.0 && *per <= tr + pw + tf {
                    return Err(SimError::invalid_parameter(
                        source,
                        "per",
                        format!("period {} must exceed tr + pw + tf = {}", per, tr + pw + tf),
                    ));
                }
                Ok(())
            }
            Waveform::Sine { freq, td, .. } => {
                if *freq < 0.0 || *td < 0.0 {
                    return Err(SimError::invalid_parameter(
                        source,
                        "sin",
                        "frequency and delay must be non-negative",
                    ));
                }
                Ok(())
            }
            Waveform::Pwl { points } => {
                if points.is_empty() {
                    return Err(SimError::invalid_parameter(source, "pwl", "no points given"));
                }
                if points.windows(2).any(|w| w[1].0 <= w[0].0) {
                    return Err(SimError::invalid_parameter(
                        source,
                        "pwl",
                        "times must be strictly increasing",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Value at time `t`.
    pub fn value_at(&self, t: f64) -> f64 {
        match self {
            Waveform::Pulse {
                v1,
                v2,
                td,
                tr,
                tf,
                pw,
                per,
            } => {
                if t < *td {
                    return *v1;
                }
                let mut local = t - td;
                if *per > 0.0 {
                    local -= (local / per).floor() * per;
                }
                if local < *tr {
                    v1 + (v2 - v1) * local / tr
                } else if local < tr + pw {
                    *v2
                } else if local < tr + pw + tf {
                    v2 + (v1 - v2) * (local - tr - pw) / tf
                } else {
                    *v1
                }
            }
            Waveform::Sine {
                vo,
                va,
                freq,
                td,
                theta,
                phase,
            } => {
                let phase = phase * PI / 180.0;
                if t < *td {
                    vo + va * phase.sin()
                } else {
                    let local = t - td;
                    vo + va * (-local * theta).exp() * (2.0 * PI * freq * local + phase).sin()
                }
            }
            Waveform::Pwl { points } => {
                let Some(&(t0, v0)) = points.first() else {
                    return 0.0;
                };
                if t <= t0 {
                    return v0;
                }
                for w in points.windows(2) {
                    let (ta, va) = w[0];
                    let (tb, vb) = w[1];
                    if t <= tb {
                        return va + (vb - va) * (t - ta) / (tb - ta);
                    }
                }
                points.last().map(|p| p.1).unwrap_or(v0)
            }
        }
    }

    /// First discontinuity strictly after `t`, if any.
    pub fn next_breakpoint(&self, t: f64) -> Option<f64> {
        match self {
            Waveform::Pulse {
                td, tr, tf, pw, per, ..
            } => {
                let edges = [0.0, *tr, tr + pw, tr + pw + tf];
                let first_period = if *per > 0.0 && t > *td {
                    ((t - td) / per).floor()
                } else {
                    0.0
                };
                let periods: &[f64] = if *per > 0.0 {
                    &[first_period, first_period + 1.0]
                } else {
                    &[0.0]
                };
                periods
                    .iter()
                    .flat_map(|k| {
                        let start = td + k * per.max(0.0);
                        edges.iter().map(move |e| start + e)
                    })
                    .find(|&edge| edge > t)
            }
            Waveform::Sine { td, .. } => (*td > t).then_some(*td),
            Waveform::Pwl { points } => points.iter().map(|p| p.0).find(|&tp| tp > t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pulse_shape() {
        let w = Waveform::pulse(0.0, 5.0, 1e-6, 1e-7, 1e-7, 1e-6, 5e-6);
        assert_eq!(w.value_at(0.0), 0.0);
        assert_relative_eq!(w.value_at(1.05e-6), 2.5, epsilon = 1e-9);
        assert_eq!(w.value_at(1.5e-6), 5.0);
        assert_relative_eq!(w.value_at(2.15e-6), 2.5, epsilon = 1e-9);
        assert_eq!(w.value_at(3e-6), 0.0);
        // Repeats with the period
        assert_eq!(w.value_at(6.5e-6), 5.0);
    }

    #[test]
    fn test_pulse_breakpoints() {
        let w = Waveform::pulse(0.0, 1.0, 1.0, 0.5, 0.5, 1.0, 0.0);
        assert_eq!(w.next_breakpoint(0.0), Some(1.0));
        assert_eq!(w.next_breakpoint(1.0), Some(1.5));
        assert_eq!(w.next_breakpoint(1.5), Some(2.5));
        assert_eq!(w.next_breakpoint(2.5), Some(3.0));
        assert_eq!(w.next_breakpoint(3.0), None);

        let w = Waveform::pulse(0.0, 1.0, 0.0, 1.0, 1.0, 1.0, 4.0);
        assert_eq!(w.next_breakpoint(3.5), Some(4.0));
        assert_eq!(w.next_breakpoint(4.0), Some(5.0));
    }

    #[test]
    fn test_pulse_period_validation() {
        let w = Waveform::pulse(0.0, 1.0, 0.0, 1.0, 1.0, 1.0, 3.0);
        assert!(matches!(w.validate("V1"), Err(SimError::InvalidParameter { .. })));
        let single = Waveform::pulse(0.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0);
        assert!(single.validate("V1").is_ok());
    }

    #[test]
    fn test_sine_delay_and_phase() {
        let w = Waveform::Sine {
            vo: 1.0,
            va: 2.0,
            freq: 1e3,
            td: 1e-3,
            theta: 0.0,
            phase: 90.0,
        };
        assert_relative_eq!(w.value_at(0.0), 3.0);
        assert_relative_eq!(w.value_at(1.25e-3), 1.0, epsilon = 1e-9);
        assert_eq!(w.next_breakpoint(0.0), Some(1e-3));
        assert_eq!(w.next_breakpoint(1e-3), None);
    }

    #[test]
    fn test_pwl_interpolation() {
        let w = Waveform::pwl(vec![(0.0, 0.0), (1.0, 2.0), (2.0, 2.0)]);
        assert!(w.validate("V1").is_ok());
        assert_relative_eq!(w.value_at(0.5), 1.0);
        assert_eq!(w.value_at(5.0), 2.0);
        assert_eq!(w.next_breakpoint(0.0), Some(1.0));

        let bad = Waveform::pwl(vec![(1.0, 0.0), (1.0, 1.0)]);
        assert!(bad.validate("V1").is_err());
    }
}
