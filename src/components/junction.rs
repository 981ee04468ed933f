//! Shared semiconductor helpers: voltage limiting and depletion charge.

use crate::{BOLTZMANN, CHARGE};

/// Thermal voltage kT/q at `temperature` Kelvin.
#[inline]
pub fn thermal_voltage(temperature: f64) -> f64 {
    BOLTZMANN * temperature / CHARGE
}

/// Critical junction voltage above which limiting applies.
#[inline]
pub fn critical_voltage(vt: f64, is: f64) -> f64 {
    vt * (vt / (std::f64::consts::SQRT_2 * is)).ln()
}

/// Limit a new junction voltage relative to the previous iterate.
///
/// When the new value is above `vcrit` and moved by more than `factor * vt`,
/// it is replaced by a logarithmically damped step. Returns the limited
/// voltage and whether limiting happened.
pub fn pnjlim(vnew: f64, vold: f64, vt: f64, vcrit: f64, factor: f64) -> (f64, bool) {
    if vnew > vcrit && (vnew - vold).abs() > factor * vt {
        let limited = if vold > 0.0 {
            let arg = 1.0 + (vnew - vold) / vt;
            if arg > 0.0 {
                vold + vt * arg.ln()
            } else {
                vcrit
            }
        } else {
            vt * (vnew / vt).ln()
        };
        (limited, true)
    } else {
        (vnew, false)
    }
}

/// Limit a new gate-source voltage of a field-effect transistor.
pub fn fetlim(vnew: f64, vold: f64, vto: f64) -> f64 {
    let vtsthi = (2.0 * (vold - vto)).abs() + 2.0;
    let vtstlo = (vold - vto).abs() + 1.0;
    let vtox = vto + 3.5;
    let delv = vnew - vold;

    if vold >= vto {
        if vold >= vtox {
            if delv <= 0.0 {
                // Going off
                if vnew >= vtox {
                    if -delv > vtstlo {
                        return vold - vtstlo;
                    }
                    vnew
                } else {
                    vnew.max(vto + 2.0)
                }
            } else if delv >= vtsthi {
                vold + vtsthi
            } else {
                vnew
            }
        } else if delv <= 0.0 {
            vnew.max(vto - 0.5)
        } else {
            vnew.min(vto + 4.0)
        }
    } else if delv <= 0.0 {
        if -delv > vtsthi {
            vold - vtsthi
        } else {
            vnew
        }
    } else {
        let vtemp = vto + 0.5;
        if vnew <= vtemp {
            if delv > vtstlo {
                vold + vtstlo
            } else {
                vnew
            }
        } else {
            vtemp
        }
    }
}

/// Limit a new drain-source voltage.
pub fn limvds(vnew: f64, vold: f64) -> f64 {
    if vold >= 3.5 {
        if vnew > vold {
            vnew.min(3.0 * vold + 2.0)
        } else if vnew < 3.5 {
            vnew.max(2.0)
        } else {
            vnew
        }
    } else if vnew > vold {
        vnew.min(4.0)
    } else {
        vnew.max(-0.5)
    }
}

/// Depletion charge and capacitance of a junction at voltage `v`.
///
/// Above `fc * vj` the capacitance is extended linearly so it stays finite.
pub fn depletion(v: f64, cj0: f64, vj: f64, m: f64, fc: f64) -> (f64, f64) {
    if cj0 == 0.0 {
        return (0.0, 0.0);
    }
    let depcap = fc * vj;
    if v < depcap {
        let arg = 1.0 - v / vj;
        let sarg = (-m * arg.ln()).exp();
        let q = vj * cj0 * grading_integral(arg, m);
        (q, cj0 * sarg)
    } else {
        let f1 = vj * grading_integral(1.0 - fc, m);
        let f2 = (1.0 - fc).powf(1.0 + m);
        let f3 = 1.0 - fc * (1.0 + m);
        let czof2 = cj0 / f2;
        let q = cj0 * f1
            + czof2 * (f3 * (v - depcap) + (m / (vj + vj)) * (v * v - depcap * depcap));
        let c = czof2 * (f3 + m * v / vj);
        (q, c)
    }
}

/// `(1 - x^(1 - m)) / (1 - m)`, which tends to `-ln x` as `m` reaches 1.
fn grading_integral(x: f64, m: f64) -> f64 {
    if (1.0 - m).abs() < 1e-9 {
        -x.ln()
    } else {
        (1.0 - x.powf(1.0 - m)) / (1.0 - m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_thermal_voltage_room_temperature() {
        assert_relative_eq!(thermal_voltage(300.15), 0.025865, epsilon = 1e-5);
    }

    #[test]
    fn test_pnjlim_damps_large_forward_step() {
        let vt = 0.025865;
        let vcrit = critical_voltage(vt, 1e-14);
        let (v, limited) = pnjlim(5.0, 0.6, vt, vcrit, 2.0);
        assert!(limited);
        assert!(v > 0.6 && v < 1.0);

        // Small steps pass through untouched
        let (v, limited) = pnjlim(0.61, 0.6, vt, vcrit, 2.0);
        assert!(!limited);
        assert_eq!(v, 0.61);
    }

    #[test]
    fn test_pnjlim_from_reverse_bias() {
        let vt = 0.025865;
        let vcrit = critical_voltage(vt, 1e-14);
        let (v, limited) = pnjlim(10.0, -1.0, vt, vcrit, 2.0);
        assert!(limited);
        assert_relative_eq!(v, vt * (10.0 / vt).ln());
    }

    #[test]
    fn test_depletion_is_continuous_at_fc() {
        let (cj0, vj, m, fc) = (1e-12, 0.7, 0.5, 0.5);
        let v = fc * vj;
        let (q_lo, c_lo) = depletion(v - 1e-9, cj0, vj, m, fc);
        let (q_hi, c_hi) = depletion(v + 1e-9, cj0, vj, m, fc);
        assert_relative_eq!(q_lo, q_hi, epsilon = 1e-20);
        assert_relative_eq!(c_lo, c_hi, max_relative = 1e-6);
    }

    #[test]
    fn test_depletion_with_unit_grading() {
        let (cj0, vj, fc) = (1e-12, 0.7, 0.5);
        for v in [-2.0, 0.1, 0.5] {
            let (q, c) = depletion(v, cj0, vj, 1.0, fc);
            assert!(q.is_finite() && c.is_finite());
            // Matches a grading coefficient just below one
            let (q_near, c_near) = depletion(v, cj0, vj, 1.0 - 1e-7, fc);
            assert_relative_eq!(q, q_near, max_relative = 1e-5);
            assert_relative_eq!(c, c_near, max_relative = 1e-5);
        }
        let v = fc * vj;
        let (q_lo, _) = depletion(v - 1e-9, cj0, vj, 1.0, fc);
        let (q_hi, _) = depletion(v + 1e-9, cj0, vj, 1.0, fc);
        assert_relative_eq!(q_lo, q_hi, epsilon = 1e-20);
    }

    #[test]
    fn test_fetlim_caps_turn_on() {
        let v = fetlim(10.0, 0.0, 1.0);
        assert_relative_eq!(v, 1.5);
    }
}
