//! Transient analysis with adaptive timestep control.
//!
//! Every timepoint goes through predict, Newton solve and accept-or-reject:
//!
//! - The solution is extrapolated from the accepted points, devices
//!   extrapolate their state slots (`InitMode::Predict`), and the Newton
//!   loop solves the companion network at `t + delta`.
//! - A failed Newton solve cuts the step by 8 and drops to first order.
//! - After convergence every device reports the largest step keeping its
//!   local truncation error in tolerance. A step larger than 0.9 of that is
//!   rejected and retried with the recommended step; otherwise the point is
//!   accepted and the recommendation (at most twice the last step) becomes
//!   the next step.
//! - Steps are shortened to land exactly on the next breakpoint.

use log::{debug, info, trace};

use crate::circuit::{Circuit, CircuitState, Domain, InitMode};
use crate::error::{Result, SimError};
use crate::integration::IntegrationMethod;

use super::config::{SimulationConfig, TransientConfig};
use super::export::ExportData;
use super::newton::NewtonRaphson;
use super::op::solve_operating_point;
use super::stats::SolverStats;

/// Transient analysis.
#[derive(Debug, Clone)]
pub struct TransientAnalysis {
    pub config: SimulationConfig,
    pub transient: TransientConfig,
}

impl TransientAnalysis {
    pub fn new(config: SimulationConfig, transient: TransientConfig) -> Self {
        Self { config, transient }
    }

    /// Integrate from 0 to the stop time, firing `export` at t = 0 and at
    /// every accepted timepoint.
    pub fn run<F>(&self, circuit: &mut Circuit, stats: &mut SolverStats, mut export: F) -> Result<()>
    where
        F: FnMut(&ExportData),
    {
        stats.clear();
        let tran = &self.transient;
        tran.validate()?;
        let stop = tran.stop;
        let max_step = tran.max_step();
        let delmin = 1e-11 * max_step;
        info!(
            "transient analysis to {:.4e}s, max step {:.4e}s, {:?} order {}",
            stop, max_step, tran.method, tran.max_order
        );

        let method = IntegrationMethod::new(
            tran.method,
            tran.max_order,
            stop,
            max_step,
            tran.truncation_tolerances(&self.config),
        );
        let mut state = circuit.bind(&self.config, method.history_depth())?;
        circuit.temperature(&state)?;
        state.domain = Domain::Time;
        state.use_dc = true;
        state.method = Some(method);

        self.initial_point(circuit, &mut state, stats)?;
        state.method.as_mut().ok_or_else(missing_method)?.push_solution(&state.solution);
        let mut restart = clear_reached(with_method(&mut state)?, delmin);
        circuit.accept(&mut state);
        export(&ExportData::new(&state, circuit));

        let newton = NewtonRaphson::new(tran.tran_max_iterations);
        let mut delta = (stop / 100.0).min(tran.step) / 10.0;
        {
            let method = with_method(&mut state)?;
            method.init_steps(delta);
            method.save_delta = stop / 50.0;
        }
        let mut first = true;

        loop {
            let time = with_method(&mut state)?.time;
            if time >= stop - delmin {
                break;
            }

            delta = self.limit_to_breakpoints(with_method(&mut state)?, delta, restart, delmin, max_step);
            state.states.rotate();
            with_method(&mut state)?.start_step(delta);

            // Retry the same point until a step passes both tests
            loop {
                {
                    let method = state.method.as_mut().ok_or_else(missing_method)?;
                    method.delta = delta;
                    method.delta_old[0] = delta;
                    // Land on the breakpoint itself, not a rounding of it
                    let next = method.breakpoints.first();
                    method.at_breakpoint = (time + delta - next).abs() <= delmin;
                    method.time = if method.at_breakpoint { next } else { time + delta };
                    method.compute_coefficients();
                    // Extrapolate only across a smooth stretch of the waveform
                    if method.order > 1 {
                        method.predict(&mut state.solution);
                    } else if let Some(last) = method.last_solution() {
                        state.solution.copy_from_slice(last);
                    }
                }
                state.init = if first { InitMode::Transient } else { InitMode::Predict };

                let status = newton.solve(circuit, &mut state, stats);
                stats.timepoints += 1;
                stats.tran_iterations += status.iterations();

                if first {
                    // The operating point is the only history there is
                    state.states.fill_from(1);
                }

                if !status.is_converged() {
                    stats.rejected += 1;
                    delta /= 8.0;
                    with_method(&mut state)?.order = 1;
                    debug!(
                        "t = {:.6e}: Newton failed ({:?}), retry with delta = {:.3e}",
                        time, status, delta
                    );
                    if delta < delmin {
                        return Err(SimError::TimestepTooSmall { time, delta });
                    }
                    continue;
                }

                if first {
                    first = false;
                    break;
                }

                let recommended = self.recommended_step(circuit, &mut state, delta)?;
                if recommended > 0.9 * delta {
                    trace!("t = {:.6e}: accepted, next delta = {:.3e}", time + delta, recommended);
                    delta = recommended;
                    break;
                }

                stats.rejected += 1;
                debug!(
                    "t = {:.6e}: truncation error too large, delta {:.3e} -> {:.3e}",
                    time + delta,
                    delta,
                    recommended
                );
                let previous = delta;
                delta = recommended;
                if delta <= delmin {
                    if previous > delmin {
                        delta = delmin;
                    } else {
                        return Err(SimError::TimestepTooSmall { time, delta });
                    }
                }
            }

            stats.accepted += 1;
            state.method.as_mut().ok_or_else(missing_method)?.push_solution(&state.solution);
            restart = clear_reached(with_method(&mut state)?, delmin);
            circuit.accept(&mut state);
            export(&ExportData::new(&state, circuit));
        }

        stats.reorders = state.matrix.reorders();
        info!(
            "transient done: {} accepted, {} rejected, {} iterations",
            stats.accepted, stats.rejected, stats.tran_iterations
        );
        Ok(())
    }

    /// Solve the t = 0 point: an operating point, or the initial conditions
    /// as given when `use_ic` is set.
    fn initial_point(&self, circuit: &mut Circuit, state: &mut CircuitState, stats: &mut SolverStats) -> Result<()> {
        if self.transient.use_ic {
            state.use_ic = true;
            for ic in &state.ics {
                state.solution[ic.index] = ic.value;
            }
            circuit.set_device_ics(state);
            // Devices pick up their own initial conditions
            state.init = InitMode::Junction;
            state.clear_real();
            circuit.load(state);
        } else {
            solve_operating_point(circuit, state, &self.config, stats, InitMode::Junction)?;
        }
        state.use_dc = false;
        state.states.fill_from_current();
        Ok(())
    }

    /// Shorten `delta` so the step lands on the next breakpoint, and apply
    /// the first-order restart when one was just reached.
    fn limit_to_breakpoints(
        &self,
        method: &mut IntegrationMethod,
        mut delta: f64,
        restart: bool,
        delmin: f64,
        max_step: f64,
    ) -> f64 {
        let time = method.time;
        let next = method.breakpoints.first();

        if restart {
            method.order = 1;
            delta = delta.min(0.1 * method.save_delta.min(next - time));
        }
        delta = delta.min(max_step);

        method.at_breakpoint = false;
        if time + delta >= next - delmin {
            method.save_delta = delta;
            delta = next - time;
            method.at_breakpoint = true;
        }
        delta
    }

    /// Largest step the devices allow after a converged point, trying the
    /// next order when the current one has room to spare.
    fn recommended_step(&self, circuit: &Circuit, state: &mut CircuitState, delta: f64) -> Result<f64> {
        let mut recommended = (2.0 * delta).min(circuit.truncate(state));
        let (order, max_order) = {
            let method = with_method(state)?;
            (method.order, method.max_order)
        };
        if recommended > 0.9 * delta && order < max_order {
            with_method(state)?.order = order + 1;
            let higher = (2.0 * delta).min(circuit.truncate(state));
            if higher <= 1.05 * delta {
                with_method(state)?.order = order;
            } else {
                trace!("raising integration order to {}", order + 1);
                recommended = higher;
            }
        }
        with_method(state)?.last_truncation = recommended;
        Ok(recommended)
    }
}

/// Drop the breakpoints at or before the accepted time, before devices
/// register their next ones. Returns whether any was reached.
fn clear_reached(method: &mut IntegrationMethod, delmin: f64) -> bool {
    let mut reached = false;
    while method.breakpoints.len() > 1 && method.breakpoints.first() <= method.time + delmin {
        method.breakpoints.clear_first();
        reached = true;
    }
    reached
}

fn with_method(state: &mut CircuitState) -> Result<&mut IntegrationMethod> {
    state.method.as_mut().ok_or_else(missing_method)
}

fn missing_method() -> SimError {
    SimError::invalid_analysis("transient state has no integration method")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Capacitor, Resistor, VoltageSource};
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_rc_charges_to_source() {
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", "in", "0", 1.0)).unwrap();
        circuit.add(Resistor::new("R1", "in", "out", 1e3)).unwrap();
        circuit.add(Capacitor::new("C1", "out", "0", 1e-6).with_ic(0.0)).unwrap();

        let tran = TransientConfig::new(1e-4, 1e-2).with_use_ic(true);
        let mut last = (0.0, 0.0);
        let mut times = Vec::new();
        let mut stats = SolverStats::new();
        TransientAnalysis::new(SimulationConfig::default(), tran)
            .run(&mut circuit, &mut stats, |data| {
                times.push(data.time());
                last = (data.time(), data.voltage("out").unwrap());
            })
            .unwrap();

        assert_abs_diff_eq!(last.0, 1e-2, epsilon = 1e-15);
        // Ten time constants
        assert_abs_diff_eq!(last.1, 1.0, epsilon = 1e-3);
        assert!(times.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(stats.accepted + 1, times.len());
    }
}
