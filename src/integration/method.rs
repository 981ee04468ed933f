//! Multistep integration formulas with truncation error control.

use super::breakpoints::Breakpoints;
use super::history::StateHistory;

/// Highest order any method supports.
pub const MAX_ORDER: usize = 6;

/// Local truncation error coefficients of the trapezoidal rule per order.
const TRAP_COEFFICIENTS: [f64; 2] = [0.5, 0.083_333_333_333];

/// Local truncation error coefficients of the Gear formulas per order.
const GEAR_COEFFICIENTS: [f64; MAX_ORDER] = [
    0.5,
    0.222_222_222_2,
    0.136_363_636_4,
    0.096,
    0.072_992_700_73,
    0.058_309_037_90,
];

/// Integration formula family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Trapezoidal rule (order 1 is backward Euler)
    Trapezoidal,
    /// Backward differentiation (Gear) formulas up to order 6
    Gear,
}

impl MethodKind {
    /// Largest order the family supports.
    pub fn max_supported_order(&self) -> usize {
        match self {
            MethodKind::Trapezoidal => 2,
            MethodKind::Gear => MAX_ORDER,
        }
    }
}

/// Tolerances used when estimating truncation error.
#[derive(Debug, Clone, Copy)]
pub struct TruncationTolerances {
    pub reltol: f64,
    pub abstol: f64,
    pub chgtol: f64,
    pub trtol: f64,
}

/// State of the integration method during a transient run.
#[derive(Debug, Clone)]
pub struct IntegrationMethod {
    pub kind: MethodKind,
    pub max_order: usize,
    /// Order used for the current step
    pub order: usize,
    /// Time of the point being solved
    pub time: f64,
    /// Step leading to the point being solved
    pub delta: f64,
    /// Previous steps; `delta_old[0]` is the current step
    pub delta_old: [f64; MAX_ORDER + 1],
    /// Differentiation coefficients for the current step
    pub ag: [f64; MAX_ORDER + 1],
    /// Step size saved when a step is shortened to hit a breakpoint
    pub save_delta: f64,
    /// Whether the current step ends on a breakpoint
    pub at_breakpoint: bool,
    pub breakpoints: Breakpoints,
    pub tolerances: TruncationTolerances,
    /// Smallest recommended step from the last truncation pass
    pub last_truncation: f64,
    /// Accepted solutions, newest first, for the predictor
    accepted: Vec<Vec<f64>>,
}

impl IntegrationMethod {
    /// Create a method for a run ending at `stop`.
    pub fn new(
        kind: MethodKind,
        max_order: usize,
        stop: f64,
        max_step: f64,
        tolerances: TruncationTolerances,
    ) -> Self {
        let max_order = max_order.clamp(1, kind.max_supported_order());
        Self {
            kind,
            max_order,
            order: 1,
            time: 0.0,
            delta: 0.0,
            delta_old: [0.0; MAX_ORDER + 1],
            ag: [0.0; MAX_ORDER + 1],
            save_delta: 0.0,
            at_breakpoint: false,
            breakpoints: Breakpoints::new(stop, max_step * 5e-5),
            tolerances,
            last_truncation: f64::INFINITY,
            accepted: Vec::new(),
        }
    }

    /// Number of history blocks devices need.
    pub fn history_depth(&self) -> usize {
        self.max_order + 2
    }

    /// Register a breakpoint in the future.
    pub fn set_breakpoint(&mut self, time: f64) {
        if time > self.time {
            self.breakpoints.insert(time);
        }
    }

    /// Shift the step history before a new step of size `delta`.
    pub fn start_step(&mut self, delta: f64) {
        for i in (1..self.delta_old.len()).rev() {
            self.delta_old[i] = self.delta_old[i - 1];
        }
        self.delta = delta;
        self.delta_old[0] = delta;
    }

    /// Fill the whole step history with `delta` before the first step.
    pub fn init_steps(&mut self, delta: f64) {
        self.delta = delta;
        self.delta_old = [delta; MAX_ORDER + 1];
    }

    /// Compute the differentiation coefficients for the current step.
    pub fn compute_coefficients(&mut self) {
        let delta = self.delta;
        self.ag = [0.0; MAX_ORDER + 1];
        match self.kind {
            MethodKind::Trapezoidal => match self.order {
                1 => {
                    self.ag[0] = 1.0 / delta;
                    self.ag[1] = -1.0 / delta;
                }
                _ => {
                    let xmu = 0.5;
                    self.ag[0] = 1.0 / delta / (1.0 - xmu);
                    self.ag[1] = xmu / (1.0 - xmu);
                }
            },
            MethodKind::Gear => {
                let n = self.order + 1;
                let mut mat = [[0.0; MAX_ORDER + 1]; MAX_ORDER + 1];
                let mut rhs = [0.0; MAX_ORDER + 1];
                rhs[1] = -1.0 / delta;
                // mat[j][i] = (tau_i / delta)^j with tau_0 = 0
                for row in mat.iter_mut().take(n) {
                    row[0] = 0.0;
                }
                mat[0][0] = 1.0;
                let mut tau = 0.0;
                for i in 1..n {
                    tau += self.delta_old[i - 1];
                    let ratio = tau / delta;
                    let mut power = 1.0;
                    for row in mat.iter_mut().take(n) {
                        row[i] = power;
                        power *= ratio;
                    }
                }
                solve_dense(&mut mat, &mut rhs, n);
                self.ag[..n].copy_from_slice(&rhs[..n]);
            }
        }
    }

    /// Ratio of the current step to the previous one, used for extrapolation.
    pub fn extrapolation_factor(&self) -> f64 {
        if self.delta_old[1] > 0.0 {
            self.delta / self.delta_old[1]
        } else {
            0.0
        }
    }

    /// Linear extrapolation of a state slot to the new timepoint.
    pub fn extrapolate(&self, states: &StateHistory, slot: usize) -> f64 {
        let xfact = self.extrapolation_factor();
        (1.0 + xfact) * states[1][slot] - xfact * states[2][slot]
    }

    /// Integrate the charge in `slot`; the derivative goes to `slot + 1`.
    ///
    /// Returns the companion conductance `geq` and current `ceq` such that
    /// the device current is `geq * v + ceq`.
    pub fn integrate(&self, states: &mut StateHistory, slot: usize, cap: f64) -> (f64, f64) {
        let ccap = match self.kind {
            MethodKind::Trapezoidal => match self.order {
                1 => self.ag[0] * states[0][slot] + self.ag[1] * states[1][slot],
                _ => {
                    -states[1][slot + 1] * self.ag[1]
                        + self.ag[0] * (states[0][slot] - states[1][slot])
                }
            },
            MethodKind::Gear => (0..=self.order)
                .map(|i| self.ag[i] * states[i][slot])
                .sum(),
        };
        states[0][slot + 1] = ccap;
        let geq = self.ag[0] * cap;
        (geq, ccap - self.ag[0] * states[0][slot])
    }

    /// Largest step that keeps the truncation error of the charge in `slot`
    /// within tolerance.
    pub fn truncation_step(&self, states: &StateHistory, slot: usize) -> f64 {
        let tol = &self.tolerances;
        let order = self.order;
        let ccap = slot + 1;

        let volttol =
            tol.abstol + tol.reltol * states[0][ccap].abs().max(states[1][ccap].abs());
        let chargetol = states[0][slot].abs().max(states[1][slot].abs());
        let chargetol = tol.reltol * chargetol.max(tol.chgtol) / self.delta;
        let tol_total = volttol.max(chargetol);

        // Divided differences of the charge history
        let mut diff = [0.0; MAX_ORDER + 2];
        for (i, d) in diff.iter_mut().enumerate().take(order + 2) {
            *d = states[i][slot];
        }
        let mut deltmp = [0.0; MAX_ORDER + 1];
        deltmp[..=order].copy_from_slice(&self.delta_old[..=order]);
        let mut j = order as isize;
        loop {
            for i in 0..=(j as usize) {
                diff[i] = (diff[i] - diff[i + 1]) / deltmp[i];
            }
            j -= 1;
            if j < 0 {
                break;
            }
            for i in 0..=(j as usize) {
                deltmp[i] = deltmp[i + 1] + self.delta_old[i];
            }
        }

        let factor = match self.kind {
            MethodKind::Trapezoidal => TRAP_COEFFICIENTS[order.min(2) - 1],
            MethodKind::Gear => GEAR_COEFFICIENTS[order - 1],
        };
        let del = tol.trtol * tol_total / tol.abstol.max(factor * diff[0].abs());
        match order {
            1 => del,
            2 => del.sqrt(),
            _ => (del.ln() / order as f64).exp(),
        }
    }

    /// Remember an accepted solution for the predictor.
    pub fn push_solution(&mut self, solution: &[f64]) {
        let mut block = if self.accepted.len() >= 2 {
            self.accepted.pop().unwrap_or_default()
        } else {
            Vec::new()
        };
        block.clear();
        block.extend_from_slice(solution);
        self.accepted.insert(0, block);
    }

    /// Last accepted solution, if any.
    pub fn last_solution(&self) -> Option<&[f64]> {
        self.accepted.first().map(|s| s.as_slice())
    }

    /// Predict the solution at the new timepoint from accepted points.
    pub fn predict(&self, solution: &mut [f64]) {
        match (self.accepted.first(), self.accepted.get(1)) {
            (Some(x1), Some(x2)) => {
                let xfact = self.extrapolation_factor();
                for ((x, a), b) in solution.iter_mut().zip(x1).zip(x2) {
                    *x = (1.0 + xfact) * a - xfact * b;
                }
            }
            (Some(x1), None) => solution.copy_from_slice(x1),
            _ => {}
        }
    }
}

/// Gaussian elimination with partial pivoting on a small dense system.
fn solve_dense(
    mat: &mut [[f64; MAX_ORDER + 1]; MAX_ORDER + 1],
    rhs: &mut [f64; MAX_ORDER + 1],
    n: usize,
) {
    for k in 0..n {
        let mut max_row = k;
        for i in (k + 1)..n {
            if mat[i][k].abs() > mat[max_row][k].abs() {
                max_row = i;
            }
        }
        if mat[max_row][k] == 0.0 {
            continue;
        }
        if max_row != k {
            mat.swap(k, max_row);
            rhs.swap(k, max_row);
        }
        for i in (k + 1)..n {
            let factor = mat[i][k] / mat[k][k];
            for j in k..n {
                mat[i][j] -= factor * mat[k][j];
            }
            rhs[i] -= factor * rhs[k];
        }
    }
    for k in (0..n).rev() {
        let mut sum = rhs[k];
        for j in (k + 1)..n {
            sum -= mat[k][j] * rhs[j];
        }
        rhs[k] = if mat[k][k] != 0.0 { sum / mat[k][k] } else { 0.0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tolerances() -> TruncationTolerances {
        TruncationTolerances {
            reltol: 1e-3,
            abstol: 1e-12,
            chgtol: 1e-14,
            trtol: 7.0,
        }
    }

    #[test]
    fn test_trapezoidal_coefficients() {
        let mut m = IntegrationMethod::new(MethodKind::Trapezoidal, 2, 1.0, 0.1, tolerances());
        m.init_steps(1e-3);
        m.compute_coefficients();
        assert_relative_eq!(m.ag[0], 1e3);
        assert_relative_eq!(m.ag[1], -1e3);
        m.order = 2;
        m.compute_coefficients();
        assert_relative_eq!(m.ag[0], 2e3);
        assert_relative_eq!(m.ag[1], 1.0);
    }

    #[test]
    fn test_gear_order_two_constant_step() {
        // BDF2: x' = (3 x0 - 4 x1 + x2) / (2h)
        let mut m = IntegrationMethod::new(MethodKind::Gear, 2, 1.0, 0.1, tolerances());
        m.init_steps(0.5);
        m.order = 2;
        m.compute_coefficients();
        assert_relative_eq!(m.ag[0], 3.0, epsilon = 1e-12);
        assert_relative_eq!(m.ag[1], -4.0, epsilon = 1e-12);
        assert_relative_eq!(m.ag[2], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_integrate_backward_euler() {
        let mut m = IntegrationMethod::new(MethodKind::Trapezoidal, 2, 1.0, 0.1, tolerances());
        m.init_steps(1e-3);
        m.compute_coefficients();
        let mut states = StateHistory::new(2, 4);
        states[1][0] = 1e-6;
        states[0][0] = 2e-6;
        let (geq, ceq) = m.integrate(&mut states, 0, 1e-6);
        assert_relative_eq!(geq, 1e-3);
        // i = (q0 - q1) / h
        assert_relative_eq!(states[0][1], 1e-3, epsilon = 1e-15);
        assert_relative_eq!(geq * 2.0 + ceq, 1e-3, epsilon = 1e-15);
    }

    #[test]
    fn test_truncation_linear_charge_is_unbounded() {
        // A charge ramp has no second derivative, so order 1 allows a huge step
        let mut m = IntegrationMethod::new(MethodKind::Trapezoidal, 2, 1.0, 0.1, tolerances());
        m.init_steps(1e-3);
        let mut states = StateHistory::new(2, 4);
        for age in 0..3 {
            states[age][0] = 1e-6 * (3 - age) as f64;
            states[age][1] = 1e-3;
        }
        assert!(m.truncation_step(&states, 0) > 1.0);
    }

    #[test]
    fn test_truncation_quadratic_charge() {
        // q(t) = t^2 sampled with h = 1: second divided difference is 1
        let tol = tolerances();
        let mut m = IntegrationMethod::new(MethodKind::Trapezoidal, 2, 10.0, 1.0, tol);
        m.init_steps(1.0);
        let mut states = StateHistory::new(2, 4);
        states[0][0] = 9.0;
        states[1][0] = 4.0;
        states[2][0] = 1.0;
        states[0][1] = 6.0;
        states[1][1] = 4.0;
        let volttol = tol.abstol + tol.reltol * 6.0;
        let chargetol = tol.reltol * 9.0 / 1.0;
        let expected = tol.trtol * volttol.max(chargetol) / (0.5 * 1.0);
        assert_relative_eq!(m.truncation_step(&states, 0), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_predict_linear_extrapolation() {
        let mut m = IntegrationMethod::new(MethodKind::Trapezoidal, 2, 1.0, 0.1, tolerances());
        m.init_steps(0.1);
        m.push_solution(&[0.0, 1.0]);
        m.push_solution(&[0.0, 2.0]);
        let mut x = vec![0.0; 2];
        m.predict(&mut x);
        assert_relative_eq!(x[1], 3.0);
    }
}
