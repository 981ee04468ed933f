//! Solver statistics.

use std::time::Duration;

/// Counters and timings collected while an analysis runs.
///
/// Every driver clears the statistics when it starts, so after a run they
/// describe that run only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolverStats {
    /// Newton iterations spent on operating points (including DC sweeps)
    pub dc_iterations: usize,
    /// Newton iterations spent on transient timepoints
    pub tran_iterations: usize,
    /// Transient timepoints attempted
    pub timepoints: usize,
    pub accepted: usize,
    pub rejected: usize,
    /// Full pivot searches of the sparse matrix
    pub reorders: usize,
    /// Gmin stepping rungs solved
    pub gmin_steps: usize,
    /// Time spent stamping devices
    pub load_time: Duration,
    /// Time spent factoring and solving
    pub solve_time: Duration,
}

impl SolverStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset every counter.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Total Newton iterations.
    pub fn iterations(&self) -> usize {
        self.dc_iterations + self.tran_iterations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_resets_counters() {
        let mut stats = SolverStats::new();
        stats.dc_iterations = 4;
        stats.tran_iterations = 6;
        stats.load_time = Duration::from_millis(3);
        assert_eq!(stats.iterations(), 10);
        stats.clear();
        assert_eq!(stats, SolverStats::default());
    }
}
