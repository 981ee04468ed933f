//! Ordered set of future breakpoints.

/// Sorted list of times the integrator must land on exactly.
#[derive(Debug, Clone)]
pub struct Breakpoints {
    points: Vec<f64>,
    /// Breakpoints closer than this are merged
    min_break: f64,
}

impl Breakpoints {
    /// Create the set for a run ending at `stop`.
    pub fn new(stop: f64, min_break: f64) -> Self {
        Self {
            points: vec![0.0, stop],
            min_break,
        }
    }

    /// Register a breakpoint.
    ///
    /// A point within `min_break` of an existing one replaces it, so the most
    /// recently reported edge is the one landed on. The stop time never
    /// moves.
    pub fn insert(&mut self, time: f64) {
        if !time.is_finite() {
            return;
        }
        let last = self.points.len().saturating_sub(1);
        let pos = self.points.partition_point(|&p| p < time);
        if let Some(&next) = self.points.get(pos) {
            if next - time < self.min_break {
                if pos != last {
                    self.points[pos] = time;
                }
                return;
            }
        }
        if pos > 0 && time - self.points[pos - 1] < self.min_break {
            if pos - 1 != last {
                self.points[pos - 1] = time;
            }
            return;
        }
        self.points.insert(pos, time);
    }

    /// Next breakpoint.
    pub fn first(&self) -> f64 {
        self.points.first().copied().unwrap_or(f64::INFINITY)
    }

    /// Drop the next breakpoint once it has been reached.
    pub fn clear_first(&mut self) {
        if self.points.len() > 1 {
            self.points.remove(0);
        } else {
            self.points.clear();
        }
    }

    /// Number of pending breakpoints.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Pending breakpoints in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_order() {
        let mut b = Breakpoints::new(10.0, 1e-6);
        b.insert(5.0);
        b.insert(2.0);
        b.insert(7.5);
        let points: Vec<f64> = b.iter().collect();
        assert_eq!(points, vec![0.0, 2.0, 5.0, 7.5, 10.0]);
    }

    #[test]
    fn test_close_points_merge() {
        let mut b = Breakpoints::new(10.0, 1e-3);
        b.insert(5.0);
        b.insert(5.0 + 1e-4);
        b.insert(5.0 - 1e-4);
        let points: Vec<f64> = b.iter().collect();
        assert_eq!(points, vec![0.0, 5.0 - 1e-4, 10.0]);
    }

    #[test]
    fn test_exact_edge_replaces_nearby_point() {
        let mut b = Breakpoints::new(10.0, 1e-3);
        b.insert(5.0 - 1e-4);
        b.insert(5.0);
        assert_eq!(b.iter().collect::<Vec<_>>(), vec![0.0, 5.0, 10.0]);
        b.insert(5.0 + 1e-4);
        assert_eq!(b.iter().collect::<Vec<_>>(), vec![0.0, 5.0 + 1e-4, 10.0]);
    }

    #[test]
    fn test_stop_time_is_not_moved() {
        let mut b = Breakpoints::new(10.0, 1e-3);
        b.insert(10.0 - 1e-4);
        b.insert(10.0 + 1e-4);
        assert_eq!(b.iter().collect::<Vec<_>>(), vec![0.0, 10.0]);
    }

    #[test]
    fn test_clear_first() {
        let mut b = Breakpoints::new(1.0, 1e-9);
        b.clear_first();
        assert_eq!(b.first(), 1.0);
        assert_eq!(b.len(), 1);
    }
}
