//! LU factorization, triangular solves and determinant.
//!
//! Factors are stored in place. After elimination step `k` with pivot
//! `(r, c)`:
//! - elements of column `c` on rows pivoted later hold the L multipliers
//! - elements of row `r` on columns pivoted later hold U
//! - the pivot element keeps its value (the U diagonal)

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use num_complex::Complex64;

use super::matrix::{Element, Matrix, UNPIVOTED};

/// Position of a zero pivot found during factorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingularPivot {
    pub row: usize,
    pub col: usize,
}

impl fmt::Display for SingularPivot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "singular at row {}, column {}", self.row, self.col)
    }
}

/// Scalar field the factorization runs over.
pub(crate) trait Entry:
    Copy + PartialEq + Add<Output = Self> + Sub<Output = Self> + Mul<Output = Self> + Div<Output = Self>
{
    const ZERO: Self;
    fn read(element: &Element) -> Self;
    fn write(element: &mut Element, value: Self);
    /// Pivot magnitude measure
    fn magnitude(self) -> f64;
}

impl Entry for f64 {
    const ZERO: Self = 0.0;

    #[inline]
    fn read(element: &Element) -> Self {
        element.re
    }

    #[inline]
    fn write(element: &mut Element, value: Self) {
        element.re = value;
    }

    #[inline]
    fn magnitude(self) -> f64 {
        self.abs()
    }
}

impl Entry for Complex64 {
    const ZERO: Self = Complex64::new(0.0, 0.0);

    #[inline]
    fn read(element: &Element) -> Self {
        Complex64::new(element.re, element.im)
    }

    #[inline]
    fn write(element: &mut Element, value: Self) {
        element.re = value.re;
        element.im = value.im;
    }

    #[inline]
    fn magnitude(self) -> f64 {
        self.re.abs() + self.im.abs()
    }
}

impl Matrix {
    /// Factor the matrix in place.
    ///
    /// Reuses the previous pivot order when it is still numerically
    /// acceptable and falls back to a full Markowitz search otherwise.
    pub fn factor(&mut self) -> Result<(), SingularPivot> {
        let result = if self.complex {
            self.factor_with::<Complex64>()
        } else {
            self.factor_with::<f64>()
        };
        match result {
            Ok(()) => {
                self.factored = true;
                self.singular = None;
                Ok(())
            }
            Err(pivot) => {
                self.factored = false;
                self.needs_reorder = true;
                self.singular = Some(pivot);
                Err(pivot)
            }
        }
    }

    /// Factor the matrix, always searching for new pivots.
    pub fn order_and_factor(&mut self) -> Result<(), SingularPivot> {
        self.needs_reorder = true;
        self.factor()
    }

    fn factor_with<T: Entry>(&mut self) -> Result<(), SingularPivot> {
        if !self.needs_reorder && self.pivots.len() == self.size {
            let snapshot: Vec<(f64, f64)> = self.elements.iter().map(|e| (e.re, e.im)).collect();
            if self.refactor::<T>() {
                return Ok(());
            }
            log::debug!("pivot order rejected, reordering");
            for (element, &(re, im)) in self.elements.iter_mut().zip(&snapshot) {
                element.re = re;
                element.im = im;
            }
            for element in self.elements.iter_mut().skip(snapshot.len()) {
                element.re = 0.0;
                element.im = 0.0;
            }
        }
        self.reorder_and_factor::<T>()
    }

    /// Eliminate with the stored pivot sequence.
    ///
    /// Returns `false` as soon as a pivot fails the threshold test.
    fn refactor<T: Entry>(&mut self) -> bool {
        for k in 0..self.size {
            let (_, col) = self.pivots[k];
            let pivot = T::read(&self.elements[self.pivot_elements[k]]).magnitude();
            let col_max = self.active_col_max::<T>(col, k);
            if pivot <= self.abs_threshold || pivot < self.rel_threshold * col_max {
                return false;
            }
            self.eliminate::<T>(k);
        }
        true
    }

    fn reorder_and_factor<T: Entry>(&mut self) -> Result<(), SingularPivot> {
        let n = self.size;
        self.row_step.iter_mut().for_each(|s| *s = UNPIVOTED);
        self.col_step.iter_mut().for_each(|s| *s = UNPIVOTED);
        self.pivots.clear();
        self.pivot_elements.clear();

        let mut row_count = vec![0usize; n + 1];
        let mut col_count = vec![0usize; n + 1];
        for element in self.elements.iter().skip(1) {
            row_count[element.row] += 1;
            col_count[element.col] += 1;
        }

        for k in 0..n {
            let Some(index) = self.search_pivot::<T>(&row_count, &col_count) else {
                let row = (1..=n).find(|&r| self.row_step[r] == UNPIVOTED).unwrap_or(0);
                let col = (1..=n).find(|&c| self.col_step[c] == UNPIVOTED).unwrap_or(0);
                return Err(SingularPivot { row, col });
            };
            let (row, col) = (self.elements[index].row, self.elements[index].col);
            self.row_step[row] = k;
            self.col_step[col] = k;
            self.pivots.push((row, col));
            self.pivot_elements.push(index);

            for (j, _) in self.row_elements(row) {
                if self.col_step[j] == UNPIVOTED {
                    col_count[j] -= 1;
                }
            }
            for (i, _) in self.col_elements(col) {
                if self.row_step[i] == UNPIVOTED {
                    row_count[i] -= 1;
                }
            }

            for (i, j) in self.eliminate::<T>(k) {
                row_count[i] += 1;
                col_count[j] += 1;
                self.fillins += 1;
            }
        }

        self.reorders += 1;
        self.needs_reorder = false;
        log::trace!(
            "reordered {} equations, {} elements, {} fill-ins",
            n,
            self.element_count(),
            self.fillins
        );
        Ok(())
    }

    /// Largest magnitude in `col` among rows not yet pivoted before `step`.
    fn active_col_max<T: Entry>(&self, col: usize, step: usize) -> f64 {
        self.col_elements(col)
            .filter(|&(row, _)| self.row_step[row] >= step)
            .map(|(_, index)| T::read(&self.elements[index]).magnitude())
            .fold(0.0, f64::max)
    }

    /// Markowitz pivot search over the active submatrix.
    ///
    /// Diagonal candidates are tried first, then the whole submatrix. Among
    /// candidates passing the threshold test the lowest Markowitz product
    /// wins, ties going to the larger magnitude.
    fn search_pivot<T: Entry>(&self, row_count: &[usize], col_count: &[usize]) -> Option<usize> {
        let n = self.size;
        let mut best: Option<(usize, usize, f64)> = None;
        let consider = |index: usize, col_max: f64, best: &mut Option<(usize, usize, f64)>| {
            let element = &self.elements[index];
            let mag = T::read(element).magnitude();
            if mag <= self.abs_threshold || mag < self.rel_threshold * col_max {
                return;
            }
            let product = row_count[element.row].saturating_sub(1)
                * col_count[element.col].saturating_sub(1);
            let better = match *best {
                None => true,
                Some((_, p, m)) => product < p || (product == p && mag > m),
            };
            if better {
                *best = Some((index, product, mag));
            }
        };

        for i in 1..=n {
            if self.row_step[i] != UNPIVOTED || self.col_step[i] != UNPIVOTED {
                continue;
            }
            if let Some(handle) = self.diagonal(i) {
                let col_max = self.active_col_max::<T>(i, UNPIVOTED);
                consider(handle.0, col_max, &mut best);
            }
        }
        if let Some((index, _, _)) = best {
            return Some(index);
        }

        for col in 1..=n {
            if self.col_step[col] != UNPIVOTED {
                continue;
            }
            let col_max = self.active_col_max::<T>(col, UNPIVOTED);
            for (row, index) in self.col_elements(col) {
                if self.row_step[row] == UNPIVOTED {
                    consider(index, col_max, &mut best);
                }
            }
        }
        best.map(|(index, _, _)| index)
    }

    /// Eliminate below the pivot of step `k`, returning created fill-ins.
    fn eliminate<T: Entry>(&mut self, k: usize) -> Vec<(usize, usize)> {
        let (row, col) = self.pivots[k];
        let pivot = T::read(&self.elements[self.pivot_elements[k]]);

        let lower: Vec<(usize, usize)> = self
            .col_elements(col)
            .filter(|&(i, _)| self.row_step[i] > k)
            .collect();
        let upper: Vec<(usize, usize)> = self
            .row_elements(row)
            .filter(|&(j, _)| self.col_step[j] > k)
            .collect();

        let mut fillins = Vec::new();
        for (i, lower_index) in lower {
            let multiplier = T::read(&self.elements[lower_index]) / pivot;
            T::write(&mut self.elements[lower_index], multiplier);
            for &(j, upper_index) in &upper {
                let (target, created) = self.find_or_insert(i, j);
                if created {
                    fillins.push((i, j));
                }
                let value =
                    T::read(&self.elements[target]) - multiplier * T::read(&self.elements[upper_index]);
                T::write(&mut self.elements[target], value);
            }
        }
        fillins
    }

    /// Solve `A x = b` with the stored factors.
    ///
    /// `rhs` is used as scratch space and is overwritten. Both slices are
    /// indexed by equation number, so index 0 (ground) is ignored and the
    /// solution's entry 0 is set to zero.
    pub fn solve(&self, rhs: &mut [f64], solution: &mut [f64]) {
        self.solve_with(rhs, solution);
    }

    /// Complex counterpart of [`solve`](Self::solve).
    pub fn solve_complex(&self, rhs: &mut [Complex64], solution: &mut [Complex64]) {
        self.solve_with(rhs, solution);
    }

    /// Solve `Aᵀ x = b` with the stored factors of `A`.
    pub fn solve_transposed(&self, rhs: &[f64], solution: &mut [f64]) {
        self.solve_transposed_with(rhs, solution);
    }

    /// Complex counterpart of [`solve_transposed`](Self::solve_transposed).
    pub fn solve_transposed_complex(&self, rhs: &[Complex64], solution: &mut [Complex64]) {
        self.solve_transposed_with(rhs, solution);
    }

    fn solve_with<T: Entry>(&self, b: &mut [T], x: &mut [T]) {
        debug_assert!(self.factored, "solve called on an unfactored matrix");
        let n = self.size;

        // Forward substitution with unit-diagonal L
        for k in 0..n {
            let (row, col) = self.pivots[k];
            let t = b[row];
            if t == T::ZERO {
                continue;
            }
            for (i, index) in self.col_elements(col) {
                if self.row_step[i] > k && self.row_step[i] != UNPIVOTED {
                    b[i] = b[i] - T::read(&self.elements[index]) * t;
                }
            }
        }

        // Backward substitution with U
        for k in (0..n).rev() {
            let (row, col) = self.pivots[k];
            let mut sum = b[row];
            for (j, index) in self.row_elements(row) {
                if self.col_step[j] > k && self.col_step[j] != UNPIVOTED {
                    sum = sum - T::read(&self.elements[index]) * x[j];
                }
            }
            x[col] = sum / T::read(&self.elements[self.pivot_elements[k]]);
        }
        x[0] = T::ZERO;
    }

    fn solve_transposed_with<T: Entry>(&self, b: &[T], x: &mut [T]) {
        debug_assert!(self.factored, "solve called on an unfactored matrix");
        let n = self.size;
        let mut z = vec![T::ZERO; n];

        // Uᵀ z = b, walking the columns of U in pivot order
        for k in 0..n {
            let (_, col) = self.pivots[k];
            let mut sum = b[col];
            for (i, index) in self.col_elements(col) {
                let step = self.row_step[i];
                if step < k {
                    sum = sum - T::read(&self.elements[index]) * z[step];
                }
            }
            z[k] = sum / T::read(&self.elements[self.pivot_elements[k]]);
        }

        // Lᵀ w = z in place
        for k in (0..n).rev() {
            let (row, col) = self.pivots[k];
            let mut sum = z[k];
            for (i, index) in self.col_elements(col) {
                let step = self.row_step[i];
                if step > k && step != UNPIVOTED {
                    sum = sum - T::read(&self.elements[index]) * z[step];
                }
            }
            z[k] = sum;
            x[row] = sum;
        }
        x[0] = T::ZERO;
    }

    /// Determinant of the factored real matrix.
    pub fn determinant(&self) -> Option<f64> {
        if !self.factored || self.complex {
            return None;
        }
        let mut det = self.permutation_sign();
        for &index in &self.pivot_elements {
            det *= self.elements[index].re;
        }
        Some(det)
    }

    /// Determinant of the factored complex matrix.
    pub fn complex_determinant(&self) -> Option<Complex64> {
        if !self.factored || !self.complex {
            return None;
        }
        let mut det = Complex64::new(self.permutation_sign(), 0.0);
        for &index in &self.pivot_elements {
            det *= Complex64::read(&self.elements[index]);
        }
        Some(det)
    }

    /// Sign of the combined row and column permutation.
    fn permutation_sign(&self) -> f64 {
        let rows: Vec<usize> = self.pivots.iter().map(|&(r, _)| r - 1).collect();
        let cols: Vec<usize> = self.pivots.iter().map(|&(_, c)| c - 1).collect();
        if parity(&rows) == parity(&cols) {
            1.0
        } else {
            -1.0
        }
    }
}

/// Parity of a permutation of `0..n` (true when odd).
fn parity(perm: &[usize]) -> bool {
    let mut seen = vec![false; perm.len()];
    let mut odd = false;
    for start in 0..perm.len() {
        if seen[start] {
            continue;
        }
        let mut len = 0;
        let mut i = start;
        while !seen[i] {
            seen[i] = true;
            i = perm[i];
            len += 1;
        }
        if len % 2 == 0 {
            odd = !odd;
        }
    }
    odd
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn stamp_conductance(m: &mut Matrix, a: usize, b: usize, g: f64) {
        let aa = m.get_element(a, a);
        let bb = m.get_element(b, b);
        let ab = m.get_element(a, b);
        let ba = m.get_element(b, a);
        m.add(aa, g);
        m.add(bb, g);
        m.add(ab, -g);
        m.add(ba, -g);
    }

    #[test]
    fn test_solve_conductance_network() {
        // 1 A into node 1; 1 S from 1 to 2, 2 S from 2 to ground, 0.5 S from 1 to ground
        let mut m = Matrix::new();
        stamp_conductance(&mut m, 1, 2, 1.0);
        stamp_conductance(&mut m, 2, 0, 2.0);
        stamp_conductance(&mut m, 1, 0, 0.5);
        m.factor().unwrap();

        let mut rhs = vec![0.0, 1.0, 0.0];
        let mut x = vec![0.0; 3];
        m.solve(&mut rhs, &mut x);
        // [1.5 -1; -1 3] x = [1, 0]
        assert_relative_eq!(x[1], 3.0 / 3.5, epsilon = 1e-12);
        assert_relative_eq!(x[2], 1.0 / 3.5, epsilon = 1e-12);
        assert_relative_eq!(m.determinant().unwrap(), 3.5, epsilon = 1e-12);
    }

    #[test]
    fn test_refactor_keeps_pivot_order() {
        let mut m = Matrix::new();
        for _ in 0..3 {
            m.clear();
            stamp_conductance(&mut m, 1, 2, 1.0);
            stamp_conductance(&mut m, 2, 0, 1.0);
            stamp_conductance(&mut m, 1, 0, 1.0);
            m.factor().unwrap();
        }
        assert_eq!(m.reorders(), 1);
    }

    #[test]
    fn test_zero_diagonal_needs_off_diagonal_pivot() {
        // Voltage source branch: [0 1; 1 0] style structure
        let mut m = Matrix::new();
        let a = m.get_element(1, 2);
        let b = m.get_element(2, 1);
        let c = m.get_element(2, 2);
        m.add(a, 1.0);
        m.add(b, 1.0);
        m.add(c, 0.0);
        m.factor().unwrap();
        let mut rhs = vec![0.0, 5.0, 7.0];
        let mut x = vec![0.0; 3];
        m.solve(&mut rhs, &mut x);
        assert_relative_eq!(x[1], 7.0);
        assert_relative_eq!(x[2], 5.0);
        assert_relative_eq!(m.determinant().unwrap(), -1.0);
    }

    #[test]
    fn test_small_pivot_triggers_reorder() {
        let mut m = Matrix::new();
        let h11 = m.get_element(1, 1);
        let h12 = m.get_element(1, 2);
        let h21 = m.get_element(2, 1);
        let h22 = m.get_element(2, 2);
        m.add(h11, 4.0);
        m.add(h12, 1.0);
        m.add(h21, 1.0);
        m.add(h22, 3.0);
        m.factor().unwrap();
        assert_eq!(m.reorders(), 1);

        m.clear();
        m.add(h11, 1e-9);
        m.add(h12, 1.0);
        m.add(h21, 1.0);
        m.add(h22, 3.0);
        m.factor().unwrap();
        assert_eq!(m.reorders(), 2);

        let mut rhs = vec![0.0, 1.0, 2.0];
        let mut x = vec![0.0; 3];
        m.solve(&mut rhs, &mut x);
        assert_relative_eq!(1e-9 * x[1] + x[2], 1.0, epsilon = 1e-9);
        assert_relative_eq!(x[1] + 3.0 * x[2], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_singular_reports_position() {
        let mut m = Matrix::new();
        stamp_conductance(&mut m, 1, 2, 1.0);
        // Node 1 and 2 only connected to each other: rank deficient
        let err = m.factor().unwrap_err();
        assert!(err.row > 0 && err.col > 0);
        assert_eq!(m.singular(), Some(err));
    }

    #[test]
    fn test_transposed_solve() {
        let mut m = Matrix::new();
        let entries = [(1, 1, 2.0), (1, 2, 1.0), (2, 1, 4.0), (2, 2, 3.0), (3, 2, 1.0), (3, 3, 5.0)];
        for &(r, c, v) in &entries {
            let h = m.get_element(r, c);
            m.add(h, v);
        }
        m.factor().unwrap();
        let b = vec![0.0, 1.0, 2.0, 3.0];
        let mut x = vec![0.0; 4];
        m.solve_transposed(&b, &mut x);
        // Check Aᵀ x = b
        for col in 1..=3 {
            let sum: f64 = entries
                .iter()
                .filter(|&&(_, c, _)| c == col)
                .map(|&(r, _, v)| v * x[r])
                .sum();
            assert_relative_eq!(sum, b[col], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_complex_solve() {
        let mut m = Matrix::new();
        m.set_complex(true);
        let h11 = m.get_element(1, 1);
        let h12 = m.get_element(1, 2);
        let h21 = m.get_element(2, 1);
        let h22 = m.get_element(2, 2);
        m.add_complex(h11, Complex64::new(1.0, 1.0));
        m.add_complex(h12, Complex64::new(-1.0, 0.0));
        m.add_complex(h21, Complex64::new(-1.0, 0.0));
        m.add_complex(h22, Complex64::new(2.0, 0.0));
        m.factor().unwrap();
        let mut rhs = vec![Complex64::new(0.0, 0.0), Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)];
        let mut x = vec![Complex64::new(0.0, 0.0); 3];
        m.solve_complex(&mut rhs, &mut x);
        // (1+j) x1 - x2 = 1, -x1 + 2 x2 = 0 => x1 = 2 / (1 + 2j)
        let expected = Complex64::new(2.0, 0.0) / Complex64::new(1.0, 2.0);
        assert_relative_eq!(x[1].re, expected.re, epsilon = 1e-12);
        assert_relative_eq!(x[1].im, expected.im, epsilon = 1e-12);
        assert_relative_eq!(x[2].re, expected.re / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_parity() {
        assert!(!parity(&[0, 1, 2]));
        assert!(parity(&[1, 0, 2]));
        assert!(!parity(&[1, 2, 0]));
    }
}
