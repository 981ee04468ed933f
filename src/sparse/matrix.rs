//! Linked sparse matrix structure and element access.

use num_complex::Complex64;

use super::factor::SingularPivot;

/// End-of-list marker for the row and column chains.
pub(crate) const NIL: usize = usize::MAX;

/// Step marker for rows and columns that have not been pivoted yet.
pub(crate) const UNPIVOTED: usize = usize::MAX;

/// A stable reference to one stored matrix position.
///
/// Handles stay valid for the lifetime of the matrix: elements are never
/// removed, only cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub(crate) usize);

impl ElementHandle {
    /// Handle for any position in the ground row or column.
    pub const TRASH: ElementHandle = ElementHandle(0);

    /// Check if this handle discards everything added to it.
    pub fn is_trash(&self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Element {
    pub row: usize,
    pub col: usize,
    pub re: f64,
    pub im: f64,
    pub next_in_row: usize,
    pub next_in_col: usize,
}

impl Element {
    fn new(row: usize, col: usize) -> Self {
        Self {
            row,
            col,
            re: 0.0,
            im: 0.0,
            next_in_row: NIL,
            next_in_col: NIL,
        }
    }
}

/// Sparse matrix with pivoted LU factorization.
#[derive(Debug, Clone)]
pub struct Matrix {
    /// Element arena; index 0 is the trash element
    pub(crate) elements: Vec<Element>,
    /// First element of each row (index 0 unused)
    pub(crate) row_head: Vec<usize>,
    /// First element of each column (index 0 unused)
    pub(crate) col_head: Vec<usize>,
    /// Diagonal element of each row, if present
    pub(crate) diag: Vec<usize>,
    /// Number of equations
    pub(crate) size: usize,
    /// Whether values are interpreted as complex numbers
    pub(crate) complex: bool,
    /// Whether the stored values currently hold LU factors
    pub(crate) factored: bool,
    /// Whether the next factorization must search for pivots
    pub(crate) needs_reorder: bool,
    /// Pivot position chosen at each elimination step
    pub(crate) pivots: Vec<(usize, usize)>,
    /// Pivot element chosen at each elimination step
    pub(crate) pivot_elements: Vec<usize>,
    /// Elimination step of each row
    pub(crate) row_step: Vec<usize>,
    /// Elimination step of each column
    pub(crate) col_step: Vec<usize>,
    pub(crate) reorders: usize,
    pub(crate) fillins: usize,
    pub(crate) singular: Option<SingularPivot>,
    /// Relative pivot threshold
    pub rel_threshold: f64,
    /// Absolute pivot threshold
    pub abs_threshold: f64,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::new()
    }
}

impl Matrix {
    /// Create an empty matrix.
    pub fn new() -> Self {
        Self {
            elements: vec![Element::new(0, 0)],
            row_head: vec![NIL],
            col_head: vec![NIL],
            diag: vec![NIL],
            size: 0,
            complex: false,
            factored: false,
            needs_reorder: true,
            pivots: Vec::new(),
            pivot_elements: Vec::new(),
            row_step: vec![UNPIVOTED],
            col_step: vec![UNPIVOTED],
            reorders: 0,
            fillins: 0,
            singular: None,
            rel_threshold: 1e-3,
            abs_threshold: 1e-13,
        }
    }

    /// Create an empty matrix with room for `size` equations.
    pub fn with_size(size: usize) -> Self {
        let mut matrix = Self::new();
        matrix.resize(size);
        matrix
    }

    /// Number of equations.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of stored elements (including fill-ins).
    pub fn element_count(&self) -> usize {
        self.elements.len() - 1
    }

    /// Number of fill-ins created by reordering.
    pub fn fillins(&self) -> usize {
        self.fillins
    }

    /// Number of full pivot searches performed so far.
    pub fn reorders(&self) -> usize {
        self.reorders
    }

    /// Whether the matrix holds complex values.
    pub fn is_complex(&self) -> bool {
        self.complex
    }

    /// Whether the stored values are LU factors.
    pub fn is_factored(&self) -> bool {
        self.factored
    }

    /// Switch between real and complex arithmetic.
    ///
    /// The pivot order chosen for one mode says nothing about the other, so
    /// switching forces a reorder on the next factorization.
    pub fn set_complex(&mut self, complex: bool) {
        if self.complex != complex {
            self.complex = complex;
            self.needs_reorder = true;
        }
        self.clear();
    }

    /// Force the next factorization to search for new pivots.
    pub fn request_reorder(&mut self) {
        self.needs_reorder = true;
    }

    /// Position of the zero pivot found by the last failed factorization.
    pub fn singular(&self) -> Option<SingularPivot> {
        self.singular
    }

    /// Grow the matrix to at least `size` equations.
    pub fn resize(&mut self, size: usize) {
        if size <= self.size {
            return;
        }
        self.row_head.resize(size + 1, NIL);
        self.col_head.resize(size + 1, NIL);
        self.diag.resize(size + 1, NIL);
        self.row_step.resize(size + 1, UNPIVOTED);
        self.col_step.resize(size + 1, UNPIVOTED);
        self.size = size;
        self.needs_reorder = true;
    }

    /// Get the handle for position (row, col), creating the element if needed.
    ///
    /// Any position on row or column 0 maps to [`ElementHandle::TRASH`].
    pub fn get_element(&mut self, row: usize, col: usize) -> ElementHandle {
        if row == 0 || col == 0 {
            return ElementHandle::TRASH;
        }
        self.resize(row.max(col));
        let (index, created) = self.find_or_insert(row, col);
        if created {
            self.needs_reorder = true;
        }
        ElementHandle(index)
    }

    /// Find an existing element without creating it.
    pub fn find_element(&self, row: usize, col: usize) -> Option<ElementHandle> {
        if row == 0 || col == 0 || row > self.size || col > self.size {
            return None;
        }
        let mut index = self.row_head[row];
        while index != NIL {
            let element = &self.elements[index];
            if element.col == col {
                return Some(ElementHandle(index));
            }
            if element.col > col {
                break;
            }
            index = element.next_in_row;
        }
        None
    }

    /// Find or create an element, splicing it into both sorted chains.
    pub(crate) fn find_or_insert(&mut self, row: usize, col: usize) -> (usize, bool) {
        // Walk the row chain to the insertion point
        let mut prev = NIL;
        let mut index = self.row_head[row];
        while index != NIL {
            let element = &self.elements[index];
            if element.col == col {
                return (index, false);
            }
            if element.col > col {
                break;
            }
            prev = index;
            index = element.next_in_row;
        }

        let new_index = self.elements.len();
        let mut element = Element::new(row, col);
        element.next_in_row = index;
        self.elements.push(element);
        if prev == NIL {
            self.row_head[row] = new_index;
        } else {
            self.elements[prev].next_in_row = new_index;
        }

        // Same for the column chain
        let mut prev = NIL;
        let mut index = self.col_head[col];
        while index != NIL && self.elements[index].row < row {
            prev = index;
            index = self.elements[index].next_in_col;
        }
        self.elements[new_index].next_in_col = index;
        if prev == NIL {
            self.col_head[col] = new_index;
        } else {
            self.elements[prev].next_in_col = new_index;
        }

        if row == col {
            self.diag[row] = new_index;
        }
        (new_index, true)
    }

    /// Zero every stored value, keeping the structure.
    pub fn clear(&mut self) {
        for element in &mut self.elements {
            element.re = 0.0;
            element.im = 0.0;
        }
        self.factored = false;
        self.singular = None;
    }

    /// Add a real value to an element.
    #[inline]
    pub fn add(&mut self, handle: ElementHandle, value: f64) {
        self.elements[handle.0].re += value;
    }

    /// Add a complex value to an element.
    #[inline]
    pub fn add_complex(&mut self, handle: ElementHandle, value: Complex64) {
        let element = &mut self.elements[handle.0];
        element.re += value.re;
        element.im += value.im;
    }

    /// Overwrite the value of an element.
    pub fn set(&mut self, handle: ElementHandle, value: f64) {
        let element = &mut self.elements[handle.0];
        element.re = value;
        element.im = 0.0;
    }

    /// Real part of an element.
    pub fn value(&self, handle: ElementHandle) -> f64 {
        if handle.is_trash() {
            return 0.0;
        }
        self.elements[handle.0].re
    }

    /// Complex value of an element.
    pub fn complex_value(&self, handle: ElementHandle) -> Complex64 {
        if handle.is_trash() {
            return Complex64::new(0.0, 0.0);
        }
        let element = &self.elements[handle.0];
        Complex64::new(element.re, element.im)
    }

    /// Real value at (row, col), zero when the position is not stored.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.find_element(row, col)
            .map(|handle| self.value(handle))
            .unwrap_or(0.0)
    }

    /// Diagonal element of a row, if stored.
    pub fn diagonal(&self, row: usize) -> Option<ElementHandle> {
        match self.diag.get(row) {
            Some(&index) if index != NIL => Some(ElementHandle(index)),
            _ => None,
        }
    }

    /// Add `gmin` to every stored diagonal element.
    pub fn load_gmin(&mut self, gmin: f64) {
        if gmin == 0.0 {
            return;
        }
        for row in 1..=self.size {
            let index = self.diag[row];
            if index != NIL {
                self.elements[index].re += gmin;
            }
        }
    }

    /// Zero the entries of `row` whose column is not kept.
    ///
    /// Returns `true` when a kept column held a nonzero value.
    pub fn zero_row<F>(&mut self, row: usize, keep: F) -> bool
    where
        F: Fn(usize) -> bool,
    {
        if row == 0 || row > self.size {
            return false;
        }
        let mut kept_nonzero = false;
        let mut index = self.row_head[row];
        while index != NIL {
            let element = &mut self.elements[index];
            if element.re != 0.0 || element.im != 0.0 {
                if keep(element.col) {
                    kept_nonzero = true;
                } else {
                    element.re = 0.0;
                    element.im = 0.0;
                }
            }
            index = element.next_in_row;
        }
        kept_nonzero
    }

    /// Iterate the (column, element) pairs of a row in column order.
    pub(crate) fn row_elements(&self, row: usize) -> RowIter<'_> {
        RowIter {
            matrix: self,
            index: self.row_head.get(row).copied().unwrap_or(NIL),
        }
    }

    /// Iterate the (row, element) pairs of a column in row order.
    pub(crate) fn col_elements(&self, col: usize) -> ColIter<'_> {
        ColIter {
            matrix: self,
            index: self.col_head.get(col).copied().unwrap_or(NIL),
        }
    }
}

pub(crate) struct RowIter<'a> {
    matrix: &'a Matrix,
    index: usize,
}

impl Iterator for RowIter<'_> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index == NIL {
            return None;
        }
        let index = self.index;
        let element = &self.matrix.elements[index];
        self.index = element.next_in_row;
        Some((element.col, index))
    }
}

pub(crate) struct ColIter<'a> {
    matrix: &'a Matrix,
    index: usize,
}

impl Iterator for ColIter<'_> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index == NIL {
            return None;
        }
        let index = self.index;
        let element = &self.matrix.elements[index];
        self.index = element.next_in_col;
        Some((element.row, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ground_positions_are_trash() {
        let mut m = Matrix::new();
        assert!(m.get_element(0, 3).is_trash());
        assert!(m.get_element(2, 0).is_trash());
        assert_eq!(m.element_count(), 0);
    }

    #[test]
    fn test_get_element_is_stable() {
        let mut m = Matrix::new();
        let a = m.get_element(2, 3);
        let b = m.get_element(1, 1);
        let c = m.get_element(2, 1);
        assert_eq!(m.get_element(2, 3), a);
        assert_eq!(m.get_element(1, 1), b);
        assert_eq!(m.size(), 3);

        // Row chain is sorted by column
        let cols: Vec<usize> = m.row_elements(2).map(|(col, _)| col).collect();
        assert_eq!(cols, vec![1, 3]);
        assert_eq!(m.find_element(2, 1), Some(c));
        assert_eq!(m.find_element(3, 3), None);
    }

    #[test]
    fn test_accumulate_and_clear() {
        let mut m = Matrix::with_size(2);
        let h = m.get_element(1, 2);
        m.add(h, 1.5);
        m.add(h, 2.0);
        assert_eq!(m.value(h), 3.5);
        m.clear();
        assert_eq!(m.value(h), 0.0);
        assert_eq!(m.element_count(), 1);
    }

    #[test]
    fn test_zero_row_keeps_selected_columns() {
        let mut m = Matrix::with_size(3);
        let a = m.get_element(1, 1);
        let b = m.get_element(1, 3);
        m.add(a, 2.0);
        m.add(b, 1.0);
        assert!(m.zero_row(1, |col| col == 3));
        assert_eq!(m.value(a), 0.0);
        assert_eq!(m.value(b), 1.0);
        assert!(!m.zero_row(1, |_| false));
    }
}
