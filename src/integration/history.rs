//! Device state history.
//!
//! Every device reserves a contiguous range of scalar slots while binding.
//! The history keeps one block of all slots per timepoint: index 0 is the
//! point being solved, index 1 the last accepted point and so on. Accepting
//! a timepoint rotates the blocks instead of reallocating them.

use std::ops::{Index, IndexMut};

/// Rotating blocks of device state slots.
#[derive(Debug, Clone)]
pub struct StateHistory {
    blocks: Vec<Vec<f64>>,
    slots: usize,
}

impl StateHistory {
    /// Create `depth` blocks of `slots` values each.
    pub fn new(slots: usize, depth: usize) -> Self {
        Self {
            blocks: vec![vec![0.0; slots]; depth.max(2)],
            slots,
        }
    }

    /// Number of slots per block.
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Number of blocks kept.
    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    /// Drop the oldest block and make it the new current one.
    ///
    /// The new current block keeps stale values until devices overwrite it.
    pub fn rotate(&mut self) {
        self.blocks.rotate_right(1);
    }

    /// Copy the values at `slot` from block `from` to block `to`.
    pub fn copy_slot(&mut self, slot: usize, from: usize, to: usize) {
        let value = self.blocks[from][slot];
        self.blocks[to][slot] = value;
    }

    /// Fill every older block with a copy of the current one.
    pub fn fill_from_current(&mut self) {
        self.fill_from(0);
    }

    /// Fill every block older than `age` with a copy of block `age`.
    pub fn fill_from(&mut self, age: usize) {
        let (newer, older) = self.blocks.split_at_mut(age + 1);
        for block in older {
            block.copy_from_slice(&newer[age]);
        }
    }
}

impl Index<usize> for StateHistory {
    type Output = [f64];

    fn index(&self, age: usize) -> &[f64] {
        &self.blocks[age]
    }
}

impl IndexMut<usize> for StateHistory {
    fn index_mut(&mut self, age: usize) -> &mut [f64] {
        &mut self.blocks[age]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_shifts_history() {
        let mut h = StateHistory::new(2, 3);
        h[0][0] = 1.0;
        h.rotate();
        h[0][0] = 2.0;
        h.rotate();
        h[0][0] = 3.0;
        assert_eq!(h[0][0], 3.0);
        assert_eq!(h[1][0], 2.0);
        assert_eq!(h[2][0], 1.0);
        h.rotate();
        // Oldest block is reused as current
        assert_eq!(h[0][0], 1.0);
        assert_eq!(h[1][0], 3.0);
    }

    #[test]
    fn test_fill_from_current() {
        let mut h = StateHistory::new(1, 4);
        h[0][0] = 5.0;
        h.fill_from_current();
        for age in 0..h.depth() {
            assert_eq!(h[age][0], 5.0);
        }
    }
}
