//! Priority bitmap for O(1) highest-ready lookup
//!
//! One bit per priority band; bit `p` is set while band `p` has a ready
//! task. Higher numbers are more urgent, so the highest ready priority is
//! `31 - CLZ(bitmap)`, a single instruction on Cortex-M3 and up.

use crate::types::Priority;

/// Priority bitmap (32 levels)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityBitmap {
    bits: u32,
}

impl PriorityBitmap {
    pub const fn new() -> Self {
        PriorityBitmap { bits: 0 }
    }

    /// Mark a band non-empty
    #[inline]
    pub fn insert(&mut self, prio: Priority) {
        debug_assert!(prio < 32);
        self.bits |= 1 << prio;
    }

    /// Mark a band empty
    #[inline]
    pub fn remove(&mut self, prio: Priority) {
        debug_assert!(prio < 32);
        self.bits &= !(1 << prio);
    }

    /// Highest non-empty band
    #[inline]
    pub fn highest(&self) -> Option<Priority> {
        if self.bits == 0 {
            None
        } else {
            Some(31 - Self::clz(self.bits))
        }
    }

    #[inline]
    pub fn is_set(&self, prio: Priority) -> bool {
        self.bits & (1 << prio) != 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Raw word, for diagnostics
    #[inline]
    pub fn bits(&self) -> u32 {
        self.bits
    }

    #[inline(always)]
    fn clz(value: u32) -> Priority {
        value.leading_zeros() as Priority
    }
}

impl Default for PriorityBitmap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table() {
        let table = PriorityBitmap::new();
        assert!(table.is_empty());
        assert_eq!(table.highest(), None);
    }

    #[test]
    fn test_insert_remove() {
        let mut table = PriorityBitmap::new();

        table.insert(5);
        assert!(table.is_set(5));
        assert!(!table.is_set(4));
        assert_eq!(table.highest(), Some(5));

        table.insert(3);
        assert_eq!(table.highest(), Some(5));

        table.remove(5);
        assert_eq!(table.highest(), Some(3));

        table.remove(3);
        assert!(table.is_empty());
    }

    #[test]
    fn test_boundary_priorities() {
        let mut table = PriorityBitmap::new();

        table.insert(0);
        assert_eq!(table.highest(), Some(0));

        table.insert(31);
        assert_eq!(table.highest(), Some(31));
        assert_eq!(table.bits(), 0x8000_0001);

        table.remove(31);
        assert_eq!(table.highest(), Some(0));
    }
}
