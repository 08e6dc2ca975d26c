//! Kernel heap
//!
//! First-fit allocator over a single arena. Free blocks form a singly
//! linked list sorted by address so a freed block merges with both
//! neighbours. Every block starts with a header holding its size; the top
//! bit of the size marks the block as allocated.

use core::mem::size_of;
use core::ptr::{self, NonNull};

use crate::error::{KernelError, KernelResult};

/// Allocation alignment
pub const HEAP_ALIGNMENT: usize = 8;
const ALIGN_MASK: usize = HEAP_ALIGNMENT - 1;

const ALLOCATED_BIT: usize = 1 << (usize::BITS - 1);

#[repr(C)]
struct BlockHeader {
    next: *mut BlockHeader,
    size: usize,
}

const HEADER_SIZE: usize = (size_of::<BlockHeader>() + ALIGN_MASK) & !ALIGN_MASK;

/// Smallest remainder worth splitting off
const MIN_BLOCK_SIZE: usize = HEADER_SIZE * 2;

#[inline(always)]
const fn align_up(n: usize) -> Option<usize> {
    match n.checked_add(ALIGN_MASK) {
        Some(v) => Some(v & !ALIGN_MASK),
        None => None,
    }
}

/// Allocator statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub available_bytes: usize,
    pub largest_free_block: usize,
    pub smallest_free_block: usize,
    pub free_blocks: usize,
    pub minimum_ever_free: usize,
    pub successful_allocations: usize,
    pub successful_frees: usize,
}

/// Bounded heap arena
pub struct Heap {
    base: *mut u8,
    len: usize,
    free: *mut BlockHeader,
    free_bytes: usize,
    min_free: usize,
    allocs: usize,
    frees: usize,
}

// The arena is only touched inside kernel critical sections.
unsafe impl Send for Heap {}

impl Heap {
    /// A heap without an arena; every allocation fails
    pub const fn empty() -> Self {
        Heap {
            base: ptr::null_mut(),
            len: 0,
            free: ptr::null_mut(),
            free_bytes: 0,
            min_free: 0,
            allocs: 0,
            frees: 0,
        }
    }

    /// Take ownership of `region` as the arena
    pub fn new(region: &'static mut [u8]) -> Self {
        let mut heap = Self::empty();
        let start = region.as_mut_ptr() as usize;
        let Some(aligned) = align_up(start) else {
            return heap;
        };
        let skew = aligned - start;
        if region.len() < skew + MIN_BLOCK_SIZE {
            return heap;
        }
        let len = (region.len() - skew) & !ALIGN_MASK;

        heap.base = aligned as *mut u8;
        heap.len = len;
        let first = heap.base as *mut BlockHeader;
        // SAFETY: `first` is aligned and the arena holds at least one header.
        unsafe {
            (*first).next = ptr::null_mut();
            (*first).size = len;
        }
        heap.free = first;
        heap.free_bytes = len;
        heap.min_free = len;
        heap
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        !self.base.is_null()
    }

    /// Arena size after alignment
    #[inline]
    pub fn capacity(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn free_bytes(&self) -> usize {
        self.free_bytes
    }

    #[inline]
    pub fn minimum_ever_free(&self) -> usize {
        self.min_free
    }

    /// Bytes handed out, headers and padding included
    #[inline]
    pub fn used_bytes(&self) -> usize {
        self.len - self.free_bytes
    }

    /// Reset the low-water mark to the current free size
    pub fn reset_minimum_ever_free(&mut self) {
        self.min_free = self.free_bytes;
    }

    /// Allocate `size` bytes aligned to [`HEAP_ALIGNMENT`]
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let wanted = align_up(size.checked_add(HEADER_SIZE)?)?;
        if wanted & ALLOCATED_BIT != 0 || wanted > self.free_bytes {
            return None;
        }

        let mut prev: *mut BlockHeader = ptr::null_mut();
        let mut block = self.free;
        // SAFETY: every pointer on the free list is a header inside the arena.
        unsafe {
            while !block.is_null() && (*block).size < wanted {
                prev = block;
                block = (*block).next;
            }
            if block.is_null() {
                return None;
            }

            let mut next = (*block).next;
            if (*block).size - wanted > MIN_BLOCK_SIZE {
                let rest = (block as *mut u8).add(wanted) as *mut BlockHeader;
                (*rest).size = (*block).size - wanted;
                (*rest).next = next;
                (*block).size = wanted;
                next = rest;
            }
            if prev.is_null() {
                self.free = next;
            } else {
                (*prev).next = next;
            }

            self.free_bytes -= (*block).size;
            self.min_free = self.min_free.min(self.free_bytes);
            (*block).size |= ALLOCATED_BIT;
            (*block).next = ptr::null_mut();
            self.allocs += 1;

            NonNull::new((block as *mut u8).add(HEADER_SIZE))
        }
    }

    /// Return a block to the arena
    ///
    /// # Safety
    /// `ptr` must come from [`Heap::allocate`] on this heap and must not be
    /// used afterwards.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) -> KernelResult<()> {
        let addr = ptr.as_ptr() as usize;
        let base = self.base as usize;
        if self.base.is_null() || addr < base + HEADER_SIZE || addr >= base + self.len {
            return Err(KernelError::InvalidArgument);
        }

        let block = unsafe { ptr.as_ptr().sub(HEADER_SIZE) } as *mut BlockHeader;
        // SAFETY: the address is inside the arena; the flag check rejects
        // pointers that were never handed out or were already freed.
        unsafe {
            if (*block).size & ALLOCATED_BIT == 0 || !(*block).next.is_null() {
                return Err(KernelError::InvalidArgument);
            }
            (*block).size &= !ALLOCATED_BIT;
            self.free_bytes += (*block).size;
            self.insert_free(block);
        }
        self.frees += 1;
        Ok(())
    }

    /// Link `block` into the address-ordered free list, merging neighbours
    unsafe fn insert_free(&mut self, block: *mut BlockHeader) {
        unsafe {
            let mut prev: *mut BlockHeader = ptr::null_mut();
            let mut next = self.free;
            while !next.is_null() && next < block {
                prev = next;
                next = (*next).next;
            }

            if !next.is_null() && (block as *mut u8).add((*block).size) == next as *mut u8 {
                (*block).size += (*next).size;
                (*block).next = (*next).next;
            } else {
                (*block).next = next;
            }

            if !prev.is_null() {
                if (prev as *mut u8).add((*prev).size) == block as *mut u8 {
                    (*prev).size += (*block).size;
                    (*prev).next = (*block).next;
                } else {
                    (*prev).next = block;
                }
            } else {
                self.free = block;
            }
        }
    }

    /// Walk the free list and report statistics
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            available_bytes: self.free_bytes,
            minimum_ever_free: self.min_free,
            successful_allocations: self.allocs,
            successful_frees: self.frees,
            ..HeapStats::default()
        };
        let mut block = self.free;
        // SAFETY: free-list pointers stay inside the arena.
        unsafe {
            while !block.is_null() {
                let size = (*block).size;
                stats.free_blocks += 1;
                stats.largest_free_block = stats.largest_free_block.max(size);
                if stats.smallest_free_block == 0 || size < stats.smallest_free_block {
                    stats.smallest_free_block = size;
                }
                block = (*block).next;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::boxed::Box;
    use std::vec;
    use std::vec::Vec;

    fn arena(bytes: usize) -> &'static mut [u8] {
        Box::leak(vec![0u8; bytes].into_boxed_slice())
    }

    #[test]
    fn empty_heap_refuses() {
        let mut heap = Heap::empty();
        assert!(!heap.is_initialized());
        assert!(heap.allocate(8).is_none());
    }

    #[test]
    fn allocations_are_aligned_and_accounted() {
        let mut heap = Heap::new(arena(4096));
        let start = heap.free_bytes();
        let a = heap.allocate(1).unwrap();
        let b = heap.allocate(13).unwrap();
        assert_eq!(a.as_ptr() as usize % HEAP_ALIGNMENT, 0);
        assert_eq!(b.as_ptr() as usize % HEAP_ALIGNMENT, 0);
        assert!(heap.free_bytes() < start);
        assert_eq!(heap.stats().successful_allocations, 2);
        unsafe {
            heap.free(a).unwrap();
            heap.free(b).unwrap();
        }
        assert_eq!(heap.free_bytes(), start);
        assert_eq!(heap.stats().free_blocks, 1);
    }

    #[test]
    fn frees_coalesce_in_any_order() {
        let mut heap = Heap::new(arena(8192));
        let start = heap.free_bytes();
        let blocks: Vec<_> = (0..6).map(|i| heap.allocate(64 + i * 8).unwrap()).collect();
        for &i in &[3usize, 0, 5, 1, 4, 2] {
            unsafe { heap.free(blocks[i]).unwrap() };
        }
        let stats = heap.stats();
        assert_eq!(stats.available_bytes, start);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.largest_free_block, start);
        assert!(stats.minimum_ever_free < start);
    }

    #[test]
    fn double_free_is_rejected() {
        let mut heap = Heap::new(arena(1024));
        let a = heap.allocate(32).unwrap();
        unsafe {
            assert_eq!(heap.free(a), Ok(()));
            assert_eq!(heap.free(a), Err(KernelError::InvalidArgument));
        }
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut heap = Heap::new(arena(512));
        assert!(heap.allocate(4096).is_none());
        let mut n = 0;
        while heap.allocate(32).is_some() {
            n += 1;
        }
        assert!(n > 0);
        assert!(heap.free_bytes() < 32 + HEADER_SIZE + HEAP_ALIGNMENT);
    }

    #[test]
    fn first_fit_reuses_hole() {
        let mut heap = Heap::new(arena(2048));
        let a = heap.allocate(128).unwrap();
        let _b = heap.allocate(128).unwrap();
        unsafe { heap.free(a).unwrap() };
        let c = heap.allocate(64).unwrap();
        assert_eq!(c, a);
    }
}
