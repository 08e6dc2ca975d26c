//! Memory management
//!
//! The kernel heap and the statically reserved arena it runs on.

pub mod heap;

pub use heap::{Heap, HeapStats, HEAP_ALIGNMENT};

use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::CFG_TOTAL_HEAP_SIZE;

#[repr(C, align(8))]
struct Arena([u8; CFG_TOTAL_HEAP_SIZE]);

static mut HEAP_ARENA: Arena = Arena([0; CFG_TOTAL_HEAP_SIZE]);
static ARENA_TAKEN: AtomicBool = AtomicBool::new(false);

/// Hand out the built-in arena, once
pub fn take_default_arena() -> Option<&'static mut [u8]> {
    if ARENA_TAKEN.swap(true, Ordering::AcqRel) {
        return None;
    }
    // SAFETY: the swap above guarantees a single mutable borrow.
    Some(unsafe { &mut (*(&raw mut HEAP_ARENA)).0 })
}
