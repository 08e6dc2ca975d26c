//! Synchronization primitives
//!
//! Queues, semaphores, mutexes and queue sets all share one control
//! block table; the kind recorded at creation decides which calls apply.

pub mod queue;
pub mod registry;

#[cfg(feature = "sem")]
pub mod sem;

#[cfg(feature = "mutex")]
pub mod mutex;

#[cfg(feature = "queue-sets")]
pub mod queue_set;

pub use queue::{Queue, QueueKind};

#[cfg(feature = "sem")]
pub use sem::Semaphore;

#[cfg(feature = "mutex")]
pub use mutex::Mutex;

#[cfg(feature = "recursive-mutex")]
pub use mutex::RecursiveMutex;

#[cfg(feature = "queue-sets")]
pub use queue_set::QueueSet;
