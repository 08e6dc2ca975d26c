//! Kernel core
//!
//! The kernel object, scheduler, tasks, time and the shared list and
//! critical-section plumbing they are built on.

pub mod config;
pub mod critical;
pub mod error;
pub mod hooks;
pub mod kernel;
pub mod prio;
pub mod types;
pub mod task;
pub mod sched;
pub mod time;
pub mod idle;
pub mod cs_cell;
pub(crate) mod list;
