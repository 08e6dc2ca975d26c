//! Kernel logging macros
//!
//! Forward to `defmt` on bare-metal targets with the `defmt` feature and
//! compile to nothing everywhere else, host tests included.

/// Debug message
#[cfg(all(feature = "defmt", target_os = "none"))]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => { defmt::debug!($($arg)*) };
}

/// Info message
#[cfg(all(feature = "defmt", target_os = "none"))]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => { defmt::info!($($arg)*) };
}

/// Error message
#[cfg(all(feature = "defmt", target_os = "none"))]
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => { defmt::error!($($arg)*) };
}

/// Trace message
#[cfg(all(feature = "defmt", target_os = "none"))]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => { defmt::trace!($($arg)*) };
}

/// Warning message
#[cfg(all(feature = "defmt", target_os = "none"))]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { defmt::warn!($($arg)*) };
}

// Without defmt the macros still expand to an expression
#[cfg(not(all(feature = "defmt", target_os = "none")))]
#[macro_export]
macro_rules! debug { ($($arg:tt)*) => {{}}; }
#[cfg(not(all(feature = "defmt", target_os = "none")))]
#[macro_export]
macro_rules! info { ($($arg:tt)*) => {{}}; }
#[cfg(not(all(feature = "defmt", target_os = "none")))]
#[macro_export]
macro_rules! error { ($($arg:tt)*) => {{}}; }
#[cfg(not(all(feature = "defmt", target_os = "none")))]
#[macro_export]
macro_rules! trace { ($($arg:tt)*) => {{}}; }
#[cfg(not(all(feature = "defmt", target_os = "none")))]
#[macro_export]
macro_rules! warn { ($($arg:tt)*) => {{}}; }
