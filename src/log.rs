//! Kernel logging macros
//!
//! Forward to `defmt` when the `defmt` feature is on. Without it every
//! macro expands to nothing, so log arguments are never evaluated and
//! the kernel carries no formatting code.

#[cfg(feature = "defmt")]
#[doc(hidden)]
#[macro_export]
macro_rules! __klog {
    ($level:ident, $($arg:tt)*) => { defmt::$level!($($arg)*) };
}

#[cfg(not(feature = "defmt"))]
#[doc(hidden)]
#[macro_export]
macro_rules! __klog {
    ($level:ident, $($arg:tt)*) => {{}};
}

/// Debug message
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => { $crate::__klog!(debug, $($arg)*) };
}

/// Info message
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => { $crate::__klog!(info, $($arg)*) };
}

/// Warning message
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { $crate::__klog!(warn, $($arg)*) };
}

/// Error message
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => { $crate::__klog!(error, $($arg)*) };
}

/// Trace message, used on the dispatch and tick paths
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => { $crate::__klog!(trace, $($arg)*) };
}
