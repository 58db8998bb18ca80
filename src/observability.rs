//! Crate-internal observability macros.
//!
//! Every level macro funnels into `log_emit!`, which picks the backend:
//! 1) `tracing` feature => `tracing::*` events
//! 2) `logging` feature => `log::*` records
//! 3) neither enabled => no-op (format args are still type-checked)

macro_rules! log_emit {
    ($level:ident, $($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        { tracing::$level!($($arg)*); }

        #[cfg(all(not(feature = "tracing"), feature = "logging"))]
        { log::$level!($($arg)*); }

        #[cfg(all(not(feature = "tracing"), not(feature = "logging")))]
        { let _ = format_args!($($arg)*); }
    }};
}

#[allow(unused_macros)]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::observability::log_emit!(debug, $($arg)*) };
}

#[allow(unused_macros)]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::observability::log_emit!(info, $($arg)*) };
}

#[allow(unused_macros)]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::observability::log_emit!(warn, $($arg)*) };
}

#[allow(unused_macros)]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::observability::log_emit!(error, $($arg)*) };
}

pub(crate) use log_emit;

#[allow(unused_imports)]
pub(crate) use {log_debug, log_error, log_info, log_warn};
