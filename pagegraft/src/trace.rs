//! Trace logging that compiles away unless the `logging` feature is enabled.

#[cfg(feature = "logging")]
pub(crate) use log::warn;

#[cfg(not(feature = "logging"))]
macro_rules! warn_stub {
    ($($arg:tt)*) => {
        // Arguments still type-check without a logger present.
        let _ = format_args!($($arg)*);
    };
}

#[cfg(not(feature = "logging"))]
pub(crate) use warn_stub as warn;
