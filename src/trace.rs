//! Tracing utilities for decode-loop instrumentation
//!
//! When the `tracing` feature is enabled, the beam and greedy search loops
//! emit one span per utterance and events at finished-set transitions.
//! Without the feature, the macros compile to no-ops.
//!
//! # Usage
//!
//! ```rust,ignore
//! fn decode_one(&self) {
//!     let _span = trace_enter!("beam_decode");
//!     // ... step loop
//!     trace_event!(steps = 12, finished = 4, "utterance done");
//! }
//! ```

/// Create a tracing span (no-op when the tracing feature is disabled)
#[macro_export]
#[cfg(feature = "tracing")]
macro_rules! trace_span {
    ($name:expr) => {
        tracing::span!(tracing::Level::DEBUG, $name)
    };
    ($name:expr, $($field:tt)*) => {
        tracing::span!(tracing::Level::DEBUG, $name, $($field)*)
    };
}

/// Create a tracing span (no-op when the tracing feature is disabled)
#[macro_export]
#[cfg(not(feature = "tracing"))]
macro_rules! trace_span {
    ($name:expr) => {
        ()
    };
    ($name:expr, $($field:tt)*) => {
        ()
    };
}

/// Placeholder for span guard when tracing is disabled
#[cfg(not(feature = "tracing"))]
pub struct NoopSpanGuard;

/// Enter a tracing span (no-op when the tracing feature is disabled)
#[macro_export]
#[cfg(feature = "tracing")]
macro_rules! trace_enter {
    ($name:expr) => {
        tracing::span!(tracing::Level::DEBUG, $name).entered()
    };
}

/// Enter a tracing span (no-op when the tracing feature is disabled)
#[macro_export]
#[cfg(not(feature = "tracing"))]
macro_rules! trace_enter {
    ($name:expr) => {
        $crate::trace::NoopSpanGuard
    };
}

/// Log a tracing event (no-op when the tracing feature is disabled)
#[macro_export]
#[cfg(feature = "tracing")]
macro_rules! trace_event {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

/// Log a tracing event (no-op when the tracing feature is disabled)
#[macro_export]
#[cfg(not(feature = "tracing"))]
macro_rules! trace_event {
    ($($arg:tt)*) => {};
}

// Re-export macros at module level
pub use trace_enter;
pub use trace_event;
pub use trace_span;
