//! Tracing utilities for adapter-call and cache observability.
//!
//! Enable the `tracing` feature to emit events via the `tracing` crate.
//! These macros no-op when the feature is disabled, avoiding `#[cfg]`
//! boilerplate at every call site.

/// Emit a debug-level tracing event for a pipeline call.
///
/// ```ignore
/// trestle_trace_call!(mode, relation.source_name());
/// ```
#[macro_export]
macro_rules! trestle_trace_call {
    ($mode:expr, $source:expr) => {
        #[cfg(feature = "tracing")]
        tracing::debug!(mode = %$mode, source = %$source, "trestle.adapter.call");
    };
}

/// Emit a debug-level tracing event for cache activity (hit, miss).
///
/// ```ignore
/// trestle_trace_cache!("hit", relation.source_name());
/// ```
#[macro_export]
macro_rules! trestle_trace_cache {
    ($event:literal, $source:expr) => {
        #[cfg(feature = "tracing")]
        tracing::debug!(event = $event, source = %$source, "trestle.cache");
    };
}
