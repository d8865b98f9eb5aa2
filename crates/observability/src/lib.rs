//! Tracing and logging setup shared by the binaries.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Same as [`init`], with an explicit fallback filter used when `RUST_LOG`
/// is unset.
pub fn init_with_default(directives: &str) {
    tracing::init_with_default(directives);
}

/// Tracing configuration (filters, layers, output format).
pub mod tracing;

pub use self::tracing::LogFormat;
