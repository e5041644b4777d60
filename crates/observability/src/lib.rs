//! Tracing and logging (shared setup).

/// Initialize process-wide logging from explicit settings.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(settings: &LogSettings) {
    tracing::init(settings);
}

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use crate::tracing::{LogFormat, LogSettings, ParseLogFormatError};
