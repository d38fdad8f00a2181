//! Progress reporting for long-running analyses.
//!
//! [`ProgressCallback`] keeps the analysis crates independent of how
//! progress is shown; the CLI renders it with `indicatif`.

use std::sync::Arc;

/// Receives progress updates from a running analysis.
///
/// Implementations must be `Send + Sync` so one callback can be shared by
/// concurrent lookups.
pub trait ProgressCallback: Send + Sync {
    /// Sets the total units of work.
    fn set_total(&self, total: u64);

    /// Advances by `delta` units.
    fn inc(&self, delta: u64);

    /// Replaces the status message (e.g. "Analyzing area 3 of 12").
    fn set_message(&self, msg: String);

    /// Marks the work as finished with a final message.
    fn finish(&self, msg: String);
}

/// Discards all progress updates.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
