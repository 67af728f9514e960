//! Engine runtime configuration.

use std::time::Duration;

/// Tunables for the engine runtime.
///
/// The debounce delay smooths thrash when upstream slices oscillate: a
/// slice entering `CanStart` waits out the delay before its start message
/// is posted, and a re-entered `CanStart` restarts the wait. The default
/// of zero posts immediately.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Debounce between `CanStart` and the posted start message.
    pub delay: Duration,
    /// Worker concurrency cap for the default scheduler; `None` means the
    /// machine's available parallelism.
    pub concurrency: Option<usize>,
    /// Buffer capacity of the `(state, changes)` observer stream.
    pub changes_capacity: usize,
    /// Buffer capacity of the progress observer stream.
    pub progress_capacity: usize,
}

impl EngineConfig {
    pub const DEFAULT_CAPACITY: usize = 1024;

    #[must_use]
    pub fn new() -> Self {
        EngineConfig {
            delay: Duration::ZERO,
            concurrency: None,
            changes_capacity: Self::DEFAULT_CAPACITY,
            progress_capacity: Self::DEFAULT_CAPACITY,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit);
        self
    }

    #[must_use]
    pub fn with_changes_capacity(mut self, capacity: usize) -> Self {
        self.changes_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_progress_capacity(mut self, capacity: usize) -> Self {
        self.progress_capacity = capacity.max(1);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
