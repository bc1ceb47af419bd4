//! Admission statistics for monitoring and health checks.
//!
//! [`AdmissionStats`] is a snapshot of the admission controller: how many
//! slots are held, how many requests wait in the queue, and the configured
//! capacity.
//!
//! # Example
//!
//! ```rust,ignore
//! let stats = service.admission_stats();
//! println!("{}", stats); // AdmissionStats { active: 3/5, queued: 0 }
//! ```

/// Snapshot of admission controller state.
///
/// Values may be stale as soon as they are returned; use them for
/// monitoring, not for control decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AdmissionStats {
    /// Configured number of slots.
    pub capacity: usize,

    /// Slots currently held by render sessions.
    pub active: usize,

    /// Requests suspended in the FIFO wait queue.
    pub queued: usize,
}

impl AdmissionStats {
    /// Slots that could be granted right now without waiting.
    #[inline]
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.active)
    }

    /// `true` when a new request would have to queue.
    #[inline]
    pub fn is_saturated(&self) -> bool {
        self.active >= self.capacity
    }

    /// `true` when nothing is running or waiting.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.active == 0 && self.queued == 0
    }
}

impl std::fmt::Display for AdmissionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AdmissionStats {{ active: {}/{}, queued: {} }}",
            self.active, self.capacity, self.queued
        )
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
