//! RAII admission ticket.
//!
//! A [`Slot`] is handed out by
//! [`AdmissionController::acquire`](crate::AdmissionController::acquire) and
//! returned when dropped, even if the holder returns early, errors or
//! panics.
//!
//! ```rust,ignore
//! let slot = admission.acquire().await;
//! // ... render ...
//! drop(slot); // next waiter in line is granted immediately
//! ```

use std::sync::Arc;

use crate::admission::AdmissionInner;

/// A granted admission slot.
///
/// At most `capacity` slots exist at any time. Dropping the slot releases
/// it exactly once: ownership passes straight to the oldest waiter if there
/// is one, otherwise the outstanding count goes down.
pub struct Slot {
    /// Ticket number, for log correlation.
    id: u64,

    /// `Some` until released.
    controller: Option<Arc<AdmissionInner>>,
}

impl Slot {
    pub(crate) fn new(id: u64, controller: Arc<AdmissionInner>) -> Self {
        log::trace!("🎫 Slot {} granted", id);
        Self {
            id,
            controller: Some(controller),
        }
    }

    /// Ticket number of the request holding this slot.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Release the slot now instead of at end of scope.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(controller) = self.controller.take() {
            log::trace!("🎫 Slot {} released", self.id);
            controller.release();
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("id", &self.id)
            .field("released", &self.controller.is_none())
            .finish()
    }
}
