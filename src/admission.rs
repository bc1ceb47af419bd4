//! Bounded admission with a FIFO wait queue.
//!
//! [`AdmissionController`] limits how many render sessions run against the
//! shared renderer at once. Requests over capacity are suspended and
//! resumed strictly in arrival order.
//!
//! # Architecture
//!
//! ```text
//! AdmissionController
//!   └─ AdmissionInner (shared with every Slot)
//!       └─ Mutex<AdmissionState>
//!           ├─ active: usize                (slots held)
//!           └─ queue: VecDeque<Waiter>      (ticket + oneshot grant)
//! ```
//!
//! # Critical Invariants
//!
//! 1. **Bound**: `active <= capacity` at all times.
//! 2. **Hand-over**: releasing a slot while waiters exist transfers it to
//!    the head waiter under the same lock; the count never dips, so no
//!    other request can grab a "free" slot in between.
//! 3. **No leak**: an abandoned waiter removes its ticket; if a grant had
//!    already reached it, the grant is passed on to the next waiter.
//!
//! # Example
//!
//! ```rust
//! use html2pdf_gate::AdmissionController;
//!
//! # #[tokio::main] async fn main() {
//! let admission = AdmissionController::new(2);
//!
//! let first = admission.acquire().await;
//! let second = admission.acquire().await;
//! assert!(admission.try_acquire().is_none());
//!
//! drop(first);
//! assert!(admission.try_acquire().is_some());
//! # drop(second);
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{oneshot, watch};

use crate::slot::Slot;
use crate::stats::AdmissionStats;

/// A suspended request waiting for a slot.
struct Waiter {
    ticket: u64,
    grant: oneshot::Sender<()>,
}

struct AdmissionState {
    active: usize,
    queue: VecDeque<Waiter>,
}

/// Shared admission state, referenced by the controller and every slot.
pub(crate) struct AdmissionInner {
    capacity: usize,
    state: Mutex<AdmissionState>,
    next_ticket: AtomicU64,
    stats_tx: watch::Sender<AdmissionStats>,
}

impl AdmissionInner {
    /// Lock the state, recovering from poisoning.
    ///
    /// A panic elsewhere must never stop slots from being released.
    fn lock(&self) -> MutexGuard<'_, AdmissionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self, state: &AdmissionState) -> AdmissionStats {
        AdmissionStats {
            capacity: self.capacity,
            active: state.active,
            queued: state.queue.len(),
        }
    }

    fn emit(&self, state: &AdmissionState) {
        let stats = self.snapshot(state);
        log::debug!(
            "🚦 Admission: active={}/{}, queued={}",
            stats.active,
            stats.capacity,
            stats.queued
        );
        self.stats_tx.send_replace(stats);
    }

    /// Give up one held slot.
    ///
    /// Must be called with the lock held. The slot goes to the oldest
    /// waiter that can still receive it; only when none remains does the
    /// active count drop.
    fn hand_over(&self, state: &mut AdmissionState) {
        while let Some(waiter) = state.queue.pop_front() {
            if waiter.grant.send(()).is_ok() {
                log::debug!("🎫 Slot handed over to ticket {}", waiter.ticket);
                self.emit(state);
                return;
            }
            log::trace!("🎫 Ticket {} no longer listening, skipping", waiter.ticket);
        }

        state.active = state.active.saturating_sub(1);
        self.emit(state);
    }

    /// Release path used by [`Slot`].
    pub(crate) fn release(&self) {
        let mut state = self.lock();
        self.hand_over(&mut state);
    }
}

/// Bounds concurrent render work and queues the excess in arrival order.
///
/// Cloning is cheap and every clone shares the same slots.
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<AdmissionInner>,
}

impl AdmissionController {
    /// Create a controller granting at most `capacity` slots.
    ///
    /// A capacity of 0 is bumped to 1; use
    /// [`RenderConfigBuilder`](crate::RenderConfigBuilder) to reject it
    /// up front.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        log::info!("🚦 Initializing admission controller with capacity {}", capacity);

        let (stats_tx, _) = watch::channel(AdmissionStats {
            capacity,
            active: 0,
            queued: 0,
        });

        Self {
            inner: Arc::new(AdmissionInner {
                capacity,
                state: Mutex::new(AdmissionState {
                    active: 0,
                    queue: VecDeque::new(),
                }),
                next_ticket: AtomicU64::new(1),
                stats_tx,
            }),
        }
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Acquire a slot, suspending in FIFO order while none is free.
    ///
    /// This never fails. Callers wanting a deadline wrap it in
    /// [`tokio::time::timeout`]; dropping the future removes the request
    /// from the queue without losing a slot.
    pub async fn acquire(&self) -> Slot {
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);

        let grant = {
            let mut state = self.inner.lock();

            if state.active < self.inner.capacity && state.queue.is_empty() {
                state.active += 1;
                self.inner.emit(&state);
                return Slot::new(ticket, Arc::clone(&self.inner));
            }

            let (tx, rx) = oneshot::channel();
            state.queue.push_back(Waiter { ticket, grant: tx });
            log::debug!(
                "⏳ Ticket {} queued at position {}",
                ticket,
                state.queue.len()
            );
            self.inner.emit(&state);
            rx
        };

        WaitTicket {
            ticket,
            inner: Arc::clone(&self.inner),
            grant,
            settled: false,
        }
        .granted()
        .await
    }

    /// Acquire a slot only if one is free right now and nobody is queued.
    pub fn try_acquire(&self) -> Option<Slot> {
        let mut state = self.inner.lock();
        if state.active < self.inner.capacity && state.queue.is_empty() {
            state.active += 1;
            let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
            self.inner.emit(&state);
            Some(Slot::new(ticket, Arc::clone(&self.inner)))
        } else {
            None
        }
    }

    /// Snapshot of active and queued counts.
    pub fn stats(&self) -> AdmissionStats {
        let state = self.inner.lock();
        self.inner.snapshot(&state)
    }

    /// Watch admission counts as they change.
    pub fn subscribe(&self) -> watch::Receiver<AdmissionStats> {
        self.inner.stats_tx.subscribe()
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("stats", &self.stats())
            .finish()
    }
}

/// A queued request's continuation.
///
/// Dropping it before it turns into a [`Slot`] dequeues the ticket, or
/// forwards a grant that already arrived.
struct WaitTicket {
    ticket: u64,
    inner: Arc<AdmissionInner>,
    grant: oneshot::Receiver<()>,
    settled: bool,
}

impl WaitTicket {
    async fn granted(mut self) -> Slot {
        loop {
            match (&mut self.grant).await {
                Ok(()) => {
                    self.settled = true;
                    return Slot::new(self.ticket, Arc::clone(&self.inner));
                }
                Err(_) => {
                    // The sender vanished without granting; take our place
                    // back at the head of the line.
                    log::warn!("⚠️ Ticket {} lost its grant channel, re-queueing", self.ticket);
                    let (tx, rx) = oneshot::channel();
                    let mut state = self.inner.lock();
                    state.queue.push_front(Waiter {
                        ticket: self.ticket,
                        grant: tx,
                    });
                    self.grant = rx;
                }
            }
        }
    }
}

impl Drop for WaitTicket {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let mut state = self.inner.lock();
        if let Some(pos) = state.queue.iter().position(|w| w.ticket == self.ticket) {
            state.queue.remove(pos);
            log::debug!("🚪 Ticket {} abandoned while queued", self.ticket);
            self.inner.emit(&state);
        } else if self.grant.try_recv().is_ok() {
            log::debug!(
                "🚪 Ticket {} abandoned after being granted, passing the slot on",
                self.ticket
            );
            self.inner.hand_over(&mut state);
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_grants_up_to_capacity() {
        let admission = AdmissionController::new(2);

        let mut first = task::spawn(admission.acquire());
        let _a = assert_ready!(first.poll());
        let mut second = task::spawn(admission.acquire());
        let _b = assert_ready!(second.poll());

        let mut third = task::spawn(admission.acquire());
        assert_pending!(third.poll());

        let stats = admission.stats();
        assert_eq!(stats.active, 2);
        assert_eq!(stats.queued, 1);
    }

    #[test]
    fn test_release_hands_slot_to_waiter() {
        let admission = AdmissionController::new(1);
        let held = admission.try_acquire().expect("first slot is free");

        let mut waiter = task::spawn(admission.acquire());
        assert_pending!(waiter.poll());

        drop(held);
        assert!(waiter.is_woken());
        // The count never dropped: the slot moved straight to the waiter.
        assert_eq!(admission.stats().active, 1);
        assert!(admission.try_acquire().is_none());

        let slot = assert_ready!(waiter.poll());
        drop(slot);
        assert_eq!(admission.stats().active, 0);
    }

    #[test]
    fn test_fifo_order_among_waiters() {
        let admission = AdmissionController::new(1);
        let held = admission.try_acquire().unwrap();

        let mut waiters: Vec<_> = (0..4).map(|_| task::spawn(admission.acquire())).collect();
        for waiter in waiters.iter_mut() {
            assert_pending!(waiter.poll());
        }
        assert_eq!(admission.stats().queued, 4);

        drop(held);
        for i in 0..4 {
            // Only the head of the queue may be ready.
            for later in waiters.iter_mut().skip(i + 1) {
                assert_pending!(later.poll());
            }
            let slot = assert_ready!(waiters[i].poll());
            drop(slot);
        }
        assert!(admission.stats().is_idle());
    }

    #[test]
    fn test_abandoned_waiter_is_dequeued() {
        let admission = AdmissionController::new(1);
        let held = admission.try_acquire().unwrap();

        let mut waiter = task::spawn(admission.acquire());
        assert_pending!(waiter.poll());
        assert_eq!(admission.stats().queued, 1);

        drop(waiter);
        assert_eq!(admission.stats().queued, 0);

        drop(held);
        assert_eq!(admission.stats().active, 0);
    }

    #[test]
    fn test_abandoned_grant_is_forwarded() {
        let admission = AdmissionController::new(1);
        let held = admission.try_acquire().unwrap();

        let mut first = task::spawn(admission.acquire());
        let mut second = task::spawn(admission.acquire());
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        // Grant reaches `first`, which is dropped before it polls again.
        drop(held);
        drop(first);

        let slot = assert_ready!(second.poll());
        assert_eq!(admission.stats().active, 1);
        drop(slot);
        assert_eq!(admission.stats().active, 0);
    }

    #[test]
    fn test_try_acquire_respects_queue() {
        let admission = AdmissionController::new(1);
        let held = admission.try_acquire().unwrap();
        assert!(admission.try_acquire().is_none());

        held.release();
        assert!(admission.try_acquire().is_some());
    }

    #[test]
    fn test_zero_capacity_is_bumped() {
        assert_eq!(AdmissionController::new(0).capacity(), 1);
    }

    #[test]
    fn test_subscribe_sees_counts() {
        let admission = AdmissionController::new(2);
        let rx = admission.subscribe();

        let slot = admission.try_acquire().unwrap();
        assert_eq!(rx.borrow().active, 1);

        drop(slot);
        assert_eq!(rx.borrow().active, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_never_exceeds_capacity() {
        let admission = AdmissionController::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..40 {
            let admission = admission.clone();
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            tasks.spawn(async move {
                let _slot = admission.acquire().await;
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            });
        }

        while let Some(result) = tasks.join_next().await {
            assert!(result.is_ok(), "task should not panic");
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(admission.stats().is_idle());
    }
}
