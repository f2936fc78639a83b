//! Single-holder, re-entrant reservation with a FIFO wait queue.
//!
//! States are `Free` and `Held(activity, count)`. A release that drops the
//! count to zero hands the reservation straight to the oldest waiter, which
//! becomes the holder (count 1) before it is woken.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::util::lock;

use super::ActivityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationState {
    Free,
    Held { activity: ActivityId, count: u32 },
}

struct Waiter {
    activity: ActivityId,
    wake: oneshot::Sender<()>,
}

#[derive(Default)]
struct Inner {
    holder: Option<ActivityId>,
    count: u32,
    waiting: VecDeque<Waiter>,
}

impl Inner {
    /// Grant to `activity` if free or already held by it.
    fn try_grant(&mut self, activity: ActivityId) -> bool {
        match self.holder {
            None => {
                self.holder = Some(activity);
                self.count = 1;
                true
            }
            Some(holder) if holder == activity => {
                self.count += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Pass the reservation to the next live waiter, or free it.
    fn hand_off(&mut self) -> Option<ActivityId> {
        while let Some(waiter) = self.waiting.pop_front() {
            self.holder = Some(waiter.activity);
            self.count = 1;
            if waiter.wake.send(()).is_ok() {
                return Some(waiter.activity);
            }
        }
        self.holder = None;
        self.count = 0;
        None
    }
}

#[derive(Default)]
pub struct Reservation {
    inner: Mutex<Inner>,
}

impl Reservation {
    pub fn new() -> Self {
        Self::default()
    }

    fn grant_or_enqueue(&self, activity: ActivityId) -> Option<oneshot::Receiver<()>> {
        let mut inner = lock(&self.inner);
        if inner.try_grant(activity) {
            return None;
        }
        let (wake, woken) = oneshot::channel();
        inner.waiting.push_back(Waiter { activity, wake });
        debug!(
            target: "varpool::rt",
            activity = activity.get(),
            holder = inner.holder.map(ActivityId::get),
            waiting = inner.waiting.len(),
            "reservation.queued"
        );
        Some(woken)
    }

    /// Block the calling thread until `activity` holds the reservation.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`Reservation::reserve_async`] there.
    pub fn reserve(&self, activity: ActivityId) -> Result<()> {
        match self.grant_or_enqueue(activity) {
            None => Ok(()),
            Some(woken) => woken
                .blocking_recv()
                .map_err(|_| anyhow!("{} was removed from the reservation queue", activity)),
        }
    }

    /// Wait asynchronously until `activity` holds the reservation.
    ///
    /// Dropping the future before it completes gives up the place in the
    /// queue, and passes the reservation on if it was already handed over.
    pub async fn reserve_async(&self, activity: ActivityId) -> Result<()> {
        let Some(woken) = self.grant_or_enqueue(activity) else {
            return Ok(());
        };
        let mut pending = PendingGrant {
            reservation: self,
            activity,
            woken,
            settled: false,
        };
        let outcome = (&mut pending.woken).await;
        pending.settled = true;
        outcome.map_err(|_| anyhow!("{} was removed from the reservation queue", activity))
    }

    /// Undo a wait whose caller went away.
    fn abandon(&self, activity: ActivityId, woken: &mut oneshot::Receiver<()>) {
        let mut inner = lock(&self.inner);
        woken.close();
        if woken.try_recv().is_ok() && inner.holder == Some(activity) {
            inner.count -= 1;
            let next = if inner.count == 0 { inner.hand_off() } else { None };
            debug!(
                target: "varpool::rt",
                activity = activity.get(),
                next = next.map(ActivityId::get),
                "reservation.abandoned_grant"
            );
        } else {
            inner.waiting.retain(|waiter| !waiter.wake.is_closed());
        }
    }

    /// Reserve only if that needs no waiting.
    pub fn try_reserve(&self, activity: ActivityId) -> bool {
        lock(&self.inner).try_grant(activity)
    }

    pub fn release(&self, activity: ActivityId) -> Result<()> {
        let mut inner = lock(&self.inner);
        match inner.holder {
            Some(holder) if holder == activity => {}
            Some(holder) => {
                return Err(anyhow!("{} released a reservation held by {}", activity, holder));
            }
            None => return Err(anyhow!("{} released a free reservation", activity)),
        }
        inner.count -= 1;
        if inner.count == 0
            && let Some(next) = inner.hand_off()
        {
            debug!(
                target: "varpool::rt",
                from = activity.get(),
                to = next.get(),
                waiting = inner.waiting.len(),
                "reservation.handoff"
            );
        }
        Ok(())
    }

    /// Termination path: drop every hold of `activity` and remove it from the
    /// wait queue. Returns whether anything changed.
    pub fn force_release(&self, activity: ActivityId) -> bool {
        let mut inner = lock(&self.inner);
        let queued = inner.waiting.len();
        inner.waiting.retain(|waiter| waiter.activity != activity);
        let dequeued = queued - inner.waiting.len();
        let was_holder = inner.holder == Some(activity);
        let next = if was_holder { inner.hand_off() } else { None };
        if was_holder || dequeued > 0 {
            debug!(
                target: "varpool::rt",
                activity = activity.get(),
                was_holder,
                dequeued,
                next = next.map(ActivityId::get),
                "reservation.force_release"
            );
        }
        was_holder || dequeued > 0
    }

    pub fn state(&self) -> ReservationState {
        let inner = lock(&self.inner);
        match inner.holder {
            None => ReservationState::Free,
            Some(activity) => ReservationState::Held {
                activity,
                count: inner.count,
            },
        }
    }

    pub fn holder(&self) -> Option<ActivityId> {
        lock(&self.inner).holder
    }

    pub fn is_held_by(&self, activity: ActivityId) -> bool {
        self.holder() == Some(activity)
    }

    /// Number of activities waiting.
    pub fn waiting(&self) -> usize {
        lock(&self.inner).waiting.len()
    }

    /// Reserve and return a guard that releases on drop.
    pub fn access(&self, activity: ActivityId) -> Result<ReservationGuard<'_>> {
        self.reserve(activity)?;
        Ok(ReservationGuard {
            reservation: self,
            activity,
        })
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("state", &self.state())
            .field("waiting", &self.waiting())
            .finish()
    }
}

/// Receiver side of a queued `reserve_async`.
struct PendingGrant<'a> {
    reservation: &'a Reservation,
    activity: ActivityId,
    woken: oneshot::Receiver<()>,
    settled: bool,
}

impl Drop for PendingGrant<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.reservation.abandon(self.activity, &mut self.woken);
        }
    }
}

pub struct ReservationGuard<'a> {
    reservation: &'a Reservation,
    activity: ActivityId,
}

impl ReservationGuard<'_> {
    pub fn activity(&self) -> ActivityId {
        self.activity
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.reservation.release(self.activity) {
            warn!(target: "varpool::rt", error = %err, "reservation.guard_release");
        }
    }
}
