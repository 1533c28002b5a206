// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The global idle-transition lock and the wake-priority signal.
//!
//! Exactly one entry or exit transaction runs at a time. The lock owns the
//! [`DependencyMatrix`] so only the holder can stage or tear it down, and
//! node state can only be written with a [`Transition`] in hand.
//!
//! Exit requests outrank entry requests: an exit that finds the lock busy
//! raises the [`WakeupSignal`] before queueing, and entry transactions poll
//! that signal at their cancellation points.

use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::{Mutex, MutexGuard, Notify};
use tracing::trace;

use crate::matrix::DependencyMatrix;

/// Serializes idle transitions.
#[derive(Debug, Default)]
pub(crate) struct TransitionLock {
    matrix: Mutex<DependencyMatrix>,
}

/// Proof that the caller holds the idle-transition lock.
pub struct Transition<'a> {
    guard: MutexGuard<'a, DependencyMatrix>,
}

impl core::fmt::Debug for Transition<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transition").finish_non_exhaustive()
    }
}

impl Transition<'_> {
    /// The dependency matrix owned by the lock.
    pub(crate) fn matrix(&mut self) -> &mut DependencyMatrix {
        &mut self.guard
    }

    /// Read-only view of the matrix.
    pub fn matrix_view(&self) -> &DependencyMatrix {
        &self.guard
    }
}

impl TransitionLock {
    /// Waits for the lock at normal priority.
    pub(crate) async fn acquire(&self) -> Transition<'_> {
        Transition {
            guard: self.matrix.lock().await,
        }
    }

    /// Takes the lock at wake priority.
    ///
    /// If the lock is busy the pending wake is announced on `signal` for as
    /// long as this call is queued.
    pub(crate) async fn acquire_priority(&self, signal: &WakeupSignal) -> Transition<'_> {
        if let Ok(guard) = self.matrix.try_lock() {
            return Transition { guard };
        }
        let _pending = signal.announce();
        trace!("idle lock busy; wakeup announced");
        Transition {
            guard: self.matrix.lock().await,
        }
    }
}

/// Counter of queued wake requests plus a notifier for entry transactions.
#[derive(Debug, Default)]
pub(crate) struct WakeupSignal {
    pending: AtomicU32,
    notify: Notify,
}

/// Keeps a wake request announced until dropped.
pub(crate) struct Announcement<'a> {
    signal: &'a WakeupSignal,
}

impl Drop for Announcement<'_> {
    fn drop(&mut self) {
        self.signal.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

impl WakeupSignal {
    /// Announces a queued wake request and wakes blocked entry transactions.
    pub(crate) fn announce(&self) -> Announcement<'_> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_waiters();
        Announcement { signal: self }
    }

    /// True while at least one wake request is queued on the lock.
    pub(crate) fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0
    }

    /// Runs `fut` to completion unless a wake request is announced first.
    ///
    /// Returns `None` when the wake request won.
    pub(crate) async fn race<F: core::future::Future>(&self, fut: F) -> Option<F::Output> {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_pending() {
            return None;
        }
        tokio::select! {
            biased;
            () = &mut notified => None,
            out = fut => Some(out),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::Arc;

    #[test]
    fn announcement_is_scoped() {
        let signal = WakeupSignal::default();
        {
            let _a = signal.announce();
            let _b = signal.announce();
            assert!(signal.is_pending());
        }
        assert!(!signal.is_pending());
    }

    #[tokio::test]
    async fn race_yields_to_a_pending_wakeup() {
        let signal = WakeupSignal::default();
        let _held = signal.announce();
        assert_eq!(signal.race(async { 5 }).await, None);
    }

    #[tokio::test]
    async fn race_completes_when_quiet() {
        let signal = WakeupSignal::default();
        assert_eq!(signal.race(async { 5 }).await, Some(5));
    }

    #[tokio::test]
    async fn priority_acquire_announces_while_queued() {
        let lock = Arc::new(TransitionLock::default());
        let signal = Arc::new(WakeupSignal::default());
        let held = lock.acquire().await;

        let (l2, s2) = (Arc::clone(&lock), Arc::clone(&signal));
        let waiter = tokio::spawn(async move {
            let _tx = l2.acquire_priority(&s2).await;
        });
        while !signal.is_pending() {
            tokio::task::yield_now().await;
        }
        drop(held);
        waiter.await.unwrap();
        assert!(!signal.is_pending());
    }
}
