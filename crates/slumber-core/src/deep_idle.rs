// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Deferred Idle -> DeepIdle transitions.
//!
//! After a successful idle entry the engine arms one timer per node. When
//! the dwell elapses the timer task takes the transition lock, confirms it
//! was not cancelled in the meantime and that the node is still `Idle`, and
//! asks the sequencer for deep idle. A "not ready" answer re-arms the timer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::engine::Shared;
use crate::ident::NodeId;
use crate::state::IdleState;

#[derive(Debug)]
struct PendingTimer {
    token: CancellationToken,
    generation: u64,
}

/// Per-node cancellable deep-idle timers.
#[derive(Debug, Default)]
pub(crate) struct DeepIdleTimers {
    pending: Mutex<BTreeMap<NodeId, PendingTimer>>,
    generations: AtomicU64,
}

impl DeepIdleTimers {
    /// Registers a fresh timer for `node`, cancelling any previous one.
    fn insert(&self, node: NodeId) -> (CancellationToken, u64) {
        let token = CancellationToken::new();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let previous = self.pending.lock().insert(
            node,
            PendingTimer {
                token: token.clone(),
                generation,
            },
        );
        if let Some(old) = previous {
            old.token.cancel();
        }
        (token, generation)
    }

    /// Cancels `node`'s timer; returns `true` if one was pending.
    pub(crate) fn cancel(&self, node: NodeId) -> bool {
        let Some(timer) = self.pending.lock().remove(&node) else {
            return false;
        };
        timer.token.cancel();
        trace!(%node, "deep-idle timer cancelled");
        true
    }

    /// Cancels every pending timer.
    pub(crate) fn cancel_all(&self) {
        let drained = std::mem::take(&mut *self.pending.lock());
        for timer in drained.into_values() {
            timer.token.cancel();
        }
    }

    /// True when `node` has a pending timer.
    pub(crate) fn is_armed(&self, node: NodeId) -> bool {
        self.pending.lock().contains_key(&node)
    }

    fn finish(&self, node: NodeId, generation: u64) {
        let mut pending = self.pending.lock();
        if pending.get(&node).is_some_and(|t| t.generation == generation) {
            pending.remove(&node);
        }
    }
}

impl Shared {
    /// Schedules a deep-idle attempt for `node` after the configured dwell.
    pub(crate) fn arm_deep_idle(self: &Arc<Self>, node: NodeId) {
        let dwell = self.config.deep_idle_dwell();
        let (token, generation) = self.timers.insert(node);
        debug!(%node, dwell_ms = self.config.deep_idle_dwell_ms, "deep-idle timer armed");
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(dwell) => {
                    shared.deep_idle_attempt(node, &token, generation).await;
                }
            }
        });
    }

    /// True when `node` may enter deep idle under the current settings.
    pub(crate) fn deep_idle_allowed(&self, node: NodeId) -> bool {
        self.registry.record(node).is_ok_and(|record| {
            record.spec.deep_idle_capable
                && record.fields().deep_idle_enabled
                && self.config.stepping_allows_deep_idle(record.spec.stepping)
        })
    }

    async fn deep_idle_attempt(
        self: &Arc<Self>,
        node: NodeId,
        token: &CancellationToken,
        generation: u64,
    ) {
        let tx = self.lock.acquire().await;
        if token.is_cancelled() {
            return;
        }
        self.timers.finish(node, generation);

        match self.registry.state(node) {
            Ok(IdleState::Idle) if self.deep_idle_allowed(node) => {}
            Ok(state) => {
                debug!(%node, %state, "deep-idle attempt skipped");
                return;
            }
            Err(_) => return,
        }

        match self.collab.hardware.enter_deep_idle(node).await {
            Ok(()) => {
                if let Err(err) = self.registry.set_state(&tx, node, IdleState::DeepIdle) {
                    warn!(%node, error = %err, "deep-idle state update rejected");
                    return;
                }
                self.publish(node, IdleState::DeepIdle).await;
            }
            Err(err) if err.is_retryable() => {
                drop(tx);
                debug!(%node, error = %err, "node not ready for deep idle; re-arming");
                self.arm_deep_idle(node);
            }
            Err(err) => warn!(%node, error = %err, "deep-idle entry failed; node stays idle"),
        }
    }
}
