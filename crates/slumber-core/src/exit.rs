// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Idle exit transaction.
//!
//! Exit wakes a node together with every sleeping node it needs. It runs at
//! wake priority (see [`crate::lock`]) and never rolls back: a member that
//! fails to wake is marked `Lost` and left out, the rest carry on.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::engine::Shared;
use crate::error::IdleError;
use crate::ident::{NodeId, NodeSet};
use crate::lock::Transition;
use crate::registry::RefAdjust;
use crate::state::{ConnectionState, IdleState};

impl Shared {
    /// Wakes `target` and its activation set.
    ///
    /// With `acquire_ref` the caller also takes a reference on `target` once
    /// it is active.
    #[instrument(skip(self), fields(node = %target))]
    pub(crate) async fn exit_idle(
        self: &Arc<Self>,
        target: NodeId,
        acquire_ref: bool,
    ) -> Result<(), IdleError> {
        self.registry.record(target)?;
        self.timers.cancel(target);
        let tx = self.lock.acquire_priority(&self.wakeup).await;
        self.run_exit(&tx, target, acquire_ref).await
    }

    async fn run_exit(
        &self,
        tx: &Transition<'_>,
        target: NodeId,
        acquire_ref: bool,
    ) -> Result<(), IdleError> {
        let states = self.registry.states();
        let mut set = self
            .collab
            .topology
            .active_set(target, &states)
            .await
            .map_err(IdleError::ActiveSet)?;
        set.insert(target);

        for node in &set {
            match self.registry.state(node) {
                Ok(IdleState::Lost) => {
                    return Err(IdleError::InvalidState {
                        node,
                        state: Some(IdleState::Lost),
                    })
                }
                Ok(_) => {}
                Err(_) => return Err(IdleError::InvalidState { node, state: None }),
            }
        }
        debug!(%set, "activation set computed");

        let mut woken = NodeSet::new();
        for node in &set {
            let record = self.registry.record(node)?;
            let fields = record.fields();
            let step = match fields.idle_state {
                IdleState::Active => {
                    if fields.connection == ConnectionState::Disconnected {
                        woken.insert(node);
                    }
                    continue;
                }
                IdleState::Idle | IdleState::ReadyToIdle => {
                    self.collab.hardware.exit_idle(node).await
                }
                IdleState::DeepIdle => self.collab.hardware.exit_deep_idle(node).await,
                IdleState::Lost => {
                    return Err(IdleError::InvalidState {
                        node,
                        state: Some(IdleState::Lost),
                    })
                }
            };
            match step {
                Ok(()) => {
                    self.registry.set_state(tx, node, IdleState::Active)?;
                    woken.insert(node);
                }
                Err(err) => {
                    warn!(%node, error = %err, "wake failed");
                    self.registry.mark_lost(tx, node);
                }
            }
        }

        if !woken.is_empty() {
            for node in &woken {
                self.timers.cancel(node);
                self.publish(node, IdleState::Active).await;
            }
            match self.collab.topology.reconnect(&woken).await {
                Ok(()) => {
                    for node in &woken {
                        self.registry
                            .set_connection(tx, node, ConnectionState::Connected);
                    }
                }
                Err(err) => warn!(set = %woken, error = %err, "reconnect failed"),
            }
            info!(%woken, "idle exit complete");
        }

        // Awake members are no longer claimed; the target's claim becomes
        // the caller's reference instead.
        for node in &set {
            if acquire_ref && node == target {
                continue;
            }
            if !matches!(self.registry.state(node), Ok(IdleState::Active)) {
                continue;
            }
            if let Err(err) = self.registry.adjust_ref(node, RefAdjust::ClearMark) {
                warn!(%node, error = %err, "could not clear idle mark");
            }
        }
        if acquire_ref && matches!(self.registry.state(target), Ok(IdleState::Active)) {
            self.registry.adjust_ref(target, RefAdjust::TakeAfterWake)?;
        }
        Ok(())
    }
}
