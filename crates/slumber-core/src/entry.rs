// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Idle entry transaction.
//!
//! Entry is all-or-nothing across the deactivation set: either every member
//! ends `Idle`, or every member that was touched is woken again (or marked
//! `Lost` if it will not wake) and the fabric links are restored.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::engine::Shared;
use crate::error::{IdleError, Rejection};
use crate::fabric::FabricError;
use crate::gate;
use crate::ident::{NodeId, NodeSet};
use crate::lock::Transition;
use crate::registry::{NodeRecord, RefAdjust};
use crate::state::{ChannelState, ConnectionState, IdleState};

/// What a failing entry has to undo.
#[derive(Debug, Default)]
struct EntryProgress {
    disconnected: NodeSet,
    marked: Vec<NodeId>,
    transitioned: Vec<NodeId>,
}

/// Why a node is not eligible for idle entry right now.
fn entry_blocker(record: &NodeRecord) -> Option<&'static str> {
    let fields = record.fields();
    if fields.published != IdleState::Active {
        Some("published state is not active")
    } else if fields.idle_state != IdleState::Active {
        Some("node is not active")
    } else if fields.channel != ChannelState::Connected {
        Some("control channel not connected")
    } else if !fields.idle_enabled || !record.spec.idle_capable {
        Some("idle disabled")
    } else {
        None
    }
}

impl Shared {
    /// Moves `target` and everything that depends on it into `Idle`.
    ///
    /// A target that does not meet the entry preconditions is woken
    /// instead; that is not reported as an error.
    #[instrument(skip(self), fields(node = %target))]
    pub(crate) async fn enter_idle(self: &Arc<Self>, target: NodeId) -> Result<(), IdleError> {
        let record = self.registry.record(target)?;
        self.timers.cancel(target);
        if let Some(reason) = entry_blocker(&record) {
            debug!(reason, "idle entry not possible; waking instead");
            self.wake_instead(target).await;
            return Ok(());
        }

        let mut tx = self.lock.acquire().await;
        if let Some(reason) = entry_blocker(&record) {
            drop(tx);
            debug!(reason, "node changed while waiting for the lock; waking instead");
            self.wake_instead(target).await;
            return Ok(());
        }
        self.registry
            .set_state(&tx, target, IdleState::ReadyToIdle)?;

        let mut progress = EntryProgress::default();
        let result = self.run_entry(&mut tx, target, &mut progress).await;
        if let Err(err) = &result {
            warn!(error = %err, "idle entry failed; rolling back");
            self.roll_back_entry(&tx, target, &progress).await;
        }
        tx.matrix().teardown();
        drop(tx);

        if result.is_ok() {
            info!(members = progress.transitioned.len(), "idle entry complete");
            if self.deep_idle_allowed(target) {
                self.arm_deep_idle(target);
            }
        }
        result
    }

    /// Redirects an ineligible entry to an exit. Its outcome is logged,
    /// never returned.
    async fn wake_instead(self: &Arc<Self>, target: NodeId) {
        if let Err(err) = self.exit_idle(target, false).await {
            warn!(node = %target, error = %err, "wake after refused entry failed");
        }
    }

    async fn run_entry(
        &self,
        tx: &mut Transition<'_>,
        target: NodeId,
        progress: &mut EntryProgress,
    ) -> Result<(), IdleError> {
        let topology = self.collab.topology.as_ref();
        let states = self.registry.states();
        tx.matrix()
            .build(&states, topology)
            .await
            .map_err(IdleError::DependencySetup)?;

        let set = topology
            .compute_deactivation_set(target, tx.matrix_view(), self.config.maximal_deactivation)
            .await
            .map_err(IdleError::DependencySetup)?;
        if !set.contains(target) {
            return Err(IdleError::DependencySetup(FabricError::NoDeactivationSet(
                target,
            )));
        }
        debug!(%set, "deactivation set computed");

        progress.disconnected = set.clone();
        match self.wakeup.race(topology.disconnect(&set)).await {
            None => {
                return Err(IdleError::AdmissionRejected {
                    node: target,
                    reason: Rejection::WakeupPending,
                })
            }
            Some(result) => result.map_err(IdleError::Disconnect)?,
        }
        for node in &set {
            self.registry
                .set_connection(tx, node, ConnectionState::Disconnected);
        }

        progress.marked = gate::admit(&self.registry, &self.wakeup, &set)?;

        self.collab
            .console
            .disconnect(&set)
            .await
            .map_err(IdleError::Disconnect)?;

        for node in &set {
            match self.registry.state(node) {
                Ok(IdleState::Active) => {
                    self.registry.set_state(tx, node, IdleState::ReadyToIdle)?;
                }
                Ok(IdleState::ReadyToIdle) => {}
                Ok(state) => {
                    return Err(IdleError::InvalidState {
                        node,
                        state: Some(state),
                    })
                }
                Err(_) => return Err(IdleError::InvalidState { node, state: None }),
            }
            progress.transitioned.push(node);

            self.collab
                .hardware
                .enter_idle(node)
                .await
                .map_err(|source| IdleError::Hardware { node, source })?;
            self.registry.set_state(tx, node, IdleState::Idle)?;
            self.publish(node, IdleState::Idle).await;
        }
        Ok(())
    }

    async fn roll_back_entry(
        &self,
        tx: &Transition<'_>,
        target: NodeId,
        progress: &EntryProgress,
    ) {
        for &node in &progress.transitioned {
            match self.registry.state(node) {
                Ok(IdleState::Idle | IdleState::ReadyToIdle) => {}
                _ => continue,
            }
            match self.collab.hardware.exit_idle(node).await {
                Ok(()) => {
                    if let Err(err) = self.registry.set_state(tx, node, IdleState::Active) {
                        warn!(%node, error = %err, "rollback state update rejected");
                        continue;
                    }
                    self.publish(node, IdleState::Active).await;
                }
                Err(err) => {
                    warn!(%node, error = %err, "rollback wake failed");
                    self.registry.mark_lost(tx, node);
                }
            }
        }

        if matches!(self.registry.state(target), Ok(IdleState::ReadyToIdle)) {
            if let Err(err) = self.registry.set_state(tx, target, IdleState::Active) {
                warn!(node = %target, error = %err, "could not restore target");
            }
        }

        for &node in &progress.marked {
            if matches!(self.registry.state(node), Ok(state) if !state.is_idle()) {
                if let Err(err) = self.registry.adjust_ref(node, RefAdjust::ClearMark) {
                    warn!(%node, error = %err, "could not clear idle mark");
                }
            }
        }

        let reconnect: NodeSet = progress
            .disconnected
            .iter()
            .filter(|node| matches!(self.registry.state(*node), Ok(IdleState::Active)))
            .collect();
        if reconnect.is_empty() {
            return;
        }
        match self.collab.topology.reconnect(&reconnect).await {
            Ok(()) => {
                for node in &reconnect {
                    self.registry
                        .set_connection(tx, node, ConnectionState::Connected);
                }
            }
            Err(err) => warn!(set = %reconnect, error = %err, "rollback reconnect failed"),
        }
    }
}
