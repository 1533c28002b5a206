// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The engine handle: node lifecycle, reference API and transaction entry
//! points.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::{EngineConfig, NodeSpec};
use crate::deep_idle::DeepIdleTimers;
use crate::error::IdleError;
use crate::fabric::Collaborators;
use crate::ident::{NodeId, NodeSet};
use crate::lock::{TransitionLock, WakeupSignal};
use crate::registry::{NodeRegistry, NodeSnapshot, RefAdjust};
use crate::state::{Attachment, ChannelState, ConnectionState, IdleState};

/// State shared by every clone of an [`IdleEngine`] and its timer tasks.
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) registry: NodeRegistry,
    pub(crate) lock: TransitionLock,
    pub(crate) wakeup: WakeupSignal,
    pub(crate) timers: DeepIdleTimers,
    pub(crate) collab: Collaborators,
}

impl Shared {
    /// Best-effort push of `state` to the state register.
    pub(crate) async fn publish(&self, node: NodeId, state: IdleState) {
        match self.collab.register.publish(node, state).await {
            Ok(()) => {
                if let Ok(record) = self.registry.record(node) {
                    record.update(|f| f.published = state);
                }
            }
            Err(err) => warn!(%node, %state, error = %err, "state register update failed"),
        }
    }
}

/// Transactional idle-state engine.
///
/// Cheap to clone; every clone drives the same nodes. Must be used from
/// within a Tokio runtime because idle entry spawns deep-idle timers.
#[derive(Clone)]
pub struct IdleEngine {
    shared: Arc<Shared>,
}

impl core::fmt::Debug for IdleEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdleEngine")
            .field("config", &self.shared.config)
            .field("nodes", &self.shared.registry.ids())
            .finish_non_exhaustive()
    }
}

impl IdleEngine {
    /// Creates an engine with no registered nodes.
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                registry: NodeRegistry::new(),
                lock: TransitionLock::default(),
                wakeup: WakeupSignal::default(),
                timers: DeepIdleTimers::default(),
                collab: collaborators,
            }),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Read access to the node registry.
    pub fn registry(&self) -> &NodeRegistry {
        &self.shared.registry
    }

    // ── Transactions ────────────────────────────────────────────────

    /// Puts `node` and its dependents into idle, all or nothing.
    ///
    /// If `node` is not eligible for idle right now it is woken instead
    /// and the wake result is returned.
    pub async fn enter_idle(&self, node: NodeId) -> Result<(), IdleError> {
        self.shared.enter_idle(node).await
    }

    /// Wakes `node` and every sleeping node it needs.
    ///
    /// Members that fail to wake are marked [`IdleState::Lost`]; that is
    /// logged, not returned.
    pub async fn exit_idle(&self, node: NodeId, acquire_ref: bool) -> Result<(), IdleError> {
        self.shared.exit_idle(node, acquire_ref).await
    }

    /// True when `node` is idle or on its way there.
    ///
    /// Evaluated under the transition lock so the answer is not torn by an
    /// in-flight transaction.
    pub async fn is_exit_needed(&self, node: NodeId) -> Result<bool, IdleError> {
        let _tx = self.shared.lock.acquire().await;
        Ok(self.shared.registry.state(node)?.is_exit_needed())
    }

    // ── References ──────────────────────────────────────────────────

    /// Takes a reference on `node`, waking it when needed.
    ///
    /// Without `force_wakeup` an idle node is left alone and
    /// [`IdleError::NotReady`] is returned.
    pub async fn acquire(&self, node: NodeId, force_wakeup: bool) -> Result<(), IdleError> {
        let registry = &self.shared.registry;
        if registry.state(node)? == IdleState::Lost {
            return Err(IdleError::NodeLost(node));
        }
        if registry.adjust_ref(node, RefAdjust::Acquire)?.applied {
            return Ok(());
        }
        if !force_wakeup && self.is_exit_needed(node).await? {
            return Err(IdleError::NotReady(node));
        }
        self.shared.exit_idle(node, true).await?;
        if registry.state(node)? == IdleState::Lost {
            return Err(IdleError::NodeLost(node));
        }
        Ok(())
    }

    /// Drops a reference taken with [`IdleEngine::acquire`].
    pub fn release(&self, node: NodeId) -> Result<(), IdleError> {
        let registry = &self.shared.registry;
        if registry.state(node)? == IdleState::Lost {
            return Err(IdleError::NodeLost(node));
        }
        let outcome = registry.adjust_ref(node, RefAdjust::Release)?;
        if !outcome.applied {
            warn!(%node, count = outcome.prior, "release without a matching reference");
            return Err(IdleError::NotHeld(node));
        }
        Ok(())
    }

    /// Wakes `node` by taking and immediately dropping a forced reference.
    async fn kick(&self, node: NodeId) -> Result<(), IdleError> {
        self.acquire(node, true).await?;
        self.release(node)
    }

    /// Operator switch for shallow idle.
    ///
    /// Disabling wakes the node.
    pub async fn set_idle_enabled(&self, node: NodeId, enabled: bool) -> Result<(), IdleError> {
        let record = self.shared.registry.record(node)?;
        if enabled && !record.spec.idle_capable {
            return Err(IdleError::NotCapable {
                node,
                feature: "idle",
            });
        }
        record.update(|f| f.idle_enabled = enabled);
        info!(%node, enabled, "idle setting changed");
        if enabled {
            Ok(())
        } else {
            self.kick(node).await
        }
    }

    /// Operator switch for deep idle.
    ///
    /// Enabling arms the deep-idle timer of an idle node; disabling cancels
    /// it and wakes the node.
    pub async fn set_deep_idle_enabled(
        &self,
        node: NodeId,
        enabled: bool,
    ) -> Result<(), IdleError> {
        let record = self.shared.registry.record(node)?;
        if enabled && !record.spec.deep_idle_capable {
            return Err(IdleError::NotCapable {
                node,
                feature: "deep idle",
            });
        }
        record.update(|f| f.deep_idle_enabled = enabled);
        info!(%node, enabled, "deep idle setting changed");
        if enabled {
            if record.fields().idle_state == IdleState::Idle && self.shared.deep_idle_allowed(node)
            {
                self.shared.arm_deep_idle(node);
            }
            Ok(())
        } else {
            self.shared.timers.cancel(node);
            self.kick(node).await
        }
    }

    // ── Node lifecycle ──────────────────────────────────────────────

    /// Registers a node: `Active`, detached, no control channel.
    pub fn register_node(&self, spec: NodeSpec) -> Result<(), IdleError> {
        self.shared.registry.register(spec)
    }

    /// Forgets a node, cancelling its deep-idle timer.
    pub async fn remove_node(&self, node: NodeId) -> Result<NodeSnapshot, IdleError> {
        self.shared.timers.cancel(node);
        let tx = self.shared.lock.acquire().await;
        self.shared.registry.remove(&tx, node)
    }

    /// Marks `node` fully attached to the fabric.
    pub fn attach(&self, node: NodeId) -> Result<(), IdleError> {
        let record = self.shared.registry.record(node)?;
        record.update(|f| f.attachment = Attachment::Attached);
        debug!(%node, "node attached");
        Ok(())
    }

    /// Detaches `node`, waking it first if it sleeps.
    #[instrument(skip(self), fields(node = %node))]
    pub async fn detach(&self, node: NodeId) -> Result<(), IdleError> {
        let record = self.shared.registry.record(node)?;
        record.update(|f| f.attachment = Attachment::Detaching);
        self.shared.timers.cancel(node);
        if self.is_exit_needed(node).await? {
            self.shared.exit_idle(node, false).await?;
        }
        record.update(|f| f.attachment = Attachment::Detached);
        debug!("node detached");
        Ok(())
    }

    /// Records that the control channel to `node` is up.
    ///
    /// The node is treated as freshly booted: it is set `Active` and the
    /// state is published.
    pub async fn channel_connected(&self, node: NodeId) -> Result<(), IdleError> {
        let record = self.shared.registry.record(node)?;
        self.shared.timers.cancel(node);
        {
            let tx = self.shared.lock.acquire().await;
            self.shared
                .registry
                .set_state(&tx, node, IdleState::Active)?;
            record.update(|f| f.channel = ChannelState::Connected);
            record.adjust_ref(RefAdjust::ClearMark);
        }
        let count = record.ref_count();
        if count != 0 {
            warn!(%node, count, "control channel opened with live references");
        }
        self.shared.publish(node, IdleState::Active).await;
        Ok(())
    }

    /// Records that the control channel to `node` went away.
    pub fn channel_closed(&self, node: NodeId) -> Result<(), IdleError> {
        let record = self.shared.registry.record(node)?;
        self.shared.timers.cancel(node);
        record.update(|f| f.channel = ChannelState::Disconnected);
        debug!(%node, "control channel closed");
        Ok(())
    }

    /// Brings a `Lost` node back to `Active` with no references.
    pub async fn recover_node(&self, node: NodeId) -> Result<(), IdleError> {
        let tx = self.shared.lock.acquire().await;
        let registry = &self.shared.registry;
        let from = registry.state(node)?;
        if from != IdleState::Lost {
            return Err(IdleError::InvalidTransition {
                node,
                from,
                to: IdleState::Active,
            });
        }
        registry.set_state(&tx, node, IdleState::Active)?;
        registry.adjust_ref(node, RefAdjust::Reset)?;
        let single: NodeSet = std::iter::once(node).collect();
        match self.shared.collab.topology.reconnect(&single).await {
            Ok(()) => registry.set_connection(&tx, node, ConnectionState::Connected),
            Err(err) => warn!(%node, error = %err, "reconnect after recovery failed"),
        }
        drop(tx);
        self.shared.publish(node, IdleState::Active).await;
        info!(%node, "node recovered");
        Ok(())
    }

    // ── Inspection ──────────────────────────────────────────────────

    /// Current idle state of `node`.
    pub fn state(&self, node: NodeId) -> Result<IdleState, IdleError> {
        self.shared.registry.state(node)
    }

    /// Current reference count of `node`.
    pub fn ref_count(&self, node: NodeId) -> Result<i32, IdleError> {
        self.shared.registry.ref_count(node)
    }

    /// Point-in-time view of `node`.
    pub fn snapshot(&self, node: NodeId) -> Result<NodeSnapshot, IdleError> {
        self.shared.registry.snapshot(node)
    }

    /// True when `node` has a deep-idle attempt scheduled.
    pub fn deep_idle_pending(&self, node: NodeId) -> bool {
        self.shared.timers.is_armed(node)
    }

    /// Disconnect-ready pairs currently staged in the dependency matrix.
    ///
    /// Waits for the transition lock, so this is empty unless a matrix was
    /// left staged by a finished transaction.
    pub async fn staged_dependencies(&self) -> Vec<(NodeId, NodeId)> {
        let tx = self.shared.lock.acquire().await;
        tx.matrix_view().disconnect_ready_pairs()
    }

    /// Registered node ids, ascending.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.shared.registry.ids()
    }

    /// Cancels every pending deep-idle timer.
    pub fn shutdown(&self) {
        self.shared.timers.cancel_all();
        info!("idle engine shut down");
    }
}
