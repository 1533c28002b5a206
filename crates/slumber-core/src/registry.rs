// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Per-node records.
//!
//! # Invariants
//! - `idle_state` only changes through [`NodeRegistry::set_state`], which
//!   demands a [`Transition`] and rejects edges outside the state machine.
//! - The reference count is a lock-free [`AtomicI32`]; [`MARKED_IDLE`]
//!   means "claimed by an idle transition".
//! - Lost nodes always carry a zero reference count.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::NodeSpec;
use crate::error::IdleError;
use crate::ident::NodeId;
use crate::lock::Transition;
use crate::state::{Attachment, ChannelState, ConnectionState, IdleState};

/// Reference value of a node claimed by an idle transition (bit 31 set).
pub const MARKED_IDLE: i32 = i32::MIN;

/// Reference-count operations. Each is a single atomic step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefAdjust {
    /// `0 -> MARKED_IDLE`.
    MarkIdle,
    /// `MARKED_IDLE -> 0`.
    ClearMark,
    /// `MARKED_IDLE -> 1`, otherwise increment.
    TakeAfterWake,
    /// Increment unless the count is `MARKED_IDLE`.
    Acquire,
    /// Decrement when positive.
    Release,
    /// Store 0 unconditionally.
    Reset,
}

/// Result of a [`RefAdjust`]: the value before the step and whether the
/// step changed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefOutcome {
    /// Value observed before the operation.
    pub prior: i32,
    /// True when the operation stored a new value.
    pub applied: bool,
}

/// Mutable non-atomic fields of a node.
#[derive(Debug, Clone)]
pub(crate) struct NodeFields {
    pub(crate) idle_state: IdleState,
    pub(crate) connection: ConnectionState,
    pub(crate) attachment: Attachment,
    pub(crate) channel: ChannelState,
    pub(crate) published: IdleState,
    pub(crate) idle_enabled: bool,
    pub(crate) deep_idle_enabled: bool,
}

#[derive(Debug)]
pub(crate) struct NodeRecord {
    pub(crate) spec: NodeSpec,
    ref_count: AtomicI32,
    fields: Mutex<NodeFields>,
}

impl NodeRecord {
    fn new(spec: NodeSpec) -> Self {
        Self {
            spec,
            ref_count: AtomicI32::new(0),
            fields: Mutex::new(NodeFields {
                idle_state: IdleState::Active,
                connection: ConnectionState::Connected,
                attachment: Attachment::Detached,
                channel: ChannelState::Disconnected,
                published: IdleState::Active,
                idle_enabled: spec.idle_capable,
                deep_idle_enabled: spec.deep_idle_capable,
            }),
        }
    }

    pub(crate) fn fields(&self) -> NodeFields {
        self.fields.lock().clone()
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut NodeFields) -> R) -> R {
        f(&mut self.fields.lock())
    }

    pub(crate) fn ref_count(&self) -> i32 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub(crate) fn adjust_ref(&self, op: RefAdjust) -> RefOutcome {
        let rc = &self.ref_count;
        let (ok, err) = (Ordering::AcqRel, Ordering::Acquire);
        let result = match op {
            RefAdjust::MarkIdle => rc.compare_exchange(0, MARKED_IDLE, ok, err),
            RefAdjust::ClearMark => rc.compare_exchange(MARKED_IDLE, 0, ok, err),
            RefAdjust::TakeAfterWake => rc.fetch_update(ok, err, |v| {
                if v == MARKED_IDLE {
                    Some(1)
                } else {
                    v.checked_add(1)
                }
            }),
            RefAdjust::Acquire => rc.fetch_update(ok, err, |v| {
                if v == MARKED_IDLE {
                    None
                } else {
                    v.checked_add(1)
                }
            }),
            RefAdjust::Release => {
                rc.fetch_update(ok, err, |v| v.checked_sub(1).filter(|n| *n >= 0))
            }
            RefAdjust::Reset => Ok(rc.swap(0, ok)),
        };
        match result {
            Ok(prior) => RefOutcome {
                prior,
                applied: true,
            },
            Err(prior) => RefOutcome {
                prior,
                applied: false,
            },
        }
    }
}

/// Read-only view of a node, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    /// Node identifier.
    pub id: NodeId,
    /// Engine-tracked idle state.
    pub idle_state: IdleState,
    /// Fabric reachability.
    pub connection: ConnectionState,
    /// Attachment status.
    pub attachment: Attachment,
    /// Control channel status.
    pub channel: ChannelState,
    /// Last state pushed to the state register.
    pub published: IdleState,
    /// Reference count (may be [`MARKED_IDLE`]).
    pub ref_count: i32,
    /// Operator setting for shallow idle.
    pub idle_enabled: bool,
    /// Operator setting for deep idle.
    pub deep_idle_enabled: bool,
    /// Registration data.
    #[serde(skip)]
    pub spec: NodeSpec,
}

/// Registry of idle-managed nodes.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<BTreeMap<NodeId, Arc<NodeRecord>>>,
}

impl NodeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node in the `Active` state with a zero reference count.
    pub fn register(&self, spec: NodeSpec) -> Result<(), IdleError> {
        if spec.id.is_host() {
            return Err(IdleError::HostNode(spec.id));
        }
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&spec.id) {
            return Err(IdleError::DuplicateNode(spec.id));
        }
        nodes.insert(spec.id, Arc::new(NodeRecord::new(spec)));
        debug!(node = %spec.id, stepping = spec.stepping, "node registered");
        Ok(())
    }

    /// Drops a node's record.
    pub fn remove(&self, _tx: &Transition<'_>, id: NodeId) -> Result<NodeSnapshot, IdleError> {
        let record = self
            .nodes
            .write()
            .remove(&id)
            .ok_or(IdleError::UnknownNode(id))?;
        debug!(node = %id, "node removed");
        Ok(snapshot_of(&record))
    }

    pub(crate) fn record(&self, id: NodeId) -> Result<Arc<NodeRecord>, IdleError> {
        self.nodes
            .read()
            .get(&id)
            .cloned()
            .ok_or(IdleError::UnknownNode(id))
    }

    /// True when `id` is registered.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.read().contains_key(&id)
    }

    /// Registered ids, ascending.
    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.read().keys().copied().collect()
    }

    /// Idle state of every registered node, ascending by id.
    pub fn states(&self) -> Vec<(NodeId, IdleState)> {
        self.nodes
            .read()
            .iter()
            .map(|(id, rec)| (*id, rec.fields.lock().idle_state))
            .collect()
    }

    /// Current idle state of `id`.
    pub fn state(&self, id: NodeId) -> Result<IdleState, IdleError> {
        Ok(self.record(id)?.fields.lock().idle_state)
    }

    /// Lock-free read of the reference count.
    pub fn ref_count(&self, id: NodeId) -> Result<i32, IdleError> {
        Ok(self.record(id)?.ref_count())
    }

    /// Point-in-time view of `id`.
    pub fn snapshot(&self, id: NodeId) -> Result<NodeSnapshot, IdleError> {
        let record = self.record(id)?;
        Ok(snapshot_of(&record))
    }

    /// Moves `id` to `next`, returning the prior state.
    ///
    /// Staying in the same state is accepted as a no-op.
    pub fn set_state(
        &self,
        _tx: &Transition<'_>,
        id: NodeId,
        next: IdleState,
    ) -> Result<IdleState, IdleError> {
        let record = self.record(id)?;
        let mut fields = record.fields.lock();
        let from = fields.idle_state;
        if from == next {
            return Ok(from);
        }
        if !from.can_transition_to(next) {
            return Err(IdleError::InvalidTransition {
                node: id,
                from,
                to: next,
            });
        }
        fields.idle_state = next;
        drop(fields);
        if next == IdleState::Lost {
            record.adjust_ref(RefAdjust::Reset);
        }
        debug!(node = %id, %from, to = %next, "idle state changed");
        Ok(from)
    }

    /// Marks `id` lost after a failed wake and zeroes its references.
    pub(crate) fn mark_lost(&self, tx: &Transition<'_>, id: NodeId) {
        match self.set_state(tx, id, IdleState::Lost) {
            Ok(_) => warn!(node = %id, "node lost"),
            Err(err) => warn!(node = %id, error = %err, "could not mark node lost"),
        }
    }

    /// Applies a reference-count step to `id`.
    pub fn adjust_ref(&self, id: NodeId, op: RefAdjust) -> Result<RefOutcome, IdleError> {
        Ok(self.record(id)?.adjust_ref(op))
    }

    /// Records fabric reachability for `id`; unknown ids are ignored.
    pub(crate) fn set_connection(&self, _tx: &Transition<'_>, id: NodeId, state: ConnectionState) {
        if let Ok(record) = self.record(id) {
            record.update(|f| f.connection = state);
        }
    }
}

fn snapshot_of(record: &NodeRecord) -> NodeSnapshot {
    let fields = record.fields();
    NodeSnapshot {
        id: record.spec.id,
        idle_state: fields.idle_state,
        connection: fields.connection,
        attachment: fields.attachment,
        channel: fields.channel,
        published: fields.published,
        ref_count: record.ref_count(),
        idle_enabled: fields.idle_enabled,
        deep_idle_enabled: fields.deep_idle_enabled,
        spec: record.spec,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::lock::TransitionLock;

    fn registry_with(ids: &[u32]) -> NodeRegistry {
        let reg = NodeRegistry::new();
        for id in ids {
            reg.register(NodeSpec::new(NodeId::new(*id))).unwrap();
        }
        reg
    }

    #[test]
    fn host_and_duplicates_are_rejected() {
        let reg = registry_with(&[1]);
        assert!(matches!(
            reg.register(NodeSpec::new(NodeId::new(0))),
            Err(IdleError::HostNode(_))
        ));
        assert!(matches!(
            reg.register(NodeSpec::new(NodeId::new(1))),
            Err(IdleError::DuplicateNode(_))
        ));
    }

    #[test]
    fn unknown_ids_are_errors_not_panics() {
        let reg = registry_with(&[]);
        assert!(matches!(
            reg.state(NodeId::new(9)),
            Err(IdleError::UnknownNode(_))
        ));
        assert!(reg.ref_count(NodeId::new(9)).is_err());
    }

    #[test]
    fn mark_idle_only_from_zero() {
        let reg = registry_with(&[1]);
        let n = NodeId::new(1);
        assert!(reg.adjust_ref(n, RefAdjust::MarkIdle).unwrap().applied);
        assert_eq!(reg.ref_count(n).unwrap(), MARKED_IDLE);

        let again = reg.adjust_ref(n, RefAdjust::MarkIdle).unwrap();
        assert_eq!(again.prior, MARKED_IDLE);
        assert!(!again.applied);

        assert!(!reg.adjust_ref(n, RefAdjust::Acquire).unwrap().applied);
        assert_eq!(reg.adjust_ref(n, RefAdjust::TakeAfterWake).unwrap().prior, MARKED_IDLE);
        assert_eq!(reg.ref_count(n).unwrap(), 1);
    }

    #[test]
    fn release_never_underflows() {
        let reg = registry_with(&[1]);
        let n = NodeId::new(1);
        assert!(!reg.adjust_ref(n, RefAdjust::Release).unwrap().applied);
        reg.adjust_ref(n, RefAdjust::Acquire).unwrap();
        assert!(reg.adjust_ref(n, RefAdjust::Release).unwrap().applied);
        assert_eq!(reg.ref_count(n).unwrap(), 0);
    }

    #[tokio::test]
    async fn set_state_validates_edges_and_resets_lost_refs() {
        let reg = registry_with(&[1]);
        let lock = TransitionLock::default();
        let tx = lock.acquire().await;
        let n = NodeId::new(1);

        assert!(matches!(
            reg.set_state(&tx, n, IdleState::Idle),
            Err(IdleError::InvalidTransition { .. })
        ));
        assert_eq!(
            reg.set_state(&tx, n, IdleState::Active).unwrap(),
            IdleState::Active
        );

        reg.set_state(&tx, n, IdleState::ReadyToIdle).unwrap();
        reg.adjust_ref(n, RefAdjust::MarkIdle).unwrap();
        reg.mark_lost(&tx, n);
        assert_eq!(reg.state(n).unwrap(), IdleState::Lost);
        assert_eq!(reg.ref_count(n).unwrap(), 0);
    }
}
