// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Error taxonomy for idle transactions.

use thiserror::Error;

use crate::fabric::{FabricError, HardwareError};
use crate::ident::NodeId;
use crate::state::IdleState;

/// Why a node failed the admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The node is not present in the registry.
    Unregistered,
    /// The node is not fully attached to the fabric.
    NotAttached,
    /// The node holds live references (the prior count is carried).
    Referenced(i32),
    /// A higher-priority wake request is waiting for the transition lock.
    WakeupPending,
}

impl core::fmt::Display for Rejection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unregistered => f.write_str("not registered"),
            Self::NotAttached => f.write_str("not attached"),
            Self::Referenced(count) => write!(f, "referenced (count {count})"),
            Self::WakeupPending => f.write_str("wakeup in progress"),
        }
    }
}

/// Errors surfaced by the idle engine.
///
/// Use [`IdleError::is_retryable`] to decide whether a caller may simply
/// re-invoke the operation.
#[derive(Debug, Error)]
pub enum IdleError {
    /// The node id is not registered.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    /// The host id cannot be managed as a node.
    #[error("node id {0} is reserved for the host")]
    HostNode(NodeId),
    /// A node with this id is already registered.
    #[error("node {0} is already registered")]
    DuplicateNode(NodeId),
    /// Staging dependencies or computing the deactivation set failed.
    #[error("dependency setup failed: {0}")]
    DependencySetup(#[source] FabricError),
    /// The fabric or console layer refused to disconnect the set.
    #[error("disconnect failed: {0}")]
    Disconnect(#[source] FabricError),
    /// The fabric could not compute the activation set.
    #[error("activation set failed: {0}")]
    ActiveSet(#[source] FabricError),
    /// A member of the deactivation set failed the admission check.
    #[error("node {node} rejected admission: {reason}")]
    AdmissionRejected {
        /// Node that failed.
        node: NodeId,
        /// Why it failed.
        reason: Rejection,
    },
    /// Hardware sequencing failed for a member of the transaction.
    #[error("hardware sequencing failed on node {node}: {source}")]
    Hardware {
        /// Node whose sequencer failed.
        node: NodeId,
        /// Sequencer error.
        #[source]
        source: HardwareError,
    },
    /// A node was found in a state the transaction cannot handle.
    ///
    /// `state` is `None` when the node vanished from the registry mid-walk.
    #[error("node {node} is in an invalid state ({state:?})")]
    InvalidState {
        /// Offending node.
        node: NodeId,
        /// Observed state, if the node is still registered.
        state: Option<IdleState>,
    },
    /// A state change outside the state machine was requested.
    #[error("illegal transition {from} -> {to} on node {node}")]
    InvalidTransition {
        /// Node whose state was being changed.
        node: NodeId,
        /// Current state.
        from: IdleState,
        /// Requested state.
        to: IdleState,
    },
    /// The node is lost; references cannot be taken or dropped.
    #[error("node {0} is lost")]
    NodeLost(NodeId),
    /// The node is idle and the caller declined to force a wake.
    #[error("node {0} is idle; wake required")]
    NotReady(NodeId),
    /// `release` was called without a matching reference.
    #[error("node {0} holds no reference to release")]
    NotHeld(NodeId),
    /// The node never negotiated the requested idle capability.
    #[error("node {node} is not capable of {feature}")]
    NotCapable {
        /// Node whose capability is missing.
        node: NodeId,
        /// Name of the capability.
        feature: &'static str,
    },
}

impl IdleError {
    /// True when the caller may retry the same request later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DependencySetup(_)
            | Self::Disconnect(_)
            | Self::ActiveSet(_)
            | Self::AdmissionRejected { .. }
            | Self::NotReady(_) => true,
            Self::Hardware { source, .. } => source.is_retryable(),
            Self::UnknownNode(_)
            | Self::HostNode(_)
            | Self::DuplicateNode(_)
            | Self::InvalidState { .. }
            | Self::InvalidTransition { .. }
            | Self::NodeLost(_)
            | Self::NotHeld(_)
            | Self::NotCapable { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_and_fabric_failures_are_retryable() {
        let node = NodeId::new(4);
        assert!(IdleError::AdmissionRejected {
            node,
            reason: Rejection::WakeupPending
        }
        .is_retryable());
        assert!(IdleError::Disconnect(FabricError::Unacknowledged(node)).is_retryable());
        assert!(!IdleError::UnknownNode(node).is_retryable());
        assert!(!IdleError::InvalidState { node, state: None }.is_retryable());
    }

    #[test]
    fn hardware_retryability_follows_the_sequencer() {
        let node = NodeId::new(2);
        let busy = IdleError::Hardware {
            node,
            source: HardwareError::NotReady { node },
        };
        let dead = IdleError::Hardware {
            node,
            source: HardwareError::Unresponsive { node },
        };
        assert!(busy.is_retryable());
        assert!(!dead.is_retryable());
    }
}
