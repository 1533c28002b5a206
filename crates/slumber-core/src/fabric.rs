// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Ports to the collaborators the engine drives but does not own.
//!
//! The engine only ever calls these while holding the idle-transition lock,
//! so implementations never see two transactions interleave. They may sleep
//! or poll with bounded timeouts.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::ident::{NodeId, NodeSet};
use crate::matrix::DependencyMatrix;
use crate::state::IdleState;

/// Failure reported by the topology or console layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FabricError {
    /// Some dependent of the seed is still in use, so no set can be formed.
    #[error("no deactivation set exists for node {0}")]
    NoDeactivationSet(NodeId),
    /// The node is not part of the fabric.
    #[error("node {0} is not part of the fabric")]
    UnknownNode(NodeId),
    /// A peer did not acknowledge a disconnect or reconnect request.
    #[error("node {0} did not acknowledge the request")]
    Unacknowledged(NodeId),
    /// Catch-all error variant.
    #[error("other: {0}")]
    Other(String),
}

/// Failure reported by the hardware sequencer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HardwareError {
    /// The node is busy; the same step may succeed later.
    #[error("node {node} not ready for the transition")]
    NotReady {
        /// Node that was not ready.
        node: NodeId,
    },
    /// The node stopped responding within the sequencer's timeout.
    #[error("node {node} did not respond")]
    Unresponsive {
        /// Node that went silent.
        node: NodeId,
    },
    /// Register programming failed.
    #[error("hardware fault: {0}")]
    Fault(String),
}

impl HardwareError {
    /// True when the same step may be attempted again later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }
}

/// Fabric topology: who depends on whom and who is connected.
#[async_trait]
pub trait Topology: Send + Sync {
    /// True when `src` currently depends on `dst` being reachable.
    ///
    /// Pairs that are already disconnected report `false`.
    async fn is_dependent(&self, src: NodeId, dst: NodeId) -> Result<bool, FabricError>;

    /// Computes the set that must be disconnected together to idle `seed`.
    ///
    /// `matrix` carries the staged disconnect-ready pairs of this
    /// transaction. When `maximal` is set the fabric may also pull in nodes
    /// the set depends on, provided they are ready to idle themselves.
    async fn compute_deactivation_set(
        &self,
        seed: NodeId,
        matrix: &DependencyMatrix,
        maximal: bool,
    ) -> Result<NodeSet, FabricError>;

    /// Computes `node` plus every sleeping node it needs reconnected.
    ///
    /// `states` is the engine's view of every registered node.
    async fn active_set(
        &self,
        node: NodeId,
        states: &[(NodeId, IdleState)],
    ) -> Result<NodeSet, FabricError>;

    /// Disconnects `nodes` at the fabric level.
    async fn disconnect(&self, nodes: &NodeSet) -> Result<(), FabricError>;

    /// Reconnects `nodes` at the fabric level.
    async fn reconnect(&self, nodes: &NodeSet) -> Result<(), FabricError>;
}

/// Secondary peripheral link (virtual consoles) that must release a set.
#[async_trait]
pub trait ConsoleLink: Send + Sync {
    /// Releases console sessions for every node in `nodes`.
    async fn disconnect(&self, nodes: &NodeSet) -> Result<(), FabricError>;
}

/// Hardware sequencing of the physical low-power transitions.
#[async_trait]
pub trait HardwareSequencer: Send + Sync {
    /// Shallow idle entry.
    async fn enter_idle(&self, node: NodeId) -> Result<(), HardwareError>;
    /// Shallow idle exit (wake signal plus handshake).
    async fn exit_idle(&self, node: NodeId) -> Result<(), HardwareError>;
    /// Deep idle entry from shallow idle.
    async fn enter_deep_idle(&self, node: NodeId) -> Result<(), HardwareError>;
    /// Deep idle exit back to active.
    async fn exit_deep_idle(&self, node: NodeId) -> Result<(), HardwareError>;
}

/// Externally visible per-node state register. Best effort.
#[async_trait]
pub trait StateRegister: Send + Sync {
    /// Publishes the host's view of `node`'s state.
    async fn publish(&self, node: NodeId, state: IdleState) -> Result<(), HardwareError>;
}

/// Console link for fabrics without virtual consoles.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConsole;

#[async_trait]
impl ConsoleLink for NoConsole {
    async fn disconnect(&self, _nodes: &NodeSet) -> Result<(), FabricError> {
        Ok(())
    }
}

/// The four collaborators an engine is wired to.
#[derive(Clone)]
pub struct Collaborators {
    /// Fabric topology.
    pub topology: Arc<dyn Topology>,
    /// Peripheral console link.
    pub console: Arc<dyn ConsoleLink>,
    /// Physical transitions.
    pub hardware: Arc<dyn HardwareSequencer>,
    /// State register notifications.
    pub register: Arc<dyn StateRegister>,
}

impl Collaborators {
    /// Wires collaborators with no console link.
    pub fn new(
        topology: Arc<dyn Topology>,
        hardware: Arc<dyn HardwareSequencer>,
        register: Arc<dyn StateRegister>,
    ) -> Self {
        Self {
            topology,
            console: Arc::new(NoConsole),
            hardware,
            register,
        }
    }

    /// Replaces the console link.
    pub fn with_console(mut self, console: Arc<dyn ConsoleLink>) -> Self {
        self.console = console;
        self
    }
}
