// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! In-memory mesh fabric.
//!
//! The mesh keeps a persistent graph of "`src` depends on `dst`" edges and
//! a per-node link flag. Disconnecting a node takes its link down, which
//! hides every edge touching it from [`Topology::is_dependent`] until the
//! node is reconnected.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use slumber_core::{
    DepState, DependencyMatrix, FabricError, IdleState, NodeId, NodeSet, Topology,
};

/// Serializable description of a mesh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshLayout {
    /// Nodes on the fabric.
    #[serde(default)]
    pub nodes: Vec<NodeId>,
    /// `(src, dst)` pairs: `src` depends on `dst`.
    #[serde(default)]
    pub dependencies: Vec<(NodeId, NodeId)>,
}

#[derive(Debug, Default)]
struct Mesh {
    nodes: BTreeSet<NodeId>,
    edges: BTreeSet<(NodeId, NodeId)>,
    down: BTreeSet<NodeId>,
    unreachable: BTreeSet<NodeId>,
}

impl Mesh {
    fn live(&self, src: NodeId, dst: NodeId) -> bool {
        self.edges.contains(&(src, dst)) && !self.down.contains(&src) && !self.down.contains(&dst)
    }

    fn check(&self, nodes: &NodeSet) -> Result<(), FabricError> {
        for node in nodes {
            if !self.nodes.contains(&node) {
                return Err(FabricError::UnknownNode(node));
            }
            if self.unreachable.contains(&node) {
                return Err(FabricError::Unacknowledged(node));
            }
        }
        Ok(())
    }
}

/// Reference [`Topology`] over an in-memory dependency graph.
#[derive(Debug, Default)]
pub struct MeshTopology {
    mesh: RwLock<Mesh>,
}

impl MeshTopology {
    /// Creates an empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a mesh from a layout; dependency endpoints are added as nodes.
    pub fn from_layout(layout: &MeshLayout) -> Self {
        let mesh = Self::new();
        for node in &layout.nodes {
            mesh.add_node(*node);
        }
        for (src, dst) in &layout.dependencies {
            mesh.add_dependency(*src, *dst);
        }
        mesh
    }

    /// Adds a node with its link up.
    pub fn add_node(&self, node: NodeId) {
        self.mesh.write().nodes.insert(node);
    }

    /// Records that `src` depends on `dst`.
    pub fn add_dependency(&self, src: NodeId, dst: NodeId) {
        if src == dst {
            return;
        }
        let mut mesh = self.mesh.write();
        mesh.nodes.insert(src);
        mesh.nodes.insert(dst);
        mesh.edges.insert((src, dst));
    }

    /// Drops the `src -> dst` dependency; returns `true` if it existed.
    pub fn remove_dependency(&self, src: NodeId, dst: NodeId) -> bool {
        self.mesh.write().edges.remove(&(src, dst))
    }

    /// True while `node`'s link is up.
    pub fn is_link_up(&self, node: NodeId) -> bool {
        let mesh = self.mesh.read();
        mesh.nodes.contains(&node) && !mesh.down.contains(&node)
    }

    /// Makes `node` stop acknowledging disconnect and reconnect requests.
    pub fn set_unreachable(&self, node: NodeId, unreachable: bool) {
        let mut mesh = self.mesh.write();
        if unreachable {
            mesh.unreachable.insert(node);
        } else {
            mesh.unreachable.remove(&node);
        }
    }

    /// Current layout.
    pub fn layout(&self) -> MeshLayout {
        let mesh = self.mesh.read();
        MeshLayout {
            nodes: mesh.nodes.iter().copied().collect(),
            dependencies: mesh.edges.iter().copied().collect(),
        }
    }
}

/// Grows the smallest closed set around `seed`.
///
/// Every node staged disconnect-ready on a member joins the set; a node that
/// still plainly depends on a member makes the set impossible.
fn minimal_set(seed: NodeId, matrix: &DependencyMatrix) -> Result<NodeSet, FabricError> {
    let mut set: NodeSet = std::iter::once(seed).collect();
    let mut queue = vec![seed];
    while let Some(node) = queue.pop() {
        if !matrix.dependents_of(node, DepState::Dependent).is_empty() {
            return Err(FabricError::NoDeactivationSet(seed));
        }
        for dependent in matrix.dependents_of(node, DepState::DisconnectReady) {
            if set.insert(dependent) {
                queue.push(dependent);
            }
        }
    }
    Ok(set)
}

#[async_trait]
impl Topology for MeshTopology {
    async fn is_dependent(&self, src: NodeId, dst: NodeId) -> Result<bool, FabricError> {
        Ok(self.mesh.read().live(src, dst))
    }

    async fn compute_deactivation_set(
        &self,
        seed: NodeId,
        matrix: &DependencyMatrix,
        maximal: bool,
    ) -> Result<NodeSet, FabricError> {
        let mut set = minimal_set(seed, matrix)?;
        if maximal {
            let mut frontier: Vec<NodeId> = set.iter().collect();
            while let Some(node) = frontier.pop() {
                for dst in matrix.dependencies_of(node, DepState::DisconnectReady) {
                    if set.contains(dst) || !matrix.is_ready(dst) {
                        continue;
                    }
                    match minimal_set(dst, matrix) {
                        Ok(extra) => {
                            trace!(%seed, extra = %extra, "deactivation set extended");
                            for member in extra {
                                if set.insert(member) {
                                    frontier.push(member);
                                }
                            }
                        }
                        Err(_) => trace!(%seed, %dst, "ready dependency cannot join the set"),
                    }
                }
            }
        }
        if set.is_empty() {
            return Err(FabricError::NoDeactivationSet(seed));
        }
        Ok(set)
    }

    async fn active_set(
        &self,
        node: NodeId,
        states: &[(NodeId, IdleState)],
    ) -> Result<NodeSet, FabricError> {
        let sleeping: BTreeMap<NodeId, IdleState> = states
            .iter()
            .copied()
            .filter(|(_, state)| state.is_idle())
            .collect();
        let mesh = self.mesh.read();
        let mut set: NodeSet = std::iter::once(node).collect();
        let mut queue = vec![node];
        while let Some(current) = queue.pop() {
            let needed = mesh
                .edges
                .range((current, NodeId::new(0))..=(current, NodeId::new(u32::MAX)))
                .map(|(_, dst)| *dst)
                .filter(|dst| mesh.down.contains(dst) && sleeping.contains_key(dst));
            for dst in needed {
                if set.insert(dst) {
                    queue.push(dst);
                }
            }
        }
        Ok(set)
    }

    async fn disconnect(&self, nodes: &NodeSet) -> Result<(), FabricError> {
        let mut mesh = self.mesh.write();
        mesh.check(nodes)?;
        mesh.down.extend(nodes.iter());
        debug!(set = %nodes, "fabric links down");
        Ok(())
    }

    async fn reconnect(&self, nodes: &NodeSet) -> Result<(), FabricError> {
        let mut mesh = self.mesh.write();
        mesh.check(nodes)?;
        for node in nodes {
            mesh.down.remove(&node);
        }
        debug!(set = %nodes, "fabric links up");
        Ok(())
    }
}
