// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Topology fake with scripted deactivation and activation sets.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use slumber_core::{
    DependencyMatrix, FabricError, IdleState, NodeId, NodeSet, Topology,
};

/// Which topology call to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TopologyCall {
    /// `is_dependent`.
    IsDependent,
    /// `compute_deactivation_set`.
    Deactivation,
    /// `active_set`.
    ActiveSet,
    /// `disconnect`.
    Disconnect,
    /// `reconnect`.
    Reconnect,
}

/// [`Topology`] whose answers are set up by the test.
///
/// Unscripted seeds produce singleton sets. Disconnect and reconnect calls
/// are logged, together with the disconnect-ready pairs the engine had
/// staged at each deactivation request.
#[derive(Clone, Default)]
pub struct ScriptedTopology {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    dependencies: BTreeSet<(NodeId, NodeId)>,
    deactivation: BTreeMap<NodeId, NodeSet>,
    activation: BTreeMap<NodeId, NodeSet>,
    failing: BTreeSet<TopologyCall>,
    disconnect_latency: Option<Duration>,
    disconnects: Vec<NodeSet>,
    reconnects: Vec<NodeSet>,
    staged: Vec<Vec<(NodeId, NodeId)>>,
}

impl ScriptedTopology {
    /// Topology with no dependencies and singleton sets.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, call: TopologyCall) -> Result<(), FabricError> {
        if self.lock().failing.contains(&call) {
            Err(FabricError::Other(format!("scripted {call:?} failure")))
        } else {
            Ok(())
        }
    }

    /// Reports `src` as depending on `dst`.
    pub fn add_dependency(&self, src: NodeId, dst: NodeId) {
        self.lock().dependencies.insert((src, dst));
    }

    /// Answer for `compute_deactivation_set(seed, ..)`.
    pub fn set_deactivation_set(&self, seed: NodeId, set: impl IntoIterator<Item = NodeId>) {
        self.lock().deactivation.insert(seed, set.into_iter().collect());
    }

    /// Answer for `active_set(node, ..)`.
    pub fn set_active_set(&self, node: NodeId, set: impl IntoIterator<Item = NodeId>) {
        self.lock().activation.insert(node, set.into_iter().collect());
    }

    /// Makes `call` fail until switched off.
    pub fn set_failing(&self, call: TopologyCall, failing: bool) {
        let mut inner = self.lock();
        if failing {
            inner.failing.insert(call);
        } else {
            inner.failing.remove(&call);
        }
    }

    /// Delays every disconnect by `latency`.
    pub fn set_disconnect_latency(&self, latency: Option<Duration>) {
        self.lock().disconnect_latency = latency;
    }

    /// Every disconnect request, oldest first.
    pub fn disconnects(&self) -> Vec<NodeSet> {
        self.lock().disconnects.clone()
    }

    /// Every reconnect request, oldest first.
    pub fn reconnects(&self) -> Vec<NodeSet> {
        self.lock().reconnects.clone()
    }

    /// Disconnect-ready pairs seen at each deactivation request.
    pub fn staged_pairs(&self) -> Vec<Vec<(NodeId, NodeId)>> {
        self.lock().staged.clone()
    }
}

#[async_trait]
impl Topology for ScriptedTopology {
    async fn is_dependent(&self, src: NodeId, dst: NodeId) -> Result<bool, FabricError> {
        self.check(TopologyCall::IsDependent)?;
        Ok(self.lock().dependencies.contains(&(src, dst)))
    }

    async fn compute_deactivation_set(
        &self,
        seed: NodeId,
        matrix: &DependencyMatrix,
        _maximal: bool,
    ) -> Result<NodeSet, FabricError> {
        self.check(TopologyCall::Deactivation)?;
        let mut inner = self.lock();
        inner.staged.push(matrix.disconnect_ready_pairs());
        Ok(inner
            .deactivation
            .get(&seed)
            .cloned()
            .unwrap_or_else(|| std::iter::once(seed).collect()))
    }

    async fn active_set(
        &self,
        node: NodeId,
        _states: &[(NodeId, IdleState)],
    ) -> Result<NodeSet, FabricError> {
        self.check(TopologyCall::ActiveSet)?;
        Ok(self
            .lock()
            .activation
            .get(&node)
            .cloned()
            .unwrap_or_else(|| std::iter::once(node).collect()))
    }

    async fn disconnect(&self, nodes: &NodeSet) -> Result<(), FabricError> {
        let latency = {
            let mut inner = self.lock();
            inner.disconnects.push(nodes.clone());
            inner.disconnect_latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.check(TopologyCall::Disconnect)
    }

    async fn reconnect(&self, nodes: &NodeSet) -> Result<(), FabricError> {
        self.lock().reconnects.push(nodes.clone());
        self.check(TopologyCall::Reconnect)
    }
}
