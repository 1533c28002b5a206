// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Per-transaction node dependency matrix.
//!
//! Cell `(src, dst)` describes whether `src` depends on `dst` being
//! reachable. The matrix lives inside the idle-transition lock and is
//! rebuilt by every entry transaction:
//!
//! 1. [`DependencyMatrix::build`] copies the live dependencies from the
//!    topology and promotes the rows of every `ReadyToIdle` node to
//!    [`DepState::DisconnectReady`].
//! 2. [`DependencyMatrix::teardown`] demotes every disconnect-ready cell
//!    back to [`DepState::Dependent`], success or failure.
//!
//! The diagonal is never populated.

use std::collections::BTreeSet;

use tracing::trace;

use crate::fabric::{FabricError, Topology};
use crate::ident::NodeId;
use crate::state::IdleState;

/// State of a single dependency pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepState {
    /// `src` does not need `dst`.
    #[default]
    NotDependent,
    /// `src` needs `dst` and is not letting go of it.
    Dependent,
    /// `src` needs `dst` but is itself about to idle.
    DisconnectReady,
}

/// Square dependency matrix over the registered nodes.
#[derive(Debug, Default)]
pub struct DependencyMatrix {
    ids: Vec<NodeId>,
    cells: Vec<DepState>,
    ready: BTreeSet<NodeId>,
}

impl DependencyMatrix {
    /// Creates an empty matrix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the matrix for `nodes` and stages the ready-to-idle rows.
    pub async fn build(
        &mut self,
        nodes: &[(NodeId, IdleState)],
        topology: &dyn Topology,
    ) -> Result<(), FabricError> {
        self.ids = nodes.iter().map(|(id, _)| *id).collect();
        self.ids.sort_unstable();
        self.ids.dedup();
        self.cells = vec![DepState::NotDependent; self.ids.len() * self.ids.len()];
        self.ready = nodes
            .iter()
            .filter(|(_, state)| *state == IdleState::ReadyToIdle)
            .map(|(id, _)| *id)
            .collect();

        for (row, &src) in self.ids.iter().enumerate() {
            let staged = self.ready.contains(&src);
            for (col, &dst) in self.ids.iter().enumerate() {
                if row == col || !topology.is_dependent(src, dst).await? {
                    continue;
                }
                let cell = if staged {
                    trace!(%src, %dst, "dependency staged disconnect-ready");
                    DepState::DisconnectReady
                } else {
                    DepState::Dependent
                };
                self.cells[row * self.ids.len() + col] = cell;
            }
        }
        Ok(())
    }

    /// Demotes every disconnect-ready pair back to dependent.
    pub fn teardown(&mut self) {
        for cell in &mut self.cells {
            if *cell == DepState::DisconnectReady {
                *cell = DepState::Dependent;
            }
        }
        self.ready.clear();
    }

    /// Nodes covered by the matrix, ascending.
    pub fn nodes(&self) -> &[NodeId] {
        &self.ids
    }

    /// State of the `(src, dst)` pair; pairs outside the matrix and the
    /// diagonal read as [`DepState::NotDependent`].
    pub fn state(&self, src: NodeId, dst: NodeId) -> DepState {
        match (self.index(src), self.index(dst)) {
            (Some(row), Some(col)) if row != col => self.cells[row * self.ids.len() + col],
            _ => DepState::NotDependent,
        }
    }

    /// True when `node` was `ReadyToIdle` when the matrix was built.
    pub fn is_ready(&self, node: NodeId) -> bool {
        self.ready.contains(&node)
    }

    /// Nodes whose dependency on `dst` is in `state`.
    pub fn dependents_of(&self, dst: NodeId, state: DepState) -> Vec<NodeId> {
        self.ids
            .iter()
            .copied()
            .filter(|&src| src != dst && self.state(src, dst) == state)
            .collect()
    }

    /// Nodes `src` depends on with the given pair state.
    pub fn dependencies_of(&self, src: NodeId, state: DepState) -> Vec<NodeId> {
        self.ids
            .iter()
            .copied()
            .filter(|&dst| dst != src && self.state(src, dst) == state)
            .collect()
    }

    /// Every pair currently staged disconnect-ready.
    pub fn disconnect_ready_pairs(&self) -> Vec<(NodeId, NodeId)> {
        let n = self.ids.len();
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| **cell == DepState::DisconnectReady)
            .map(|(i, _)| (self.ids[i / n], self.ids[i % n]))
            .collect()
    }

    fn index(&self, id: NodeId) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }
}
