// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Virtual console sessions that must be released before a node idles.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use slumber_core::{ConsoleLink, FabricError, NodeId, NodeSet};

#[derive(Debug, Default, Clone, Copy)]
struct Session {
    open: bool,
    held: bool,
}

/// Console link tracking one session per node.
///
/// A disconnect closes the session of every member. A session marked held
/// refuses to close and fails the whole request, leaving the other sessions
/// untouched.
#[derive(Debug, Default)]
pub struct MeshConsole {
    sessions: Mutex<BTreeMap<NodeId, Session>>,
}

impl MeshConsole {
    /// Creates a console link with no sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session to `node`.
    pub fn open(&self, node: NodeId) {
        self.sessions.lock().entry(node).or_default().open = true;
    }

    /// Pins or unpins `node`'s session.
    pub fn hold(&self, node: NodeId, held: bool) {
        self.sessions.lock().entry(node).or_default().held = held;
    }

    /// True while `node` has an open session.
    pub fn is_open(&self, node: NodeId) -> bool {
        self.sessions.lock().get(&node).is_some_and(|s| s.open)
    }
}

#[async_trait]
impl ConsoleLink for MeshConsole {
    async fn disconnect(&self, nodes: &NodeSet) -> Result<(), FabricError> {
        let mut sessions = self.sessions.lock();
        if let Some(node) = nodes
            .iter()
            .find(|n| sessions.get(n).is_some_and(|s| s.open && s.held))
        {
            return Err(FabricError::Other(format!("console session to {node} is held")));
        }
        for node in nodes {
            if let Some(session) = sessions.get_mut(&node) {
                if session.open {
                    session.open = false;
                    debug!(%node, "console session closed");
                }
            }
        }
        Ok(())
    }
}
