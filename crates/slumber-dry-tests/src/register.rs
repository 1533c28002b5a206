// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! State register that records every publish.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use slumber_core::{HardwareError, IdleState, NodeId, StateRegister};

/// [`StateRegister`] fake keeping an ordered publish log.
#[derive(Clone, Default)]
pub struct RecordingRegister {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    log: Vec<(NodeId, IdleState)>,
    failing: bool,
}

impl RecordingRegister {
    /// Register that accepts every publish.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes publishes fail (they are still not logged).
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Every accepted publish, oldest first.
    pub fn log(&self) -> Vec<(NodeId, IdleState)> {
        self.lock().log.clone()
    }

    /// Last state accepted for `node`.
    pub fn last(&self, node: NodeId) -> Option<IdleState> {
        self.lock()
            .log
            .iter()
            .rev()
            .find(|(n, _)| *n == node)
            .map(|(_, s)| *s)
    }

    /// Forgets the log.
    pub fn clear(&self) {
        self.lock().log.clear();
    }
}

#[async_trait]
impl StateRegister for RecordingRegister {
    async fn publish(&self, node: NodeId, state: IdleState) -> Result<(), HardwareError> {
        let mut inner = self.lock();
        if inner.failing {
            return Err(HardwareError::Fault("register write failed".into()));
        }
        inner.log.push((node, state));
        Ok(())
    }
}
