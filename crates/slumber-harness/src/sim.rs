// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Simulated hardware sequencer and state register.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use slumber_core::{HardwareError, HardwareSequencer, IdleState, NodeId, StateRegister};

/// Physical transition a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Shallow idle entry.
    EnterIdle,
    /// Shallow idle exit.
    ExitIdle,
    /// Deep idle entry.
    EnterDeepIdle,
    /// Deep idle exit.
    ExitDeepIdle,
}

/// How an injected fault fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Retryable busy response.
    NotReady,
    /// The node goes silent.
    Unresponsive,
    /// Register programming error.
    Fault,
}

impl FaultKind {
    fn error(self, node: NodeId, phase: Phase) -> HardwareError {
        match self {
            Self::NotReady => HardwareError::NotReady { node },
            Self::Unresponsive => HardwareError::Unresponsive { node },
            Self::Fault => HardwareError::Fault(format!("injected {phase:?} fault on node {node}")),
        }
    }
}

/// One injected failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultSpec {
    /// Node the fault fires on.
    pub node: NodeId,
    /// Transition that fails.
    pub phase: Phase,
    /// Failure flavor.
    pub kind: FaultKind,
    /// Number of times to fire; absent means every time.
    #[serde(default)]
    pub times: Option<u32>,
}

/// Latency and faults for a [`SimSequencer`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareProfile {
    /// Delay applied to every transition.
    pub latency_ms: u64,
    /// Faults armed at start.
    pub faults: Vec<FaultSpec>,
}

/// [`HardwareSequencer`] that sleeps for a fixed latency and fails on cue.
#[derive(Debug, Default)]
pub struct SimSequencer {
    latency: Duration,
    faults: Mutex<Vec<FaultSpec>>,
    transitions: AtomicUsize,
}

impl SimSequencer {
    /// Sequencer following `profile`.
    pub fn new(profile: &HardwareProfile) -> Self {
        Self {
            latency: Duration::from_millis(profile.latency_ms),
            faults: Mutex::new(profile.faults.clone()),
            transitions: AtomicUsize::new(0),
        }
    }

    /// Arms another fault.
    pub fn inject(&self, fault: FaultSpec) {
        self.faults.lock().push(fault);
    }

    /// Successful transitions so far.
    pub fn transitions(&self) -> usize {
        self.transitions.load(Ordering::Relaxed)
    }

    fn take_fault(&self, node: NodeId, phase: Phase) -> Option<FaultKind> {
        let mut faults = self.faults.lock();
        let index = faults
            .iter()
            .position(|f| f.node == node && f.phase == phase && f.times != Some(0))?;
        let kind = faults[index].kind;
        match faults[index].times {
            Some(1) => {
                faults.remove(index);
            }
            Some(left) => faults[index].times = Some(left - 1),
            None => {}
        }
        Some(kind)
    }

    async fn step(&self, node: NodeId, phase: Phase) -> Result<(), HardwareError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(kind) = self.take_fault(node, phase) {
            warn!(%node, ?phase, ?kind, "injected hardware fault");
            return Err(kind.error(node, phase));
        }
        self.transitions.fetch_add(1, Ordering::Relaxed);
        debug!(%node, ?phase, "hardware transition");
        Ok(())
    }
}

#[async_trait]
impl HardwareSequencer for SimSequencer {
    async fn enter_idle(&self, node: NodeId) -> Result<(), HardwareError> {
        self.step(node, Phase::EnterIdle).await
    }

    async fn exit_idle(&self, node: NodeId) -> Result<(), HardwareError> {
        self.step(node, Phase::ExitIdle).await
    }

    async fn enter_deep_idle(&self, node: NodeId) -> Result<(), HardwareError> {
        self.step(node, Phase::EnterDeepIdle).await
    }

    async fn exit_deep_idle(&self, node: NodeId) -> Result<(), HardwareError> {
        self.step(node, Phase::ExitDeepIdle).await
    }
}

/// [`StateRegister`] that logs every publish and keeps the latest value.
#[derive(Debug, Default)]
pub struct LogRegister {
    published: Mutex<BTreeMap<NodeId, IdleState>>,
}

impl LogRegister {
    /// Empty register.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest state published for `node`.
    pub fn published(&self, node: NodeId) -> Option<IdleState> {
        self.published.lock().get(&node).copied()
    }
}

#[async_trait]
impl StateRegister for LogRegister {
    async fn publish(&self, node: NodeId, state: IdleState) -> Result<(), HardwareError> {
        info!(%node, %state, "state register");
        self.published.lock().insert(node, state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn fault(times: Option<u32>) -> FaultSpec {
        FaultSpec {
            node: NodeId::new(1),
            phase: Phase::ExitIdle,
            kind: FaultKind::Unresponsive,
            times,
        }
    }

    #[tokio::test]
    async fn counted_faults_expire() {
        let hw = SimSequencer::new(&HardwareProfile {
            latency_ms: 0,
            faults: vec![fault(Some(2))],
        });
        let n = NodeId::new(1);
        assert!(hw.exit_idle(n).await.is_err());
        assert!(hw.enter_idle(n).await.is_ok());
        assert!(hw.exit_idle(n).await.is_err());
        assert!(hw.exit_idle(n).await.is_ok());
        assert_eq!(hw.transitions(), 2);
    }

    #[tokio::test]
    async fn unbounded_faults_persist() {
        let hw = SimSequencer::default();
        hw.inject(fault(None));
        for _ in 0..3 {
            assert_eq!(
                hw.exit_idle(NodeId::new(1)).await,
                Err(HardwareError::Unresponsive { node: NodeId::new(1) })
            );
        }
        assert!(hw.exit_idle(NodeId::new(2)).await.is_ok());
    }

    #[test]
    fn profile_parses_from_json() {
        let json = r#"{
            "latency_ms": 5,
            "faults": [{ "node": 3, "phase": "enter_deep_idle", "kind": "not_ready", "times": 1 }]
        }"#;
        let profile: HardwareProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.latency_ms, 5);
        assert_eq!(profile.faults[0].phase, Phase::EnterDeepIdle);
        assert_eq!(profile.faults[0].kind, FaultKind::NotReady);
    }
}
