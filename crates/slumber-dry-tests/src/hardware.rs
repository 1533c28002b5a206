// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scripted hardware sequencer with failure injection.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use slumber_core::{HardwareError, HardwareSequencer, NodeId};

/// One of the four physical transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HardwareStep {
    /// Shallow idle entry.
    EnterIdle,
    /// Shallow idle exit.
    ExitIdle,
    /// Deep idle entry.
    EnterDeepIdle,
    /// Deep idle exit.
    ExitDeepIdle,
}

/// A recorded sequencer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareCall {
    /// Target node.
    pub node: NodeId,
    /// Requested transition.
    pub step: HardwareStep,
}

#[derive(Debug, Clone)]
enum Failure {
    Always(HardwareError),
    Queue(VecDeque<HardwareError>),
}

/// [`HardwareSequencer`] that succeeds unless told otherwise.
///
/// Every call is logged, failed ones included.
///
/// # Example
///
/// ```
/// use slumber_dry_tests::{HardwareStep, ScriptedHardware};
/// use slumber_core::{HardwareError, NodeId};
///
/// let hw = ScriptedHardware::new();
/// let node = NodeId::new(3);
/// hw.fail(node, HardwareStep::EnterIdle, HardwareError::Unresponsive { node });
/// assert_eq!(hw.count(HardwareStep::EnterIdle), 0);
/// ```
#[derive(Clone, Default)]
pub struct ScriptedHardware {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    calls: Vec<HardwareCall>,
    failures: BTreeMap<(NodeId, HardwareStep), Failure>,
    latency: Option<Duration>,
}

impl ScriptedHardware {
    /// Sequencer where every step succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes every `step` on `node` fail with `error` until cleared.
    pub fn fail(&self, node: NodeId, step: HardwareStep, error: HardwareError) {
        self.lock()
            .failures
            .insert((node, step), Failure::Always(error));
    }

    /// Makes the next `step` on `node` fail with `error`, then succeed.
    ///
    /// Repeated calls queue further one-shot failures.
    pub fn fail_once(&self, node: NodeId, step: HardwareStep, error: HardwareError) {
        let mut inner = self.lock();
        match inner.failures.get_mut(&(node, step)) {
            Some(Failure::Queue(queue)) => queue.push_back(error),
            _ => {
                inner
                    .failures
                    .insert((node, step), Failure::Queue(VecDeque::from([error])));
            }
        }
    }

    /// Removes injected failures for `step` on `node`.
    pub fn clear(&self, node: NodeId, step: HardwareStep) {
        self.lock().failures.remove(&(node, step));
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// All calls so far, oldest first.
    pub fn calls(&self) -> Vec<HardwareCall> {
        self.lock().calls.clone()
    }

    /// Number of calls of `step` across all nodes.
    pub fn count(&self, step: HardwareStep) -> usize {
        self.lock().calls.iter().filter(|c| c.step == step).count()
    }

    /// Number of calls of `step` on `node`.
    pub fn count_for(&self, node: NodeId, step: HardwareStep) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.node == node && c.step == step)
            .count()
    }

    async fn run(&self, node: NodeId, step: HardwareStep) -> Result<(), HardwareError> {
        let latency = {
            let mut inner = self.lock();
            inner.calls.push(HardwareCall { node, step });
            inner.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut inner = self.lock();
        let result = match inner.failures.get_mut(&(node, step)) {
            Some(Failure::Always(err)) => Err(err.clone()),
            Some(Failure::Queue(queue)) => queue.pop_front().map_or(Ok(()), Err),
            None => Ok(()),
        };
        drop(inner);
        result
    }
}

#[async_trait]
impl HardwareSequencer for ScriptedHardware {
    async fn enter_idle(&self, node: NodeId) -> Result<(), HardwareError> {
        self.run(node, HardwareStep::EnterIdle).await
    }

    async fn exit_idle(&self, node: NodeId) -> Result<(), HardwareError> {
        self.run(node, HardwareStep::ExitIdle).await
    }

    async fn enter_deep_idle(&self, node: NodeId) -> Result<(), HardwareError> {
        self.run(node, HardwareStep::EnterDeepIdle).await
    }

    async fn exit_deep_idle(&self, node: NodeId) -> Result<(), HardwareError> {
        self.run(node, HardwareStep::ExitDeepIdle).await
    }
}
