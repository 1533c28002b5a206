// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scenario files and the runner that plays them against an engine.
//!
//! A scenario names a mesh, the nodes on it, a hardware profile and an
//! ordered list of steps. Engine errors are part of the outcome and never
//! stop a run; only a failed `expect` step does.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use slumber_core::{
    Collaborators, EngineConfig, IdleEngine, IdleError, IdleState, NodeId, NodeSnapshot, NodeSpec,
};
use slumber_fabric::{MeshLayout, MeshTopology};

use crate::sim::{FaultSpec, HardwareProfile, LogRegister, SimSequencer};

/// A scripted run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Label used in logs and reports.
    pub name: String,
    /// Engine tuning; replaces the stored config when present.
    pub config: Option<EngineConfig>,
    /// Fabric graph.
    pub mesh: MeshLayout,
    /// Nodes with non-default registration data. Mesh nodes missing here
    /// register with [`NodeSpec::new`].
    pub nodes: Vec<NodeSpec>,
    /// Simulated hardware.
    pub hardware: HardwareProfile,
    /// Steps, in order.
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Parses a scenario from JSON.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("malformed scenario")
    }

    fn specs(&self) -> Vec<NodeSpec> {
        let mut specs = self.nodes.clone();
        let layout = MeshTopology::from_layout(&self.mesh).layout();
        for id in layout.nodes {
            if !specs.iter().any(|s| s.id == id) {
                specs.push(NodeSpec::new(id));
            }
        }
        specs.sort_by_key(|s| s.id);
        specs
    }
}

/// One scenario step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Idle-entry transaction.
    Enter {
        /// Target node.
        node: NodeId,
    },
    /// Idle-exit transaction.
    Exit {
        /// Target node.
        node: NodeId,
        /// Take a reference once awake.
        #[serde(default)]
        acquire: bool,
    },
    /// Take a reference.
    Acquire {
        /// Target node.
        node: NodeId,
        /// Wake the node if needed.
        #[serde(default)]
        force: bool,
    },
    /// Drop a reference.
    Release {
        /// Target node.
        node: NodeId,
    },
    /// Let time pass (deep-idle timers run meanwhile).
    WaitMs {
        /// Milliseconds to wait.
        ms: u64,
    },
    /// Toggle the shallow idle setting.
    SetIdle {
        /// Target node.
        node: NodeId,
        /// New setting.
        enabled: bool,
    },
    /// Toggle the deep idle setting.
    SetDeepIdle {
        /// Target node.
        node: NodeId,
        /// New setting.
        enabled: bool,
    },
    /// Bring a lost node back.
    Recover {
        /// Target node.
        node: NodeId,
    },
    /// Detach a node from the host.
    Detach {
        /// Target node.
        node: NodeId,
    },
    /// Re-attach a node and reopen its control channel.
    Attach {
        /// Target node.
        node: NodeId,
    },
    /// Arm a hardware fault.
    Fault(FaultSpec),
    /// Make a node stop (or resume) acknowledging fabric requests.
    Link {
        /// Target node.
        node: NodeId,
        /// False to drop acknowledgements.
        reachable: bool,
    },
    /// Assert on a node; a mismatch aborts the run.
    Expect {
        /// Node to inspect.
        node: NodeId,
        /// Expected idle state.
        #[serde(default)]
        state: Option<IdleState>,
        /// Expected reference count.
        #[serde(default)]
        ref_count: Option<i32>,
    },
}

/// What one step produced.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    /// Zero-based position in the scenario.
    pub index: usize,
    /// The step itself.
    pub step: Step,
    /// Engine error, if the step failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Scenario name.
    pub name: String,
    /// Per-step outcomes.
    pub steps: Vec<StepOutcome>,
    /// Final view of every node.
    pub nodes: Vec<NodeSnapshot>,
    /// Successful hardware transitions.
    pub transitions: usize,
}

impl Report {
    /// Steps whose engine call failed.
    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> + '_ {
        self.steps.iter().filter(|s| s.error.is_some())
    }
}

/// Engine wired to a mesh and simulated hardware.
pub struct Harness {
    engine: IdleEngine,
    mesh: Arc<MeshTopology>,
    hardware: Arc<SimSequencer>,
    register: Arc<LogRegister>,
}

impl Harness {
    /// Builds the fabric, registers every node and brings it online.
    ///
    /// `config` applies unless the scenario carries its own.
    pub async fn new(scenario: &Scenario, config: EngineConfig) -> Result<Self> {
        let config = scenario.config.clone().unwrap_or(config);
        let mesh = Arc::new(MeshTopology::from_layout(&scenario.mesh));
        let hardware = Arc::new(SimSequencer::new(&scenario.hardware));
        let register = Arc::new(LogRegister::new());
        let engine = IdleEngine::new(
            config,
            Collaborators::new(mesh.clone(), hardware.clone(), register.clone()),
        );
        for spec in scenario.specs() {
            mesh.add_node(spec.id);
            engine
                .register_node(spec)
                .with_context(|| format!("registering node {}", spec.id))?;
            engine.attach(spec.id)?;
            engine.channel_connected(spec.id).await?;
        }
        Ok(Self {
            engine,
            mesh,
            hardware,
            register,
        })
    }

    /// The engine under test.
    pub fn engine(&self) -> &IdleEngine {
        &self.engine
    }

    /// Latest state the register saw for `node`.
    pub fn published(&self, node: NodeId) -> Option<IdleState> {
        self.register.published(node)
    }

    /// Runs one step. The outer error is a failed expectation; the inner
    /// one is whatever the engine returned.
    pub async fn step(&self, step: &Step) -> Result<Result<(), IdleError>> {
        let engine = &self.engine;
        let result = match *step {
            Step::Enter { node } => engine.enter_idle(node).await,
            Step::Exit { node, acquire } => engine.exit_idle(node, acquire).await,
            Step::Acquire { node, force } => engine.acquire(node, force).await,
            Step::Release { node } => engine.release(node),
            Step::WaitMs { ms } => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(())
            }
            Step::SetIdle { node, enabled } => engine.set_idle_enabled(node, enabled).await,
            Step::SetDeepIdle { node, enabled } => {
                engine.set_deep_idle_enabled(node, enabled).await
            }
            Step::Recover { node } => engine.recover_node(node).await,
            Step::Detach { node } => engine.detach(node).await,
            Step::Attach { node } => match engine.attach(node) {
                Ok(()) => engine.channel_connected(node).await,
                Err(err) => Err(err),
            },
            Step::Fault(ref fault) => {
                self.hardware.inject(fault.clone());
                Ok(())
            }
            Step::Link { node, reachable } => {
                self.mesh.set_unreachable(node, !reachable);
                Ok(())
            }
            Step::Expect {
                node,
                state,
                ref_count,
            } => {
                let snap = engine.snapshot(node)?;
                if let Some(want) = state {
                    if snap.idle_state != want {
                        bail!("node {node}: expected {want}, found {}", snap.idle_state);
                    }
                }
                if let Some(want) = ref_count {
                    if snap.ref_count != want {
                        bail!("node {node}: expected ref count {want}, found {}", snap.ref_count);
                    }
                }
                Ok(())
            }
        };
        Ok(result)
    }

    /// Plays every step of `scenario` and reports the final state.
    ///
    /// See [`Harness::new`] for how `config` is chosen.
    pub async fn run(scenario: &Scenario, config: EngineConfig) -> Result<Report> {
        let harness = Self::new(scenario, config).await?;
        info!(name = %scenario.name, steps = scenario.steps.len(), "scenario started");
        let mut steps = Vec::with_capacity(scenario.steps.len());
        for (index, step) in scenario.steps.iter().enumerate() {
            let result = harness
                .step(step)
                .await
                .with_context(|| format!("{}: step {index}", scenario.name))?;
            let error = result.err().map(|err| {
                warn!(index, ?step, %err, "step failed");
                err.to_string()
            });
            steps.push(StepOutcome {
                index,
                step: step.clone(),
                error,
            });
        }
        harness.engine.shutdown();

        let nodes = harness
            .engine
            .nodes()
            .into_iter()
            .filter_map(|id| harness.engine.snapshot(id).ok())
            .collect();
        let report = Report {
            name: scenario.name.clone(),
            steps,
            nodes,
            transitions: harness.hardware.transitions(),
        };
        info!(
            name = %report.name,
            failed = report.failures().count(),
            transitions = report.transitions,
            "scenario finished"
        );
        Ok(report)
    }
}
