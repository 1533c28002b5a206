// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Engine builder wired to the fakes in this crate.

use std::sync::Arc;

use slumber_core::{
    Collaborators, ConsoleLink, EngineConfig, IdleEngine, IdleError, IdleState, NodeId, NodeSpec,
    Topology,
};

use crate::hardware::ScriptedHardware;
use crate::register::RecordingRegister;
use crate::topology::ScriptedTopology;

/// An engine plus handles on its fakes.
#[derive(Clone)]
pub struct Fleet {
    /// Engine under test.
    pub engine: IdleEngine,
    /// Hardware fake the engine drives.
    pub hardware: ScriptedHardware,
    /// State register fake the engine publishes to.
    pub register: RecordingRegister,
    /// Topology fake (unused when the builder was given another topology).
    pub topology: ScriptedTopology,
}

impl Fleet {
    /// State of node `raw`; panics on unknown ids (test helper).
    #[allow(clippy::expect_used)]
    pub fn state(&self, raw: u32) -> IdleState {
        self.engine
            .state(NodeId::new(raw))
            .expect("node registered")
    }

    /// Reference count of node `raw`; panics on unknown ids (test helper).
    #[allow(clippy::expect_used)]
    pub fn refs(&self, raw: u32) -> i32 {
        self.engine
            .ref_count(NodeId::new(raw))
            .expect("node registered")
    }
}

/// Builds a [`Fleet`] of attached, channel-connected nodes.
///
/// # Example
///
/// ```
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// use slumber_dry_tests::FleetBuilder;
/// use slumber_core::IdleState;
///
/// let fleet = FleetBuilder::new().nodes([1, 2]).build().await.unwrap();
/// assert_eq!(fleet.state(1), IdleState::Active);
/// # });
/// ```
#[derive(Default)]
pub struct FleetBuilder {
    specs: Vec<NodeSpec>,
    config: EngineConfig,
    topology: Option<Arc<dyn Topology>>,
    console: Option<Arc<dyn ConsoleLink>>,
}

impl FleetBuilder {
    /// Builder with no nodes and the default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds fully capable nodes with stepping 0.
    pub fn nodes(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.specs
            .extend(ids.into_iter().map(|raw| NodeSpec::new(NodeId::new(raw))));
        self
    }

    /// Adds a node with an explicit spec.
    pub fn spec(mut self, spec: NodeSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `topology` instead of the scripted one.
    pub fn topology(mut self, topology: Arc<dyn Topology>) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Wires a console link.
    pub fn console(mut self, console: Arc<dyn ConsoleLink>) -> Self {
        self.console = Some(console);
        self
    }

    /// Registers, attaches and connects every node.
    pub async fn build(self) -> Result<Fleet, IdleError> {
        let hardware = ScriptedHardware::new();
        let register = RecordingRegister::new();
        let scripted = ScriptedTopology::new();
        let topology: Arc<dyn Topology> = self
            .topology
            .unwrap_or_else(|| Arc::new(scripted.clone()));
        let mut collab = Collaborators::new(
            topology,
            Arc::new(hardware.clone()),
            Arc::new(register.clone()),
        );
        if let Some(console) = self.console {
            collab = collab.with_console(console);
        }
        let engine = IdleEngine::new(self.config, collab);
        for spec in self.specs {
            engine.register_node(spec)?;
            engine.attach(spec.id)?;
            engine.channel_connected(spec.id).await?;
        }
        register.clear();
        Ok(Fleet {
            engine,
            hardware,
            register,
            topology: scripted,
        })
    }
}
