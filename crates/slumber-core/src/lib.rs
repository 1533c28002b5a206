// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Slumber core: transactional idle-state management for compute nodes that
//! share a fabric.
//!
//! A node may only idle when nothing that depends on it is still awake, and
//! any node can be woken on demand. [`IdleEngine`] coordinates this:
//!
//! - [`IdleEngine::enter_idle`] stages a [`DependencyMatrix`], asks the
//!   [`Topology`] for the deactivation set, disconnects it, claims every
//!   member through the reference gate and sequences the hardware. Any
//!   failure rolls the whole set back.
//! - [`IdleEngine::exit_idle`] wakes a node plus everything it needs, at a
//!   priority that pre-empts queued entries. Members that will not wake are
//!   marked [`IdleState::Lost`].
//! - A successful entry arms a cancellable deep-idle timer.
//!
//! Hardware, topology, console and state-register access are injected as
//! the async traits in [`fabric`].
#![forbid(unsafe_code)]

mod deep_idle;
mod engine;
mod entry;
mod exit;
mod gate;

pub mod config;
pub mod error;
pub mod fabric;
pub mod ident;
pub mod lock;
pub mod matrix;
pub mod registry;
pub mod state;

pub use config::{EngineConfig, NodeSpec, DEFAULT_DEEP_IDLE_DWELL_MS, ENGINE_CONFIG_KEY};
pub use engine::IdleEngine;
pub use error::{IdleError, Rejection};
pub use fabric::{
    Collaborators, ConsoleLink, FabricError, HardwareError, HardwareSequencer, NoConsole,
    StateRegister, Topology,
};
pub use ident::{NodeId, NodeSet, HOST_NODE};
pub use lock::Transition;
pub use matrix::{DepState, DependencyMatrix};
pub use registry::{NodeRegistry, NodeSnapshot, RefAdjust, RefOutcome, MARKED_IDLE};
pub use state::{Attachment, ChannelState, ConnectionState, IdleState};
