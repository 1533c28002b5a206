// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for Slumber crates.
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`fleet`] - Engine builder wired to the fakes below
//! - [`hardware`] - Scripted hardware sequencer with failure injection
//! - [`register`] - State register that records every publish
//! - [`topology`] - Topology with scripted deactivation/activation sets
#![forbid(unsafe_code)]

pub mod config;
pub mod fleet;
pub mod hardware;
pub mod register;
pub mod topology;

pub use config::InMemoryConfigStore;
pub use fleet::{Fleet, FleetBuilder};
pub use hardware::{HardwareCall, HardwareStep, ScriptedHardware};
pub use register::RecordingRegister;
pub use topology::{ScriptedTopology, TopologyCall};
