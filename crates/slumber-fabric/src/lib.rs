// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reference fabric for the Slumber idle engine.
//!
//! [`MeshTopology`] keeps a dependency graph between nodes and implements
//! deactivation-set and activation-set search over it. [`MeshConsole`]
//! tracks per-node console sessions.
#![forbid(unsafe_code)]

pub mod console;
pub mod mesh;

pub use console::MeshConsole;
pub use mesh::{MeshLayout, MeshTopology};
