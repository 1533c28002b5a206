// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scenario harness for the Slumber idle engine.
//!
//! Wires an [`IdleEngine`](slumber_core::IdleEngine) to a
//! [`MeshTopology`](slumber_fabric::MeshTopology), a simulated sequencer and
//! a logging state register, then plays JSON scenarios against it.
#![forbid(unsafe_code)]

pub mod scenario;
pub mod sim;

pub use scenario::{Harness, Report, Scenario, Step, StepOutcome};
pub use sim::{FaultKind, FaultSpec, HardwareProfile, LogRegister, Phase, SimSequencer};
