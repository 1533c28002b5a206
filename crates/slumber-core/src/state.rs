// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Per-node state machine and auxiliary status enums.
//!
//! Legal idle-state edges:
//!
//! ```text
//! Active ──► ReadyToIdle ──► Idle ──► DeepIdle
//!   ▲            │            │          │
//!   └────────────┴────────────┴──────────┘   (exit)
//!                │            │          │
//!                └──► Lost ◄──┴──────────┘   (failed wake)
//! Lost ──► Active                            (out-of-band recovery)
//! ```

use serde::{Deserialize, Serialize};

/// Power state of a node as tracked by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdleState {
    /// Fully awake and serving traffic.
    Active,
    /// Claimed by an in-flight idle-entry transaction.
    ReadyToIdle,
    /// Shallow idle; wakes quickly.
    Idle,
    /// Deep idle; rails lowered, slow to wake.
    DeepIdle,
    /// A forced wake failed; unavailable until recovered out of band.
    Lost,
}

impl IdleState {
    /// True when `self -> next` is an edge of the state machine.
    ///
    /// Staying in the same state is not an edge; callers treat it as a no-op.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::ReadyToIdle)
                | (Self::ReadyToIdle, Self::Idle)
                | (Self::Idle, Self::DeepIdle)
                | (
                    Self::ReadyToIdle | Self::Idle | Self::DeepIdle,
                    Self::Active | Self::Lost
                )
                | (Self::Lost, Self::Active)
        )
    }

    /// True when waking the node requires an exit transaction.
    #[must_use]
    pub const fn is_exit_needed(self) -> bool {
        !matches!(self, Self::Active | Self::Lost)
    }

    /// True for the two resting idle states.
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle | Self::DeepIdle)
    }
}

impl core::fmt::Display for IdleState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::ReadyToIdle => "ready-to-idle",
            Self::Idle => "idle",
            Self::DeepIdle => "deep-idle",
            Self::Lost => "lost",
        };
        f.write_str(s)
    }
}

/// Fabric-level reachability, mirrored from the topology layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Reachable over the fabric.
    Connected,
    /// Disconnected for power management.
    Disconnected,
}

/// Externally visible attachment status of a node.
///
/// Only [`Attachment::Attached`] nodes pass the admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Attachment {
    /// Booted and fully attached to the fabric.
    Attached,
    /// Removal in progress.
    Detaching,
    /// Not attached (reset, offline, or removed).
    Detached,
}

/// Status of the power-management control channel to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelState {
    /// Open request sent, options not yet negotiated.
    Connecting,
    /// Negotiated and usable.
    Connected,
    /// No channel.
    Disconnected,
}
