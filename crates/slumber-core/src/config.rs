// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Engine tuning and per-node registration data.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ident::NodeId;

/// Config key under which [`EngineConfig`] is persisted.
pub const ENGINE_CONFIG_KEY: &str = "engine";

/// Default dwell before a deep-idle attempt, in milliseconds.
pub const DEFAULT_DEEP_IDLE_DWELL_MS: u64 = 10_000;

/// Tunables for an [`IdleEngine`](crate::IdleEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Time a node must stay idle before a deep-idle attempt.
    pub deep_idle_dwell_ms: u64,
    /// Lowest hardware stepping allowed to enter deep idle.
    pub deep_idle_min_stepping: u32,
    /// Steppings at or above the minimum that still must not deep idle.
    pub deep_idle_excluded_steppings: Vec<u32>,
    /// Let the fabric pull ready-to-idle dependencies into the set.
    pub maximal_deactivation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deep_idle_dwell_ms: DEFAULT_DEEP_IDLE_DWELL_MS,
            deep_idle_min_stepping: 0,
            deep_idle_excluded_steppings: Vec::new(),
            maximal_deactivation: true,
        }
    }
}

impl EngineConfig {
    /// Dwell as a [`Duration`].
    pub fn deep_idle_dwell(&self) -> Duration {
        Duration::from_millis(self.deep_idle_dwell_ms)
    }

    /// Returns a copy with the given dwell.
    pub fn with_deep_idle_dwell(mut self, dwell: Duration) -> Self {
        self.deep_idle_dwell_ms = u64::try_from(dwell.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// True when hardware of `stepping` may enter deep idle.
    pub fn stepping_allows_deep_idle(&self, stepping: u32) -> bool {
        stepping >= self.deep_idle_min_stepping
            && !self.deep_idle_excluded_steppings.contains(&stepping)
    }
}

/// Static description of a node handed to the registry.
///
/// The capability flags are what the node negotiated when its control
/// channel opened; operator settings start equal to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Node identifier.
    pub id: NodeId,
    /// Hardware revision.
    #[serde(default)]
    pub stepping: u32,
    /// Node supports shallow idle.
    #[serde(default = "enabled")]
    pub idle_capable: bool,
    /// Node supports deep idle.
    #[serde(default = "enabled")]
    pub deep_idle_capable: bool,
}

const fn enabled() -> bool {
    true
}

impl NodeSpec {
    /// Node capable of both idle levels with stepping 0.
    pub const fn new(id: NodeId) -> Self {
        Self {
            id,
            stepping: 0,
            idle_capable: true,
            deep_idle_capable: true,
        }
    }

    /// Sets the hardware revision.
    pub const fn with_stepping(mut self, stepping: u32) -> Self {
        self.stepping = stepping;
        self
    }

    /// Sets the negotiated capabilities.
    pub const fn with_capabilities(mut self, idle: bool, deep_idle: bool) -> Self {
        self.idle_capable = idle;
        self.deep_idle_capable = deep_idle;
        self
    }
}
