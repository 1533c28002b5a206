// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config storage for Slumber tools.
//! [`ConfigService`] speaks JSON; stores only move bytes.
#![forbid(unsafe_code)]

pub mod fs;
pub mod service;
pub mod store;

pub use fs::FsConfigStore;
pub use service::ConfigService;
pub use store::{validate_key, ConfigError, ConfigStore};
