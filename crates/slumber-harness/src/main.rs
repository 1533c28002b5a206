// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! slumber-harness: plays idle-engine scenarios against a simulated fabric.
//!
//! Engine tuning comes from `engine.json` in the config directory (the
//! platform config dir unless `--config-dir` is given); a scenario's own
//! `config` block takes precedence.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slumber_config::{ConfigService, FsConfigStore};
use slumber_core::EngineConfig;
use slumber_harness::{Harness, Scenario};

#[derive(Parser, Debug)]
#[command(author, version, about = "Slumber idle-engine scenario harness")]
struct Args {
    /// Scenario files (JSON)
    #[arg(required = true)]
    scenarios: Vec<PathBuf>,
    /// Directory holding engine.json
    #[arg(long)]
    config_dir: Option<PathBuf>,
    /// Write the effective engine config back to the config directory
    #[arg(long)]
    save_config: bool,
    /// Print a JSON report per scenario on stdout
    #[arg(long)]
    report: bool,
}

fn config_service(dir: Option<&Path>) -> Result<Option<ConfigService<FsConfigStore>>> {
    match dir {
        Some(dir) => {
            let store = FsConfigStore::at(dir)
                .with_context(|| format!("opening config dir {}", dir.display()))?;
            Ok(Some(ConfigService::new(store)))
        }
        // Best effort: no platform dir just means defaults.
        None => Ok(FsConfigStore::new()
            .map(ConfigService::new)
            .map_err(|err| warn!(%err, "no config store; using defaults"))
            .ok()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = config_service(args.config_dir.as_deref())?;
    let stored = match &config {
        Some(service) => service.engine_config().context("loading engine config")?,
        None => EngineConfig::default(),
    };
    if args.save_config {
        if let Some(service) = &config {
            service
                .save_engine_config(&stored)
                .context("saving engine config")?;
            info!(dir = %service.store().base().display(), "engine config saved");
        }
    }

    for path in &args.scenarios {
        let bytes =
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let mut scenario = Scenario::from_json(&bytes)
            .with_context(|| format!("parsing {}", path.display()))?;
        if scenario.name.is_empty() {
            scenario.name = path.display().to_string();
        }
        let report = Harness::run(&scenario, stored.clone()).await?;
        if args.report {
            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, &report)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}
