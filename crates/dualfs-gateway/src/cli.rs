//! Command line interface

use crate::backend::FileSystemBackend;
use crate::config::GatewayConfig;
use crate::context::CallContext;
use crate::facade::FsGateway;
use crate::memory::MemoryBackend;
use crate::router::DualModeBackend;
use crate::types::Properties;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dualfs_meta::{ClusterAttributeRegistry, FsPath, ModeTable, ProxyPaths};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Command line of the `dualfs-gateway` binary.
#[derive(Parser, Debug)]
#[command(name = "dualfs-gateway")]
#[command(about = "DualFS gateway node tools", long_about = None)]
pub struct Cli {
    /// Node configuration file (.toml or .json).
    #[arg(short, long, env = "DUALFS_CONFIG", default_value = "/etc/dualfs/gateway.toml")]
    pub config: PathBuf,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Validate the configuration, print the effective mode table of every filesystem and
    /// verify that routing over in-memory stores honors it.
    Check,
    /// Print the mode a path resolves to.
    Resolve {
        /// Filesystem name.
        fs: String,
        /// Absolute path inside the filesystem.
        path: String,
    },
    /// Print the hex-encoded attribute record of a filesystem.
    Encode {
        /// Filesystem name.
        fs: String,
    },
}

impl Cli {
    /// Loads the configuration named on the command line.
    pub fn load_config(&self) -> Result<GatewayConfig> {
        GatewayConfig::from_file(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))
    }

    /// Runs the subcommand against `config`, writing results to `out`.
    pub fn run(&self, config: &GatewayConfig, out: &mut impl Write) -> Result<()> {
        config.validate()?;
        let registry = ClusterAttributeRegistry::new(config.node());
        registry.start_local(config.records()?)?;

        match &self.command {
            Command::Check => {
                let runtime = config
                    .build_runtime()
                    .context("failed to build the gateway runtime")?;
                for name in registry.filesystems() {
                    let effective = registry.effective(&name)?;
                    let table = registry.table(&name).snapshot()?.proxy_paths();
                    writeln!(
                        out,
                        "{}: block_size={} group_size={} default={}",
                        name,
                        effective.block_size(),
                        effective.group_size(),
                        table.default_mode
                    )?;
                    for (prefix, mode) in &table.path_modes {
                        writeln!(out, "  {} {}", prefix, mode)?;
                    }
                    verify_routing(
                        &runtime,
                        registry.table(&name),
                        &table,
                        config.secondary_enabled,
                    )
                    .with_context(|| format!("routing check failed for '{}'", name))?;
                }
                writeln!(
                    out,
                    "routing verified on {} worker threads",
                    config.worker_threads
                )?;
            }
            Command::Resolve { fs, path } => {
                let path = FsPath::parse(path)?;
                let mode = registry
                    .table(fs)
                    .resolve(&path)
                    .with_context(|| format!("unknown filesystem '{}'", fs))?;
                writeln!(out, "{}", mode)?;
            }
            Command::Encode { fs } => {
                let record = config
                    .filesystem(fs)
                    .with_context(|| format!("unknown filesystem '{}'", fs))?
                    .to_record()?;
                writeln!(out, "{}", hex::encode(record.encode()?))?;
            }
        }
        Ok(())
    }
}

/// Creates every prefix of `table` through a gateway over in-memory stores and checks that
/// each lands on the stores its mode names.
fn verify_routing(
    runtime: &Runtime,
    modes: ModeTable,
    table: &ProxyPaths,
    secondary_enabled: bool,
) -> Result<()> {
    let primary = Arc::new(MemoryBackend::new(modes.name()));
    let secondary = Arc::new(MemoryBackend::new("secondary"));
    let router = if secondary_enabled {
        DualModeBackend::new(primary.clone(), secondary.clone(), modes.clone())
    } else {
        DualModeBackend::primary_only(primary.clone(), modes.clone())
    };
    let gateway = FsGateway::new(Arc::new(router), runtime.handle().clone())?
        .with_mode_table(modes);

    let ctx = CallContext::new();
    for (prefix, _) in &table.path_modes {
        let _ = gateway.mkdirs(&ctx, prefix, Properties::new())?;
    }
    let router = gateway.backend().clone();
    runtime.block_on(async move { router.flush_mirrors().await });

    for (prefix, mode) in &table.path_modes {
        let on_primary = landed(&primary, prefix)?;
        let on_secondary = landed(&secondary, prefix)?;
        if on_primary != mode.uses_primary() || on_secondary != mode.uses_secondary() {
            anyhow::bail!(
                "{} ({}) landed on primary={} secondary={}",
                prefix,
                mode,
                on_primary,
                on_secondary
            );
        }
    }
    Ok(())
}

fn landed(store: &MemoryBackend, path: &FsPath) -> Result<bool> {
    store
        .exists(path)
        .map_err(|e| anyhow::anyhow!("{}: {}", store.configuration().name, e))
}
