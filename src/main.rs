//! Actuation kernel CLI entry point.
//!
//! Provides `demo`, `verify` and `probe` subcommands for running the reference
//! scenario, checking an exported audit chain and analysing it offline.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use actuation_kernel::audit::{enforce_k7_on, read_jsonl, write_jsonl, AuditEntry};
use actuation_kernel::canonical::Canonicalizer;
use actuation_kernel::config::KernelConfig;
use actuation_kernel::demo::run_demo;
use actuation_kernel::probe::ProbeEngine;

/// Actuation kernel: commit-anchor-reveal gating with a hash-chained audit trail.
#[derive(Parser)]
#[command(name = "actuation-kernel", version, about)]
struct Cli {
    /// Configuration file (defaults to `$AK_CONFIG_PATH` or `./actuation-kernel.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the end-to-end scenario and print the probe report.
    Demo {
        /// Seed for the authority secret, anchor material and nonce.
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Write the audit chain here as JSON Lines.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Also write JSON logs with daily rotation into this directory.
        #[arg(long)]
        logs_dir: Option<PathBuf>,
    },
    /// Verify the hash chain of an exported audit log (K7).
    Verify {
        /// JSON Lines audit export.
        log: PathBuf,
    },
    /// Run the probes over an exported audit log.
    Probe {
        /// JSON Lines audit export.
        log: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let _logging_guard = match &cli.command {
        Command::Demo {
            logs_dir: Some(dir),
            ..
        } => Some(actuation_kernel::logging::init_production(dir, &config.kernel.log_level)?),
        _ => {
            actuation_kernel::logging::init_cli(&config.kernel.log_level);
            None
        }
    };

    match cli.command {
        Command::Demo { seed, out, .. } => handle_demo(config, seed, out.as_deref()),
        Command::Verify { log } => handle_verify(&config, &log),
        Command::Probe { log } => handle_probe(&config, &log),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<KernelConfig> {
    match path {
        Some(p) => {
            let mut config = KernelConfig::load_from(p)
                .with_context(|| format!("failed to load {}", p.display()))?;
            config.apply_overrides(|k| std::env::var(k).ok());
            config.validate()?;
            Ok(config)
        }
        None => KernelConfig::load().context("failed to load configuration"),
    }
}

fn read_log(path: &Path) -> anyhow::Result<Vec<AuditEntry>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    read_jsonl(BufReader::new(file)).with_context(|| format!("failed to parse {}", path.display()))
}

/// Run the scenario, optionally export the chain, print the report.
fn handle_demo(mut config: KernelConfig, seed: u64, out: Option<&Path>) -> anyhow::Result<()> {
    config.kernel.seed = Some(seed);
    let outcome = run_demo(config).context("demo scenario failed")?;
    info!(
        certificate_id = %outcome.certificate.certificate_id(),
        entries = outcome.entries.len(),
        "demo complete"
    );

    if let Some(path) = out {
        let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        write_jsonl(&outcome.entries, BufWriter::new(file))?;
        info!(path = %path.display(), "audit chain written");
    }

    println!("{}", serde_json::to_string_pretty(&outcome.report)?);
    Ok(())
}

/// Re-verify an exported chain.
fn handle_verify(config: &KernelConfig, log: &Path) -> anyhow::Result<()> {
    let entries = read_log(log)?;
    let canon = Canonicalizer::new(config.canonical.clone());
    enforce_k7_on(&entries, &canon)?;
    println!("audit chain OK: {} entries", entries.len());
    Ok(())
}

/// Probe an exported chain without a live kernel.
fn handle_probe(config: &KernelConfig, log: &Path) -> anyhow::Result<()> {
    let entries = read_log(log)?;
    let canon = Canonicalizer::new(config.canonical.clone());
    if let Err(e) = enforce_k7_on(&entries, &canon) {
        tracing::warn!(error = %e, "probing an audit chain that does not verify");
    }
    let report = ProbeEngine::new(config.delegation.max_depth).run(&entries, None);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
