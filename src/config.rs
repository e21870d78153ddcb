//! Kernel configuration loading.
//!
//! Loads `./actuation-kernel.toml` (or `$AK_CONFIG_PATH`). Every section is
//! optional; a missing file yields defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::acv::CouplingPattern;
use crate::audit::external::LeakMode;
use crate::recomposer::RecomposerMode;

/// Env var naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "AK_CONFIG_PATH";

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "actuation-kernel.toml";

// ── Top-level config ────────────────────────────────────────────

/// Top-level kernel configuration loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Identity and logging (`[kernel]`).
    pub kernel: KernelSection,
    /// Per-step resource limits (`[budget]`).
    pub budget: BudgetConfig,
    /// Canonical encoding rules (`[canonical]`).
    pub canonical: CanonicalConfig,
    /// Recomposition mode and allow-list (`[recomposer]`).
    pub recomposer: RecomposerConfig,
    /// Coupling witness selection (`[coupling]`).
    pub coupling: CouplingConfig,
    /// Delegation chain limits (`[delegation]`).
    pub delegation: DelegationConfig,
    /// External telemetry guard (`[external_log]`).
    pub external_log: ExternalLogConfig,
}

impl KernelConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from an explicit TOML file only, no env overrides.
    ///
    /// A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config path using a custom env resolver.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env(CONFIG_PATH_ENV).map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from)
    }

    /// Apply `AK_*` environment overrides.
    ///
    /// Takes a resolver function so tests never touch the process environment.
    /// Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Kernel.
        if let Some(v) = env("AK_KERNEL_ID") {
            self.kernel.kernel_id = v;
        }
        override_parsed(&env, "AK_SEED", |n| self.kernel.seed = Some(n));
        if let Some(v) = env("AK_LOG_LEVEL") {
            self.kernel.log_level = v;
        }

        // Budget.
        override_parsed(&env, "AK_MAX_TICKS", |n| self.budget.max_ticks = n);
        override_parsed(&env, "AK_MAX_NODES", |n| self.budget.max_nodes = n);
        override_parsed(&env, "AK_MAX_BYTES", |n| self.budget.max_bytes = n);

        // Protocol.
        override_parsed(&env, "AK_RECOMPOSER_MODE", |m| self.recomposer.mode = m);
        override_parsed(&env, "AK_COUPLING_PATTERN", |p| self.coupling.pattern = p);
        override_parsed(&env, "AK_MAX_DELEGATION_DEPTH", |n| {
            self.delegation.max_depth = n;
        });
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or fails validation.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str).context("failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the kernel cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.kernel.kernel_id.trim().is_empty() {
            anyhow::bail!("kernel.kernel_id must not be empty");
        }
        if self.canonical.max_depth == 0 {
            anyhow::bail!("canonical.max_depth must be at least 1");
        }
        if self.coupling.merkle_openings == 0 {
            anyhow::bail!("coupling.merkle_openings must be at least 1");
        }
        if self.recomposer.allowed_action_types.is_empty() {
            anyhow::bail!("recomposer.allowed_action_types must not be empty");
        }
        Ok(())
    }
}

fn override_parsed<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    apply: impl FnOnce(T),
) {
    if let Some(v) = env(key) {
        match v.parse() {
            Ok(parsed) => apply(parsed),
            Err(_) => tracing::warn!(var = key, value = %v, "ignoring invalid env override"),
        }
    }
}

// ── Kernel section ──────────────────────────────────────────────

/// Kernel identity settings (`[kernel]`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct KernelSection {
    /// Stable name; the kernel UUID is derived from it.
    pub kernel_id: String,
    /// Seed for deterministic secrets. `None` draws from the OS RNG.
    pub seed: Option<u64>,
    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for KernelSection {
    fn default() -> Self {
        Self {
            kernel_id: "kernel-0".to_owned(),
            seed: None,
            log_level: "info".to_owned(),
        }
    }
}

// ── Budget ──────────────────────────────────────────────────────

/// Per-step resource limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BudgetConfig {
    /// Deterministic time ticks per step.
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,
    /// Trace nodes per step.
    #[serde(default = "default_max_nodes")]
    pub max_nodes: u64,
    /// Nesting depth of scoped regions.
    #[serde(default = "default_max_depth")]
    pub max_depth: u64,
    /// Bytes canonicalized per step.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    /// Abstract work units (hashing, witness generation).
    #[serde(default = "default_max_work")]
    pub max_work: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_ticks: default_max_ticks(),
            max_nodes: default_max_nodes(),
            max_depth: default_max_depth(),
            max_bytes: default_max_bytes(),
            max_work: default_max_work(),
        }
    }
}

// ── Canonical ───────────────────────────────────────────────────

/// Canonical encoding rules.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CanonicalConfig {
    /// Reject NaN and infinities instead of tagging them.
    #[serde(default = "default_true")]
    pub reject_non_finite: bool,
    /// Maximum container nesting.
    #[serde(default = "default_canonical_depth")]
    pub max_depth: usize,
}

impl Default for CanonicalConfig {
    fn default() -> Self {
        Self {
            reject_non_finite: true,
            max_depth: default_canonical_depth(),
        }
    }
}

// ── Recomposer ──────────────────────────────────────────────────

/// Recomposition mode and allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RecomposerConfig {
    /// Marker handling mode.
    #[serde(default)]
    pub mode: RecomposerMode,
    /// Action types the kernel will reconstruct.
    #[serde(default = "default_allowed_actions")]
    pub allowed_action_types: Vec<String>,
    /// Strict mode: maximum argument nesting.
    #[serde(default = "default_strict_depth")]
    pub strict_max_depth: usize,
    /// Strict mode: maximum keys in the top-level argument object.
    #[serde(default = "default_strict_arg_keys")]
    pub strict_max_arg_keys: usize,
}

impl Default for RecomposerConfig {
    fn default() -> Self {
        Self {
            mode: RecomposerMode::default(),
            allowed_action_types: default_allowed_actions(),
            strict_max_depth: default_strict_depth(),
            strict_max_arg_keys: default_strict_arg_keys(),
        }
    }
}

// ── Coupling ────────────────────────────────────────────────────

/// Coupling witness selection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CouplingConfig {
    /// Witness strategy.
    #[serde(default)]
    pub pattern: CouplingPattern,
    /// Pattern A: number of Merkle openings challenged.
    #[serde(default = "default_merkle_openings")]
    pub merkle_openings: usize,
}

impl Default for CouplingConfig {
    fn default() -> Self {
        Self {
            pattern: CouplingPattern::default(),
            merkle_openings: default_merkle_openings(),
        }
    }
}

// ── Delegation ──────────────────────────────────────────────────

/// Delegation chain limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DelegationConfig {
    /// Longest accepted `delegation_chain`.
    #[serde(default = "default_delegation_depth")]
    pub max_depth: usize,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            max_depth: default_delegation_depth(),
        }
    }
}

// ── External log ────────────────────────────────────────────────

/// External telemetry guard.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExternalLogConfig {
    /// Behaviour when a non-whitelisted field is written.
    #[serde(default)]
    pub mode: LeakMode,
    /// Field names allowed to leave the kernel.
    #[serde(default = "default_whitelist")]
    pub whitelist: Vec<String>,
}

impl Default for ExternalLogConfig {
    fn default() -> Self {
        Self {
            mode: LeakMode::default(),
            whitelist: default_whitelist(),
        }
    }
}

// Default value functions for serde

fn default_true() -> bool {
    true
}
fn default_max_ticks() -> u64 {
    1_000_000
}
fn default_max_nodes() -> u64 {
    1_024
}
fn default_max_depth() -> u64 {
    64
}
fn default_max_bytes() -> u64 {
    1_048_576
}
fn default_max_work() -> u64 {
    100_000
}
fn default_canonical_depth() -> usize {
    128
}
fn default_strict_depth() -> usize {
    16
}
fn default_strict_arg_keys() -> usize {
    64
}
fn default_merkle_openings() -> usize {
    3
}
fn default_delegation_depth() -> usize {
    2
}
fn default_allowed_actions() -> Vec<String> {
    ["noop", "wait", "move", "read", "write", "query"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
}
fn default_whitelist() -> Vec<String> {
    [
        "event",
        "kernel_id",
        "entry_type",
        "sequence_number",
        "decision",
        "error_code",
        "invariant",
        "action_type",
        "anchor_id",
        "certificate_id",
        "budget_kind",
        "verdict",
        "timestamp",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect()
}
