//! Kernel-local action recomposition.
//!
//! An external proposal is treated purely as data. The recomposer scans it
//! for delegation and object-wrapping markers, rejects early depending on the
//! mode, rebuilds a brand-new action from an allow-listed type and a fresh
//! copy of the arguments, and only then asks the authority for a binding over
//! the *reconstructed* action.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::authority::ActuationSigner;
use crate::budget::{BudgetError, BudgetTracker, OperationKind};
use crate::canonical::Canonicalizer;
use crate::config::RecomposerConfig;
use crate::types::{ActuationBinding, RecomposedAction};

// ---------------------------------------------------------------------------
// Markers and modes
// ---------------------------------------------------------------------------

/// Field names that indicate a pre-authorized or delegated object.
pub const DELEGATION_MARKERS: &[&str] = &[
    "authority_token",
    "delegation_token",
    "delegated_authority",
    "delegate_authority",
    "actuation_binding",
    "actuation_certificate",
    "binding_signature",
    "pre_authorized",
    "preauthorized",
    "kernel_signature",
    "capability_token",
    "sovereign_authority",
    "k_act_key",
    "signed_action",
];

/// Field names that indicate an opaque object handed through.
pub const WRAPPING_MARKERS: &[&str] = &[
    "wrapped_action",
    "__wrapped__",
    "action_object",
    "proxy_action",
    "passthrough",
    "raw_action",
    "__class__",
    "__reduce__",
    "__getstate__",
];

/// Top-level proposal members accepted in strict mode.
const KNOWN_TOP_LEVEL: &[&str] = &["request", "trace", "delegation_chain", "metadata"];

/// How markers and structural anomalies are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecomposerMode {
    /// Reject on any marker.
    #[default]
    Hardened,
    /// Ignore markers, strip them and reconstruct.
    Soft,
    /// Hardened plus structural stress checks.
    Strict,
}

impl FromStr for RecomposerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hardened" => Ok(Self::Hardened),
            "soft" => Ok(Self::Soft),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown recomposer mode: {other}")),
        }
    }
}

/// Which denylist a marker came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerClass {
    /// Delegated authority.
    Delegation,
    /// Wrapped object.
    Wrapping,
}

/// A marker found in a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerHit {
    /// JSON path of the marker field.
    pub path: String,
    /// Field name as written.
    pub field: String,
    /// Marker class.
    pub class: MarkerClass,
}

fn classify(key: &str) -> Option<MarkerClass> {
    let normalized = key.trim().to_ascii_lowercase().replace('-', "_");
    if DELEGATION_MARKERS.contains(&normalized.as_str()) {
        Some(MarkerClass::Delegation)
    } else if WRAPPING_MARKERS.contains(&normalized.as_str()) {
        Some(MarkerClass::Wrapping)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Sanitized error code safe for external logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecompositionErrorCode {
    /// Proposal was not well-formed.
    ProposalParse,
    /// Action could not be rebuilt.
    ActionReconstruction,
    /// Delegation or wrapping markers found.
    DelegationAuthority,
}

impl RecompositionErrorCode {
    /// Stable code string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProposalParse => "PROPOSAL_PARSE",
            Self::ActionReconstruction => "ACTION_RECONSTRUCTION",
            Self::DelegationAuthority => "DELEGATION_AUTHORITY",
        }
    }
}

/// Recomposition failures. Raised before any binding is requested.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecompositionError {
    /// The proposal is not a well-formed proposal object.
    #[error("proposal parse error: {reason}")]
    ProposalParse {
        /// What was wrong.
        reason: String,
    },

    /// The action could not be rebuilt from validated primitives.
    #[error("action reconstruction error: {reason}")]
    ActionReconstruction {
        /// What was wrong.
        reason: String,
    },

    /// The proposal carries delegation or wrapping markers.
    #[error("delegation authority markers present: {} found", .markers.len())]
    DelegationAuthority {
        /// Every marker found.
        markers: Vec<MarkerHit>,
    },

    /// Scanning ran out of budget.
    #[error(transparent)]
    Budget(#[from] BudgetError),
}

impl RecompositionError {
    /// Sanitized code; `None` for budget exhaustion, which is an abstention.
    #[must_use]
    pub fn code(&self) -> Option<RecompositionErrorCode> {
        match self {
            Self::ProposalParse { .. } => Some(RecompositionErrorCode::ProposalParse),
            Self::ActionReconstruction { .. } => Some(RecompositionErrorCode::ActionReconstruction),
            Self::DelegationAuthority { .. } => Some(RecompositionErrorCode::DelegationAuthority),
            Self::Budget(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Result of scanning a proposal as data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProposalAnalysis {
    /// `request.intent.action` is a string and `args` is an object or absent.
    pub structurally_valid: bool,
    /// Declared action type, if any.
    pub action_type: Option<String>,
    /// Markers found anywhere in the proposal.
    pub markers: Vec<MarkerHit>,
    /// Deepest container nesting seen.
    pub max_depth: usize,
    /// Paths of keys starting with `__`.
    pub reserved_keys: Vec<String>,
    /// Top-level members outside the known set.
    pub unknown_top_level: Vec<String>,
}

/// Everything produced by a successful recomposition.
#[derive(Debug, Clone)]
pub struct RecompositionResult {
    /// The rebuilt action.
    pub action: RecomposedAction,
    /// Binding over the rebuilt action's hash.
    pub binding: ActuationBinding,
    /// Scan result that led to admission.
    pub analysis: ProposalAnalysis,
}

/// Collaborators borrowed for one recomposition.
pub struct RecomposeContext<'a> {
    /// Canonicalizer for action hashing.
    pub canon: &'a Canonicalizer,
    /// Per-step budget.
    pub budget: &'a mut BudgetTracker,
    /// Authority asked for the binding.
    pub signer: &'a mut dyn ActuationSigner,
    /// Canonical hash of the external proposal.
    pub source_proposal_hash: &'a str,
    /// Logical time stamped on the action.
    pub timestamp: u64,
}

fn intent(proposal: &Value) -> Option<&Map<String, Value>> {
    proposal.get("request")?.get("intent")?.as_object()
}

fn scan(
    value: &Value,
    path: &str,
    depth: usize,
    budget: &mut BudgetTracker,
    out: &mut ProposalAnalysis,
) -> Result<(), BudgetError> {
    budget.charge_operation(OperationKind::Scan, 0)?;
    out.max_depth = out.max_depth.max(depth);
    match value {
        Value::Object(map) => {
            let mut guard = budget.enter_depth()?;
            for (key, child) in map {
                let child_path = format!("{path}.{key}");
                if let Some(class) = classify(key) {
                    out.markers.push(MarkerHit {
                        path: child_path.clone(),
                        field: key.clone(),
                        class,
                    });
                }
                if key.starts_with("__") {
                    out.reserved_keys.push(child_path.clone());
                }
                scan(child, &child_path, depth.saturating_add(1), &mut guard, out)?;
            }
        }
        Value::Array(items) => {
            let mut guard = budget.enter_depth()?;
            for (i, child) in items.iter().enumerate() {
                scan(
                    child,
                    &format!("{path}[{i}]"),
                    depth.saturating_add(1),
                    &mut guard,
                    out,
                )?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn nesting(value: &Value) -> usize {
    match value {
        Value::Object(map) => map
            .values()
            .map(nesting)
            .max()
            .unwrap_or(0)
            .saturating_add(1),
        Value::Array(items) => items
            .iter()
            .map(nesting)
            .max()
            .unwrap_or(0)
            .saturating_add(1),
        _ => 0,
    }
}

/// Fresh copy of `value`, optionally dropping marker keys at every level.
fn rebuild(value: &Value, strip_markers: bool) -> Value {
    match value {
        Value::Object(map) => {
            let mut fresh = Map::new();
            for (key, child) in map {
                if strip_markers && classify(key).is_some() {
                    continue;
                }
                fresh.insert(key.clone(), rebuild(child, strip_markers));
            }
            Value::Object(fresh)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| rebuild(v, strip_markers)).collect()),
        Value::String(s) => Value::String(s.clone()),
        Value::Number(n) => Value::Number(n.clone()),
        Value::Bool(b) => Value::Bool(*b),
        Value::Null => Value::Null,
    }
}

// ---------------------------------------------------------------------------
// Recomposer
// ---------------------------------------------------------------------------

/// Rebuilds actions from untrusted proposals.
#[derive(Debug, Clone)]
pub struct Recomposer {
    config: RecomposerConfig,
}

impl Recomposer {
    /// Create a recomposer with the given mode and allow-list.
    #[must_use]
    pub fn new(config: RecomposerConfig) -> Self {
        Self { config }
    }

    /// Active mode.
    #[must_use]
    pub fn mode(&self) -> RecomposerMode {
        self.config.mode
    }

    /// Scan `proposal` as data without judging it.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetError`] if the scan exhausts the step budget.
    pub fn analyze(
        &self,
        proposal: &Value,
        budget: &mut BudgetTracker,
    ) -> Result<ProposalAnalysis, BudgetError> {
        let mut out = ProposalAnalysis::default();
        scan(proposal, "$", 0, budget, &mut out)?;
        if let Some(top) = proposal.as_object() {
            out.unknown_top_level = top
                .keys()
                .filter(|k| !KNOWN_TOP_LEVEL.contains(&k.as_str()))
                .cloned()
                .collect();
        }
        if let Some(intent) = intent(proposal) {
            out.action_type = intent.get("action").and_then(Value::as_str).map(str::to_owned);
            let args_ok = intent.get("args").map_or(true, Value::is_object);
            out.structurally_valid = out.action_type.is_some() && args_ok;
        }
        Ok(out)
    }

    /// Analyze, gate, rebuild and bind.
    ///
    /// # Errors
    ///
    /// Returns [`RecompositionError`] for malformed proposals, disallowed
    /// action types, markers (hardened and strict modes), strict-mode
    /// structural violations or budget exhaustion.
    pub fn recompose(
        &self,
        proposal: &Value,
        ctx: RecomposeContext<'_>,
    ) -> Result<RecompositionResult, RecompositionError> {
        let analysis = self.analyze(proposal, ctx.budget)?;

        if !proposal.is_object() {
            return Err(RecompositionError::ProposalParse {
                reason: "proposal is not an object".to_owned(),
            });
        }
        if self.config.mode != RecomposerMode::Soft && !analysis.markers.is_empty() {
            tracing::warn!(
                markers = analysis.markers.len(),
                mode = ?self.config.mode,
                "delegation markers in proposal"
            );
            return Err(RecompositionError::DelegationAuthority {
                markers: analysis.markers,
            });
        }
        if !analysis.structurally_valid {
            return Err(RecompositionError::ProposalParse {
                reason: "expected request.intent.action string and object args".to_owned(),
            });
        }
        if self.config.mode == RecomposerMode::Strict {
            self.strict_checks(proposal, &analysis)?;
        }

        let action_type = analysis.action_type.clone().unwrap_or_default();
        if !self.config.allowed_action_types.contains(&action_type) {
            return Err(RecompositionError::ActionReconstruction {
                reason: format!("action type `{action_type}` is not allow-listed"),
            });
        }

        let strip = self.config.mode == RecomposerMode::Soft;
        let action_args = intent(proposal)
            .and_then(|i| i.get("args"))
            .map_or_else(|| Value::Object(Map::new()), |args| rebuild(args, strip));

        let action_hash = RecomposedAction::compute_hash(ctx.canon, &action_type, &action_args)
            .map_err(|e| RecompositionError::ActionReconstruction {
                reason: e.to_string(),
            })?;
        ctx.budget.charge_operation(OperationKind::Hash, 0)?;

        let action = RecomposedAction {
            action_type,
            action_args,
            action_hash,
            source_proposal_hash: ctx.source_proposal_hash.to_owned(),
            timestamp: ctx.timestamp,
        };

        ctx.budget.charge_operation(OperationKind::Bind, 0)?;
        let binding = ctx.signer.bind_to_action(&action.action_hash);
        tracing::debug!(action_type = %action.action_type, "action recomposed");
        Ok(RecompositionResult {
            action,
            binding,
            analysis,
        })
    }

    fn strict_checks(
        &self,
        proposal: &Value,
        analysis: &ProposalAnalysis,
    ) -> Result<(), RecompositionError> {
        if let Some(first) = analysis.reserved_keys.first() {
            return Err(RecompositionError::ProposalParse {
                reason: format!("reserved key at {first}"),
            });
        }
        if let Some(first) = analysis.unknown_top_level.first() {
            return Err(RecompositionError::ProposalParse {
                reason: format!("unknown top-level field `{first}`"),
            });
        }
        if let Some(args) = intent(proposal).and_then(|i| i.get("args")) {
            let depth = nesting(args);
            if depth > self.config.strict_max_depth {
                return Err(RecompositionError::ProposalParse {
                    reason: format!(
                        "argument nesting {depth} exceeds {}",
                        self.config.strict_max_depth
                    ),
                });
            }
            let keys = args.as_object().map_or(0, Map::len);
            if keys > self.config.strict_max_arg_keys {
                return Err(RecompositionError::ProposalParse {
                    reason: format!(
                        "{keys} argument keys exceed {}",
                        self.config.strict_max_arg_keys
                    ),
                });
            }
        }
        Ok(())
    }
}
