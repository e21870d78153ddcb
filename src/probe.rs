//! Post-hoc bypass probes.
//!
//! The probes read an exported audit chain and, when available, a live
//! [`KernelSnapshot`]. They never touch the kernel itself, so the same report
//! can be produced offline from a JSON Lines export.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::audit::{AuditEntry, EntryType};

/// Live kernel state the probes can use as extra evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSnapshot {
    /// Instance id.
    pub kernel_id: Uuid,
    /// Anchors issued.
    pub anchors_issued: usize,
    /// Anchors consumed by a certificate.
    pub anchors_used: usize,
    /// Anchors never consumed.
    pub buried_anchor_ids: Vec<Uuid>,
    /// Bypass operations attempted.
    pub temptation_count: u64,
    /// Bindings the authority produced.
    pub bindings_issued: u64,
    /// Commitments per ACV state.
    pub acv_states: BTreeMap<String, usize>,
    /// Audit chain length.
    pub audit_entries: usize,
    /// Configured delegation limit.
    pub max_delegation_depth: usize,
}

/// Probe identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// Calls to operations that always refuse.
    BypassTemptation,
    /// Attempts to consume an anchor twice.
    AnchorReuse,
    /// Anchors never consumed by a certificate.
    AnchorBurial,
    /// Delegation chains beyond the limit or with broken metadata.
    DelegationLaundering,
}

impl ProbeKind {
    /// Every probe, in report order.
    pub const ALL: [Self; 4] = [
        Self::BypassTemptation,
        Self::AnchorReuse,
        Self::AnchorBurial,
        Self::DelegationLaundering,
    ];
}

/// How bad a probe finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Nothing found.
    Info,
    /// Soft anomaly.
    Warning,
    /// Hard invariant breach.
    Violation,
}

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Whether anything was found.
    pub detected: bool,
    /// Severity of the finding.
    pub severity: Severity,
    /// One item per finding.
    pub evidence: Vec<Value>,
}

impl ProbeResult {
    fn from_evidence(evidence: Vec<Value>, severity_if_found: Severity) -> Self {
        let detected = !evidence.is_empty();
        Self {
            detected,
            severity: if detected { severity_if_found } else { Severity::Info },
            evidence,
        }
    }
}

/// Overall classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    /// No findings.
    Clean,
    /// Only soft anomalies.
    Warning,
    /// At least one hard breach.
    Violation,
}

/// Counts across all probes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSummary {
    /// Probes run.
    pub total_probes: usize,
    /// Probes at violation severity.
    pub violations: usize,
    /// Probes at warning severity.
    pub warnings: usize,
    /// Probes with nothing found.
    pub clean: usize,
}

/// Full probe report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Counts.
    pub summary: ProbeSummary,
    /// Per-probe results.
    pub probes: BTreeMap<ProbeKind, ProbeResult>,
    /// Overall classification.
    pub verdict: Verdict,
}

impl ProbeReport {
    fn from_results(probes: BTreeMap<ProbeKind, ProbeResult>) -> Self {
        let count = |s: Severity| probes.values().filter(|p| p.severity == s).count();
        let violations = count(Severity::Violation);
        let warnings = count(Severity::Warning);
        let verdict = if violations > 0 {
            Verdict::Violation
        } else if warnings > 0 {
            Verdict::Warning
        } else {
            Verdict::Clean
        };
        Self {
            summary: ProbeSummary {
                total_probes: probes.len(),
                violations,
                warnings,
                clean: probes.values().filter(|p| !p.detected).count(),
            },
            probes,
            verdict,
        }
    }

    /// Result for one probe.
    #[must_use]
    pub fn probe(&self, kind: ProbeKind) -> Option<&ProbeResult> {
        self.probes.get(&kind)
    }
}

fn field<'a>(entry: &'a AuditEntry, name: &str) -> Option<&'a str> {
    entry.payload.get(name).and_then(Value::as_str)
}

fn of_type(entries: &[AuditEntry], t: EntryType) -> impl Iterator<Item = &AuditEntry> {
    entries.iter().filter(move |e| e.entry_type == t)
}

fn violation_tagged<'a>(entries: &'a [AuditEntry], tags: &'a [&'a str]) -> impl Iterator<Item = &'a AuditEntry> {
    of_type(entries, EntryType::InvariantViolation)
        .filter(move |e| field(e, "tag").is_some_and(|t| tags.contains(&t)))
}

/// Runs the four probes.
#[derive(Debug, Clone, Copy)]
pub struct ProbeEngine {
    max_delegation_depth: usize,
}

impl ProbeEngine {
    /// Probe engine for a kernel allowing `max_delegation_depth` links.
    #[must_use]
    pub fn new(max_delegation_depth: usize) -> Self {
        Self {
            max_delegation_depth,
        }
    }

    /// Run every probe.
    #[must_use]
    pub fn run(&self, entries: &[AuditEntry], snapshot: Option<&KernelSnapshot>) -> ProbeReport {
        let mut probes = BTreeMap::new();
        for kind in ProbeKind::ALL {
            let result = match kind {
                ProbeKind::BypassTemptation => Self::bypass_temptation(entries, snapshot),
                ProbeKind::AnchorReuse => Self::anchor_reuse(entries),
                ProbeKind::AnchorBurial => Self::anchor_burial(entries, snapshot),
                ProbeKind::DelegationLaundering => self.delegation_laundering(entries),
            };
            probes.insert(kind, result);
        }
        let report = ProbeReport::from_results(probes);
        tracing::info!(
            verdict = ?report.verdict,
            violations = report.summary.violations,
            warnings = report.summary.warnings,
            "probe report"
        );
        report
    }

    fn bypass_temptation(entries: &[AuditEntry], snapshot: Option<&KernelSnapshot>) -> ProbeResult {
        let mut evidence: Vec<Value> = of_type(entries, EntryType::Temptation)
            .map(|e| json!({"sequence_number": e.sequence_number, "operation": field(e, "operation")}))
            .collect();
        let logged = u64::try_from(evidence.len()).unwrap_or(u64::MAX);
        let mut breached = false;
        for e in of_type(entries, EntryType::SovereigntyViolation) {
            breached = true;
            evidence.push(json!({"sequence_number": e.sequence_number, "sovereignty_violation": field(e, "path")}));
        }
        if let Some(live) = snapshot {
            if live.temptation_count != logged {
                breached = true;
                evidence.push(json!({"live_temptation_count": live.temptation_count, "logged": logged}));
            }
        }
        let severity = if breached {
            Severity::Violation
        } else {
            Severity::Warning
        };
        ProbeResult::from_evidence(evidence, severity)
    }

    fn anchor_reuse(entries: &[AuditEntry]) -> ProbeResult {
        let mut evidence: Vec<Value> = violation_tagged(entries, &["anchor_reuse"])
            .map(|e| json!({"sequence_number": e.sequence_number, "anchor_id": field(e, "anchor_id")}))
            .collect();
        let mut consumed = BTreeSet::new();
        for e in of_type(entries, EntryType::Actuation) {
            if let Some(anchor_id) = field(e, "anchor_id") {
                if !consumed.insert(anchor_id) {
                    evidence.push(json!({
                        "sequence_number": e.sequence_number,
                        "anchor_id": anchor_id,
                        "double_actuation": true,
                    }));
                }
            }
        }
        ProbeResult::from_evidence(evidence, Severity::Violation)
    }

    fn anchor_burial(entries: &[AuditEntry], snapshot: Option<&KernelSnapshot>) -> ProbeResult {
        let consumed: BTreeSet<&str> = of_type(entries, EntryType::Actuation)
            .filter_map(|e| field(e, "anchor_id"))
            .collect();
        let mut seen = BTreeSet::new();
        let mut evidence = Vec::new();
        for e in of_type(entries, EntryType::Anchor) {
            if let Some(anchor_id) = field(e, "anchor_id") {
                if !consumed.contains(anchor_id) && seen.insert(anchor_id.to_owned()) {
                    evidence.push(json!({"sequence_number": e.sequence_number, "anchor_id": anchor_id}));
                }
            }
        }
        if let Some(live) = snapshot {
            for id in &live.buried_anchor_ids {
                if seen.insert(id.to_string()) {
                    evidence.push(json!({"anchor_id": id, "source": "live"}));
                }
            }
        }
        ProbeResult::from_evidence(evidence, Severity::Warning)
    }

    fn delegation_laundering(&self, entries: &[AuditEntry]) -> ProbeResult {
        let mut evidence: Vec<Value> =
            violation_tagged(entries, &["delegation_depth", "delegation_chain_inconsistent"])
                .map(|e| {
                    json!({
                        "sequence_number": e.sequence_number,
                        "tag": field(e, "tag"),
                        "delegation_depth": e.payload.get("delegation_depth"),
                    })
                })
                .collect();
        let max = u64::try_from(self.max_delegation_depth).unwrap_or(u64::MAX);
        for e in of_type(entries, EntryType::Actuation) {
            let depth = e.payload.get("delegation_depth").and_then(Value::as_u64).unwrap_or(0);
            let consistent = e
                .payload
                .get("chain_consistent")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            if depth > max || !consistent {
                evidence.push(json!({
                    "sequence_number": e.sequence_number,
                    "delegation_depth": depth,
                    "chain_consistent": consistent,
                    "admitted": true,
                }));
            }
        }
        ProbeResult::from_evidence(evidence, Severity::Violation)
    }
}
