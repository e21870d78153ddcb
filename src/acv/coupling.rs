//! Coupling witnesses binding a reasoning trace to an anchor.
//!
//! Each pattern is a pure function of `(node_hashes, anchor_hash, env_digest)`,
//! so regeneration reproduces the witness exactly and verification needs no
//! kernel secret.
//!
//! - **A** Merkle root over anchor-salted leaves plus challenged openings.
//! - **B** one chained digest over every node.
//! - **C** predicate-selected transition edges between consecutive nodes.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::canonical::{domain_hash, domain_hash_bytes, HashDomain};

/// Witness strategy selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CouplingPattern {
    /// Merkle openings.
    #[default]
    A,
    /// Global mix digest.
    B,
    /// Transition edges.
    C,
}

impl FromStr for CouplingPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            other => Err(format!("unknown coupling pattern: {other}")),
        }
    }
}

/// Witness generation or verification failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CouplingError {
    /// No trace nodes were supplied.
    #[error("trace is empty")]
    EmptyTrace,

    /// The witness was built for a different pattern than configured.
    #[error("witness pattern {found:?} does not match configured {expected:?}")]
    PatternMismatch {
        /// Configured pattern.
        expected: CouplingPattern,
        /// Pattern carried by the witness.
        found: CouplingPattern,
    },

    /// A Merkle path does not lead to the stated root.
    #[error("merkle opening {index} does not verify")]
    BadOpening {
        /// Leaf index of the failing opening.
        index: u64,
    },

    /// The witness differs from the regenerated one.
    #[error("witness does not match trace: {field}")]
    Mismatch {
        /// First field that differs.
        field: &'static str,
    },
}

/// Inputs every pattern binds together.
#[derive(Debug, Clone, Copy)]
pub struct CouplingInput<'a> {
    /// Canonical hash of each trace node, in order.
    pub node_hashes: &'a [String],
    /// Anchor the trace is coupled to.
    pub anchor_hash: &'a str,
    /// Environment digest at anchor issuance.
    pub env_digest: &'a str,
}

/// Side of the sibling in a Merkle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Sibling sits to the left.
    Left,
    /// Sibling sits to the right.
    Right,
}

/// One level of a Merkle inclusion path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleStep {
    /// Sibling hash at this level.
    pub sibling: String,
    /// Where the sibling sits.
    pub side: Side,
}

/// Inclusion proof for one challenged leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleOpening {
    /// Leaf index.
    pub index: u64,
    /// Leaf hash.
    pub leaf_hash: String,
    /// Path from leaf to root.
    pub path: Vec<MerkleStep>,
}

/// One selected transition edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeWitness {
    /// Source node index.
    pub from: u64,
    /// Target node index.
    pub to: u64,
    /// Edge hash.
    pub edge_hash: String,
}

/// Proof entangling a trace with an anchor and environment digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pattern")]
pub enum CouplingWitness {
    /// Pattern A.
    #[serde(rename = "A")]
    MerkleOpenings {
        /// Merkle root over all leaves.
        root: String,
        /// Number of leaves.
        leaf_count: u64,
        /// Challenged openings.
        openings: Vec<MerkleOpening>,
    },
    /// Pattern B.
    #[serde(rename = "B")]
    GlobalMix {
        /// Number of nodes mixed.
        node_count: u64,
        /// Final chained digest.
        mix_digest: String,
    },
    /// Pattern C.
    #[serde(rename = "C")]
    TransitionEdges {
        /// Number of nodes in the trace.
        node_count: u64,
        /// Predicate-selected edges.
        edges: Vec<EdgeWitness>,
        /// Digest over the selected edge hashes.
        edge_digest: String,
    },
}

impl CouplingWitness {
    /// Build the witness for `pattern`.
    ///
    /// `openings` is the number of Merkle challenges (pattern A only).
    ///
    /// # Errors
    ///
    /// Returns [`CouplingError::EmptyTrace`] when there are no nodes.
    pub fn generate(
        pattern: CouplingPattern,
        input: CouplingInput<'_>,
        openings: usize,
    ) -> Result<Self, CouplingError> {
        if input.node_hashes.is_empty() {
            return Err(CouplingError::EmptyTrace);
        }
        Ok(match pattern {
            CouplingPattern::A => merkle_witness(input, openings),
            CouplingPattern::B => mix_witness(input),
            CouplingPattern::C => edge_witness(input),
        })
    }

    /// Re-verify this witness against the trace it claims to cover.
    ///
    /// # Errors
    ///
    /// Returns [`CouplingError`] naming the first check that failed.
    pub fn verify(
        &self,
        expected: CouplingPattern,
        input: CouplingInput<'_>,
        openings: usize,
    ) -> Result<(), CouplingError> {
        if self.pattern() != expected {
            return Err(CouplingError::PatternMismatch {
                expected,
                found: self.pattern(),
            });
        }
        if let Self::MerkleOpenings { root, openings: opened, .. } = self {
            for opening in opened {
                if !opening_verifies(opening, root) {
                    return Err(CouplingError::BadOpening {
                        index: opening.index,
                    });
                }
            }
        }
        let regenerated = Self::generate(expected, input, openings)?;
        match (self, &regenerated) {
            (
                Self::MerkleOpenings { root: a, leaf_count: n, openings: o },
                Self::MerkleOpenings { root: b, leaf_count: m, openings: p },
            ) => {
                check(n == m, "leaf_count")?;
                check(a == b, "root")?;
                check(o == p, "openings")
            }
            (
                Self::GlobalMix { node_count: n, mix_digest: a },
                Self::GlobalMix { node_count: m, mix_digest: b },
            ) => {
                check(n == m, "node_count")?;
                check(a == b, "mix_digest")
            }
            (
                Self::TransitionEdges { node_count: n, edges: e, edge_digest: a },
                Self::TransitionEdges { node_count: m, edges: f, edge_digest: b },
            ) => {
                check(n == m, "node_count")?;
                check(e == f, "edges")?;
                check(a == b, "edge_digest")
            }
            _ => Err(CouplingError::Mismatch { field: "pattern" }),
        }
    }

    /// Pattern this witness was built with.
    #[must_use]
    pub fn pattern(&self) -> CouplingPattern {
        match self {
            Self::MerkleOpenings { .. } => CouplingPattern::A,
            Self::GlobalMix { .. } => CouplingPattern::B,
            Self::TransitionEdges { .. } => CouplingPattern::C,
        }
    }

    /// Work units charged for generating and checking this witness.
    #[must_use]
    pub fn work_units(&self) -> u64 {
        match self {
            Self::MerkleOpenings {
                leaf_count,
                openings,
                ..
            } => {
                let path_steps: usize = openings.iter().map(|o| o.path.len()).sum();
                leaf_count
                    .saturating_mul(2)
                    .saturating_add(to_u64(path_steps))
            }
            Self::GlobalMix { node_count, .. } => node_count.saturating_add(1),
            Self::TransitionEdges {
                node_count, edges, ..
            } => node_count.saturating_add(to_u64(edges.len())),
        }
    }
}

fn check(ok: bool, field: &'static str) -> Result<(), CouplingError> {
    if ok {
        Ok(())
    } else {
        Err(CouplingError::Mismatch { field })
    }
}

fn to_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

// ── Pattern A ───────────────────────────────────────────────────────

fn merkle_leaves(input: CouplingInput<'_>) -> Vec<[u8; 32]> {
    input
        .node_hashes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            domain_hash_bytes(
                HashDomain::MerkleLeaf,
                &[
                    input.anchor_hash.as_bytes(),
                    input.env_digest.as_bytes(),
                    &to_u64(i).to_be_bytes(),
                    node.as_bytes(),
                ],
            )
        })
        .collect()
}

fn merkle_parent(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    domain_hash_bytes(HashDomain::MerkleNode, &[left, right])
}

/// All tree levels, leaves first. An unpaired node is promoted unchanged.
fn merkle_levels(leaves: Vec<[u8; 32]>) -> Vec<Vec<[u8; 32]>> {
    let mut levels = vec![leaves];
    while levels.last().is_some_and(|level| level.len() > 1) {
        let Some(current) = levels.last() else { break };
        let next: Vec<[u8; 32]> = current
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => merkle_parent(left, right),
                [single] => *single,
                _ => [0u8; 32],
            })
            .collect();
        levels.push(next);
    }
    levels
}

fn merkle_path(levels: &[Vec<[u8; 32]>], index: usize) -> Vec<MerkleStep> {
    let mut path = Vec::new();
    let mut idx = index;
    for level in levels.iter().take(levels.len().saturating_sub(1)) {
        let sibling_idx = idx ^ 1;
        if let Some(sibling) = level.get(sibling_idx) {
            let side = if idx & 1 == 0 { Side::Right } else { Side::Left };
            path.push(MerkleStep {
                sibling: hex::encode(sibling),
                side,
            });
        }
        idx = idx.saturating_div(2);
    }
    path
}

fn challenge_indices(input: CouplingInput<'_>, root: &str, n: usize, wanted: usize) -> Vec<usize> {
    let target = wanted.min(n);
    let mut chosen = Vec::with_capacity(target);
    let mut seen = BTreeSet::new();
    for j in 0..target {
        let digest = domain_hash_bytes(
            HashDomain::MerkleChallenge,
            &[
                input.anchor_hash.as_bytes(),
                input.env_digest.as_bytes(),
                root.as_bytes(),
                &to_u64(j).to_be_bytes(),
            ],
        );
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let draw = u64::from_be_bytes(head).checked_rem(to_u64(n)).unwrap_or(0);
        let mut idx = usize::try_from(draw).unwrap_or(0);
        // Linear probe to the next unchosen leaf.
        while seen.contains(&idx) {
            idx = idx.saturating_add(1).checked_rem(n).unwrap_or(0);
        }
        seen.insert(idx);
        chosen.push(idx);
    }
    chosen
}

fn merkle_witness(input: CouplingInput<'_>, openings: usize) -> CouplingWitness {
    let leaves = merkle_leaves(input);
    let n = leaves.len();
    let levels = merkle_levels(leaves);
    let root = levels
        .last()
        .and_then(|top| top.first())
        .map(hex::encode)
        .unwrap_or_default();
    let opened = challenge_indices(input, &root, n, openings)
        .into_iter()
        .map(|idx| MerkleOpening {
            index: to_u64(idx),
            leaf_hash: levels
                .first()
                .and_then(|l| l.get(idx))
                .map(hex::encode)
                .unwrap_or_default(),
            path: merkle_path(&levels, idx),
        })
        .collect();
    CouplingWitness::MerkleOpenings {
        root,
        leaf_count: to_u64(n),
        openings: opened,
    }
}

fn decode32(hex_str: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(hex_str).ok()?;
    bytes.try_into().ok()
}

/// Walk an opening's path and compare with `root`. Uses only public data.
fn opening_verifies(opening: &MerkleOpening, root: &str) -> bool {
    let Some(mut acc) = decode32(&opening.leaf_hash) else {
        return false;
    };
    for step in &opening.path {
        let Some(sibling) = decode32(&step.sibling) else {
            return false;
        };
        acc = match step.side {
            Side::Left => merkle_parent(&sibling, &acc),
            Side::Right => merkle_parent(&acc, &sibling),
        };
    }
    hex::encode(acc) == root
}

// ── Pattern B ───────────────────────────────────────────────────────

fn mix_witness(input: CouplingInput<'_>) -> CouplingWitness {
    let n = to_u64(input.node_hashes.len());
    let mut acc = domain_hash_bytes(
        HashDomain::GlobalMix,
        &[
            input.anchor_hash.as_bytes(),
            input.env_digest.as_bytes(),
            &n.to_be_bytes(),
        ],
    );
    for (i, node) in input.node_hashes.iter().enumerate() {
        acc = domain_hash_bytes(
            HashDomain::GlobalMix,
            &[&acc, &to_u64(i).to_be_bytes(), node.as_bytes()],
        );
    }
    CouplingWitness::GlobalMix {
        node_count: n,
        mix_digest: hex::encode(acc),
    }
}

// ── Pattern C ───────────────────────────────────────────────────────

fn edge_selected(input: CouplingInput<'_>, from: u64) -> bool {
    let digest = domain_hash_bytes(
        HashDomain::EdgePredicate,
        &[
            input.anchor_hash.as_bytes(),
            input.env_digest.as_bytes(),
            &from.to_be_bytes(),
        ],
    );
    digest[0] < 128
}

fn edge_witness(input: CouplingInput<'_>) -> CouplingWitness {
    let nodes = input.node_hashes;
    let candidates: Vec<(usize, usize)> = if nodes.len() == 1 {
        vec![(0, 0)]
    } else {
        (0..nodes.len().saturating_sub(1))
            .map(|i| (i, i.saturating_add(1)))
            .collect()
    };
    let hash_edge = |(from, to): (usize, usize)| {
        let (a, b) = (nodes.get(from), nodes.get(to));
        EdgeWitness {
            from: to_u64(from),
            to: to_u64(to),
            edge_hash: domain_hash(
                HashDomain::TransitionEdge,
                &[
                    input.anchor_hash.as_bytes(),
                    input.env_digest.as_bytes(),
                    &to_u64(from).to_be_bytes(),
                    &to_u64(to).to_be_bytes(),
                    a.map_or(&b""[..], |s| s.as_bytes()),
                    b.map_or(&b""[..], |s| s.as_bytes()),
                ],
            ),
        }
    };
    let mut edges: Vec<EdgeWitness> = candidates
        .iter()
        .filter(|(from, _)| edge_selected(input, to_u64(*from)))
        .map(|edge| hash_edge(*edge))
        .collect();
    if edges.is_empty() {
        edges = candidates.first().map(|e| hash_edge(*e)).into_iter().collect();
    }
    let parts: Vec<&[u8]> = edges.iter().map(|e| e.edge_hash.as_bytes()).collect();
    CouplingWitness::TransitionEdges {
        node_count: to_u64(nodes.len()),
        edge_digest: domain_hash(HashDomain::TransitionEdge, &parts),
        edges,
    }
}
