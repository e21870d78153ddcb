//! Deterministic per-step resource accounting.
//!
//! One [`BudgetTracker`] is owned by each kernel instance and reset at the
//! start of every step. Every charge updates a counter and is compared to its
//! limit immediately; crossing a limit turns the step into an abstention.
//! Costs are fixed integers so a replay hits the same exhaustion point.

use std::ops::{Deref, DerefMut};

use serde::Serialize;

use crate::config::BudgetConfig;

/// Bytes covered by one size-proportional tick.
const TICK_CHUNK: u64 = 64;

/// Operation classes with a fixed tick cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Canonical encoding of a value.
    Canonicalize,
    /// One domain-separated hash.
    Hash,
    /// Digest or byte comparison.
    Compare,
    /// Registry lookup.
    Lookup,
    /// Authority binding.
    Bind,
    /// Witness or binding verification.
    Verify,
    /// Recursive structural scan step.
    Scan,
}

impl OperationKind {
    /// Fixed tick cost before the size component.
    #[must_use]
    pub const fn base_ticks(self) -> u64 {
        match self {
            Self::Compare | Self::Lookup | Self::Scan => 1,
            Self::Hash => 4,
            Self::Canonicalize => 8,
            Self::Verify => 12,
            Self::Bind => 16,
        }
    }

    /// Total tick cost for an operation over `size` bytes.
    #[must_use]
    pub const fn ticks(self, size: u64) -> u64 {
        self.base_ticks().saturating_add(size.saturating_div(TICK_CHUNK))
    }
}

/// Counter that crossed its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetKind {
    /// Deterministic time ticks.
    Time,
    /// Trace nodes.
    Node,
    /// Nesting depth.
    Depth,
    /// Canonical bytes.
    Byte,
    /// Work units.
    Work,
}

impl BudgetKind {
    /// Stable lower-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Node => "node",
            Self::Depth => "depth",
            Self::Byte => "byte",
            Self::Work => "work",
        }
    }
}

/// Raised when a charge crosses a configured limit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BudgetError {
    /// Tick limit exceeded.
    #[error("time budget exceeded: used {used} of {limit} ticks")]
    TimeBudgetExceeded {
        /// Ticks after the failing charge.
        used: u64,
        /// Configured maximum.
        limit: u64,
    },

    /// Node limit exceeded.
    #[error("node budget exceeded: used {used} of {limit} nodes")]
    NodeBudgetExceeded {
        /// Nodes after the failing charge.
        used: u64,
        /// Configured maximum.
        limit: u64,
    },

    /// Depth limit exceeded.
    #[error("depth budget exceeded: reached {used} of {limit}")]
    DepthBudgetExceeded {
        /// Depth that would have been entered.
        used: u64,
        /// Configured maximum.
        limit: u64,
    },

    /// Byte limit exceeded.
    #[error("byte budget exceeded: used {used} of {limit} bytes")]
    ByteBudgetExceeded {
        /// Bytes after the failing charge.
        used: u64,
        /// Configured maximum.
        limit: u64,
    },

    /// Work limit exceeded.
    #[error("work budget exceeded: used {used} of {limit} units")]
    WorkBudgetExceeded {
        /// Work units after the failing charge.
        used: u64,
        /// Configured maximum.
        limit: u64,
    },
}

impl BudgetError {
    /// Which counter this error belongs to.
    #[must_use]
    pub fn kind(&self) -> BudgetKind {
        match self {
            Self::TimeBudgetExceeded { .. } => BudgetKind::Time,
            Self::NodeBudgetExceeded { .. } => BudgetKind::Node,
            Self::DepthBudgetExceeded { .. } => BudgetKind::Depth,
            Self::ByteBudgetExceeded { .. } => BudgetKind::Byte,
            Self::WorkBudgetExceeded { .. } => BudgetKind::Work,
        }
    }
}

/// Snapshot of the per-step counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BudgetState {
    /// Ticks charged this step.
    pub ticks: u64,
    /// Nodes charged this step.
    pub nodes: u64,
    /// Current nesting depth.
    pub depth: u64,
    /// Deepest nesting reached this step.
    pub peak_depth: u64,
    /// Bytes charged this step.
    pub bytes: u64,
    /// Work units charged this step.
    pub work: u64,
}

/// Per-step resource meter.
#[derive(Debug, Clone)]
pub struct BudgetTracker {
    limits: BudgetConfig,
    state: BudgetState,
}

impl BudgetTracker {
    /// Create a tracker with zeroed counters.
    #[must_use]
    pub fn new(limits: BudgetConfig) -> Self {
        Self {
            limits,
            state: BudgetState::default(),
        }
    }

    /// Zero every counter. Called at step start.
    pub fn reset(&mut self) {
        self.state = BudgetState::default();
    }

    /// Configured limits.
    #[must_use]
    pub fn limits(&self) -> &BudgetConfig {
        &self.limits
    }

    /// Current counters.
    #[must_use]
    pub fn snapshot(&self) -> BudgetState {
        self.state
    }

    /// Charge the tick cost of `kind` over `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetError::TimeBudgetExceeded`] when the tick limit is crossed.
    pub fn charge_operation(&mut self, kind: OperationKind, size: u64) -> Result<(), BudgetError> {
        self.state.ticks = self.state.ticks.saturating_add(kind.ticks(size));
        if self.state.ticks > self.limits.max_ticks {
            return Err(BudgetError::TimeBudgetExceeded {
                used: self.state.ticks,
                limit: self.limits.max_ticks,
            });
        }
        Ok(())
    }

    /// Charge `n` canonical bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetError::ByteBudgetExceeded`] when the byte limit is crossed.
    pub fn charge_bytes(&mut self, n: u64) -> Result<(), BudgetError> {
        self.state.bytes = self.state.bytes.saturating_add(n);
        if self.state.bytes > self.limits.max_bytes {
            return Err(BudgetError::ByteBudgetExceeded {
                used: self.state.bytes,
                limit: self.limits.max_bytes,
            });
        }
        Ok(())
    }

    /// Charge one trace node.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetError::NodeBudgetExceeded`] when the node limit is crossed.
    pub fn charge_node(&mut self) -> Result<(), BudgetError> {
        self.state.nodes = self.state.nodes.saturating_add(1);
        if self.state.nodes > self.limits.max_nodes {
            return Err(BudgetError::NodeBudgetExceeded {
                used: self.state.nodes,
                limit: self.limits.max_nodes,
            });
        }
        Ok(())
    }

    /// Charge `n` work units.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetError::WorkBudgetExceeded`] when the work limit is crossed.
    pub fn charge_work(&mut self, n: u64) -> Result<(), BudgetError> {
        self.state.work = self.state.work.saturating_add(n);
        if self.state.work > self.limits.max_work {
            return Err(BudgetError::WorkBudgetExceeded {
                used: self.state.work,
                limit: self.limits.max_work,
            });
        }
        Ok(())
    }

    /// Enter a nested region; the depth is released when the guard drops.
    ///
    /// The guard derefs to the tracker so nested regions can charge through it.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetError::DepthBudgetExceeded`] when entering would cross
    /// the depth limit. The current depth is unchanged in that case.
    pub fn enter_depth(&mut self) -> Result<DepthGuard<'_>, BudgetError> {
        let next = self.state.depth.saturating_add(1);
        if next > self.limits.max_depth {
            return Err(BudgetError::DepthBudgetExceeded {
                used: next,
                limit: self.limits.max_depth,
            });
        }
        self.state.depth = next;
        self.state.peak_depth = self.state.peak_depth.max(next);
        Ok(DepthGuard { tracker: self })
    }
}

/// Scoped depth acquisition returned by [`BudgetTracker::enter_depth`].
#[derive(Debug)]
pub struct DepthGuard<'a> {
    tracker: &'a mut BudgetTracker,
}

impl Deref for DepthGuard<'_> {
    type Target = BudgetTracker;

    fn deref(&self) -> &BudgetTracker {
        self.tracker
    }
}

impl DerefMut for DepthGuard<'_> {
    fn deref_mut(&mut self) -> &mut BudgetTracker {
        self.tracker
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.tracker.state.depth = self.tracker.state.depth.saturating_sub(1);
    }
}
