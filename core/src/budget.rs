//! Per-call work budgets for graph walks.
//!
//! RULE: Every walk that can fan out carries a `BudgetMeter`. Running out of
//! budget stops the walk and marks the result incomplete. Work already done
//! is kept.

use crate::text_enum;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_NODES: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkBudget {
    pub max_nodes: usize,
    pub timeout: Option<Duration>,
}

impl Default for WalkBudget {
    fn default() -> Self {
        Self {
            max_nodes: DEFAULT_MAX_NODES,
            timeout: None,
        }
    }
}

impl WalkBudget {
    pub fn nodes(max_nodes: usize) -> Self {
        Self {
            max_nodes,
            timeout: None,
        }
    }

    pub fn unlimited() -> Self {
        Self::nodes(usize::MAX)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn meter(&self) -> BudgetMeter {
        BudgetMeter::new(*self)
    }
}

text_enum! {
    pub enum BudgetKind {
        Nodes => "NODES",
        WallClock => "WALL_CLOCK",
    }
}

/// Counts node visits against a `WalkBudget`.
#[derive(Debug)]
pub struct BudgetMeter {
    budget: WalkBudget,
    visited: usize,
    started: Instant,
}

impl BudgetMeter {
    pub fn new(budget: WalkBudget) -> Self {
        Self {
            budget,
            visited: 0,
            started: Instant::now(),
        }
    }

    /// Charge one node visit. Fails without charging once the budget is spent.
    pub fn visit(&mut self) -> Result<(), BudgetKind> {
        if self.visited >= self.budget.max_nodes {
            return Err(BudgetKind::Nodes);
        }
        if let Some(timeout) = self.budget.timeout {
            if self.started.elapsed() >= timeout {
                return Err(BudgetKind::WallClock);
            }
        }
        self.visited += 1;
        Ok(())
    }

    pub fn visited(&self) -> usize {
        self.visited
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Why a walk result is not the full answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "kind", rename_all = "snake_case")]
pub enum IncompleteReason {
    /// At least one branch reached `max_depth` with more graph beyond it.
    Depth,
    /// The node or wall-clock budget ran out.
    Budget(BudgetKind),
    /// The row cap was reached with work still queued.
    RowLimit,
}

/// Lets callers tell "no more owners exist" apart from "we gave up".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum WalkOutcome {
    Complete,
    Incomplete(IncompleteReason),
}

impl WalkOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, WalkOutcome::Complete)
    }

    pub fn is_budget_exhausted(&self) -> bool {
        matches!(self, WalkOutcome::Incomplete(IncompleteReason::Budget(_)))
    }

    /// Budget exhaustion outranks row limits, which outrank depth limits.
    pub fn worst(self, other: WalkOutcome) -> WalkOutcome {
        fn rank(o: &WalkOutcome) -> u8 {
            match o {
                WalkOutcome::Complete => 0,
                WalkOutcome::Incomplete(IncompleteReason::Depth) => 1,
                WalkOutcome::Incomplete(IncompleteReason::RowLimit) => 2,
                WalkOutcome::Incomplete(IncompleteReason::Budget(_)) => 3,
            }
        }
        if rank(&other) > rank(&self) {
            other
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_budget_stops_at_limit() {
        let mut meter = WalkBudget::nodes(3).meter();
        assert!(meter.visit().is_ok());
        assert!(meter.visit().is_ok());
        assert!(meter.visit().is_ok());
        assert_eq!(meter.visit(), Err(BudgetKind::Nodes));
        assert_eq!(meter.visited(), 3);
    }

    #[test]
    fn zero_timeout_trips_wall_clock() {
        let mut meter = WalkBudget::unlimited()
            .with_timeout(Duration::ZERO)
            .meter();
        assert_eq!(meter.visit(), Err(BudgetKind::WallClock));
    }

    #[test]
    fn worst_outcome_prefers_budget() {
        let depth = WalkOutcome::Incomplete(IncompleteReason::Depth);
        let budget = WalkOutcome::Incomplete(IncompleteReason::Budget(BudgetKind::Nodes));
        assert_eq!(WalkOutcome::Complete.worst(depth), depth);
        assert_eq!(depth.worst(budget), budget);
        assert_eq!(budget.worst(depth), budget);
    }
}
