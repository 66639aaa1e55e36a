//! Bounded look-through exposure over direct holdings.
//!
//! RULES:
//!   - Nothing computed here is ever written back. The closure over direct
//!     HoldingEdges is recomputed per request (or served from the cache).
//!   - Traversal is tiered. Each tier is ordered by cumulative percentage
//!     descending, so a row cap always drops the smallest exposures.
//!   - Positions in one issuer (share classes, instruments) are summed into
//!     a single step, so each path appears once.
//!   - Stop priority per node: below min_pct (pruned), look-through NONE,
//!     no BO data without override, depth limit, row limit.
//!   - The root is the subject of the request; its own look-through policy
//!     does not stop its first tier.

use crate::{
    budget::{BudgetKind, IncompleteReason, WalkBudget, WalkOutcome},
    error::{GraphError, GraphResult},
    role_profile::LookthroughPolicy,
    snapshot::GraphSnapshot,
    text_enum,
    types::{EntityId, Pct},
};
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExposureParams {
    pub max_depth: usize,
    pub min_pct: Pct,
    pub max_rows: usize,
    /// Stop at nodes whose beneficial-owner data is unavailable unless their
    /// policy is ALWAYS.
    pub stop_on_no_bo_data: bool,
    pub budget: WalkBudget,
}

impl Default for ExposureParams {
    fn default() -> Self {
        Self {
            max_depth: 6,
            min_pct: 0.01,
            max_rows: 200,
            stop_on_no_bo_data: true,
            budget: WalkBudget::default(),
        }
    }
}

impl ExposureParams {
    pub fn new(max_depth: usize, min_pct: Pct, max_rows: usize) -> Self {
        Self {
            max_depth,
            min_pct,
            max_rows,
            ..Self::default()
        }
    }

    pub fn with_budget(mut self, budget: WalkBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn validate(&self) -> GraphResult<()> {
        if self.max_rows == 0 {
            return Err(GraphError::InvalidParameter {
                name: "max_rows",
                reason: "must be at least 1".into(),
            });
        }
        if !(0.0..=100.0).contains(&self.min_pct) {
            return Err(GraphError::InvalidParameter {
                name: "min_pct",
                reason: format!("{} is outside 0..=100", self.min_pct),
            });
        }
        Ok(())
    }
}

text_enum! {
    pub enum StopReason {
        /// No further valid holdings.
        Leaf => "LEAF",
        LookthroughNone => "LOOKTHROUGH_NONE",
        NoBoData => "NO_BO_DATA",
        MaxDepth => "MAX_DEPTH",
        /// Every further holding fell below `min_pct`.
        ChildrenBelowMinPct => "CHILDREN_BELOW_MIN_PCT",
        /// Every further holding led back onto the path.
        Cycle => "CYCLE",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureSlice {
    pub root: EntityId,
    pub leaf: EntityId,
    pub cumulative_pct: Pct,
    pub depth: usize,
    /// Root first, leaf last.
    pub path: Vec<EntityId>,
    pub stop_reason: StopReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureResult {
    pub root: EntityId,
    pub as_of: NaiveDate,
    pub slices: Vec<ExposureSlice>,
    /// The row cap was hit with work still queued.
    pub truncated: bool,
    pub outcome: WalkOutcome,
    pub nodes_visited: usize,
    /// Every entity the traversal looked at. Cache invalidation keys on this.
    pub closure: BTreeSet<EntityId>,
}

impl ExposureResult {
    /// Budget-truncated answers depend on timing and are never cached.
    pub fn is_cacheable(&self) -> bool {
        !self.outcome.is_budget_exhausted()
    }
}

struct Frame {
    node: EntityId,
    path: Vec<EntityId>,
    cumulative_pct: Pct,
}

impl Frame {
    fn depth(&self) -> usize {
        self.path.len() - 1
    }
}

pub fn compute_exposure(
    snapshot: &GraphSnapshot,
    root: &str,
    as_of: NaiveDate,
    params: &ExposureParams,
) -> GraphResult<ExposureResult> {
    params.validate()?;
    if !snapshot.contains(root) {
        return Err(GraphError::EntityNotFound {
            entity_id: root.to_string(),
        });
    }

    let profiles = snapshot.role_profiles();
    let mut meter = params.budget.meter();
    let mut slices: Vec<ExposureSlice> = Vec::new();
    let mut closure = BTreeSet::new();
    let mut truncated = false;
    let mut depth_hit = false;
    let mut budget_hit: Option<BudgetKind> = None;

    let emit = |slices: &mut Vec<ExposureSlice>, frame: Frame, stop_reason: StopReason| {
        slices.push(ExposureSlice {
            root: root.to_string(),
            leaf: frame.node,
            cumulative_pct: frame.cumulative_pct,
            depth: frame.path.len() - 1,
            path: frame.path,
            stop_reason,
        });
    };

    let mut tier = vec![Frame {
        node: root.to_string(),
        path: vec![root.to_string()],
        cumulative_pct: 100.0,
    }];

    'tiers: while !tier.is_empty() {
        let mut next: Vec<Frame> = Vec::new();
        for frame in tier {
            if slices.len() >= params.max_rows {
                truncated = true;
                break 'tiers;
            }
            if let Err(kind) = meter.visit() {
                budget_hit = Some(kind);
                break 'tiers;
            }
            closure.insert(frame.node.clone());
            let depth = frame.depth();

            if depth > 0 {
                if let Some(node) = profiles.lookthrough_for(&frame.node, as_of) {
                    if node.policy == LookthroughPolicy::None {
                        emit(&mut slices, frame, StopReason::LookthroughNone);
                        continue;
                    }
                    if params.stop_on_no_bo_data
                        && !node.beneficial_owner_data_available
                        && !node.policy.overrides_missing_bo_data()
                    {
                        emit(&mut slices, frame, StopReason::NoBoData);
                        continue;
                    }
                }
            }

            let positions = snapshot.positions_held_at(&frame.node, as_of);
            if depth >= params.max_depth {
                depth_hit |= !positions.is_empty();
                emit(&mut slices, frame, StopReason::MaxDepth);
                continue;
            }

            // Several share classes in one issuer are one step down.
            let mut per_issuer: BTreeMap<&str, Pct> = BTreeMap::new();
            for holding in &positions {
                *per_issuer.entry(holding.issuer.as_str()).or_default() += holding.pct_of_issuer;
            }

            let mut pruned = false;
            let mut cyclic = false;
            let mut children = Vec::new();
            for (issuer, pct) in per_issuer {
                if frame.path.iter().any(|p| p == issuer) {
                    cyclic = true;
                    continue;
                }
                let cumulative_pct = frame.cumulative_pct * pct.min(100.0) / 100.0;
                if cumulative_pct < params.min_pct {
                    pruned = true;
                    continue;
                }
                let mut path = frame.path.clone();
                path.push(issuer.to_string());
                children.push(Frame {
                    node: issuer.to_string(),
                    path,
                    cumulative_pct,
                });
            }

            if children.is_empty() {
                let reason = if pruned {
                    StopReason::ChildrenBelowMinPct
                } else if cyclic {
                    StopReason::Cycle
                } else {
                    StopReason::Leaf
                };
                emit(&mut slices, frame, reason);
            } else {
                next.extend(children);
            }
        }

        next.sort_by(|a, b| {
            b.cumulative_pct
                .total_cmp(&a.cumulative_pct)
                .then_with(|| a.node.cmp(&b.node))
                .then_with(|| a.path.cmp(&b.path))
        });
        tier = next;
    }

    let outcome = match budget_hit {
        Some(kind) => WalkOutcome::Incomplete(IncompleteReason::Budget(kind)),
        None if truncated => WalkOutcome::Incomplete(IncompleteReason::RowLimit),
        None if depth_hit => WalkOutcome::Incomplete(IncompleteReason::Depth),
        None => WalkOutcome::Complete,
    };
    debug!(
        "Exposure for {root} @ {as_of}: {} slices, {} nodes, {:?}",
        slices.len(),
        meter.visited(),
        outcome
    );

    Ok(ExposureResult {
        root: root.to_string(),
        as_of,
        slices,
        truncated,
        outcome,
        nodes_visited: meter.visited(),
        closure,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{Entity, HoldingEdge, NewHolding},
        role_profile::{NewRoleProfile, RoleType},
    };

    fn d() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn hold(id: &str, holder: &str, issuer: &str, pct: f64) -> HoldingEdge {
        NewHolding::new(holder, issuer, pct, d()).into_holding(id.into())
    }

    fn entities(ids: &[&str]) -> Vec<Entity> {
        ids.iter().map(|id| Entity::fund(*id, *id)).collect()
    }

    #[test]
    fn chain_multiplies_and_ends_at_leaf() {
        let snap = GraphSnapshot::new(
            entities(&["inv", "x", "m"]),
            vec![],
            vec![hold("h1", "inv", "x", 10.0), hold("h2", "x", "m", 50.0)],
            vec![],
        );
        let r = compute_exposure(&snap, "inv", d(), &ExposureParams::default()).unwrap();
        assert_eq!(r.slices.len(), 1);
        let s = &r.slices[0];
        assert_eq!(s.path, vec!["inv", "x", "m"]);
        assert!((s.cumulative_pct - 5.0).abs() < 1e-9);
        assert_eq!(s.stop_reason, StopReason::Leaf);
        assert!(r.outcome.is_complete());
    }

    #[test]
    fn root_without_holdings_is_lone_slice() {
        let snap = GraphSnapshot::new(entities(&["inv"]), vec![], vec![], vec![]);
        let r = compute_exposure(&snap, "inv", d(), &ExposureParams::default()).unwrap();
        assert_eq!(r.slices.len(), 1);
        assert_eq!(r.slices[0].depth, 0);
    }

    #[test]
    fn missing_bo_data_stops_unless_always() {
        let profile = NewRoleProfile::new("m", "x", RoleType::Nominee, d()).without_bo_data();
        let snap = GraphSnapshot::new(
            entities(&["inv", "x", "m"]),
            vec![],
            vec![hold("h1", "inv", "x", 10.0), hold("h2", "x", "m", 50.0)],
            vec![profile.clone().into_profile("p1".into())],
        );
        let r = compute_exposure(&snap, "inv", d(), &ExposureParams::default()).unwrap();
        assert_eq!(r.slices[0].leaf, "x");
        assert_eq!(r.slices[0].stop_reason, StopReason::NoBoData);

        let snap = GraphSnapshot::new(
            entities(&["inv", "x", "m"]),
            vec![],
            vec![hold("h1", "inv", "x", 10.0), hold("h2", "x", "m", 50.0)],
            vec![profile
                .with_lookthrough(LookthroughPolicy::Always)
                .into_profile("p1".into())],
        );
        let r = compute_exposure(&snap, "inv", d(), &ExposureParams::default()).unwrap();
        assert_eq!(r.slices[0].leaf, "m");
    }

    #[test]
    fn row_cap_keeps_largest() {
        let holdings = (0..10)
            .map(|i| hold(&format!("h{i}"), "inv", &format!("spv{i}"), (i + 1) as f64))
            .collect();
        let mut ids = vec!["inv".to_string()];
        ids.extend((0..10).map(|i| format!("spv{i}")));
        let ents = ids.iter().map(|id| Entity::company(id.clone(), id.clone())).collect();
        let snap = GraphSnapshot::new(ents, vec![], holdings, vec![]);

        let r = compute_exposure(&snap, "inv", d(), &ExposureParams::new(6, 0.01, 3)).unwrap();
        assert_eq!(r.slices.len(), 3);
        assert!(r.truncated);
        let leaves: Vec<&str> = r.slices.iter().map(|s| s.leaf.as_str()).collect();
        assert_eq!(leaves, vec!["spv9", "spv8", "spv7"]);
    }

    #[test]
    fn share_classes_in_one_issuer_are_one_slice() {
        let class = |id: &str, class: &str, pct: f64| {
            NewHolding::new("inv", "x", pct, d())
                .with_share_class(class)
                .into_holding(id.into())
        };
        let snap = GraphSnapshot::new(
            entities(&["inv", "x", "m"]),
            vec![],
            vec![class("h1", "A", 5.0), class("h2", "B", 3.0), hold("h3", "x", "m", 50.0)],
            vec![],
        );
        let r = compute_exposure(&snap, "inv", d(), &ExposureParams::default()).unwrap();
        assert_eq!(r.slices.len(), 1);
        assert_eq!(r.slices[0].path, vec!["inv", "x", "m"]);
        assert!((r.slices[0].cumulative_pct - 4.0).abs() < 1e-9);
        assert_eq!(r.nodes_visited, 3);
    }

    #[test]
    fn tiny_children_collapse_into_parent() {
        let snap = GraphSnapshot::new(
            entities(&["inv", "x", "a", "b"]),
            vec![],
            vec![
                hold("h1", "inv", "x", 1.0),
                hold("h2", "x", "a", 0.5),
                hold("h3", "x", "b", 0.5),
            ],
            vec![],
        );
        let r = compute_exposure(&snap, "inv", d(), &ExposureParams::default()).unwrap();
        assert_eq!(r.slices.len(), 1);
        assert_eq!(r.slices[0].leaf, "x");
        assert_eq!(r.slices[0].stop_reason, StopReason::ChildrenBelowMinPct);
    }
}
