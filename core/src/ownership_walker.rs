//! Ownership chain walker (UBO engine).
//!
//! Walks OWNERSHIP edges upward from a subject until each branch reaches a
//! natural person, the depth limit, an entity with no owners, or a cycle.
//!
//! RULES:
//!   - Edges are filtered by `as_of` at every hop.
//!   - Cumulative percentage is the product of edge percentages along the path.
//!   - A node already on the active path is never re-entered.
//!   - Sibling branches are all explored; nothing is tie-broken away.

use crate::{
    budget::{BudgetKind, IncompleteReason, WalkBudget, WalkOutcome},
    error::{GraphError, GraphResult},
    snapshot::GraphSnapshot,
    text_enum,
    types::{EdgeId, EntityId, Pct, PCT_EPSILON},
};
use chrono::NaiveDate;
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub const DEFAULT_MAX_DEPTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WalkParams {
    pub max_depth: usize,
    /// Applied to each owner's aggregate across all of its chains.
    pub min_threshold_pct: Pct,
    pub budget: WalkBudget,
}

impl Default for WalkParams {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            min_threshold_pct: 0.0,
            budget: WalkBudget::default(),
        }
    }
}

impl WalkParams {
    pub fn new(max_depth: usize, min_threshold_pct: Pct) -> Self {
        Self {
            max_depth,
            min_threshold_pct,
            ..Self::default()
        }
    }

    pub fn with_budget(mut self, budget: WalkBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn validate(&self) -> GraphResult<()> {
        if self.max_depth == 0 {
            return Err(GraphError::InvalidParameter {
                name: "max_depth",
                reason: "must be at least 1".into(),
            });
        }
        if !(0.0..=100.0).contains(&self.min_threshold_pct) {
            return Err(GraphError::InvalidParameter {
                name: "min_threshold_pct",
                reason: format!("{} is outside 0..=100", self.min_threshold_pct),
            });
        }
        Ok(())
    }
}

text_enum! {
    pub enum ChainStatus {
        /// Ends at a natural person.
        Complete => "COMPLETE",
        /// Cut at `max_depth`; more owners may exist above.
        DepthLimited => "DEPTH_LIMITED",
        /// Ends at a non-person with no valid owners at `as_of`.
        DeadEnd => "DEAD_END",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UboChain {
    /// Subject first, terminal owner last.
    pub path: Vec<EntityId>,
    pub edge_ids: Vec<EdgeId>,
    pub percentages: Vec<Pct>,
    pub cumulative_pct: Pct,
    /// Number of edges in the chain.
    pub depth: usize,
    pub status: ChainStatus,
}

impl UboChain {
    pub fn terminal(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    pub fn is_complete(&self) -> bool {
        self.status == ChainStatus::Complete
    }

    /// Entities strictly between the subject and the terminal owner.
    pub fn intermediates(&self) -> &[EntityId] {
        match self.path.len() {
            0..=2 => &[],
            n => &self.path[1..n - 1],
        }
    }
}

/// A branch discarded because it re-entered its own path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub path: Vec<EntityId>,
    pub reentered: EntityId,
}

/// All chains of one terminal owner, summed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UboCandidate {
    pub entity_id: EntityId,
    pub total_pct: Pct,
    pub chain_count: usize,
    pub is_natural_person: bool,
    pub chains: Vec<UboChain>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UboWalk {
    pub subject: EntityId,
    pub as_of: NaiveDate,
    pub chains: Vec<UboChain>,
    pub candidates: Vec<UboCandidate>,
    pub cycles: Vec<CycleReport>,
    pub outcome: WalkOutcome,
    pub nodes_visited: usize,
    /// Frontier entries left on the worklist when the budget ran out.
    pub unexplored: usize,
}

impl UboWalk {
    pub fn chains_to<'a>(&'a self, owner: &'a str) -> impl Iterator<Item = &'a UboChain> + 'a {
        self.chains.iter().filter(move |c| c.terminal() == owner)
    }

    pub fn candidate(&self, owner: &str) -> Option<&UboCandidate> {
        self.candidates.iter().find(|c| c.entity_id == owner)
    }
}

struct Frame {
    node: EntityId,
    path: Vec<EntityId>,
    on_path: HashSet<EntityId>,
    edge_ids: Vec<EdgeId>,
    percentages: Vec<Pct>,
    cumulative_pct: Pct,
}

impl Frame {
    fn depth(&self) -> usize {
        self.edge_ids.len()
    }

    fn into_chain(self, status: ChainStatus) -> UboChain {
        let depth = self.depth();
        UboChain {
            path: self.path,
            edge_ids: self.edge_ids,
            percentages: self.percentages,
            cumulative_pct: self.cumulative_pct,
            depth,
            status,
        }
    }
}

pub fn compute_ubo_chains(
    snapshot: &GraphSnapshot,
    subject: &str,
    as_of: NaiveDate,
    params: &WalkParams,
) -> GraphResult<UboWalk> {
    params.validate()?;
    if !snapshot.contains(subject) {
        return Err(GraphError::EntityNotFound {
            entity_id: subject.to_string(),
        });
    }

    let mut meter = params.budget.meter();
    let mut chains = Vec::new();
    let mut cycles = Vec::new();
    let mut budget_hit: Option<BudgetKind> = None;

    let mut stack = vec![Frame {
        node: subject.to_string(),
        path: vec![subject.to_string()],
        on_path: HashSet::from([subject.to_string()]),
        edge_ids: Vec::new(),
        percentages: Vec::new(),
        cumulative_pct: 100.0,
    }];

    while let Some(frame) = stack.pop() {
        if let Err(kind) = meter.visit() {
            budget_hit = Some(kind);
            stack.push(frame);
            break;
        }
        let depth = frame.depth();

        if depth > 0 && snapshot.is_natural_person(&frame.node) {
            chains.push(frame.into_chain(ChainStatus::Complete));
            continue;
        }
        if depth == 0 && snapshot.is_natural_person(&frame.node) {
            // A person has no owners to resolve.
            continue;
        }
        if depth >= params.max_depth {
            chains.push(frame.into_chain(ChainStatus::DepthLimited));
            continue;
        }

        let owners = snapshot.owners_at(&frame.node, as_of);
        if owners.is_empty() {
            if depth > 0 {
                chains.push(frame.into_chain(ChainStatus::DeadEnd));
            }
            continue;
        }

        // Pushed in reverse so branches pop in edge order.
        for edge in owners.into_iter().rev() {
            if frame.on_path.contains(&edge.from_entity) {
                let mut path = frame.path.clone();
                path.push(edge.from_entity.clone());
                warn!(
                    "Cycle detected walking owners of {subject}: {} re-enters {}",
                    frame.node, edge.from_entity
                );
                cycles.push(CycleReport {
                    path,
                    reentered: edge.from_entity.clone(),
                });
                continue;
            }
            let pct = edge.percentage.unwrap_or(0.0);
            let mut child = Frame {
                node: edge.from_entity.clone(),
                path: frame.path.clone(),
                on_path: frame.on_path.clone(),
                edge_ids: frame.edge_ids.clone(),
                percentages: frame.percentages.clone(),
                cumulative_pct: frame.cumulative_pct * pct / 100.0,
            };
            child.path.push(edge.from_entity.clone());
            child.on_path.insert(edge.from_entity.clone());
            child.edge_ids.push(edge.edge_id.clone());
            child.percentages.push(pct);
            stack.push(child);
        }
    }

    let unexplored = if budget_hit.is_some() { stack.len() } else { 0 };
    let outcome = match budget_hit {
        Some(kind) => WalkOutcome::Incomplete(IncompleteReason::Budget(kind)),
        None if chains.iter().any(|c| c.status == ChainStatus::DepthLimited) => {
            WalkOutcome::Incomplete(IncompleteReason::Depth)
        }
        None => WalkOutcome::Complete,
    };

    sort_chains(&mut chains);
    let candidates = aggregate_candidates(snapshot, &chains, params.min_threshold_pct);
    let kept: HashSet<&str> = candidates.iter().map(|c| c.entity_id.as_str()).collect();
    // Chains that did not reach a person stay visible whatever their share.
    let chains: Vec<UboChain> = chains
        .iter()
        .filter(|c| !c.is_complete() || kept.contains(c.terminal()))
        .cloned()
        .collect();

    debug!(
        "UBO walk for {subject} @ {as_of}: {} chains, {} candidates, {} cycles, {} nodes, {:?}",
        chains.len(),
        candidates.len(),
        cycles.len(),
        meter.visited(),
        outcome
    );

    Ok(UboWalk {
        subject: subject.to_string(),
        as_of,
        chains,
        candidates,
        cycles,
        outcome,
        nodes_visited: meter.visited(),
        unexplored,
    })
}

/// Independent walks over one snapshot, run in parallel.
pub fn compute_ubo_chains_batch(
    snapshot: &GraphSnapshot,
    subjects: &[EntityId],
    as_of: NaiveDate,
    params: &WalkParams,
) -> Vec<GraphResult<UboWalk>> {
    subjects
        .par_iter()
        .map(|subject| compute_ubo_chains(snapshot, subject, as_of, params))
        .collect()
}

fn sort_chains(chains: &mut [UboChain]) {
    chains.sort_by(|a, b| {
        b.cumulative_pct
            .total_cmp(&a.cumulative_pct)
            .then_with(|| a.path.cmp(&b.path))
    });
}

fn aggregate_candidates(
    snapshot: &GraphSnapshot,
    chains: &[UboChain],
    min_threshold_pct: Pct,
) -> Vec<UboCandidate> {
    let mut by_owner: BTreeMap<&str, Vec<&UboChain>> = BTreeMap::new();
    for chain in chains.iter().filter(|c| c.is_complete()) {
        by_owner.entry(chain.terminal()).or_default().push(chain);
    }

    let mut candidates: Vec<UboCandidate> = by_owner
        .into_iter()
        .map(|(owner, owner_chains)| UboCandidate {
            entity_id: owner.to_string(),
            total_pct: owner_chains.iter().map(|c| c.cumulative_pct).sum(),
            chain_count: owner_chains.len(),
            is_natural_person: snapshot.is_natural_person(owner),
            chains: owner_chains.into_iter().cloned().collect(),
        })
        .filter(|c| c.total_pct + PCT_EPSILON >= min_threshold_pct)
        .collect();

    candidates.sort_by(|a, b| {
        b.total_pct
            .total_cmp(&a.total_pct)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    candidates
}
