//! Property tests over small random ownership graphs, cycles included.

use chrono::NaiveDate;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};
use ubo_core::{
    engine::OwnershipEngine,
    exposure::ExposureParams,
    model::{Entity, NewHolding, NewRelationship},
    ownership_walker::WalkParams,
};

const PERSONS: usize = 3;
const COMPANIES: usize = 6;
const EPS: f64 = 1e-6;

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
}

fn node(i: usize) -> String {
    if i < PERSONS {
        format!("P{i}")
    } else {
        format!("C{}", i - PERSONS)
    }
}

fn companies() -> impl Iterator<Item = String> {
    (PERSONS..PERSONS + COMPANIES).map(node)
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Owners per company as (node index, weight).
fn arb_graph() -> impl Strategy<Value = Vec<Vec<(usize, u8)>>> {
    prop::collection::vec(
        prop::collection::vec((0..PERSONS + COMPANIES, 1u8..=100), 0..4),
        COMPANIES,
    )
}

/// Writes the graph twice: as ownership edges and as holdings. Each
/// company's owners are scaled to hold at most 100% between them.
fn seed(graph: &[Vec<(usize, u8)>]) -> OwnershipEngine {
    let engine = OwnershipEngine::build_test().expect("build_test failed");
    for i in 0..PERSONS {
        engine.register_entity(&Entity::person(node(i), node(i))).unwrap();
    }
    for c in companies() {
        engine.register_entity(&Entity::company(c.clone(), c)).unwrap();
    }

    let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    for (c, owners) in graph.iter().enumerate() {
        let owned = node(PERSONS + c);
        let mut seen = BTreeSet::new();
        let owners: Vec<(usize, u8)> = owners
            .iter()
            .copied()
            .filter(|(o, _)| *o != PERSONS + c && seen.insert(*o))
            .collect();
        let total: f64 = owners.iter().map(|(_, w)| f64::from(*w)).sum();
        let scale = if total > 100.0 { 100.0 / total } else { 1.0 };
        for (o, w) in owners {
            let pct = (f64::from(w) * scale).min(100.0);
            engine
                .record_relationship(&NewRelationship::ownership(node(o), owned.clone(), pct, from))
                .unwrap();
            engine
                .record_holding(&NewHolding::new(node(o), owned.clone(), pct, from))
                .unwrap();
        }
    }
    engine
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Walks finish, follow simple paths, and carry the product of their
    /// edge percentages.
    #[test]
    fn chains_are_simple_and_multiplicative(graph in arb_graph()) {
        let engine = seed(&graph);
        for subject in companies() {
            let walk = engine
                .ubo_chains_with(&subject, as_of(), &WalkParams::new(20, 0.0))
                .unwrap();
            prop_assert!(!walk.outcome.is_budget_exhausted());

            for chain in &walk.chains {
                prop_assert_eq!(&chain.path[0], &subject);
                prop_assert_eq!(chain.path.len(), chain.depth + 1);
                prop_assert_eq!(chain.edge_ids.len(), chain.depth);
                prop_assert_eq!(chain.percentages.len(), chain.depth);

                let distinct: HashSet<&String> = chain.path.iter().collect();
                prop_assert_eq!(distinct.len(), chain.path.len());

                let expected = chain
                    .percentages
                    .iter()
                    .fold(100.0, |acc, pct| acc * pct / 100.0);
                prop_assert!((chain.cumulative_pct - expected).abs() < 1e-9);
                prop_assert!(chain.cumulative_pct <= 100.0 + EPS);
            }
        }
    }

    /// With every company at most 100% owned, nobody can reach more than
    /// 100% of a subject, however many chains they have.
    #[test]
    fn aggregate_stakes_never_exceed_whole(graph in arb_graph()) {
        let engine = seed(&graph);
        for subject in companies() {
            let walk = engine
                .ubo_chains_with(&subject, as_of(), &WalkParams::new(20, 0.0))
                .unwrap();
            for candidate in &walk.candidates {
                prop_assert!(
                    candidate.total_pct <= 100.0 + EPS,
                    "{} holds {} of {}", candidate.entity_id, candidate.total_pct, subject
                );
                prop_assert_eq!(candidate.chain_count, candidate.chains.len());
            }
        }
    }

    /// Exposure respects the row cap and depth limit, and slices never
    /// claim more than the whole.
    #[test]
    fn exposure_is_bounded(graph in arb_graph(), max_rows in 1usize..30) {
        let engine = seed(&graph);
        let params = ExposureParams::new(4, 0.0, max_rows);
        for i in 0..PERSONS + COMPANIES {
            let root = node(i);
            let result = engine.exposure_with(&root, as_of(), &params).unwrap();
            prop_assert!(!result.slices.is_empty());
            prop_assert!(result.slices.len() <= max_rows);
            if result.truncated {
                prop_assert_eq!(result.slices.len(), max_rows);
                prop_assert!(!result.outcome.is_complete());
            }
            for slice in &result.slices {
                prop_assert_eq!(&slice.path[0], &root);
                prop_assert_eq!(slice.path.len(), slice.depth + 1);
                prop_assert!(slice.depth <= 4);
                prop_assert!(slice.cumulative_pct > 0.0);
                prop_assert!(slice.cumulative_pct <= 100.0 + EPS);
                prop_assert!(result.closure.contains(&slice.leaf));
            }
        }
    }
}
