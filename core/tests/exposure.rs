//! Look-through exposure: fan-out bounds, stop reasons, row caps and the
//! exposure cache.

use chrono::{Duration, NaiveDate};
use ubo_core::{
    budget::{BudgetKind, IncompleteReason, WalkBudget, WalkOutcome},
    engine::OwnershipEngine,
    exposure::{ExposureParams, StopReason},
    model::{Entity, NewHolding},
    role_profile::{LookthroughPolicy, NewRoleProfile, RoleType},
    scenario::{build_fan_out, FanOut, FanOutSpec},
};

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
}

fn build() -> OwnershipEngine {
    OwnershipEngine::build_test().expect("build_test failed")
}

fn fan_out(engine: &OwnershipEngine, investors: usize, policy: LookthroughPolicy) -> FanOut {
    let spec = FanOutSpec::new(as_of())
        .with_size(investors, 200)
        .with_fof_policy(policy);
    build_fan_out(engine, &spec).expect("fan-out scenario")
}

// ── Fan-out ───────────────────────────────────────────────────────

/// 1,000 investors in a fund of funds that refuses look-through: each
/// investor sees one slice ending at the fund of funds, never 200.
#[test]
fn lookthrough_none_prevents_cartesian_explosion() {
    let _ = env_logger::builder().is_test(true).try_init();
    let engine = build();
    let scenario = fan_out(&engine, 1_000, LookthroughPolicy::None);
    assert_eq!(scenario.investors.len(), 1_000);
    assert_eq!(scenario.spvs.len(), 200);

    let mut total_slices = 0;
    for investor in &scenario.investors {
        let result = engine.compute_exposure(investor, as_of()).unwrap();
        assert!(result.slices.len() <= 1, "{investor}: {} slices", result.slices.len());
        let slice = &result.slices[0];
        assert_eq!(slice.leaf, scenario.fof);
        assert_eq!(slice.stop_reason, StopReason::LookthroughNone);
        assert_eq!(slice.path, vec![investor.clone(), scenario.fof.clone()]);
        assert!(slice.cumulative_pct > 0.0 && slice.cumulative_pct <= 5.0 + 1e-9);
        assert!(!result.closure.contains(&scenario.master));
        assert!(result.outcome.is_complete());
        total_slices += result.slices.len();
    }
    assert_eq!(total_slices, 1_000);
}

/// Every cached answer is served without recomputation on the second pass.
#[test]
fn repeated_queries_hit_the_cache() {
    let engine = build();
    let scenario = fan_out(&engine, 100, LookthroughPolicy::None);

    for investor in &scenario.investors {
        engine.compute_exposure(investor, as_of()).unwrap();
    }
    let after_first = engine.cache().stats();
    assert_eq!(after_first.misses, 100);
    assert_eq!(after_first.entries, 100);

    for investor in &scenario.investors {
        engine.compute_exposure(investor, as_of()).unwrap();
    }
    let after_second = engine.cache().stats();
    assert_eq!(after_second.hits, 100);
    assert_eq!(after_second.misses, 100);
}

/// With ALWAYS the fund of funds is expanded, and the row cap keeps the
/// largest exposures.
#[test]
fn always_policy_expands_and_row_cap_keeps_largest() {
    let engine = build();
    let scenario = fan_out(&engine, 5, LookthroughPolicy::Always);
    let investor = &scenario.investors[0];

    let full = engine
        .exposure_with(investor, as_of(), &ExposureParams::new(6, 0.0, 200))
        .unwrap();
    assert_eq!(full.slices.len(), 200);
    assert!(!full.truncated);
    assert!(full.outcome.is_complete());
    assert!(full.slices.iter().all(|s| s.stop_reason == StopReason::Leaf));
    assert!(full.slices.iter().all(|s| s.depth == 3));
    assert!(full.closure.contains(&scenario.master));

    let capped = engine
        .exposure_with(investor, as_of(), &ExposureParams::new(6, 0.0, 50))
        .unwrap();
    assert_eq!(capped.slices.len(), 50);
    assert!(capped.truncated);
    assert_eq!(capped.outcome, WalkOutcome::Incomplete(IncompleteReason::RowLimit));
    assert_eq!(&capped.slices[..], &full.slices[..50]);

    let smallest_kept = capped.slices.last().unwrap().cumulative_pct;
    assert!(full.slices[50..].iter().all(|s| s.cumulative_pct <= smallest_kept));
}

/// Cumulative exposure is the product along the path and never exceeds
/// the first hop.
#[test]
fn cumulative_pct_is_product_of_hops() {
    let engine = build();
    let scenario = fan_out(&engine, 3, LookthroughPolicy::Always);
    let investor = &scenario.investors[0];
    let result = engine
        .exposure_with(investor, as_of(), &ExposureParams::new(6, 0.0, 200))
        .unwrap();

    let snapshot = engine.snapshot().unwrap();
    let first_hop = snapshot.positions_held_at(investor, as_of())[0].pct_of_issuer;
    for slice in &result.slices {
        let spv_pct = snapshot
            .positions_in_issuer_at(&slice.leaf, as_of())
            .iter()
            .find(|h| h.holder == scenario.master)
            .unwrap()
            .pct_of_issuer;
        let expected = 100.0 * (first_hop / 100.0) * 1.0 * (spv_pct / 100.0);
        assert!((slice.cumulative_pct - expected).abs() < 1e-9);
        assert!(slice.cumulative_pct <= first_hop);
    }
}

/// Two share classes in one fund are one step: each path is reported once,
/// so duplicates cannot crowd real exposures out of the row cap.
#[test]
fn share_classes_collapse_into_one_path() {
    let engine = build();
    for (id, name) in [("INV", "Investor"), ("X", "Umbrella Fund"), ("M", "Master"), ("Y", "Side Pocket")] {
        engine.register_entity(&Entity::fund(id, name)).unwrap();
    }
    let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    engine.record_holding(&NewHolding::new("INV", "X", 5.0, from).with_share_class("A")).unwrap();
    engine.record_holding(&NewHolding::new("INV", "X", 3.0, from).with_share_class("B")).unwrap();
    engine.record_holding(&NewHolding::new("INV", "Y", 1.0, from)).unwrap();
    engine.record_holding(&NewHolding::new("X", "M", 50.0, from)).unwrap();

    let result = engine
        .exposure_with("INV", as_of(), &ExposureParams::new(6, 0.0, 2))
        .unwrap();
    assert!(!result.truncated);
    let rows: Vec<(Vec<String>, f64)> = result
        .slices
        .iter()
        .map(|s| (s.path.clone(), s.cumulative_pct))
        .collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, vec!["INV", "Y"]);
    assert!((rows[0].1 - 1.0).abs() < 1e-9);
    assert_eq!(rows[1].0, vec!["INV", "X", "M"]);
    assert!((rows[1].1 - 4.0).abs() < 1e-9);
}

/// Branches below `min_pct` are pruned before they become rows.
#[test]
fn min_pct_prunes_small_branches() {
    let engine = build();
    let scenario = fan_out(&engine, 20, LookthroughPolicy::Always);
    let params = ExposureParams::new(6, 0.05, 200);
    for investor in &scenario.investors {
        let result = engine.exposure_with(investor, as_of(), &params).unwrap();
        assert!(result.slices.iter().all(|s| s.cumulative_pct >= 0.05));
        assert!(result.slices.len() <= 200);
    }
}

// ── Stop reasons ──────────────────────────────────────────────────

/// AUTO_IF_DATA without beneficial-owner data stops unless told otherwise.
#[test]
fn missing_bo_data_stops_unless_overridden() {
    let engine = build();
    let spec = FanOutSpec::new(as_of()).with_size(2, 10).with_fof_policy(LookthroughPolicy::AutoIfData);
    let scenario = build_fan_out(&engine, &spec).unwrap();
    engine
        .upsert_role_profile(
            &NewRoleProfile::new(&scenario.master, &scenario.fof, RoleType::IntermediaryFof, as_of())
                .with_lookthrough(LookthroughPolicy::AutoIfData)
                .without_bo_data(),
        )
        .unwrap();
    let investor = &scenario.investors[0];

    let stopped = engine.compute_exposure(investor, as_of()).unwrap();
    assert_eq!(stopped.slices.len(), 1);
    assert_eq!(stopped.slices[0].stop_reason, StopReason::NoBoData);

    let mut params = ExposureParams::new(6, 0.0, 200);
    params.stop_on_no_bo_data = false;
    let expanded = engine.exposure_with(investor, as_of(), &params).unwrap();
    assert_eq!(expanded.slices.len(), 10);
}

/// Hitting the depth limit with holdings left marks the answer incomplete.
#[test]
fn max_depth_stops_with_incomplete_outcome() {
    let engine = build();
    let scenario = fan_out(&engine, 2, LookthroughPolicy::Always);
    let result = engine
        .exposure_with(&scenario.investors[0], as_of(), &ExposureParams::new(1, 0.0, 200))
        .unwrap();
    assert_eq!(result.slices.len(), 1);
    assert_eq!(result.slices[0].stop_reason, StopReason::MaxDepth);
    assert_eq!(result.slices[0].leaf, scenario.fof);
    assert_eq!(result.outcome, WalkOutcome::Incomplete(IncompleteReason::Depth));
}

/// An entity with no holdings is its own single leaf.
#[test]
fn entity_without_holdings_is_a_leaf() {
    let engine = build();
    engine.register_entity(&Entity::person("solo", "Solo Investor")).unwrap();
    let result = engine.compute_exposure("solo", as_of()).unwrap();
    assert_eq!(result.slices.len(), 1);
    assert_eq!(result.slices[0].stop_reason, StopReason::Leaf);
    assert_eq!(result.slices[0].depth, 0);
    assert_eq!(result.slices[0].cumulative_pct, 100.0);
}

/// Budget-exhausted answers are returned but never cached.
#[test]
fn budget_exhausted_results_are_not_cached() {
    let engine = build();
    let scenario = fan_out(&engine, 2, LookthroughPolicy::Always);
    let params = ExposureParams::new(6, 0.0, 200).with_budget(WalkBudget::nodes(3));

    let result = engine.exposure_with(&scenario.investors[0], as_of(), &params).unwrap();
    assert_eq!(
        result.outcome,
        WalkOutcome::Incomplete(IncompleteReason::Budget(BudgetKind::Nodes))
    );
    assert!(!result.is_cacheable());
    assert!(engine.cache().is_empty());
}

// ── Invalidation ──────────────────────────────────────────────────

/// A new role-profile version on a node in the closure evicts the cached
/// answer; the old date still answers from the old version.
#[test]
fn role_profile_change_invalidates_cached_exposure() {
    let engine = build();
    let scenario = fan_out(&engine, 3, LookthroughPolicy::None);
    let investor = &scenario.investors[0];

    engine.compute_exposure(investor, as_of()).unwrap();
    assert_eq!(engine.cache().len(), 1);

    let next_day = as_of() + Duration::days(1);
    engine
        .upsert_role_profile(
            &NewRoleProfile::new(&scenario.master, &scenario.fof, RoleType::IntermediaryFof, next_day)
                .with_lookthrough(LookthroughPolicy::Always),
        )
        .unwrap();
    assert!(engine.cache().is_empty());
    assert!(engine.cache().stats().invalidations >= 1);

    let old = engine.compute_exposure(investor, as_of()).unwrap();
    assert_eq!(old.slices.len(), 1);
    assert_eq!(old.slices[0].stop_reason, StopReason::LookthroughNone);

    let new = engine
        .exposure_with(investor, next_day, &ExposureParams::new(6, 0.0, 200))
        .unwrap();
    assert_eq!(new.slices.len(), 200);
}

/// A new holding row for the investor evicts its cached answer; writes
/// outside the closure leave it alone.
#[test]
fn holding_change_invalidates_only_affected_entries() {
    let engine = build();
    let scenario = fan_out(&engine, 3, LookthroughPolicy::None);
    let (first, second) = (&scenario.investors[0], &scenario.investors[1]);

    engine.compute_exposure(first, as_of()).unwrap();
    engine.compute_exposure(second, as_of()).unwrap();
    assert_eq!(engine.cache().len(), 2);

    engine.register_entity(&Entity::company("unrelated", "Unrelated Co")).unwrap();
    assert_eq!(engine.cache().len(), 2);

    engine
        .record_holding(&NewHolding::new(first.as_str(), "unrelated", 12.0, as_of()))
        .unwrap();
    assert_eq!(engine.cache().len(), 1);

    let refreshed = engine.compute_exposure(first, as_of()).unwrap();
    assert_eq!(refreshed.slices.len(), 2);
    assert!(refreshed.slices.iter().any(|s| s.leaf == "unrelated"));
}

/// Engines sharing a cache see each other's answers.
#[test]
fn shared_cache_serves_both_engines() {
    let engine = build();
    let scenario = fan_out(&engine, 2, LookthroughPolicy::None);
    let investor = &scenario.investors[0];
    engine.compute_exposure(investor, as_of()).unwrap();

    let other = build().with_shared_cache(engine.cache().clone());
    assert_eq!(other.cache().len(), 1);
}
