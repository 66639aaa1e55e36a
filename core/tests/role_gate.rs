//! The UBO gate: role profiles, pooled-vehicle default deny, usage intent
//! and record synchronisation.

use chrono::NaiveDate;
use ubo_core::{
    config::EngineConfig,
    engine::OwnershipEngine,
    model::{ControlType, Entity, NewHolding, NewRelationship, Provenance, RelationshipKind, UsageIntent},
    role_profile::{NewRoleProfile, PooledVehicleMode, RoleType, SuppressionReason},
    ubo_status::{QualifyingReason, UboStatus},
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn build() -> OwnershipEngine {
    OwnershipEngine::build_test().expect("build_test failed")
}

/// Subject S is 60% held by fund X, which P owns half of: P's look-through
/// stake is 30%.
fn seed_fund_structure(engine: &OwnershipEngine) {
    engine.register_entity(&Entity::company("S", "Operating Co")).unwrap();
    engine.register_entity(&Entity::fund("X", "Pooled Fund")).unwrap();
    engine.register_entity(&Entity::person("P", "Pat Investor")).unwrap();
    let from = d(2024, 1, 1);
    engine.record_relationship(&NewRelationship::ownership("X", "S", 60.0, from)).unwrap();
    engine.record_relationship(&NewRelationship::ownership("P", "X", 50.0, from)).unwrap();
}

// ── Pooled vehicles ───────────────────────────────────────────────

/// Without a profile the fund is walked through like any other owner.
#[test]
fn fund_without_profile_is_looked_through() {
    let engine = build();
    seed_fund_structure(&engine);

    let run = engine.determine_ubos("S", d(2024, 2, 1)).unwrap();
    let p = run.determination.qualified_person("P").expect("P qualifies");
    assert!((p.ownership_pct - 30.0).abs() < 1e-9);
    assert_eq!(p.reason, QualifyingReason::Ownership);
    assert!(run.determination.suppressed.is_empty());
}

/// A fund-of-funds profile with no explicit eligibility is default-denied.
#[test]
fn pooled_vehicle_default_deny_suppresses_chain() {
    let engine = build();
    seed_fund_structure(&engine);
    engine
        .upsert_role_profile(&NewRoleProfile::new("S", "X", RoleType::IntermediaryFof, d(2024, 1, 1)))
        .unwrap();

    let run = engine.determine_ubos("S", d(2024, 2, 1)).unwrap();
    let det = &run.determination;
    assert!(!det.is_qualified("P"));
    assert_eq!(det.suppressed.len(), 1);
    let s = &det.suppressed[0];
    assert_eq!(s.issuer, "S");
    assert_eq!(s.holder, "X");
    assert_eq!(
        s.reason,
        SuppressionReason::PooledVehicleDefaultDeny {
            role_type: RoleType::IntermediaryFof
        }
    );
}

/// Flag-only mode keeps the owner but carries the review flag.
#[test]
fn flag_only_mode_keeps_owner_with_flag() {
    let mut config = EngineConfig::default_test();
    config.pooled_vehicles.mode = PooledVehicleMode::FlagOnly;
    let engine = OwnershipEngine::build_test_with(config).unwrap();
    seed_fund_structure(&engine);
    engine
        .upsert_role_profile(&NewRoleProfile::new("S", "X", RoleType::MasterPool, d(2024, 1, 1)))
        .unwrap();

    let run = engine.determine_ubos("S", d(2024, 2, 1)).unwrap();
    let p = run.determination.qualified_person("P").expect("flagged owners still qualify");
    assert_eq!(
        p.flags,
        vec![SuppressionReason::PooledVehicleDefaultDeny {
            role_type: RoleType::MasterPool
        }]
    );
    assert!(run.determination.suppressed.is_empty());
}

/// An explicit eligibility flag overrides the default deny.
#[test]
fn explicit_eligibility_overrides_default_deny() {
    let engine = build();
    seed_fund_structure(&engine);
    engine
        .upsert_role_profile(
            &NewRoleProfile::new("S", "X", RoleType::IntermediaryFof, d(2024, 1, 1)).with_ubo_eligibility(true),
        )
        .unwrap();
    let run = engine.determine_ubos("S", d(2024, 2, 1)).unwrap();
    assert!(run.determination.is_qualified("P"));
}

/// An end investor explicitly marked ineligible is suppressed.
#[test]
fn explicit_ineligibility_suppresses() {
    let engine = build();
    seed_fund_structure(&engine);
    engine
        .upsert_role_profile(
            &NewRoleProfile::new("X", "P", RoleType::Nominee, d(2024, 1, 1)).with_ubo_eligibility(false),
        )
        .unwrap();
    let run = engine.determine_ubos("S", d(2024, 2, 1)).unwrap();
    let det = &run.determination;
    assert!(!det.is_qualified("P"));
    assert_eq!(
        det.suppressed[0].reason,
        SuppressionReason::ExplicitlyIneligible {
            role_type: RoleType::Nominee
        }
    );
}

/// Profiles are point-in-time: the deny only applies from its effective date.
#[test]
fn profile_versions_apply_from_their_date() {
    let engine = build();
    seed_fund_structure(&engine);
    engine
        .upsert_role_profile(
            &NewRoleProfile::new("S", "X", RoleType::IntermediaryFof, d(2024, 1, 1)).with_ubo_eligibility(true),
        )
        .unwrap();
    engine
        .upsert_role_profile(&NewRoleProfile::new("S", "X", RoleType::IntermediaryFof, d(2024, 6, 1)))
        .unwrap();

    assert!(engine.determine_ubos("S", d(2024, 3, 1)).unwrap().determination.is_qualified("P"));
    assert!(!engine.determine_ubos("S", d(2024, 7, 1)).unwrap().determination.is_qualified("P"));
}

// ── Controlled elsewhere ──────────────────────────────────────────

/// A plain fund with an outside GP is still looked through; only pooled
/// vehicle role types are checked for outside control.
#[test]
fn plain_fund_with_outside_gp_keeps_chain() {
    let engine = build();
    seed_fund_structure(&engine);
    engine.register_entity(&Entity::company("GP", "General Partner LLC")).unwrap();
    engine
        .record_relationship(&NewRelationship::control("GP", "X", ControlType::GpAuthority, d(2024, 1, 1)))
        .unwrap();

    let run = engine.determine_ubos("S", d(2024, 2, 1)).unwrap();
    let p = run.determination.qualified_person("P").expect("P qualifies");
    assert!((p.ownership_pct - 30.0).abs() < 1e-9);
    assert!(run.determination.suppressed.is_empty());
}

/// An eligible pooled vehicle run by a GP other than the chain's owner does
/// not pass ownership up.
#[test]
fn pooled_vehicle_controlled_by_someone_else_suppresses_chain() {
    let engine = build();
    seed_fund_structure(&engine);
    engine
        .upsert_role_profile(
            &NewRoleProfile::new("S", "X", RoleType::MasterPool, d(2024, 1, 1)).with_ubo_eligibility(true),
        )
        .unwrap();
    engine.register_entity(&Entity::company("GP", "General Partner LLC")).unwrap();
    engine
        .record_relationship(&NewRelationship::control("GP", "X", ControlType::GpAuthority, d(2024, 1, 1)))
        .unwrap();

    let run = engine.determine_ubos("S", d(2024, 2, 1)).unwrap();
    let det = &run.determination;
    assert!(!det.is_qualified("P"));
    assert_eq!(
        det.suppressed[0].reason,
        SuppressionReason::ControlledElsewhere {
            vehicle: "X".into(),
            controllers: vec!["GP".into()],
        }
    );
}

/// When the owner is also the pooled vehicle's controller the chain stands.
#[test]
fn owner_controlling_the_fund_keeps_chain() {
    let engine = build();
    seed_fund_structure(&engine);
    engine
        .upsert_role_profile(
            &NewRoleProfile::new("S", "X", RoleType::MasterPool, d(2024, 1, 1)).with_ubo_eligibility(true),
        )
        .unwrap();
    engine
        .record_relationship(&NewRelationship::control("P", "X", ControlType::GpAuthority, d(2024, 1, 1)))
        .unwrap();
    let run = engine.determine_ubos("S", d(2024, 2, 1)).unwrap();
    assert!(run.determination.is_qualified("P"));
}

// ── Eligibility queries ───────────────────────────────────────────

#[test]
fn transfer_agency_intent_is_never_eligible() {
    let engine = build();
    seed_fund_structure(&engine);
    let as_of = d(2024, 2, 1);
    assert!(!engine.is_ubo_eligible("S", "X", UsageIntent::TransferAgency, as_of).unwrap());
    assert!(engine.is_ubo_eligible("S", "X", UsageIntent::Ubo, as_of).unwrap());

    engine
        .upsert_role_profile(&NewRoleProfile::new("S", "X", RoleType::Omnibus, d(2024, 1, 1)))
        .unwrap();
    // Omnibus is not a pooled vehicle type, so no default deny.
    assert!(engine.is_ubo_eligible("S", "X", UsageIntent::Ubo, as_of).unwrap());

    engine
        .upsert_role_profile(&NewRoleProfile::new("S", "X", RoleType::IntraGroupPool, d(2024, 1, 15)))
        .unwrap();
    assert!(!engine.is_ubo_eligible("S", "X", UsageIntent::Ubo, as_of).unwrap());
}

// ── Holdings feed ownership ───────────────────────────────────────

/// Only UBO-intent positions at or above the threshold become edges, once.
#[test]
fn holdings_sync_respects_intent_threshold_and_gate() {
    let engine = build();
    for e in [
        Entity::company("ISS", "Issuer"),
        Entity::person("BIG", "Big Holder"),
        Entity::person("TA", "Register Only"),
        Entity::person("SMALL", "Small Holder"),
        Entity::fund("POOL", "Pooled Fund"),
    ] {
        engine.register_entity(&e).unwrap();
    }
    let as_of = d(2024, 3, 31);
    let big = engine.record_holding(&NewHolding::new("BIG", "ISS", 30.0, as_of).for_ubo()).unwrap();
    engine.record_holding(&NewHolding::new("TA", "ISS", 20.0, as_of)).unwrap();
    engine.record_holding(&NewHolding::new("SMALL", "ISS", 10.0, as_of).for_ubo()).unwrap();
    engine.record_holding(&NewHolding::new("POOL", "ISS", 35.0, as_of).for_ubo()).unwrap();
    engine
        .upsert_role_profile(&NewRoleProfile::new("ISS", "POOL", RoleType::MasterPool, d(2024, 1, 1)))
        .unwrap();

    let created = engine.sync_holdings_to_ownership(as_of).unwrap();
    assert_eq!(created.len(), 1);
    let edge = &created[0];
    assert_eq!(edge.from_entity, "BIG");
    assert_eq!(edge.to_entity, "ISS");
    assert_eq!(edge.percentage, Some(30.0));
    assert_eq!(edge.provenance.source, Provenance::INVESTOR_REGISTER);
    assert_eq!(edge.provenance.reference.as_deref(), Some(big.holding_id.as_str()));

    assert!(engine.sync_holdings_to_ownership(as_of).unwrap().is_empty());
    assert!(engine
        .store
        .open_relationship("TA", "ISS", RelationshipKind::Ownership)
        .unwrap()
        .is_none());
    assert_eq!(
        engine.store.audit_events_of_type("ownership_synced_from_holding").unwrap().len(),
        1
    );

    let recon = engine.reconcile_ownership("ISS", as_of).unwrap();
    assert!(!recon.is_clean());
    let big_line = recon.lines.iter().find(|l| l.holder == "BIG").unwrap();
    assert!(big_line.delta.abs() < 1e-9);
}

// ── Record synchronisation ────────────────────────────────────────

/// New owners get SUSPECTED records; departed owners are removed.
#[test]
fn records_follow_determinations() {
    let engine = build();
    seed_fund_structure(&engine);

    let run = engine.determine_ubos("S", d(2024, 2, 1)).unwrap();
    let report = engine.sync_ubo_records(&run.determination, "analyst").unwrap();
    assert_eq!(report.created.len(), 1);
    let record = &report.created[0];
    assert_eq!(record.ubo_person, "P");
    assert_eq!(record.status, UboStatus::Suspected);
    assert_eq!(engine.store.ubo_record_chains(&record.record_id).unwrap().len(), 1);

    // Re-syncing the same answer changes nothing.
    let again = engine.sync_ubo_records(&run.determination, "analyst").unwrap();
    assert!(again.created.is_empty() && again.removed.is_empty());

    let edge = engine
        .store
        .open_relationship("P", "X", RelationshipKind::Ownership)
        .unwrap()
        .unwrap();
    engine
        .supersede_relationship(&edge.edge_id, &NewRelationship::ownership("P", "X", 10.0, d(2024, 5, 1)))
        .unwrap();
    let later = engine.determine_ubos("S", d(2024, 6, 1)).unwrap();
    let report = engine.sync_ubo_records(&later.determination, "analyst").unwrap();
    assert_eq!(report.removed, vec![record.record_id.clone()]);
    assert_eq!(
        engine.store.get_ubo_record(&record.record_id).unwrap().status,
        UboStatus::Removed
    );
}

/// A FAILED record cannot move to REMOVED; it is retained and audited.
#[test]
fn blocked_records_are_retained_and_audited() {
    let engine = build();
    seed_fund_structure(&engine);
    let run = engine.determine_ubos("S", d(2024, 2, 1)).unwrap();
    let record = engine.sync_ubo_records(&run.determination, "analyst").unwrap().created.remove(0);
    engine
        .transition_ubo(&record.record_id, UboStatus::Failed, "analyst", Some("could not verify"))
        .unwrap();

    engine
        .upsert_role_profile(&NewRoleProfile::new("S", "X", RoleType::IntermediaryFof, d(2024, 3, 1)))
        .unwrap();
    let later = engine.determine_ubos("S", d(2024, 4, 1)).unwrap();
    assert!(!later.determination.is_qualified("P"));

    let report = engine.sync_ubo_records(&later.determination, "analyst").unwrap();
    assert!(report.removed.is_empty());
    assert_eq!(report.retained, vec![(record.record_id.clone(), UboStatus::Failed)]);
    let audited = engine.store.audit_events_of_type("ineligible_record_retained").unwrap();
    assert_eq!(audited.len(), 1);
    assert_eq!(audited[0].subject_id, record.record_id);
}
