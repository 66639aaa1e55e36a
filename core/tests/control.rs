//! Control facts and board-control rules. Control never mixes with ownership.

use chrono::NaiveDate;
use ubo_core::{
    budget::{IncompleteReason, WalkOutcome},
    config::EngineConfig,
    control_evaluator::BoardControlMethod,
    engine::OwnershipEngine,
    model::{ControlType, Entity, NewRelationship},
    ubo_status::QualifyingReason,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn build() -> OwnershipEngine {
    OwnershipEngine::build_test().expect("build_test failed")
}

fn register(engine: &OwnershipEngine, entities: &[Entity]) {
    for e in entities {
        engine.register_entity(e).unwrap();
    }
}

fn control(engine: &OwnershipEngine, from: &str, to: &str, ty: ControlType, rights: f64) {
    engine
        .record_relationship(&NewRelationship::control(from, to, ty, d(2024, 1, 1)).with_rights_pct(rights))
        .unwrap();
}

// ── Determination ─────────────────────────────────────────────────

/// A controller with no shares qualifies on control alone, and a
/// shareholder-controller keeps their true ownership percentage.
#[test]
fn control_qualifies_independently_of_ownership() {
    let engine = build();
    register(
        &engine,
        &[
            Entity::company("S", "Subject"),
            Entity::person("DIR", "Board Appointer"),
            Entity::person("Q", "Shareholder"),
        ],
    );
    control(&engine, "DIR", "S", ControlType::BoardAppointment, 60.0);
    control(&engine, "Q", "S", ControlType::VetoRights, 0.0);
    engine
        .record_relationship(&NewRelationship::ownership("Q", "S", 30.0, d(2024, 1, 1)))
        .unwrap();

    let run = engine.determine_ubos("S", d(2024, 2, 1)).unwrap();
    let det = &run.determination;
    assert_eq!(det.qualified.len(), 2);

    let q = det.qualified_person("Q").unwrap();
    assert_eq!(q.reason, QualifyingReason::OwnershipAndControl);
    assert!((q.ownership_pct - 30.0).abs() < 1e-9);
    assert_eq!(q.control_types, vec![ControlType::VetoRights]);

    let dir = det.qualified_person("DIR").unwrap();
    assert_eq!(dir.reason, QualifyingReason::Control);
    assert_eq!(dir.ownership_pct, 0.0);
    assert!(dir.chains.is_empty());
    assert_eq!(dir.control_types, vec![ControlType::BoardAppointment]);

    let control_only: Vec<&str> = det.control_only().map(|q| q.person.as_str()).collect();
    assert_eq!(control_only, vec!["DIR"]);
}

/// A small shareholder with no control stays below the threshold.
#[test]
fn minority_without_control_is_not_qualified() {
    let engine = build();
    register(&engine, &[Entity::company("S", "Subject"), Entity::person("M", "Minor")]);
    engine
        .record_relationship(&NewRelationship::ownership("M", "S", 5.0, d(2024, 1, 1)))
        .unwrap();
    let run = engine.determine_ubos("S", d(2024, 2, 1)).unwrap();
    assert!(run.determination.qualified.is_empty());
    assert_eq!(run.determination.below_threshold, vec![("M".to_string(), 5.0)]);
}

// ── Transitive control ────────────────────────────────────────────

/// The controller of a controller controls the subject.
#[test]
fn control_is_transitive() {
    let engine = build();
    register(
        &engine,
        &[
            Entity::company("S", "Subject"),
            Entity::company("GP", "General Partner"),
            Entity::person("P", "Principal"),
        ],
    );
    control(&engine, "GP", "S", ControlType::GpAuthority, 0.0);
    control(&engine, "P", "GP", ControlType::VotingRights, 80.0);

    let eval = engine.evaluate_control("S", d(2024, 2, 1)).unwrap();
    assert!(eval.outcome.is_complete());
    assert_eq!(eval.facts.len(), 2);
    let top = eval.facts.iter().find(|f| f.controller == "P").unwrap();
    assert_eq!(top.depth, 2);
    assert_eq!(top.controlled, "GP");
    assert_eq!(top.path, vec!["S", "GP", "P"]);

    let run = engine.determine_ubos("S", d(2024, 2, 1)).unwrap();
    let p = run.determination.qualified_person("P").unwrap();
    assert_eq!(p.reason, QualifyingReason::Control);
    assert!(!run.determination.is_qualified("GP"));
}

/// Circular control terminates and is reported.
#[test]
fn control_cycles_terminate() {
    let engine = build();
    register(&engine, &[Entity::company("A", "A Corp"), Entity::company("B", "B Corp")]);
    control(&engine, "B", "A", ControlType::BoardAppointment, 100.0);
    control(&engine, "A", "B", ControlType::BoardAppointment, 100.0);

    let eval = engine.evaluate_control("A", d(2024, 2, 1)).unwrap();
    assert_eq!(eval.facts.len(), 1);
    assert_eq!(eval.cycles.len(), 1);
    assert_eq!(eval.cycles[0].reentered, "A");
    assert!(eval.outcome.is_complete());
}

/// Control beyond the configured depth marks the evaluation incomplete.
#[test]
fn control_depth_is_bounded() {
    let mut config = EngineConfig::default_test();
    config.walk.control_depth = 1;
    let engine = OwnershipEngine::build_test_with(config).unwrap();
    register(
        &engine,
        &[
            Entity::company("S", "Subject"),
            Entity::company("GP", "General Partner"),
            Entity::person("P", "Principal"),
        ],
    );
    control(&engine, "GP", "S", ControlType::GpAuthority, 0.0);
    control(&engine, "P", "GP", ControlType::VotingRights, 80.0);

    let eval = engine.evaluate_control("S", d(2024, 2, 1)).unwrap();
    assert_eq!(eval.facts.len(), 1);
    assert_eq!(eval.outcome, WalkOutcome::Incomplete(IncompleteReason::Depth));
}

/// Closed control edges are invisible after their end date.
#[test]
fn closed_control_is_point_in_time() {
    let engine = build();
    register(&engine, &[Entity::company("S", "Subject"), Entity::person("P", "Principal")]);
    let edge = engine
        .record_relationship(&NewRelationship::control("P", "S", ControlType::GpAuthority, d(2024, 1, 1)))
        .unwrap();
    engine.close_relationship(&edge.edge_id, d(2024, 6, 1)).unwrap();

    assert_eq!(engine.evaluate_control("S", d(2024, 3, 1)).unwrap().facts.len(), 1);
    assert!(engine.evaluate_control("S", d(2024, 6, 1)).unwrap().facts.is_empty());
}

// ── Board control ─────────────────────────────────────────────────

/// One special instrument beats a board-appointment majority.
#[test]
fn single_special_instrument_wins() {
    let engine = build();
    register(
        &engine,
        &[
            Entity::company("S", "Subject"),
            Entity::person("GOLD", "Golden Share"),
            Entity::person("BOARD", "Board Majority"),
        ],
    );
    control(&engine, "GOLD", "S", ControlType::SpecialRights, 0.0);
    control(&engine, "BOARD", "S", ControlType::BoardAppointment, 80.0);

    let result = engine.board_controller("S", d(2024, 2, 1)).unwrap();
    assert_eq!(result.method, BoardControlMethod::SpecialInstrument);
    assert_eq!(result.controller.as_deref(), Some("GOLD"));
    assert_eq!(result.candidates.len(), 2);
}

/// Two parties with special instruments: nobody controls alone.
#[test]
fn competing_special_instruments_mean_no_single_controller() {
    let engine = build();
    register(
        &engine,
        &[
            Entity::company("S", "Subject"),
            Entity::person("V1", "Veto Holder"),
            Entity::person("V2", "Special Rights Holder"),
        ],
    );
    control(&engine, "V1", "S", ControlType::VetoRights, 0.0);
    control(&engine, "V2", "S", ControlType::SpecialRights, 0.0);

    let result = engine.board_controller("S", d(2024, 2, 1)).unwrap();
    assert_eq!(result.method, BoardControlMethod::NoSingleController);
    assert!(result.controller.is_none());
    assert_eq!(result.candidates.len(), 2);
}

/// Appointing half the board is enough.
#[test]
fn board_appointment_at_threshold_controls() {
    let engine = build();
    register(
        &engine,
        &[
            Entity::company("S", "Subject"),
            Entity::person("HALF", "Half the Board"),
            Entity::person("VOTER", "Voter"),
        ],
    );
    control(&engine, "HALF", "S", ControlType::BoardAppointment, 50.0);
    control(&engine, "VOTER", "S", ControlType::VotingRights, 70.0);

    let result = engine.board_controller("S", d(2024, 2, 1)).unwrap();
    assert_eq!(result.method, BoardControlMethod::BoardAppointment);
    assert_eq!(result.controller.as_deref(), Some("HALF"));
}

/// Votes need a strict majority.
#[test]
fn voting_majority_must_exceed_half() {
    let engine = build();
    register(
        &engine,
        &[
            Entity::company("S", "Subject"),
            Entity::company("T", "Target"),
            Entity::person("A", "Holder A"),
            Entity::person("B", "Holder B"),
        ],
    );
    control(&engine, "A", "S", ControlType::VotingRights, 50.0);
    control(&engine, "B", "S", ControlType::VotingRights, 50.0);
    control(&engine, "A", "T", ControlType::VotingRights, 50.5);

    let tied = engine.board_controller("S", d(2024, 2, 1)).unwrap();
    assert_eq!(tied.method, BoardControlMethod::NoSingleController);
    assert!(tied.controller.is_none());
    assert_eq!(tied.candidates.len(), 2);

    let majority = engine.board_controller("T", d(2024, 2, 1)).unwrap();
    assert_eq!(majority.method, BoardControlMethod::VotingMajority);
    assert_eq!(majority.controller.as_deref(), Some("A"));
}

#[test]
fn entity_without_controllers_has_none() {
    let engine = build();
    register(&engine, &[Entity::company("S", "Subject")]);
    let result = engine.board_controller("S", d(2024, 2, 1)).unwrap();
    assert_eq!(result.method, BoardControlMethod::NoSingleController);
    assert!(result.candidates.is_empty());
}
