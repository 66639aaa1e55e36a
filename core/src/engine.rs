//! The ownership engine: store, configuration and the pure walkers wired
//! together.
//!
//! RULES:
//!   - Writes go to the store, which audits them and records the entities
//!     they touched.
//!   - Reads run over an immutable `GraphSnapshot`. The snapshot is reloaded
//!     only after a write.
//!   - Every read first drains the store's touched entities into the exposure
//!     cache, so a cached answer never outlives a change to its closure.
//!   - `as_of` is always explicit. Nothing defaults to "latest".

use crate::{
    config::EngineConfig,
    control_evaluator::{board_controller, evaluate_control, BoardControlResult, ControlEvaluation},
    determination::{
        determine_ubos, diff_determinations, plan_record_sync, DeterminationDiff, DeterminationRun,
        UboDetermination,
    },
    error::{GraphError, GraphResult},
    event::AuditEvent,
    exposure::{compute_exposure, ExposureParams, ExposureResult},
    exposure_cache::{CacheKey, ExposureCache},
    model::{
        Entity, HoldingEdge, NewHolding, NewRelationship, Provenance, RelationshipEdge,
        RelationshipKind, UsageIntent,
    },
    ownership_walker::{compute_ubo_chains, compute_ubo_chains_batch, UboWalk, WalkParams},
    reconciliation::{reconcile_ownership, OwnershipReconciliation},
    risk_scorer::{self, CaseDecision, CaseRiskInputs, RiskScoreSnapshot},
    role_profile::{NewRoleProfile, RoleProfile, UboGate},
    snapshot::GraphSnapshot,
    store::GraphStore,
    types::{new_id, EntityId, Pct, RecordId},
    ubo_status::{EvidenceKind, TransitionReceipt, UboEvidence, UboRecord, UboStatus},
};
use chrono::{NaiveDate, Utc};
use log::{debug, info, warn};
use std::{cell::RefCell, sync::Arc};

/// What `sync_ubo_records` changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSyncReport {
    pub created: Vec<UboRecord>,
    pub removed: Vec<RecordId>,
    /// Records no longer qualified whose status cannot move to REMOVED.
    pub retained: Vec<(RecordId, UboStatus)>,
}

pub struct OwnershipEngine {
    pub store: GraphStore,
    pub config: EngineConfig,
    gate: UboGate,
    cache: Arc<ExposureCache>,
    snapshot: RefCell<Option<(u64, Arc<GraphSnapshot>)>>,
}

impl OwnershipEngine {
    pub fn new(store: GraphStore, config: EngineConfig) -> Self {
        let cache = Arc::new(ExposureCache::new(config.cache));
        Self {
            gate: UboGate::new(config.pooled_vehicles),
            store,
            config,
            cache,
            snapshot: RefCell::new(None),
        }
    }

    /// Open (or create) the database at `db_path`, migrate it and wire the
    /// engine.
    pub fn build(db_path: &str, config: EngineConfig) -> GraphResult<Self> {
        let store = GraphStore::open(db_path)?;
        store.migrate()?;
        Ok(Self::new(store, config))
    }

    /// In-memory store with default configuration.
    pub fn build_test() -> GraphResult<Self> {
        Self::build_test_with(EngineConfig::default_test())
    }

    pub fn build_test_with(config: EngineConfig) -> GraphResult<Self> {
        let store = GraphStore::in_memory()?;
        store.migrate()?;
        Ok(Self::new(store, config))
    }

    /// Share one exposure cache between engines reading the same data.
    pub fn with_shared_cache(mut self, cache: Arc<ExposureCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<ExposureCache> {
        &self.cache
    }

    pub fn gate(&self) -> &UboGate {
        &self.gate
    }

    /// Push pending store changes into the exposure cache.
    pub fn flush_changes(&self) -> usize {
        let touched = self.store.take_touched();
        let mut dropped = 0;
        for entity in &touched {
            dropped += self.cache.invalidate_entity(entity);
        }
        if dropped > 0 {
            debug!(
                "Invalidated {dropped} cached exposure result(s) after changes to {} entities",
                touched.len()
            );
        }
        dropped
    }

    /// The current graph. Reloaded when the store has been written since the
    /// last load.
    pub fn snapshot(&self) -> GraphResult<Arc<GraphSnapshot>> {
        self.flush_changes();
        let generation = self.store.generation();
        if let Some((loaded_at, snapshot)) = self.snapshot.borrow().as_ref() {
            if *loaded_at == generation {
                return Ok(Arc::clone(snapshot));
            }
        }
        let snapshot = Arc::new(self.store.load_snapshot()?);
        *self.snapshot.borrow_mut() = Some((generation, Arc::clone(&snapshot)));
        Ok(snapshot)
    }

    // ── Graph writes ───────────────────────────────────────────

    pub fn register_entity(&self, entity: &Entity) -> GraphResult<()> {
        self.store.insert_entity(entity)?;
        self.flush_changes();
        Ok(())
    }

    pub fn record_relationship(&self, rel: &NewRelationship) -> GraphResult<RelationshipEdge> {
        let edge = self.store.insert_relationship(rel)?;
        self.flush_changes();
        Ok(edge)
    }

    pub fn close_relationship(&self, edge_id: &str, effective_to: NaiveDate) -> GraphResult<RelationshipEdge> {
        let edge = self.store.close_relationship(edge_id, effective_to)?;
        self.flush_changes();
        Ok(edge)
    }

    pub fn supersede_relationship(
        &self,
        edge_id: &str,
        replacement: &NewRelationship,
    ) -> GraphResult<RelationshipEdge> {
        let edge = self.store.supersede_relationship(edge_id, replacement)?;
        self.flush_changes();
        Ok(edge)
    }

    pub fn upsert_role_profile(&self, profile: &NewRoleProfile) -> GraphResult<RoleProfile> {
        let profile = self.store.upsert_role_profile(profile)?;
        self.flush_changes();
        Ok(profile)
    }

    pub fn record_holding(&self, holding: &NewHolding) -> GraphResult<HoldingEdge> {
        let holding = self.store.insert_holding(holding)?;
        self.flush_changes();
        Ok(holding)
    }

    /// Promote UBO-intent positions at or above the UBO threshold into direct
    /// OWNERSHIP edges, when the holder passes the gate and no version of
    /// the edge overlaps the holding's date onwards.
    pub fn sync_holdings_to_ownership(&self, as_of: NaiveDate) -> GraphResult<Vec<RelationshipEdge>> {
        let snapshot = self.snapshot()?;
        let threshold = self.config.walk.ubo_threshold_pct;
        let mut candidates: Vec<HoldingEdge> = Vec::new();
        for holder in snapshot.holders() {
            for holding in snapshot.positions_held_at(holder, as_of) {
                if holding.usage_intent != UsageIntent::Ubo || holding.pct_of_issuer < threshold {
                    continue;
                }
                let profile = snapshot.role_profiles().profile_for(
                    &holding.issuer,
                    &holding.holder,
                    holding.share_class.as_deref(),
                    as_of,
                );
                if !self.gate.decide(profile, holding.usage_intent).is_eligible() {
                    debug!(
                        "Holding {} not synced: {} is not UBO-eligible in {}",
                        holding.holding_id, holding.holder, holding.issuer
                    );
                    continue;
                }
                candidates.push(holding.clone());
            }
        }

        let mut created = Vec::new();
        for holding in candidates {
            if self
                .store
                .overlapping_relationship(
                    &holding.holder,
                    &holding.issuer,
                    RelationshipKind::Ownership,
                    holding.as_of_date,
                    None,
                )?
                .is_some()
            {
                continue;
            }
            let rel = NewRelationship::ownership(
                holding.holder.clone(),
                holding.issuer.clone(),
                holding.pct_of_issuer,
                holding.as_of_date,
            )
            .with_provenance(
                Provenance::new(Provenance::INVESTOR_REGISTER).with_reference(holding.holding_id.clone()),
            );
            let edge = self.store.insert_relationship(&rel)?;
            self.store.append_audit(&AuditEvent::OwnershipSyncedFromHolding {
                holding_id: holding.holding_id.clone(),
                edge_id: edge.edge_id.clone(),
            })?;
            created.push(edge);
        }
        if !created.is_empty() {
            info!("Synced {} ownership edge(s) from holdings at {as_of}", created.len());
        }
        self.flush_changes();
        Ok(created)
    }

    // ── Ownership and control ──────────────────────────────────

    /// Ownership chains from `subject` up to natural persons.
    pub fn compute_ubo_chains(
        &self,
        subject: &str,
        as_of: NaiveDate,
        max_depth: usize,
        min_threshold_pct: Pct,
    ) -> GraphResult<UboWalk> {
        let params = WalkParams::new(max_depth, min_threshold_pct).with_budget(self.config.walk.budget());
        self.ubo_chains_with(subject, as_of, &params)
    }

    pub fn ubo_chains_with(&self, subject: &str, as_of: NaiveDate, params: &WalkParams) -> GraphResult<UboWalk> {
        let snapshot = self.snapshot()?;
        compute_ubo_chains(&snapshot, subject, as_of, params)
    }

    /// Walks for several subjects in parallel over one snapshot.
    pub fn ubo_chains_batch(
        &self,
        subjects: &[EntityId],
        as_of: NaiveDate,
        min_threshold_pct: Pct,
    ) -> GraphResult<Vec<GraphResult<UboWalk>>> {
        let snapshot = self.snapshot()?;
        let params = self.config.walk_params(min_threshold_pct);
        Ok(compute_ubo_chains_batch(&snapshot, subjects, as_of, &params))
    }

    pub fn evaluate_control(&self, subject: &str, as_of: NaiveDate) -> GraphResult<ControlEvaluation> {
        let snapshot = self.snapshot()?;
        evaluate_control(
            &snapshot,
            subject,
            as_of,
            self.config.walk.control_depth,
            &self.config.walk.budget(),
        )
    }

    pub fn board_controller(&self, entity_id: &str, as_of: NaiveDate) -> GraphResult<BoardControlResult> {
        let snapshot = self.snapshot()?;
        board_controller(&snapshot, entity_id, as_of, &self.config.board_control)
    }

    pub fn is_ubo_eligible(
        &self,
        issuer: &str,
        holder: &str,
        usage_intent: UsageIntent,
        as_of: NaiveDate,
    ) -> GraphResult<bool> {
        let snapshot = self.snapshot()?;
        Ok(self
            .gate
            .is_ubo_eligible(snapshot.role_profiles(), issuer, holder, usage_intent, as_of))
    }

    // ── Determinations and UBO records ─────────────────────────

    /// Determine the UBOs of `subject` at `as_of` and persist the run.
    pub fn determine_ubos(&self, subject: &str, as_of: NaiveDate) -> GraphResult<DeterminationRun> {
        let snapshot = self.snapshot()?;
        let params = self.config.determination_params();
        let determination = determine_ubos(&snapshot, &self.gate, subject, as_of, &params)?;

        for cycle in &determination.cycles {
            self.store.append_audit(&AuditEvent::CycleDetected {
                subject: subject.to_string(),
                path: cycle.path.clone(),
            })?;
        }

        let run = DeterminationRun {
            run_id: new_id("run"),
            subject: subject.to_string(),
            as_of,
            threshold_pct: determination.threshold_pct,
            qualified_count: determination.qualified.len(),
            computed_at: Utc::now(),
            determination,
        };
        self.store.save_determination_run(&run)?;
        info!(
            "Determination {} for {subject} @ {as_of}: {} qualified, {} suppressed, outcome {:?}",
            run.run_id,
            run.qualified_count,
            run.determination.suppressed.len(),
            run.determination.outcome
        );
        Ok(run)
    }

    pub fn diff_runs(&self, before_run_id: &str, after_run_id: &str) -> GraphResult<DeterminationDiff> {
        let before = self.store.get_determination_run(before_run_id)?;
        let after = self.store.get_determination_run(after_run_id)?;
        if before.subject != after.subject {
            return Err(GraphError::InvalidParameter {
                name: "after_run_id",
                reason: format!(
                    "runs are for different subjects ({} vs {})",
                    before.subject, after.subject
                ),
            });
        }
        Ok(diff_determinations(&before.determination, &after.determination))
    }

    /// Bring the subject's UBO records in line with a determination: new
    /// owners get a SUSPECTED record, departed owners move to REMOVED where
    /// the state machine allows it and are otherwise retained and audited.
    pub fn sync_ubo_records(&self, determination: &UboDetermination, actor: &str) -> GraphResult<RecordSyncReport> {
        let existing = self.store.ubo_records_for_subject(&determination.subject)?;
        let plan = plan_record_sync(determination, &existing);

        let mut report = RecordSyncReport::default();
        for new in &plan.create {
            report.created.push(self.store.create_ubo_record(new)?);
        }
        for record_id in plan.remove {
            self.store.transition_ubo_record(
                &record_id,
                UboStatus::Removed,
                actor,
                Some("owner no longer qualifies"),
            )?;
            report.removed.push(record_id);
        }
        for (record_id, status) in plan.blocked {
            warn!("UBO record {record_id} no longer qualifies but is {status}; retained");
            self.store.append_audit(&AuditEvent::IneligibleRecordRetained {
                record_id: record_id.clone(),
                status,
            })?;
            report.retained.push((record_id, status));
        }
        Ok(report)
    }

    pub fn transition_ubo(
        &self,
        record_id: &str,
        to_status: UboStatus,
        actor: &str,
        note: Option<&str>,
    ) -> GraphResult<TransitionReceipt> {
        self.store.transition_ubo_record(record_id, to_status, actor, note)
    }

    pub fn attach_evidence(&self, record_id: &str, kind: EvidenceKind, document_ref: &str) -> GraphResult<UboEvidence> {
        self.store.attach_evidence(record_id, kind, document_ref)
    }

    // ── Exposure ───────────────────────────────────────────────

    /// Look-through exposure of `root` with the configured limits.
    pub fn compute_exposure(&self, root: &str, as_of: NaiveDate) -> GraphResult<Arc<ExposureResult>> {
        self.exposure_with(root, as_of, &self.config.exposure_params())
    }

    pub fn exposure_with(
        &self,
        root: &str,
        as_of: NaiveDate,
        params: &ExposureParams,
    ) -> GraphResult<Arc<ExposureResult>> {
        let snapshot = self.snapshot()?;
        let key = CacheKey::new(root, as_of, params);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let result = compute_exposure(&snapshot, root, as_of, params)?;
        if result.is_cacheable() {
            Ok(self.cache.insert(key, result))
        } else {
            Ok(Arc::new(result))
        }
    }

    pub fn reconcile_ownership(&self, issuer: &str, as_of: NaiveDate) -> GraphResult<OwnershipReconciliation> {
        let snapshot = self.snapshot()?;
        reconcile_ownership(&snapshot, issuer, as_of, self.config.reconciliation.tolerance_pct)
    }

    // ── Cases ──────────────────────────────────────────────────

    fn score_case(&self, case_id: &str) -> GraphResult<risk_scorer::CaseScore> {
        let flags = self.store.red_flags_for_case(case_id)?;
        let subjects = self.store.case_subjects(case_id)?;
        let inputs = CaseRiskInputs {
            flags: &flags,
            disputed_ubo_records: self.store.disputed_record_count(&subjects)?,
            records_missing_evidence: self.store.records_missing_evidence_count(&subjects)?,
        };
        Ok(risk_scorer::score(&inputs, &self.config.scoring))
    }

    /// Score the case, map it to an action and persist the snapshot.
    pub fn evaluate_case(&self, case_id: &str, actor: &str) -> GraphResult<RiskScoreSnapshot> {
        let score = self.score_case(case_id)?;
        let snapshot = RiskScoreSnapshot {
            snapshot_id: new_id("score"),
            case_id: case_id.to_string(),
            score,
            recommended_action: risk_scorer::evaluate(&score, &self.config.scoring),
            evaluated_by: actor.to_string(),
            evaluated_at: Utc::now(),
            decision: None,
            decided_by: None,
            decision_notes: None,
        };
        self.store.insert_score_snapshot(&snapshot)?;
        self.store.append_audit(&AuditEvent::CaseEvaluated {
            snapshot_id: snapshot.snapshot_id.clone(),
            case_id: case_id.to_string(),
            total_score: score.total_score,
            has_hard_stop: score.has_hard_stop,
            recommended_action: snapshot.recommended_action,
        })?;
        info!(
            "Case {case_id} scored {} -> {}",
            score.total_score, snapshot.recommended_action
        );
        Ok(snapshot)
    }

    /// Record a human decision. The case is re-scored first; approving over
    /// an open hard stop is refused and audited.
    pub fn apply_decision(
        &self,
        case_id: &str,
        decision: CaseDecision,
        actor: &str,
        notes: Option<&str>,
    ) -> GraphResult<RiskScoreSnapshot> {
        let score = self.score_case(case_id)?;
        if let Err(e) = risk_scorer::validate_decision(case_id, decision, &score) {
            warn!("{e}");
            self.store.append_audit(&AuditEvent::CaseDecisionRejected {
                case_id: case_id.to_string(),
                decision,
                hard_stops: score.hard_stop_count,
                actor: actor.to_string(),
            })?;
            return Err(e);
        }

        let snapshot = RiskScoreSnapshot {
            snapshot_id: new_id("score"),
            case_id: case_id.to_string(),
            score,
            recommended_action: risk_scorer::evaluate(&score, &self.config.scoring),
            evaluated_by: actor.to_string(),
            evaluated_at: Utc::now(),
            decision: Some(decision),
            decided_by: Some(actor.to_string()),
            decision_notes: notes.map(str::to_string),
        };
        self.store.insert_score_snapshot(&snapshot)?;
        self.store.append_audit(&AuditEvent::CaseDecided {
            snapshot_id: snapshot.snapshot_id.clone(),
            case_id: case_id.to_string(),
            decision,
            actor: actor.to_string(),
        })?;
        Ok(snapshot)
    }
}
