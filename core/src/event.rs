//! Audit events — the append-only record of everything the engine changed
//! or warned about.
//!
//! RULE: Every supersede/close, UBO status change, evidence warning,
//! determination run and case evaluation emits exactly one event.
//! Variants are only ever appended, never removed or reordered.

use crate::{
    budget::WalkOutcome,
    model::RelationshipKind,
    risk_scorer::{CaseDecision, RecommendedAction},
    types::{CaseId, EdgeId, EntityId, HoldingId, RecordId},
    ubo_status::{EvidenceKind, UboStatus},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // ── Graph writes ───────────────────────────────
    EntityRegistered {
        entity_id: EntityId,
        category: String,
    },
    EdgeRecorded {
        edge_id: EdgeId,
        from_entity: EntityId,
        to_entity: EntityId,
        kind: RelationshipKind,
    },
    EdgeClosed {
        edge_id: EdgeId,
        effective_to: NaiveDate,
    },
    EdgeSuperseded {
        closed_edge_id: EdgeId,
        new_edge_id: EdgeId,
        effective_from: NaiveDate,
    },
    RoleProfileVersioned {
        profile_id: String,
        issuer: EntityId,
        holder: EntityId,
        closed_profile_id: Option<String>,
    },
    HoldingRecorded {
        holding_id: HoldingId,
        holder: EntityId,
        issuer: EntityId,
    },
    OwnershipSyncedFromHolding {
        holding_id: HoldingId,
        edge_id: EdgeId,
    },

    // ── UBO records ────────────────────────────────
    UboRecordCreated {
        record_id: RecordId,
        subject: EntityId,
        ubo_person: EntityId,
        status: UboStatus,
    },
    UboStatusChanged {
        record_id: RecordId,
        from_status: UboStatus,
        to_status: UboStatus,
        actor: String,
    },
    MissingEvidenceOnProven {
        record_id: RecordId,
        missing: Vec<EvidenceKind>,
        actor: String,
    },
    IneligibleRecordRetained {
        record_id: RecordId,
        status: UboStatus,
    },

    // ── Walks ──────────────────────────────────────
    CycleDetected {
        subject: EntityId,
        path: Vec<EntityId>,
    },
    DeterminationRecorded {
        run_id: String,
        subject: EntityId,
        as_of: NaiveDate,
        qualified: usize,
        outcome: WalkOutcome,
    },

    // ── Cases ──────────────────────────────────────
    CaseEvaluated {
        snapshot_id: String,
        case_id: CaseId,
        total_score: i64,
        has_hard_stop: bool,
        recommended_action: RecommendedAction,
    },
    CaseDecided {
        snapshot_id: String,
        case_id: CaseId,
        decision: CaseDecision,
        actor: String,
    },
    CaseDecisionRejected {
        case_id: CaseId,
        decision: CaseDecision,
        hard_stops: u32,
        actor: String,
    },
}

impl AuditEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            AuditEvent::EntityRegistered { .. } => "entity_registered",
            AuditEvent::EdgeRecorded { .. } => "edge_recorded",
            AuditEvent::EdgeClosed { .. } => "edge_closed",
            AuditEvent::EdgeSuperseded { .. } => "edge_superseded",
            AuditEvent::RoleProfileVersioned { .. } => "role_profile_versioned",
            AuditEvent::HoldingRecorded { .. } => "holding_recorded",
            AuditEvent::OwnershipSyncedFromHolding { .. } => "ownership_synced_from_holding",
            AuditEvent::UboRecordCreated { .. } => "ubo_record_created",
            AuditEvent::UboStatusChanged { .. } => "ubo_status_changed",
            AuditEvent::MissingEvidenceOnProven { .. } => "missing_evidence_on_proven",
            AuditEvent::IneligibleRecordRetained { .. } => "ineligible_record_retained",
            AuditEvent::CycleDetected { .. } => "cycle_detected",
            AuditEvent::DeterminationRecorded { .. } => "determination_recorded",
            AuditEvent::CaseEvaluated { .. } => "case_evaluated",
            AuditEvent::CaseDecided { .. } => "case_decided",
            AuditEvent::CaseDecisionRejected { .. } => "case_decision_rejected",
        }
    }

    /// The entity, record or case the event is filed under.
    pub fn subject_id(&self) -> &str {
        match self {
            AuditEvent::EntityRegistered { entity_id, .. } => entity_id,
            AuditEvent::EdgeRecorded { edge_id, .. } => edge_id,
            AuditEvent::EdgeClosed { edge_id, .. } => edge_id,
            AuditEvent::EdgeSuperseded { closed_edge_id, .. } => closed_edge_id,
            AuditEvent::RoleProfileVersioned { profile_id, .. } => profile_id,
            AuditEvent::HoldingRecorded { holding_id, .. } => holding_id,
            AuditEvent::OwnershipSyncedFromHolding { holding_id, .. } => holding_id,
            AuditEvent::UboRecordCreated { record_id, .. }
            | AuditEvent::UboStatusChanged { record_id, .. }
            | AuditEvent::MissingEvidenceOnProven { record_id, .. }
            | AuditEvent::IneligibleRecordRetained { record_id, .. } => record_id,
            AuditEvent::CycleDetected { subject, .. } => subject,
            AuditEvent::DeterminationRecorded { subject, .. } => subject,
            AuditEvent::CaseEvaluated { case_id, .. }
            | AuditEvent::CaseDecided { case_id, .. }
            | AuditEvent::CaseDecisionRejected { case_id, .. } => case_id,
        }
    }
}

/// Row persisted in the audit_log table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Option<i64>,
    pub event_type: String,
    pub subject_id: String,
    pub payload: String, // JSON-serialized AuditEvent
    pub recorded_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn from_event(event: &AuditEvent) -> serde_json::Result<Self> {
        Ok(Self {
            id: None,
            event_type: event.type_name().to_string(),
            subject_id: event.subject_id().to_string(),
            payload: serde_json::to_string(event)?,
            recorded_at: Utc::now(),
        })
    }

    pub fn event(&self) -> serde_json::Result<AuditEvent> {
        serde_json::from_str(&self.payload)
    }
}
