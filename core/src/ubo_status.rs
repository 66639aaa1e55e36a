//! UBO record lifecycle.
//!
//! RULE: Every status change goes through `check_transition`. The table in
//! `allowed_targets` is the single source of truth for legal moves.
//!
//! SUSPECTED and PENDING are the only entry points. REMOVED is terminal.
//! FAILED may be reopened to SUSPECTED or PENDING.

use crate::{
    error::{GraphError, GraphResult},
    ownership_walker::UboChain,
    text_enum,
    types::{EntityId, Pct, RecordId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

text_enum! {
    pub enum UboStatus {
        Suspected => "SUSPECTED",
        Pending => "PENDING",
        Proven => "PROVEN",
        Verified => "VERIFIED",
        Disputed => "DISPUTED",
        Failed => "FAILED",
        Removed => "REMOVED",
    }
}

impl UboStatus {
    pub fn allowed_targets(&self) -> &'static [UboStatus] {
        use UboStatus::*;
        match self {
            Suspected => &[Proven, Pending, Failed, Removed],
            Pending => &[Proven, Verified, Failed, Disputed, Removed],
            Proven => &[Verified, Disputed, Removed],
            Verified => &[Disputed, Removed],
            Failed => &[Suspected, Pending],
            Disputed => &[Proven, Verified, Removed, Failed],
            Removed => &[],
        }
    }

    pub fn can_transition_to(&self, target: UboStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_targets().is_empty()
    }

    pub fn is_valid_initial(&self) -> bool {
        matches!(self, UboStatus::Suspected | UboStatus::Pending)
    }

    /// Still part of the live UBO picture for a subject.
    pub fn is_active(&self) -> bool {
        !matches!(self, UboStatus::Removed)
    }
}

pub fn check_transition(current: UboStatus, attempted: UboStatus) -> GraphResult<()> {
    if current.can_transition_to(attempted) {
        Ok(())
    } else {
        Err(GraphError::InvalidTransition { current, attempted })
    }
}

text_enum! {
    pub enum EvidenceKind {
        Identity => "IDENTITY",
        OwnershipProof => "OWNERSHIP_PROOF",
        ControlProof => "CONTROL_PROOF",
    }
}

/// Evidence expected before a record enters PROVEN: an identity document plus
/// proof of either ownership or control. Returns what is missing.
pub fn missing_proof_evidence(held: &[EvidenceKind]) -> Vec<EvidenceKind> {
    let mut missing = Vec::new();
    if !held.contains(&EvidenceKind::Identity) {
        missing.push(EvidenceKind::Identity);
    }
    if !held.contains(&EvidenceKind::OwnershipProof) && !held.contains(&EvidenceKind::ControlProof)
    {
        missing.push(EvidenceKind::OwnershipProof);
        missing.push(EvidenceKind::ControlProof);
    }
    missing
}

text_enum! {
    pub enum QualifyingReason {
        Ownership => "OWNERSHIP",
        Control => "CONTROL",
        OwnershipAndControl => "OWNERSHIP_AND_CONTROL",
    }
}

impl QualifyingReason {
    pub fn from_flags(by_ownership: bool, by_control: bool) -> Option<Self> {
        match (by_ownership, by_control) {
            (true, true) => Some(QualifyingReason::OwnershipAndControl),
            (true, false) => Some(QualifyingReason::Ownership),
            (false, true) => Some(QualifyingReason::Control),
            (false, false) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UboRecord {
    pub record_id: RecordId,
    pub subject: EntityId,
    pub ubo_person: EntityId,
    pub cumulative_pct: Pct,
    pub qualifying_reason: QualifyingReason,
    pub status: UboStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUboRecord {
    pub subject: EntityId,
    pub ubo_person: EntityId,
    pub cumulative_pct: Pct,
    pub qualifying_reason: QualifyingReason,
    pub status: UboStatus,
    /// The chains that produced the record; persisted as the record's trail.
    pub chains: Vec<UboChain>,
}

impl NewUboRecord {
    pub fn suspected(
        subject: impl Into<EntityId>,
        ubo_person: impl Into<EntityId>,
        cumulative_pct: Pct,
        qualifying_reason: QualifyingReason,
    ) -> Self {
        Self {
            subject: subject.into(),
            ubo_person: ubo_person.into(),
            cumulative_pct,
            qualifying_reason,
            status: UboStatus::Suspected,
            chains: Vec::new(),
        }
    }

    pub fn with_chains(mut self, chains: Vec<UboChain>) -> Self {
        self.chains = chains;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UboEvidence {
    pub evidence_id: String,
    pub record_id: RecordId,
    pub kind: EvidenceKind,
    pub document_ref: String,
    pub attached_at: DateTime<Utc>,
}

/// One row of the append-only status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub record_id: RecordId,
    pub from_status: UboStatus,
    pub to_status: UboStatus,
    pub actor: String,
    pub note: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Result of a successful transition. Warnings never block the move.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionReceipt {
    pub record: UboRecord,
    pub change: StatusChange,
    pub missing_evidence: Vec<EvidenceKind>,
}
