use crate::{
    model::RelationshipKind,
    types::{EdgeId, EntityId, RecordId},
    ubo_status::UboStatus,
};
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Self-edge rejected: {entity} -> {entity} ({kind})")]
    SelfEdge { entity: EntityId, kind: RelationshipKind },

    #[error("Invalid temporal window: effective_to {to} <= effective_from {from}")]
    InvalidTemporalWindow { from: NaiveDate, to: NaiveDate },

    #[error("Ownership edge {from_entity} -> {to_entity} requires a percentage")]
    MissingPercentage { from_entity: EntityId, to_entity: EntityId },

    #[error("Percentage {value} out of range 0..=100")]
    PercentageOutOfRange { value: f64 },

    #[error("Control edge {from_entity} -> {to_entity} requires a control type")]
    MissingControlType { from_entity: EntityId, to_entity: EntityId },

    #[error("Trust-role edge {from_entity} -> {to_entity} requires a trust role")]
    MissingTrustRole { from_entity: EntityId, to_entity: EntityId },

    #[error("An open {kind} edge already exists for {from_entity} -> {to_entity}: {existing}")]
    DuplicateOpenEdge {
        from_entity: EntityId,
        to_entity: EntityId,
        kind: RelationshipKind,
        existing: EdgeId,
    },

    #[error("{kind} edge {from_entity} -> {to_entity} overlaps existing version {existing}")]
    OverlappingEdge {
        from_entity: EntityId,
        to_entity: EntityId,
        kind: RelationshipKind,
        existing: EdgeId,
    },

    #[error("Edge {edge_id} is already closed")]
    EdgeAlreadyClosed { edge_id: EdgeId },

    #[error("Entity '{entity_id}' category is immutable")]
    CategoryImmutable { entity_id: EntityId },

    #[error("Entity '{entity_id}' not found")]
    EntityNotFound { entity_id: EntityId },

    #[error("Edge '{edge_id}' not found")]
    EdgeNotFound { edge_id: EdgeId },

    #[error("UBO record '{record_id}' not found")]
    RecordNotFound { record_id: RecordId },

    #[error("UBO record cannot start in {status}; initial status must be SUSPECTED or PENDING")]
    InvalidInitialStatus { status: UboStatus },

    #[error("Invalid UBO status transition: {current} -> {attempted}")]
    InvalidTransition { current: UboStatus, attempted: UboStatus },

    #[error("Case '{case_id}' has {hard_stops} unresolved hard-stop flag(s); cannot approve")]
    HardStopConflict { case_id: String, hard_stops: u32 },

    #[error("Determination run '{run_id}' not found")]
    RunNotFound { run_id: String },

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type GraphResult<T> = Result<T, GraphError>;
