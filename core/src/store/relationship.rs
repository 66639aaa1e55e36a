//! Relationship edges: insert, close, supersede.
//!
//! RULE: An edge row is never rewritten. Changing a relationship means
//! closing the open edge and inserting a new one effective from the close
//! date.

use super::{opt_text_col, text_col, GraphStore};
use crate::{
    error::{GraphError, GraphResult},
    event::AuditEvent,
    model::{validate_window, NewRelationship, Provenance, RelationshipEdge, RelationshipKind},
    types::new_id,
};
use chrono::{NaiveDate, Utc};
use log::info;
use rusqlite::{params, OptionalExtension};

const EDGE_COLUMNS: &str = "edge_id, from_entity, to_entity, kind, percentage, control_type,
     rights_pct, trust_role, effective_from, effective_to, provenance_source, provenance_ref";

fn edge_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RelationshipEdge> {
    Ok(RelationshipEdge {
        edge_id: r.get(0)?,
        from_entity: r.get(1)?,
        to_entity: r.get(2)?,
        kind: text_col(r, 3)?,
        percentage: r.get(4)?,
        control_type: opt_text_col(r, 5)?,
        rights_pct: r.get(6)?,
        trust_role: opt_text_col(r, 7)?,
        effective_from: r.get(8)?,
        effective_to: r.get(9)?,
        provenance: Provenance {
            source: r.get(10)?,
            reference: r.get(11)?,
        },
    })
}

impl GraphStore {
    /// Validate and insert a new edge. Both endpoints must be registered, an
    /// open edge must not already exist for the same (from, to, kind), and
    /// the window must not overlap any other version of it.
    pub fn insert_relationship(&self, rel: &NewRelationship) -> GraphResult<RelationshipEdge> {
        rel.validate()?;
        self.get_entity(&rel.from_entity)?;
        self.get_entity(&rel.to_entity)?;
        if rel.effective_to.is_none() {
            if let Some(existing) = self.open_relationship(&rel.from_entity, &rel.to_entity, rel.kind)? {
                return Err(GraphError::DuplicateOpenEdge {
                    from_entity: rel.from_entity.clone(),
                    to_entity: rel.to_entity.clone(),
                    kind: rel.kind,
                    existing: existing.edge_id,
                });
            }
        }
        if let Some(existing) = self.overlapping_relationship(
            &rel.from_entity,
            &rel.to_entity,
            rel.kind,
            rel.effective_from,
            rel.effective_to,
        )? {
            return Err(GraphError::OverlappingEdge {
                from_entity: rel.from_entity.clone(),
                to_entity: rel.to_entity.clone(),
                kind: rel.kind,
                existing: existing.edge_id,
            });
        }

        let edge = rel.clone().into_edge(new_id("edge"));
        self.write_edge(&edge)?;
        self.append_audit(&AuditEvent::EdgeRecorded {
            edge_id: edge.edge_id.clone(),
            from_entity: edge.from_entity.clone(),
            to_entity: edge.to_entity.clone(),
            kind: edge.kind,
        })?;
        self.note_change(&[&edge.from_entity, &edge.to_entity]);
        Ok(edge)
    }

    fn write_edge(&self, edge: &RelationshipEdge) -> GraphResult<()> {
        self.conn.execute(
            "INSERT INTO relationship_edge
                (edge_id, from_entity, to_entity, kind, percentage, control_type,
                 rights_pct, trust_role, effective_from, effective_to,
                 provenance_source, provenance_ref, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                edge.edge_id,
                edge.from_entity,
                edge.to_entity,
                edge.kind.as_str(),
                edge.percentage,
                edge.control_type.map(|c| c.as_str()),
                edge.rights_pct,
                edge.trust_role.map(|t| t.as_str()),
                edge.effective_from,
                edge.effective_to,
                edge.provenance.source,
                edge.provenance.reference,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    /// Close an open edge. Closing is the only mutation an edge ever sees.
    pub fn close_relationship(&self, edge_id: &str, effective_to: NaiveDate) -> GraphResult<RelationshipEdge> {
        let mut edge = self.get_relationship(edge_id)?;
        if !edge.is_open() {
            return Err(GraphError::EdgeAlreadyClosed {
                edge_id: edge_id.to_string(),
            });
        }
        validate_window(edge.effective_from, Some(effective_to))?;
        self.conn.execute(
            "UPDATE relationship_edge SET effective_to = ?2 WHERE edge_id = ?1",
            params![edge_id, effective_to],
        )?;
        self.append_audit(&AuditEvent::EdgeClosed {
            edge_id: edge_id.to_string(),
            effective_to,
        })?;
        self.note_change(&[&edge.from_entity, &edge.to_entity]);
        edge.effective_to = Some(effective_to);
        Ok(edge)
    }

    /// Close `edge_id` at the replacement's `effective_from` and insert the
    /// replacement, atomically. The replacement must describe the same
    /// (from, to, kind).
    pub fn supersede_relationship(
        &self,
        edge_id: &str,
        replacement: &NewRelationship,
    ) -> GraphResult<RelationshipEdge> {
        replacement.validate()?;
        let old = self.get_relationship(edge_id)?;
        if !old.is_open() {
            return Err(GraphError::EdgeAlreadyClosed {
                edge_id: edge_id.to_string(),
            });
        }
        if old.from_entity != replacement.from_entity
            || old.to_entity != replacement.to_entity
            || old.kind != replacement.kind
        {
            return Err(GraphError::InvalidParameter {
                name: "replacement",
                reason: format!(
                    "superseding {edge_id} ({} -> {} {}) with {} -> {} {}",
                    old.from_entity,
                    old.to_entity,
                    old.kind,
                    replacement.from_entity,
                    replacement.to_entity,
                    replacement.kind
                ),
            });
        }
        validate_window(old.effective_from, Some(replacement.effective_from))?;

        let new_edge = replacement.clone().into_edge(new_id("edge"));
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE relationship_edge SET effective_to = ?2, superseded_by = ?3 WHERE edge_id = ?1",
            params![edge_id, replacement.effective_from, new_edge.edge_id],
        )?;
        self.write_edge(&new_edge)?;
        self.append_audit(&AuditEvent::EdgeSuperseded {
            closed_edge_id: edge_id.to_string(),
            new_edge_id: new_edge.edge_id.clone(),
            effective_from: new_edge.effective_from,
        })?;
        tx.commit()?;

        info!(
            "Superseded {edge_id} with {} ({} -> {} {}) from {}",
            new_edge.edge_id, new_edge.from_entity, new_edge.to_entity, new_edge.kind, new_edge.effective_from
        );
        self.note_change(&[&new_edge.from_entity, &new_edge.to_entity]);
        Ok(new_edge)
    }

    pub fn get_relationship(&self, edge_id: &str) -> GraphResult<RelationshipEdge> {
        self.conn
            .query_row(
                &format!("SELECT {EDGE_COLUMNS} FROM relationship_edge WHERE edge_id = ?1"),
                params![edge_id],
                edge_from_row,
            )
            .optional()?
            .ok_or_else(|| GraphError::EdgeNotFound {
                edge_id: edge_id.to_string(),
            })
    }

    pub fn open_relationship(
        &self,
        from_entity: &str,
        to_entity: &str,
        kind: RelationshipKind,
    ) -> GraphResult<Option<RelationshipEdge>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {EDGE_COLUMNS} FROM relationship_edge
                     WHERE from_entity = ?1 AND to_entity = ?2 AND kind = ?3
                       AND effective_to IS NULL"
                ),
                params![from_entity, to_entity, kind.as_str()],
                edge_from_row,
            )
            .optional()?)
    }

    /// First version of (from, to, kind) whose window intersects
    /// `[effective_from, effective_to)`. `None` for `effective_to` is open.
    pub fn overlapping_relationship(
        &self,
        from_entity: &str,
        to_entity: &str,
        kind: RelationshipKind,
        effective_from: NaiveDate,
        effective_to: Option<NaiveDate>,
    ) -> GraphResult<Option<RelationshipEdge>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {EDGE_COLUMNS} FROM relationship_edge
                     WHERE from_entity = ?1 AND to_entity = ?2 AND kind = ?3
                       AND (effective_to IS NULL OR effective_to > ?4)
                       AND (?5 IS NULL OR ?5 > effective_from)
                     ORDER BY effective_from, edge_id
                     LIMIT 1"
                ),
                params![from_entity, to_entity, kind.as_str(), effective_from, effective_to],
                edge_from_row,
            )
            .optional()?)
    }

    /// Every version of one relationship, oldest first.
    pub fn relationship_history(
        &self,
        from_entity: &str,
        to_entity: &str,
        kind: RelationshipKind,
    ) -> GraphResult<Vec<RelationshipEdge>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EDGE_COLUMNS} FROM relationship_edge
             WHERE from_entity = ?1 AND to_entity = ?2 AND kind = ?3
             ORDER BY effective_from, edge_id"
        ))?;
        let rows = stmt.query_map(params![from_entity, to_entity, kind.as_str()], edge_from_row)?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }

    pub fn all_relationships(&self) -> GraphResult<Vec<RelationshipEdge>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EDGE_COLUMNS} FROM relationship_edge ORDER BY from_entity, to_entity, effective_from, edge_id"
        ))?;
        let rows = stmt.query_map([], edge_from_row)?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }
}
