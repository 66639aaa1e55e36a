//! Append-only audit log.

use super::GraphStore;
use crate::{
    error::GraphResult,
    event::{AuditEvent, AuditLogEntry},
};
use rusqlite::params;

fn entry_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<AuditLogEntry> {
    Ok(AuditLogEntry {
        id: r.get(0)?,
        event_type: r.get(1)?,
        subject_id: r.get(2)?,
        payload: r.get(3)?,
        recorded_at: r.get(4)?,
    })
}

impl GraphStore {
    pub fn append_audit(&self, event: &AuditEvent) -> GraphResult<()> {
        let entry = AuditLogEntry::from_event(event)?;
        self.conn.execute(
            "INSERT INTO audit_log (event_type, subject_id, payload, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![entry.event_type, entry.subject_id, entry.payload, entry.recorded_at],
        )?;
        Ok(())
    }

    /// Events filed under one entity, edge, record or case, in write order.
    pub fn audit_events_for(&self, subject_id: &str) -> GraphResult<Vec<AuditLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_type, subject_id, payload, recorded_at
             FROM audit_log WHERE subject_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![subject_id], entry_from_row)?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }

    pub fn audit_events_of_type(&self, event_type: &str) -> GraphResult<Vec<AuditLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_type, subject_id, payload, recorded_at
             FROM audit_log WHERE event_type = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![event_type], entry_from_row)?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }

    pub fn audit_count(&self) -> GraphResult<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM audit_log", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}
