//! UBO records, evidence, status history and determination runs.
//!
//! RULE: Every status change goes through `transition_ubo_record`, which
//! checks the state machine, writes history and audits in one transaction.

use super::{text_col, GraphStore};
use crate::{
    determination::{DeterminationRun, UboDetermination},
    error::{GraphError, GraphResult},
    event::AuditEvent,
    types::{new_id, EntityId},
    ubo_status::{
        check_transition, missing_proof_evidence, EvidenceKind, NewUboRecord, StatusChange,
        TransitionReceipt, UboEvidence, UboRecord, UboStatus,
    },
};
use chrono::Utc;
use log::warn;
use rusqlite::{params, OptionalExtension};

const RECORD_COLUMNS: &str =
    "record_id, subject, ubo_person, cumulative_pct, qualifying_reason, status, created_at, updated_at";

fn record_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<UboRecord> {
    Ok(UboRecord {
        record_id: r.get(0)?,
        subject: r.get(1)?,
        ubo_person: r.get(2)?,
        cumulative_pct: r.get(3)?,
        qualifying_reason: text_col(r, 4)?,
        status: text_col(r, 5)?,
        created_at: r.get(6)?,
        updated_at: r.get(7)?,
    })
}

impl GraphStore {
    // ── Records ────────────────────────────────────────────────

    pub fn create_ubo_record(&self, new: &NewUboRecord) -> GraphResult<UboRecord> {
        if !new.status.is_valid_initial() {
            return Err(GraphError::InvalidInitialStatus { status: new.status });
        }
        self.get_entity(&new.subject)?;
        self.get_entity(&new.ubo_person)?;

        let now = Utc::now();
        let record = UboRecord {
            record_id: new_id("ubo"),
            subject: new.subject.clone(),
            ubo_person: new.ubo_person.clone(),
            cumulative_pct: new.cumulative_pct,
            qualifying_reason: new.qualifying_reason,
            status: new.status,
            created_at: now,
            updated_at: now,
        };
        self.conn.execute(
            "INSERT INTO ubo_record
                (record_id, subject, ubo_person, cumulative_pct, qualifying_reason, status,
                 chains_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.record_id,
                record.subject,
                record.ubo_person,
                record.cumulative_pct,
                record.qualifying_reason.as_str(),
                record.status.as_str(),
                serde_json::to_string(&new.chains)?,
                record.created_at,
                record.updated_at,
            ],
        )?;
        self.append_audit(&AuditEvent::UboRecordCreated {
            record_id: record.record_id.clone(),
            subject: record.subject.clone(),
            ubo_person: record.ubo_person.clone(),
            status: record.status,
        })?;
        Ok(record)
    }

    pub fn get_ubo_record(&self, record_id: &str) -> GraphResult<UboRecord> {
        self.conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM ubo_record WHERE record_id = ?1"),
                params![record_id],
                record_from_row,
            )
            .optional()?
            .ok_or_else(|| GraphError::RecordNotFound {
                record_id: record_id.to_string(),
            })
    }

    pub fn ubo_records_for_subject(&self, subject: &str) -> GraphResult<Vec<UboRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM ubo_record WHERE subject = ?1 ORDER BY ubo_person, created_at"
        ))?;
        let rows = stmt.query_map(params![subject], record_from_row)?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }

    /// Move a record along the status machine. Reaching PROVEN without
    /// identity plus ownership-or-control evidence is allowed but warned
    /// about and audited.
    pub fn transition_ubo_record(
        &self,
        record_id: &str,
        to_status: UboStatus,
        actor: &str,
        note: Option<&str>,
    ) -> GraphResult<TransitionReceipt> {
        let mut record = self.get_ubo_record(record_id)?;
        check_transition(record.status, to_status)?;

        let missing_evidence = if to_status == UboStatus::Proven {
            let held: Vec<EvidenceKind> = self.evidence_for(record_id)?.iter().map(|e| e.kind).collect();
            missing_proof_evidence(&held)
        } else {
            Vec::new()
        };

        let change = StatusChange {
            record_id: record_id.to_string(),
            from_status: record.status,
            to_status,
            actor: actor.to_string(),
            note: note.map(str::to_string),
            changed_at: Utc::now(),
        };

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE ubo_record SET status = ?2, updated_at = ?3 WHERE record_id = ?1",
            params![record_id, to_status.as_str(), change.changed_at],
        )?;
        tx.execute(
            "INSERT INTO ubo_status_history (record_id, from_status, to_status, actor, note, changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record_id,
                change.from_status.as_str(),
                change.to_status.as_str(),
                change.actor,
                change.note,
                change.changed_at,
            ],
        )?;
        self.append_audit(&AuditEvent::UboStatusChanged {
            record_id: record_id.to_string(),
            from_status: change.from_status,
            to_status,
            actor: actor.to_string(),
        })?;
        if !missing_evidence.is_empty() {
            warn!(
                "UBO record {record_id} marked PROVEN by {actor} without evidence: {:?}",
                missing_evidence
            );
            self.append_audit(&AuditEvent::MissingEvidenceOnProven {
                record_id: record_id.to_string(),
                missing: missing_evidence.clone(),
                actor: actor.to_string(),
            })?;
        }
        tx.commit()?;

        record.status = to_status;
        record.updated_at = change.changed_at;
        Ok(TransitionReceipt {
            record,
            change,
            missing_evidence,
        })
    }

    pub fn status_history(&self, record_id: &str) -> GraphResult<Vec<StatusChange>> {
        let mut stmt = self.conn.prepare(
            "SELECT record_id, from_status, to_status, actor, note, changed_at
             FROM ubo_status_history WHERE record_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![record_id], |r| {
            Ok(StatusChange {
                record_id: r.get(0)?,
                from_status: text_col(r, 1)?,
                to_status: text_col(r, 2)?,
                actor: r.get(3)?,
                note: r.get(4)?,
                changed_at: r.get(5)?,
            })
        })?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }

    /// Chains persisted with the record at creation.
    pub fn ubo_record_chains(&self, record_id: &str) -> GraphResult<Vec<crate::ownership_walker::UboChain>> {
        let json: String = self
            .conn
            .query_row(
                "SELECT chains_json FROM ubo_record WHERE record_id = ?1",
                params![record_id],
                |r| r.get(0),
            )
            .optional()?
            .ok_or_else(|| GraphError::RecordNotFound {
                record_id: record_id.to_string(),
            })?;
        Ok(serde_json::from_str(&json)?)
    }

    // ── Evidence ───────────────────────────────────────────────

    pub fn attach_evidence(&self, record_id: &str, kind: EvidenceKind, document_ref: &str) -> GraphResult<UboEvidence> {
        self.get_ubo_record(record_id)?;
        let evidence = UboEvidence {
            evidence_id: new_id("evd"),
            record_id: record_id.to_string(),
            kind,
            document_ref: document_ref.to_string(),
            attached_at: Utc::now(),
        };
        self.conn.execute(
            "INSERT INTO ubo_evidence (evidence_id, record_id, kind, document_ref, attached_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                evidence.evidence_id,
                evidence.record_id,
                evidence.kind.as_str(),
                evidence.document_ref,
                evidence.attached_at,
            ],
        )?;
        Ok(evidence)
    }

    pub fn evidence_for(&self, record_id: &str) -> GraphResult<Vec<UboEvidence>> {
        let mut stmt = self.conn.prepare(
            "SELECT evidence_id, record_id, kind, document_ref, attached_at
             FROM ubo_evidence WHERE record_id = ?1 ORDER BY attached_at, evidence_id",
        )?;
        let rows = stmt.query_map(params![record_id], |r| {
            Ok(UboEvidence {
                evidence_id: r.get(0)?,
                record_id: r.get(1)?,
                kind: text_col(r, 2)?,
                document_ref: r.get(3)?,
                attached_at: r.get(4)?,
            })
        })?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }

    // ── Case risk factors ──────────────────────────────────────

    pub fn disputed_record_count(&self, subjects: &[EntityId]) -> GraphResult<u32> {
        let mut count = 0u32;
        for subject in subjects {
            count += self
                .ubo_records_for_subject(subject)?
                .iter()
                .filter(|r| r.status == UboStatus::Disputed)
                .count() as u32;
        }
        Ok(count)
    }

    /// PROVEN or VERIFIED records lacking identity plus ownership-or-control
    /// evidence.
    pub fn records_missing_evidence_count(&self, subjects: &[EntityId]) -> GraphResult<u32> {
        let mut count = 0u32;
        for subject in subjects {
            for record in self.ubo_records_for_subject(subject)? {
                if !matches!(record.status, UboStatus::Proven | UboStatus::Verified) {
                    continue;
                }
                let held: Vec<EvidenceKind> =
                    self.evidence_for(&record.record_id)?.iter().map(|e| e.kind).collect();
                if !missing_proof_evidence(&held).is_empty() {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    // ── Determination runs ─────────────────────────────────────

    pub fn save_determination_run(&self, run: &DeterminationRun) -> GraphResult<()> {
        self.conn.execute(
            "INSERT INTO ubo_determination_run
                (run_id, subject, as_of, threshold_pct, qualified_count, outcome, output_json, computed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.run_id,
                run.subject,
                run.as_of,
                run.threshold_pct,
                run.qualified_count as i64,
                serde_json::to_string(&run.determination.outcome)?,
                serde_json::to_string(&run.determination)?,
                run.computed_at,
            ],
        )?;
        self.append_audit(&AuditEvent::DeterminationRecorded {
            run_id: run.run_id.clone(),
            subject: run.subject.clone(),
            as_of: run.as_of,
            qualified: run.qualified_count,
            outcome: run.determination.outcome,
        })?;
        Ok(())
    }

    pub fn get_determination_run(&self, run_id: &str) -> GraphResult<DeterminationRun> {
        self.conn
            .query_row(
                "SELECT run_id, subject, as_of, threshold_pct, qualified_count, computed_at, output_json
                 FROM ubo_determination_run WHERE run_id = ?1",
                params![run_id],
                run_row,
            )
            .optional()?
            .ok_or_else(|| GraphError::RunNotFound {
                run_id: run_id.to_string(),
            })?
    }

    /// Runs for a subject, oldest first.
    pub fn determination_runs_for(&self, subject: &str) -> GraphResult<Vec<DeterminationRun>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, subject, as_of, threshold_pct, qualified_count, computed_at, output_json
             FROM ubo_determination_run WHERE subject = ?1 ORDER BY computed_at, run_id",
        )?;
        let rows = stmt.query_map(params![subject], run_row)?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r??);
        }
        Ok(result)
    }
}

/// The JSON body is decoded outside the rusqlite row closure so a malformed
/// payload surfaces as a serialization error, not a column error.
fn run_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<GraphResult<DeterminationRun>> {
    let output_json: String = r.get(6)?;
    let run_id: String = r.get(0)?;
    let subject: String = r.get(1)?;
    let as_of = r.get(2)?;
    let threshold_pct = r.get(3)?;
    let qualified_count: i64 = r.get(4)?;
    let computed_at = r.get(5)?;
    Ok(serde_json::from_str::<UboDetermination>(&output_json)
        .map(|determination| DeterminationRun {
            run_id,
            subject,
            as_of,
            threshold_pct,
            qualified_count: qualified_count as usize,
            computed_at,
            determination,
        })
        .map_err(GraphError::from))
}
