//! Red flags, case subjects and risk score snapshots.

use super::{opt_text_col, text_col, GraphStore};
use crate::{
    error::{GraphError, GraphResult},
    risk_scorer::{CaseScore, FlagSeverity, FlagStatus, RedFlag, RiskScoreSnapshot},
    types::{new_id, EntityId},
};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

const SNAPSHOT_COLUMNS: &str = "snapshot_id, case_id, soft_count, escalate_count, hard_stop_count,
     total_score, has_hard_stop, recommended_action, evaluated_by, evaluated_at,
     decision, decided_by, decision_notes";

fn snapshot_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RiskScoreSnapshot> {
    Ok(RiskScoreSnapshot {
        snapshot_id: r.get(0)?,
        case_id: r.get(1)?,
        score: CaseScore {
            soft_count: r.get(2)?,
            escalate_count: r.get(3)?,
            hard_stop_count: r.get(4)?,
            total_score: r.get(5)?,
            has_hard_stop: r.get::<_, i32>(6)? != 0,
        },
        recommended_action: text_col(r, 7)?,
        evaluated_by: r.get(8)?,
        evaluated_at: r.get(9)?,
        decision: opt_text_col(r, 10)?,
        decided_by: r.get(11)?,
        decision_notes: r.get(12)?,
    })
}

impl GraphStore {
    // ── Red flags ──────────────────────────────────────────────

    pub fn raise_red_flag(
        &self,
        case_id: &str,
        code: &str,
        severity: FlagSeverity,
        description: Option<&str>,
    ) -> GraphResult<RedFlag> {
        let flag = RedFlag {
            flag_id: new_id("flag"),
            case_id: case_id.to_string(),
            code: code.to_string(),
            severity,
            status: FlagStatus::Open,
            description: description.map(str::to_string),
            raised_at: Utc::now(),
        };
        self.conn.execute(
            "INSERT INTO red_flag (flag_id, case_id, code, severity, status, description, raised_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                flag.flag_id,
                flag.case_id,
                flag.code,
                flag.severity.as_str(),
                flag.status.as_str(),
                flag.description,
                flag.raised_at,
            ],
        )?;
        Ok(flag)
    }

    pub fn set_red_flag_status(&self, flag_id: &str, status: FlagStatus) -> GraphResult<()> {
        let n = self.conn.execute(
            "UPDATE red_flag SET status = ?2, updated_at = ?3 WHERE flag_id = ?1",
            params![flag_id, status.as_str(), Utc::now()],
        )?;
        if n == 0 {
            return Err(GraphError::InvalidParameter {
                name: "flag_id",
                reason: format!("red flag '{flag_id}' not found"),
            });
        }
        Ok(())
    }

    pub fn red_flags_for_case(&self, case_id: &str) -> GraphResult<Vec<RedFlag>> {
        let mut stmt = self.conn.prepare(
            "SELECT flag_id, case_id, code, severity, status, description, raised_at
             FROM red_flag WHERE case_id = ?1 ORDER BY raised_at, flag_id",
        )?;
        let rows = stmt.query_map(params![case_id], |r| {
            Ok(RedFlag {
                flag_id: r.get(0)?,
                case_id: r.get(1)?,
                code: r.get(2)?,
                severity: text_col(r, 3)?,
                status: text_col(r, 4)?,
                description: r.get(5)?,
                raised_at: r.get(6)?,
            })
        })?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }

    // ── Case subjects ──────────────────────────────────────────

    pub fn link_case_subject(&self, case_id: &str, entity_id: &str) -> GraphResult<()> {
        self.get_entity(entity_id)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO case_subject (case_id, entity_id) VALUES (?1, ?2)",
            params![case_id, entity_id],
        )?;
        Ok(())
    }

    pub fn case_subjects(&self, case_id: &str) -> GraphResult<Vec<EntityId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT entity_id FROM case_subject WHERE case_id = ?1 ORDER BY entity_id")?;
        let rows = stmt.query_map(params![case_id], |r| r.get(0))?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }

    // ── Score snapshots ────────────────────────────────────────

    /// Snapshots are immutable; each evaluation or decision is a new row
    /// with the next per-case sequence number.
    pub fn insert_score_snapshot(&self, snap: &RiskScoreSnapshot) -> GraphResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM risk_score_snapshot WHERE case_id = ?1",
            params![snap.case_id],
            |r| r.get(0),
        )?;
        tx.execute(
            &format!(
                "INSERT INTO risk_score_snapshot ({SNAPSHOT_COLUMNS}, seq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                snap.snapshot_id,
                snap.case_id,
                snap.score.soft_count,
                snap.score.escalate_count,
                snap.score.hard_stop_count,
                snap.score.total_score,
                snap.score.has_hard_stop as i32,
                snap.recommended_action.as_str(),
                snap.evaluated_by,
                snap.evaluated_at,
                snap.decision.map(|d| d.as_str()),
                snap.decided_by,
                snap.decision_notes,
                seq,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn latest_score_snapshot(&self, case_id: &str) -> GraphResult<Option<RiskScoreSnapshot>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {SNAPSHOT_COLUMNS} FROM risk_score_snapshot
                     WHERE case_id = ?1 ORDER BY seq DESC LIMIT 1"
                ),
                params![case_id],
                snapshot_from_row,
            )
            .optional()?)
    }

    pub fn score_snapshots(&self, case_id: &str) -> GraphResult<Vec<RiskScoreSnapshot>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM risk_score_snapshot WHERE case_id = ?1 ORDER BY seq"
        ))?;
        let rows = stmt.query_map(params![case_id], snapshot_from_row)?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }
}
