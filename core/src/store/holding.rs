//! Direct holding positions (transfer-agency register).

use super::{text_col, GraphStore};
use crate::{
    error::GraphResult,
    event::AuditEvent,
    model::{HoldingEdge, NewHolding},
    types::new_id,
};
use chrono::Utc;
use rusqlite::params;

const HOLDING_COLUMNS: &str = "holding_id, holder, issuer, pct_of_issuer, instrument_type, share_class,
     basis, usage_intent, as_of_date";

fn holding_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<HoldingEdge> {
    Ok(HoldingEdge {
        holding_id: r.get(0)?,
        holder: r.get(1)?,
        issuer: r.get(2)?,
        pct_of_issuer: r.get(3)?,
        instrument_type: r.get(4)?,
        share_class: r.get(5)?,
        basis: text_col(r, 6)?,
        usage_intent: text_col(r, 7)?,
        as_of_date: r.get(8)?,
    })
}

impl GraphStore {
    /// Append a position row. A changed position is a new row with a later
    /// `as_of_date`; a zero percentage records an exit.
    pub fn insert_holding(&self, new: &NewHolding) -> GraphResult<HoldingEdge> {
        new.validate()?;
        self.get_entity(&new.holder)?;
        self.get_entity(&new.issuer)?;

        let holding = new.clone().into_holding(new_id("hold"));
        self.conn.execute(
            "INSERT INTO holding
                (holding_id, holder, issuer, pct_of_issuer, instrument_type, share_class,
                 basis, usage_intent, as_of_date, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                holding.holding_id,
                holding.holder,
                holding.issuer,
                holding.pct_of_issuer,
                holding.instrument_type,
                holding.share_class,
                holding.basis.as_str(),
                holding.usage_intent.as_str(),
                holding.as_of_date,
                Utc::now(),
            ],
        )?;
        self.append_audit(&AuditEvent::HoldingRecorded {
            holding_id: holding.holding_id.clone(),
            holder: holding.holder.clone(),
            issuer: holding.issuer.clone(),
        })?;
        self.note_change(&[&holding.holder, &holding.issuer]);
        Ok(holding)
    }

    pub fn holdings_in_issuer(&self, issuer: &str) -> GraphResult<Vec<HoldingEdge>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {HOLDING_COLUMNS} FROM holding WHERE issuer = ?1 ORDER BY holder, as_of_date"
        ))?;
        let rows = stmt.query_map(params![issuer], holding_from_row)?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }

    pub fn all_holdings(&self) -> GraphResult<Vec<HoldingEdge>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {HOLDING_COLUMNS} FROM holding ORDER BY holder, issuer, as_of_date, holding_id"
        ))?;
        let rows = stmt.query_map([], holding_from_row)?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }
}
