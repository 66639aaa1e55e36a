//! Ownership reconciliation: holdings register vs. OWNERSHIP edges.
//!
//! Design:
//!   - Holding side = sum of the holder's positions in the issuer at as_of
//!   - Relationship side = sum of the holder's valid OWNERSHIP edges into the issuer
//!   - |delta| <= tolerance → reconciled
//!   - One side missing above tolerance → MISSING_EDGE / MISSING_HOLDING

use crate::{
    error::{GraphError, GraphResult},
    snapshot::GraphSnapshot,
    text_enum,
    types::{EntityId, Pct},
};
use chrono::NaiveDate;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_TOLERANCE_PCT: Pct = 0.01;

text_enum! {
    pub enum ReconStatus {
        Reconciled => "RECONCILED",
        Mismatch => "MISMATCH",
        MissingEdge => "MISSING_EDGE",
        MissingHolding => "MISSING_HOLDING",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconLine {
    pub holder: EntityId,
    pub holding_pct: Pct,
    pub relationship_pct: Pct,
    pub delta: Pct,
    pub status: ReconStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipReconciliation {
    pub issuer: EntityId,
    pub as_of: NaiveDate,
    pub tolerance_pct: Pct,
    pub lines: Vec<ReconLine>,
    pub holding_total: Pct,
    pub relationship_total: Pct,
}

impl OwnershipReconciliation {
    pub fn exceptions(&self) -> impl Iterator<Item = &ReconLine> {
        self.lines
            .iter()
            .filter(|l| l.status != ReconStatus::Reconciled)
    }

    pub fn is_clean(&self) -> bool {
        self.exceptions().next().is_none()
    }
}

pub fn reconcile_ownership(
    snapshot: &GraphSnapshot,
    issuer: &str,
    as_of: NaiveDate,
    tolerance_pct: Pct,
) -> GraphResult<OwnershipReconciliation> {
    if !snapshot.contains(issuer) {
        return Err(GraphError::EntityNotFound {
            entity_id: issuer.to_string(),
        });
    }
    if tolerance_pct < 0.0 {
        return Err(GraphError::InvalidParameter {
            name: "tolerance_pct",
            reason: format!("{tolerance_pct} is negative"),
        });
    }

    let mut sides: BTreeMap<&str, (Pct, Pct)> = BTreeMap::new();
    for holding in snapshot.positions_in_issuer_at(issuer, as_of) {
        sides.entry(holding.holder.as_str()).or_default().0 += holding.pct_of_issuer;
    }
    for edge in snapshot.owners_at(issuer, as_of) {
        sides.entry(edge.from_entity.as_str()).or_default().1 += edge.percentage.unwrap_or(0.0);
    }

    let lines: Vec<ReconLine> = sides
        .into_iter()
        .map(|(holder, (holding_pct, relationship_pct))| {
            let delta = holding_pct - relationship_pct;
            let status = if delta.abs() <= tolerance_pct {
                ReconStatus::Reconciled
            } else if relationship_pct <= tolerance_pct {
                ReconStatus::MissingEdge
            } else if holding_pct <= tolerance_pct {
                ReconStatus::MissingHolding
            } else {
                ReconStatus::Mismatch
            };
            ReconLine {
                holder: holder.to_string(),
                holding_pct,
                relationship_pct,
                delta,
                status,
            }
        })
        .collect();

    let recon = OwnershipReconciliation {
        issuer: issuer.to_string(),
        as_of,
        tolerance_pct,
        holding_total: lines.iter().map(|l| l.holding_pct).sum(),
        relationship_total: lines.iter().map(|l| l.relationship_pct).sum(),
        lines,
    };
    info!(
        "Reconciled {issuer} @ {as_of}: {} holders, {} exceptions",
        recon.lines.len(),
        recon.exceptions().count()
    );
    Ok(recon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, NewHolding, NewRelationship};

    fn d() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn classifies_each_holder() {
        let snap = GraphSnapshot::new(
            vec![Entity::company("co", "Co")],
            vec![
                NewRelationship::ownership("a", "co", 30.0, d()).into_edge("e1".into()),
                NewRelationship::ownership("b", "co", 20.0, d()).into_edge("e2".into()),
                NewRelationship::ownership("c", "co", 10.0, d()).into_edge("e3".into()),
            ],
            vec![
                NewHolding::new("a", "co", 30.0, d()).into_holding("h1".into()),
                NewHolding::new("b", "co", 25.0, d()).into_holding("h2".into()),
                NewHolding::new("z", "co", 5.0, d()).into_holding("h3".into()),
            ],
            vec![],
        );
        let r = reconcile_ownership(&snap, "co", d(), DEFAULT_TOLERANCE_PCT).unwrap();
        let status: Vec<(&str, ReconStatus)> = r
            .lines
            .iter()
            .map(|l| (l.holder.as_str(), l.status))
            .collect();
        assert_eq!(
            status,
            vec![
                ("a", ReconStatus::Reconciled),
                ("b", ReconStatus::Mismatch),
                ("c", ReconStatus::MissingHolding),
                ("z", ReconStatus::MissingEdge),
            ]
        );
        assert!(!r.is_clean());
        assert!((r.holding_total - 60.0).abs() < 1e-9);
    }
}
