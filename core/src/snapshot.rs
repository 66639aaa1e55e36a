//! Immutable read snapshot of the graph.
//!
//! A snapshot is loaded once from the store and then shared by every walk
//! that runs against it. It holds all versions of every edge; the `as_of`
//! filter is applied per hop, never at load time, so one snapshot answers
//! any point-in-time question.
//!
//! RULE: Walkers read the graph only through a `GraphSnapshot`.

use crate::{
    model::{Entity, EntityCategory, HoldingEdge, RelationshipEdge, RelationshipKind},
    role_profile::{RoleProfile, RoleProfileIndex},
    types::EntityId,
};
use chrono::NaiveDate;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    entities: HashMap<EntityId, Entity>,
    /// OWNERSHIP edges keyed by the owned entity.
    owners_of: HashMap<EntityId, Vec<RelationshipEdge>>,
    /// CONTROL edges keyed by the controlled entity.
    controllers_of: HashMap<EntityId, Vec<RelationshipEdge>>,
    /// TRUST_ROLE edges keyed by the trust.
    trust_parties_of: HashMap<EntityId, Vec<RelationshipEdge>>,
    holdings_by_holder: HashMap<EntityId, Vec<HoldingEdge>>,
    holdings_by_issuer: HashMap<EntityId, Vec<HoldingEdge>>,
    role_profiles: RoleProfileIndex,
}

impl GraphSnapshot {
    pub fn new(
        entities: Vec<Entity>,
        edges: Vec<RelationshipEdge>,
        holdings: Vec<HoldingEdge>,
        profiles: Vec<RoleProfile>,
    ) -> Self {
        let mut snapshot = Self {
            entities: entities
                .into_iter()
                .map(|e| (e.entity_id.clone(), e))
                .collect(),
            role_profiles: RoleProfileIndex::new(profiles),
            ..Self::default()
        };

        for edge in edges {
            let bucket = match edge.kind {
                RelationshipKind::Ownership => &mut snapshot.owners_of,
                RelationshipKind::Control => &mut snapshot.controllers_of,
                RelationshipKind::TrustRole => &mut snapshot.trust_parties_of,
            };
            bucket.entry(edge.to_entity.clone()).or_default().push(edge);
        }
        // Stable hop order makes every walk deterministic.
        for edges in snapshot
            .owners_of
            .values_mut()
            .chain(snapshot.controllers_of.values_mut())
            .chain(snapshot.trust_parties_of.values_mut())
        {
            edges.sort_by(|a, b| {
                a.from_entity
                    .cmp(&b.from_entity)
                    .then(a.effective_from.cmp(&b.effective_from))
                    .then(a.edge_id.cmp(&b.edge_id))
            });
        }

        for holding in holdings {
            snapshot
                .holdings_by_issuer
                .entry(holding.issuer.clone())
                .or_default()
                .push(holding.clone());
            snapshot
                .holdings_by_holder
                .entry(holding.holder.clone())
                .or_default()
                .push(holding);
        }
        snapshot
    }

    // ── Entities ───────────────────────────────────────────────

    pub fn entity(&self, entity_id: &str) -> Option<&Entity> {
        self.entities.get(entity_id)
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.entities.contains_key(entity_id)
    }

    pub fn category(&self, entity_id: &str) -> Option<EntityCategory> {
        self.entities.get(entity_id).map(|e| e.category)
    }

    /// Unknown ids are treated as non-persons: a chain never completes on an
    /// entity the store has not classified.
    pub fn is_natural_person(&self, entity_id: &str) -> bool {
        self.category(entity_id)
            .is_some_and(|c| c.is_natural_person())
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    // ── Relationship edges ─────────────────────────────────────

    pub fn owners_at(&self, owned: &str, as_of: NaiveDate) -> Vec<&RelationshipEdge> {
        valid_at(self.owners_of.get(owned), as_of)
    }

    pub fn controllers_at(&self, controlled: &str, as_of: NaiveDate) -> Vec<&RelationshipEdge> {
        valid_at(self.controllers_of.get(controlled), as_of)
    }

    pub fn trust_parties_at(&self, trust: &str, as_of: NaiveDate) -> Vec<&RelationshipEdge> {
        valid_at(self.trust_parties_of.get(trust), as_of)
    }

    pub fn ownership_edge_count(&self) -> usize {
        self.owners_of.values().map(Vec::len).sum()
    }

    // ── Holdings ───────────────────────────────────────────────

    /// Positions held by `holder` at `as_of`: per position key the latest
    /// row dated on or before `as_of`. Zero positions are exits and dropped.
    pub fn positions_held_at(&self, holder: &str, as_of: NaiveDate) -> Vec<&HoldingEdge> {
        latest_positions(self.holdings_by_holder.get(holder), as_of, |h| {
            h.issuer.as_str()
        })
    }

    /// Positions in `issuer` at `as_of`, same resolution rules.
    pub fn positions_in_issuer_at(&self, issuer: &str, as_of: NaiveDate) -> Vec<&HoldingEdge> {
        latest_positions(self.holdings_by_issuer.get(issuer), as_of, |h| {
            h.holder.as_str()
        })
    }

    /// Every holder with at least one holding row, sorted.
    pub fn holders(&self) -> Vec<&str> {
        let mut holders: Vec<&str> = self.holdings_by_holder.keys().map(String::as_str).collect();
        holders.sort_unstable();
        holders
    }

    pub fn role_profiles(&self) -> &RoleProfileIndex {
        &self.role_profiles
    }
}

fn valid_at(edges: Option<&Vec<RelationshipEdge>>, as_of: NaiveDate) -> Vec<&RelationshipEdge> {
    edges
        .into_iter()
        .flatten()
        .filter(|e| e.is_valid_at(as_of))
        .collect()
}

fn latest_positions<'a>(
    holdings: Option<&'a Vec<HoldingEdge>>,
    as_of: NaiveDate,
    sort_key: impl Fn(&HoldingEdge) -> &str,
) -> Vec<&'a HoldingEdge> {
    let mut latest: HashMap<(&str, &str, &str, Option<&str>), &HoldingEdge> = HashMap::new();
    for holding in holdings.into_iter().flatten() {
        if holding.as_of_date > as_of {
            continue;
        }
        latest
            .entry(holding.position_key())
            .and_modify(|current| {
                if holding.as_of_date > current.as_of_date
                    || (holding.as_of_date == current.as_of_date
                        && holding.holding_id > current.holding_id)
                {
                    *current = holding;
                }
            })
            .or_insert(holding);
    }
    let mut positions: Vec<&HoldingEdge> = latest
        .into_values()
        .filter(|h| h.pct_of_issuer > 0.0)
        .collect();
    positions.sort_by(|a, b| {
        sort_key(a)
            .cmp(sort_key(b))
            .then(a.instrument_type.cmp(&b.instrument_type))
            .then(a.share_class.cmp(&b.share_class))
    });
    positions
}
