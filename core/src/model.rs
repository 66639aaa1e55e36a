//! Entities, relationship edges and holding positions.
//!
//! RULE: Edges are superseded, never edited. The only permitted mutation of a
//! stored edge is closing it (setting `effective_to` on an open edge).
//! Validation here runs before any row reaches the store; the schema
//! repeats the same constraints.

use crate::{
    error::{GraphError, GraphResult},
    text_enum,
    types::{EdgeId, EntityId, HoldingId, Pct},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

text_enum! {
    /// What an entity is. Drives walk termination; immutable once set.
    pub enum EntityCategory {
        Person => "PERSON",
        LegalEntity => "LEGAL_ENTITY",
        Fund => "FUND",
        Trust => "TRUST",
    }
}

impl EntityCategory {
    pub fn is_natural_person(&self) -> bool {
        matches!(self, EntityCategory::Person)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: EntityId,
    pub name: String,
    pub category: EntityCategory,
    pub jurisdiction: Option<String>,
}

impl Entity {
    pub fn new(entity_id: impl Into<EntityId>, name: impl Into<String>, category: EntityCategory) -> Self {
        Self {
            entity_id: entity_id.into(),
            name: name.into(),
            category,
            jurisdiction: None,
        }
    }

    pub fn person(entity_id: impl Into<EntityId>, name: impl Into<String>) -> Self {
        Self::new(entity_id, name, EntityCategory::Person)
    }

    pub fn company(entity_id: impl Into<EntityId>, name: impl Into<String>) -> Self {
        Self::new(entity_id, name, EntityCategory::LegalEntity)
    }

    pub fn fund(entity_id: impl Into<EntityId>, name: impl Into<String>) -> Self {
        Self::new(entity_id, name, EntityCategory::Fund)
    }

    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = Some(jurisdiction.into());
        self
    }
}

text_enum! {
    pub enum RelationshipKind {
        Ownership => "OWNERSHIP",
        Control => "CONTROL",
        TrustRole => "TRUST_ROLE",
    }
}

text_enum! {
    /// Categorical control rights. Never combined with ownership percentages.
    pub enum ControlType {
        BoardAppointment => "BOARD_APPOINTMENT",
        GpAuthority => "GP_AUTHORITY",
        VetoRights => "VETO_RIGHTS",
        SpecialRights => "SPECIAL_RIGHTS",
        VotingRights => "VOTING_RIGHTS",
    }
}

impl ControlType {
    /// Golden share, GP authority and veto-style instruments override
    /// seat and vote majorities in the board-control rules.
    pub fn is_special_instrument(&self) -> bool {
        matches!(
            self,
            ControlType::GpAuthority | ControlType::VetoRights | ControlType::SpecialRights
        )
    }
}

text_enum! {
    pub enum TrustRole {
        Settlor => "SETTLOR",
        Trustee => "TRUSTEE",
        Protector => "PROTECTOR",
        Beneficiary => "BENEFICIARY",
    }
}

/// Where an edge came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    pub reference: Option<String>,
}

impl Provenance {
    pub const MANUAL: &'static str = "MANUAL";
    pub const INVESTOR_REGISTER: &'static str = "INVESTOR_REGISTER";

    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            reference: None,
        }
    }

    pub fn manual() -> Self {
        Self::new(Self::MANUAL)
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// A stored relationship edge. `from_entity` owns / controls / holds a trust
/// role in `to_entity`. Validity is the half-open window
/// `[effective_from, effective_to)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub edge_id: EdgeId,
    pub from_entity: EntityId,
    pub to_entity: EntityId,
    pub kind: RelationshipKind,
    pub percentage: Option<Pct>,
    pub control_type: Option<ControlType>,
    pub rights_pct: Option<Pct>,
    pub trust_role: Option<TrustRole>,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub provenance: Provenance,
}

impl RelationshipEdge {
    pub fn is_open(&self) -> bool {
        self.effective_to.is_none()
    }

    pub fn is_valid_at(&self, as_of: NaiveDate) -> bool {
        window_contains(self.effective_from, self.effective_to, as_of)
    }
}

pub fn window_contains(from: NaiveDate, to: Option<NaiveDate>, as_of: NaiveDate) -> bool {
    from <= as_of && to.map_or(true, |t| as_of < t)
}

pub fn validate_window(from: NaiveDate, to: Option<NaiveDate>) -> GraphResult<()> {
    match to {
        Some(to) if to <= from => Err(GraphError::InvalidTemporalWindow { from, to }),
        _ => Ok(()),
    }
}

pub fn validate_pct(value: Pct) -> GraphResult<()> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(GraphError::PercentageOutOfRange { value });
    }
    Ok(())
}

/// An edge about to be written. Validated before insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRelationship {
    pub from_entity: EntityId,
    pub to_entity: EntityId,
    pub kind: RelationshipKind,
    pub percentage: Option<Pct>,
    pub control_type: Option<ControlType>,
    pub rights_pct: Option<Pct>,
    pub trust_role: Option<TrustRole>,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub provenance: Provenance,
}

impl NewRelationship {
    fn base(
        from_entity: impl Into<EntityId>,
        to_entity: impl Into<EntityId>,
        kind: RelationshipKind,
        effective_from: NaiveDate,
    ) -> Self {
        Self {
            from_entity: from_entity.into(),
            to_entity: to_entity.into(),
            kind,
            percentage: None,
            control_type: None,
            rights_pct: None,
            trust_role: None,
            effective_from,
            effective_to: None,
            provenance: Provenance::manual(),
        }
    }

    /// `owner` holds `pct` percent of `owned`.
    pub fn ownership(
        owner: impl Into<EntityId>,
        owned: impl Into<EntityId>,
        pct: Pct,
        effective_from: NaiveDate,
    ) -> Self {
        let mut rel = Self::base(owner, owned, RelationshipKind::Ownership, effective_from);
        rel.percentage = Some(pct);
        rel
    }

    pub fn control(
        controller: impl Into<EntityId>,
        controlled: impl Into<EntityId>,
        control_type: ControlType,
        effective_from: NaiveDate,
    ) -> Self {
        let mut rel = Self::base(controller, controlled, RelationshipKind::Control, effective_from);
        rel.control_type = Some(control_type);
        rel
    }

    pub fn trust_role(
        party: impl Into<EntityId>,
        trust: impl Into<EntityId>,
        role: TrustRole,
        effective_from: NaiveDate,
    ) -> Self {
        let mut rel = Self::base(party, trust, RelationshipKind::TrustRole, effective_from);
        rel.trust_role = Some(role);
        rel
    }

    pub fn with_rights_pct(mut self, rights_pct: Pct) -> Self {
        self.rights_pct = Some(rights_pct);
        self
    }

    pub fn until(mut self, effective_to: NaiveDate) -> Self {
        self.effective_to = Some(effective_to);
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn validate(&self) -> GraphResult<()> {
        if self.from_entity == self.to_entity {
            return Err(GraphError::SelfEdge {
                entity: self.from_entity.clone(),
                kind: self.kind,
            });
        }
        validate_window(self.effective_from, self.effective_to)?;

        match self.kind {
            RelationshipKind::Ownership => {
                let pct = self.percentage.ok_or_else(|| GraphError::MissingPercentage {
                    from_entity: self.from_entity.clone(),
                    to_entity: self.to_entity.clone(),
                })?;
                validate_pct(pct)?;
            }
            RelationshipKind::Control => {
                if self.control_type.is_none() {
                    return Err(GraphError::MissingControlType {
                        from_entity: self.from_entity.clone(),
                        to_entity: self.to_entity.clone(),
                    });
                }
            }
            RelationshipKind::TrustRole => {
                if self.trust_role.is_none() {
                    return Err(GraphError::MissingTrustRole {
                        from_entity: self.from_entity.clone(),
                        to_entity: self.to_entity.clone(),
                    });
                }
            }
        }

        if let Some(rights) = self.rights_pct {
            validate_pct(rights)?;
        }
        Ok(())
    }

    pub fn into_edge(self, edge_id: EdgeId) -> RelationshipEdge {
        RelationshipEdge {
            edge_id,
            from_entity: self.from_entity,
            to_entity: self.to_entity,
            kind: self.kind,
            percentage: self.percentage,
            control_type: self.control_type,
            rights_pct: self.rights_pct,
            trust_role: self.trust_role,
            effective_from: self.effective_from,
            effective_to: self.effective_to,
            provenance: self.provenance,
        }
    }
}

text_enum! {
    pub enum HoldingBasis {
        Nav => "NAV",
        Units => "UNITS",
        Votes => "VOTES",
    }
}

text_enum! {
    /// Why a position is recorded. Only UBO-intent positions may feed a UBO
    /// determination; transfer-agency positions are economic only.
    pub enum UsageIntent {
        Ubo => "UBO",
        TransferAgency => "TRANSFER_AGENCY",
    }
}

/// A direct economic position: `holder` holds `pct_of_issuer` of `issuer`
/// as at `as_of_date`. Implied (look-through) positions are never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingEdge {
    pub holding_id: HoldingId,
    pub holder: EntityId,
    pub issuer: EntityId,
    pub pct_of_issuer: Pct,
    pub instrument_type: String,
    pub share_class: Option<String>,
    pub basis: HoldingBasis,
    pub usage_intent: UsageIntent,
    pub as_of_date: NaiveDate,
}

impl HoldingEdge {
    /// Positions for the same holder, issuer, instrument and class supersede
    /// each other by `as_of_date`.
    pub fn position_key(&self) -> (&str, &str, &str, Option<&str>) {
        (
            self.holder.as_str(),
            self.issuer.as_str(),
            self.instrument_type.as_str(),
            self.share_class.as_deref(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHolding {
    pub holder: EntityId,
    pub issuer: EntityId,
    pub pct_of_issuer: Pct,
    pub instrument_type: String,
    pub share_class: Option<String>,
    pub basis: HoldingBasis,
    pub usage_intent: UsageIntent,
    pub as_of_date: NaiveDate,
}

impl NewHolding {
    pub fn new(
        holder: impl Into<EntityId>,
        issuer: impl Into<EntityId>,
        pct_of_issuer: Pct,
        as_of_date: NaiveDate,
    ) -> Self {
        Self {
            holder: holder.into(),
            issuer: issuer.into(),
            pct_of_issuer,
            instrument_type: "SHARES".into(),
            share_class: None,
            basis: HoldingBasis::Nav,
            usage_intent: UsageIntent::TransferAgency,
            as_of_date,
        }
    }

    pub fn for_ubo(mut self) -> Self {
        self.usage_intent = UsageIntent::Ubo;
        self
    }

    pub fn with_share_class(mut self, share_class: impl Into<String>) -> Self {
        self.share_class = Some(share_class.into());
        self
    }

    pub fn with_instrument(mut self, instrument_type: impl Into<String>, basis: HoldingBasis) -> Self {
        self.instrument_type = instrument_type.into();
        self.basis = basis;
        self
    }

    pub fn validate(&self) -> GraphResult<()> {
        if self.holder == self.issuer {
            return Err(GraphError::SelfEdge {
                entity: self.holder.clone(),
                kind: RelationshipKind::Ownership,
            });
        }
        validate_pct(self.pct_of_issuer)
    }

    pub fn into_holding(self, holding_id: HoldingId) -> HoldingEdge {
        HoldingEdge {
            holding_id,
            holder: self.holder,
            issuer: self.issuer,
            pct_of_issuer: self.pct_of_issuer,
            instrument_type: self.instrument_type,
            share_class: self.share_class,
            basis: self.basis,
            usage_intent: self.usage_intent,
            as_of_date: self.as_of_date,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn window_is_half_open() {
        let edge = NewRelationship::ownership("a", "b", 50.0, d(2024, 1, 1))
            .until(d(2024, 6, 1))
            .into_edge("e1".into());
        assert!(!edge.is_valid_at(d(2023, 12, 31)));
        assert!(edge.is_valid_at(d(2024, 1, 1)));
        assert!(edge.is_valid_at(d(2024, 5, 31)));
        assert!(!edge.is_valid_at(d(2024, 6, 1)));
    }

    #[test]
    fn self_edges_rejected() {
        let rel = NewRelationship::ownership("a", "a", 10.0, d(2024, 1, 1));
        assert!(matches!(rel.validate(), Err(GraphError::SelfEdge { .. })));
    }

    #[test]
    fn inverted_window_rejected() {
        let rel = NewRelationship::ownership("a", "b", 10.0, d(2024, 1, 1)).until(d(2024, 1, 1));
        assert!(matches!(
            rel.validate(),
            Err(GraphError::InvalidTemporalWindow { .. })
        ));
    }

    #[test]
    fn ownership_needs_percentage_in_range() {
        let mut rel = NewRelationship::ownership("a", "b", 101.0, d(2024, 1, 1));
        assert!(matches!(
            rel.validate(),
            Err(GraphError::PercentageOutOfRange { .. })
        ));
        rel.percentage = None;
        assert!(matches!(
            rel.validate(),
            Err(GraphError::MissingPercentage { .. })
        ));
    }

    #[test]
    fn control_needs_type_but_not_percentage() {
        let rel = NewRelationship::control("gp", "fund", ControlType::GpAuthority, d(2024, 1, 1));
        assert!(rel.validate().is_ok());
        assert!(rel.percentage.is_none());

        let mut bad = rel.clone();
        bad.control_type = None;
        assert!(matches!(
            bad.validate(),
            Err(GraphError::MissingControlType { .. })
        ));
    }

    #[test]
    fn text_forms_round_trip() {
        for kind in RelationshipKind::ALL {
            assert_eq!(kind.as_str().parse::<RelationshipKind>().unwrap(), *kind);
        }
        assert!("PARTNERSHIP".parse::<EntityCategory>().is_err());
    }
}
