//! Issuer-scoped role profiles and the UBO eligibility gate.
//!
//! A role profile says what a holder *is* to a given issuer (end investor,
//! nominee, fund-of-funds, ...) and carries the policy knobs the walkers
//! consult: look-through policy, BO-data availability, UBO eligibility.
//!
//! Profiles are versioned in time. At most one open version exists per
//! scope key `(issuer, holder, share_class)`.

use crate::{
    error::{GraphError, GraphResult},
    model::{validate_window, window_contains, UsageIntent},
    text_enum,
    types::EntityId,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

text_enum! {
    pub enum RoleType {
        EndInvestor => "END_INVESTOR",
        Nominee => "NOMINEE",
        Omnibus => "OMNIBUS",
        IntermediaryFof => "INTERMEDIARY_FOF",
        MasterPool => "MASTER_POOL",
        IntraGroupPool => "INTRA_GROUP_POOL",
    }
}

impl RoleType {
    /// Pooled vehicles aggregate many end investors; they are default-denied
    /// as UBOs unless a profile explicitly says otherwise.
    pub fn is_pooled_vehicle(&self) -> bool {
        matches!(
            self,
            RoleType::IntermediaryFof | RoleType::MasterPool | RoleType::IntraGroupPool
        )
    }

    fn default_lookthrough(&self) -> LookthroughPolicy {
        match self {
            RoleType::EndInvestor => LookthroughPolicy::None,
            _ => LookthroughPolicy::OnDemand,
        }
    }
}

text_enum! {
    pub enum LookthroughPolicy {
        None => "NONE",
        OnDemand => "ON_DEMAND",
        AutoIfData => "AUTO_IF_DATA",
        Always => "ALWAYS",
    }
}

impl LookthroughPolicy {
    fn restrictiveness(&self) -> u8 {
        match self {
            LookthroughPolicy::None => 3,
            LookthroughPolicy::AutoIfData => 2,
            LookthroughPolicy::OnDemand => 1,
            LookthroughPolicy::Always => 0,
        }
    }

    pub fn most_restrictive(self, other: LookthroughPolicy) -> LookthroughPolicy {
        if other.restrictiveness() > self.restrictiveness() {
            other
        } else {
            self
        }
    }

    /// ALWAYS is the explicit override for missing beneficial-owner data.
    pub fn overrides_missing_bo_data(&self) -> bool {
        matches!(self, LookthroughPolicy::Always)
    }
}

text_enum! {
    pub enum HolderAffiliation {
        IntraGroup => "INTRA_GROUP",
        External => "EXTERNAL",
        Unknown => "UNKNOWN",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleProfile {
    pub profile_id: String,
    pub issuer: EntityId,
    pub holder: EntityId,
    pub share_class: Option<String>,
    pub role_type: RoleType,
    pub lookthrough_policy: LookthroughPolicy,
    pub holder_affiliation: HolderAffiliation,
    pub beneficial_owner_data_available: bool,
    /// `None` means not stated; the default-deny policy then applies to
    /// pooled vehicles.
    pub is_ubo_eligible: Option<bool>,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}

impl RoleProfile {
    pub fn is_valid_at(&self, as_of: NaiveDate) -> bool {
        window_contains(self.effective_from, self.effective_to, as_of)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRoleProfile {
    pub issuer: EntityId,
    pub holder: EntityId,
    pub share_class: Option<String>,
    pub role_type: RoleType,
    pub lookthrough_policy: LookthroughPolicy,
    pub holder_affiliation: HolderAffiliation,
    pub beneficial_owner_data_available: bool,
    pub is_ubo_eligible: Option<bool>,
    pub effective_from: NaiveDate,
}

impl NewRoleProfile {
    pub fn new(
        issuer: impl Into<EntityId>,
        holder: impl Into<EntityId>,
        role_type: RoleType,
        effective_from: NaiveDate,
    ) -> Self {
        let holder_affiliation = match role_type {
            RoleType::IntraGroupPool => HolderAffiliation::IntraGroup,
            _ => HolderAffiliation::Unknown,
        };
        Self {
            issuer: issuer.into(),
            holder: holder.into(),
            share_class: None,
            role_type,
            lookthrough_policy: role_type.default_lookthrough(),
            holder_affiliation,
            beneficial_owner_data_available: true,
            is_ubo_eligible: None,
            effective_from,
        }
    }

    pub fn with_lookthrough(mut self, policy: LookthroughPolicy) -> Self {
        self.lookthrough_policy = policy;
        self
    }

    pub fn with_ubo_eligibility(mut self, eligible: bool) -> Self {
        self.is_ubo_eligible = Some(eligible);
        self
    }

    pub fn without_bo_data(mut self) -> Self {
        self.beneficial_owner_data_available = false;
        self
    }

    pub fn with_affiliation(mut self, affiliation: HolderAffiliation) -> Self {
        self.holder_affiliation = affiliation;
        self
    }

    pub fn with_share_class(mut self, share_class: impl Into<String>) -> Self {
        self.share_class = Some(share_class.into());
        self
    }

    pub fn validate(&self) -> GraphResult<()> {
        if self.issuer == self.holder {
            return Err(GraphError::InvalidParameter {
                name: "holder",
                reason: format!("holder '{}' cannot be its own issuer", self.holder),
            });
        }
        validate_window(self.effective_from, None)
    }

    pub fn into_profile(self, profile_id: String) -> RoleProfile {
        RoleProfile {
            profile_id,
            issuer: self.issuer,
            holder: self.holder,
            share_class: self.share_class,
            role_type: self.role_type,
            lookthrough_policy: self.lookthrough_policy,
            holder_affiliation: self.holder_affiliation,
            beneficial_owner_data_available: self.beneficial_owner_data_available,
            is_ubo_eligible: self.is_ubo_eligible,
            effective_from: self.effective_from,
            effective_to: None,
        }
    }
}

/// The look-through stance of a node, folded across every profile in which
/// it appears as a holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLookthrough {
    pub policy: LookthroughPolicy,
    pub beneficial_owner_data_available: bool,
}

/// Point-in-time lookup over all role profile versions.
#[derive(Debug, Clone, Default)]
pub struct RoleProfileIndex {
    by_pair: HashMap<(EntityId, EntityId), Vec<RoleProfile>>,
    by_holder: HashMap<EntityId, Vec<RoleProfile>>,
}

impl RoleProfileIndex {
    pub fn new(profiles: Vec<RoleProfile>) -> Self {
        let mut index = Self::default();
        for profile in profiles {
            index
                .by_holder
                .entry(profile.holder.clone())
                .or_default()
                .push(profile.clone());
            index
                .by_pair
                .entry((profile.issuer.clone(), profile.holder.clone()))
                .or_default()
                .push(profile);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.by_pair.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pair.is_empty()
    }

    /// The profile governing `holder` in `issuer` at `as_of`. A share-class
    /// specific profile wins over the issuer-wide one; among valid versions
    /// the latest `effective_from` wins.
    pub fn profile_for(
        &self,
        issuer: &str,
        holder: &str,
        share_class: Option<&str>,
        as_of: NaiveDate,
    ) -> Option<&RoleProfile> {
        let versions = self.by_pair.get(&(issuer.to_string(), holder.to_string()))?;
        let valid = versions.iter().filter(|p| p.is_valid_at(as_of));

        let class_match = share_class.and_then(|class| {
            valid
                .clone()
                .filter(|p| p.share_class.as_deref() == Some(class))
                .max_by_key(|p| p.effective_from)
        });
        class_match.or_else(|| {
            valid
                .filter(|p| p.share_class.is_none())
                .max_by_key(|p| p.effective_from)
        })
    }

    pub fn holder_profiles_at<'a>(
        &'a self,
        holder: &str,
        as_of: NaiveDate,
    ) -> impl Iterator<Item = &'a RoleProfile> + 'a {
        self.by_holder
            .get(holder)
            .into_iter()
            .flatten()
            .filter(move |p| p.is_valid_at(as_of))
    }

    /// Most restrictive policy across the holder's valid profiles. BO data
    /// counts as unavailable if any profile says so. `None` when the node has
    /// no profile at all.
    pub fn lookthrough_for(&self, holder: &str, as_of: NaiveDate) -> Option<NodeLookthrough> {
        self.holder_profiles_at(holder, as_of).fold(None, |acc, p| {
            Some(match acc {
                None => NodeLookthrough {
                    policy: p.lookthrough_policy,
                    beneficial_owner_data_available: p.beneficial_owner_data_available,
                },
                Some(prev) => NodeLookthrough {
                    policy: prev.policy.most_restrictive(p.lookthrough_policy),
                    beneficial_owner_data_available: prev.beneficial_owner_data_available
                        && p.beneficial_owner_data_available,
                },
            })
        })
    }
}

text_enum! {
    /// What "override" means for a default-denied pooled vehicle.
    pub enum PooledVehicleMode {
        /// Drop the holding from the UBO determination entirely.
        Suppress => "SUPPRESS",
        /// Keep it visible but flagged for review.
        FlagOnly => "FLAG_ONLY",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PooledVehiclePolicy {
    pub default_deny: bool,
    pub mode: PooledVehicleMode,
}

impl Default for PooledVehiclePolicy {
    fn default() -> Self {
        Self {
            default_deny: true,
            mode: PooledVehicleMode::Suppress,
        }
    }
}

/// Why a holding was kept out of (or flagged in) a UBO determination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SuppressionReason {
    TransferAgencyIntent,
    ExplicitlyIneligible { role_type: RoleType },
    PooledVehicleDefaultDeny { role_type: RoleType },
    ControlledElsewhere { vehicle: EntityId, controllers: Vec<EntityId> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Eligible,
    Flagged { reason: SuppressionReason },
    Suppressed { reason: SuppressionReason },
}

impl GateDecision {
    pub fn is_eligible(&self) -> bool {
        !matches!(self, GateDecision::Suppressed { .. })
    }
}

/// Decides whether a holder's position in an issuer may feed a UBO
/// determination.
#[derive(Debug, Clone, Copy, Default)]
pub struct UboGate {
    pub policy: PooledVehiclePolicy,
}

impl UboGate {
    pub fn new(policy: PooledVehiclePolicy) -> Self {
        Self { policy }
    }

    pub fn decide(&self, profile: Option<&RoleProfile>, usage_intent: UsageIntent) -> GateDecision {
        if usage_intent != UsageIntent::Ubo {
            return GateDecision::Suppressed {
                reason: SuppressionReason::TransferAgencyIntent,
            };
        }
        let Some(profile) = profile else {
            return GateDecision::Eligible;
        };
        match profile.is_ubo_eligible {
            Some(false) => GateDecision::Suppressed {
                reason: SuppressionReason::ExplicitlyIneligible {
                    role_type: profile.role_type,
                },
            },
            Some(true) => GateDecision::Eligible,
            None if self.policy.default_deny && profile.role_type.is_pooled_vehicle() => {
                let reason = SuppressionReason::PooledVehicleDefaultDeny {
                    role_type: profile.role_type,
                };
                match self.policy.mode {
                    PooledVehicleMode::Suppress => GateDecision::Suppressed { reason },
                    PooledVehicleMode::FlagOnly => GateDecision::Flagged { reason },
                }
            }
            None => GateDecision::Eligible,
        }
    }

    pub fn decide_at(
        &self,
        index: &RoleProfileIndex,
        issuer: &str,
        holder: &str,
        usage_intent: UsageIntent,
        as_of: NaiveDate,
    ) -> GateDecision {
        self.decide(index.profile_for(issuer, holder, None, as_of), usage_intent)
    }

    pub fn is_ubo_eligible(
        &self,
        index: &RoleProfileIndex,
        issuer: &str,
        holder: &str,
        usage_intent: UsageIntent,
        as_of: NaiveDate,
    ) -> bool {
        self.decide_at(index, issuer, holder, usage_intent, as_of)
            .is_eligible()
    }
}
