//! UBO determination: ownership chains, the role-profile gate and control
//! facts combined into one answer for a subject at a point in time.
//!
//! RULES:
//!   - Every hop of a chain passes the UBO gate or the chain is suppressed.
//!   - A chain running through a pooled vehicle that is controlled by
//!     someone other than the chain's owner is suppressed as controlled
//!     elsewhere.
//!   - Ownership qualifies on the sum of a person's eligible chains.
//!     Control qualifies on its own; the two are never added together.

use crate::{
    budget::WalkOutcome,
    control_evaluator::evaluate_control,
    error::GraphResult,
    model::{ControlType, EntityCategory, TrustRole, UsageIntent},
    ownership_walker::{compute_ubo_chains, CycleReport, UboChain, WalkParams},
    role_profile::{GateDecision, SuppressionReason, UboGate},
    snapshot::GraphSnapshot,
    types::{EntityId, Pct, RecordId, PCT_EPSILON},
    ubo_status::{NewUboRecord, QualifyingReason, UboRecord, UboStatus},
};
use chrono::{DateTime, NaiveDate, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const DEFAULT_UBO_THRESHOLD_PCT: Pct = 25.0;
pub const DEFAULT_CONTROL_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeterminationParams {
    pub walk: WalkParams,
    pub ubo_threshold_pct: Pct,
    pub control_depth: usize,
}

impl Default for DeterminationParams {
    fn default() -> Self {
        Self {
            walk: WalkParams::default(),
            ubo_threshold_pct: DEFAULT_UBO_THRESHOLD_PCT,
            control_depth: DEFAULT_CONTROL_DEPTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualifiedUbo {
    pub person: EntityId,
    /// Sum of the person's eligible ownership chains. Zero for control-only.
    pub ownership_pct: Pct,
    pub reason: QualifyingReason,
    pub chains: Vec<UboChain>,
    pub control_types: Vec<ControlType>,
    /// Review flags raised by the gate in flag-only mode.
    pub flags: Vec<SuppressionReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuppressedChain {
    pub chain: UboChain,
    pub issuer: EntityId,
    pub holder: EntityId,
    pub reason: SuppressionReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustPartyFact {
    pub trust: EntityId,
    pub party: EntityId,
    pub role: TrustRole,
    pub is_natural_person: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UboDetermination {
    pub subject: EntityId,
    pub as_of: NaiveDate,
    pub threshold_pct: Pct,
    pub qualified: Vec<QualifiedUbo>,
    /// Persons with eligible ownership below the threshold and no control.
    pub below_threshold: Vec<(EntityId, Pct)>,
    pub suppressed: Vec<SuppressedChain>,
    /// Chains that ended without reaching a person.
    pub incomplete: Vec<UboChain>,
    pub trust_parties: Vec<TrustPartyFact>,
    pub cycles: Vec<CycleReport>,
    pub outcome: WalkOutcome,
}

impl UboDetermination {
    pub fn qualified_person(&self, person: &str) -> Option<&QualifiedUbo> {
        self.qualified.iter().find(|q| q.person == person)
    }

    pub fn is_qualified(&self, person: &str) -> bool {
        self.qualified_person(person).is_some()
    }

    pub fn control_only(&self) -> impl Iterator<Item = &QualifiedUbo> {
        self.qualified
            .iter()
            .filter(|q| q.reason == QualifyingReason::Control)
    }
}

pub fn determine_ubos(
    snapshot: &GraphSnapshot,
    gate: &UboGate,
    subject: &str,
    as_of: NaiveDate,
    params: &DeterminationParams,
) -> GraphResult<UboDetermination> {
    // Thresholding happens after gating, so the walk keeps every chain.
    let walk_params = WalkParams {
        min_threshold_pct: 0.0,
        ..params.walk
    };
    let walk = compute_ubo_chains(snapshot, subject, as_of, &walk_params)?;
    let control = evaluate_control(
        snapshot,
        subject,
        as_of,
        params.control_depth,
        &params.walk.budget,
    )?;

    let mut owned: BTreeMap<EntityId, (Pct, Vec<UboChain>, Vec<SuppressionReason>)> =
        BTreeMap::new();
    let mut suppressed = Vec::new();
    let mut incomplete = Vec::new();

    for chain in walk.chains {
        if !chain.is_complete() {
            incomplete.push(chain);
            continue;
        }
        match gate_chain(snapshot, gate, &chain, as_of) {
            ChainVerdict::Suppressed {
                issuer,
                holder,
                reason,
            } => {
                debug!(
                    "Chain {:?} suppressed at {issuer} <- {holder}: {reason:?}",
                    chain.path
                );
                suppressed.push(SuppressedChain {
                    chain,
                    issuer,
                    holder,
                    reason,
                });
            }
            ChainVerdict::Eligible { flags } => {
                let entry = owned
                    .entry(chain.terminal().to_string())
                    .or_insert_with(|| (0.0, Vec::new(), Vec::new()));
                entry.0 += chain.cumulative_pct;
                entry.1.push(chain);
                for flag in flags {
                    if !entry.2.contains(&flag) {
                        entry.2.push(flag);
                    }
                }
            }
        }
    }

    let trust_parties = trust_parties_of(snapshot, &incomplete, as_of);
    let controllers = control.natural_person_controllers(snapshot);

    let mut qualified = Vec::new();
    let mut below_threshold = Vec::new();
    let mut persons: BTreeSet<EntityId> = owned.keys().cloned().collect();
    persons.extend(controllers.iter().cloned());

    for person in persons {
        let (ownership_pct, chains, flags) = owned.remove(&person).unwrap_or_default();
        let by_ownership = ownership_pct + PCT_EPSILON >= params.ubo_threshold_pct;
        let by_control = controllers.contains(&person);
        match QualifyingReason::from_flags(by_ownership, by_control) {
            Some(reason) => qualified.push(QualifiedUbo {
                control_types: control.control_types_of(&person),
                person,
                ownership_pct,
                reason,
                chains,
                flags,
            }),
            None => below_threshold.push((person, ownership_pct)),
        }
    }
    qualified.sort_by(|a, b| {
        b.ownership_pct
            .total_cmp(&a.ownership_pct)
            .then_with(|| a.person.cmp(&b.person))
    });
    below_threshold.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut cycles = walk.cycles;
    cycles.extend(control.cycles.iter().cloned());

    debug!(
        "Determination for {subject} @ {as_of}: {} qualified, {} suppressed, {} incomplete",
        qualified.len(),
        suppressed.len(),
        incomplete.len()
    );

    Ok(UboDetermination {
        subject: subject.to_string(),
        as_of,
        threshold_pct: params.ubo_threshold_pct,
        qualified,
        below_threshold,
        suppressed,
        incomplete,
        trust_parties,
        cycles,
        outcome: walk.outcome.worst(control.outcome),
    })
}

enum ChainVerdict {
    Eligible {
        flags: Vec<SuppressionReason>,
    },
    Suppressed {
        issuer: EntityId,
        holder: EntityId,
        reason: SuppressionReason,
    },
}

fn gate_chain(
    snapshot: &GraphSnapshot,
    gate: &UboGate,
    chain: &UboChain,
    as_of: NaiveDate,
) -> ChainVerdict {
    let profiles = snapshot.role_profiles();
    let owner = chain.terminal();
    let mut flags = Vec::new();

    for hop in chain.path.windows(2) {
        let (issuer, holder) = (&hop[0], &hop[1]);
        match gate.decide_at(profiles, issuer, holder, UsageIntent::Ubo, as_of) {
            GateDecision::Eligible => {}
            GateDecision::Flagged { reason } => flags.push(reason),
            GateDecision::Suppressed { reason } => {
                return ChainVerdict::Suppressed {
                    issuer: issuer.clone(),
                    holder: holder.clone(),
                    reason,
                }
            }
        }

        if holder == owner {
            continue;
        }
        let pooled = profiles
            .profile_for(issuer, holder, None, as_of)
            .is_some_and(|p| p.role_type.is_pooled_vehicle());
        if !pooled {
            continue;
        }
        let mut controllers: Vec<EntityId> = snapshot
            .controllers_at(holder, as_of)
            .into_iter()
            .map(|e| e.from_entity.clone())
            .collect();
        controllers.sort();
        controllers.dedup();
        if !controllers.is_empty() && !controllers.iter().any(|c| c == owner) {
            return ChainVerdict::Suppressed {
                issuer: issuer.clone(),
                holder: holder.clone(),
                reason: SuppressionReason::ControlledElsewhere {
                    vehicle: holder.clone(),
                    controllers,
                },
            };
        }
    }
    ChainVerdict::Eligible { flags }
}

fn trust_parties_of(
    snapshot: &GraphSnapshot,
    incomplete: &[UboChain],
    as_of: NaiveDate,
) -> Vec<TrustPartyFact> {
    let trusts: BTreeSet<&str> = incomplete
        .iter()
        .map(UboChain::terminal)
        .filter(|t| snapshot.category(t) == Some(EntityCategory::Trust))
        .collect();
    trusts
        .into_iter()
        .flat_map(|trust| {
            snapshot
                .trust_parties_at(trust, as_of)
                .into_iter()
                .filter_map(move |edge| {
                    edge.trust_role.map(|role| TrustPartyFact {
                        trust: trust.to_string(),
                        party: edge.from_entity.clone(),
                        role,
                        is_natural_person: snapshot.is_natural_person(&edge.from_entity),
                    })
                })
        })
        .collect()
}

// ── Determination runs and diff ─────────────────────────────────

/// A persisted determination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeterminationRun {
    pub run_id: String,
    pub subject: EntityId,
    pub as_of: NaiveDate,
    pub threshold_pct: Pct,
    pub qualified_count: usize,
    pub computed_at: DateTime<Utc>,
    pub determination: UboDetermination,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UboChange {
    pub person: EntityId,
    pub old_pct: Pct,
    pub new_pct: Pct,
    pub old_reason: QualifyingReason,
    pub new_reason: QualifyingReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeterminationDiff {
    pub added: Vec<EntityId>,
    pub removed: Vec<EntityId>,
    pub changed: Vec<UboChange>,
}

impl DeterminationDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

pub fn diff_determinations(before: &UboDetermination, after: &UboDetermination) -> DeterminationDiff {
    let old: HashMap<&str, &QualifiedUbo> = before
        .qualified
        .iter()
        .map(|q| (q.person.as_str(), q))
        .collect();
    let new: HashMap<&str, &QualifiedUbo> = after
        .qualified
        .iter()
        .map(|q| (q.person.as_str(), q))
        .collect();

    let mut diff = DeterminationDiff::default();
    for q in &after.qualified {
        match old.get(q.person.as_str()) {
            None => diff.added.push(q.person.clone()),
            Some(prev) => {
                if (prev.ownership_pct - q.ownership_pct).abs() > PCT_EPSILON
                    || prev.reason != q.reason
                {
                    diff.changed.push(UboChange {
                        person: q.person.clone(),
                        old_pct: prev.ownership_pct,
                        new_pct: q.ownership_pct,
                        old_reason: prev.reason,
                        new_reason: q.reason,
                    });
                }
            }
        }
    }
    diff.removed = before
        .qualified
        .iter()
        .filter(|q| !new.contains_key(q.person.as_str()))
        .map(|q| q.person.clone())
        .collect();
    diff.added.sort();
    diff.removed.sort();
    diff
}

// ── Record synchronisation ──────────────────────────────────────

/// What `sync_ubo_records` will do for one subject.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSyncPlan {
    pub create: Vec<NewUboRecord>,
    pub remove: Vec<RecordId>,
    /// No longer qualified, but the record's state cannot move to REMOVED.
    pub blocked: Vec<(RecordId, UboStatus)>,
}

/// New qualified owners get a SUSPECTED record; records whose owner no
/// longer qualifies move to REMOVED where the state machine allows it.
pub fn plan_record_sync(determination: &UboDetermination, existing: &[UboRecord]) -> RecordSyncPlan {
    let mut plan = RecordSyncPlan::default();
    let live: Vec<&UboRecord> = existing
        .iter()
        .filter(|r| r.subject == determination.subject && r.status.is_active())
        .collect();

    for q in &determination.qualified {
        if !live.iter().any(|r| r.ubo_person == q.person) {
            plan.create.push(
                NewUboRecord::suspected(
                    determination.subject.clone(),
                    q.person.clone(),
                    q.ownership_pct,
                    q.reason,
                )
                .with_chains(q.chains.clone()),
            );
        }
    }
    for record in live {
        if determination.is_qualified(&record.ubo_person) {
            continue;
        }
        if record.status.can_transition_to(UboStatus::Removed) {
            plan.remove.push(record.record_id.clone());
        } else {
            plan.blocked.push((record.record_id.clone(), record.status));
        }
    }
    plan
}
