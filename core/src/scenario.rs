//! Synthetic structures for load checks and the runner.
//!
//! The fan-out structure is the classic look-through trap: many investors
//! in a fund of funds, which holds a master pool, which holds small stakes
//! in many SPVs. Materialising investor x SPV exposure would produce
//! investors * spvs rows.

use crate::{
    engine::OwnershipEngine,
    error::GraphResult,
    model::{Entity, EntityCategory, NewHolding},
    name_generator::NameGenerator,
    rng::{RngBank, ScenarioStream},
    role_profile::{LookthroughPolicy, NewRoleProfile, RoleType},
    types::{EntityId, Pct},
};
use chrono::NaiveDate;
use log::info;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FanOutSpec {
    pub seed: u64,
    pub investors: usize,
    pub spvs: usize,
    pub as_of: NaiveDate,
    /// Range of each investor's stake in the fund of funds.
    pub investor_pct: (Pct, Pct),
    /// Range of the master pool's stake in each SPV.
    pub spv_pct: (Pct, Pct),
    /// Look-through policy of the fund of funds in the master pool.
    pub fof_policy: LookthroughPolicy,
}

impl FanOutSpec {
    pub fn new(as_of: NaiveDate) -> Self {
        Self {
            seed: 42,
            investors: 1_000,
            spvs: 200,
            as_of,
            investor_pct: (0.1, 5.0),
            spv_pct: (1.0, 5.0),
            fof_policy: LookthroughPolicy::None,
        }
    }

    pub fn with_size(mut self, investors: usize, spvs: usize) -> Self {
        self.investors = investors;
        self.spvs = spvs;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_fof_policy(mut self, policy: LookthroughPolicy) -> Self {
        self.fof_policy = policy;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FanOut {
    pub fof: EntityId,
    pub master: EntityId,
    pub investors: Vec<EntityId>,
    pub spvs: Vec<EntityId>,
}

pub fn build_fan_out(engine: &OwnershipEngine, spec: &FanOutSpec) -> GraphResult<FanOut> {
    let bank = RngBank::new(spec.seed);
    let mut names = bank.stream(ScenarioStream::Names);
    let mut investor_rng = bank.stream(ScenarioStream::Investors);
    let mut spv_rng = bank.stream(ScenarioStream::Spvs);

    let fof = Entity::new("fof-x", NameGenerator::fund_name(&mut names, "Fund of Funds"), EntityCategory::Fund);
    let master = Entity::new("master-m", NameGenerator::fund_name(&mut names, "Master Pool"), EntityCategory::Fund);
    engine.register_entity(&fof)?;
    engine.register_entity(&master)?;

    engine.record_holding(&NewHolding::new(&fof.entity_id, &master.entity_id, 100.0, spec.as_of))?;
    engine.upsert_role_profile(
        &NewRoleProfile::new(&master.entity_id, &fof.entity_id, RoleType::IntermediaryFof, spec.as_of)
            .with_lookthrough(spec.fof_policy),
    )?;

    let mut spvs = Vec::with_capacity(spec.spvs);
    for n in 1..=spec.spvs {
        let spv = Entity::new(
            format!("spv-{n:03}"),
            NameGenerator::spv_name(&mut names, n),
            EntityCategory::LegalEntity,
        );
        engine.register_entity(&spv)?;
        let pct = spv_rng.pct_between(spec.spv_pct.0, spec.spv_pct.1);
        engine.record_holding(&NewHolding::new(&master.entity_id, &spv.entity_id, pct, spec.as_of))?;
        spvs.push(spv.entity_id);
    }

    let mut investors = Vec::with_capacity(spec.investors);
    for n in 1..=spec.investors {
        let investor = Entity::person(format!("inv-{n:04}"), NameGenerator::person_name(&mut names));
        engine.register_entity(&investor)?;
        let pct = investor_rng.pct_between(spec.investor_pct.0, spec.investor_pct.1);
        engine.record_holding(&NewHolding::new(&investor.entity_id, &fof.entity_id, pct, spec.as_of))?;
        investors.push(investor.entity_id);
    }

    info!(
        "Fan-out scenario built: {} investors -> {} -> {} -> {} SPVs (seed {})",
        investors.len(),
        fof.entity_id,
        master.entity_id,
        spvs.len(),
        spec.seed
    );
    Ok(FanOut {
        fof: fof.entity_id,
        master: master.entity_id,
        investors,
        spvs,
    })
}
