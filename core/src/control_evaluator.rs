//! Control graph evaluator.
//!
//! RULE: Control is categorical. This module reads CONTROL edges only and
//! never multiplies, adds or otherwise combines a control indicator with an
//! ownership percentage.
//!
//! Two views are offered:
//!   - `evaluate_control`: transitive (controller, controlled, type) facts
//!     above a subject, cycle-safe and depth-bounded.
//!   - `board_controller`: who, if anyone, is the single controller of one
//!     entity under the board-control priority rules.

use crate::{
    budget::{BudgetKind, IncompleteReason, WalkBudget, WalkOutcome},
    error::{GraphError, GraphResult},
    model::ControlType,
    ownership_walker::CycleReport,
    snapshot::GraphSnapshot,
    text_enum,
    types::{EdgeId, EntityId, Pct, PCT_EPSILON},
};
use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlFact {
    pub controller: EntityId,
    pub controlled: EntityId,
    pub control_type: ControlType,
    pub edge_id: EdgeId,
    /// 1 for a direct controller of the subject.
    pub depth: usize,
    /// Subject first, `controller` last.
    pub path: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEvaluation {
    pub subject: EntityId,
    pub as_of: NaiveDate,
    pub facts: Vec<ControlFact>,
    pub cycles: Vec<CycleReport>,
    pub outcome: WalkOutcome,
}

impl ControlEvaluation {
    /// Distinct controllers (at any depth) that are natural persons.
    pub fn natural_person_controllers(&self, snapshot: &GraphSnapshot) -> Vec<EntityId> {
        let mut seen = HashSet::new();
        self.facts
            .iter()
            .filter(|f| snapshot.is_natural_person(&f.controller))
            .filter(|f| seen.insert(f.controller.clone()))
            .map(|f| f.controller.clone())
            .collect()
    }

    pub fn control_types_of(&self, controller: &str) -> Vec<ControlType> {
        let mut types: Vec<ControlType> = self
            .facts
            .iter()
            .filter(|f| f.controller == controller)
            .map(|f| f.control_type)
            .collect();
        types.sort();
        types.dedup();
        types
    }
}

struct Frontier {
    node: EntityId,
    path: Vec<EntityId>,
}

/// Breadth-first over CONTROL edges pointing at the frontier. A controller
/// of a controller controls the subject too.
pub fn evaluate_control(
    snapshot: &GraphSnapshot,
    subject: &str,
    as_of: NaiveDate,
    max_depth: usize,
    budget: &WalkBudget,
) -> GraphResult<ControlEvaluation> {
    if !snapshot.contains(subject) {
        return Err(GraphError::EntityNotFound {
            entity_id: subject.to_string(),
        });
    }

    let mut meter = budget.meter();
    let mut facts = Vec::new();
    let mut cycles = Vec::new();
    let mut depth_hit = false;
    let mut budget_hit: Option<BudgetKind> = None;

    let mut queue = VecDeque::from([Frontier {
        node: subject.to_string(),
        path: vec![subject.to_string()],
    }]);

    while let Some(current) = queue.pop_front() {
        if let Err(kind) = meter.visit() {
            budget_hit = Some(kind);
            break;
        }
        let depth = current.path.len() - 1;
        let controllers = snapshot.controllers_at(&current.node, as_of);
        if depth >= max_depth {
            depth_hit |= !controllers.is_empty();
            continue;
        }

        let mut expanded = HashSet::new();
        for edge in controllers {
            if current.path.contains(&edge.from_entity) {
                let mut path = current.path.clone();
                path.push(edge.from_entity.clone());
                warn!(
                    "Control cycle above {subject}: {} re-enters {}",
                    current.node, edge.from_entity
                );
                cycles.push(CycleReport {
                    path,
                    reentered: edge.from_entity.clone(),
                });
                continue;
            }
            let Some(control_type) = edge.control_type else {
                continue;
            };
            let mut path = current.path.clone();
            path.push(edge.from_entity.clone());
            facts.push(ControlFact {
                controller: edge.from_entity.clone(),
                controlled: current.node.clone(),
                control_type,
                edge_id: edge.edge_id.clone(),
                depth: depth + 1,
                path: path.clone(),
            });
            // Several control types from one controller expand it once.
            if expanded.insert(edge.from_entity.clone()) {
                queue.push_back(Frontier {
                    node: edge.from_entity.clone(),
                    path,
                });
            }
        }
    }

    let outcome = match budget_hit {
        Some(kind) => WalkOutcome::Incomplete(IncompleteReason::Budget(kind)),
        None if depth_hit => WalkOutcome::Incomplete(IncompleteReason::Depth),
        None => WalkOutcome::Complete,
    };
    debug!(
        "Control evaluation for {subject} @ {as_of}: {} facts, {:?}",
        facts.len(),
        outcome
    );

    Ok(ControlEvaluation {
        subject: subject.to_string(),
        as_of,
        facts,
        cycles,
        outcome,
    })
}

// ── Board control rules ─────────────────────────────────────────

text_enum! {
    pub enum BoardControlMethod {
        SpecialInstrument => "SPECIAL_INSTRUMENT",
        BoardAppointment => "BOARD_APPOINTMENT",
        VotingMajority => "VOTING_MAJORITY",
        NoSingleController => "NO_SINGLE_CONTROLLER",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoardControlRules {
    /// Share of board seats a party must be able to appoint.
    pub board_appointment_pct: Pct,
    /// Voting rights must strictly exceed this.
    pub voting_majority_pct: Pct,
    /// How many parties to list when nobody controls alone.
    pub max_candidates: usize,
}

impl Default for BoardControlRules {
    fn default() -> Self {
        Self {
            board_appointment_pct: 50.0,
            voting_majority_pct: 50.0,
            max_candidates: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCandidate {
    pub entity_id: EntityId,
    pub appointment_pct: Pct,
    pub voting_pct: Pct,
    pub special_instruments: Vec<ControlType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardControlResult {
    pub entity_id: EntityId,
    pub as_of: NaiveDate,
    pub controller: Option<EntityId>,
    pub method: BoardControlMethod,
    pub candidates: Vec<ControlCandidate>,
    pub explanation: Vec<String>,
}

/// Priority: a special instrument (GP authority, veto, special rights) held
/// by exactly one party wins outright; then appointment of the board; then a
/// voting majority; otherwise there is no single controller.
pub fn board_controller(
    snapshot: &GraphSnapshot,
    entity_id: &str,
    as_of: NaiveDate,
    rules: &BoardControlRules,
) -> GraphResult<BoardControlResult> {
    if !snapshot.contains(entity_id) {
        return Err(GraphError::EntityNotFound {
            entity_id: entity_id.to_string(),
        });
    }

    let mut by_party: BTreeMap<&str, ControlCandidate> = BTreeMap::new();
    for edge in snapshot.controllers_at(entity_id, as_of) {
        let Some(control_type) = edge.control_type else {
            continue;
        };
        let entry = by_party
            .entry(edge.from_entity.as_str())
            .or_insert_with(|| ControlCandidate {
                entity_id: edge.from_entity.clone(),
                appointment_pct: 0.0,
                voting_pct: 0.0,
                special_instruments: Vec::new(),
            });
        let rights = edge.rights_pct.unwrap_or(0.0);
        match control_type {
            ControlType::BoardAppointment => entry.appointment_pct += rights,
            ControlType::VotingRights => entry.voting_pct += rights,
            special => entry.special_instruments.push(special),
        }
    }
    let parties: Vec<ControlCandidate> = by_party.into_values().collect();
    let mut explanation = Vec::new();

    let special: Vec<&ControlCandidate> = parties
        .iter()
        .filter(|p| !p.special_instruments.is_empty())
        .collect();
    let decided = match special.as_slice() {
        [only] => {
            explanation.push(format!(
                "{} holds special instrument(s) {:?}",
                only.entity_id, only.special_instruments
            ));
            Some((only.entity_id.clone(), BoardControlMethod::SpecialInstrument))
        }
        [] => None,
        many => {
            explanation.push(format!(
                "{} parties hold special instruments; none controls alone",
                many.len()
            ));
            return Ok(no_single_controller(entity_id, as_of, parties_from(&many), rules, explanation));
        }
    };

    let decided = decided.or_else(|| {
        parties
            .iter()
            .find(|p| p.appointment_pct + PCT_EPSILON >= rules.board_appointment_pct)
            .map(|p| {
                explanation.push(format!(
                    "{} can appoint {:.1}% of the board",
                    p.entity_id, p.appointment_pct
                ));
                (p.entity_id.clone(), BoardControlMethod::BoardAppointment)
            })
    });

    let decided = decided.or_else(|| {
        parties
            .iter()
            .find(|p| p.voting_pct > rules.voting_majority_pct + PCT_EPSILON)
            .map(|p| {
                explanation.push(format!("{} holds {:.1}% of votes", p.entity_id, p.voting_pct));
                (p.entity_id.clone(), BoardControlMethod::VotingMajority)
            })
    });

    match decided {
        Some((controller, method)) => Ok(BoardControlResult {
            entity_id: entity_id.to_string(),
            as_of,
            controller: Some(controller),
            method,
            candidates: parties,
            explanation,
        }),
        None => {
            explanation.push("no party meets a control rule".into());
            Ok(no_single_controller(entity_id, as_of, parties, rules, explanation))
        }
    }
}

fn parties_from(many: &[&ControlCandidate]) -> Vec<ControlCandidate> {
    many.iter().map(|c| (*c).clone()).collect()
}

fn no_single_controller(
    entity_id: &str,
    as_of: NaiveDate,
    mut candidates: Vec<ControlCandidate>,
    rules: &BoardControlRules,
    explanation: Vec<String>,
) -> BoardControlResult {
    candidates.sort_by(|a, b| {
        (b.appointment_pct + b.voting_pct)
            .total_cmp(&(a.appointment_pct + a.voting_pct))
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    candidates.truncate(rules.max_candidates);
    BoardControlResult {
        entity_id: entity_id.to_string(),
        as_of,
        controller: None,
        method: BoardControlMethod::NoSingleController,
        candidates,
        explanation,
    }
}
