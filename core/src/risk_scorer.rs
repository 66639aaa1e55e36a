//! Red-flag scoring and case decision evaluation.
//!
//! RULES:
//!   - Scoring is a pure function of (flags, extra factors, ScoringConfig).
//!   - A single open hard stop forces `has_hard_stop` and the dominating
//!     sentinel score. It is an override, never a weighted addend.
//!   - Threshold matching order: hard stop, then any escalate flag, then
//!     the highest-min_score score band containing the total.

use crate::{
    error::{GraphError, GraphResult},
    text_enum,
    types::CaseId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

text_enum! {
    pub enum FlagSeverity {
        Soft => "SOFT",
        Escalate => "ESCALATE",
        HardStop => "HARD_STOP",
    }
}

text_enum! {
    pub enum FlagStatus {
        Open => "OPEN",
        Blocking => "BLOCKING",
        Mitigated => "MITIGATED",
        Waived => "WAIVED",
        Dismissed => "DISMISSED",
        Closed => "CLOSED",
    }
}

impl FlagStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, FlagStatus::Open | FlagStatus::Blocking)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedFlag {
    pub flag_id: String,
    pub case_id: CaseId,
    pub code: String,
    pub severity: FlagSeverity,
    pub status: FlagStatus,
    pub description: Option<String>,
    pub raised_at: DateTime<Utc>,
}

text_enum! {
    pub enum RecommendedAction {
        Approve => "APPROVE",
        Remediate => "REMEDIATE",
        Escalate => "ESCALATE",
        Reject => "REJECT",
        Pending => "PENDING",
    }
}

text_enum! {
    pub enum ThresholdKind {
        HardStop => "HARD_STOP",
        Escalate => "ESCALATE",
        Score => "SCORE",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionThreshold {
    pub name: String,
    pub kind: ThresholdKind,
    #[serde(default)]
    pub min_score: i64,
    #[serde(default)]
    pub max_score: Option<i64>,
    pub action: RecommendedAction,
}

impl DecisionThreshold {
    fn contains(&self, score: i64) -> bool {
        score >= self.min_score && self.max_score.map_or(true, |max| score <= max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub soft_weight: i64,
    pub escalate_weight: i64,
    /// Per disputed UBO record on the case's subjects.
    pub disputed_ubo_weight: i64,
    /// Per PROVEN/VERIFIED record without identity plus ownership/control proof.
    pub missing_evidence_weight: i64,
    pub hard_stop_sentinel: i64,
    pub thresholds: Vec<DecisionThreshold>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let band = |name: &str, kind, min_score, max_score, action| DecisionThreshold {
            name: name.into(),
            kind,
            min_score,
            max_score,
            action,
        };
        Self {
            soft_weight: 5,
            escalate_weight: 25,
            disputed_ubo_weight: 20,
            missing_evidence_weight: 15,
            hard_stop_sentinel: 1_000_000,
            thresholds: vec![
                band("hard_stop", ThresholdKind::HardStop, 0, None, RecommendedAction::Reject),
                band("escalate", ThresholdKind::Escalate, 0, None, RecommendedAction::Escalate),
                band("clear", ThresholdKind::Score, 0, Some(24), RecommendedAction::Approve),
                band("remediate", ThresholdKind::Score, 25, Some(99), RecommendedAction::Remediate),
                band("high", ThresholdKind::Score, 100, None, RecommendedAction::Escalate),
            ],
        }
    }
}

/// Everything the scorer looks at for one case.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseRiskInputs<'a> {
    pub flags: &'a [RedFlag],
    pub disputed_ubo_records: u32,
    pub records_missing_evidence: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseScore {
    pub soft_count: u32,
    pub escalate_count: u32,
    pub hard_stop_count: u32,
    pub total_score: i64,
    pub has_hard_stop: bool,
}

pub fn score(inputs: &CaseRiskInputs<'_>, config: &ScoringConfig) -> CaseScore {
    let mut soft_count = 0u32;
    let mut escalate_count = 0u32;
    let mut hard_stop_count = 0u32;
    for flag in inputs.flags.iter().filter(|f| f.status.is_open()) {
        match flag.severity {
            FlagSeverity::Soft => soft_count += 1,
            FlagSeverity::Escalate => escalate_count += 1,
            FlagSeverity::HardStop => hard_stop_count += 1,
        }
    }

    let has_hard_stop = hard_stop_count > 0;
    let total_score = if has_hard_stop {
        config.hard_stop_sentinel
    } else {
        i64::from(soft_count) * config.soft_weight
            + i64::from(escalate_count) * config.escalate_weight
            + i64::from(inputs.disputed_ubo_records) * config.disputed_ubo_weight
            + i64::from(inputs.records_missing_evidence) * config.missing_evidence_weight
    };

    CaseScore {
        soft_count,
        escalate_count,
        hard_stop_count,
        total_score,
        has_hard_stop,
    }
}

/// Maps a score to an action. `Pending` when no configured threshold applies.
pub fn evaluate(score: &CaseScore, config: &ScoringConfig) -> RecommendedAction {
    let first_of = |kind| config.thresholds.iter().find(|t| t.kind == kind);

    if score.has_hard_stop {
        if let Some(t) = first_of(ThresholdKind::HardStop) {
            return t.action;
        }
    }
    if score.escalate_count > 0 {
        if let Some(t) = first_of(ThresholdKind::Escalate) {
            return t.action;
        }
    }
    config
        .thresholds
        .iter()
        .filter(|t| t.kind == ThresholdKind::Score && t.contains(score.total_score))
        .max_by_key(|t| t.min_score)
        .map(|t| t.action)
        .unwrap_or(RecommendedAction::Pending)
}

text_enum! {
    pub enum CaseDecision {
        Approved => "APPROVED",
        Rejected => "REJECTED",
        Referred => "REFERRED",
    }
}

/// A human decision may never approve over an unresolved hard stop.
pub fn validate_decision(case_id: &str, decision: CaseDecision, score: &CaseScore) -> GraphResult<()> {
    if decision == CaseDecision::Approved && score.has_hard_stop {
        return Err(GraphError::HardStopConflict {
            case_id: case_id.to_string(),
            hard_stops: score.hard_stop_count,
        });
    }
    Ok(())
}

/// Immutable record of one evaluation, optionally carrying a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScoreSnapshot {
    pub snapshot_id: String,
    pub case_id: CaseId,
    pub score: CaseScore,
    pub recommended_action: RecommendedAction,
    pub evaluated_by: String,
    pub evaluated_at: DateTime<Utc>,
    pub decision: Option<CaseDecision>,
    pub decided_by: Option<String>,
    pub decision_notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag(severity: FlagSeverity, status: FlagStatus) -> RedFlag {
        RedFlag {
            flag_id: "f".into(),
            case_id: "case-1".into(),
            code: "TEST".into(),
            severity,
            status,
            description: None,
            raised_at: Utc::now(),
        }
    }

    #[test]
    fn weights_sum_for_open_flags_only() {
        let flags = vec![
            flag(FlagSeverity::Soft, FlagStatus::Open),
            flag(FlagSeverity::Soft, FlagStatus::Blocking),
            flag(FlagSeverity::Soft, FlagStatus::Dismissed),
        ];
        let s = score(
            &CaseRiskInputs {
                flags: &flags,
                ..Default::default()
            },
            &ScoringConfig::default(),
        );
        assert_eq!(s.soft_count, 2);
        assert_eq!(s.total_score, 10);
        assert_eq!(evaluate(&s, &ScoringConfig::default()), RecommendedAction::Approve);
    }

    #[test]
    fn one_escalate_flag_escalates_regardless_of_score() {
        let flags = vec![flag(FlagSeverity::Escalate, FlagStatus::Open)];
        let mut config = ScoringConfig::default();
        config.escalate_weight = 1;
        let s = score(&CaseRiskInputs { flags: &flags, ..Default::default() }, &config);
        assert_eq!(evaluate(&s, &config), RecommendedAction::Escalate);
    }

    #[test]
    fn extra_factors_feed_total() {
        let s = score(
            &CaseRiskInputs {
                flags: &[],
                disputed_ubo_records: 1,
                records_missing_evidence: 1,
            },
            &ScoringConfig::default(),
        );
        assert_eq!(s.total_score, 35);
        assert_eq!(evaluate(&s, &ScoringConfig::default()), RecommendedAction::Remediate);
    }

    #[test]
    fn no_matching_band_is_pending() {
        let config = ScoringConfig {
            thresholds: vec![],
            ..ScoringConfig::default()
        };
        let s = score(&CaseRiskInputs::default(), &config);
        assert_eq!(evaluate(&s, &config), RecommendedAction::Pending);
    }

    #[test]
    fn approve_blocked_by_hard_stop() {
        let flags = vec![flag(FlagSeverity::HardStop, FlagStatus::Open)];
        let s = score(&CaseRiskInputs { flags: &flags, ..Default::default() }, &ScoringConfig::default());
        assert!(matches!(
            validate_decision("case-1", CaseDecision::Approved, &s),
            Err(GraphError::HardStopConflict { hard_stops: 1, .. })
        ));
        assert!(validate_decision("case-1", CaseDecision::Rejected, &s).is_ok());
    }
}
