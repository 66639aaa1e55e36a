use crate::{
    budget::WalkBudget,
    control_evaluator::BoardControlRules,
    determination::{DeterminationParams, DEFAULT_CONTROL_DEPTH, DEFAULT_UBO_THRESHOLD_PCT},
    exposure::ExposureParams,
    exposure_cache::CacheConfig,
    ownership_walker::{WalkParams, DEFAULT_MAX_DEPTH},
    reconciliation::DEFAULT_TOLERANCE_PCT,
    risk_scorer::ScoringConfig,
    role_profile::PooledVehiclePolicy,
    types::Pct,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WalkDefaults {
    pub max_depth: usize,
    pub ubo_threshold_pct: Pct,
    pub control_depth: usize,
    pub max_nodes: usize,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for WalkDefaults {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            ubo_threshold_pct: DEFAULT_UBO_THRESHOLD_PCT,
            control_depth: DEFAULT_CONTROL_DEPTH,
            max_nodes: crate::budget::DEFAULT_MAX_NODES,
            timeout_ms: None,
        }
    }
}

impl WalkDefaults {
    pub fn budget(&self) -> WalkBudget {
        let budget = WalkBudget::nodes(self.max_nodes);
        match self.timeout_ms {
            Some(ms) => budget.with_timeout(Duration::from_millis(ms)),
            None => budget,
        }
    }

    pub fn walk_params(&self, min_threshold_pct: Pct) -> WalkParams {
        WalkParams::new(self.max_depth, min_threshold_pct).with_budget(self.budget())
    }

    pub fn determination_params(&self) -> DeterminationParams {
        DeterminationParams {
            walk: self.walk_params(0.0),
            ubo_threshold_pct: self.ubo_threshold_pct,
            control_depth: self.control_depth,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExposureDefaults {
    pub max_depth: usize,
    pub min_pct: Pct,
    pub max_rows: usize,
    pub stop_on_no_bo_data: bool,
}

impl Default for ExposureDefaults {
    fn default() -> Self {
        let p = ExposureParams::default();
        Self {
            max_depth: p.max_depth,
            min_pct: p.min_pct,
            max_rows: p.max_rows,
            stop_on_no_bo_data: p.stop_on_no_bo_data,
        }
    }
}

impl ExposureDefaults {
    pub fn params(&self, budget: WalkBudget) -> ExposureParams {
        ExposureParams {
            max_depth: self.max_depth,
            min_pct: self.min_pct,
            max_rows: self.max_rows,
            stop_on_no_bo_data: self.stop_on_no_bo_data,
            budget,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationDefaults {
    pub tolerance_pct: Pct,
}

impl Default for ReconciliationDefaults {
    fn default() -> Self {
        Self {
            tolerance_pct: DEFAULT_TOLERANCE_PCT,
        }
    }
}

/// Contents of data/engine/limits.json.
#[derive(Debug, Clone, Default, Deserialize)]
struct LimitsFile {
    #[serde(default)]
    walk: WalkDefaults,
    #[serde(default)]
    exposure: ExposureDefaults,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    pooled_vehicles: PooledVehiclePolicy,
    #[serde(default)]
    board_control: BoardControlRules,
    #[serde(default)]
    reconciliation: ReconciliationDefaults,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub walk: WalkDefaults,
    pub exposure: ExposureDefaults,
    pub cache: CacheConfig,
    pub pooled_vehicles: PooledVehiclePolicy,
    pub board_control: BoardControlRules,
    pub reconciliation: ReconciliationDefaults,
    pub scoring: ScoringConfig,
}

impl EngineConfig {
    /// Load from the data/ directory.
    /// In tests, use EngineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let limits_path = format!("{data_dir}/engine/limits.json");
        let limits_content = std::fs::read_to_string(&limits_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {limits_path}: {e}"))?;
        let limits: LimitsFile = serde_json::from_str(&limits_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {limits_path}: {e}"))?;

        let scoring_path = format!("{data_dir}/scoring/risk_weights.json");
        let scoring_content = std::fs::read_to_string(&scoring_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {scoring_path}: {e}"))?;
        let scoring: ScoringConfig = serde_json::from_str(&scoring_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {scoring_path}: {e}"))?;

        let config = Self {
            walk: limits.walk,
            exposure: limits.exposure,
            cache: limits.cache,
            pooled_vehicles: limits.pooled_vehicles,
            board_control: limits.board_control,
            reconciliation: limits.reconciliation,
            scoring,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.walk_params(0.0).validate()?;
        self.exposure_params().validate()?;
        if !(0.0..=100.0).contains(&self.walk.ubo_threshold_pct) {
            anyhow::bail!(
                "walk.ubo_threshold_pct {} is outside 0..=100",
                self.walk.ubo_threshold_pct
            );
        }
        if self.scoring.thresholds.is_empty() {
            log::warn!("No decision thresholds configured; every evaluation will be PENDING");
        }
        Ok(())
    }

    pub fn walk_params(&self, min_threshold_pct: Pct) -> WalkParams {
        self.walk.walk_params(min_threshold_pct)
    }

    pub fn determination_params(&self) -> DeterminationParams {
        self.walk.determination_params()
    }

    pub fn exposure_params(&self) -> ExposureParams {
        self.exposure.params(self.walk.budget())
    }

    /// Source-system defaults, no files needed.
    pub fn default_test() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_file_fields_are_optional() {
        let limits: LimitsFile = serde_json::from_str(r#"{ "exposure": { "max_depth": 3, "min_pct": 0.5, "max_rows": 10, "stop_on_no_bo_data": false } }"#).unwrap();
        assert_eq!(limits.exposure.max_depth, 3);
        assert_eq!(limits.walk.max_depth, DEFAULT_MAX_DEPTH);
        assert!(limits.pooled_vehicles.default_deny);
    }

    #[test]
    fn bundled_data_files_load() {
        let data_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/../data");
        let config = EngineConfig::load(data_dir).unwrap();
        assert_eq!(config.walk.ubo_threshold_pct, 25.0);
        assert_eq!(config.exposure.max_rows, 200);
        assert_eq!(config.scoring.soft_weight, 5);
        assert_eq!(config.scoring.escalate_weight, 25);
    }
}
