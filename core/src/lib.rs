//! Beneficial-ownership resolution: UBO chains, control, verification
//! status, bounded look-through exposure and case risk scoring over a
//! temporally versioned ownership graph.

pub mod budget;
pub mod config;
pub mod control_evaluator;
pub mod determination;
pub mod engine;
pub mod error;
pub mod event;
pub mod exposure;
pub mod exposure_cache;
pub mod model;
pub mod name_generator;
pub mod ownership_walker;
pub mod reconciliation;
pub mod risk_scorer;
pub mod rng;
pub mod role_profile;
pub mod scenario;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod ubo_status;
