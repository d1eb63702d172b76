//! Student risk scoring: institutional policy checks fused with three sub-model
//! risk predictions into one prioritised verdict per student.

pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod models;
pub mod policy;
pub mod predictors;
pub mod report;
pub mod risk;

pub use config::ScoringConfig;
pub use error::{Result, ScoringError};
pub use features::FeatureMapper;
pub use models::{ComprehensiveRiskResult, PolicyEvaluation, RiskLevel, StudentFeatures};
pub use policy::PolicyEngine;
pub use predictors::{PredictorSet, RiskPredictor};
pub use risk::ComprehensiveScorer;
