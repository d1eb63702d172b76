//! The three sub-model risk predictors.
//!
//! Each predictor runs a standardised logistic classifier over the shared feature
//! vector, maps the probability onto its own HIGH/MEDIUM/LOW bands and explains the
//! result with the factors that usually drive that outcome.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{ModelConfig, ProbabilityBands};
use crate::error::{Result, ScoringError};
use crate::features::MODEL_FEATURES;
use crate::models::{RiskLevel, RiskModelKind, RiskPrediction, StudentFeatures};

pub trait RiskPredictor: Send + Sync {
    fn kind(&self) -> RiskModelKind;
    fn predict(&self, student: &StudentFeatures) -> Result<RiskPrediction>;
}

const FEATURE_MEANS: [f64; 13] = [
    70.0, 75.0, 75.0, 65.0, 2.8, 5.0, 120.0, 2.0, 0.5, 7.0, 2.0, 4.0, 6.0,
];
const FEATURE_SCALES: [f64; 13] = [
    15.0, 12.0, 15.0, 15.0, 0.8, 3.0, 60.0, 2.0, 1.0, 3.0, 2.0, 3.0, 3.0,
];

/// Standard scaler plus logistic regression, as exported by the training pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub feature_means: Vec<f64>,
    pub feature_scales: Vec<f64>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LogisticModel {
    pub fn builtin(kind: RiskModelKind) -> Self {
        let (coefficients, intercept) = match kind {
            RiskModelKind::Dropout => (
                [-1.2, -0.8, -0.9, -0.3, -0.4, -0.5, -0.2, 0.6, 0.3, -0.1, 0.3, 0.1, -0.1],
                -1.0,
            ),
            RiskModelKind::CourseFailure => (
                [-0.6, -0.3, -0.6, -1.3, -0.9, -0.5, -0.2, 0.3, 0.5, -0.1, 0.4, 0.3, 0.0],
                -0.8,
            ),
            RiskModelKind::ProgramDelay => (
                [-0.6, -0.5, -1.1, -0.4, -0.5, -0.2, -0.1, 0.3, 0.8, 0.0, 0.6, 0.1, -0.2],
                -1.0,
            ),
        };

        Self {
            feature_means: FEATURE_MEANS.to_vec(),
            feature_scales: FEATURE_SCALES.to_vec(),
            coefficients: coefficients.to_vec(),
            intercept,
        }
    }

    pub fn load(path: &Path, kind: RiskModelKind) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let model: LogisticModel = serde_json::from_str(&raw)?;
        model.check(kind)?;
        info!(model = kind.name(), path = %path.display(), "loaded model artifact");
        Ok(model)
    }

    fn check(&self, kind: RiskModelKind) -> Result<()> {
        let expected = MODEL_FEATURES.len();
        for (name, len) in [
            ("feature_means", self.feature_means.len()),
            ("feature_scales", self.feature_scales.len()),
            ("coefficients", self.coefficients.len()),
        ] {
            if len != expected {
                return Err(ScoringError::ModelArtifact {
                    model: kind.name().to_string(),
                    reason: format!("{name} has {len} entries, expected {expected}"),
                });
            }
        }

        if self.feature_scales.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err(ScoringError::ModelArtifact {
                model: kind.name().to_string(),
                reason: "feature_scales must be finite and non-zero".to_string(),
            });
        }

        Ok(())
    }

    pub fn probability(&self, x: &[f64]) -> f64 {
        let z = self.intercept
            + x.iter()
                .zip(&self.feature_means)
                .zip(&self.feature_scales)
                .zip(&self.coefficients)
                .map(|(((value, mean), scale), coef)| coef * (value - mean) / scale)
                .sum::<f64>();

        1.0 / (1.0 + (-z).exp())
    }
}

/// A loaded classifier with the banding settings of one sub-model.
#[derive(Debug, Clone)]
pub struct Classifier {
    kind: RiskModelKind,
    model: LogisticModel,
    bands: ProbabilityBands,
    decision_threshold: f64,
}

impl Classifier {
    pub fn new(
        kind: RiskModelKind,
        model: LogisticModel,
        bands: ProbabilityBands,
        decision_threshold: f64,
    ) -> Self {
        Self {
            kind,
            model,
            bands,
            decision_threshold,
        }
    }

    pub fn risk_level(&self, probability: f64) -> RiskLevel {
        if probability >= self.bands.high {
            RiskLevel::High
        } else if probability >= self.bands.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    fn classify(&self, student: &StudentFeatures) -> Result<(f64, bool, RiskLevel)> {
        let probability = self.model.probability(&student.model_vector());
        if !probability.is_finite() {
            return Err(ScoringError::Predictor {
                model: self.kind.name().to_string(),
                reason: format!("non-finite probability for student {}", student.student_id),
            });
        }

        Ok((
            probability,
            probability >= self.decision_threshold,
            self.risk_level(probability),
        ))
    }
}

const LOW_ATTENDANCE: f64 = 45.0;
const LOW_ENGAGEMENT: f64 = 73.0;
const LOW_COMPLETION: f64 = 68.0;
const LOW_LOGINS: f64 = 3.0;
const LOW_ASSIGNMENT_SCORE: f64 = 70.0;

pub struct DropoutPredictor {
    classifier: Classifier,
}

impl DropoutPredictor {
    pub fn new(classifier: Classifier) -> Self {
        Self { classifier }
    }
}

impl RiskPredictor for DropoutPredictor {
    fn kind(&self) -> RiskModelKind {
        RiskModelKind::Dropout
    }

    fn predict(&self, student: &StudentFeatures) -> Result<RiskPrediction> {
        let (probability, flagged, risk_level) = self.classifier.classify(student)?;

        let mut factors = Vec::new();
        if student.attendance_rate < LOW_ATTENDANCE {
            factors.push(format!("Low Attendance ({:.1}%)", student.attendance_rate));
        }
        if student.engagement_score < LOW_ENGAGEMENT {
            factors.push(format!("Low Engagement ({:.1})", student.engagement_score));
        }
        if student.assignment_completion_rate < LOW_COMPLETION {
            factors.push(format!(
                "Low Assignment Completion ({:.1}%)",
                student.assignment_completion_rate
            ));
        }
        if student.avg_login_count < LOW_LOGINS {
            factors.push(format!("Low Login Frequency ({:.1})", student.avg_login_count));
        }

        let recommendation = match risk_level {
            RiskLevel::High | RiskLevel::Critical => {
                "Immediate intervention required. Schedule mentor meeting and academic support."
            }
            RiskLevel::Medium => "Monitor closely. Consider additional tutoring or study groups.",
            RiskLevel::Low => "Continue regular monitoring.",
        };

        Ok(RiskPrediction {
            model: RiskModelKind::Dropout,
            probability,
            flagged,
            risk_level,
            contributing_factors: factors,
            recommendation: recommendation.to_string(),
            estimated_delay_semesters: None,
        })
    }
}

pub struct CourseFailurePredictor {
    classifier: Classifier,
}

impl CourseFailurePredictor {
    pub fn new(classifier: Classifier) -> Self {
        Self { classifier }
    }
}

impl RiskPredictor for CourseFailurePredictor {
    fn kind(&self) -> RiskModelKind {
        RiskModelKind::CourseFailure
    }

    fn predict(&self, student: &StudentFeatures) -> Result<RiskPrediction> {
        let (probability, flagged, risk_level) = self.classifier.classify(student)?;

        let mut areas = Vec::new();
        if student.avg_assignment_score < LOW_ASSIGNMENT_SCORE {
            areas.push(format!(
                "Low Assignment Scores ({:.1})",
                student.avg_assignment_score
            ));
        }
        if student.avg_login_count < LOW_LOGINS {
            areas.push(format!(
                "Minimal LMS Engagement ({:.1} logins)",
                student.avg_login_count
            ));
        }
        if student.attendance_rate < LOW_ATTENDANCE {
            areas.push(format!("Poor Class Attendance ({:.1}%)", student.attendance_rate));
        }
        if student.assignment_completion_rate < LOW_COMPLETION {
            areas.push(format!(
                "Low Completion Rate ({:.1}%)",
                student.assignment_completion_rate
            ));
        }

        let recommendation = match risk_level {
            RiskLevel::High | RiskLevel::Critical => {
                "Urgent: Recommend course tutoring and academic counseling"
            }
            RiskLevel::Medium => "Advisory: Suggest study groups and office hours attendance",
            RiskLevel::Low => "Maintain current study habits",
        };

        Ok(RiskPrediction {
            model: RiskModelKind::CourseFailure,
            probability,
            flagged,
            risk_level,
            contributing_factors: areas,
            recommendation: recommendation.to_string(),
            estimated_delay_semesters: None,
        })
    }
}

pub struct ProgramDelayPredictor {
    classifier: Classifier,
}

impl ProgramDelayPredictor {
    pub fn new(classifier: Classifier) -> Self {
        Self { classifier }
    }

    /// Half a semester per severe shortfall in completion or attendance.
    pub fn estimated_delay(student: &StudentFeatures) -> f64 {
        let mut shortfalls = 0u8;
        if student.assignment_completion_rate < 60.0 {
            shortfalls += 1;
        }
        if student.attendance_rate < 40.0 {
            shortfalls += 1;
        }
        f64::from(shortfalls) * 0.5
    }
}

impl RiskPredictor for ProgramDelayPredictor {
    fn kind(&self) -> RiskModelKind {
        RiskModelKind::ProgramDelay
    }

    fn predict(&self, student: &StudentFeatures) -> Result<RiskPrediction> {
        let (probability, flagged, risk_level) = self.classifier.classify(student)?;
        let delay = Self::estimated_delay(student);

        let mut factors = Vec::new();
        if student.assignment_completion_rate < LOW_COMPLETION {
            factors.push(format!(
                "Low Assignment Completion ({:.1}%)",
                student.assignment_completion_rate
            ));
        }
        if student.attendance_rate < LOW_ATTENDANCE {
            factors.push(format!("Poor Attendance ({:.1}%)", student.attendance_rate));
        }
        if student.engagement_score < LOW_ENGAGEMENT {
            factors.push(format!("Low Engagement ({:.1})", student.engagement_score));
        }

        let recommendation = match risk_level {
            RiskLevel::High | RiskLevel::Critical => format!(
                "Critical: Student may delay graduation by {delay:.1} semesters. Immediate academic planning required."
            ),
            RiskLevel::Medium => {
                "Caution: Monitor progress closely and provide academic support resources."
                    .to_string()
            }
            RiskLevel::Low => "On track: Continue regular academic advising.".to_string(),
        };

        Ok(RiskPrediction {
            model: RiskModelKind::ProgramDelay,
            probability,
            flagged,
            risk_level,
            contributing_factors: factors,
            recommendation,
            estimated_delay_semesters: Some(delay),
        })
    }
}

/// The three predictors the fusion scorer consults for every student.
pub struct PredictorSet {
    pub dropout: Box<dyn RiskPredictor>,
    pub course_failure: Box<dyn RiskPredictor>,
    pub program_delay: Box<dyn RiskPredictor>,
}

impl PredictorSet {
    /// Loads artifacts from `config.artifact_dir` when set, otherwise uses built-in coefficients.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let classifier = |kind: RiskModelKind, bands: ProbabilityBands| -> Result<Classifier> {
            let model = match &config.artifact_dir {
                Some(dir) => LogisticModel::load(&dir.join(format!("{}.json", kind.name())), kind)?,
                None => {
                    debug!(model = kind.name(), "using built-in coefficients");
                    LogisticModel::builtin(kind)
                }
            };
            Ok(Classifier::new(kind, model, bands, config.decision_threshold))
        };

        Ok(Self {
            dropout: Box::new(DropoutPredictor::new(classifier(
                RiskModelKind::Dropout,
                config.dropout,
            )?)),
            course_failure: Box::new(CourseFailurePredictor::new(classifier(
                RiskModelKind::CourseFailure,
                config.course_failure,
            )?)),
            program_delay: Box::new(ProgramDelayPredictor::new(classifier(
                RiskModelKind::ProgramDelay,
                config.program_delay,
            )?)),
        })
    }
}
