use std::collections::HashSet;

use chrono::Utc;
use rayon::prelude::*;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{FusionConfig, ScoringConfig};
use crate::error::Result;
use crate::models::{
    BatchOutcome, ComprehensiveRiskResult, DashboardStats, InterventionUrgency, PolicyBreakdown,
    PolicyEvaluation, PolicyKind, RiskLevel, RiskPrediction, SchoolRiskSummary, ScoringFailure,
    StudentFeatures,
};
use crate::policy::PolicyEngine;
use crate::predictors::PredictorSet;

const DROPOUT_ACTIONS: [&str; 2] = [
    "Schedule immediate one-on-one meeting",
    "Connect with academic advisor",
];
const COURSE_FAILURE_ACTIONS: [&str; 2] = [
    "Arrange tutoring or peer support",
    "Review course performance weekly",
];
const PROGRAM_DELAY_ACTIONS: [&str; 2] = [
    "Review academic plan and timeline",
    "Ensure prerequisite courses completed",
];

/// Fuses the three sub-model predictions with the policy verdict into one result per student.
pub struct ComprehensiveScorer {
    predictors: PredictorSet,
    policy: PolicyEngine,
    fusion: FusionConfig,
}

impl ComprehensiveScorer {
    pub fn new(predictors: PredictorSet, policy: PolicyEngine, fusion: FusionConfig) -> Self {
        Self {
            predictors,
            policy,
            fusion,
        }
    }

    pub fn from_config(config: &ScoringConfig) -> Result<Self> {
        Ok(Self::new(
            PredictorSet::from_config(&config.models)?,
            PolicyEngine::new(&config.policy),
            config.fusion.clone(),
        ))
    }

    pub fn policy_engine(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Weighted sub-model probabilities on a 0-100 scale.
    pub fn ml_risk_score(&self, dropout: f64, course_failure: f64, program_delay: f64) -> f64 {
        let w = &self.fusion.weights;
        (dropout * w.dropout + course_failure * w.course_failure + program_delay * w.program_delay)
            * 100.0
    }

    /// Level and priority for a fused score. A CRITICAL policy verdict wins outright.
    pub fn classify(&self, final_score: f64, policy_risk: RiskLevel) -> (RiskLevel, u8) {
        let f = &self.fusion;
        if policy_risk == RiskLevel::Critical || final_score >= f.critical_cutoff {
            (RiskLevel::Critical, 1)
        } else if final_score >= f.high_cutoff || policy_risk == RiskLevel::High {
            (RiskLevel::High, 2)
        } else if final_score >= f.medium_cutoff || policy_risk == RiskLevel::Medium {
            (RiskLevel::Medium, 3)
        } else {
            (RiskLevel::Low, 4)
        }
    }

    pub fn score(&self, student: &StudentFeatures) -> Result<ComprehensiveRiskResult> {
        let dropout = self.predictors.dropout.predict(student)?;
        let course_failure = self.predictors.course_failure.predict(student)?;
        let program_delay = self.predictors.program_delay.predict(student)?;

        let policy_check = self.policy.evaluate(student);

        let ml_risk_score = self.ml_risk_score(
            dropout.probability,
            course_failure.probability,
            program_delay.probability,
        );
        let policy_risk_score = policy_check.policy_risk_score;
        let overall_risk_score = ml_risk_score.max(policy_risk_score);

        let (overall_risk_level, priority) =
            self.classify(overall_risk_score, policy_check.overall_policy_risk);

        let all_risk_factors =
            merge_risk_factors(&[&dropout, &course_failure, &program_delay], &policy_check);
        let recommended_actions =
            self.recommendations(&dropout, &course_failure, &program_delay, &policy_check);

        debug!(
            student_id = student.student_id,
            ml_risk_score,
            policy_risk_score,
            level = %overall_risk_level,
            "scored student"
        );

        Ok(ComprehensiveRiskResult {
            student_id: student.student_id,
            overall_risk_score,
            overall_risk_level,
            priority,
            ml_risk_score,
            policy_risk_score,
            requires_immediate_action: policy_check.requires_immediate_action,
            dropout_risk: dropout,
            course_failure_risk: course_failure,
            program_delay_risk: program_delay,
            policy_check,
            all_risk_factors,
            recommended_actions,
            intervention_urgency: InterventionUrgency::from_priority(priority),
        })
    }

    /// Policy violations first, then model-driven follow-ups, then policy warnings.
    fn recommendations(
        &self,
        dropout: &RiskPrediction,
        course_failure: &RiskPrediction,
        program_delay: &RiskPrediction,
        policy: &PolicyEvaluation,
    ) -> Vec<String> {
        let f = &self.fusion;
        let mut actions: Vec<String> = policy
            .violations
            .iter()
            .take(f.max_violation_actions)
            .map(|v| format!("URGENT: {}", v.action))
            .collect();

        for (prediction, follow_ups) in [
            (dropout, DROPOUT_ACTIONS),
            (course_failure, COURSE_FAILURE_ACTIONS),
            (program_delay, PROGRAM_DELAY_ACTIONS),
        ] {
            if prediction.probability > f.ml_trigger_probability {
                actions.extend(follow_ups.iter().map(|a| a.to_string()));
            }
        }

        actions.extend(
            policy
                .warnings
                .iter()
                .take(f.max_warning_actions)
                .map(|w| format!("WARNING: {}", w.action)),
        );

        actions.truncate(f.max_recommendations);
        actions
    }

    /// Scores students in parallel. A failure for one student is recorded and skipped.
    pub fn score_batch(&self, students: &[StudentFeatures]) -> BatchOutcome {
        let scored: Vec<(i64, Result<ComprehensiveRiskResult>)> = students
            .par_iter()
            .map(|student| (student.student_id, self.score(student)))
            .collect();

        let mut results = Vec::with_capacity(scored.len());
        let mut failures = Vec::new();
        for (student_id, outcome) in scored {
            match outcome {
                Ok(result) => results.push(result),
                Err(err) => {
                    warn!(student_id, error = %err, "could not score student");
                    failures.push(ScoringFailure {
                        student_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        rank(&mut results);
        info!(
            scored = results.len(),
            failed = failures.len(),
            "batch scoring complete"
        );

        BatchOutcome {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            results,
            failures,
        }
    }
}

/// Union of sub-model factors plus one `POLICY:` entry per violation, first occurrence kept.
pub fn merge_risk_factors(
    predictions: &[&RiskPrediction],
    policy: &PolicyEvaluation,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut factors = Vec::new();

    let policy_factors = policy
        .violations
        .iter()
        .map(|v| format!("POLICY: {}", v.policy));

    for factor in predictions
        .iter()
        .flat_map(|p| p.contributing_factors.iter().cloned())
        .chain(policy_factors)
    {
        if seen.insert(factor.clone()) {
            factors.push(factor);
        }
    }

    factors
}

/// Most urgent first; equal scores fall back to student id.
pub fn rank(results: &mut [ComprehensiveRiskResult]) {
    results.sort_by(|a, b| {
        b.overall_risk_score
            .total_cmp(&a.overall_risk_score)
            .then(a.student_id.cmp(&b.student_id))
    });
}

pub fn school_summary(
    school_id: i64,
    mut results: Vec<ComprehensiveRiskResult>,
) -> SchoolRiskSummary {
    rank(&mut results);
    SchoolRiskSummary {
        school_id,
        total_students: results.len(),
        high_risk_count: results
            .iter()
            .filter(|r| r.overall_risk_level.needs_intervention())
            .count(),
        students: results,
    }
}

pub fn dashboard_stats(results: &[ComprehensiveRiskResult]) -> DashboardStats {
    let count = |level: RiskLevel| {
        results
            .iter()
            .filter(|r| r.overall_risk_level == level)
            .count()
    };

    let avg_risk_score = if results.is_empty() {
        0.0
    } else {
        let total: f64 = results.iter().map(|r| r.overall_risk_score).sum();
        round2(total / results.len() as f64)
    };

    DashboardStats {
        total_students: results.len(),
        critical_risk: count(RiskLevel::Critical),
        high_risk: count(RiskLevel::High),
        medium_risk: count(RiskLevel::Medium),
        low_risk: count(RiskLevel::Low),
        avg_risk_score,
        students_needing_intervention: results
            .iter()
            .filter(|r| r.overall_risk_level.needs_intervention())
            .count(),
    }
}

/// Violation and warning counts per rule, in rule order.
pub fn policy_breakdown(
    rules: impl Iterator<Item = PolicyKind>,
    results: &[ComprehensiveRiskResult],
) -> Vec<PolicyBreakdown> {
    rules
        .map(|policy| PolicyBreakdown {
            policy,
            violations: results
                .iter()
                .filter(|r| r.policy_check.violations.iter().any(|v| v.policy == policy))
                .count(),
            warnings: results
                .iter()
                .filter(|r| r.policy_check.warnings.iter().any(|w| w.policy == policy))
                .count(),
        })
        .collect()
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ScoringError;
    use crate::models::RiskModelKind;
    use crate::predictors::RiskPredictor;

    pub(crate) struct FixedPredictor {
        pub kind: RiskModelKind,
        pub probability: f64,
        pub factors: Vec<String>,
        pub fail_for: Option<i64>,
    }

    impl RiskPredictor for FixedPredictor {
        fn kind(&self) -> RiskModelKind {
            self.kind
        }

        fn predict(&self, student: &StudentFeatures) -> Result<RiskPrediction> {
            if self.fail_for == Some(student.student_id) {
                return Err(ScoringError::Predictor {
                    model: self.kind.name().to_string(),
                    reason: "model unavailable".to_string(),
                });
            }
            Ok(RiskPrediction {
                model: self.kind,
                probability: self.probability,
                flagged: self.probability >= 0.5,
                risk_level: RiskLevel::Low,
                contributing_factors: self.factors.clone(),
                recommendation: String::new(),
                estimated_delay_semesters: None,
            })
        }
    }

    fn fixed(kind: RiskModelKind, probability: f64) -> Box<dyn RiskPredictor> {
        Box::new(FixedPredictor {
            kind,
            probability,
            factors: Vec::new(),
            fail_for: None,
        })
    }

    pub(crate) fn scorer(dropout: f64, failure: f64, delay: f64) -> ComprehensiveScorer {
        ComprehensiveScorer::new(
            PredictorSet {
                dropout: fixed(RiskModelKind::Dropout, dropout),
                course_failure: fixed(RiskModelKind::CourseFailure, failure),
                program_delay: fixed(RiskModelKind::ProgramDelay, delay),
            },
            PolicyEngine::default(),
            FusionConfig::default(),
        )
    }

    pub(crate) fn student(id: i64) -> StudentFeatures {
        StudentFeatures {
            student_id: id,
            school_id: Some(1),
            attendance_rate: 90.0,
            avg_assignment_score: 85.0,
            assignment_completion_rate: 90.0,
            avg_grade_points: 3.8,
            avg_login_count: 6.0,
            engagement_score: 85.0,
            time_spent_minutes: 130.0,
            consecutive_absences: 0.0,
            repeat_courses: 0,
            year_of_study: 2,
            total_enrollments: 6,
            forum_posts: 8.0,
            late_submissions: 1.0,
            help_requests: 0.0,
        }
    }

    #[test]
    fn policy_critical_overrides_low_model_scores() {
        let mut s = student(1);
        s.attendance_rate = 50.0;
        s.avg_assignment_score = 80.0;
        s.avg_grade_points = 3.5;

        let result = scorer(0.1, 0.1, 0.1).score(&s).unwrap();
        assert!((result.ml_risk_score - 10.0).abs() < 1e-9);
        assert_eq!(result.policy_risk_score, 95.0);
        assert_eq!(result.overall_risk_score, 95.0);
        assert_eq!(result.overall_risk_level, RiskLevel::Critical);
        assert_eq!(result.priority, 1);
        assert_eq!(result.intervention_urgency, InterventionUrgency::Immediate);
        assert!(result.requires_immediate_action);
    }

    #[test]
    fn clean_student_is_low_risk() {
        let result = scorer(0.05, 0.05, 0.05).score(&student(2)).unwrap();

        assert!((result.ml_risk_score - 5.0).abs() < 1e-9);
        assert_eq!(result.policy_risk_score, 10.0);
        assert_eq!(result.overall_risk_score, 10.0);
        assert_eq!(result.overall_risk_level, RiskLevel::Low);
        assert_eq!(result.priority, 4);
        assert_eq!(result.intervention_urgency, InterventionUrgency::Routine);
        assert!(result.recommended_actions.is_empty());
    }

    #[test]
    fn level_cutoffs() {
        let s = scorer(0.0, 0.0, 0.0);
        assert_eq!(s.classify(70.0, RiskLevel::Low), (RiskLevel::Critical, 1));
        assert_eq!(s.classify(69.99, RiskLevel::Low), (RiskLevel::High, 2));
        assert_eq!(s.classify(50.0, RiskLevel::Low), (RiskLevel::High, 2));
        assert_eq!(s.classify(30.0, RiskLevel::Low), (RiskLevel::Medium, 3));
        assert_eq!(s.classify(29.9, RiskLevel::Low), (RiskLevel::Low, 4));
        assert_eq!(s.classify(10.0, RiskLevel::High), (RiskLevel::High, 2));
        assert_eq!(s.classify(10.0, RiskLevel::Medium), (RiskLevel::Medium, 3));
        assert_eq!(s.classify(0.0, RiskLevel::Critical), (RiskLevel::Critical, 1));
        assert_eq!(s.classify(55.0, RiskLevel::Medium), (RiskLevel::High, 2));
    }

    #[test]
    fn model_score_can_exceed_policy_score() {
        let result = scorer(0.9, 0.8, 0.7).score(&student(3)).unwrap();

        let expected = (0.9 * 0.40 + 0.8 * 0.35 + 0.7 * 0.25) * 100.0;
        assert!((result.ml_risk_score - expected).abs() < 1e-9);
        assert_eq!(result.overall_risk_score, result.ml_risk_score);
        assert_eq!(result.overall_risk_level, RiskLevel::Critical);
        assert_eq!(
            result.recommended_actions,
            vec![
                "Schedule immediate one-on-one meeting",
                "Connect with academic advisor",
                "Arrange tutoring or peer support",
                "Review course performance weekly",
                "Review academic plan and timeline",
                "Ensure prerequisite courses completed",
            ]
        );
    }

    #[test]
    fn policy_warning_lifts_level_to_high() {
        let mut s = student(4);
        s.attendance_rate = 68.0;

        let result = scorer(0.05, 0.05, 0.05).score(&s).unwrap();
        assert_eq!(result.overall_risk_score, 70.0);
        assert_eq!(result.overall_risk_level, RiskLevel::Critical);

        let mut s = student(5);
        s.avg_grade_points = 2.3;
        let result = scorer(0.05, 0.05, 0.05).score(&s).unwrap();
        assert_eq!(result.overall_risk_score, 55.0);
        assert_eq!(result.overall_risk_level, RiskLevel::High);
        assert_eq!(result.intervention_urgency, InterventionUrgency::High);
        assert_eq!(
            result.recommended_actions,
            vec!["WARNING: Academic support recommended"]
        );
    }

    #[test]
    fn recommendations_are_ordered_and_capped() {
        let mut s = student(6);
        s.attendance_rate = 50.0;
        s.avg_assignment_score = 30.0;
        s.repeat_courses = 5;
        s.avg_grade_points = 1.0;
        s.year_of_study = 6;

        let result = scorer(0.9, 0.9, 0.9).score(&s).unwrap();
        assert_eq!(result.policy_check.total_violations, 4);
        assert_eq!(result.recommended_actions.len(), 8);
        assert_eq!(
            &result.recommended_actions[..3],
            &[
                "URGENT: Meet with student today".to_string(),
                "URGENT: Arrange intensive tutoring and academic support".to_string(),
                "URGENT: Academic counseling and intervention required".to_string(),
            ]
        );
        assert_eq!(result.recommended_actions[3], DROPOUT_ACTIONS[0]);
        assert_eq!(result.recommended_actions[7], PROGRAM_DELAY_ACTIONS[0]);
    }

    #[test]
    fn risk_factors_are_deduplicated() {
        let shared = "Low Assignment Completion (55.0%)".to_string();
        let scorer = ComprehensiveScorer::new(
            PredictorSet {
                dropout: Box::new(FixedPredictor {
                    kind: RiskModelKind::Dropout,
                    probability: 0.2,
                    factors: vec![shared.clone(), "Low Engagement (60.0)".to_string()],
                    fail_for: None,
                }),
                course_failure: fixed(RiskModelKind::CourseFailure, 0.2),
                program_delay: Box::new(FixedPredictor {
                    kind: RiskModelKind::ProgramDelay,
                    probability: 0.2,
                    factors: vec![shared.clone()],
                    fail_for: None,
                }),
            },
            PolicyEngine::default(),
            FusionConfig::default(),
        );

        let mut s = student(7);
        s.avg_grade_points = 1.9;
        let result = scorer.score(&s).unwrap();
        assert_eq!(
            result.all_risk_factors,
            vec![
                shared,
                "Low Engagement (60.0)".to_string(),
                "POLICY: Academic Standing (GPA)".to_string(),
            ]
        );
    }

    #[test]
    fn predictor_errors_propagate() {
        let scorer = ComprehensiveScorer::new(
            PredictorSet {
                dropout: fixed(RiskModelKind::Dropout, 0.2),
                course_failure: Box::new(FixedPredictor {
                    kind: RiskModelKind::CourseFailure,
                    probability: 0.2,
                    factors: Vec::new(),
                    fail_for: Some(8),
                }),
                program_delay: fixed(RiskModelKind::ProgramDelay, 0.2),
            },
            PolicyEngine::default(),
            FusionConfig::default(),
        );

        let err = scorer.score(&student(8)).unwrap_err();
        assert!(matches!(err, ScoringError::Predictor { .. }));

        let batch = scorer.score_batch(&[student(8), student(9), student(10)]);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].student_id, 8);
        assert_eq!(batch.results.len(), 2);
    }

    #[test]
    fn batch_results_are_ranked() {
        let mut risky = student(11);
        risky.avg_assignment_score = 42.0;
        let mut failing = student(12);
        failing.attendance_rate = 55.0;

        let batch = scorer(0.1, 0.1, 0.1).score_batch(&[student(10), risky, failing]);
        let order: Vec<i64> = batch.results.iter().map(|r| r.student_id).collect();
        assert_eq!(order, vec![12, 11, 10]);
        assert!(batch.failures.is_empty());
    }

    #[test]
    fn dashboard_counts_levels() {
        let mut risky = student(21);
        risky.avg_grade_points = 2.3;
        let mut failing = student(22);
        failing.attendance_rate = 55.0;

        let scorer = scorer(0.1, 0.1, 0.1);
        let batch = scorer.score_batch(&[student(20), risky, failing]);
        let stats = dashboard_stats(&batch.results);

        assert_eq!(stats.total_students, 3);
        assert_eq!(stats.critical_risk, 1);
        assert_eq!(stats.high_risk, 1);
        assert_eq!(stats.medium_risk, 0);
        assert_eq!(stats.low_risk, 1);
        assert_eq!(stats.students_needing_intervention, 2);
        assert_eq!(stats.avg_risk_score, round2((10.0 + 55.0 + 95.0) / 3.0));

        let summary = school_summary(1, batch.results.clone());
        assert_eq!(summary.high_risk_count, 2);
        assert_eq!(summary.students[0].student_id, 22);

        let breakdown = policy_breakdown(scorer.policy_engine().rules(), &batch.results);
        assert_eq!(breakdown.len(), 5);
        assert_eq!(breakdown[0].policy, PolicyKind::Attendance);
        assert_eq!(breakdown[0].violations, 1);
        assert_eq!(breakdown[3].warnings, 1);
    }

    #[test]
    fn empty_dashboard() {
        let stats = dashboard_stats(&[]);
        assert_eq!(stats.total_students, 0);
        assert_eq!(stats.avg_risk_score, 0.0);
    }
}
