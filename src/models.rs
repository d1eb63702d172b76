use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One student's per-period features, in canonical units (rates on a 0-100 scale).
///
/// Built by [`crate::features::FeatureMapper`], which validates every field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentFeatures {
    pub student_id: i64,
    pub school_id: Option<i64>,
    pub attendance_rate: f64,
    pub avg_assignment_score: f64,
    pub assignment_completion_rate: f64,
    pub avg_grade_points: f64,
    pub avg_login_count: f64,
    pub engagement_score: f64,
    pub time_spent_minutes: f64,
    pub consecutive_absences: f64,
    pub repeat_courses: u32,
    pub year_of_study: u32,
    pub total_enrollments: u32,
    pub forum_posts: f64,
    pub late_submissions: f64,
    pub help_requests: f64,
}

/// A student row as it arrives from Postgres or a CSV export, before mapping.
///
/// Numeric cells that do not parse are read as missing, so one bad cell only
/// affects its own student.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawStudentRecord {
    pub student_id: i64,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub school_id: Option<i64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub year_of_study: Option<i64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub total_enrollments: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub avg_grade_points: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub repeat_courses: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub avg_login_count: Option<f64>,
    #[serde(alias = "time_spent_minutes", deserialize_with = "csv::invalid_option")]
    pub avg_time_spent: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub assignment_completion_rate: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub avg_assignment_score: Option<f64>,
    #[serde(alias = "engagement_score", deserialize_with = "csv::invalid_option")]
    pub avg_engagement_score: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub attendance_rate: Option<f64>,
    #[serde(alias = "consecutive_absences", deserialize_with = "csv::invalid_option")]
    pub max_consecutive_absences: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub avg_consecutive_absences: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub forum_posts: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub late_submissions: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub help_requests: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
}

/// Ordered from least to most severe, so `max()` picks the worst level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    pub fn needs_intervention(&self) -> bool {
        matches!(self, RiskLevel::Critical | RiskLevel::High)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterventionUrgency {
    Immediate,
    High,
    Routine,
}

impl InterventionUrgency {
    pub fn from_priority(priority: u8) -> Self {
        match priority {
            1 => InterventionUrgency::Immediate,
            2 => InterventionUrgency::High,
            _ => InterventionUrgency::Routine,
        }
    }
}

/// The institutional rules a student is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyKind {
    #[serde(rename = "Attendance Requirement")]
    Attendance,
    #[serde(rename = "Pass Mark Requirement")]
    PassMark,
    #[serde(rename = "Course Repetition Limit")]
    CourseRepetition,
    #[serde(rename = "Academic Standing (GPA)")]
    AcademicStanding,
    #[serde(rename = "Maximum Study Duration")]
    StudyDuration,
}

impl PolicyKind {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyKind::Attendance => "Attendance Requirement",
            PolicyKind::PassMark => "Pass Mark Requirement",
            PolicyKind::CourseRepetition => "Course Repetition Limit",
            PolicyKind::AcademicStanding => "Academic Standing (GPA)",
            PolicyKind::StudyDuration => "Maximum Study Duration",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Violation,
    Warning,
}

/// A single rule outcome: a hard breach (violation) or an approaching-threshold warning.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyFinding {
    pub policy: PolicyKind,
    pub kind: FindingKind,
    pub severity: Severity,
    pub observed: f64,
    pub value: String,
    pub threshold: String,
    pub consequence: String,
    pub action: String,
    pub priority: u8,
    pub risk_contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyEvaluation {
    pub policy_compliant: bool,
    pub violations: Vec<PolicyFinding>,
    pub warnings: Vec<PolicyFinding>,
    pub overall_policy_risk: RiskLevel,
    pub policy_risk_score: f64,
    pub total_violations: usize,
    pub total_warnings: usize,
    pub most_critical_issue: Option<PolicyFinding>,
    pub requires_immediate_action: bool,
}

impl PolicyEvaluation {
    /// One-line, advisor-facing status of the evaluation.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if self.policy_compliant {
            parts.push("Student is compliant with all academic policies".to_string());
        } else {
            parts.push(format!(
                "{} POLICY VIOLATION(S) detected",
                self.total_violations
            ));
        }

        if self.requires_immediate_action {
            parts.push("IMMEDIATE ACTION REQUIRED".to_string());
        }

        if let Some(issue) = &self.most_critical_issue {
            parts.push(format!(
                "Most Critical: {} - {}",
                issue.policy, issue.consequence
            ));
        }

        parts.join(" | ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskModelKind {
    Dropout,
    CourseFailure,
    ProgramDelay,
}

impl RiskModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            RiskModelKind::Dropout => "dropout",
            RiskModelKind::CourseFailure => "course_failure",
            RiskModelKind::ProgramDelay => "program_delay",
        }
    }
}

/// Output of one sub-model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskPrediction {
    pub model: RiskModelKind,
    pub probability: f64,
    pub flagged: bool,
    pub risk_level: RiskLevel,
    pub contributing_factors: Vec<String>,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_delay_semesters: Option<f64>,
}

/// Final per-student verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComprehensiveRiskResult {
    pub student_id: i64,
    pub overall_risk_score: f64,
    pub overall_risk_level: RiskLevel,
    pub priority: u8,
    pub ml_risk_score: f64,
    pub policy_risk_score: f64,
    pub dropout_risk: RiskPrediction,
    pub course_failure_risk: RiskPrediction,
    pub program_delay_risk: RiskPrediction,
    pub policy_check: PolicyEvaluation,
    pub all_risk_factors: Vec<String>,
    pub recommended_actions: Vec<String>,
    pub intervention_urgency: InterventionUrgency,
    pub requires_immediate_action: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoringFailure {
    pub student_id: i64,
    pub error: String,
}

/// Results of scoring a batch of students in one run, ranked most urgent first.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub results: Vec<ComprehensiveRiskResult>,
    pub failures: Vec<ScoringFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchoolRiskSummary {
    pub school_id: i64,
    pub total_students: usize,
    pub high_risk_count: usize,
    pub students: Vec<ComprehensiveRiskResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_students: usize,
    pub critical_risk: usize,
    pub high_risk: usize,
    pub medium_risk: usize,
    pub low_risk: usize,
    pub avg_risk_score: f64,
    pub students_needing_intervention: usize,
}

#[derive(Debug, Clone)]
pub struct PolicyBreakdown {
    pub policy: PolicyKind,
    pub violations: usize,
    pub warnings: usize,
}
