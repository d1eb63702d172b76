//! Institutional policy checks.
//!
//! Each rule looks at one aspect of a student record and reports at most one finding:
//! a violation when the policy is breached, a warning when the student is approaching
//! the limit. The engine aggregates findings into a [`PolicyEvaluation`].

use crate::config::{FloorRule, PolicyConfig, RepeatLimitRule, StudyDurationRule};
use crate::models::{
    FindingKind, PolicyEvaluation, PolicyFinding, PolicyKind, RiskLevel, Severity,
    StudentFeatures,
};

pub trait PolicyRule: Send + Sync {
    fn kind(&self) -> PolicyKind;
    fn evaluate(&self, student: &StudentFeatures) -> Option<PolicyFinding>;
}

/// Consequence and action wording for one tier of a rule.
struct TierText {
    consequence: &'static str,
    action: &'static str,
}

/// Wording for the four tiers of a floor rule, most severe first.
struct FloorTexts {
    severe: TierText,
    critical: TierText,
    high: TierText,
    medium: TierText,
}

#[derive(Debug, Clone, Copy)]
enum Measure {
    Percent,
    GradePoints,
}

impl Measure {
    fn value(self, value: f64) -> String {
        match self {
            Measure::Percent => format!("{value:.1}%"),
            Measure::GradePoints => format!("{value:.2}"),
        }
    }

    fn threshold(self, value: f64, label: &str) -> String {
        match self {
            Measure::Percent => format!("{value}% {label}"),
            Measure::GradePoints => format!("{value:.1} {label}"),
        }
    }
}

const ATTENDANCE_TEXTS: FloorTexts = FloorTexts {
    severe: TierText {
        consequence: "Cannot sit for exam - automatic course failure",
        action: "Meet with student today",
    },
    critical: TierText {
        consequence: "Will not be allowed to sit for exam",
        action: "Improve attendance immediately",
    },
    high: TierText {
        consequence: "Dangerously close to exam ineligibility",
        action: "Monitor closely - approaching danger zone",
    },
    medium: TierText {
        consequence: "Attendance below the recommended level",
        action: "Attendance needs improvement",
    },
};

const PASS_MARK_TEXTS: FloorTexts = FloorTexts {
    severe: TierText {
        consequence: "Likely to fail course",
        action: "Arrange intensive tutoring and academic support",
    },
    critical: TierText {
        consequence: "Below pass mark - course failure imminent",
        action: "Academic intervention required",
    },
    high: TierText {
        consequence: "Borderline passing",
        action: "Additional support needed to ensure pass",
    },
    medium: TierText {
        consequence: "Performance below the recommended level",
        action: "Performance could be stronger",
    },
};

const GPA_TEXTS: FloorTexts = FloorTexts {
    severe: TierText {
        consequence: "Discontinuation highly likely",
        action: "Must meet with Dean - exit or significant improvement",
    },
    critical: TierText {
        consequence: "Academic probation - must improve next semester",
        action: "Academic support plan required",
    },
    high: TierText {
        consequence: "Below good standing threshold",
        action: "Academic support recommended",
    },
    medium: TierText {
        consequence: "Short of good academic standing",
        action: "Room for improvement",
    },
};

/// A rule breached when a measure drops below a floor: attendance, pass mark, GPA.
pub struct FloorPolicy {
    kind: PolicyKind,
    measure: Measure,
    thresholds: FloorRule,
    texts: &'static FloorTexts,
    observe: fn(&StudentFeatures) -> f64,
}

impl FloorPolicy {
    pub fn attendance(thresholds: FloorRule) -> Self {
        Self {
            kind: PolicyKind::Attendance,
            measure: Measure::Percent,
            thresholds,
            texts: &ATTENDANCE_TEXTS,
            observe: |s: &StudentFeatures| s.attendance_rate,
        }
    }

    pub fn pass_mark(thresholds: FloorRule) -> Self {
        Self {
            kind: PolicyKind::PassMark,
            measure: Measure::Percent,
            thresholds,
            texts: &PASS_MARK_TEXTS,
            observe: |s: &StudentFeatures| s.avg_assignment_score,
        }
    }

    pub fn academic_standing(thresholds: FloorRule) -> Self {
        Self {
            kind: PolicyKind::AcademicStanding,
            measure: Measure::GradePoints,
            thresholds,
            texts: &GPA_TEXTS,
            observe: |s: &StudentFeatures| s.avg_grade_points,
        }
    }
}

impl PolicyRule for FloorPolicy {
    fn kind(&self) -> PolicyKind {
        self.kind
    }

    fn evaluate(&self, student: &StudentFeatures) -> Option<PolicyFinding> {
        let observed = (self.observe)(student);
        let t = &self.thresholds;
        let minimum = self.measure.threshold(t.minimum, "minimum");
        let recommended = self.measure.threshold(t.recommended, "recommended");

        let (kind, severity, text, threshold, priority, score) = if observed < t.severe_below {
            (FindingKind::Violation, Severity::Critical, &self.texts.severe, minimum, 1, t.scores.severe)
        } else if observed < t.minimum {
            (FindingKind::Violation, Severity::Critical, &self.texts.critical, minimum, 1, t.scores.critical)
        } else if observed < t.warning_below {
            (FindingKind::Warning, Severity::High, &self.texts.high, minimum, 2, t.scores.high)
        } else if observed < t.recommended {
            (FindingKind::Warning, Severity::Medium, &self.texts.medium, recommended, 3, t.scores.medium)
        } else {
            return None;
        };

        Some(PolicyFinding {
            policy: self.kind,
            kind,
            severity,
            observed,
            value: self.measure.value(observed),
            threshold,
            consequence: text.consequence.to_string(),
            action: text.action.to_string(),
            priority,
            risk_contribution: score,
        })
    }
}

pub struct RepeatLimitPolicy {
    thresholds: RepeatLimitRule,
}

impl RepeatLimitPolicy {
    pub fn new(thresholds: RepeatLimitRule) -> Self {
        Self { thresholds }
    }
}

impl PolicyRule for RepeatLimitPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::CourseRepetition
    }

    fn evaluate(&self, student: &StudentFeatures) -> Option<PolicyFinding> {
        let repeats = student.repeat_courses;
        let t = &self.thresholds;

        let (kind, severity, consequence, action, priority, score) = if repeats >= t.discontinuation_at {
            (
                FindingKind::Violation,
                Severity::Critical,
                "Academic probation / discontinuation risk",
                "Academic counseling and intervention required",
                1,
                t.scores.critical,
            )
        } else if repeats >= t.max_total {
            (
                FindingKind::Warning,
                Severity::High,
                "At maximum limit - no more failures allowed",
                "Cannot fail any more courses",
                2,
                t.scores.high,
            )
        } else if repeats >= t.pattern_from {
            (
                FindingKind::Warning,
                Severity::Medium,
                "Pattern of difficulty emerging",
                "Academic support recommended",
                3,
                t.scores.medium,
            )
        } else {
            return None;
        };

        Some(PolicyFinding {
            policy: PolicyKind::CourseRepetition,
            kind,
            severity,
            observed: f64::from(repeats),
            value: format!("{repeats} courses repeated"),
            threshold: format!("Maximum {} total", t.max_total),
            consequence: consequence.to_string(),
            action: action.to_string(),
            priority,
            risk_contribution: score,
        })
    }
}

pub struct StudyDurationPolicy {
    thresholds: StudyDurationRule,
}

impl StudyDurationPolicy {
    pub fn new(thresholds: StudyDurationRule) -> Self {
        Self { thresholds }
    }
}

impl PolicyRule for StudyDurationPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::StudyDuration
    }

    fn evaluate(&self, student: &StudentFeatures) -> Option<PolicyFinding> {
        let year = student.year_of_study;
        let t = &self.thresholds;
        let maximum = format!("{} years maximum", t.maximum_years);

        let (kind, severity, consequence, action, threshold, priority, score) = if year > t.maximum_years {
            (
                FindingKind::Violation,
                Severity::Critical,
                "Exceeded maximum duration - must complete or exit".to_string(),
                "Completion plan required immediately",
                maximum,
                1,
                t.scores.critical,
            )
        } else if year == t.maximum_years {
            (
                FindingKind::Warning,
                Severity::High,
                "Last year allowed - must complete this year".to_string(),
                "Ensure all requirements completed",
                maximum,
                2,
                t.scores.high,
            )
        } else if year > t.normal_years {
            let delayed = year - t.normal_years;
            (
                FindingKind::Warning,
                Severity::Medium,
                format!("{delayed} year(s) delayed"),
                "Review academic plan for timely completion",
                format!("{} years normal", t.normal_years),
                3,
                t.scores.medium,
            )
        } else {
            return None;
        };

        Some(PolicyFinding {
            policy: PolicyKind::StudyDuration,
            kind,
            severity,
            observed: f64::from(year),
            value: format!("Year {year}"),
            threshold,
            consequence,
            action: action.to_string(),
            priority,
            risk_contribution: score,
        })
    }
}

/// Evaluates a student against every configured rule. Holds no per-call state.
pub struct PolicyEngine {
    rules: Vec<Box<dyn PolicyRule>>,
    clean_record_score: f64,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(&PolicyConfig::default())
    }
}

impl PolicyEngine {
    pub fn new(config: &PolicyConfig) -> Self {
        let rules: Vec<Box<dyn PolicyRule>> = vec![
            Box::new(FloorPolicy::attendance(config.attendance.clone())),
            Box::new(FloorPolicy::pass_mark(config.pass_mark.clone())),
            Box::new(RepeatLimitPolicy::new(config.repeats.clone())),
            Box::new(FloorPolicy::academic_standing(config.gpa.clone())),
            Box::new(StudyDurationPolicy::new(config.duration.clone())),
        ];

        Self {
            rules,
            clean_record_score: config.clean_record_score,
        }
    }

    pub fn rules(&self) -> impl Iterator<Item = PolicyKind> + '_ {
        self.rules.iter().map(|rule| rule.kind())
    }

    pub fn evaluate(&self, student: &StudentFeatures) -> PolicyEvaluation {
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        for finding in self.rules.iter().filter_map(|rule| rule.evaluate(student)) {
            match finding.kind {
                FindingKind::Violation => violations.push(finding),
                FindingKind::Warning => warnings.push(finding),
            }
        }

        let triggered_max = violations
            .iter()
            .chain(warnings.iter())
            .map(|f| f.risk_contribution)
            .fold(None, |acc: Option<f64>, score| {
                Some(acc.map_or(score, |best| best.max(score)))
            });

        let overall_policy_risk = if !violations.is_empty() {
            if violations.iter().any(|v| v.severity == Severity::Critical) {
                RiskLevel::Critical
            } else {
                RiskLevel::High
            }
        } else if !warnings.is_empty() {
            if warnings.iter().any(|w| w.severity == Severity::High) {
                RiskLevel::High
            } else {
                RiskLevel::Medium
            }
        } else {
            RiskLevel::Low
        };

        let policy_risk_score = triggered_max.unwrap_or(self.clean_record_score);

        // Stable sort keeps rule order within a priority class.
        violations.sort_by_key(|f| f.priority);
        warnings.sort_by_key(|f| f.priority);

        let requires_immediate_action = violations.iter().any(|v| v.priority == 1);

        PolicyEvaluation {
            policy_compliant: violations.is_empty(),
            total_violations: violations.len(),
            total_warnings: warnings.len(),
            most_critical_issue: violations.first().cloned(),
            violations,
            warnings,
            overall_policy_risk,
            policy_risk_score,
            requires_immediate_action,
        }
    }
}
