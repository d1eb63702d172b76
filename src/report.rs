use std::fmt::Write;

use crate::models::{BatchOutcome, PolicyKind};
use crate::risk;

pub fn build_report(
    scope: Option<&str>,
    outcome: &BatchOutcome,
    rules: impl Iterator<Item = PolicyKind>,
) -> String {
    let results = &outcome.results;
    let stats = risk::dashboard_stats(results);
    let breakdown = risk::policy_breakdown(rules, results);

    let mut output = String::new();
    let scope_label = scope.unwrap_or("all students");

    let _ = writeln!(output, "# Student Risk Report");
    let _ = writeln!(
        output,
        "Generated for {} at {} (run {})",
        scope_label,
        outcome.generated_at.format("%Y-%m-%d %H:%M UTC"),
        outcome.run_id
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Mix");

    if results.is_empty() {
        let _ = writeln!(output, "No students scored in this run.");
    } else {
        let _ = writeln!(output, "- Critical: {}", stats.critical_risk);
        let _ = writeln!(output, "- High: {}", stats.high_risk);
        let _ = writeln!(output, "- Medium: {}", stats.medium_risk);
        let _ = writeln!(output, "- Low: {}", stats.low_risk);
        let _ = writeln!(
            output,
            "Average risk score {:.2} across {} students; {} need intervention.",
            stats.avg_risk_score, stats.total_students, stats.students_needing_intervention
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Risk Students");

    if results.is_empty() {
        let _ = writeln!(output, "No students scored in this run.");
    } else {
        for result in results.iter().take(10) {
            let _ = writeln!(
                output,
                "- Student {}: {} (score {:.2}, priority {}, ML {:.2}, policy {:.0})",
                result.student_id,
                result.overall_risk_level,
                result.overall_risk_score,
                result.priority,
                result.ml_risk_score,
                result.policy_risk_score
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Policy Breakdown");
    for entry in &breakdown {
        let _ = writeln!(
            output,
            "- {}: {} violations, {} warnings",
            entry.policy, entry.violations, entry.warnings
        );
    }

    let urgent: Vec<_> = results
        .iter()
        .filter(|r| r.requires_immediate_action)
        .collect();
    let _ = writeln!(output);
    let _ = writeln!(output, "## Immediate Action Required");

    if urgent.is_empty() {
        let _ = writeln!(output, "No students require immediate action.");
    } else {
        for result in urgent.iter().take(10) {
            if let Some(issue) = &result.policy_check.most_critical_issue {
                let _ = writeln!(
                    output,
                    "- Student {}: {} at {} ({})",
                    result.student_id, issue.policy, issue.value, issue.consequence
                );
            }
        }
    }

    if !outcome.failures.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Unscored Students");
        for failure in &outcome.failures {
            let _ = writeln!(output, "- Student {}: {}", failure.student_id, failure.error);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScoringFailure;
    use crate::risk::tests::{scorer, student};

    #[test]
    fn report_lists_urgent_students_and_breakdown() {
        let mut failing = student(2);
        failing.attendance_rate = 52.0;

        let scorer = scorer(0.1, 0.1, 0.1);
        let mut outcome = scorer.score_batch(&[student(1), failing]);
        outcome.failures.push(ScoringFailure {
            student_id: 3,
            error: "missing required field year_of_study".to_string(),
        });

        let report = build_report(Some("school 4"), &outcome, scorer.policy_engine().rules());

        assert!(report.starts_with("# Student Risk Report\nGenerated for school 4"));
        assert!(report.contains("- Critical: 1"));
        assert!(report.contains("- Student 2: CRITICAL (score 95.00, priority 1"));
        assert!(report.contains("- Attendance Requirement: 1 violations, 0 warnings"));
        assert!(report.contains(
            "- Student 2: Attendance Requirement at 52.0% (Cannot sit for exam - automatic course failure)"
        ));
        assert!(report.contains("## Unscored Students\n- Student 3: missing required field year_of_study"));
    }

    #[test]
    fn empty_run_report() {
        let scorer = scorer(0.1, 0.1, 0.1);
        let outcome = scorer.score_batch(&[]);
        let report = build_report(None, &outcome, scorer.policy_engine().rules());

        assert!(report.contains("Generated for all students"));
        assert!(report.contains("No students require immediate action."));
        assert!(!report.contains("## Unscored Students"));
    }
}
