use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Everything the scoring core reads that an institution may want to tune.
///
/// `ScoringConfig::default()` carries the institutional thresholds in force today.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub policy: PolicyConfig,
    pub fusion: FusionConfig,
    pub models: ModelConfig,
    pub units: UnitConfig,
}

/// Risk contributions for a rule with two violation tiers and two warning tiers.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TierScores {
    pub severe: f64,
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
}

/// A rule breached when the observed value falls below a floor.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FloorRule {
    pub severe_below: f64,
    pub minimum: f64,
    pub warning_below: f64,
    pub recommended: f64,
    pub scores: TierScores,
}

/// Risk contributions for a rule with one violation tier and two warning tiers.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LimitScores {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RepeatLimitRule {
    /// Repeats at or above this count breach the policy.
    pub discontinuation_at: u32,
    pub max_total: u32,
    pub pattern_from: u32,
    pub scores: LimitScores,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StudyDurationRule {
    pub normal_years: u32,
    pub maximum_years: u32,
    pub scores: LimitScores,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub attendance: FloorRule,
    pub pass_mark: FloorRule,
    pub repeats: RepeatLimitRule,
    pub gpa: FloorRule,
    pub duration: StudyDurationRule,
    /// Policy score reported for a record that triggers no rule at all.
    pub clean_record_score: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            attendance: FloorRule {
                severe_below: 60.0,
                minimum: 67.0,
                warning_below: 70.0,
                recommended: 75.0,
                scores: TierScores {
                    severe: 95.0,
                    critical: 90.0,
                    high: 70.0,
                    medium: 50.0,
                },
            },
            pass_mark: FloorRule {
                severe_below: 35.0,
                minimum: 40.0,
                warning_below: 45.0,
                recommended: 50.0,
                scores: TierScores {
                    severe: 85.0,
                    critical: 80.0,
                    high: 60.0,
                    medium: 45.0,
                },
            },
            repeats: RepeatLimitRule {
                discontinuation_at: 4,
                max_total: 3,
                pattern_from: 2,
                scores: LimitScores {
                    critical: 85.0,
                    high: 70.0,
                    medium: 55.0,
                },
            },
            gpa: FloorRule {
                severe_below: 1.5,
                minimum: 2.0,
                warning_below: 2.5,
                recommended: 3.0,
                scores: TierScores {
                    severe: 90.0,
                    critical: 75.0,
                    high: 55.0,
                    medium: 40.0,
                },
            },
            duration: StudyDurationRule {
                normal_years: 4,
                maximum_years: 6,
                scores: LimitScores {
                    critical: 80.0,
                    high: 65.0,
                    medium: 50.0,
                },
            },
            clean_record_score: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FusionWeights {
    pub dropout: f64,
    pub course_failure: f64,
    pub program_delay: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FusionConfig {
    pub weights: FusionWeights,
    pub critical_cutoff: f64,
    pub high_cutoff: f64,
    pub medium_cutoff: f64,
    /// Sub-model probability above which its follow-up actions are recommended.
    pub ml_trigger_probability: f64,
    pub max_violation_actions: usize,
    pub max_warning_actions: usize,
    pub max_recommendations: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            weights: FusionWeights {
                dropout: 0.40,
                course_failure: 0.35,
                program_delay: 0.25,
            },
            critical_cutoff: 70.0,
            high_cutoff: 50.0,
            medium_cutoff: 30.0,
            ml_trigger_probability: 0.5,
            max_violation_actions: 3,
            max_warning_actions: 2,
            max_recommendations: 8,
        }
    }
}

/// Probability cut points mapping a sub-model probability to HIGH/MEDIUM/LOW.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ProbabilityBands {
    pub high: f64,
    pub medium: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory holding `<model>.json` artifacts. Built-in coefficients are used when unset.
    pub artifact_dir: Option<PathBuf>,
    pub decision_threshold: f64,
    pub dropout: ProbabilityBands,
    pub course_failure: ProbabilityBands,
    pub program_delay: ProbabilityBands,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            artifact_dir: None,
            decision_threshold: 0.5,
            dropout: ProbabilityBands {
                high: 0.70,
                medium: 0.40,
            },
            course_failure: ProbabilityBands {
                high: 0.65,
                medium: 0.35,
            },
            program_delay: ProbabilityBands {
                high: 0.70,
                medium: 0.40,
            },
        }
    }
}

/// How a raw rate column is expressed by its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateScale {
    Fraction,
    Percent,
}

impl RateScale {
    pub fn to_percent(self, value: f64) -> f64 {
        match self {
            RateScale::Fraction => value * 100.0,
            RateScale::Percent => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct UnitConfig {
    pub attendance_rate: RateScale,
    pub assignment_completion_rate: RateScale,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            attendance_rate: RateScale::Percent,
            assignment_completion_rate: RateScale::Fraction,
        }
    }
}

impl ScoringConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;

        let config: ScoringConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?;

        let config: ScoringConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let policy = &self.policy;
        for (name, rule) in [
            ("attendance", &policy.attendance),
            ("pass_mark", &policy.pass_mark),
            ("gpa", &policy.gpa),
        ] {
            if !(rule.severe_below <= rule.minimum
                && rule.minimum <= rule.warning_below
                && rule.warning_below <= rule.recommended)
            {
                anyhow::bail!(
                    "policy.{name}: thresholds must satisfy severe_below <= minimum <= warning_below <= recommended"
                );
            }
        }

        let repeats = &policy.repeats;
        if !(repeats.pattern_from <= repeats.max_total
            && repeats.max_total < repeats.discontinuation_at)
        {
            anyhow::bail!(
                "policy.repeats: thresholds must satisfy pattern_from <= max_total < discontinuation_at"
            );
        }

        if policy.duration.normal_years == 0
            || policy.duration.normal_years >= policy.duration.maximum_years
        {
            anyhow::bail!("policy.duration: normal_years must be positive and below maximum_years");
        }

        let fusion = &self.fusion;
        let weights = [
            fusion.weights.dropout,
            fusion.weights.course_failure,
            fusion.weights.program_delay,
        ];
        if weights.iter().any(|w| *w < 0.0) {
            anyhow::bail!("fusion.weights: weights must be non-negative");
        }
        let total: f64 = weights.iter().sum();
        if (total - 1.0).abs() > 1e-6 {
            anyhow::bail!("fusion.weights: weights must sum to 1.0, got {total}");
        }
        if !(fusion.critical_cutoff > fusion.high_cutoff
            && fusion.high_cutoff > fusion.medium_cutoff)
        {
            anyhow::bail!("fusion: cutoffs must be strictly decreasing from critical to medium");
        }
        if fusion.max_recommendations == 0 {
            anyhow::bail!("fusion.max_recommendations must be at least 1");
        }

        for (name, bands) in [
            ("dropout", &self.models.dropout),
            ("course_failure", &self.models.course_failure),
            ("program_delay", &self.models.program_delay),
        ] {
            if !(0.0..=1.0).contains(&bands.medium)
                || !(0.0..=1.0).contains(&bands.high)
                || bands.medium > bands.high
            {
                anyhow::bail!("models.{name}: bands must lie in [0, 1] with medium <= high");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        ScoringConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_yaml_keeps_defaults_for_missing_sections() {
        let yaml = r#"
fusion:
  weights:
    dropout: 0.5
    course_failure: 0.3
    program_delay: 0.2
units:
  assignment_completion_rate: percent
"#;

        let config = ScoringConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.fusion.weights.dropout, 0.5);
        assert_eq!(config.fusion.max_recommendations, 8);
        assert_eq!(config.units.assignment_completion_rate, RateScale::Percent);
        assert_eq!(config.units.attendance_rate, RateScale::Percent);
        assert_eq!(config.policy, PolicyConfig::default());
    }

    #[test]
    fn rejects_weights_that_do_not_sum_to_one() {
        let yaml = r#"
fusion:
  weights:
    dropout: 0.5
    course_failure: 0.5
    program_delay: 0.5
"#;

        let err = ScoringConfig::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn rejects_inverted_attendance_thresholds() {
        let mut config = ScoringConfig::default();
        config.policy.attendance.minimum = 80.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rate_scale_converts_fractions() {
        assert_eq!(RateScale::Fraction.to_percent(0.68), 68.0);
        assert_eq!(RateScale::Percent.to_percent(68.0), 68.0);
    }
}
