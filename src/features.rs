//! Maps raw student rows onto the validated feature record the scorers consume.
//!
//! Rates are converted to a 0-100 scale according to [`UnitConfig`]; the scale is never
//! guessed from the data. Derived LMS features that a source does not carry are estimated
//! from related columns.

use std::path::Path;

use tracing::debug;

use crate::config::UnitConfig;
use crate::error::{Result, ScoringError};
use crate::models::{RawStudentRecord, ScoringFailure, StudentFeatures};

/// Column order of the vector fed to the sub-model classifiers.
pub const MODEL_FEATURES: [&str; 13] = [
    "attendance_rate",
    "engagement_score",
    "assignment_completion_rate",
    "avg_assignment_score",
    "avg_grade_points",
    "avg_login_count",
    "time_spent_minutes",
    "consecutive_absences",
    "repeat_courses",
    "forum_posts",
    "late_submissions",
    "help_requests",
    "total_enrollments",
];

pub const MAX_GRADE_POINTS: f64 = 4.0;

#[derive(Debug, Clone, Default)]
pub struct FeatureMapper {
    units: UnitConfig,
}

impl FeatureMapper {
    pub fn new(units: UnitConfig) -> Self {
        Self { units }
    }

    pub fn map(&self, raw: &RawStudentRecord) -> Result<StudentFeatures> {
        let attendance_rate = self.units.attendance_rate.to_percent(numeric(raw.attendance_rate));
        let assignment_completion_rate = self
            .units
            .assignment_completion_rate
            .to_percent(numeric(raw.assignment_completion_rate));
        let engagement_score = numeric(raw.avg_engagement_score);
        let avg_grade_points = numeric(raw.avg_grade_points);

        let consecutive_absences = numeric(
            finite(raw.max_consecutive_absences).or(finite(raw.avg_consecutive_absences)),
        );

        let forum_posts = finite(raw.forum_posts).unwrap_or((engagement_score / 10.0).trunc());
        let late_submissions = finite(raw.late_submissions)
            .unwrap_or(((1.0 - assignment_completion_rate / 100.0) * 10.0).trunc());
        let help_requests = finite(raw.help_requests)
            .unwrap_or(((MAX_GRADE_POINTS - avg_grade_points) * 3.0).trunc());

        let year_of_study = raw
            .year_of_study
            .ok_or(ScoringError::MissingField("year_of_study"))?;
        if year_of_study < 1 || year_of_study > i64::from(u32::MAX) {
            return Err(ScoringError::InvalidFeature {
                field: "year_of_study",
                value: year_of_study as f64,
                reason: "must be a positive year".to_string(),
            });
        }

        let features = StudentFeatures {
            student_id: raw.student_id,
            school_id: raw.school_id,
            attendance_rate,
            avg_assignment_score: numeric(raw.avg_assignment_score),
            assignment_completion_rate,
            avg_grade_points,
            avg_login_count: numeric(raw.avg_login_count),
            engagement_score,
            time_spent_minutes: numeric(raw.avg_time_spent),
            consecutive_absences,
            repeat_courses: count("repeat_courses", numeric(raw.repeat_courses))?,
            year_of_study: year_of_study as u32,
            total_enrollments: count("total_enrollments", numeric(raw.total_enrollments))?,
            forum_posts,
            late_submissions,
            help_requests,
        };

        features.validate()?;
        Ok(features)
    }

    /// Maps every record, setting aside the ones that fail validation.
    pub fn map_all(
        &self,
        records: &[RawStudentRecord],
    ) -> (Vec<StudentFeatures>, Vec<ScoringFailure>) {
        let mut students = Vec::with_capacity(records.len());
        let mut failures = Vec::new();

        for record in records {
            match self.map(record) {
                Ok(features) => students.push(features),
                Err(err) => {
                    debug!(student_id = record.student_id, error = %err, "rejected student record");
                    failures.push(ScoringFailure {
                        student_id: record.student_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        (students, failures)
    }
}

impl StudentFeatures {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("attendance_rate", self.attendance_rate),
            ("avg_assignment_score", self.avg_assignment_score),
            ("assignment_completion_rate", self.assignment_completion_rate),
            ("engagement_score", self.engagement_score),
        ] {
            in_range(field, value, 0.0, 100.0)?;
        }

        in_range("avg_grade_points", self.avg_grade_points, 0.0, MAX_GRADE_POINTS)?;

        for (field, value) in [
            ("avg_login_count", self.avg_login_count),
            ("time_spent_minutes", self.time_spent_minutes),
            ("consecutive_absences", self.consecutive_absences),
            ("forum_posts", self.forum_posts),
            ("late_submissions", self.late_submissions),
            ("help_requests", self.help_requests),
        ] {
            in_range(field, value, 0.0, f64::MAX)?;
        }

        if self.year_of_study == 0 {
            return Err(ScoringError::InvalidFeature {
                field: "year_of_study",
                value: 0.0,
                reason: "must be a positive year".to_string(),
            });
        }

        Ok(())
    }

    /// Features in [`MODEL_FEATURES`] order.
    pub fn model_vector(&self) -> [f64; 13] {
        [
            self.attendance_rate,
            self.engagement_score,
            self.assignment_completion_rate,
            self.avg_assignment_score,
            self.avg_grade_points,
            self.avg_login_count,
            self.time_spent_minutes,
            self.consecutive_absences,
            f64::from(self.repeat_courses),
            self.forum_posts,
            self.late_submissions,
            self.help_requests,
            f64::from(self.total_enrollments),
        ]
    }
}

pub fn read_csv(path: &Path) -> Result<Vec<RawStudentRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();

    for result in reader.deserialize::<RawStudentRecord>() {
        records.push(result?);
    }

    debug!(count = records.len(), path = %path.display(), "read student records");
    Ok(records)
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

fn numeric(value: Option<f64>) -> f64 {
    finite(value).unwrap_or(0.0)
}

fn in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<()> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ScoringError::InvalidFeature {
            field,
            value,
            reason: format!("expected a value between {min} and {max}"),
        })
    }
}

fn count(field: &'static str, value: f64) -> Result<u32> {
    in_range(field, value, 0.0, f64::from(u32::MAX))?;
    Ok(value.trunc() as u32)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::config::RateScale;

    fn raw() -> RawStudentRecord {
        RawStudentRecord {
            student_id: 7,
            school_id: Some(2),
            year_of_study: Some(3),
            total_enrollments: Some(6.0),
            avg_grade_points: Some(2.5),
            repeat_courses: Some(1.0),
            avg_login_count: Some(4.0),
            avg_time_spent: Some(95.0),
            assignment_completion_rate: Some(0.75),
            avg_assignment_score: Some(64.0),
            avg_engagement_score: Some(78.0),
            attendance_rate: Some(71.5),
            max_consecutive_absences: Some(3.0),
            avg_consecutive_absences: Some(1.2),
            ..Default::default()
        }
    }

    #[test]
    fn estimates_missing_lms_features() {
        let features = FeatureMapper::default().map(&raw()).unwrap();

        assert_eq!(features.assignment_completion_rate, 75.0);
        assert_eq!(features.forum_posts, 7.0);
        assert_eq!(features.late_submissions, 2.0);
        assert_eq!(features.help_requests, 4.0);
        assert_eq!(features.consecutive_absences, 3.0);
    }

    #[test]
    fn keeps_supplied_lms_features() {
        let mut record = raw();
        record.forum_posts = Some(12.0);
        record.late_submissions = Some(0.0);
        record.help_requests = Some(1.0);

        let features = FeatureMapper::default().map(&record).unwrap();
        assert_eq!(features.forum_posts, 12.0);
        assert_eq!(features.late_submissions, 0.0);
        assert_eq!(features.help_requests, 1.0);
    }

    #[test]
    fn falls_back_to_average_absences() {
        let mut record = raw();
        record.max_consecutive_absences = None;

        let features = FeatureMapper::default().map(&record).unwrap();
        assert_eq!(features.consecutive_absences, 1.2);
    }

    #[test]
    fn missing_numbers_become_zero() {
        let record = RawStudentRecord {
            student_id: 1,
            year_of_study: Some(1),
            avg_grade_points: Some(f64::NAN),
            ..Default::default()
        };

        let features = FeatureMapper::default().map(&record).unwrap();
        assert_eq!(features.attendance_rate, 0.0);
        assert_eq!(features.avg_grade_points, 0.0);
        assert_eq!(features.repeat_courses, 0);
        assert_eq!(features.help_requests, 12.0);
    }

    #[test]
    fn year_of_study_is_required() {
        let mut record = raw();
        record.year_of_study = None;

        let err = FeatureMapper::default().map(&record).unwrap_err();
        assert!(matches!(err, ScoringError::MissingField("year_of_study")));
    }

    #[test]
    fn rejects_completion_reported_in_the_wrong_unit() {
        let mut record = raw();
        record.assignment_completion_rate = Some(75.0);

        let err = FeatureMapper::default().map(&record).unwrap_err();
        assert!(matches!(
            err,
            ScoringError::InvalidFeature {
                field: "assignment_completion_rate",
                ..
            }
        ));

        let percent = FeatureMapper::new(UnitConfig {
            attendance_rate: RateScale::Percent,
            assignment_completion_rate: RateScale::Percent,
        });
        assert_eq!(percent.map(&record).unwrap().assignment_completion_rate, 75.0);
    }

    #[test]
    fn map_all_sets_aside_invalid_rows() {
        let mut bad = raw();
        bad.student_id = 99;
        bad.avg_grade_points = Some(4.7);

        let (students, failures) = FeatureMapper::default().map_all(&[raw(), bad]);
        assert_eq!(students.len(), 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].student_id, 99);
        assert!(failures[0].error.contains("avg_grade_points"));
    }

    #[test]
    fn model_vector_follows_feature_order() {
        let features = FeatureMapper::default().map(&raw()).unwrap();
        let vector = features.model_vector();

        assert_eq!(vector.len(), MODEL_FEATURES.len());
        assert_eq!(vector[0], 71.5);
        assert_eq!(vector[1], 78.0);
        assert_eq!(vector[8], 1.0);
        assert_eq!(vector[12], 6.0);
    }

    #[test]
    fn reads_csv_with_aliased_columns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "student_id,year_of_study,attendance_rate,engagement_score,assignment_completion_rate,avg_grade_points"
        )
        .unwrap();
        writeln!(file, "11,2,88.0,81.5,0.9,3.4").unwrap();
        writeln!(file, "12,5,,60,0.5,").unwrap();

        let records = read_csv(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].avg_engagement_score, Some(81.5));
        assert_eq!(records[1].attendance_rate, None);
        assert_eq!(records[1].year_of_study, Some(5));
    }

    #[test]
    fn unparseable_cells_only_affect_their_own_row() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "student_id,year_of_study,attendance_rate").unwrap();
        writeln!(file, "1,2,88.0").unwrap();
        writeln!(file, "2,2,n/a").unwrap();
        writeln!(file, "3,2.0,-").unwrap();

        let records = read_csv(file.path()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].attendance_rate, Some(88.0));
        assert_eq!(records[1].attendance_rate, None);
        assert_eq!(records[2].year_of_study, None);

        let (students, failures) = FeatureMapper::default().map_all(&records);
        assert_eq!(students.len(), 2);
        assert_eq!(students[1].student_id, 2);
        assert_eq!(students[1].attendance_rate, 0.0);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].student_id, 3);
        assert!(failures[0].error.contains("year_of_study"));
    }
}
