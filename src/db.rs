use anyhow::Context;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::models::RawStudentRecord;

/// Which students a query should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudentScope {
    Student(i64),
    School(i64),
    All,
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// Each source table is aggregated on its own before joining so that one student's
// enrollments, LMS weeks and attendance days do not multiply each other.
const STUDENT_FEATURES_QUERY: &str = r#"
    SELECT s.id AS student_id,
           s.school_id,
           s.year_of_study::BIGINT AS year_of_study,
           se.total_enrollments::FLOAT8 AS total_enrollments,
           se.avg_grade_points::FLOAT8 AS avg_grade_points,
           se.repeat_courses::FLOAT8 AS repeat_courses,
           lms.avg_login_count::FLOAT8 AS avg_login_count,
           lms.avg_time_spent::FLOAT8 AS avg_time_spent,
           lms.assignment_completion_rate::FLOAT8 AS assignment_completion_rate,
           lms.avg_assignment_score::FLOAT8 AS avg_assignment_score,
           lms.avg_engagement_score::FLOAT8 AS avg_engagement_score,
           lms.forum_posts::FLOAT8 AS forum_posts,
           ar.attendance_rate::FLOAT8 AS attendance_rate,
           ar.max_consecutive_absences::FLOAT8 AS max_consecutive_absences,
           ar.avg_consecutive_absences::FLOAT8 AS avg_consecutive_absences
    FROM risk_fusion.students s
    LEFT JOIN (
        SELECT student_id,
               COUNT(*) AS total_enrollments,
               AVG(grade_points) AS avg_grade_points,
               SUM(CASE WHEN is_repeating THEN 1 ELSE 0 END) AS repeat_courses
        FROM risk_fusion.sis_enrollments
        GROUP BY student_id
    ) se ON se.student_id = s.id
    LEFT JOIN (
        SELECT student_id,
               AVG(login_count) AS avg_login_count,
               AVG(time_spent_minutes) AS avg_time_spent,
               AVG(assignments_submitted::FLOAT8 / NULLIF(assignments_total, 0)) AS assignment_completion_rate,
               AVG(avg_assignment_score) AS avg_assignment_score,
               AVG(engagement_score) AS avg_engagement_score,
               AVG(discussion_posts) AS forum_posts
        FROM risk_fusion.lms_activities
        GROUP BY student_id
    ) lms ON lms.student_id = s.id
    LEFT JOIN (
        SELECT student_id,
               SUM(CASE WHEN status = 'present' THEN 1 ELSE 0 END) * 100.0 / NULLIF(COUNT(*), 0) AS attendance_rate,
               MAX(consecutive_absences) AS max_consecutive_absences,
               AVG(consecutive_absences) AS avg_consecutive_absences
        FROM risk_fusion.attendance_records
        GROUP BY student_id
    ) ar ON ar.student_id = s.id
    WHERE s.status = 'active'
"#;

pub async fn fetch_student_records(
    pool: &PgPool,
    scope: StudentScope,
) -> anyhow::Result<Vec<RawStudentRecord>> {
    let mut query = String::from(STUDENT_FEATURES_QUERY);

    match scope {
        StudentScope::Student(_) => query.push_str(" AND s.id = $1"),
        StudentScope::School(_) => query.push_str(" AND s.school_id = $1"),
        StudentScope::All => {}
    }
    query.push_str(" ORDER BY s.id");

    let mut rows = sqlx::query(&query);
    match scope {
        StudentScope::Student(id) | StudentScope::School(id) => rows = rows.bind(id),
        StudentScope::All => {}
    }

    let records = rows
        .fetch_all(pool)
        .await
        .context("failed to load student features")?;
    let mut students = Vec::with_capacity(records.len());

    for row in records {
        students.push(RawStudentRecord {
            student_id: row.try_get("student_id")?,
            school_id: row.try_get("school_id")?,
            year_of_study: row.try_get("year_of_study")?,
            total_enrollments: row.try_get("total_enrollments")?,
            avg_grade_points: row.try_get("avg_grade_points")?,
            repeat_courses: row.try_get("repeat_courses")?,
            avg_login_count: row.try_get("avg_login_count")?,
            avg_time_spent: row.try_get("avg_time_spent")?,
            assignment_completion_rate: row.try_get("assignment_completion_rate")?,
            avg_assignment_score: row.try_get("avg_assignment_score")?,
            avg_engagement_score: row.try_get("avg_engagement_score")?,
            attendance_rate: row.try_get("attendance_rate")?,
            max_consecutive_absences: row.try_get("max_consecutive_absences")?,
            avg_consecutive_absences: row.try_get("avg_consecutive_absences")?,
            forum_posts: row.try_get("forum_posts")?,
            late_submissions: None,
            help_requests: None,
        });
    }

    debug!(?scope, count = students.len(), "fetched student records");
    Ok(students)
}
