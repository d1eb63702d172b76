use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use student_risk_fusion::db::{self, StudentScope};
use student_risk_fusion::features::{self, FeatureMapper};
use student_risk_fusion::models::{BatchOutcome, RawStudentRecord};
use student_risk_fusion::{report, risk, ComprehensiveScorer, ScoringConfig};

#[derive(Parser)]
#[command(name = "student-risk")]
#[command(about = "Student risk scoring with institutional policy checks", long_about = None)]
struct Cli {
    /// Scoring configuration file (YAML, TOML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Source {
    /// Read raw student records from a CSV export instead of Postgres
    #[arg(long)]
    csv: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Full risk assessment for one student, as JSON
    PredictStudent {
        #[arg(long)]
        id: i64,
        #[command(flatten)]
        source: Source,
    },
    /// Ranked risk assessments for every student in a school, as JSON
    PredictSchool {
        #[arg(long)]
        id: i64,
        #[command(flatten)]
        source: Source,
    },
    /// Risk level counts and averages, as JSON
    Dashboard {
        #[arg(long)]
        school_id: Option<i64>,
        #[command(flatten)]
        source: Source,
    },
    /// Print the most at-risk students
    Score {
        #[arg(long)]
        school_id: Option<i64>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[command(flatten)]
        source: Source,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        school_id: Option<i64>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[command(flatten)]
        source: Source,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "student_risk_fusion=info,student_risk=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ScoringConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ScoringConfig::default(),
    };

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::PredictStudent { id, source } => {
            let scorer = ComprehensiveScorer::from_config(&config)?;
            let records = load_records(&source, StudentScope::Student(id)).await?;
            let record = records
                .first()
                .with_context(|| format!("student {id} not found"))?;
            let student = FeatureMapper::new(config.units.clone())
                .map(record)
                .with_context(|| format!("invalid features for student {id}"))?;
            let result = scorer
                .score(&student)
                .with_context(|| format!("failed to score student {id}"))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::PredictSchool { id, source } => {
            let outcome = score_scope(&config, &source, StudentScope::School(id)).await?;
            let summary = risk::school_summary(id, outcome.results);
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Dashboard { school_id, source } => {
            let outcome = score_scope(&config, &source, scope_for(school_id)).await?;
            if outcome.results.is_empty() {
                anyhow::bail!("no student data available");
            }
            let stats = risk::dashboard_stats(&outcome.results);
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Score {
            school_id,
            limit,
            source,
        } => {
            let outcome = score_scope(&config, &source, scope_for(school_id)).await?;

            if outcome.results.is_empty() {
                println!("No students found for this scope.");
                return Ok(());
            }

            println!("Top students by risk score:");
            for result in outcome.results.iter().take(limit) {
                println!(
                    "- Student {} ({}, priority {}) score {:.2} with {} violations, {} warnings",
                    result.student_id,
                    result.overall_risk_level,
                    result.priority,
                    result.overall_risk_score,
                    result.policy_check.total_violations,
                    result.policy_check.total_warnings
                );
            }
        }
        Commands::Report {
            school_id,
            out,
            source,
        } => {
            let scorer = Arc::new(ComprehensiveScorer::from_config(&config)?);
            let outcome =
                score_with(Arc::clone(&scorer), &config, &source, scope_for(school_id)).await?;
            let label = school_id.map(|id| format!("school {id}"));
            let report = report::build_report(
                label.as_deref(),
                &outcome,
                scorer.policy_engine().rules(),
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn scope_for(school_id: Option<i64>) -> StudentScope {
    school_id.map_or(StudentScope::All, StudentScope::School)
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn load_records(
    source: &Source,
    scope: StudentScope,
) -> anyhow::Result<Vec<RawStudentRecord>> {
    match &source.csv {
        Some(path) => {
            let records = features::read_csv(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok(records
                .into_iter()
                .filter(|r| match scope {
                    StudentScope::Student(id) => r.student_id == id,
                    StudentScope::School(id) => r.school_id == Some(id),
                    StudentScope::All => true,
                })
                .collect())
        }
        None => {
            let pool = connect().await?;
            db::fetch_student_records(&pool, scope).await
        }
    }
}

async fn score_scope(
    config: &ScoringConfig,
    source: &Source,
    scope: StudentScope,
) -> anyhow::Result<BatchOutcome> {
    let scorer = Arc::new(ComprehensiveScorer::from_config(config)?);
    score_with(scorer, config, source, scope).await
}

async fn score_with(
    scorer: Arc<ComprehensiveScorer>,
    config: &ScoringConfig,
    source: &Source,
    scope: StudentScope,
) -> anyhow::Result<BatchOutcome> {
    let records = load_records(source, scope).await?;
    let (students, rejected) = FeatureMapper::new(config.units.clone()).map_all(&records);

    // Scoring fans out on rayon; keep it off the async workers.
    let mut outcome = tokio::task::spawn_blocking(move || scorer.score_batch(&students))
        .await
        .context("batch scoring task failed")?;
    for failure in &rejected {
        warn!(student_id = failure.student_id, error = %failure.error, "skipped student record");
    }
    outcome.failures.extend(rejected);

    info!(run_id = %outcome.run_id, ?scope, "scored students");
    Ok(outcome)
}
