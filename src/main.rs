use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use trig_tutor_study::assessment::{self, AssessmentRecord};
use trig_tutor_study::comparison;
use trig_tutor_study::config::StudyConfig;
use trig_tutor_study::db::{self, PgStore};
use trig_tutor_study::models::{
    AssessmentKind, Group, PerformanceRating, StudentInteractionRecord, StudentTable,
};
use trig_tutor_study::report;
use trig_tutor_study::sectioner;
use trig_tutor_study::store::{JsonFileStore, StoreError, StudentStore};
use trig_tutor_study::tracker::InteractionTracker;
use trig_tutor_study::transcript::TranscriptLog;

#[derive(Parser)]
#[command(name = "tutor-study")]
#[command(about = "Progress tracking and admin tools for the trigonometry tutor study", long_about = None)]
struct Cli {
    /// Where student progress is persisted
    #[arg(long, value_enum, default_value_t = BackendKind::Json, global = true)]
    backend: BackendKind,
    /// Data directory (overrides TUTOR_STUDY_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendKind {
    Json,
    Postgres,
}

#[derive(Clone, Copy, ValueEnum)]
enum GateAction {
    Unlock,
    Lock,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Pre,
    Final,
}

impl From<KindArg> for AssessmentKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Pre => AssessmentKind::Pre,
            KindArg::Final => AssessmentKind::Final,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Enroll a student in a study group
    InitStudent {
        student_id: String,
        #[arg(long = "group")]
        study_group: Group,
    },
    /// Record a day of tutoring for a student
    Record {
        student_id: String,
        /// Calendar date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Manually unlock or lock a student's final assessment
    Gate {
        student_id: String,
        #[arg(value_enum)]
        action: GateAction,
    },
    /// Mark the pre-test as completed
    CompletePretest { student_id: String },
    /// Mark the final test as completed
    CompleteFinal { student_id: String },
    /// Show one student or the whole progress table
    Show { student_id: Option<String> },
    /// Delete all student progress
    Reset {
        #[arg(long)]
        yes: bool,
    },
    /// Print the student-visible part of a tutor reply
    Sanitize {
        /// Reply file, reads stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,
        /// Print the full reply kept for audit instead
        #[arg(long)]
        audit: bool,
    },
    /// Store an assessment score
    Rate {
        student_id: String,
        #[arg(long = "group")]
        study_group: Group,
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(long)]
        score: f64,
        #[arg(long)]
        correct: u32,
        #[arg(long, default_value = "Unknown")]
        difficulty: String,
        /// Topic the student struggled with (repeatable)
        #[arg(long = "weak-area")]
        weak_areas: Vec<String>,
        /// Topic the student handled well (repeatable)
        #[arg(long = "strong-area")]
        strong_areas: Vec<String>,
    },
    /// Store a student's raw assessment answers
    Submit {
        student_id: String,
        #[arg(long = "group")]
        study_group: Group,
        #[arg(long, value_enum)]
        kind: KindArg,
        /// Answers in question order; only the first five are kept
        #[arg(long = "answer")]
        answers: Vec<String>,
        #[arg(long, default_value_t = 0.0)]
        score: f64,
    },
    /// List a student's stored assessment submissions
    Assessments { student_id: String },
    /// Compare assessment improvement between groups
    Compare {
        /// Append the result to comparison_results.csv
        #[arg(long)]
        save: bool,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Export the progress table as CSV
    Export {
        #[arg(long)]
        out: PathBuf,
    },
}

enum Backend {
    Json(JsonFileStore),
    Postgres(PgStore),
}

impl StudentStore for Backend {
    async fn load(&self) -> Result<StudentTable, StoreError> {
        match self {
            Backend::Json(store) => store.load().await,
            Backend::Postgres(store) => store.load().await,
        }
    }

    async fn save(&self, table: &StudentTable) -> Result<(), StoreError> {
        match self {
            Backend::Json(store) => store.save(table).await,
            Backend::Postgres(store) => store.save(table).await,
        }
    }
}

async fn connect_postgres(config: &StudyConfig) -> anyhow::Result<sqlx::PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(config.database_url()?)
        .await
        .context("failed to connect to Postgres")
}

async fn open_tracker(
    kind: BackendKind,
    config: &StudyConfig,
) -> anyhow::Result<InteractionTracker<Backend>> {
    let backend = match kind {
        BackendKind::Json => Backend::Json(JsonFileStore::new(config.progress_file())),
        BackendKind::Postgres => Backend::Postgres(PgStore::new(connect_postgres(config).await?)),
    };
    Ok(InteractionTracker::new(backend))
}

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn require_student(applied: bool, student_id: &str) -> anyhow::Result<()> {
    if !applied {
        bail!("no such student: {student_id} (run init-student first)");
    }
    Ok(())
}

fn print_record(record: &StudentInteractionRecord) {
    println!(
        "- {} (group {}): {} days, final gate {}, pre-test {}, final {}{}",
        record.student_id,
        record.group,
        record.days_interacted(),
        if record.final_gate_enabled { "unlocked" } else { "locked" },
        if record.pre_test_completed { "done" } else { "pending" },
        if record.final_test_completed { "done" } else { "pending" },
        if record.admin_override { " [admin override]" } else { "" },
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    let config = StudyConfig::from_env().with_data_dir(cli.data_dir.clone());

    match cli.command {
        Commands::InitDb => {
            let pool = connect_postgres(&config).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::InitStudent {
            student_id,
            study_group,
        } => {
            let tracker = open_tracker(cli.backend, &config).await?;
            tracker.init_student(&student_id, study_group).await?;
            println!("Student {student_id} enrolled.");
        }
        Commands::Record { student_id, date } => {
            let tracker = open_tracker(cli.backend, &config).await?;
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            require_student(tracker.record_interaction(&student_id, date).await?, &student_id)?;
            if let Some(record) = tracker.get(&student_id).await? {
                println!(
                    "{} has interacted on {} distinct days; final gate {}.",
                    student_id,
                    record.days_interacted(),
                    if record.final_gate_enabled { "unlocked" } else { "locked" }
                );
            }
        }
        Commands::Gate { student_id, action } => {
            let tracker = open_tracker(cli.backend, &config).await?;
            let enabled = matches!(action, GateAction::Unlock);
            require_student(tracker.admin_set_gate(&student_id, enabled).await?, &student_id)?;
            println!(
                "Final gate {} for {student_id}.",
                if enabled { "unlocked" } else { "locked" }
            );
        }
        Commands::CompletePretest { student_id } => {
            let tracker = open_tracker(cli.backend, &config).await?;
            require_student(tracker.complete_pretest(&student_id).await?, &student_id)?;
            println!("Pre-test completed for {student_id}.");
        }
        Commands::CompleteFinal { student_id } => {
            let tracker = open_tracker(cli.backend, &config).await?;
            require_student(tracker.complete_final_test(&student_id).await?, &student_id)?;
            println!("Final test completed for {student_id}.");
        }
        Commands::Show { student_id } => {
            let tracker = open_tracker(cli.backend, &config).await?;
            match student_id {
                Some(id) => match tracker.get(&id).await? {
                    Some(record) => print_record(&record),
                    None => bail!("no such student: {id}"),
                },
                None => {
                    let table = tracker.all().await?;
                    if table.is_empty() {
                        println!("No students enrolled.");
                    }
                    for record in table.records() {
                        print_record(record);
                    }
                }
            }
        }
        Commands::Reset { yes } => {
            if !yes {
                bail!("refusing to delete all progress without --yes");
            }
            let tracker = open_tracker(cli.backend, &config).await?;
            tracker.reset_all().await?;
            println!("All student progress deleted.");
        }
        Commands::Sanitize { input, audit } => {
            let raw = match input {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => {
                    let mut raw = String::new();
                    std::io::stdin().read_to_string(&mut raw)?;
                    raw
                }
            };
            let response = sectioner::parse(&raw);
            if audit {
                print!("{}", response.audit_view());
            } else {
                println!("{}", response.student_view());
            }
        }
        Commands::Rate {
            student_id,
            study_group,
            kind,
            score,
            correct,
            difficulty,
            weak_areas,
            strong_areas,
        } => {
            let rating = PerformanceRating {
                student_id,
                group: study_group,
                assessment_type: kind.into(),
                score_percentage: score,
                correct_answers: correct,
                weak_areas,
                strong_areas,
                difficulty_level: difficulty,
                timestamp: Local::now().naive_local(),
            };
            comparison::append_rating(&config.ratings_file(), &rating)?;
            println!(
                "Stored {} score {:.1}% for {}.",
                rating.assessment_type, rating.score_percentage, rating.student_id
            );
        }
        Commands::Submit {
            student_id,
            study_group,
            kind,
            answers,
            score,
        } => {
            let record = AssessmentRecord::new(student_id, study_group, kind.into(), &answers, score);
            assessment::save_assessment(&config.assessments_file(), &record)?;
            println!(
                "Stored {} answers for {}.",
                record.assessment_type, record.student_id
            );
        }
        Commands::Assessments { student_id } => {
            let records = assessment::student_assessments(&config.assessments_file(), &student_id)?;
            if records.is_empty() {
                println!("No assessments stored for {student_id}.");
            }
            for record in &records {
                println!(
                    "- {} {} (score {}, attempt {}): {}",
                    record.timestamp.format("%Y-%m-%d %H:%M"),
                    record.assessment_type,
                    record.score,
                    record.attempts,
                    record.answers().join(" | ")
                );
            }
        }
        Commands::Compare { save } => {
            let ratings = comparison::load_ratings(&config.ratings_file())?;
            let result = comparison::compare_groups(&ratings);
            println!(
                "Group 1: pre {:.2}% final {:.2}% improvement {:+.2}%",
                result.group1_avg_pre, result.group1_avg_final, result.improvement_group1
            );
            println!(
                "Group 2: pre {:.2}% final {:.2}% improvement {:+.2}%",
                result.group2_avg_pre, result.group2_avg_final, result.improvement_group2
            );
            println!("Winner: {}", result.winner);
            if save {
                comparison::append_comparison(&config.comparison_file(), &result)?;
                println!("Saved to {}.", config.comparison_file().display());
            }
        }
        Commands::Report { out } => {
            let tracker = open_tracker(cli.backend, &config).await?;
            let table = tracker.all().await?;
            let ratings = comparison::load_ratings(&config.ratings_file())?;
            let transcripts = TranscriptLog::new(config.transcript_file()).entries()?;
            let report = report::build_report(
                &table,
                &comparison::compare_groups(&ratings),
                &transcripts,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { out } => {
            let tracker = open_tracker(cli.backend, &config).await?;
            let written = report::write_progress_csv(&tracker.all().await?, &out)?;
            println!("Exported {written} students to {}.", out.display());
        }
    }

    Ok(())
}
