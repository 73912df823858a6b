use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use learn_core::model::{
    CourseId, LearningSession, LessonId, ModuleId, SessionId, UserCourseProgress, UserId,
};
use serde::Serialize;
use services::{Clock, ProgressServices, TrackProgress};
use storage::repository::Storage;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod catalog_file;
mod config;

use catalog_file::Catalog;

#[derive(Parser)]
#[command(name = "learn-progress")]
#[command(about = "Track lesson, module and course progress", long_about = None)]
struct Cli {
    /// SQLite database URL or path
    #[arg(long = "db", env = "LEARN_DB_URL", default_value = config::DEFAULT_DB_URL)]
    db_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish course and module outlines from a JSON file
    ImportCatalog {
        path: PathBuf,
    },
    /// Record lesson activity
    Track {
        #[arg(long)]
        user: String,
        #[arg(long)]
        module: String,
        #[arg(long)]
        lesson: String,
        /// not_started, in_progress or completed
        #[arg(long)]
        status: String,
        /// Seconds spent since the last update
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        time_spent: i64,
        /// RFC 3339 completion time; defaults to now for completed lessons
        #[arg(long)]
        completed_at: Option<DateTime<Utc>>,
        /// Idempotency key for retried requests
        #[arg(long)]
        request_id: Option<String>,
    },
    /// Show module progress and the recommended next step
    Module {
        #[arg(long)]
        user: String,
        #[arg(long)]
        module: String,
        /// Lesson the learner is looking at
        #[arg(long)]
        current: Option<String>,
    },
    /// Suggest a completed lesson to revisit
    Review {
        #[arg(long)]
        user: String,
        #[arg(long)]
        module: String,
    },
    /// Start a learning session on a course
    Start {
        course: String,
    },
    /// Complete the current block of a session
    Advance {
        session: String,
    },
    /// Answer the current question of a session
    Answer {
        session: String,
        answer: String,
    },
    /// Attach a note to the current block of a session
    Insight {
        session: String,
        text: String,
    },
    /// List the notes of a session
    Insights {
        session: String,
    },
    /// Show course progress and the active session
    Course {
        course: String,
    },
}

#[derive(Serialize)]
struct CourseReport {
    progress: Option<UserCourseProgress>,
    active_session: Option<LearningSession>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config::DEFAULT_LOG_FILTER.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let db_url = config::normalize_sqlite_url(&cli.db_url);
    config::prepare_sqlite_file(&db_url)?;
    let storage = Storage::sqlite(&db_url)
        .await
        .with_context(|| format!("opening {db_url}"))?;
    let services = ProgressServices::from_storage(storage, Clock::default_clock());

    match cli.command {
        Commands::ImportCatalog { path } => {
            Catalog::load(&path)?.publish(services.storage()).await?;
        }
        Commands::Track {
            user,
            module,
            lesson,
            status,
            time_spent,
            completed_at,
            request_id,
        } => {
            let request = TrackProgress {
                user_id: user,
                module_id: module,
                lesson_id: lesson,
                status,
                time_spent_secs: time_spent,
                completed_at,
                request_id,
            };
            print_json(&services.lessons().track_progress(&request).await?)?;
        }
        Commands::Module {
            user,
            module,
            current,
        } => {
            let current = current.map(LessonId::new).transpose()?;
            let overview = services
                .modules()
                .module_overview(&UserId::new(user)?, &ModuleId::new(module)?, current.as_ref())
                .await?;
            print_json(&overview)?;
        }
        Commands::Review { user, module } => {
            let review = services
                .modules()
                .review_suggestion(&UserId::new(user)?, &ModuleId::new(module)?)
                .await?;
            print_json(&review)?;
        }
        Commands::Start { course } => {
            print_json(&services.sessions().start_session(&CourseId::new(course)?).await?)?;
        }
        Commands::Advance { session } => {
            print_json(&services.sessions().advance(&SessionId::new(session)?).await?)?;
        }
        Commands::Answer { session, answer } => {
            let session = services
                .sessions()
                .submit_answer(&SessionId::new(session)?, &answer)
                .await?;
            print_json(&session)?;
        }
        Commands::Insight { session, text } => {
            let insight = services
                .sessions()
                .record_insight(&SessionId::new(session)?, &text)
                .await?;
            print_json(&insight)?;
        }
        Commands::Insights { session } => {
            print_json(&services.sessions().list_insights(&SessionId::new(session)?).await?)?;
        }
        Commands::Course { course } => {
            let course_id = CourseId::new(course)?;
            let sessions = services.sessions();
            let report = CourseReport {
                progress: sessions.course_progress(&course_id).await?,
                active_session: sessions.active_session(&course_id).await?,
            };
            print_json(&report)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        let retryable = err
            .downcast_ref::<services::ProgressError>()
            .is_some_and(services::ProgressError::is_retryable);
        tracing::error!(retryable, "{err:#}");
        eprintln!("{err:#}");
        // EX_TEMPFAIL lets wrappers retry conflicts and transient storage failures.
        std::process::exit(if retryable { 75 } else { 2 });
    }
}
