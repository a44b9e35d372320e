//! # Course RAG CLI (`course-rag`)
//!
//! ## Usage
//!
//! ```bash
//! course-rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `course-rag init` | Create the SQLite database and schema |
//! | `course-rag ingest <folder>` | Load course documents from a folder |
//! | `course-rag courses` | List loaded courses |
//! | `course-rag search "<query>"` | Search course content without the model |
//! | `course-rag outline <course>` | Print a course outline |
//! | `course-rag ask "<question>"` | Answer one question with Claude |
//! | `course-rag clear` | Delete all course data |
//! | `course-rag serve` | Start the HTTP API and frontend |
//!
//! `ANTHROPIC_API_KEY` is read from the environment, or from a `.env` file in
//! the working directory. Log verbosity follows `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use course_rag::{cli, config, server};

/// Course RAG: ask questions about course materials.
#[derive(Parser)]
#[command(
    name = "course-rag",
    about = "Course materials chatbot: ingest course documents and answer questions with Claude",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when it is missing.
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Load every course document in a folder.
    ///
    /// Courses whose title is already stored are skipped.
    Ingest {
        /// Folder containing .txt, .pdf or .docx course documents.
        folder: PathBuf,

        /// Delete all stored courses first.
        #[arg(long)]
        clear: bool,
    },

    /// List loaded courses.
    Courses,

    /// Search course content and print the formatted hits.
    Search {
        query: String,

        /// Course title, or part of it.
        #[arg(long)]
        course: Option<String>,

        /// Restrict to one lesson number.
        #[arg(long)]
        lesson: Option<i64>,

        /// Maximum number of hits (defaults to retrieval.max_results).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print a course's link, instructor and lessons.
    Outline {
        /// Course title, or part of it.
        course: String,
    },

    /// Answer a single question.
    Ask { question: String },

    /// Delete all course data.
    Clear,

    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let cfg = config::load_config_or_default(&args.config)?.with_env();

    match args.command {
        Commands::Init => cli::run_init(&cfg).await?,
        Commands::Ingest { folder, clear } => cli::run_ingest(&cfg, &folder, clear).await?,
        Commands::Courses => cli::run_courses(&cfg).await?,
        Commands::Search {
            query,
            course,
            lesson,
            limit,
        } => cli::run_search(&cfg, &query, course.as_deref(), lesson, limit).await?,
        Commands::Outline { course } => cli::run_outline(&cfg, &course).await?,
        Commands::Ask { question } => cli::run_ask(&cfg, &question).await?,
        Commands::Clear => cli::run_clear(&cfg).await?,
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}
