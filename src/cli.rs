//! Command implementations behind the `course-rag` binary.
//!
//! Each function loads what it needs from a [`Config`] and prints
//! user-facing results to stdout.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::rag::RagSystem;
use crate::store::{open_store, VectorStore};
use crate::tools::{CourseOutlineTool, CourseSearchTool};

async fn store(config: &Config) -> Result<Arc<dyn VectorStore>> {
    let embedder = Arc::from(create_provider(&config.embedding)?);
    open_store(config, embedder).await
}

pub async fn run_init(config: &Config) -> Result<()> {
    store(config).await?;
    println!("Database initialized at {}", config.db.path.display());
    Ok(())
}

pub async fn run_ingest(config: &Config, folder: &Path, clear: bool) -> Result<()> {
    let rag = RagSystem::from_config(config).await?;
    let (courses, chunks) = rag.add_course_folder(folder, clear).await?;
    println!("Added {} courses with {} chunks", courses, chunks);
    Ok(())
}

pub async fn run_courses(config: &Config) -> Result<()> {
    let store = store(config).await?;
    let courses = store.get_all_courses_metadata().await?;
    println!("{} courses", courses.len());
    for course in courses {
        match &course.instructor {
            Some(instructor) => println!(
                "  {} ({} lessons, {})",
                course.title,
                course.lessons.len(),
                instructor
            ),
            None => println!("  {} ({} lessons)", course.title, course.lessons.len()),
        }
    }
    Ok(())
}

pub async fn run_search(
    config: &Config,
    query: &str,
    course: Option<&str>,
    lesson: Option<i64>,
    limit: Option<usize>,
) -> Result<()> {
    let mut tool = CourseSearchTool::new(store(config).await?);
    if let Some(limit) = limit {
        tool = tool.with_limit(limit);
    }
    println!("{}", tool.search(query, course, lesson).await);
    Ok(())
}

pub async fn run_outline(config: &Config, course: &str) -> Result<()> {
    let tool = CourseOutlineTool::new(store(config).await?);
    println!("{}", tool.outline(course).await?);
    Ok(())
}

pub async fn run_ask(config: &Config, question: &str) -> Result<()> {
    let rag = RagSystem::from_config(config).await?;
    let (answer, sources) = rag.query(question, None).await?;
    println!("{}", answer);
    if !sources.is_empty() {
        println!();
        println!("Sources:");
        for source in sources {
            match source.link {
                Some(link) => println!("  - {} <{}>", source.text, link),
                None => println!("  - {}", source.text),
            }
        }
    }
    Ok(())
}

pub async fn run_clear(config: &Config) -> Result<()> {
    store(config).await?.clear_all_data().await?;
    println!("All course data cleared.");
    Ok(())
}
