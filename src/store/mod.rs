//! Course catalog and content storage.
//!
//! The [`VectorStore`] trait holds two logical collections:
//!
//! | Collection | Holds | Used for |
//! |------------|-------|----------|
//! | catalog | one [`Course`] per title, lessons included | course-name resolution, outlines, links |
//! | content | [`CourseChunk`]s | retrieval |
//!
//! Retrieval is semantic (cosine over stored embeddings) when an embedding
//! provider is configured, and keyword-based otherwise. Both backends,
//! [`SqliteStore`] and [`InMemoryStore`], share the search contract
//! implemented by [`VectorStore::search`].

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::models::{Course, CourseChunk, SearchHit, SearchResults};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Restricts a content query to one course and/or one lesson.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkFilter {
    pub course_title: Option<String>,
    pub lesson_number: Option<i64>,
}

impl ChunkFilter {
    pub fn matches(&self, chunk: &CourseChunk) -> bool {
        self.course_title
            .as_deref()
            .map_or(true, |t| t == chunk.course_title)
            && self
                .lesson_number
                .map_or(true, |n| chunk.lesson_number == Some(n))
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Default number of hits returned by [`search`](VectorStore::search).
    fn max_results(&self) -> usize;

    /// Inserts or replaces a course in the catalog.
    async fn add_course_metadata(&self, course: &Course) -> Result<()>;

    /// Stores chunks as the full content of their courses. Any chunks already
    /// held for those course titles are removed first, in the same write.
    async fn add_course_content(&self, chunks: &[CourseChunk]) -> Result<()>;

    /// Removes every chunk of one course, leaving its catalog entry alone.
    async fn delete_course_content(&self, course_title: &str) -> Result<()>;

    /// Ranks content chunks against `query`, best first.
    async fn query_chunks(
        &self,
        query: &str,
        filter: &ChunkFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>>;

    /// Maps a possibly partial course name to a stored course title.
    async fn resolve_course_name(&self, course_name: &str) -> Result<Option<String>>;

    async fn clear_all_data(&self) -> Result<()>;

    async fn get_existing_course_titles(&self) -> Result<Vec<String>>;

    async fn get_course_count(&self) -> Result<usize> {
        Ok(self.get_existing_course_titles().await?.len())
    }

    async fn get_all_courses_metadata(&self) -> Result<Vec<Course>>;

    async fn get_course(&self, title: &str) -> Result<Option<Course>>;

    async fn get_course_link(&self, title: &str) -> Result<Option<String>> {
        Ok(self.get_course(title).await?.and_then(|c| c.course_link))
    }

    async fn get_lesson_link(&self, title: &str, lesson_number: i64) -> Result<Option<String>> {
        Ok(self
            .get_course(title)
            .await?
            .and_then(|c| c.lesson(lesson_number).and_then(|l| l.lesson_link.clone())))
    }

    /// Searches course content.
    ///
    /// Store failures and unknown course names are reported through
    /// [`SearchResults::error`] rather than `Err`, so the message can be
    /// handed to the model as a tool result.
    async fn search(
        &self,
        query: &str,
        course_name: Option<&str>,
        lesson_number: Option<i64>,
        limit: Option<usize>,
    ) -> SearchResults {
        let course_title = match course_name {
            Some(name) => match self.resolve_course_name(name).await {
                Ok(Some(title)) => Some(title),
                Ok(None) => {
                    return SearchResults::empty(format!("No course found matching '{}'", name))
                }
                Err(e) => return SearchResults::empty(format!("Search error: {}", e)),
            },
            None => None,
        };

        let filter = ChunkFilter {
            course_title,
            lesson_number,
        };
        let limit = limit.unwrap_or_else(|| self.max_results());

        match self.query_chunks(query, &filter, limit).await {
            Ok(hits) => SearchResults::new(hits),
            Err(e) => {
                tracing::warn!(error = %e, "content search failed");
                SearchResults::empty(format!("Search error: {}", e))
            }
        }
    }
}

/// Builds the store selected by `[db].backend`.
pub async fn open_store(
    config: &Config,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<Arc<dyn VectorStore>> {
    let max_results = config.retrieval.max_results;
    match config.db.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryStore::new(embedder, max_results))),
        "sqlite" => Ok(Arc::new(
            SqliteStore::open(&config.db.path, embedder, max_results)
                .await?
                .with_embed_batch_size(config.embedding.batch_size),
        )),
        other => anyhow::bail!("Unknown db.backend: {} (expected sqlite or memory)", other),
    }
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "for", "in", "of", "on", "the", "to", "with",
];

/// Lowercased word tokens of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Builds an FTS5 `MATCH` expression that ORs the quoted query tokens.
/// Returns `None` when the query has no word characters.
pub fn fts_query(query: &str) -> Option<String> {
    let tokens = tokenize(query);
    if tokens.is_empty() {
        return None;
    }
    Some(
        tokens
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Case-insensitive exact match, then the shortest title containing `name`
/// (or contained in it).
pub fn match_course_title_exact(name: &str, titles: &[String]) -> Option<String> {
    let needle = name.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    if let Some(t) = titles.iter().find(|t| t.to_lowercase() == needle) {
        return Some(t.clone());
    }

    titles
        .iter()
        .filter(|t| {
            let hay = t.to_lowercase();
            hay.contains(&needle) || needle.contains(&hay)
        })
        .min_by_key(|t| t.len())
        .cloned()
}

/// Title sharing the most non-stop-word tokens with `name`; ties keep the first.
pub fn match_course_title_by_tokens(name: &str, titles: &[String]) -> Option<String> {
    let wanted: HashSet<String> = tokenize(name)
        .into_iter()
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect();
    if wanted.is_empty() {
        return None;
    }

    let mut best: Option<(&String, usize)> = None;
    for title in titles {
        let overlap = tokenize(title)
            .into_iter()
            .collect::<HashSet<_>>()
            .intersection(&wanted)
            .count();
        if overlap > 0 && best.map_or(true, |(_, b)| overlap > b) {
            best = Some((title, overlap));
        }
    }
    best.map(|(t, _)| t.clone())
}

/// Converts a positive relevance score into a distance (lower is better).
pub fn score_to_distance(score: f64) -> f64 {
    1.0 / (1.0 + score.max(0.0))
}
