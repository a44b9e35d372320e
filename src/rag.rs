//! The retrieval-augmented chatbot: ingestion, querying and session upkeep.
//!
//! ```text
//! course files ──▶ DocumentProcessor ──▶ VectorStore (catalog + chunks)
//!                                             ▲
//! query ──▶ AiGenerator ◀──▶ ToolManager ─────┘
//!              │
//!              └──▶ SessionManager (history for the next turn)
//! ```

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

use crate::anthropic::{AnthropicClient, ChatClient};
use crate::config::Config;
use crate::document::DocumentProcessor;
use crate::embedding::create_provider;
use crate::generator::AiGenerator;
use crate::models::{Course, CourseAnalytics, CourseChunk, Source};
use crate::session::SessionManager;
use crate::store::{open_store, VectorStore};
use crate::tools::ToolManager;

pub struct RagSystem {
    processor: DocumentProcessor,
    store: Arc<dyn VectorStore>,
    generator: AiGenerator,
    sessions: SessionManager,
    include: GlobSet,
    exclude: GlobSet,
    max_depth: usize,
}

impl RagSystem {
    /// Wires the store, embedding provider and Anthropic client from config.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder = Arc::from(create_provider(&config.embedding)?);
        let store = open_store(config, embedder).await?;
        let client = AnthropicClient::new(config.api_key.clone(), &config.anthropic)?;
        Self::new(config, store, Arc::new(client))
    }

    pub fn new(
        config: &Config,
        store: Arc<dyn VectorStore>,
        client: Arc<dyn ChatClient>,
    ) -> Result<Self> {
        Ok(Self {
            processor: DocumentProcessor::new(
                config.chunking.chunk_size,
                config.chunking.chunk_overlap,
            ),
            store,
            generator: AiGenerator::new(client, &config.anthropic),
            sessions: SessionManager::new(config.session.max_history)
                .with_max_sessions(config.session.max_sessions),
            include: build_globset(&config.ingest.include_globs)?,
            exclude: build_globset(&config.ingest.exclude_globs)?,
            max_depth: config.ingest.max_depth.max(1),
        })
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Tools offered to the model, fresh for each query.
    pub fn tool_manager(&self) -> ToolManager {
        ToolManager::with_course_tools(self.store.clone())
    }

    /// Ingests one course document. Failures are logged and count as nothing added.
    pub async fn add_course_document(&self, path: &Path) -> (Option<Course>, usize) {
        match self.ingest_document(path).await {
            Ok((course, count)) => (Some(course), count),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %format!("{:#}", e), "failed to ingest course document");
                (None, 0)
            }
        }
    }

    async fn ingest_document(&self, path: &Path) -> Result<(Course, usize)> {
        let (course, chunks) = self.processor.process_course_document(path)?;
        self.store_course(&course, &chunks).await?;
        Ok((course, chunks.len()))
    }

    /// Writes content before the catalog entry, so a failed write never
    /// leaves a catalogued course without chunks.
    async fn store_course(&self, course: &Course, chunks: &[CourseChunk]) -> Result<()> {
        if chunks.is_empty() {
            self.store.delete_course_content(&course.title).await?;
        } else {
            self.store
                .add_course_content(chunks)
                .await
                .with_context(|| format!("Failed to store content for '{}'", course.title))?;
        }
        self.store
            .add_course_metadata(course)
            .await
            .with_context(|| format!("Failed to catalog '{}'", course.title))
    }

    /// Ingests every matching document under `folder`, skipping courses
    /// whose title is already stored. Returns `(courses_added, chunks_added)`.
    pub async fn add_course_folder(
        &self,
        folder: &Path,
        clear_existing: bool,
    ) -> Result<(usize, usize)> {
        if !folder.is_dir() {
            tracing::warn!(folder = %folder.display(), "course folder does not exist");
            return Ok((0, 0));
        }

        if clear_existing {
            tracing::info!("clearing existing course data");
            self.store.clear_all_data().await?;
        }

        let mut existing: HashSet<String> = self
            .store
            .get_existing_course_titles()
            .await?
            .into_iter()
            .collect();

        let mut courses_added = 0;
        let mut chunks_added = 0;

        for path in self.course_files(folder)? {
            let (course, chunks) = match self.processor.process_course_document(&path) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %format!("{:#}", e), "skipping unreadable course document");
                    continue;
                }
            };

            if existing.contains(&course.title) {
                tracing::info!(title = %course.title, "course already loaded, skipping");
                continue;
            }

            if let Err(e) = self.store_course(&course, &chunks).await {
                tracing::error!(path = %path.display(), error = %format!("{:#}", e), "failed to store course");
                continue;
            }
            tracing::info!(title = %course.title, chunks = chunks.len(), "added course");

            courses_added += 1;
            chunks_added += chunks.len();
            existing.insert(course.title);
        }

        Ok((courses_added, chunks_added))
    }

    fn course_files(&self, folder: &Path) -> Result<Vec<std::path::PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(folder).max_depth(self.max_depth).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk {}", folder.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(folder)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            if self.exclude.is_match(&rel) || !self.include.is_match(&rel) {
                continue;
            }
            files.push(entry.into_path());
        }
        Ok(files)
    }

    /// Answers a question, using and then extending the session history.
    pub async fn query(
        &self,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<(String, Vec<Source>)> {
        let prompt = format!("Answer this question about course materials: {}", query);
        let history = session_id.and_then(|id| self.sessions.get_conversation_history(id));

        let tools = self.tool_manager();
        let answer = self
            .generator
            .generate_response(
                &prompt,
                history.as_deref(),
                &tools.get_tool_definitions(),
                Some(&tools),
            )
            .await?;

        let sources = tools.get_last_sources();
        tools.reset_sources();

        if let Some(id) = session_id {
            self.sessions.add_exchange(id, query, &answer);
        }

        Ok((answer, sources))
    }

    pub async fn get_course_analytics(&self) -> Result<CourseAnalytics> {
        let course_titles = self.store.get_existing_course_titles().await?;
        Ok(CourseAnalytics {
            total_courses: course_titles.len(),
            course_titles,
        })
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anthropic::{ApiError, MessageRequest, MessageResponse};
    use crate::embedding::DisabledProvider;
    use crate::embedding::EmbeddingProvider;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct NeverCalled;

    #[async_trait]
    impl ChatClient for NeverCalled {
        async fn create_message(&self, _: &MessageRequest) -> Result<MessageResponse, ApiError> {
            Err(ApiError::MissingApiKey)
        }
    }

    const DOC: &str = "Course Title: Intro to Testing
Course Link: https://example.com/testing
Course Instructor: Ada

Lesson 0: Welcome
Lesson Link: https://example.com/testing/0
Testing keeps software honest. Unit tests are small.

Lesson 1: Mocks
Mocks stand in for collaborators.
";

    fn system() -> RagSystem {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::new(Arc::new(DisabledProvider), 5));
        RagSystem::new(&Config::default(), store, Arc::new(NeverCalled)).unwrap()
    }

    #[tokio::test]
    async fn test_add_course_folder_skips_existing_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("course1.txt"), DOC).unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let rag = system();
        let (courses, chunks) = rag.add_course_folder(dir.path(), false).await.unwrap();
        assert_eq!(courses, 1);
        assert!(chunks >= 2);

        // Second pass: the title is already present.
        assert_eq!(rag.add_course_folder(dir.path(), false).await.unwrap(), (0, 0));

        // Clearing first reloads everything.
        let (courses, _) = rag.add_course_folder(dir.path(), true).await.unwrap();
        assert_eq!(courses, 1);

        let analytics = rag.get_course_analytics().await.unwrap();
        assert_eq!(analytics.total_courses, 1);
        assert_eq!(analytics.course_titles, vec!["Intro to Testing".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_folder_adds_nothing() {
        let rag = system();
        assert_eq!(
            rag.add_course_folder(Path::new("/definitely/not/here"), false)
                .await
                .unwrap(),
            (0, 0)
        );
    }

    #[tokio::test]
    async fn test_add_course_document_reports_failures() {
        let rag = system();
        let (course, count) = rag.add_course_document(Path::new("/nope/missing.txt")).await;
        assert!(course.is_none());
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_query_propagates_generator_errors() {
        let rag = system();
        let id = rag.sessions().create_session();
        let err = rag.query("What is testing?", Some(&id)).await.unwrap_err();
        assert!(err.downcast_ref::<ApiError>().is_some());
        // Failed queries leave no trace in the session.
        assert_eq!(rag.sessions().get_conversation_history(&id), None);
    }

    /// Embeds anything, except text mentioning "outage" while `down` is set.
    struct FlakyEmbedder {
        down: AtomicBool,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        fn model_name(&self) -> &str {
            "flaky"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.down.load(Ordering::SeqCst) && texts.iter().any(|t| t.contains("outage")) {
                anyhow::bail!("embedding service down");
            }
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_store_failure_skips_file_and_allows_retry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a_broken.txt"),
            "Course Title: Stale\n\nLesson 0: Only\nThis lesson talks about an outage.\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("b_good.txt"), DOC).unwrap();

        let embedder = Arc::new(FlakyEmbedder {
            down: AtomicBool::new(true),
        });
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::new(embedder.clone(), 5));
        let rag = RagSystem::new(&Config::default(), store, Arc::new(NeverCalled)).unwrap();

        let (courses, _) = rag.add_course_folder(dir.path(), false).await.unwrap();
        assert_eq!(courses, 1);
        assert_eq!(
            rag.store().get_existing_course_titles().await.unwrap(),
            vec!["Intro to Testing".to_string()]
        );

        embedder.down.store(false, Ordering::SeqCst);
        let (courses, chunks) = rag.add_course_folder(dir.path(), false).await.unwrap();
        assert_eq!(courses, 1);
        assert!(chunks > 0);
        assert!(rag
            .store()
            .get_existing_course_titles()
            .await
            .unwrap()
            .contains(&"Stale".to_string()));
    }

    #[tokio::test]
    async fn test_reingesting_shorter_document_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("course.txt");
        std::fs::write(&path, DOC).unwrap();

        let rag = system();
        let (_, first) = rag.add_course_document(&path).await;
        assert!(first >= 2);
        assert!(!rag.store().search("collaborators", None, None, None).await.is_empty());

        std::fs::write(
            &path,
            "Course Title: Intro to Testing\n\nLesson 0: Welcome\nTesting keeps software honest.\n",
        )
        .unwrap();
        let (course, second) = rag.add_course_document(&path).await;
        assert_eq!(course.unwrap().lessons.len(), 1);
        assert_eq!(second, 1);
        assert!(rag.store().search("collaborators", None, None, None).await.is_empty());
        assert_eq!(rag.store().get_course_count().await.unwrap(), 1);
    }
}
