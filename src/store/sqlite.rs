//! SQLite-backed store.
//!
//! Chunks live in `chunks` with an FTS5 mirror in `chunks_fts`; the course
//! catalog lives in `courses`. Embeddings, when a provider is enabled, are
//! stored as little-endian f32 BLOBs and ranked by brute-force cosine.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::Arc;

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, embed_in_batches, embed_query, vec_to_blob, EmbeddingProvider};
use crate::migrate;
use crate::models::{Course, CourseChunk, Lesson, SearchHit};

use super::{
    fts_query, match_course_title_by_tokens, match_course_title_exact, score_to_distance,
    ChunkFilter, VectorStore,
};

const DEFAULT_EMBED_BATCH: usize = 64;

pub struct SqliteStore {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
    max_results: usize,
    embed_batch_size: usize,
}

impl SqliteStore {
    /// Opens the database at `path` and applies the schema.
    pub async fn open(
        path: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        max_results: usize,
    ) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool, embedder, max_results))
    }

    /// Wraps an already-migrated pool.
    pub fn new(pool: SqlitePool, embedder: Arc<dyn EmbeddingProvider>, max_results: usize) -> Self {
        Self {
            pool,
            embedder,
            max_results,
            embed_batch_size: DEFAULT_EMBED_BATCH,
        }
    }

    pub fn with_embed_batch_size(mut self, batch_size: usize) -> Self {
        self.embed_batch_size = batch_size.max(1);
        self
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn keyword_chunks(
        &self,
        query: &str,
        filter: &ChunkFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let Some(expr) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT c.content, c.course_title, c.lesson_number, c.chunk_index,
                   chunks_fts.rank AS rank
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ?
              AND (? IS NULL OR c.course_title = ?)
              AND (? IS NULL OR c.lesson_number = ?)
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&expr)
        .bind(&filter.course_title)
        .bind(&filter.course_title)
        .bind(filter.lesson_number)
        .bind(filter.lesson_number)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                // FTS5 rank is negated BM25: more negative is better.
                let rank: f64 = row.get("rank");
                SearchHit {
                    content: row.get("content"),
                    course_title: row.get("course_title"),
                    lesson_number: row.get("lesson_number"),
                    chunk_index: row.get("chunk_index"),
                    distance: score_to_distance(-rank),
                }
            })
            .collect())
    }

    async fn semantic_chunks(
        &self,
        query: &str,
        filter: &ChunkFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let query_vec = embed_query(self.embedder.as_ref(), query).await?;

        let rows = sqlx::query(
            r#"
            SELECT content, course_title, lesson_number, chunk_index, embedding
            FROM chunks
            WHERE embedding IS NOT NULL
              AND (? IS NULL OR course_title = ?)
              AND (? IS NULL OR lesson_number = ?)
            "#,
        )
        .bind(&filter.course_title)
        .bind(&filter.course_title)
        .bind(filter.lesson_number)
        .bind(filter.lesson_number)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let sim = cosine_similarity(&query_vec, &blob_to_vec(&blob));
                SearchHit {
                    content: row.get("content"),
                    course_title: row.get("course_title"),
                    lesson_number: row.get("lesson_number"),
                    chunk_index: row.get("chunk_index"),
                    distance: 1.0 - sim as f64,
                }
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn nearest_course_by_embedding(&self, course_name: &str) -> Result<Option<String>> {
        let rows = sqlx::query("SELECT title, embedding FROM courses WHERE embedding IS NOT NULL")
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let query_vec = embed_query(self.embedder.as_ref(), course_name).await?;
        let mut best: Option<(String, f32)> = None;
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let sim = cosine_similarity(&query_vec, &blob_to_vec(&blob));
            if best.as_ref().map_or(true, |(_, b)| sim > *b) {
                best = Some((row.get("title"), sim));
            }
        }
        Ok(best.map(|(title, _)| title))
    }
}

async fn delete_course_chunks(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    course_title: &str,
) -> Result<()> {
    sqlx::query(
        "DELETE FROM chunks_fts WHERE chunk_id IN (SELECT id FROM chunks WHERE course_title = ?)",
    )
    .bind(course_title)
    .execute(&mut **tx)
    .await?;
    sqlx::query("DELETE FROM chunks WHERE course_title = ?")
        .bind(course_title)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn row_to_course(row: &sqlx::sqlite::SqliteRow) -> Result<Course> {
    let title: String = row.get("title");
    let lessons_json: String = row.get("lessons_json");
    let lessons: Vec<Lesson> = serde_json::from_str(&lessons_json)
        .with_context(|| format!("Corrupt lesson list for course '{}'", title))?;
    Ok(Course {
        title,
        instructor: row.get("instructor"),
        course_link: row.get("course_link"),
        lessons,
    })
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn max_results(&self) -> usize {
        self.max_results
    }

    async fn add_course_metadata(&self, course: &Course) -> Result<()> {
        let embedding = if self.embedder.is_enabled() {
            Some(vec_to_blob(
                &embed_query(self.embedder.as_ref(), &course.title).await?,
            ))
        } else {
            None
        };
        let lessons_json = serde_json::to_string(&course.lessons)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO courses (title, instructor, course_link, lessons_json, lesson_count, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(title) DO UPDATE SET
                instructor = excluded.instructor,
                course_link = excluded.course_link,
                lessons_json = excluded.lessons_json,
                lesson_count = excluded.lesson_count,
                embedding = excluded.embedding
            "#,
        )
        .bind(&course.title)
        .bind(&course.instructor)
        .bind(&course.course_link)
        .bind(&lessons_json)
        .bind(course.lessons.len() as i64)
        .bind(embedding)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn add_course_content(&self, chunks: &[CourseChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let vectors = if self.embedder.is_enabled() {
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            Some(embed_in_batches(self.embedder.as_ref(), &texts, self.embed_batch_size).await?)
        } else {
            None
        };

        let mut titles: Vec<&str> = chunks.iter().map(|c| c.course_title.as_str()).collect();
        titles.sort_unstable();
        titles.dedup();

        let mut tx = self.pool.begin().await?;
        for title in titles {
            delete_course_chunks(&mut tx, title).await?;
        }
        for (i, chunk) in chunks.iter().enumerate() {
            let id = chunk.id();
            let blob = vectors.as_ref().map(|v| vec_to_blob(&v[i]));

            sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO chunks (id, course_title, lesson_number, chunk_index, content, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&chunk.course_title)
            .bind(chunk.lesson_number)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(blob)
            .execute(&mut *tx)
            .await?;
            sqlx::query("INSERT INTO chunks_fts (chunk_id, content) VALUES (?, ?)")
                .bind(&id)
                .bind(&chunk.content)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::debug!(count = chunks.len(), "stored course chunks");
        Ok(())
    }

    async fn delete_course_content(&self, course_title: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        delete_course_chunks(&mut tx, course_title).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn query_chunks(
        &self,
        query: &str,
        filter: &ChunkFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        if self.embedder.is_enabled() {
            self.semantic_chunks(query, filter, limit).await
        } else {
            self.keyword_chunks(query, filter, limit).await
        }
    }

    async fn resolve_course_name(&self, course_name: &str) -> Result<Option<String>> {
        let titles = self.get_existing_course_titles().await?;
        if let Some(title) = match_course_title_exact(course_name, &titles) {
            return Ok(Some(title));
        }
        if self.embedder.is_enabled() {
            return self.nearest_course_by_embedding(course_name).await;
        }
        Ok(match_course_title_by_tokens(course_name, &titles))
    }

    async fn clear_all_data(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks_fts").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM courses").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_existing_course_titles(&self) -> Result<Vec<String>> {
        let titles: Vec<String> =
            sqlx::query_scalar("SELECT title FROM courses ORDER BY created_at, title")
                .fetch_all(&self.pool)
                .await?;
        Ok(titles)
    }

    async fn get_course_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM courses")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn get_all_courses_metadata(&self) -> Result<Vec<Course>> {
        let rows = sqlx::query(
            "SELECT title, instructor, course_link, lessons_json FROM courses ORDER BY created_at, title",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_course).collect()
    }

    async fn get_course(&self, title: &str) -> Result<Option<Course>> {
        let row = sqlx::query(
            "SELECT title, instructor, course_link, lessons_json FROM courses WHERE title = ?",
        )
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_course).transpose()
    }
}
