//! In-memory [`VectorStore`] for tests and throwaway servers.
//!
//! Uses `Vec`s behind `std::sync::RwLock`. Semantic ranking is brute-force
//! cosine; keyword ranking counts query-token occurrences per chunk.

use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::{cosine_similarity, embed_in_batches, embed_query, EmbeddingProvider};
use crate::models::{Course, CourseChunk, SearchHit};

use super::{
    match_course_title_by_tokens, match_course_title_exact, score_to_distance, tokenize,
    ChunkFilter, VectorStore,
};

struct StoredCourse {
    course: Course,
    vector: Option<Vec<f32>>,
}

struct StoredChunk {
    chunk: CourseChunk,
    vector: Option<Vec<f32>>,
}

pub struct InMemoryStore {
    courses: RwLock<Vec<StoredCourse>>,
    chunks: RwLock<Vec<StoredChunk>>,
    embedder: Arc<dyn EmbeddingProvider>,
    max_results: usize,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

impl InMemoryStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, max_results: usize) -> Self {
        Self {
            courses: RwLock::new(Vec::new()),
            chunks: RwLock::new(Vec::new()),
            embedder,
            max_results,
        }
    }

    fn keyword_rank(&self, query: &str, filter: &ChunkFilter) -> Result<Vec<SearchHit>> {
        let terms: HashSet<String> = tokenize(query).into_iter().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = read(&self.chunks)?;
        Ok(chunks
            .iter()
            .filter(|s| filter.matches(&s.chunk))
            .filter_map(|s| {
                let score = tokenize(&s.chunk.content)
                    .iter()
                    .filter(|t| terms.contains(*t))
                    .count();
                (score > 0).then(|| hit(&s.chunk, score_to_distance(score as f64)))
            })
            .collect())
    }

    fn semantic_rank(&self, query_vec: &[f32], filter: &ChunkFilter) -> Result<Vec<SearchHit>> {
        let chunks = read(&self.chunks)?;
        Ok(chunks
            .iter()
            .filter(|s| filter.matches(&s.chunk))
            .filter_map(|s| {
                let v = s.vector.as_ref()?;
                let sim = cosine_similarity(query_vec, v);
                Some(hit(&s.chunk, 1.0 - sim as f64))
            })
            .collect())
    }
}

fn hit(chunk: &CourseChunk, distance: f64) -> SearchHit {
    SearchHit {
        content: chunk.content.clone(),
        course_title: chunk.course_title.clone(),
        lesson_number: chunk.lesson_number,
        chunk_index: chunk.chunk_index,
        distance,
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn max_results(&self) -> usize {
        self.max_results
    }

    async fn add_course_metadata(&self, course: &Course) -> Result<()> {
        let vector = if self.embedder.is_enabled() {
            Some(embed_query(self.embedder.as_ref(), &course.title).await?)
        } else {
            None
        };

        let mut courses = write(&self.courses)?;
        let stored = StoredCourse {
            course: course.clone(),
            vector,
        };
        match courses.iter_mut().find(|c| c.course.title == course.title) {
            Some(existing) => *existing = stored,
            None => courses.push(stored),
        }
        Ok(())
    }

    async fn add_course_content(&self, chunks: &[CourseChunk]) -> Result<()> {
        let vectors = if self.embedder.is_enabled() {
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            Some(embed_in_batches(self.embedder.as_ref(), &texts, 64).await?)
        } else {
            None
        };

        let titles: HashSet<&str> = chunks.iter().map(|c| c.course_title.as_str()).collect();
        let mut stored = write(&self.chunks)?;
        stored.retain(|s| !titles.contains(s.chunk.course_title.as_str()));
        for (i, chunk) in chunks.iter().enumerate() {
            stored.push(StoredChunk {
                chunk: chunk.clone(),
                vector: vectors.as_ref().map(|v| v[i].clone()),
            });
        }
        Ok(())
    }

    async fn delete_course_content(&self, course_title: &str) -> Result<()> {
        write(&self.chunks)?.retain(|s| s.chunk.course_title != course_title);
        Ok(())
    }

    async fn query_chunks(
        &self,
        query: &str,
        filter: &ChunkFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let mut hits = if self.embedder.is_enabled() {
            let query_vec = embed_query(self.embedder.as_ref(), query).await?;
            self.semantic_rank(&query_vec, filter)?
        } else {
            self.keyword_rank(query, filter)?
        };
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn resolve_course_name(&self, course_name: &str) -> Result<Option<String>> {
        let titles = self.get_existing_course_titles().await?;
        if let Some(title) = match_course_title_exact(course_name, &titles) {
            return Ok(Some(title));
        }
        if !self.embedder.is_enabled() {
            return Ok(match_course_title_by_tokens(course_name, &titles));
        }

        let query_vec = embed_query(self.embedder.as_ref(), course_name).await?;
        let courses = read(&self.courses)?;
        Ok(courses
            .iter()
            .filter_map(|c| {
                let v = c.vector.as_ref()?;
                Some((c.course.title.clone(), cosine_similarity(&query_vec, v)))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(title, _)| title))
    }

    async fn clear_all_data(&self) -> Result<()> {
        write(&self.courses)?.clear();
        write(&self.chunks)?.clear();
        Ok(())
    }

    async fn get_existing_course_titles(&self) -> Result<Vec<String>> {
        Ok(read(&self.courses)?
            .iter()
            .map(|c| c.course.title.clone())
            .collect())
    }

    async fn get_all_courses_metadata(&self) -> Result<Vec<Course>> {
        Ok(read(&self.courses)?
            .iter()
            .map(|c| c.course.clone())
            .collect())
    }

    async fn get_course(&self, title: &str) -> Result<Option<Course>> {
        Ok(read(&self.courses)?
            .iter()
            .find(|c| c.course.title == title)
            .map(|c| c.course.clone()))
    }
}
