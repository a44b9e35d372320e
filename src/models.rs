//! Core data types: courses, lessons, chunks, search hits and citations.
//!
//! These are plain records; the store decides how they are persisted.

use serde::{Deserialize, Serialize};

/// A lesson within a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub lesson_number: i64,
    pub title: String,
    pub lesson_link: Option<String>,
}

/// A course parsed from a course document. The title doubles as its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub title: String,
    pub course_link: Option<String>,
    pub instructor: Option<String>,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
}

impl Course {
    pub fn lesson(&self, lesson_number: i64) -> Option<&Lesson> {
        self.lessons
            .iter()
            .find(|l| l.lesson_number == lesson_number)
    }
}

/// A piece of course text indexed for retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseChunk {
    pub content: String,
    pub course_title: String,
    pub lesson_number: Option<i64>,
    pub chunk_index: i64,
}

impl CourseChunk {
    /// Stable id within the content collection.
    pub fn id(&self) -> String {
        format!("{}_{}", self.course_title.replace(' ', "_"), self.chunk_index)
    }
}

/// One retrieved chunk. Lower `distance` means a better match.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub content: String,
    pub course_title: String,
    pub lesson_number: Option<i64>,
    pub chunk_index: i64,
    pub distance: f64,
}

/// Result of a store search. `error` is set instead of returning `Err` so the
/// message can be handed back to the model verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    pub error: Option<String>,
}

impl SearchResults {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self { hits, error: None }
    }

    pub fn empty(error: impl Into<String>) -> Self {
        Self {
            hits: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// A citation shown next to an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub text: String,
    pub link: Option<String>,
}

/// Catalog summary returned by `GET /api/courses`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseAnalytics {
    pub total_courses: usize,
    pub course_titles: Vec<String>,
}
