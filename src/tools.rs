//! Tools the model can call while answering.
//!
//! | Tool | Input | Output |
//! |------|-------|--------|
//! | `search_course_content` | `query`, optional `course_name` / `lesson_number` | matching chunks, one block per hit |
//! | `get_course_outline` | `course_name` | title, link, instructor and lesson list |
//!
//! Each tool remembers the [`Source`]s behind its last answer so the caller
//! can show citations. A [`ToolManager`] is built per query, which keeps
//! citations from concurrent queries apart.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use crate::anthropic::ToolDefinition;
use crate::models::{SearchResults, Source};
use crate::store::VectorStore;

#[async_trait]
pub trait Tool: Send + Sync {
    /// Identifier the model uses to call the tool.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool input (`type: "object"`).
    fn input_schema(&self) -> Value;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }

    /// Runs the tool. The returned text is handed to the model verbatim.
    async fn execute(&self, input: Value) -> Result<String>;

    fn last_sources(&self) -> Vec<Source> {
        Vec::new()
    }

    fn reset_sources(&self) {}
}

/// Citations recorded by a tool's most recent run.
#[derive(Default)]
struct SourceLog(Mutex<Vec<Source>>);

impl SourceLog {
    fn replace(&self, sources: Vec<Source>) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = sources;
    }

    fn get(&self) -> Vec<Source> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Course search
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct SearchInput {
    query: String,
    #[serde(default)]
    course_name: Option<String>,
    #[serde(default)]
    lesson_number: Option<i64>,
}

pub struct CourseSearchTool {
    store: Arc<dyn VectorStore>,
    limit: Option<usize>,
    sources: SourceLog,
}

impl CourseSearchTool {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            limit: None,
            sources: SourceLog::default(),
        }
    }

    /// Overrides the store's default hit count.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit.max(1));
        self
    }

    /// Runs a search and formats it the way the model sees it.
    pub async fn search(
        &self,
        query: &str,
        course_name: Option<&str>,
        lesson_number: Option<i64>,
    ) -> String {
        let results = self
            .store
            .search(query, course_name, lesson_number, self.limit)
            .await;

        if let Some(error) = results.error {
            self.sources.replace(Vec::new());
            return error;
        }

        if results.is_empty() {
            self.sources.replace(Vec::new());
            let mut msg = String::from("No relevant content found");
            if let Some(course) = course_name {
                msg.push_str(&format!(" in course '{}'", course));
            }
            if let Some(lesson) = lesson_number {
                msg.push_str(&format!(" in lesson {}", lesson));
            }
            msg.push('.');
            return msg;
        }

        self.format_results(&results).await
    }

    async fn format_results(&self, results: &SearchResults) -> String {
        let mut blocks = Vec::with_capacity(results.hits.len());
        let mut sources = Vec::with_capacity(results.hits.len());

        for hit in &results.hits {
            let label = match hit.lesson_number {
                Some(n) => format!("{} - Lesson {}", hit.course_title, n),
                None => hit.course_title.clone(),
            };
            blocks.push(format!("[{}]\n{}", label, hit.content));

            let link = match hit.lesson_number {
                Some(n) => self.store.get_lesson_link(&hit.course_title, n).await,
                None => self.store.get_course_link(&hit.course_title).await,
            };
            let link = link.unwrap_or_else(|e| {
                tracing::warn!(course = %hit.course_title, error = %e, "link lookup failed");
                None
            });
            sources.push(Source { text: label, link });
        }

        self.sources.replace(sources);
        blocks.join("\n\n")
    }
}

#[async_trait]
impl Tool for CourseSearchTool {
    fn name(&self) -> &str {
        "search_course_content"
    }

    fn description(&self) -> &str {
        "Search course materials with smart course name matching and lesson filtering"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to search for in the course content"
                },
                "course_name": {
                    "type": "string",
                    "description": "Course title (partial matches work, e.g. 'MCP', 'Introduction')"
                },
                "lesson_number": {
                    "type": "integer",
                    "description": "Specific lesson number to search within (e.g. 1, 2, 3)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let input: SearchInput = serde_json::from_value(input)
            .context("search_course_content expects {query, course_name?, lesson_number?}")?;
        Ok(self
            .search(
                &input.query,
                input.course_name.as_deref(),
                input.lesson_number,
            )
            .await)
    }

    fn last_sources(&self) -> Vec<Source> {
        self.sources.get()
    }

    fn reset_sources(&self) {
        self.sources.replace(Vec::new());
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Course outline
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct OutlineInput {
    course_name: String,
}

pub struct CourseOutlineTool {
    store: Arc<dyn VectorStore>,
    sources: SourceLog,
}

impl CourseOutlineTool {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            sources: SourceLog::default(),
        }
    }

    pub async fn outline(&self, course_name: &str) -> Result<String> {
        let not_found = || format!("No course found matching '{}'", course_name);

        let Some(title) = self.store.resolve_course_name(course_name).await? else {
            self.sources.replace(Vec::new());
            return Ok(not_found());
        };
        let Some(course) = self.store.get_course(&title).await? else {
            self.sources.replace(Vec::new());
            return Ok(not_found());
        };

        let mut out = format!("Course: {}\n", course.title);
        if let Some(link) = &course.course_link {
            out.push_str(&format!("Course Link: {}\n", link));
        }
        if let Some(instructor) = &course.instructor {
            out.push_str(&format!("Instructor: {}\n", instructor));
        }
        out.push_str(&format!("\nLessons ({} total):\n", course.lessons.len()));
        for lesson in &course.lessons {
            out.push_str(&format!("Lesson {}: {}\n", lesson.lesson_number, lesson.title));
        }

        self.sources.replace(vec![Source {
            text: course.title.clone(),
            link: course.course_link.clone(),
        }]);
        Ok(out.trim_end().to_string())
    }
}

#[async_trait]
impl Tool for CourseOutlineTool {
    fn name(&self) -> &str {
        "get_course_outline"
    }

    fn description(&self) -> &str {
        "Get a course outline: title, course link, instructor and the numbered list of lessons"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "course_name": {
                    "type": "string",
                    "description": "Course title (partial matches work)"
                }
            },
            "required": ["course_name"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let input: OutlineInput = serde_json::from_value(input)
            .context("get_course_outline expects {course_name}")?;
        self.outline(&input.course_name).await
    }

    fn last_sources(&self) -> Vec<Source> {
        self.sources.get()
    }

    fn reset_sources(&self) {
        self.sources.replace(Vec::new());
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Holds the tools offered to the model for one conversation turn.
#[derive(Default)]
pub struct ToolManager {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager with the search and outline tools over `store`.
    pub fn with_course_tools(store: Arc<dyn VectorStore>) -> Self {
        let mut manager = Self::new();
        manager.register_tool(Box::new(CourseSearchTool::new(store.clone())));
        manager.register_tool(Box::new(CourseOutlineTool::new(store)));
        manager
    }

    /// Registers a tool. A tool with the same name is replaced in place.
    pub fn register_tool(&mut self, tool: Box<dyn Tool>) {
        match self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            Some(existing) => *existing = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn get_tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Runs a tool, keeping failures distinguishable for `is_error` results.
    pub async fn try_execute_tool(&self, name: &str, input: Value) -> Result<String> {
        let tool = self
            .find(name)
            .ok_or_else(|| anyhow::anyhow!("Tool '{}' not found", name))?;
        tool.execute(input)
            .await
            .map_err(|e| anyhow::anyhow!("Tool '{}' failed: {:#}", name, e))
    }

    /// Runs a tool and returns its output or the error text.
    pub async fn execute_tool(&self, name: &str, input: Value) -> String {
        self.try_execute_tool(name, input)
            .await
            .unwrap_or_else(|e| e.to_string())
    }

    /// Sources from the first tool that recorded any.
    pub fn get_last_sources(&self) -> Vec<Source> {
        self.tools
            .iter()
            .map(|t| t.last_sources())
            .find(|s| !s.is_empty())
            .unwrap_or_default()
    }

    pub fn reset_sources(&self) {
        for tool in &self.tools {
            tool.reset_sources();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledProvider;
    use crate::models::{Course, CourseChunk, Lesson};
    use crate::store::InMemoryStore;

    const TITLE: &str = "Building Towards Computer Use with Anthropic";

    async fn populated_store() -> Arc<dyn VectorStore> {
        let store = InMemoryStore::new(Arc::new(DisabledProvider), 5);
        store
            .add_course_metadata(&Course {
                title: TITLE.to_string(),
                course_link: Some("https://example.com/course".to_string()),
                instructor: Some("Colt Steele".to_string()),
                lessons: vec![
                    Lesson {
                        lesson_number: 0,
                        title: "Introduction".to_string(),
                        lesson_link: Some("https://example.com/lesson/0".to_string()),
                    },
                    Lesson {
                        lesson_number: 1,
                        title: "API Basics".to_string(),
                        lesson_link: Some("https://example.com/lesson/1".to_string()),
                    },
                ],
            })
            .await
            .unwrap();
        store
            .add_course_content(&[
                CourseChunk {
                    content: "Course Building Towards Computer Use with Anthropic Lesson 0 content: Welcome to the course.".to_string(),
                    course_title: TITLE.to_string(),
                    lesson_number: Some(0),
                    chunk_index: 0,
                },
                CourseChunk {
                    content: "Course Building Towards Computer Use with Anthropic Lesson 1 content: Make basic API calls to Claude.".to_string(),
                    course_title: TITLE.to_string(),
                    lesson_number: Some(1),
                    chunk_index: 1,
                },
            ])
            .await
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_search_formats_hits_and_records_sources() {
        let tool = CourseSearchTool::new(populated_store().await);
        let out = tool
            .execute(json!({"query": "API calls", "lesson_number": 1}))
            .await
            .unwrap();

        assert!(out.starts_with(&format!("[{} - Lesson 1]\n", TITLE)));
        assert!(out.contains("basic API calls"));
        assert_eq!(
            tool.last_sources(),
            vec![Source {
                text: format!("{} - Lesson 1", TITLE),
                link: Some("https://example.com/lesson/1".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn test_search_empty_message_names_filters() {
        let tool = CourseSearchTool::new(populated_store().await);
        let out = tool
            .search("quantum", Some("Computer Use"), Some(0))
            .await;
        assert_eq!(
            out,
            "No relevant content found in course 'Computer Use' in lesson 0."
        );
        assert!(tool.last_sources().is_empty());

        let out = tool.search("quantum", None, None).await;
        assert_eq!(out, "No relevant content found.");
    }

    #[tokio::test]
    async fn test_search_unknown_course() {
        let tool = CourseSearchTool::new(populated_store().await);
        let out = tool.search("API", Some("Nonexistent Course XYZ"), None).await;
        assert_eq!(out, "No course found matching 'Nonexistent Course XYZ'");
    }

    #[tokio::test]
    async fn test_search_rejects_missing_query() {
        let tool = CourseSearchTool::new(populated_store().await);
        assert!(tool.execute(json!({"course_name": "x"})).await.is_err());
    }

    #[tokio::test]
    async fn test_outline_lists_lessons() {
        let tool = CourseOutlineTool::new(populated_store().await);
        let out = tool
            .execute(json!({"course_name": "computer use"}))
            .await
            .unwrap();
        assert_eq!(
            out,
            format!(
                "Course: {}\nCourse Link: https://example.com/course\nInstructor: Colt Steele\n\nLessons (2 total):\nLesson 0: Introduction\nLesson 1: API Basics",
                TITLE
            )
        );
        assert_eq!(tool.last_sources().len(), 1);

        let out = tool.outline("Cooking").await.unwrap();
        assert_eq!(out, "No course found matching 'Cooking'");
    }

    #[tokio::test]
    async fn test_manager_definitions_and_errors() {
        let manager = ToolManager::with_course_tools(populated_store().await);
        let names: Vec<String> = manager
            .get_tool_definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["search_course_content", "get_course_outline"]);

        assert_eq!(
            manager.execute_tool("nope", json!({})).await,
            "Tool 'nope' not found"
        );
        let err = manager.execute_tool("get_course_outline", json!({})).await;
        assert!(err.starts_with("Tool 'get_course_outline' failed:"), "{}", err);
    }

    #[tokio::test]
    async fn test_manager_sources_lifecycle() {
        let manager = ToolManager::with_course_tools(populated_store().await);
        assert!(manager.get_last_sources().is_empty());

        manager
            .execute_tool("search_course_content", json!({"query": "welcome"}))
            .await;
        let sources = manager.get_last_sources();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].text, format!("{} - Lesson 0", TITLE));

        manager.reset_sources();
        assert!(manager.get_last_sources().is_empty());
    }
}
