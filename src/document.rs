//! Course document parsing and sentence-aware chunking.
//!
//! A course document is plain text (or a PDF/DOCX reduced to text) with a
//! small header followed by lessons:
//!
//! ```text
//! Course Title: Building Towards Computer Use with Anthropic
//! Course Link: https://www.deeplearning.ai/short-courses/...
//! Course Instructor: Colt Steele
//!
//! Lesson 0: Introduction
//! Lesson Link: https://learn.deeplearning.ai/...
//! Welcome to ...
//! ```
//!
//! Each lesson body is split into sentences and packed into chunks of at
//! most `chunk_size` characters, with up to `chunk_overlap` characters of
//! whole trailing sentences repeated at the start of the following chunk.

use anyhow::{Context, Result};
use std::path::Path;

use crate::extract::read_document;
use crate::models::{Course, CourseChunk, Lesson};

/// Header lines are only looked for within this many lines after the title.
const HEADER_SCAN_LINES: usize = 3;

pub struct DocumentProcessor {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl DocumentProcessor {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    pub fn read_file(&self, path: &Path) -> Result<String> {
        read_document(path).with_context(|| format!("Failed to read {}", path.display()))
    }

    /// Splits `text` into overlapping, sentence-aligned chunks.
    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let sentences = split_sentences(&normalized);

        let mut chunks = Vec::new();
        let mut i = 0;

        while i < sentences.len() {
            let mut size = 0;
            let mut end = i;
            while end < sentences.len() {
                let space = usize::from(end > i);
                let addition = char_len(sentences[end]) + space;
                if size + addition > self.chunk_size && end > i {
                    break;
                }
                size += addition;
                end += 1;
            }

            let current = &sentences[i..end];
            chunks.push(current.join(" "));

            if end >= sentences.len() {
                break;
            }

            // Walk back over whole sentences that fit in the overlap budget.
            let mut overlap_size = 0;
            let mut overlap_sentences = 0;
            for (k, sentence) in current.iter().enumerate().rev() {
                let len = char_len(sentence) + usize::from(k + 1 < current.len());
                if overlap_size + len > self.chunk_overlap {
                    break;
                }
                overlap_size += len;
                overlap_sentences += 1;
            }

            i = (end - overlap_sentences).max(i + 1);
        }

        chunks
    }

    /// Reads and parses a course document into its course record and chunks.
    pub fn process_course_document(&self, path: &Path) -> Result<(Course, Vec<CourseChunk>)> {
        let content = self.read_file(path)?;
        let fallback_title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Untitled course")
            .to_string();
        Ok(self.parse_course(&content, &fallback_title))
    }

    /// Parses course text. `fallback_title` is used when the header has no title.
    pub fn parse_course(&self, content: &str, fallback_title: &str) -> (Course, Vec<CourseChunk>) {
        let lines: Vec<&str> = content.trim().lines().collect();

        let mut title = None;
        let mut course_link = None;
        let mut instructor = None;
        let mut body_start = 0;

        if let Some(first) = lines.first() {
            if let Some(t) = strip_label(first, "Course Title:") {
                title = Some(t.to_string());
                body_start = 1;
            }
        }
        for (idx, line) in lines
            .iter()
            .enumerate()
            .skip(body_start)
            .take(HEADER_SCAN_LINES)
        {
            if let Some(link) = strip_label(line, "Course Link:") {
                course_link = Some(link.to_string());
                body_start = idx + 1;
            } else if let Some(name) = strip_label(line, "Course Instructor:") {
                if !name.eq_ignore_ascii_case("unknown") {
                    instructor = Some(name.to_string());
                }
                body_start = idx + 1;
            } else if title.is_none() {
                if let Some(t) = strip_label(line, "Course Title:") {
                    title = Some(t.to_string());
                    body_start = idx + 1;
                }
            }
        }

        let mut course = Course {
            title: title.unwrap_or_else(|| fallback_title.to_string()),
            course_link,
            instructor,
            lessons: Vec::new(),
        };

        let mut chunks = Vec::new();
        let mut current: Option<Lesson> = None;
        let mut lesson_lines: Vec<&str> = Vec::new();
        let mut saw_lesson = false;

        let mut idx = body_start;
        while idx < lines.len() {
            let line = lines[idx];
            if let Some((number, lesson_title)) = parse_lesson_header(line) {
                if let Some(lesson) = current.take() {
                    self.finish_lesson(&mut course, &mut chunks, lesson, &lesson_lines);
                }
                saw_lesson = true;
                lesson_lines.clear();

                let mut lesson_link = None;
                if let Some(next) = lines.get(idx + 1) {
                    if let Some(link) = strip_label(next, "Lesson Link:") {
                        lesson_link = Some(link.to_string());
                        idx += 1;
                    }
                }
                current = Some(Lesson {
                    lesson_number: number,
                    title: lesson_title.to_string(),
                    lesson_link,
                });
            } else if saw_lesson || !line.trim().is_empty() {
                lesson_lines.push(line);
            }
            idx += 1;
        }

        match current {
            Some(lesson) => self.finish_lesson(&mut course, &mut chunks, lesson, &lesson_lines),
            None if !saw_lesson => {
                let text = lesson_lines.join("\n");
                for piece in self.chunk_text(&text) {
                    let chunk_index = chunks.len() as i64;
                    chunks.push(CourseChunk {
                        content: piece,
                        course_title: course.title.clone(),
                        lesson_number: None,
                        chunk_index,
                    });
                }
            }
            None => {}
        }

        (course, chunks)
    }

    fn finish_lesson(
        &self,
        course: &mut Course,
        chunks: &mut Vec<CourseChunk>,
        lesson: Lesson,
        lines: &[&str],
    ) {
        let text = lines.join("\n");
        let number = lesson.lesson_number;
        course.lessons.push(lesson);

        if text.trim().is_empty() {
            return;
        }

        for (i, piece) in self.chunk_text(&text).into_iter().enumerate() {
            let content = if i == 0 {
                format!("Course {} Lesson {} content: {}", course.title, number, piece)
            } else {
                piece
            };
            let chunk_index = chunks.len() as i64;
            chunks.push(CourseChunk {
                content,
                course_title: course.title.clone(),
                lesson_number: Some(number),
                chunk_index,
            });
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Case-insensitive `"Label: value"` match, returning the trimmed value.
fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let line = line.trim();
    let head = line.get(..label.len())?;
    if !head.eq_ignore_ascii_case(label) {
        return None;
    }
    let value = line[label.len()..].trim();
    (!value.is_empty()).then_some(value)
}

/// Matches `Lesson <n>: <title>`.
fn parse_lesson_header(line: &str) -> Option<(i64, &str)> {
    let line = line.trim();
    let head = line.get(..6)?;
    if !head.eq_ignore_ascii_case("lesson") {
        return None;
    }
    let rest = &line[6..];
    let after_ws = rest.trim_start();
    if after_ws.len() == rest.len() {
        return None;
    }
    let digits_end = after_ws
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(after_ws.len());
    if digits_end == 0 {
        return None;
    }
    let number = after_ws[..digits_end].parse().ok()?;
    let title = after_ws[digits_end..].strip_prefix(':')?.trim();
    (!title.is_empty()).then_some((number, title))
}

/// Splits normalized text at `.`, `!` or `?` followed by a space and an
/// uppercase letter, leaving abbreviations such as `Dr.` and `e.g.` intact.
fn split_sentences(text: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0;

    for i in 0..chars.len() {
        let (pos, c) = chars[i];
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let (Some(&(_, space)), Some(&(_, next))) = (chars.get(i + 1), chars.get(i + 2)) else {
            continue;
        };
        if space != ' ' || !next.is_uppercase() {
            continue;
        }
        if is_abbreviation(&chars, i) {
            continue;
        }
        let end = pos + c.len_utf8();
        let sentence = text[start..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = end;
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "st", "jr", "sr", "vs", "etc", "e.g", "i.e", "inc", "ltd",
];

/// `i` indexes the terminal punctuation.
fn is_abbreviation(chars: &[(usize, char)], i: usize) -> bool {
    if chars[i].1 != '.' {
        return false;
    }
    let start = chars[..i]
        .iter()
        .rposition(|&(_, c)| !(c.is_alphabetic() || c == '.'))
        .map_or(0, |j| j + 1);
    let word: String = chars[start..i]
        .iter()
        .map(|&(_, c)| c)
        .collect::<String>()
        .trim_start_matches('.')
        .to_lowercase();
    ABBREVIATIONS.contains(&word.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    const COURSE: &str = "Course Title: Test Course
Course Link: https://example.com/course
Course Instructor: Test Instructor

Lesson 0: Introduction
Lesson Link: https://example.com/lesson/0
This is lesson content about APIs and tools. It has two sentences.

Lesson 1: Tool Use
Claude can call tools. Tools return results.
";

    #[test]
    fn test_split_sentences_basic() {
        let s = split_sentences("First one. Second one! Third one? done");
        assert_eq!(s, vec!["First one.", "Second one!", "Third one? done"]);
    }

    #[test]
    fn test_split_sentences_keeps_abbreviations() {
        let s = split_sentences("Ask Dr. Smith about it. Use tools, e.g. Search works.");
        assert_eq!(s, vec!["Ask Dr. Smith about it.", "Use tools, e.g. Search works."]);
    }

    #[test]
    fn test_short_capitalised_words_still_end_sentences() {
        let s = split_sentences("We use Go. Then we add Mrs. Jones. It is v2.0. Done.");
        assert_eq!(
            s,
            vec!["We use Go.", "Then we add Mrs. Jones.", "It is v2.0.", "Done."]
        );
    }

    #[test]
    fn test_chunk_small_text_single_chunk() {
        let p = DocumentProcessor::new(800, 100);
        let chunks = p.chunk_text("Hello world.   This is   short.");
        assert_eq!(chunks, vec!["Hello world. This is short.".to_string()]);
    }

    #[test]
    fn test_chunk_empty_text() {
        let p = DocumentProcessor::new(800, 100);
        assert!(p.chunk_text("   ").is_empty());
    }

    #[test]
    fn test_chunks_respect_size_and_overlap() {
        let p = DocumentProcessor::new(40, 20);
        let text = "Alpha beta gamma. Delta epsilon. Zeta eta theta. Iota kappa. Lambda mu.";
        let chunks = p.chunk_text(text);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 40, "chunk too long: {}", c);
        }
        // The last sentence of a chunk reappears at the start of the next when it fits.
        assert_eq!(chunks[0], "Alpha beta gamma. Delta epsilon.");
        assert!(chunks[1].starts_with("Delta epsilon."));
    }

    #[test]
    fn test_oversize_sentence_becomes_own_chunk() {
        let p = DocumentProcessor::new(10, 2);
        let chunks = p.chunk_text("This sentence is far too long. Ok.");
        assert_eq!(chunks[0], "This sentence is far too long.");
        assert_eq!(chunks[1], "Ok.");
    }

    #[test]
    fn test_chunking_always_advances() {
        let p = DocumentProcessor::new(30, 29);
        let text = (0..20)
            .map(|i| format!("Sentence number {}.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = p.chunk_text(&text);
        assert!(chunks.len() < 40);
        assert!(chunks.last().unwrap().ends_with("Sentence number 19."));
    }

    #[test]
    fn test_parse_course_header_and_lessons() {
        let p = DocumentProcessor::new(800, 100);
        let (course, chunks) = p.parse_course(COURSE, "fallback");

        assert_eq!(course.title, "Test Course");
        assert_eq!(course.course_link.as_deref(), Some("https://example.com/course"));
        assert_eq!(course.instructor.as_deref(), Some("Test Instructor"));
        assert_eq!(course.lessons.len(), 2);
        assert_eq!(
            course.lessons[0].lesson_link.as_deref(),
            Some("https://example.com/lesson/0")
        );
        assert_eq!(course.lessons[1].title, "Tool Use");
        assert_eq!(course.lessons[1].lesson_link, None);

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0]
            .content
            .starts_with("Course Test Course Lesson 0 content: This is lesson content"));
        assert_eq!(chunks[0].lesson_number, Some(0));
        assert_eq!(chunks[1].lesson_number, Some(1));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.course_title, "Test Course");
        }
    }

    #[test]
    fn test_parse_course_without_header_uses_fallback_title() {
        let p = DocumentProcessor::new(800, 100);
        let (course, chunks) = p.parse_course("Just some notes. Nothing else.", "notes");
        assert_eq!(course.title, "notes");
        assert!(course.lessons.is_empty());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].lesson_number, None);
    }

    #[test]
    fn test_unknown_instructor_is_none() {
        let p = DocumentProcessor::new(800, 100);
        let (course, _) = p.parse_course("Course Title: X\nCourse Instructor: Unknown\n", "f");
        assert_eq!(course.instructor, None);
    }

    #[test]
    fn test_parse_lesson_header() {
        assert_eq!(parse_lesson_header("Lesson 3: Caching"), Some((3, "Caching")));
        assert_eq!(parse_lesson_header("lesson  12:  Wrap up "), Some((12, "Wrap up")));
        assert_eq!(parse_lesson_header("Lesson: nope"), None);
        assert_eq!(parse_lesson_header("Lessons 1: nope"), None);
        assert_eq!(parse_lesson_header("Lesson 1 no colon"), None);
    }

    #[test]
    fn test_process_course_document_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_course.txt");
        std::fs::write(&path, COURSE).unwrap();

        let p = DocumentProcessor::new(800, 100);
        let (course, chunks) = p.process_course_document(&path).unwrap();
        assert_eq!(course.title, "Test Course");
        assert!(!chunks.is_empty());
    }
}
