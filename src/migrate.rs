//! Schema for the course catalog and course content collections.
//!
//! Every statement is idempotent, so the store runs this on each open.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Course catalog: one row per course, lessons kept as JSON.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS courses (
            title TEXT PRIMARY KEY,
            instructor TEXT,
            course_link TEXT,
            lessons_json TEXT NOT NULL DEFAULT '[]',
            lesson_count INTEGER NOT NULL DEFAULT 0,
            embedding BLOB,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Course content: chunk text plus an optional embedding.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            course_title TEXT NOT NULL,
            lesson_number INTEGER,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB,
            UNIQUE(course_title, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                content
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_course ON chunks(course_title, lesson_number)")
        .execute(pool)
        .await?;

    Ok(())
}
