//! # Course RAG
//!
//! A retrieval-augmented chatbot over course materials.
//!
//! Course documents (plain text, PDF or DOCX) are parsed into a course
//! catalog and sentence-aware chunks, stored in SQLite with an FTS5 index
//! and optional embeddings, and searched by tools that Claude calls while
//! answering questions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Course docs │──▶│  Document   │──▶│    Store     │
//! │ txt/pdf/docx│   │  Processor  │   │ FTS5 + Vec   │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │ tools
//!                    ┌───────────┐    ┌──────┴───────┐
//!   question ──────▶ │ RagSystem │──▶ │ AiGenerator  │◀──▶ Anthropic API
//!                    └─────┬─────┘    └──────────────┘
//!                          ▼
//!                  CLI  /  HTTP API + frontend
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF/DOCX/text extraction |
//! | [`document`] | Course parsing and chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | Course catalog and content search |
//! | [`tools`] | Tools exposed to the model |
//! | [`anthropic`] | Messages API client |
//! | [`generator`] | Tool-calling answer loop |
//! | [`session`] | Conversation history |
//! | [`rag`] | Orchestration |
//! | [`server`] | HTTP API |
//! | [`cli`] | Command implementations |

pub mod anthropic;
pub mod cli;
pub mod config;
pub mod db;
pub mod document;
pub mod embedding;
pub mod extract;
pub mod generator;
pub mod migrate;
pub mod models;
pub mod rag;
pub mod server;
pub mod session;
pub mod store;
pub mod tools;
