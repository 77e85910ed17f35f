//! Financial Research Agent
//!
//! Answers free-text financial questions with a structured, validated
//! analysis:
//! - Categorizes the question (stock, news, portfolio, general)
//! - Gathers intent-specific facts from pluggable providers, concurrently
//! - Composes a bounded, fingerprinted prompt
//! - Calls the language model with low-variance decoding and transport retries
//! - Validates the output (parse, schema, facts, moderation) with a bounded
//!   correction budget, falling back to a fixed safe response
//!
//! PIPELINE:
//! QUERY → CATEGORIZE → ASSEMBLE → COMPOSE → COMPLETE → VALIDATE → RESPOND

pub mod agent;
pub mod api;
pub mod classifier;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod guardrail;
pub mod llm;
pub mod models;
pub mod moderation;
pub mod prompt;
pub mod providers;

pub use error::Result;

// Re-export common types
pub use agent::ResearchAgent;
pub use classifier::{Categorizer, KeywordCategorizer, ModelCategorizer};
pub use config::Settings;
pub use models::*;
