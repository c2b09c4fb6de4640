//! devtrace — a localhost development-activity recorder.
//!
//! Watches registered project directories, records file changes as
//! typed events with unified diffs, exposes them over JSON/HTTP with a
//! live push channel, and optionally correlates external AI-conversation
//! records and architecture-impact analysis through an LLM.

pub mod architecture;
pub mod baseline;
pub mod broadcaster;
pub mod config;
pub mod correlator;
pub mod error;
pub mod http;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod query;
pub mod store;
pub mod supervisor;
pub mod watcher;

pub use config::Config;
pub use error::{DevtraceError, Result};
