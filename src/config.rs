//! Process configuration from environment variables, `spec.md` §6.
//!
//! Follows the teacher's `R2Config::from_env` pattern in
//! `storage/r2.rs`: call `dotenvy::dotenv().ok()` first, then read each
//! variable with a typed default.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_matching_model: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub repo_path: Option<PathBuf>,
    pub max_bytes: u64,
    pub ignore_parts: Vec<String>,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
    /// Debounce window for coalescing rapid distinct writes to the same
    /// path. Default 0 ("no debounce") — `spec.md` §9 "Open question
    /// (coalescing policy)" resolves here rather than being guessed at.
    pub debounce_ms: u64,
    /// Worker pool size for Correlator / Architecture Tracker tasks.
    pub worker_concurrency: usize,
    /// Correlator candidate-event time window, `spec.md` §4.8 default 300.
    pub correlation_window_secs: i64,
    /// Per-call LLM timeout, `spec.md` §5 default 60.
    pub llm_timeout_secs: u64,
}

const DEFAULT_IGNORE_PARTS: &str = ".git,node_modules,.venv,.idea,.vscode,__pycache__";

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok().filter(|s| !s.is_empty());
        let openai_model =
            std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let openai_matching_model =
            std::env::var("OPENAI_MATCHING_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

        let port = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(4381);

        let db_path = std::env::var("DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("devtrace.db"));

        let repo_path = std::env::var("REPO_PATH").ok().map(PathBuf::from);

        let max_bytes = std::env::var("MAX_BYTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2_000_000);

        let ignore_parts = std::env::var("IGNORE_PARTS")
            .unwrap_or_else(|_| DEFAULT_IGNORE_PARTS.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let cors_enabled = std::env::var("CORS_ENABLED")
            .ok()
            .map(|s| s == "true" || s == "1")
            .unwrap_or(false);

        let cors_origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            openai_api_key,
            openai_model,
            openai_matching_model,
            port,
            db_path,
            repo_path,
            max_bytes,
            ignore_parts,
            cors_enabled,
            cors_origins,
            debounce_ms: std::env::var("DEBOUNCE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            worker_concurrency: std::env::var("WORKER_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(num_cpus::get),
            correlation_window_secs: std::env::var("CORRELATION_WINDOW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            llm_timeout_secs: std::env::var("LLM_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ignore_parts_match_spec() {
        let parts: Vec<&str> = DEFAULT_IGNORE_PARTS.split(',').collect();
        assert_eq!(
            parts,
            vec![".git", "node_modules", ".venv", ".idea", ".vscode", "__pycache__"]
        );
    }
}
