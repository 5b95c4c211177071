//! Process configuration from the environment.
//!
//! Every knob has a default suitable for a local single-host
//! deployment; production overrides come from the environment (or a
//! `.env` file loaded at startup).

use std::path::PathBuf;

/// Resolved configuration for one jimaku process.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// SQLite database file (tasks, edges, cache, queue).
    pub db_path: PathBuf,
    /// Blob bucket root directory.
    pub blob_root: PathBuf,
    /// Scratch directory for downloads and materialized blobs.
    pub work_dir: PathBuf,
    pub http_port: u16,
    /// OpenAI-compatible endpoint base URL.
    pub llm_api_base: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    /// Optional speech model cache directory.
    pub model_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Read configuration from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            db_path: path_var("JIMAKU_DB_PATH", "./data/jimaku.db"),
            blob_root: path_var("JIMAKU_BLOB_ROOT", "./data/blobs"),
            work_dir: path_var("JIMAKU_WORK_DIR", "./workspace"),
            http_port: std::env::var("JIMAKU_HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            llm_api_base: std::env::var("LLM_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            llm_api_key: std::env::var("LLM_API_KEY").ok(),
            llm_model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            model_dir: std::env::var("JIMAKU_MODEL_DIR").ok().map(PathBuf::from),
        }
    }
}

fn path_var(name: &str, default: &str) -> PathBuf {
    std::env::var(name).map_or_else(|_| PathBuf::from(default), PathBuf::from)
}
