//! Error types for the orchestrator core

use thiserror::Error;

/// Result type alias using the core error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for orchestration operations
#[derive(Debug, Error)]
pub enum Error {
    /// Workspace or config problems detected before scheduling
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A filter expression matched no packages
    #[error("filter error: {0}")]
    Filter(String),

    /// The dependency graph cannot be ordered
    #[error("graph error: {0}")]
    Graph(String),

    /// A package script exited non-zero; aborts the whole run
    #[error("script '{script}' failed in '{package}' with exit code {exit_code}")]
    ScriptExecution {
        package: String,
        script: String,
        exit_code: i32,
    },

    /// Cache store failure; callers degrade this to a cache miss
    #[error("cache store error: {0}")]
    Cache(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Git query failure
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// Invalid glob in a filter token
    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    /// A scheduler worker panicked or was cancelled
    #[error("worker failure: {0}")]
    Join(#[from] tokio::task::JoinError),
}
