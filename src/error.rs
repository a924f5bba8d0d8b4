//! Error types for hyperlocal.

use thiserror::Error;

/// Common error type for ingestion, storage and feed resolution.
#[derive(Error, Debug)]
pub enum NewsError {
    /// The remote endpoint could not be reached or answered with a failure status.
    #[error("source unreachable: {url}: {reason}")]
    SourceUnreachable { url: String, reason: String },

    /// The endpoint answered but the body is not a feed we can read.
    #[error("feed parse error: {url}: {reason}")]
    FeedParse { url: String, reason: String },

    /// The source type has no poller.
    #[error("unsupported source type '{0}'")]
    UnsupportedSource(String),

    #[error("user {0} not found")]
    UserNotFound(i64),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Database error, converted from sqlx.
    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for NewsError {
    fn from(e: sqlx::Error) -> Self {
        NewsError::Database(e.to_string())
    }
}

impl NewsError {
    /// Per-source failures are transient; the next cycle retries them.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NewsError::SourceUnreachable { .. } | NewsError::FeedParse { .. }
        )
    }
}

/// Result type alias for hyperlocal operations.
pub type Result<T> = std::result::Result<T, NewsError>;
