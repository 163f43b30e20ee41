use crate::Category;
use thiserror::Error;

/// Subject-scoped failures raised by the pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to resolve subject `{subject}`: {source:#}")]
    Resolve {
        subject: String,
        source: anyhow::Error,
    },

    #[error("fetching {category} for `{subject}` failed: {source:#}")]
    Fetch {
        subject: String,
        category: Category,
        source: anyhow::Error,
    },

    #[error("storing item {id} ({category}) for `{subject}` failed: {source:#}")]
    Store {
        subject: String,
        category: Category,
        id: String,
        source: anyhow::Error,
    },

    #[error("item {id} ({category}) for `{subject}` could not be encoded: {source}")]
    Encode {
        subject: String,
        category: Category,
        id: String,
        source: serde_json::Error,
    },

    #[error("ingestion cancelled")]
    Cancelled,

    #[error("rate limiter is no longer running")]
    LimiterClosed,
}
