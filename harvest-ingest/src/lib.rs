//! Rate-limited, cursor-paginated ingestion of remote items into a document store.
//!
//! The moving parts:
//! - [`rate`]: a sliding-window limiter running as an actor, shared through
//!   cloneable [`rate::RateGate`] handles
//! - [`pipeline`]: the per-subject, per-category page loop that funnels every
//!   remote call and every store write through the gate
//! - [`source`] / [`store`]: the collaborator seams, with the X timeline
//!   adapter in [`twitter`] and SQLite/in-memory stores in [`store`]
pub mod actor;
pub mod error;
pub mod pipeline;
pub mod rate;
pub mod source;
pub mod store;
pub mod twitter;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub use error::IngestError;
pub use pipeline::{
    BatchReport, CategorySummary, IngestPipeline, PipelineOptions, StopReason, SubjectOutcome,
    SubjectStatus, SubjectSummary,
};
pub use rate::RateGate;
pub use source::{Source, SubjectHandle};
pub use store::{DocumentStore, MemoryStore, SqliteDocumentStore};
pub use twitter::TwitterSource;

/// Logical partition of a subject's items ("Tweets", "Replies", ...).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(pub String);

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque continuation token handed back by a [`Source`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

/// One item as returned by a source: its identity plus an uninterpreted field bag.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceItem {
    pub id: String,
    pub fields: Map<String, Value>,
}

/// One page of items. `next_cursor == None` means the source has no more data.
#[derive(Clone, Debug, Default)]
pub struct Page {
    pub items: Vec<SourceItem>,
    pub next_cursor: Option<Cursor>,
}

/// Normalized record persisted per fetched item.
///
/// Serializes flat: `id`, `category` and `scraped_at` sit next to the
/// source-defined fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IngestedItem {
    pub id: String,
    pub category: Category,
    pub scraped_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

const RESERVED_KEYS: [&str; 3] = ["id", "category", "scraped_at"];

impl IngestedItem {
    /// Attach pipeline metadata to a source item. Source fields that collide
    /// with the metadata keys are dropped.
    ///
    /// ```
    /// use chrono::Utc;
    /// use harvest_ingest::{Category, IngestedItem, SourceItem};
    /// use serde_json::{json, Map};
    ///
    /// let mut fields = Map::new();
    /// fields.insert("id".into(), json!("stale"));
    /// fields.insert("text".into(), json!("hello"));
    /// let item = IngestedItem::new(
    ///     SourceItem { id: "7".into(), fields },
    ///     &Category::from("Tweets"),
    ///     Utc::now(),
    /// );
    /// let doc = item.to_document().unwrap();
    /// assert_eq!(doc["id"], "7");
    /// assert_eq!(doc["category"], "Tweets");
    /// assert_eq!(doc["text"], "hello");
    /// ```
    pub fn new(item: SourceItem, category: &Category, scraped_at: DateTime<Utc>) -> Self {
        let SourceItem { id, mut fields } = item;
        for key in RESERVED_KEYS {
            fields.remove(key);
        }
        Self {
            id,
            category: category.clone(),
            scraped_at,
            fields,
        }
    }

    pub fn to_document(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
