use crate::{Category, Cursor, Page};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Source-side identity of a subject, returned by [`Source::resolve_subject`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectHandle {
    /// Name the subject was requested under.
    pub name: String,
    /// Remote id used for page fetches.
    pub id: String,
}

/// Remote paginated item provider.
///
/// Implementations make exactly one remote call per method invocation; pacing
/// is the caller's job.
#[async_trait::async_trait]
pub trait Source: Send + Sync {
    async fn resolve_subject(&self, name: &str) -> Result<SubjectHandle>;

    /// Fetch one page. `cursor == None` requests the first page. `page_size` is
    /// a request; the source may return fewer or more items.
    async fn fetch_page(
        &self,
        subject: &SubjectHandle,
        category: &Category,
        page_size: usize,
        cursor: Option<&Cursor>,
    ) -> Result<Page>;
}
