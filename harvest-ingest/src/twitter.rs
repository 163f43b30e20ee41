//! [`Source`] over the X profile timelines.
//!
//! Category labels map onto [`TimelineKind`]; each tweet becomes a
//! [`SourceItem`] whose fields are the serialized [`TweetRecord`] minus its id.
use crate::{
    source::{Source, SubjectHandle},
    Category, Cursor, Page, SourceItem,
};
use anyhow::{anyhow, Context, Result};
use harvest_social::twitter::{TimelineKind, TweetRecord, TwitterApi};
use serde_json::Value;

#[derive(Clone)]
pub struct TwitterSource {
    api: TwitterApi,
}

impl TwitterSource {
    pub fn new(api: TwitterApi) -> Self {
        Self { api }
    }
}

fn to_item(tweet: TweetRecord) -> Result<SourceItem> {
    let id = tweet.id.clone();
    match serde_json::to_value(tweet)? {
        Value::Object(mut fields) => {
            fields.remove("id");
            Ok(SourceItem { id, fields })
        }
        other => Err(anyhow!("tweet {id} serialized to non-object: {other}")),
    }
}

#[async_trait::async_trait]
impl Source for TwitterSource {
    async fn resolve_subject(&self, name: &str) -> Result<SubjectHandle> {
        let user = self.api.user_by_screen_name(name).await?;
        Ok(SubjectHandle {
            name: name.to_string(),
            id: user.id,
        })
    }

    async fn fetch_page(
        &self,
        subject: &SubjectHandle,
        category: &Category,
        page_size: usize,
        cursor: Option<&Cursor>,
    ) -> Result<Page> {
        let kind: TimelineKind = category.0.parse()?;
        let count = u32::try_from(page_size).context("page size does not fit the api count")?;
        let page = self
            .api
            .user_timeline(&subject.id, kind, count, cursor.map(|c| c.0.as_str()))
            .await?;

        let items = page
            .tweets
            .into_iter()
            .map(to_item)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page {
            items,
            next_cursor: page.next_cursor.map(Cursor),
        })
    }
}
