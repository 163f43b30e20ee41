use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Profile timelines that can be paged through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimelineKind {
    Tweets,
    Replies,
    Media,
    Likes,
}

impl TimelineKind {
    pub const ALL: [TimelineKind; 4] = [
        TimelineKind::Tweets,
        TimelineKind::Replies,
        TimelineKind::Media,
        TimelineKind::Likes,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            TimelineKind::Tweets => "Tweets",
            TimelineKind::Replies => "Replies",
            TimelineKind::Media => "Media",
            TimelineKind::Likes => "Likes",
        }
    }
}

impl fmt::Display for TimelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown timeline `{0}` (expected Tweets, Replies, Media or Likes)")]
pub struct UnknownTimeline(pub String);

impl FromStr for TimelineKind {
    type Err = UnknownTimeline;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimelineKind::ALL
            .into_iter()
            .find(|k| k.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownTimeline(s.to_string()))
    }
}

/// Resolved profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwitterUser {
    pub id: String,
    pub screen_name: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// One page of a profile timeline.
#[derive(Debug, Clone, Default)]
pub struct TimelinePage {
    pub tweets: Vec<TweetRecord>,
    /// Bottom cursor; `None` when the timeline is exhausted.
    pub next_cursor: Option<String>,
}

// ---- GraphQL response shapes ----

#[derive(Debug, Clone, Deserialize)]
pub struct TweetResult {
    pub rest_id: String,
    #[serde(default)]
    pub legacy: Option<TweetLegacy>,
    #[serde(default)]
    pub core: Option<TweetCore>,
    #[serde(default)]
    pub views: Option<Views>,
    #[serde(default)]
    pub card: Option<serde_json::Value>,
    #[serde(default)]
    pub note_tweet: Option<NoteTweet>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TweetLegacy {
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub full_text: String,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub favorite_count: u64,
    #[serde(default)]
    pub retweet_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub quote_count: u64,
    #[serde(default)]
    pub is_quote_status: bool,
    #[serde(default)]
    pub possibly_sensitive: Option<bool>,
    #[serde(default)]
    pub in_reply_to_status_id_str: Option<String>,
    #[serde(default)]
    pub entities: TweetEntities,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TweetEntities {
    #[serde(default)]
    pub hashtags: Vec<Hashtag>,
    #[serde(default)]
    pub urls: Vec<UrlEntity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hashtag {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrlEntity {
    #[serde(default)]
    pub expanded_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Views {
    #[serde(default)]
    pub count: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoteTweet {
    pub note_tweet_results: NoteTweetResults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoteTweetResults {
    pub result: NoteTweetText,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoteTweetText {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TweetCore {
    pub user_results: UserResults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserResults {
    #[serde(default)]
    pub result: Option<UserResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserResult {
    pub rest_id: String,
    #[serde(default)]
    pub legacy: UserLegacy,
    /// Newer payloads move `name`/`screen_name` out of `legacy`.
    #[serde(default)]
    pub core: Option<UserCore>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UserLegacy {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub screen_name: Option<String>,
    #[serde(default)]
    pub followers_count: Option<u64>,
    #[serde(default)]
    pub friends_count: Option<u64>,
    #[serde(default)]
    pub verified: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UserCore {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub screen_name: Option<String>,
}

impl UserResult {
    pub fn name(&self) -> Option<&str> {
        self.core
            .as_ref()
            .and_then(|c| c.name.as_deref())
            .or(self.legacy.name.as_deref())
    }

    pub fn screen_name(&self) -> Option<&str> {
        self.core
            .as_ref()
            .and_then(|c| c.screen_name.as_deref())
            .or(self.legacy.screen_name.as_deref())
    }
}

// ---- normalized records ----

/// Flat tweet document persisted per timeline item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TweetRecord {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub text: String,
    /// Long-form note text when present, otherwise the same as `text`.
    pub full_text: String,
    pub lang: Option<String>,
    pub favorite_count: u64,
    pub retweet_count: u64,
    pub reply_count: u64,
    pub quote_count: u64,
    pub view_count: Option<u64>,
    pub view_count_state: Option<String>,
    pub is_quote_status: bool,
    pub possibly_sensitive: Option<bool>,
    pub in_reply_to: Option<String>,
    pub has_card: bool,
    pub hashtags: Vec<String>,
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<AuthorRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorRecord {
    pub id: String,
    pub name: Option<String>,
    pub screen_name: Option<String>,
    pub followers_count: Option<u64>,
    pub following_count: Option<u64>,
    pub verified: Option<bool>,
}
