//! Timeline instruction walking and tweet normalization.
//!
//! GraphQL timelines arrive as a list of `instructions`. Tweets live in
//! `TimelineAddEntries` entries (single tweets or profile modules) and in
//! `TimelineAddToModule` items; the continuation token is the value of the
//! `cursor-bottom-*` entry.
use crate::twitter::types::{
    AuthorRecord, TimelinePage, TweetRecord, TweetResult, TwitterUser, UserResult,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

/// `created_at` layout used by the web API, e.g. `Wed Oct 10 20:19:24 +0000 2018`.
const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("user `{0}` not found or unavailable")]
    UserUnavailable(String),
    #[error("timeline response has no instructions")]
    MissingInstructions,
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Parse a `UserByScreenName` response.
pub fn parse_user(body: &Value, screen_name: &str) -> Result<TwitterUser, ExtractError> {
    let result = body.pointer("/data/user/result");
    let available = result
        .and_then(|r| r.get("__typename"))
        .and_then(Value::as_str)
        .is_none_or(|t| t == "User");
    let Some(result) = result.filter(|_| available) else {
        return Err(ExtractError::UserUnavailable(screen_name.to_string()));
    };
    let user: UserResult = serde_json::from_value(result.clone())?;
    Ok(TwitterUser {
        screen_name: user.screen_name().unwrap_or(screen_name).to_string(),
        name: user.name().map(str::to_string),
        id: user.rest_id,
    })
}

/// Parse one page of a profile timeline.
pub fn parse_timeline(body: &Value) -> Result<TimelinePage, ExtractError> {
    let instructions = body
        .get("data")
        .and_then(find_instructions)
        .ok_or(ExtractError::MissingInstructions)?;

    let mut results = Vec::new();
    let mut next_cursor = None;
    for instruction in instructions {
        match instruction.get("type").and_then(Value::as_str) {
            Some("TimelineAddEntries") => {
                for entry in array(instruction, "entries") {
                    let entry_id = entry.get("entryId").and_then(Value::as_str).unwrap_or("");
                    if entry_id.starts_with("cursor-bottom-") {
                        next_cursor = entry
                            .pointer("/content/value")
                            .and_then(Value::as_str)
                            .map(str::to_string);
                    } else if entry_id.starts_with("tweet-") {
                        results.extend(entry.pointer("/content/itemContent/tweet_results/result"));
                    } else if entry_id.starts_with("profile-") {
                        for item in entry
                            .pointer("/content/items")
                            .and_then(Value::as_array)
                            .into_iter()
                            .flatten()
                        {
                            results.extend(item.pointer("/item/itemContent/tweet_results/result"));
                        }
                    }
                }
            }
            Some("TimelineAddToModule") => {
                for item in array(instruction, "moduleItems") {
                    results.extend(item.pointer("/item/itemContent/tweet_results/result"));
                }
            }
            Some("TimelineReplaceEntry") => {
                let entry_id = instruction
                    .get("entry_id_to_replace")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if entry_id.starts_with("cursor-bottom-") {
                    next_cursor = instruction
                        .pointer("/entry/content/value")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                }
            }
            _ => {}
        }
    }

    let tweets = results.into_iter().filter_map(tweet_record).collect();
    Ok(TimelinePage {
        tweets,
        next_cursor,
    })
}

/// Normalize one `tweet_results.result` node. Tombstones and unavailable
/// tweets yield `None`.
pub fn tweet_record(result: &Value) -> Option<TweetRecord> {
    let node = match result.get("__typename").and_then(Value::as_str) {
        Some("TweetWithVisibilityResults") => result.get("tweet")?,
        Some("Tweet") | None => result,
        Some(_) => return None,
    };
    let tweet: TweetResult = match serde_json::from_value(node.clone()) {
        Ok(t) => t,
        Err(err) => {
            tracing::debug!(error=%err, "twitter.extract.skip_tweet");
            return None;
        }
    };
    let legacy = tweet.legacy?;

    let full_text = tweet
        .note_tweet
        .map(|n| n.note_tweet_results.result.text)
        .unwrap_or_else(|| legacy.full_text.clone());
    let views = tweet.views.unwrap_or_default();
    let user = tweet
        .core
        .and_then(|c| c.user_results.result)
        .map(|u| AuthorRecord {
            name: u.name().map(str::to_string),
            screen_name: u.screen_name().map(str::to_string),
            followers_count: u.legacy.followers_count,
            following_count: u.legacy.friends_count,
            verified: u.legacy.verified,
            id: u.rest_id,
        });

    Some(TweetRecord {
        id: tweet.rest_id,
        created_at: legacy.created_at.as_deref().and_then(parse_created_at),
        text: legacy.full_text,
        full_text,
        lang: legacy.lang,
        favorite_count: legacy.favorite_count,
        retweet_count: legacy.retweet_count,
        reply_count: legacy.reply_count,
        quote_count: legacy.quote_count,
        view_count: views.count.as_deref().and_then(|c| c.parse().ok()),
        view_count_state: views.state,
        is_quote_status: legacy.is_quote_status,
        possibly_sensitive: legacy.possibly_sensitive,
        in_reply_to: legacy.in_reply_to_status_id_str,
        has_card: tweet.card.is_some(),
        hashtags: legacy.entities.hashtags.into_iter().map(|h| h.text).collect(),
        urls: legacy
            .entities
            .urls
            .into_iter()
            .filter_map(|u| u.expanded_url)
            .collect(),
        user,
    })
}

pub fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, CREATED_AT_FORMAT)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn array<'a>(v: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    v.get(key).and_then(Value::as_array).into_iter().flatten()
}

/// Depth-first search for the first `instructions` array; its parent path
/// differs per timeline (`timeline_v2.timeline`, `timeline.timeline`, ...).
fn find_instructions(v: &Value) -> Option<&Vec<Value>> {
    match v {
        Value::Object(map) => {
            if let Some(found) = map.get("instructions").and_then(Value::as_array) {
                return Some(found);
            }
            map.values().find_map(find_instructions)
        }
        _ => None,
    }
}
