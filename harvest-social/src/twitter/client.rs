//! Cookie-authenticated client for the X web GraphQL API.
//!
//! Requests carry the public web-app bearer token, the session cookies and the
//! matching `x-csrf-token`. The client does no pacing of its own; callers gate
//! every call through their rate limiter and hand it in as the retry gate.
use crate::twitter::cookies::TwitterCookies;
use crate::twitter::extract::{parse_timeline, parse_user};
use crate::twitter::types::{TimelineKind, TimelinePage, TwitterUser};
use anyhow::{anyhow, Context, Result};
use harvest_http::{Auth, HttpClient, RequestOpts, RetryGate};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, REFERER, USER_AGENT};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const WEB_BEARER: &str = "AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs%3D1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";
const WEB_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// (query id, operation name)
const USER_BY_SCREEN_NAME: (&str, &str) = ("NimuplG1OB7Fd2btCLdBOw", "UserByScreenName");
const USER_TWEETS: (&str, &str) = ("QWF3SzpHmykQHsQMixG0cg", "UserTweets");
const USER_TWEETS_AND_REPLIES: (&str, &str) = ("vMkJyzx1wdmvOeeNG0n6Wg", "UserTweetsAndReplies");
const USER_MEDIA: (&str, &str) = ("2tLOJWwGuCTytDrGBg8VwQ", "UserMedia");
const LIKES: (&str, &str) = ("IohM3gxQHfvWePH5E3KuNA", "Likes");

fn operation(kind: TimelineKind) -> (&'static str, &'static str) {
    match kind {
        TimelineKind::Tweets => USER_TWEETS,
        TimelineKind::Replies => USER_TWEETS_AND_REPLIES,
        TimelineKind::Media => USER_MEDIA,
        TimelineKind::Likes => LIKES,
    }
}

fn features() -> Value {
    json!({
        "rweb_tipjar_consumption_enabled": true,
        "responsive_web_graphql_exclude_directive_enabled": true,
        "verified_phone_label_enabled": false,
        "creator_subscriptions_tweet_preview_api_enabled": true,
        "responsive_web_graphql_timeline_navigation_enabled": true,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "communities_web_enable_tweet_community_results_fetch": true,
        "c9s_tweet_anatomy_moderator_badge_enabled": true,
        "articles_preview_enabled": true,
        "tweetypie_unmention_optimization_enabled": true,
        "responsive_web_edit_tweet_api_enabled": true,
        "graphql_is_translatable_rweb_tweet_is_translatable_enabled": true,
        "view_counts_everywhere_api_enabled": true,
        "longform_notetweets_consumption_enabled": true,
        "responsive_web_twitter_article_tweet_consumption_enabled": true,
        "tweet_awards_web_tipping_enabled": false,
        "creator_subscriptions_quote_tweet_preview_enabled": false,
        "freedom_of_speech_not_reach_fetch_enabled": true,
        "standardized_nudges_misinfo": true,
        "tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled": true,
        "rweb_video_timestamps_enabled": true,
        "longform_notetweets_rich_text_read_enabled": true,
        "longform_notetweets_inline_media_enabled": true,
        "responsive_web_enhance_cards_enabled": false,
        "hidden_profile_likes_enabled": true,
        "highlights_tweets_tab_ui_enabled": true,
        "subscriptions_verification_info_is_identity_verified_enabled": true,
        "subscriptions_verification_info_verified_since_enabled": true
    })
}

fn timeline_variables(
    kind: TimelineKind,
    user_id: &str,
    count: u32,
    cursor: Option<&str>,
) -> Value {
    let mut vars = json!({
        "userId": user_id,
        "count": count,
        "includePromotedContent": false,
        "withVoice": true,
        "withV2Timeline": true,
    });
    match kind {
        TimelineKind::Tweets => {
            vars["withQuickPromoteEligibilityTweetFields"] = json!(true);
        }
        TimelineKind::Replies => {
            vars["withCommunity"] = json!(true);
        }
        TimelineKind::Media | TimelineKind::Likes => {
            vars["withClientEventToken"] = json!(false);
            vars["withBirdwatchNotes"] = json!(false);
        }
    }
    if let Some(c) = cursor {
        vars["cursor"] = json!(c);
    }
    vars
}

#[derive(Clone)]
pub struct TwitterApi {
    http: HttpClient,
    cookies: Arc<TwitterCookies>,
}

impl TwitterApi {
    pub fn with_base_url(base: &str, cookies: TwitterCookies) -> Result<Self> {
        let http = HttpClient::new(base).context("twitter base url")?;
        Ok(Self {
            http,
            cookies: Arc::new(cookies),
        })
    }

    pub fn with_timeout(mut self, dur: Duration) -> Self {
        self.http = self.http.with_timeout(dur);
        self
    }

    pub fn with_retries(mut self, n: usize) -> Self {
        self.http = self.http.with_retries(n);
        self
    }

    /// Awaited before every HTTP retry.
    pub fn with_retry_gate(mut self, gate: Arc<dyn RetryGate>) -> Self {
        self.http = self.http.with_retry_gate(gate);
        self
    }

    /// Resolve a handle (without `@`) to its profile.
    pub async fn user_by_screen_name(&self, screen_name: &str) -> Result<TwitterUser> {
        let screen_name = screen_name.trim_start_matches('@');
        let variables = json!({
            "screen_name": screen_name,
            "withSafetyModeUserFields": false,
        });
        let body = self.graphql(USER_BY_SCREEN_NAME, &variables).await?;
        let user = parse_user(&body, screen_name)?;
        tracing::debug!(screen_name, user_id=%user.id, "twitter.user.resolved");
        Ok(user)
    }

    /// Fetch one page of a profile timeline. `count` is a hint; the API may
    /// return more or fewer tweets.
    pub async fn user_timeline(
        &self,
        user_id: &str,
        kind: TimelineKind,
        count: u32,
        cursor: Option<&str>,
    ) -> Result<TimelinePage> {
        let variables = timeline_variables(kind, user_id, count, cursor);
        let body = self.graphql(operation(kind), &variables).await?;
        let page = parse_timeline(&body)?;
        tracing::debug!(
            user_id,
            timeline=%kind,
            count,
            tweets=page.tweets.len(),
            has_next=page.next_cursor.is_some(),
            "twitter.timeline.page"
        );
        Ok(page)
    }

    async fn graphql(&self, (query_id, name): (&str, &str), variables: &Value) -> Result<Value> {
        let path = format!("graphql/{query_id}/{name}");
        let variables = serde_json::to_string(variables)?;
        let features = serde_json::to_string(&features())?;
        let body: Value = self
            .http
            .get_json(
                &path,
                RequestOpts {
                    auth: Some(Auth::Bearer(WEB_BEARER)),
                    headers: Some(self.session_headers()?),
                    query: Some(vec![
                        ("variables", variables.into()),
                        ("features", features.into()),
                    ]),
                    ..Default::default()
                },
            )
            .await?;

        // GraphQL reports failures in-band with a 200.
        if body.get("data").is_none_or(Value::is_null) {
            let message = body
                .pointer("/errors/0/message")
                .and_then(Value::as_str)
                .unwrap_or("response carried no data");
            return Err(anyhow!("{name} failed: {message}"));
        }
        Ok(body)
    }

    fn session_headers(&self) -> Result<HeaderMap> {
        let mut h = HeaderMap::new();
        h.insert(COOKIE, HeaderValue::from_str(&self.cookies.header_value())?);
        h.insert(
            HeaderName::from_static("x-csrf-token"),
            HeaderValue::from_str(self.cookies.csrf_token())?,
        );
        h.insert(
            HeaderName::from_static("x-twitter-auth-type"),
            HeaderValue::from_static("OAuth2Session"),
        );
        h.insert(
            HeaderName::from_static("x-twitter-active-user"),
            HeaderValue::from_static("yes"),
        );
        h.insert(
            HeaderName::from_static("x-twitter-client-language"),
            HeaderValue::from_static("en"),
        );
        h.insert(USER_AGENT, HeaderValue::from_static(WEB_USER_AGENT));
        h.insert(REFERER, HeaderValue::from_static("https://x.com/"));
        Ok(h)
    }
}
