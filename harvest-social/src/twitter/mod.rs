//! X/Twitter web API integration.
//!
//! `cookies` loads the session bundle, `client` issues the GraphQL requests,
//! `extract` walks timeline instructions and `types` holds the response and
//! record models. Pagination is driven by the caller: every timeline page
//! carries the bottom cursor needed for the next request.
pub mod client;
pub mod cookies;
pub mod extract;
pub mod types;

pub use client::TwitterApi;
pub use cookies::TwitterCookies;
pub use types::{TimelineKind, TimelinePage, TweetRecord, TwitterUser};
