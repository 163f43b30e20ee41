//! Social network clients used by harvest.
//!
//! Only the X/Twitter web API is implemented: cookie-authenticated GraphQL
//! calls for profile lookup and the four profile timelines, plus the parsing
//! that turns timeline instructions into flat tweet records.
pub mod twitter;
