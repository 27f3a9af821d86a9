//! Feed input: the list of feeds to process and the fetch/parse collaborator.
//!
//! - [`list`] - line-oriented feed list files
//! - [`fetcher`] - HTTP retrieval with timeout, size limit and retry
//! - [`parser`] - RSS/Atom parsing using the `feed-rs` crate
//!
//! A feed that fails to fetch or parse is reported as a [`FeedError`]; the
//! caller skips that feed and carries on with the rest.

mod fetcher;
mod list;
mod parser;

pub use fetcher::{fetch_feed, FeedError};
pub use list::{load_feed_list, merge_feed_urls, parse_feed_list};
pub use parser::{parse_feed, ParsedFeed};
