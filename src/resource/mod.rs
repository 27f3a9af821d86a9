//! Local copies of the images articles embed.
//!
//! - [`cache`] maps a resource URL to a deterministic file under the cache
//!   root and decides whether an existing copy can be trusted
//! - [`fetcher`] fills cache misses with a bounded number of concurrent
//!   downloads, each under its own timeout
//!
//! An existing file is reused only when a `HEAD` request reports the same
//! Content-Length as the file on disk. Equal length is taken to mean equal
//! content; nothing stronger is checked.

mod cache;
mod fetcher;

pub use cache::{CacheEntry, ResourceCache};
pub use fetcher::{
    FetchStats, FetchedResource, ResourceError, ResourceFetcher, DEFAULT_CONCURRENCY,
    DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_HEAD_TIMEOUT,
};
