use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use url::Url;

/// Longest file extension carried over from a resource URL.
const MAX_EXTENSION_LEN: usize = 8;

/// A locally stored copy of a remote resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub source_url: String,
    pub local_path: PathBuf,
    pub content_length: Option<u64>,
}

/// Content-addressed resource store rooted at one directory.
///
/// File names are `sha256(url)` plus the URL's extension, so every run maps
/// a URL to the same file. The in-memory table records URLs already
/// resolved during this run; those are served without another network
/// round-trip.
#[derive(Debug)]
pub struct ResourceCache {
    root: PathBuf,
    entries: HashMap<String, CacheEntry>,
}

impl ResourceCache {
    /// Open (creating if needed) the cache directory.
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            entries: HashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic local path for `url`.
    pub fn path_for(&self, url: &str) -> PathBuf {
        let hash = format!("{:x}", Sha256::digest(url.as_bytes()));
        match url_extension(url) {
            Some(ext) => self.root.join(format!("{hash}.{ext}")),
            None => self.root.join(hash),
        }
    }

    /// Entry resolved earlier in this run, if any.
    pub fn get(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    pub fn insert(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.source_url.clone(), entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Delete files under the cache root last modified more than `max_age`
    /// ago. Returns how many were removed; individual removal failures are
    /// logged and skipped.
    pub fn purge_outdated(&self, max_age: Duration) -> std::io::Result<usize> {
        let Some(keep_point) = SystemTime::now().checked_sub(max_age) else {
            return Ok(0);
        };

        let mut removed = 0;
        for dir_entry in std::fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            let path = dir_entry.path();
            let metadata = match dir_entry.metadata() {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Cannot stat cache file");
                    continue;
                }
            };
            let outdated = metadata
                .modified()
                .map(|modified| modified < keep_point)
                .unwrap_or(false);
            if !outdated {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "Removed outdated cache file");
                    removed += 1;
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Cannot remove outdated cache file");
                }
            }
        }
        Ok(removed)
    }
}

/// Sibling path a download is streamed into before being renamed over the
/// real cache file.
pub(crate) fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Content-Length reported by a `HEAD` request, or `None` when the request
/// fails, times out, is not 2xx, or carries no usable header.
///
/// Read straight from the header: the response has no body, so the body
/// size hint is not the remote size.
pub(crate) async fn remote_length(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Option<u64> {
    let response = match tokio::time::timeout(timeout, client.head(url).send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            tracing::debug!(source = %url, error = %e, "HEAD request failed");
            return None;
        }
        Err(_) => {
            tracing::debug!(source = %url, "HEAD request timed out");
            return None;
        }
    };

    if !response.status().is_success() {
        tracing::debug!(source = %url, status = %response.status(), "HEAD request rejected");
        return None;
    }

    response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn url_extension(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let ext = Path::new(last).extension()?.to_str()?;
    let valid = !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}
