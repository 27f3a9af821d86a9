use crate::article::ResourceReference;
use crate::resource::cache::{part_path, remote_length, CacheEntry, ResourceCache};
use futures::future::try_join_all;
use futures::StreamExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;

/// Simultaneous transfers allowed per fetcher.
pub const DEFAULT_CONCURRENCY: usize = 5;
/// Per resource download budget.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);
/// Budget for the advisory freshness check.
pub const DEFAULT_HEAD_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_RESOURCE_SIZE: u64 = 64 * 1024 * 1024; // 64MB

/// Errors from downloading one resource. Every variant names the URL so the
/// article-level log line says which image broke it.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Request for {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP error for {url}: status {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("Download of {url} timed out")]
    Timeout { url: String },
    #[error("Incomplete download of {url}: expected {expected} bytes, received {received}")]
    IncompleteResponse {
        url: String,
        expected: u64,
        received: u64,
    },
    #[error("Resource {url} is too large")]
    ResponseTooLarge { url: String },
    #[error("Cache I/O for {url} failed: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

/// A markup reference together with the cache entry now backing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    pub reference: ResourceReference,
    pub entry: CacheEntry,
}

/// Counters for one fetcher's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Full downloads performed
    pub downloaded: usize,
    /// Resolutions served from disk or from this run's table
    pub reused: usize,
    /// Highest number of transfers in flight at once
    pub peak_in_flight: usize,
}

/// Bounded-concurrency downloader that fills [`ResourceCache`] misses.
pub struct ResourceFetcher {
    client: reqwest::Client,
    semaphore: Semaphore,
    download_timeout: Duration,
    head_timeout: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    downloaded: AtomicUsize,
    reused: AtomicUsize,
}

impl ResourceFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_limits(
            client,
            DEFAULT_CONCURRENCY,
            DEFAULT_DOWNLOAD_TIMEOUT,
            DEFAULT_HEAD_TIMEOUT,
        )
    }

    pub fn with_limits(
        client: reqwest::Client,
        concurrency: usize,
        download_timeout: Duration,
        head_timeout: Duration,
    ) -> Self {
        Self {
            client,
            semaphore: Semaphore::new(concurrency.max(1)),
            download_timeout,
            head_timeout,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            downloaded: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
        }
    }

    pub fn stats(&self) -> FetchStats {
        FetchStats {
            downloaded: self.downloaded.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
        }
    }

    /// Resolve a single URL to a local file, downloading if needed.
    pub async fn resolve(
        &self,
        cache: &mut ResourceCache,
        url: &str,
    ) -> Result<CacheEntry, ResourceError> {
        if let Some(entry) = cache.get(url) {
            self.reused.fetch_add(1, Ordering::Relaxed);
            return Ok(entry.clone());
        }
        let entry = self.refresh(url.to_string(), cache.path_for(url)).await?;
        cache.insert(entry.clone());
        Ok(entry)
    }

    /// Resolve every fetchable reference of one article.
    ///
    /// Misses are fetched concurrently, at most `concurrency` at a time, and
    /// awaited together. The first failure cancels the rest and fails the
    /// whole set; nothing from a failed set is added to the cache table.
    /// Non-http(s) references are skipped and absent from the result.
    pub async fn fetch_all(
        &self,
        cache: &mut ResourceCache,
        references: &[ResourceReference],
    ) -> Result<Vec<FetchedResource>, ResourceError> {
        let fetchable: Vec<&ResourceReference> =
            references.iter().filter(|r| r.is_fetchable()).collect();

        let mut scheduled = HashSet::new();
        let mut pending = Vec::new();
        for reference in &fetchable {
            if cache.get(&reference.url).is_some() {
                self.reused.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if scheduled.insert(reference.url.as_str()) {
                pending.push((reference.url.clone(), cache.path_for(&reference.url)));
            }
        }

        tracing::debug!(
            total = fetchable.len(),
            pending = pending.len(),
            "download start"
        );
        let entries = try_join_all(
            pending
                .into_iter()
                .map(|(url, path)| self.refresh(url, path)),
        )
        .await?;
        tracing::debug!(count = entries.len(), "download finish");

        for entry in entries {
            cache.insert(entry);
        }

        Ok(fetchable
            .into_iter()
            .filter_map(|reference| {
                cache.get(&reference.url).map(|entry| FetchedResource {
                    reference: reference.clone(),
                    entry: entry.clone(),
                })
            })
            .collect())
    }

    /// Reuse the file at `path` if the remote still reports the same length,
    /// otherwise download over it. Holds one semaphore slot throughout.
    async fn refresh(&self, url: String, path: PathBuf) -> Result<CacheEntry, ResourceError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ResourceError::Io {
                url: url.clone(),
                source: std::io::Error::other("download pool closed"),
            })?;
        let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);

        if let Ok(metadata) = tokio::fs::metadata(&path).await {
            if metadata.is_file() {
                let local = metadata.len();
                match remote_length(&self.client, &url, self.head_timeout).await {
                    Some(remote) if remote == local => {
                        tracing::debug!(source = %url, bytes = local, "cache hit");
                        self.reused.fetch_add(1, Ordering::Relaxed);
                        return Ok(CacheEntry {
                            source_url: url,
                            local_path: path,
                            content_length: Some(local),
                        });
                    }
                    remote => {
                        tracing::debug!(source = %url, local = local, remote = ?remote, "cache entry stale");
                    }
                }
            }
        }

        tracing::debug!(source = %url, path = %path.display(), "download");
        let downloaded =
            tokio::time::timeout(self.download_timeout, download(&self.client, &url, &path)).await;
        let length = match downloaded {
            Ok(result) => result?,
            Err(_) => return Err(ResourceError::Timeout { url }),
        };
        self.downloaded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(source = %url, bytes = length, "downloaded");

        Ok(CacheEntry {
            source_url: url,
            local_path: path,
            content_length: Some(length),
        })
    }
}

/// Stream `url` into `path`, via a `.part` file that is renamed into place
/// only once the byte count checks out.
async fn download(client: &reqwest::Client, url: &str, path: &Path) -> Result<u64, ResourceError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| ResourceError::Network {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ResourceError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let expected = response.content_length();
    if expected.is_some_and(|len| len > MAX_RESOURCE_SIZE) {
        return Err(ResourceError::ResponseTooLarge {
            url: url.to_string(),
        });
    }

    let part = PartFile::new(path);
    let received = write_body(response, &part.path, url).await?;
    check_length(url, expected, received)?;

    tokio::fs::rename(&part.path, path)
        .await
        .map_err(|source| ResourceError::Io {
            url: url.to_string(),
            source,
        })?;
    part.keep();
    Ok(received)
}

/// The `.part` sibling of a download. Removed on drop unless the rename
/// into place went through, so a download that fails, times out or is
/// cancelled by a failing sibling leaves nothing behind.
struct PartFile {
    path: PathBuf,
    armed: bool,
}

impl PartFile {
    fn new(target: &Path) -> Self {
        Self {
            path: part_path(target),
            armed: true,
        }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

async fn write_body(
    response: reqwest::Response,
    part: &Path,
    url: &str,
) -> Result<u64, ResourceError> {
    let io_err = |source: std::io::Error| ResourceError::Io {
        url: url.to_string(),
        source,
    };

    let mut file = tokio::fs::File::create(part).await.map_err(io_err)?;
    let mut received: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| ResourceError::Network {
            url: url.to_string(),
            source,
        })?;
        received = received.saturating_add(chunk.len() as u64);
        if received > MAX_RESOURCE_SIZE {
            return Err(ResourceError::ResponseTooLarge {
                url: url.to_string(),
            });
        }
        file.write_all(&chunk).await.map_err(io_err)?;
    }

    file.flush().await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    Ok(received)
}

/// A body that does not match its advertised Content-Length is an error,
/// never a silent partial save.
fn check_length(url: &str, expected: Option<u64>, received: u64) -> Result<(), ResourceError> {
    match expected {
        Some(expected) if expected != received => Err(ResourceError::IncompleteResponse {
            url: url.to_string(),
            expected,
            received,
        }),
        _ => Ok(()),
    }
}

/// Marks one transfer as in flight for as long as it is alive.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
