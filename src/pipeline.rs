//! Per-feed, per-article driver.
//!
//! Every article ends in one of three states: skipped (ledger says it is
//! unchanged), saved (artifact written, ledger updated) or failed (logged,
//! nothing recorded, no artifact). A failure never stops the run; the next
//! article or feed is processed regardless.
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::article::{normalize, resolve_references, RawArticle};
use crate::email::{AssembleError, EmailAssembler};
use crate::feed::{fetch_feed, FeedError};
use crate::ledger::{DedupLedger, LedgerError};
use crate::markup::extract_image_sources;
use crate::resource::{FetchStats, ResourceCache, ResourceError, ResourceFetcher};

/// Why a single article could not be turned into an artifact.
#[derive(Debug, Error)]
pub enum ArticleError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Assemble(#[from] AssembleError),
}

/// Terminal state of one article.
#[derive(Debug)]
pub enum ArticleOutcome {
    Skipped,
    Saved { path: PathBuf, updated: bool },
    Failed(ArticleError),
}

/// Tally of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Artifacts written, in processing order.
    pub saved: Vec<PathBuf>,
    /// How many of `saved` were re-renders of changed articles.
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Feeds that could not be fetched or parsed.
    pub failed_feeds: Vec<String>,
    pub fetch: FetchStats,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub feed_timeout: Duration,
    pub cache_retention: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            feed_timeout: Duration::from_secs(10),
            cache_retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Owns the run's working state: the ledger and cache are loaded by the
/// caller, mutated here, and committed by [`Pipeline::finish`].
pub struct Pipeline {
    client: reqwest::Client,
    cache: ResourceCache,
    ledger: DedupLedger,
    fetcher: ResourceFetcher,
    assembler: EmailAssembler,
    options: PipelineOptions,
    summary: RunSummary,
}

impl Pipeline {
    pub fn new(
        client: reqwest::Client,
        cache: ResourceCache,
        ledger: DedupLedger,
        fetcher: ResourceFetcher,
        assembler: EmailAssembler,
        options: PipelineOptions,
    ) -> Self {
        Self {
            client,
            cache,
            ledger,
            fetcher,
            assembler,
            options,
            summary: RunSummary::default(),
        }
    }

    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Process every feed in order.
    pub async fn run(&mut self, feeds: &[String]) {
        for url in feeds {
            if let Err(e) = self.process_feed(url).await {
                tracing::warn!(feed = %url, error = %e, "Feed failed");
                self.summary.failed_feeds.push(url.clone());
            }
        }
    }

    /// Fetch one feed and process its items.
    pub async fn process_feed(&mut self, url: &str) -> Result<(), FeedError> {
        let feed = fetch_feed(&self.client, url, self.options.feed_timeout).await?;
        tracing::info!(
            feed = %url,
            title = %feed.title.as_deref().unwrap_or(""),
            items = feed.items.len(),
            "Fetched feed"
        );
        for item in feed.items {
            self.process_article(item).await;
        }
        Ok(())
    }

    /// Drive one feed item to a terminal state and count it.
    pub async fn process_article(&mut self, raw: RawArticle) -> ArticleOutcome {
        let mut article = normalize(raw);
        let content_len = article.content_len();

        let decision = self.ledger.lookup(&article.guid, content_len);
        if decision.should_skip() {
            tracing::info!(article = %article.title, guid = %article.guid, "skipped");
            self.summary.skipped += 1;
            return ArticleOutcome::Skipped;
        }
        let updated = match decision.title_suffix() {
            Some(suffix) => {
                tracing::info!(article = %article.title, guid = %article.guid, "has update");
                article.title.push_str(suffix);
                true
            }
            None => false,
        };

        let sources = extract_image_sources(&article.content);
        let references = resolve_references(&article, &sources);

        let result = async {
            let resources = self.fetcher.fetch_all(&mut self.cache, &references).await?;
            let path = self.assembler.assemble(&article, &resources).await?;
            Ok::<_, ArticleError>(path)
        }
        .await;

        match result {
            Ok(path) => {
                self.ledger.record(&article.guid, content_len);
                tracing::info!(article = %article.title, path = %path.display(), "saved");
                self.summary.saved.push(path.clone());
                if updated {
                    self.summary.updated += 1;
                }
                ArticleOutcome::Saved { path, updated }
            }
            Err(e) => {
                tracing::warn!(article = %article.title, guid = %article.guid, error = %e, "failed");
                self.summary.failed += 1;
                ArticleOutcome::Failed(e)
            }
        }
    }

    /// Commit the run: persist the ledger and purge outdated cache files.
    ///
    /// A purge failure is logged; only a ledger write failure is an error.
    pub fn finish(mut self) -> Result<RunSummary, LedgerError> {
        self.ledger.persist()?;

        match self.cache.purge_outdated(self.options.cache_retention) {
            Ok(removed) => {
                tracing::debug!(removed = removed, root = %self.cache.root().display(), "Purged cache")
            }
            Err(e) => {
                tracing::warn!(root = %self.cache.root().display(), error = %e, "Cache purge failed")
            }
        }

        self.summary.fetch = self.fetcher.stats();
        tracing::info!(
            saved = self.summary.saved.len(),
            updated = self.summary.updated,
            skipped = self.summary.skipped,
            failed = self.summary.failed,
            failed_feeds = self.summary.failed_feeds.len(),
            downloaded = self.summary.fetch.downloaded,
            reused = self.summary.fetch.reused,
            peak_in_flight = self.summary.fetch.peak_in_flight,
            "Run finished"
        );
        Ok(self.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::DEFAULT_RECORD_MAX;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pipeline(root: &Path) -> Pipeline {
        let client = reqwest::Client::new();
        let out = root.join("out");
        std::fs::create_dir_all(&out).unwrap();
        Pipeline::new(
            client.clone(),
            ResourceCache::open(root.join("temp")).unwrap(),
            DedupLedger::load(root.join("records.txt"), DEFAULT_RECORD_MAX).unwrap(),
            ResourceFetcher::new(client),
            EmailAssembler::new(out, "feeds@example.com", None).unwrap(),
            PipelineOptions::default(),
        )
    }

    fn raw(guid: &str, title: &str, content: &str) -> RawArticle {
        RawArticle {
            guid: guid.to_string(),
            title: title.to_string(),
            link: "https://example.com/post".to_string(),
            content: content.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_new_then_unchanged_then_changed() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline(dir.path());

        let first = pipeline.process_article(raw("g", "Post", "<p>one</p>")).await;
        assert!(matches!(first, ArticleOutcome::Saved { updated: false, .. }));

        let second = pipeline.process_article(raw("g", "Post", "<p>one</p>")).await;
        assert!(matches!(second, ArticleOutcome::Skipped));

        let third = pipeline.process_article(raw("g", "Post", "<p>one!</p>")).await;
        let ArticleOutcome::Saved { path, updated } = third else {
            panic!("expected a saved update");
        };
        assert!(updated);
        assert_eq!(path.file_name().unwrap(), "Post.update.eml");

        let summary = pipeline.summary();
        assert_eq!(summary.saved.len(), 2);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(pipeline.ledger().fingerprint("g"), Some(11));
    }

    #[tokio::test]
    async fn test_failed_resource_records_nothing() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline(dir.path());
        let content = format!(r#"<img src="{}/missing.png">"#, mock_server.uri());

        let outcome = pipeline.process_article(raw("g", "Broken", &content)).await;
        assert!(matches!(
            outcome,
            ArticleOutcome::Failed(ArticleError::Resource(ResourceError::HttpStatus { .. }))
        ));
        assert_eq!(pipeline.ledger().fingerprint("g"), None);
        assert_eq!(std::fs::read_dir(dir.path().join("out")).unwrap().count(), 0);
        assert_eq!(pipeline.summary().failed, 1);
    }

    #[tokio::test]
    async fn test_finish_persists_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline(dir.path());
        pipeline.process_article(raw("a", "A", "<p>a</p>")).await;

        let summary = pipeline.finish().unwrap();
        assert_eq!(summary.saved.len(), 1);
        let ledger = std::fs::read_to_string(dir.path().join("records.txt")).unwrap();
        assert_eq!(ledger, "a#record#8\n");
    }

    #[tokio::test]
    async fn test_unreachable_feed_is_reported() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline(dir.path());
        let feed = format!("{}/feed.xml", mock_server.uri());
        pipeline.run(std::slice::from_ref(&feed)).await;

        assert_eq!(pipeline.summary().failed_feeds, vec![feed]);
    }
}
