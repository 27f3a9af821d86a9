//! Article normalization.
//!
//! Feed items arrive with gaps: no guid, an empty content body with the text
//! in the description, relative image URLs. [`normalize`] fills the gaps so
//! every later stage can rely on a non-empty guid and title.
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

/// A feed item as delivered by the feed parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawArticle {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub content: String,
    pub description: String,
    pub published: Option<DateTime<Utc>>,
}

/// A normalized article. `guid` and `title` are never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
}

impl Article {
    /// Byte length of the content, the fingerprint the ledger compares.
    pub fn content_len(&self) -> u64 {
        self.content.len() as u64
    }
}

impl From<Article> for RawArticle {
    fn from(article: Article) -> Self {
        RawArticle {
            guid: article.guid,
            title: article.title,
            link: article.link,
            content: article.content,
            description: String::new(),
            published: article.published_at,
        }
    }
}

/// An image reference found in article markup.
///
/// `raw` is the attribute value exactly as written (the key the rewriter
/// matches on); `url` is the absolute form that gets downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceReference {
    pub raw: String,
    pub url: String,
}

impl ResourceReference {
    /// Only http(s) references are downloaded; `data:`, `cid:` and the like
    /// stay in the markup untouched.
    pub fn is_fetchable(&self) -> bool {
        Url::parse(&self.url)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false)
    }
}

/// Repair a raw feed item.
///
/// - empty guid → link, or a SHA-256 of `link|title|published` when the
///   link is empty too
/// - empty content → description
/// - empty title → `Untitled`
///
/// Idempotent.
pub fn normalize(raw: RawArticle) -> Article {
    let RawArticle {
        guid,
        title,
        link,
        content,
        description,
        published,
    } = raw;

    let link = link.trim().to_string();
    let guid = match guid.trim() {
        "" if !link.is_empty() => link.clone(),
        "" => synthesize_guid(&link, &title, published),
        trimmed => trimmed.to_string(),
    };
    let content = if content.is_empty() { description } else { content };
    let title = if title.trim().is_empty() {
        "Untitled".to_string()
    } else {
        title
    };

    Article {
        guid,
        title,
        link,
        content,
        published_at: published,
    }
}

fn synthesize_guid(link: &str, title: &str, published: Option<DateTime<Utc>>) -> String {
    let input = format!(
        "{}|{}|{}",
        link,
        title,
        published.map(|p| p.timestamp().to_string()).unwrap_or_default()
    );
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Make `reference` absolute against the article's link.
///
/// References that already carry a scheme are returned unchanged. Anything
/// that cannot be resolved (bad link, bad reference) is also returned
/// unchanged rather than failing the article.
pub fn resolve_reference(article: &Article, reference: &str) -> String {
    if Url::parse(reference).is_ok() {
        return reference.to_string();
    }

    match Url::parse(&article.link).and_then(|base| base.join(reference)) {
        Ok(resolved) => resolved.to_string(),
        Err(e) => {
            tracing::debug!(
                link = %article.link,
                reference = %reference,
                error = %e,
                "Could not resolve reference, keeping it as-is"
            );
            reference.to_string()
        }
    }
}

/// Pair each raw source with its absolute URL, dropping duplicates.
pub fn resolve_references(article: &Article, sources: &[String]) -> Vec<ResourceReference> {
    let mut seen = std::collections::HashSet::new();
    sources
        .iter()
        .filter(|raw| seen.insert(raw.as_str()))
        .map(|raw| ResourceReference {
            raw: raw.clone(),
            url: resolve_reference(article, raw),
        })
        .collect()
}
