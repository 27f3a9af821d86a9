use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::Message;
use thiserror::Error;

use super::filename::{escape_title, write_exclusive};
use crate::article::Article;
use crate::markup::{self, MarkupError};
use crate::resource::FetchedResource;

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("Failed to read attachment '{path}': {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write email '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid mailbox: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("Invalid content type: {0}")]
    ContentType(#[from] lettre::message::header::ContentTypeErr),
    #[error("Failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error(transparent)]
    Markup(#[from] MarkupError),
}

/// A rendered message, not yet written anywhere.
#[derive(Debug, Clone)]
pub struct RenderedEmail {
    /// Escaped title, without extension or collision suffix.
    pub basename: String,
    pub bytes: Vec<u8>,
    pub attachments: usize,
}

/// Builds `.eml` files from articles and their cached images.
///
/// The message is `multipart/related`: the rewritten HTML first, then one
/// inline part per distinct image file, addressed by a random Content-ID.
#[derive(Debug, Clone)]
pub struct EmailAssembler {
    output_dir: PathBuf,
    from: Mailbox,
    to: Mailbox,
}

impl EmailAssembler {
    /// `to` defaults to the sender, so artifacts are addressed to whoever
    /// produces them.
    pub fn new(
        output_dir: impl Into<PathBuf>,
        from: &str,
        to: Option<&str>,
    ) -> Result<Self, AssembleError> {
        let from: Mailbox = from.parse()?;
        let to = match to {
            Some(to) => to.parse()?,
            None => from.clone(),
        };
        Ok(Self {
            output_dir: output_dir.into(),
            from,
            to,
        })
    }

    /// Render `article` and write it under the output directory. Returns the
    /// path of the new file.
    ///
    /// Nothing is written unless every attachment was read and the message
    /// was built.
    pub async fn assemble(
        &self,
        article: &Article,
        resources: &[FetchedResource],
    ) -> Result<PathBuf, AssembleError> {
        let rendered = self.render(article, resources).await?;
        write_exclusive(&self.output_dir, &rendered.basename, &rendered.bytes)
            .await
            .map_err(|source| AssembleError::Write {
                path: self.output_dir.join(&rendered.basename),
                source,
            })
    }

    /// Build the full RFC 5322 message for `article`.
    pub async fn render(
        &self,
        article: &Article,
        resources: &[FetchedResource],
    ) -> Result<RenderedEmail, AssembleError> {
        let mut content_ids: HashMap<String, String> = HashMap::new();
        let mut cid_by_file: HashMap<&Path, String> = HashMap::new();
        let mut parts = Vec::new();

        for resource in resources {
            let path = resource.entry.local_path.as_path();
            let cid = match cid_by_file.get(path) {
                Some(cid) => cid.clone(),
                None => {
                    let cid = new_content_id();
                    parts.push(inline_part(path, &cid).await?);
                    cid_by_file.insert(path, cid.clone());
                    cid
                }
            };
            content_ids.insert(resource.reference.raw.clone(), format!("cid:{cid}"));
        }

        let html = markup::rewrite(
            &article.content,
            &content_ids,
            &markup::footer_html(&article.link),
        )?;

        let date = article
            .published_at
            .map(SystemTime::from)
            .unwrap_or_else(SystemTime::now);

        let attachments = parts.len();
        let body = parts.into_iter().fold(
            MultiPart::related().singlepart(SinglePart::html(html)),
            |related, part| related.singlepart(part),
        );

        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(article.title.clone())
            .date(date)
            .multipart(body)?;

        tracing::debug!(title = %article.title, attachments = attachments, "Rendered email");

        Ok(RenderedEmail {
            basename: escape_title(&article.title),
            bytes: message.formatted(),
            attachments,
        })
    }
}

async fn inline_part(path: &Path, cid: &str) -> Result<SinglePart, AssembleError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| AssembleError::Attachment {
            path: path.to_path_buf(),
            source,
        })?;
    let content_type = ContentType::parse(&detect_mime(path, &bytes))?;
    Ok(Attachment::new_inline(cid.to_string()).body(bytes, content_type))
}

/// Sniff the MIME type from the bytes, falling back to the file extension.
fn detect_mime(path: &Path, bytes: &[u8]) -> String {
    match infer::get(bytes) {
        Some(kind) => kind.mime_type().to_string(),
        None => mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

fn new_content_id() -> String {
    uuid::Uuid::new_v4().to_string().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::ResourceReference;
    use crate::resource::CacheEntry;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    // Smallest valid PNG signature plus IHDR start
    const PNG_BYTES: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48,
        0x44, 0x52,
    ];

    fn article(content: &str) -> Article {
        Article {
            guid: "g1".to_string(),
            title: "Hello/World".to_string(),
            link: "https://example.com/post".to_string(),
            content: content.to_string(),
            published_at: Some(chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
        }
    }

    fn fetched(raw: &str, path: &Path) -> FetchedResource {
        FetchedResource {
            reference: ResourceReference {
                raw: raw.to_string(),
                url: format!("https://example.com/{raw}"),
            },
            entry: CacheEntry {
                source_url: format!("https://example.com/{raw}"),
                local_path: path.to_path_buf(),
                content_length: None,
            },
        }
    }

    #[test]
    fn test_detect_mime_prefers_content() {
        assert_eq!(detect_mime(Path::new("x.jpg"), PNG_BYTES), "image/png");
        assert_eq!(detect_mime(Path::new("x.gif"), b"plain"), "image/gif");
        assert_eq!(
            detect_mime(Path::new("noext"), b"plain"),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_default_recipient_is_sender() {
        let assembler = EmailAssembler::new("out", "me@example.com", None).unwrap();
        assert_eq!(assembler.to, assembler.from);
    }

    #[test]
    fn test_invalid_sender_rejected() {
        let result = EmailAssembler::new("out", "not an address", None);
        assert!(matches!(result, Err(AssembleError::Address(_))));
    }

    #[tokio::test]
    async fn test_render_embeds_images_inline() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("a.png");
        std::fs::write(&image, PNG_BYTES).unwrap();

        let assembler =
            EmailAssembler::new(dir.path(), "feeds@example.com", Some("me@example.com")).unwrap();
        let article = article(r#"<p>Hi</p><img src="a.png"><img src="/a.png">"#);
        // Two spellings of the same file share one attachment
        let resources = vec![fetched("a.png", &image), fetched("/a.png", &image)];

        let rendered = assembler.render(&article, &resources).await.unwrap();
        let text = String::from_utf8_lossy(&rendered.bytes);

        assert_eq!(rendered.basename, "Hello#slashWorld");
        assert_eq!(rendered.attachments, 1);
        assert!(text.contains("multipart/related"));
        assert!(text.contains("Subject: Hello/World"));
        assert!(text.contains("To: me@example.com"));
        assert!(text.contains("Date: Fri, 01 Mar 2024 12:00:00"));
        assert!(text.contains("image/png"));
        assert!(text.contains("Content-Disposition: inline"));
        assert!(!text.contains(r#"src="a.png""#));
        assert_eq!(text.matches("Content-ID: <").count(), 1);
    }

    #[tokio::test]
    async fn test_assemble_writes_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let assembler = EmailAssembler::new(dir.path(), "feeds@example.com", None).unwrap();
        let article = article("<p>text</p>");

        let first = assembler.assemble(&article, &[]).await.unwrap();
        let second = assembler.assemble(&article, &[]).await.unwrap();

        assert_eq!(first, dir.path().join("Hello#slashWorld.eml"));
        assert_eq!(second, dir.path().join("Hello#slashWorld#1.eml"));
        let body = std::fs::read_to_string(&first).unwrap();
        assert!(body.contains("Subject: Hello/World"));
    }

    #[tokio::test]
    async fn test_missing_attachment_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let assembler = EmailAssembler::new(&out, "feeds@example.com", None).unwrap();
        let article = article(r#"<img src="gone.png">"#);
        let resources = vec![fetched("gone.png", &dir.path().join("gone.png"))];

        let result = assembler.assemble(&article, &resources).await;
        assert!(matches!(result, Err(AssembleError::Attachment { .. })));
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }
}
