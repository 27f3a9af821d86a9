use anyhow::Result;
use feed_rs::parser;

use crate::article::RawArticle;

/// A parsed feed: its display title plus items in document order.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub items: Vec<RawArticle>,
}

/// Parse RSS/Atom/JSON Feed bytes into raw articles.
///
/// Nothing is repaired here; empty guids, titles and contents are passed
/// through as-is for the normalizer to deal with. feed-rs would otherwise
/// hash link and title into a missing id, so its id generator is replaced
/// with one that leaves the id empty.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed> {
    let feed = parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
        .parse(bytes)?;

    let title = feed.title.map(|t| t.content);
    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();
            let content = entry
                .content
                .and_then(|c| c.body)
                .unwrap_or_default();
            let description = entry.summary.map(|s| s.content).unwrap_or_default();
            let title = entry.title.map(|t| t.content).unwrap_or_default();

            RawArticle {
                guid: entry.id,
                title,
                link,
                content,
                description,
                published: entry.published.or(entry.updated),
            }
        })
        .collect();

    Ok(ParsedFeed { title, items })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/"><channel>
    <title>Example Blog</title>
    <item>
        <guid>post-1</guid>
        <title>First</title>
        <link>https://example.com/posts/1</link>
        <description>short</description>
        <content:encoded><![CDATA[<p>full <img src="/a.png"></p>]]></content:encoded>
        <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
    </item>
    <item>
        <title>Second</title>
        <link>https://example.com/posts/2</link>
        <description>only a description</description>
    </item>
</channel></rss>"#;

    #[test]
    fn test_parse_rss_items_in_order() {
        let feed = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Example Blog"));
        assert_eq!(feed.items.len(), 2);

        let first = &feed.items[0];
        assert_eq!(first.guid, "post-1");
        assert_eq!(first.title, "First");
        assert_eq!(first.link, "https://example.com/posts/1");
        assert!(first.content.contains("<img src=\"/a.png\">"));
        assert_eq!(first.description, "short");
        assert!(first.published.is_some());

        let second = &feed.items[1];
        assert_eq!(second.guid, "");
        assert_eq!(second.title, "Second");
        assert!(second.content.is_empty());
        assert_eq!(second.description, "only a description");
    }

    #[test]
    fn test_parse_atom() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Example</title>
  <id>urn:uuid:feed</id>
  <updated>2024-01-01T00:00:00Z</updated>
  <entry>
    <title>Entry</title>
    <id>urn:uuid:entry-1</id>
    <link href="https://example.org/entry"/>
    <updated>2024-01-02T00:00:00Z</updated>
    <content type="html">&lt;p&gt;hello&lt;/p&gt;</content>
  </entry>
</feed>"#;
        let feed = parse_feed(atom.as_bytes()).unwrap();
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].guid, "urn:uuid:entry-1");
        assert_eq!(feed.items[0].link, "https://example.org/entry");
        assert!(feed.items[0].content.contains("hello"));
        assert!(feed.items[0].published.is_some());
    }

    #[test]
    fn test_item_without_guid_is_identified_by_link() {
        let feed = parse_feed(RSS.as_bytes()).unwrap();
        let article = crate::article::normalize(feed.items[1].clone());
        assert_eq!(article.guid, "https://example.com/posts/2");
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(parse_feed(b"<not valid xml").is_err());
    }
}
