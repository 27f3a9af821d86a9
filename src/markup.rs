//! Tree-based rewriting of article HTML for email delivery.
//!
//! Mail clients do not run scripts, cannot show iframes and must not reach
//! out for remote images, so the markup is parsed into a DOM with `kuchiki`,
//! patched in place, and serialized back.
use std::collections::{HashMap, HashSet};

use html_escape::encode_double_quoted_attribute;
use kuchiki::traits::*;
use kuchiki::NodeRef;
use thiserror::Error;

const FOOTER_TEMPLATE: &str = r#"<br><br>
<a style="display: block; display:inline-block; border-top: 1px solid #ccc; padding-top: 5px; color: #666; text-decoration: none;"
   href="{href}"
>{href}</a>
<p style="color:#999;">
Sent with <a style="color:#666; text-decoration:none; font-weight: bold;" href="https://github.com/feedmail/feedmail">feedmail</a>
</p>"#;

#[derive(Debug, Error)]
pub enum MarkupError {
    #[error("Failed to serialize document: {0}")]
    Serialize(#[from] std::io::Error),
    #[error("Serialized document is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Collect the `src` of every `<img>`, in document order, without
/// duplicates. Empty sources are skipped.
pub fn extract_image_sources(html: &str) -> Vec<String> {
    let document = kuchiki::parse_html().one(html);
    let mut seen = HashSet::new();
    let mut sources = Vec::new();

    if let Ok(images) = document.select("img") {
        for image in images {
            let attrs = image.attributes.borrow();
            if let Some(src) = attrs.get("src") {
                if !src.trim().is_empty() && seen.insert(src.to_string()) {
                    sources.push(src.to_string());
                }
            }
        }
    }

    sources
}

/// Rewrite article markup for embedding in an email.
///
/// 1. `img[src]` found in `content_ids` is pointed at its `cid:` value;
///    `loading` and `srcset` are dropped from every `img`
/// 2. `iframe` with a non-empty `src` becomes `<a href=src>src</a>`
/// 3. `script` elements are removed
/// 4. `footer_html` is appended to `<body>`
///
/// Returns the whole serialized document.
pub fn rewrite(
    html: &str,
    content_ids: &HashMap<String, String>,
    footer_html: &str,
) -> Result<String, MarkupError> {
    let document = kuchiki::parse_html().one(html);

    rewrite_images(&document, content_ids);
    replace_iframes(&document);
    remove_scripts(&document);
    append_footer(&document, footer_html);

    let mut out = Vec::with_capacity(html.len() + footer_html.len());
    document.serialize(&mut out)?;
    Ok(String::from_utf8(out)?)
}

/// Footer block linking back to the original article.
pub fn footer_html(link: &str) -> String {
    FOOTER_TEMPLATE.replace("{href}", &encode_double_quoted_attribute(link))
}

fn rewrite_images(document: &NodeRef, content_ids: &HashMap<String, String>) {
    let Ok(images) = document.select("img") else {
        return;
    };
    for image in images.collect::<Vec<_>>() {
        let mut attrs = image.attributes.borrow_mut();
        let replacement = attrs
            .get("src")
            .and_then(|src| content_ids.get(src))
            .cloned();
        if let Some(cid) = replacement {
            attrs.insert("src", cid);
        }
        attrs.remove("loading");
        attrs.remove("srcset");
    }
}

fn replace_iframes(document: &NodeRef) {
    let Ok(iframes) = document.select("iframe") else {
        return;
    };
    for iframe in iframes.collect::<Vec<_>>() {
        let src = iframe
            .attributes
            .borrow()
            .get("src")
            .map(str::to_string)
            .unwrap_or_default();
        if src.is_empty() {
            continue;
        }
        if let Some(anchor) = anchor_to(&src) {
            let node = iframe.as_node();
            node.insert_before(anchor);
            node.detach();
        }
    }
}

fn remove_scripts(document: &NodeRef) {
    if let Ok(scripts) = document.select("script") {
        for script in scripts.collect::<Vec<_>>() {
            script.as_node().detach();
        }
    }
}

fn append_footer(document: &NodeRef, footer_html: &str) {
    let target = document
        .select_first("body")
        .map(|body| body.as_node().clone())
        .unwrap_or_else(|_| document.clone());
    for node in parse_body_children(footer_html) {
        target.append(node);
    }
}

/// `<a href="{href}">{href}</a>`, with the text set as a text node so no
/// escaping is needed.
fn anchor_to(href: &str) -> Option<NodeRef> {
    let holder = kuchiki::parse_html().one("<a></a>");
    let anchor = holder.select_first("a").ok()?;
    anchor
        .attributes
        .borrow_mut()
        .insert("href", href.to_string());
    let node = anchor.as_node().clone();
    node.append(NodeRef::new_text(href));
    node.detach();
    Some(node)
}

/// Parse a fragment and return the nodes that ended up in its `<body>`,
/// detached and ready to be inserted elsewhere.
fn parse_body_children(html: &str) -> Vec<NodeRef> {
    let holder = kuchiki::parse_html().one(html);
    let Ok(body) = holder.select_first("body") else {
        return Vec::new();
    };
    let children: Vec<NodeRef> = body.as_node().children().collect();
    for child in &children {
        child.detach();
    }
    children
}
