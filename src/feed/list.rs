use std::collections::HashSet;
use std::path::Path;

/// Parse a line-oriented feed list.
///
/// One URL per line. Blank lines and lines starting with `#` or `//` are
/// ignored; surrounding whitespace is trimmed.
pub fn parse_feed_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with("//"))
        .map(str::to_string)
        .collect()
}

/// Load the feed list file.
///
/// A missing file yields an empty list; any other read error is returned.
pub fn load_feed_list(path: &Path) -> std::io::Result<Vec<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(parse_feed_list(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No feed list file found");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

/// Merge command-line URLs with file URLs, keeping first-seen order and
/// dropping duplicates.
pub fn merge_feed_urls(from_args: &[String], from_file: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    from_args
        .iter()
        .cloned()
        .chain(from_file)
        .filter(|url| seen.insert(url.clone()))
        .collect()
}
