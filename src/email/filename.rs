use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Extension of every artifact.
pub const EML_EXTENSION: &str = "eml";

/// Leaves room for the `#N.eml` suffix under the usual 255-byte limit.
const MAX_BASENAME_BYTES: usize = 200;

/// Turn an article title into a file basename.
///
/// `/` becomes `#slash`, control characters are dropped, and the result is
/// cut to 200 bytes on a character boundary. Titles that end up empty, `.`
/// or `..` become `untitled`.
pub fn escape_title(title: &str) -> String {
    let mut escaped = String::with_capacity(title.len());
    for c in title.chars() {
        match c {
            '/' => escaped.push_str("#slash"),
            c if c.is_control() => {}
            c => escaped.push(c),
        }
    }

    if escaped.len() > MAX_BASENAME_BYTES {
        let mut cut = MAX_BASENAME_BYTES;
        while !escaped.is_char_boundary(cut) {
            cut -= 1;
        }
        escaped.truncate(cut);
    }

    let trimmed = escaped.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return "untitled".to_string();
    }
    trimmed.to_string()
}

/// Candidate file name for the `attempt`-th try: `base.eml`, `base#1.eml`,
/// `base#2.eml`, ...
pub fn candidate_name(base: &str, attempt: u32) -> String {
    if attempt == 0 {
        format!("{base}.{EML_EXTENSION}")
    } else {
        format!("{base}#{attempt}.{EML_EXTENSION}")
    }
}

/// Write `data` to the first free candidate name under `dir`.
///
/// Each candidate is opened with `create_new`, so an existing artifact is
/// never overwritten, even by a concurrent writer. If the write itself
/// fails the new file is removed again.
pub async fn write_exclusive(dir: &Path, base: &str, data: &[u8]) -> std::io::Result<PathBuf> {
    let mut attempt = 0u32;
    loop {
        let path = dir.join(candidate_name(base, attempt));
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                let written = async {
                    file.write_all(data).await?;
                    file.sync_all().await
                }
                .await;
                if let Err(e) = written {
                    drop(file);
                    let _ = tokio::fs::remove_file(&path).await;
                    return Err(e);
                }
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                attempt = attempt.checked_add(1).ok_or(e)?;
            }
            Err(e) => return Err(e),
        }
    }
}
