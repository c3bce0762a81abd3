//! Manuscript output.
//!
//! Accepted chapters land as markdown pages named `NN-slug.md` under the
//! project's output directory.

use std::path::{Path, PathBuf};

/// Lowercase ASCII slug of a title, hyphen-separated. Non-ASCII letters
/// and digits are dropped without introducing a separator, so accented
/// words collapse rather than fragment.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else if !c.is_alphanumeric() {
            pending_hyphen = true;
        }
    }
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// File name for a chapter page, zero-padded to sort correctly.
pub fn page_file_name(number: u32, title: &str) -> String {
    format!("{number:02}-{}.md", slugify(title))
}

/// Ensure the page opens with its chapter heading; drafts that already
/// carry one are left alone.
pub fn with_title_header(number: u32, title: &str, text: &str) -> String {
    let trimmed = text.trim_start();
    if trimmed.starts_with("# ") {
        text.to_string()
    } else {
        format!("# Chapter {number}: {title}\n\n{text}")
    }
}

/// Write one chapter page, creating the output directory as needed.
/// Returns the path written.
pub async fn save_page(
    out_dir: &Path,
    number: u32,
    title: &str,
    text: &str,
) -> Result<PathBuf, std::io::Error> {
    tokio::fs::create_dir_all(out_dir).await?;
    let path = out_dir.join(page_file_name(number, title));
    let page = with_title_header(number, title, text);
    tokio::fs::write(&path, page).await?;
    Ok(path)
}
