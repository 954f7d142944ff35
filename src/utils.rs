use std::path::Path;
use crate::errors::Result;
use log::info;

/// Generates an unguessable job identifier (122 random bits, hex encoded).
pub fn generate_job_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Sanitizes a filename by removing invalid characters
pub fn sanitize_filename(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();

    sanitized
        .trim_matches(|c: char| c == '.' || c == '_')
        .to_string()
}

/// Attachment name for a finished job: sanitized title plus the file's
/// extension, `.mp4` when the file has none.
pub fn download_name(title: &str, fallback: &str, file_path: &Path) -> String {
    let mut stem = sanitize_filename(title);
    if stem.is_empty() {
        stem = sanitize_filename(fallback);
    }

    let ext = file_path
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .unwrap_or("mp4");

    format!("{}.{}", stem, ext)
}

/// Creates a directory if it doesn't exist
pub async fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        tokio::fs::create_dir_all(path).await?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}
