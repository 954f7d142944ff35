use crate::errors::{AppError, Result};
use url::Url;

/// Longest format selector accepted from a caller.
const MAX_FORMAT_LEN: usize = 256;

#[derive(Debug, Clone, Copy, Default)]
pub struct InputValidator;

impl InputValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_url(&self, url: &str) -> Result<()> {
        if url.is_empty() {
            return Err(AppError::Validation("url required".to_string()));
        }

        let parsed_url = Url::parse(url)
            .map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

        if !matches!(parsed_url.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "Unsupported URL scheme: {}. Only http and https are accepted",
                parsed_url.scheme()
            )));
        }

        if parsed_url.host_str().map_or(true, str::is_empty) {
            return Err(AppError::Validation("URL must have a host".to_string()));
        }

        Ok(())
    }

    /// Format selectors are passed straight to the engine, so keep them to a
    /// single printable token.
    pub fn validate_format_selector(&self, selector: &str) -> Result<()> {
        if selector.is_empty() {
            return Err(AppError::Validation("Format selector cannot be empty".to_string()));
        }

        if selector.len() > MAX_FORMAT_LEN {
            return Err(AppError::Validation(format!(
                "Format selector too long (max {} characters)",
                MAX_FORMAT_LEN
            )));
        }

        if selector.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(AppError::Validation(
                "Format selector cannot contain whitespace or control characters".to_string(),
            ));
        }

        if selector.starts_with('-') {
            return Err(AppError::Validation("Format selector cannot start with '-'".to_string()));
        }

        Ok(())
    }
}
