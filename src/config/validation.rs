//! Layout, address and URL validation utilities.

use crate::template::Layout;
use lettre::message::Mailbox;

/// Validates layout syntax and performs a test render with empty values.
/// Detects runtime errors like unknown filters.
///
/// # Errors
/// Returns an error string if the layout syntax is invalid or rendering fails.
pub fn validate_layout_template(source: &str) -> Result<(), String> {
    let layout = Layout::new(source).map_err(|e| e.to_string())?;
    layout.wrap("", "", "").map_err(|e| e.to_string())?;
    Ok(())
}

/// Validates an email address (`user@host` or `Name <user@host>`).
pub(crate) fn validate_email_address(address: &str) -> Result<(), String> {
    address
        .trim()
        .parse::<Mailbox>()
        .map(|_| ())
        .map_err(|e| format!("invalid email address '{}': {}", address, e))
}

/// Validates an absolute http(s) URL.
pub(crate) fn validate_http_url(url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("invalid URL '{}': {}", url, e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!(
            "unsupported URL scheme '{}' in '{}', expected http or https",
            other, url
        )),
    }
}
