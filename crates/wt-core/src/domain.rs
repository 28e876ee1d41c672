//! Hostname extraction from tab URLs.

use url::Url;

use crate::types::Domain;

/// Schemes whose pages are attributed to a domain.
const WEB_SCHEMES: &[&str] = &["http", "https"];

/// Classifies a tab URL into the domain its time is attributed to.
///
/// Returns `None` for URLs that fail to parse, for browser-internal schemes
/// (`chrome://`, `about:`, extension pages, `file:`) and for URLs without a
/// host. Classification failure is never an error: the tab is simply not
/// trackable.
pub fn classify(url: &str) -> Option<Domain> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    let parsed = Url::parse(url).ok()?;
    if !WEB_SCHEMES.contains(&parsed.scheme()) {
        return None;
    }
    Domain::new(parsed.host_str()?).ok()
}
