//! Request fingerprints.

/// Builds a stable cache key from a request's method, URL and body.
///
/// The method is upper-cased; an absent and an empty body are the same.
#[must_use]
pub fn fingerprint(method: &str, url: &str, body: Option<&str>) -> String {
    let method = method.trim().to_ascii_uppercase();
    match body.filter(|b| !b.is_empty()) {
        Some(body) => format!("{method} {url}\n{body}"),
        None => format!("{method} {url}"),
    }
}
