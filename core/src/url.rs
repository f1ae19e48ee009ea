//! Request-target composition for the REST data API.
//!
//! Path segments are joined verbatim; callers pass identifiers that are
//! already safe in a path (object names, record ids). Query names and values
//! keep only the RFC 3986 unreserved characters; a space becomes `%20` and
//! `,` becomes `%2C`.

/// Service root for the data API at the given version, e.g. `v25.0`.
pub fn service_root(api_version: &str) -> String {
    format!("/services/data/{api_version}")
}

/// Join `root` and `segments` with `/`, then append `?name=value&...` when
/// `query` is non-empty.
pub fn build_url<S: AsRef<str>>(root: &str, segments: &[S], query: &[(&str, &str)]) -> String {
    let mut url = String::from(root);
    for segment in segments {
        url.push('/');
        url.push_str(segment.as_ref());
    }
    if !query.is_empty() {
        url.push('?');
        url.push_str(&encode_query(query));
    }
    url
}

/// Encode `pairs` as `name=value` joined by `&`, preserving order.
pub fn encode_query(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(name, value)| format!("{}={}", urlencoding::encode(name), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}
