//! Header map utilities.
//!
//! Backed by [`http::HeaderMap`], which gives case-insensitive lookup and
//! multi-valued entries. The helpers here cover the metadata shapes the
//! protocols produce: Connect unary `trailer-` promotion, end-stream JSON
//! metadata, and HTTP/1.1-style trailer blocks (gRPC-Web).

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;

/// Prefix marking Connect unary response headers that are really trailers.
pub const TRAILER_PREFIX: &str = "trailer-";

/// Split Connect unary trailers out of a response header map.
///
/// Headers prefixed `trailer-` come back in the second map with the prefix
/// stripped; everything else stays in the first.
pub fn split_trailers(headers: HeaderMap) -> (HeaderMap, HeaderMap) {
    let mut plain = HeaderMap::new();
    let mut trailers = HeaderMap::new();
    let mut current: Option<HeaderName> = None;
    for (name, value) in headers {
        // HeaderMap iteration repeats `None` for extra values of one key.
        let Some(name) = name.or_else(|| current.clone()) else {
            continue;
        };
        current = Some(name.clone());
        match name.as_str().strip_prefix(TRAILER_PREFIX) {
            Some(stripped) => {
                if let Ok(stripped) = HeaderName::try_from(stripped) {
                    trailers.append(stripped, value);
                }
            }
            None => {
                plain.append(name, value);
            }
        }
    }
    (plain, trailers)
}

/// Append every entry of `src` onto `dst`, keeping existing values.
pub fn merge(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src {
        dst.append(name.clone(), value.clone());
    }
}

/// Build a header map from string keys and value lists.
///
/// Invalid names or values are skipped; the Connect end-stream `metadata`
/// object is best-effort by design.
pub fn from_string_pairs<'a, I>(pairs: I) -> HeaderMap
where
    I: IntoIterator<Item = (&'a str, &'a [String])>,
{
    let mut headers = HeaderMap::new();
    for (key, values) in pairs {
        let Ok(name) = HeaderName::try_from(key) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::try_from(value) {
                headers.append(name.clone(), value);
            }
        }
    }
    headers
}

/// Parse an HTTP/1.1-style header block (`key: value\r\n...`).
///
/// This is the payload shape of a gRPC-Web trailer frame. Keys are
/// case-normalized by the header map; malformed lines are skipped.
pub fn parse_header_block(block: &[u8]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for line in block.split(|&b| b == b'\n') {
        let line = match line.strip_suffix(b"\r") {
            Some(stripped) => stripped,
            None => line,
        };
        if line.is_empty() {
            continue;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        let (key, rest) = line.split_at(colon);
        let value = &rest[1..];
        let key = String::from_utf8_lossy(key);
        let Ok(name) = HeaderName::try_from(key.trim()) else {
            continue;
        };
        let value = String::from_utf8_lossy(value);
        if let Ok(value) = HeaderValue::try_from(value.trim()) {
            headers.append(name, value);
        }
    }
    headers
}
