//! Line extraction from the request query string.
//!
//! A line request carries its whole line as the raw query, URL-query-escaped:
//! `/line/abc?2+hello%20world` relays `2 hello world`.

use std::borrow::Cow;

use thiserror::Error;

/// The query could not be turned into a line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// A `%` not followed by two hex digits.
    #[error("invalid URL escape {0:?}")]
    InvalidEscape(String),

    /// The unescaped bytes are not UTF-8.
    #[error("unescaped line is not valid UTF-8")]
    InvalidUtf8,
}

/// Unescape the raw query (`None` when the URL has no `?`) into the raw
/// line. `+` becomes a space and `%XX` the byte `0xXX`.
pub fn extract_line(query: Option<&str>) -> Result<String, ExtractError> {
    let query = query.unwrap_or_default();
    if let Some(bad) = find_bad_escape(query) {
        return Err(ExtractError::InvalidEscape(bad.to_owned()));
    }
    let spaced = query.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(Cow::into_owned)
        .map_err(|_| ExtractError::InvalidUtf8)
}

/// First `%` escape that is not followed by two hex digits, up to three
/// bytes of it.
fn find_bad_escape(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            i += 1;
            continue;
        }
        let valid = bytes
            .get(i + 1..i + 3)
            .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
        if !valid {
            let end = (i + 3).min(s.len());
            return Some(s.get(i..end).unwrap_or(&s[i..]));
        }
        i += 3;
    }
    None
}
