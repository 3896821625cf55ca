//! The sequenced line grammar.
//!
//! Every inbound line starts with its sequence number:
//!
//! ```text
//! [whitespace] digits [one whitespace character, then content]
//! ```
//!
//! Output piped through `cat -n` has exactly this shape. The content is
//! everything after the single separator, verbatim, so leading whitespace
//! beyond the first character is preserved. Whitespace is the ASCII set
//! `\t \n \f \r` and space; the content may not contain a newline.

use std::num::ParseIntError;
use std::sync::LazyLock;

use bytes::Bytes;
use regex::Regex;
use thiserror::Error;

static LINE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\t\n\x0C\r ]*([0-9]+)(?:[\t\n\x0C\r ](.*))?$").expect("line pattern is valid")
});

/// Errors produced while parsing a raw line.
#[derive(Debug, Error)]
pub enum LineError {
    /// The line does not have the `number [content]` shape.
    #[error("invalid line")]
    Malformed,
    /// The sequence number matched the grammar but does not fit a `u64`.
    #[error("parsing line number {digits}: {source}")]
    BadNumber {
        /// The digit run that failed to parse.
        digits: String,
        /// Underlying parse failure.
        #[source]
        source: ParseIntError,
    },
}

/// A raw line split into its sequence number and content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequencedLine<'a> {
    /// Sequence number; `1` opens a session.
    pub seq: u64,
    /// Text after the separator. Empty when the line is only a number.
    pub content: &'a str,
}

impl<'a> SequencedLine<'a> {
    /// Parse `raw` against the line grammar.
    pub fn parse(raw: &'a str) -> Result<Self, LineError> {
        let caps = LINE_PATTERN.captures(raw).ok_or(LineError::Malformed)?;
        let digits = caps.get(1).map_or("", |m| m.as_str());
        let seq = digits.parse().map_err(|source| LineError::BadNumber {
            digits: digits.to_owned(),
            source,
        })?;
        let content = caps.get(2).map_or("", |m| m.as_str());
        Ok(Self { seq, content })
    }

    /// Whether this line may open a new session.
    pub fn is_opening(&self) -> bool {
        self.seq == 1
    }

    /// Bytes forwarded to the collector: the content and a newline.
    pub fn payload(&self) -> Bytes {
        let mut buf = String::with_capacity(self.content.len() + 1);
        buf.push_str(self.content);
        buf.push('\n');
        Bytes::from(buf)
    }
}
