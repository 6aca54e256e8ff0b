//! Header multimap shared by requests and responses.
//!
//! Names are compared case-insensitively and stored lower-cased. A name that
//! appears more than once collapses into a single comma-joined value, with the
//! exception of `Range`, which is parsed into [`ByteRange`]s instead of being
//! kept as text.

use std::borrow::Cow;
use std::collections::HashSet;
use std::num::ParseIntError;
use std::sync::LazyLock;

/// Lower-cased header name. Well-known names borrow from a static table.
pub type HeaderName = Cow<'static, str>;

pub const ACCEPT_RANGES: &str = "accept-ranges";
pub const CONNECTION: &str = "connection";
pub const CONTENT_ENCODING: &str = "content-encoding";
pub const CONTENT_LENGTH: &str = "content-length";
pub const CONTENT_RANGE: &str = "content-range";
pub const CONTENT_TYPE: &str = "content-type";
pub const DATE: &str = "date";
pub const HOST: &str = "host";
pub const KEEP_ALIVE: &str = "keep-alive";
pub const LOCATION: &str = "location";
pub const RANGE: &str = "range";
pub const SERVER: &str = "server";

static WELL_KNOWN: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "accept",
        "accept-encoding",
        "accept-language",
        ACCEPT_RANGES,
        "cache-control",
        CONNECTION,
        CONTENT_ENCODING,
        CONTENT_LENGTH,
        CONTENT_RANGE,
        CONTENT_TYPE,
        "cookie",
        DATE,
        "expect",
        HOST,
        "if-modified-since",
        KEEP_ALIVE,
        "last-modified",
        LOCATION,
        RANGE,
        "referer",
        SERVER,
        "transfer-encoding",
        "upgrade",
        "user-agent",
    ]
    .into_iter()
    .collect()
});

/// Normalizes a header name, borrowing the static copy when the name is well
/// known.
pub fn intern(name: &str) -> HeaderName {
    let lower = name.to_ascii_lowercase();
    match WELL_KNOWN.get(lower.as_str()) {
        Some(known) => Cow::Borrowed(*known),
        None => Cow::Owned(lower),
    }
}

/// One `start-end` item of a `Range: bytes=` header.
///
/// `None` means the bound is open: `begin: None` is a suffix range
/// ("the last `end` bytes"), `end: None` runs to the end of the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub begin: Option<u64>,
    pub end: Option<u64>,
}

impl ByteRange {
    /// First and last byte offset (inclusive) within an entity of `length`
    /// bytes, or `None` when the range selects nothing.
    pub fn resolve(&self, length: u64) -> Option<(u64, u64)> {
        let last = length.checked_sub(1)?;
        match (self.begin, self.end) {
            (Some(begin), Some(end)) if begin <= end && begin <= last => Some((begin, end.min(last))),
            (Some(begin), None) if begin <= last => Some((begin, last)),
            (None, Some(suffix)) if suffix > 0 => Some((length.saturating_sub(suffix), last)),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("invalid range unit '{0}'")]
    UnknownUnit(String),

    #[error("range header has no ranges")]
    Empty,

    #[error("invalid range '{0}'")]
    Malformed(String),

    #[error("invalid range bound")]
    InvalidBound(#[from] ParseIntError),
}

/// A `Content-Length` that is present but not a single decimal number.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid Content-Length '{0}'")]
pub struct InvalidLength(pub String);

/// Parses the value of a `Range` header.
pub fn parse_ranges(value: &str) -> Result<Vec<ByteRange>, RangeError> {
    let mut ranges = Vec::new();
    let mut in_group = false;

    // A repeated header arrives comma-joined, so `bytes=` may open several
    // groups in one value.
    for item in value.split(',').map(str::trim) {
        let spec = match item.split_once('=') {
            Some((unit, spec)) => {
                if unit.trim() != "bytes" {
                    return Err(RangeError::UnknownUnit(unit.trim().to_string()));
                }
                in_group = true;
                spec.trim()
            }
            None if in_group => item,
            None => return Err(RangeError::Malformed(value.to_string())),
        };

        if spec.is_empty() {
            continue;
        }

        let (begin, end) = spec
            .split_once('-')
            .ok_or_else(|| RangeError::Malformed(spec.to_string()))?;

        let begin = parse_bound(begin)?;
        let end = parse_bound(end)?;

        if begin.is_none() && end.is_none() {
            return Err(RangeError::Malformed(spec.to_string()));
        }

        ranges.push(ByteRange { begin, end });
    }

    if ranges.is_empty() {
        return Err(RangeError::Empty);
    }

    Ok(ranges)
}

fn parse_bound(bound: &str) -> Result<Option<u64>, RangeError> {
    let bound = bound.trim();
    if bound.is_empty() {
        Ok(None)
    } else {
        Ok(Some(bound.parse()?))
    }
}

/// Case-insensitive, insertion-ordered header map.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    fields: Vec<(HeaderName, String)>,
    ranges: Vec<ByteRange>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value, joining it to an existing one with `", "`.
    ///
    /// `Range` values are parsed instead of stored. A range that fails to
    /// parse leaves the message without ranges; it is not an error for the
    /// message as a whole.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let name = intern(name);
        let value = value.into();

        if name == RANGE {
            match parse_ranges(&value) {
                Ok(ranges) => self.ranges.extend(ranges),
                Err(e) => {
                    tracing::debug!(error = %e, value = %value, "Ignoring unparsable Range header");
                    self.ranges.clear();
                }
            }
            return;
        }

        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            None => self.fields.push((name, value)),
        }
    }

    /// Sets a header, replacing any previous value.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.remove(name);
        self.append(name, value);
    }

    pub fn remove(&mut self, name: &str) {
        if name.eq_ignore_ascii_case(RANGE) {
            self.ranges.clear();
        }
        self.fields.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over `(name, value)` pairs in insertion order. Names are
    /// lower-cased.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(name, value)| (name.as_ref(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.ranges.is_empty()
    }

    /// `Content-Length`, if present.
    ///
    /// Anything but plain digits is an error, including the comma-joined
    /// value left by a repeated header.
    pub fn content_length(&self) -> Result<Option<u64>, InvalidLength> {
        let Some(value) = self.get(CONTENT_LENGTH) else {
            return Ok(None);
        };
        let digits = value.trim();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidLength(value.to_string()));
        }
        digits
            .parse()
            .map(Some)
            .map_err(|_| InvalidLength(value.to_string()))
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get(CONTENT_TYPE)
    }

    /// Whether the `Connection` header lists `token` (e.g. `close`).
    pub fn connection_has(&self, token: &str) -> bool {
        self.get(CONNECTION)
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    }

    /// Parsed `Range` header, empty when absent or invalid.
    pub fn ranges(&self) -> &[ByteRange] {
        &self.ranges
    }
}
