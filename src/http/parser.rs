//! Incremental request head parser.
//!
//! The parser is fed one line at a time (see
//! [`ByteAccumulator`](crate::http::accumulator::ByteAccumulator)) and moves
//! through two states: waiting for the request line, then collecting header
//! fields until an empty line completes the head. A simple (HTTP/0.9) request
//! line completes the head immediately.

use std::borrow::Cow;

use url::Url;

use crate::http::headers::{intern, HeaderName, Headers, InvalidLength};
use crate::http::request::{Method, Request, BASE_URI};
use crate::http::version::HttpVersion;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid request line '{0}'")]
    MalformedRequest(String),

    #[error("malformed field '{0}'")]
    MalformedField(String),

    #[error("misplaced folded field")]
    MisplacedFold,

    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    #[error("unsupported HTTP version {major}.{minor}")]
    UnsupportedVersion { major: String, minor: String },

    #[error("invalid request target")]
    InvalidUri(#[from] url::ParseError),

    #[error(transparent)]
    InvalidContentLength(#[from] InvalidLength),

    #[error("request head already complete")]
    AlreadyComplete,
}

/// One header field as it arrived, name lower-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: HeaderName,
    pub value: String,
}

#[derive(Debug, Default)]
pub struct RequestParser {
    complete: bool,
    got_request_line: bool,
    method: Option<Method>,
    uri: Option<Url>,
    version: Option<HttpVersion>,
    fields: Vec<Field>,
    /// Field that a folded line continues.
    last_field: Option<usize>,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one line (without its terminator).
    pub fn feed(&mut self, line: &[u8]) -> Result<(), ParseError> {
        if self.complete {
            return Err(ParseError::AlreadyComplete);
        }

        if !self.got_request_line {
            self.parse_request_line(line)?;
            self.got_request_line = true;
            if self.version == Some(HttpVersion::Http09) {
                self.complete = true;
            }
        } else if line.is_empty() {
            self.complete = true;
        } else {
            self.parse_header_line(line)?;
        }

        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Whether any part of a request has been consumed.
    pub fn has_started(&self) -> bool {
        self.got_request_line
    }

    pub fn method(&self) -> Option<Method> {
        self.method
    }

    pub fn uri(&self) -> Option<&Url> {
        self.uri.as_ref()
    }

    pub fn version(&self) -> Option<HttpVersion> {
        self.version
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Builds the request from a complete head and resets the parser for the
    /// next one. Returns `None` while the head is incomplete.
    pub fn take_request(&mut self) -> Option<Request> {
        if !self.complete {
            return None;
        }

        let parser = std::mem::take(self);
        let mut headers = Headers::new();
        for field in parser.fields {
            headers.append(&field.name, field.value);
        }

        Some(Request {
            method: parser.method?,
            uri: parser.uri?,
            version: parser.version?,
            headers,
            body: Default::default(),
        })
    }

    fn parse_request_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let malformed = || ParseError::MalformedRequest(String::from_utf8_lossy(line).into_owned());

        let split = line.iter().position(|&b| is_whitespace(b)).ok_or_else(malformed)?;
        let (method, rest) = (&line[..split], &line[split + 1..]);

        if method.is_empty() || !method.iter().all(|&b| is_token(b)) || rest.is_empty() {
            return Err(malformed());
        }

        let (target, version) = match split_version(rest) {
            Some((target, major, minor)) => (target, Some((major, minor))),
            None => (rest, None),
        };

        // Method comes first, so an unknown method wins over a bad version.
        let method_str = String::from_utf8_lossy(method);
        let method = Method::from_str(&method_str)
            .ok_or_else(|| ParseError::UnknownMethod(method_str.into_owned()))?;

        let target: Cow<'_, str> = String::from_utf8_lossy(target);
        let uri = BASE_URI.join(&target)?;

        let version = match version {
            None => HttpVersion::Http09,
            Some((major, minor)) => parse_version(major, minor)?,
        };

        self.method = Some(method);
        self.uri = Some(uri);
        self.version = Some(version);
        Ok(())
    }

    fn parse_header_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let malformed = || ParseError::MalformedField(String::from_utf8_lossy(line).into_owned());

        if is_whitespace(line[0]) {
            let value = trim(&line[1..]);
            if value.is_empty() {
                return Err(malformed());
            }
            let index = self.last_field.ok_or(ParseError::MisplacedFold)?;
            let field = &mut self.fields[index];
            field.value.push_str(", ");
            field.value.push_str(&String::from_utf8_lossy(value));
            return Ok(());
        }

        let colon = line.iter().position(|&b| b == b':').ok_or_else(malformed)?;
        let (name, rest) = (&line[..colon], &line[colon + 1..]);

        if name.is_empty() || !name.iter().all(|&b| is_token(b)) {
            return Err(malformed());
        }
        match rest.split_first() {
            Some((&b, tail)) if is_whitespace(b) && !tail.is_empty() => {}
            _ => return Err(malformed()),
        }

        let name = intern(&String::from_utf8_lossy(name));
        let value = String::from_utf8_lossy(trim(rest)).into_owned();

        match self.fields.iter().position(|f| f.name == name) {
            Some(index) => {
                let field = &mut self.fields[index];
                field.value.push_str(", ");
                field.value.push_str(&value);
                self.last_field = Some(index);
            }
            None => {
                self.fields.push(Field { name, value });
                self.last_field = Some(self.fields.len() - 1);
            }
        }

        Ok(())
    }
}

/// Splits `TARGET SP HTTP/major.minor` at the last whitespace.
fn split_version(rest: &[u8]) -> Option<(&[u8], &[u8], &[u8])> {
    let split = rest.iter().rposition(|&b| is_whitespace(b))?;
    let (target, protocol) = (&rest[..split], &rest[split + 1..]);
    let digits = protocol.strip_prefix(b"HTTP/")?;
    let dot = digits.iter().position(|&b| b == b'.')?;
    let (major, minor) = (&digits[..dot], &digits[dot + 1..]);

    let numeric = |s: &[u8]| !s.is_empty() && s.iter().all(u8::is_ascii_digit);
    if target.is_empty() || !numeric(major) || !numeric(minor) {
        return None;
    }

    Some((target, major, minor))
}

fn parse_version(major: &[u8], minor: &[u8]) -> Result<HttpVersion, ParseError> {
    let unsupported = || ParseError::UnsupportedVersion {
        major: String::from_utf8_lossy(major).into_owned(),
        minor: String::from_utf8_lossy(minor).into_owned(),
    };

    let number = |s: &[u8]| std::str::from_utf8(s).ok().and_then(|s| s.parse::<u32>().ok());
    let (major_n, minor_n) = number(major).zip(number(minor)).ok_or_else(unsupported)?;

    HttpVersion::from_bits(major_n, minor_n).ok_or_else(unsupported)
}

fn is_whitespace(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

fn is_token(b: u8) -> bool {
    !matches!(
        b,
        0..=0x20
            | 0x7f
            | b'('
            | b')'
            | b'<'
            | b'>'
            | b'@'
            | b','
            | b';'
            | b':'
            | b'\\'
            | b'"'
            | b'/'
            | b'['
            | b']'
            | b'?'
            | b'='
            | b'{'
            | b'}'
    )
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| !is_whitespace(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|&b| !is_whitespace(b)).map_or(start, |i| i + 1);
    &bytes[start..end]
}
