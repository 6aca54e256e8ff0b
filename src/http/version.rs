use std::fmt;

/// Protocol versions understood on the request line.
///
/// Ordering follows the version number, so `version < HttpVersion::Http11`
/// reads as "older than 1.1".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HttpVersion {
    /// Simple request: `METHOD TARGET`, no headers, raw body response.
    Http09,
    Http10,
    Http11,
    /// Negotiated only; framing is still parsed as 1.x.
    Http20,
}

impl HttpVersion {
    /// Looks up a version from the digits of a full request line.
    ///
    /// HTTP/0.9 has no version token on the wire, so `(0, 9)` is rejected
    /// here just like any other unsupported pair.
    pub fn from_bits(major: u32, minor: u32) -> Option<Self> {
        match (major, minor) {
            (1, 0) => Some(HttpVersion::Http10),
            (1, 1) => Some(HttpVersion::Http11),
            (2, 0) => Some(HttpVersion::Http20),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http09 => "HTTP/0.9",
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
            HttpVersion::Http20 => "HTTP/2.0",
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
