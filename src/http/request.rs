use std::fmt;
use std::sync::LazyLock;

use bytes::Bytes;
use url::Url;

use crate::http::headers::{ByteRange, Headers, InvalidLength};
use crate::http::version::HttpVersion;

/// Every request target is resolved against this base.
pub static BASE_URI: LazyLock<Url> = LazyLock::new(|| {
    Url::parse("http://localhost/").unwrap_or_else(|e| unreachable!("static base URI: {e}"))
});

/// HTTP request methods.
///
/// Only the methods the server can act on are representable; anything else
/// is rejected while parsing the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// POST - Submit data
    POST,
}

impl Method {
    /// Parses an HTTP method from its token.
    ///
    /// Matching ignores ASCII case.
    ///
    /// # Example
    ///
    /// ```
    /// # use webstep::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("head"), Some(Method::HEAD));
    /// assert_eq!(Method::from_str("PATCH"), None);
    /// ```
    pub fn from_str(s: &str) -> Option<Self> {
        [Method::GET, Method::HEAD, Method::POST]
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a parsed HTTP request from a client.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Target resolved against [`BASE_URI`].
    pub uri: Url,
    pub version: HttpVersion,
    pub headers: Headers,
    /// `Content-Length` delimited body, empty for most requests.
    pub body: Bytes,
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    method: Method,
    target: String,
    version: HttpVersion,
    headers: Headers,
    body: Bytes,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: Method::GET,
            target: "/".to_string(),
            version: HttpVersion::Http11,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn path(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn version(mut self, version: HttpVersion) -> Self {
        self.version = version;
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Result<Request, url::ParseError> {
        Ok(Request {
            method: self.method,
            uri: BASE_URI.join(&self.target)?,
            version: self.version,
            headers: self.headers,
            body: self.body,
        })
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Request {
    /// Retrieves a header value by name, ignoring case.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Percent-encoded path component of the target.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Declared body length; 0 when the header is missing.
    pub fn content_length(&self) -> Result<u64, InvalidLength> {
        Ok(self.headers.content_length()?.unwrap_or(0))
    }

    pub fn ranges(&self) -> &[ByteRange] {
        self.headers.ranges()
    }

    /// Determines whether the connection should remain open after the response.
    ///
    /// HTTP/0.9 never keeps the connection. HTTP/1.0 closes unless the client
    /// asks for `keep-alive`; later versions stay open unless the client asks
    /// for `close`.
    pub fn keep_alive(&self) -> bool {
        match self.version {
            HttpVersion::Http09 => false,
            HttpVersion::Http10 => self.headers.connection_has("keep-alive"),
            HttpVersion::Http11 | HttpVersion::Http20 => !self.headers.connection_has("close"),
        }
    }
}
