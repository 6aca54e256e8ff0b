use bytes::Bytes;

use crate::http::body::Body;
use crate::http::headers::{Headers, LOCATION};
use crate::http::version::HttpVersion;

/// HTTP status codes the server can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Continue,
    SwitchingProtocols,
    Ok,
    Created,
    Accepted,
    NoContent,
    PartialContent,
    MovedPermanently,
    Found,
    SeeOther,
    NotModified,
    TemporaryRedirect,
    PermanentRedirect,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    RequestTimeout,
    LengthRequired,
    ContentTooLarge,
    UriTooLong,
    RangeNotSatisfiable,
    InternalServerError,
    NotImplemented,
    ServiceUnavailable,
    HttpVersionNotSupported,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use webstep::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Continue => 100,
            StatusCode::SwitchingProtocols => 101,
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::Accepted => 202,
            StatusCode::NoContent => 204,
            StatusCode::PartialContent => 206,
            StatusCode::MovedPermanently => 301,
            StatusCode::Found => 302,
            StatusCode::SeeOther => 303,
            StatusCode::NotModified => 304,
            StatusCode::TemporaryRedirect => 307,
            StatusCode::PermanentRedirect => 308,
            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::RequestTimeout => 408,
            StatusCode::LengthRequired => 411,
            StatusCode::ContentTooLarge => 413,
            StatusCode::UriTooLong => 414,
            StatusCode::RangeNotSatisfiable => 416,
            StatusCode::InternalServerError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::ServiceUnavailable => 503,
            StatusCode::HttpVersionNotSupported => 505,
        }
    }

    /// Returns the fixed reason phrase sent on the status line.
    ///
    /// # Example
    ///
    /// ```
    /// # use webstep::http::response::StatusCode;
    /// assert_eq!(StatusCode::Forbidden.reason_phrase(), "Forbidden");
    /// assert_eq!(StatusCode::InternalServerError.reason_phrase(), "Internal Server Error");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Continue => "Continue",
            StatusCode::SwitchingProtocols => "Switching Protocols",
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::Accepted => "Accepted",
            StatusCode::NoContent => "No Content",
            StatusCode::PartialContent => "Partial Content",
            StatusCode::MovedPermanently => "Moved Permanently",
            StatusCode::Found => "Found",
            StatusCode::SeeOther => "See Other",
            StatusCode::NotModified => "Not Modified",
            StatusCode::TemporaryRedirect => "Temporary Redirect",
            StatusCode::PermanentRedirect => "Permanent Redirect",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::RequestTimeout => "Request Timeout",
            StatusCode::LengthRequired => "Length Required",
            StatusCode::ContentTooLarge => "Content Too Large",
            StatusCode::UriTooLong => "URI Too Long",
            StatusCode::RangeNotSatisfiable => "Range Not Satisfiable",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::ServiceUnavailable => "Service Unavailable",
            StatusCode::HttpVersionNotSupported => "HTTP Version Not Supported",
        }
    }
}

/// An HTTP response waiting to be serialized.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    /// Version of the request this answers; also the version on the status line.
    pub version: HttpVersion,
    /// Extra headers. Entity and connection headers are derived from `body`
    /// and `is_closure` when the response is written.
    pub headers: Headers,
    pub body: Body,
    /// Close the connection once this response is written.
    pub is_closure: bool,
    /// Send the head only (answer to HEAD).
    pub head_only: bool,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            version: HttpVersion::Http11,
            headers: Headers::new(),
            body: Body::empty(),
            is_closure: false,
            head_only: false,
        }
    }

    /// Creates a simple 200 OK response with a plain-text body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        let mut response = Self::new(StatusCode::Ok);
        response.set_body(Body::from_bytes("text/plain", body));
        response
    }

    pub fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    /// Sets the status with a small HTML page naming it.
    pub fn set_status_page(&mut self, status: StatusCode) {
        let page = format!(
            "<!DOCTYPE html>\n<html><head><title>{code} {reason}</title></head>\
             <body><h1>{code} {reason}</h1></body></html>\n",
            code = status.as_u16(),
            reason = status.reason_phrase(),
        );
        self.status = status;
        self.body = Body::from_bytes("text/html; charset=utf-8", page);
    }

    /// Sets a redirect status and its `Location`.
    pub fn set_redirect(&mut self, status: StatusCode, location: &str) {
        self.set_status_page(status);
        self.headers.insert(LOCATION, location);
    }
}
