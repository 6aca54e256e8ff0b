use crate::http::parser::ParseError;
use crate::http::version::HttpVersion;

/// Every way a connection can fail.
///
/// All variants are fatal to the connection that produced them: once one is
/// returned from [`Connection::step`](crate::http::connection::Connection::step)
/// the byte stream can no longer be trusted and the socket is closed.
/// Handler failures are not represented here; they become `500` responses.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The socket reported an error.
    #[error("transport error")]
    Io(#[from] std::io::Error),

    /// The request line or a header line could not be parsed.
    #[error("malformed request")]
    Parse(#[from] ParseError),

    /// A pipelined request used a different protocol version than the first
    /// request on the same connection.
    #[error("HTTP version mismatch: connection negotiated {negotiated}, request used {requested}")]
    VersionMismatch {
        negotiated: HttpVersion,
        requested: HttpVersion,
    },

    /// The connection ran out of sequence ids.
    #[error("too many requests on one connection")]
    RequestOverflow,

    /// The peer closed the connection in the middle of a request.
    #[error("connection closed in the middle of a request")]
    UnexpectedEof,

    /// A line grew past the configured limit without a terminating newline.
    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    /// A request declared a `Content-Length` above the configured limit.
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// A response body stream ended before its declared length.
    #[error("response body ended after {sent} of {declared} bytes")]
    TruncatedBody { sent: u64, declared: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;
