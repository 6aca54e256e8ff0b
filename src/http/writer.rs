use std::io::{self, Read};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::{BufMut, BytesMut};
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::http::body::Content;
use crate::http::headers::{
    CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, DATE, KEEP_ALIVE, SERVER,
};
use crate::http::response::{Response, StatusCode};
use crate::http::transport::Transport;
use crate::http::version::HttpVersion;

/// Bytes pulled from a body stream per read.
pub const BODY_BLOCK_SIZE: usize = 4096;

pub const SERVER_NAME: &str = concat!("webstep/", env!("CARGO_PKG_VERSION"));

/// Headers the writer derives itself; handler copies are not sent.
const DERIVED: [&str; 7] = [
    CONNECTION,
    CONTENT_ENCODING,
    CONTENT_LENGTH,
    CONTENT_TYPE,
    DATE,
    KEEP_ALIVE,
    SERVER,
];

/// Serializes the status line and header block, including the blank line.
pub fn serialize_head(resp: &Response, keep_alive: Duration) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        resp.version,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    let connection = if resp.is_closure { "close" } else { "keep-alive" };
    put_header(&mut buf, "Connection", connection);

    if has_length(resp.status) {
        if let Some(encoding) = resp.body.content_encoding() {
            put_header(&mut buf, "Content-Encoding", encoding);
        }
        put_header(&mut buf, "Content-Length", &resp.body.content_length().to_string());
        if let Some(content_type) = resp.body.content_type() {
            put_header(&mut buf, "Content-Type", content_type);
        }
    }

    put_header(&mut buf, "Date", &httpdate::fmt_http_date(SystemTime::now()));

    if !resp.is_closure {
        put_header(&mut buf, "Keep-Alive", &format!("timeout={}", keep_alive.as_secs()));
    }

    put_header(&mut buf, "Server", SERVER_NAME);

    for (name, value) in resp.headers.iter() {
        if DERIVED.contains(&name) {
            continue;
        }
        put_header(&mut buf, &title_case(name), value);
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    buf
}

fn put_header(buf: &mut Vec<u8>, name: &str, value: &str) {
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value.as_bytes());
    buf.extend_from_slice(b"\r\n");
}

/// Statuses that never carry a body.
fn has_length(status: StatusCode) -> bool {
    !matches!(
        status,
        StatusCode::Continue
            | StatusCode::SwitchingProtocols
            | StatusCode::NoContent
            | StatusCode::NotModified
    )
}

/// `x-request-id` -> `X-Request-Id`
fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        out.push(if upper { c.to_ascii_uppercase() } else { c });
        upper = c == '-';
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    /// The whole response is on the wire.
    Done,
    /// The transport would block.
    Again,
    /// The body stream has nothing to give yet.
    Pending,
}

/// Write cursor for one response: the serialized bytes not yet accepted by the
/// transport, plus the body stream still to be spliced in after them.
pub struct ResponseWriter {
    buffer: BytesMut,
    written: usize,
    stream: Option<Box<dyn Read + Send>>,
    /// Signalled by the stream's producer when more data is readable.
    ready: Option<Arc<Notify>>,
    remaining: u64,
    declared: u64,
    is_closure: bool,
}

impl ResponseWriter {
    pub fn new(response: Response, keep_alive: Duration) -> Self {
        let simple = response.version == HttpVersion::Http09;
        let send_body = simple || !response.head_only;

        let mut buffer = BytesMut::new();
        if !simple {
            buffer.extend_from_slice(&serialize_head(&response, keep_alive));
        }

        let declared = response.body.content_length();
        let ready = response.body.ready().cloned();
        let mut stream = None;
        let mut remaining = 0;

        if send_body {
            match response.body.into_content() {
                Content::Empty => {}
                Content::Bytes(bytes) => buffer.put(bytes),
                Content::Stream(source) => {
                    stream = Some(source);
                    remaining = declared;
                }
            }
        }

        Self {
            buffer,
            written: 0,
            stream,
            ready,
            remaining,
            declared,
            is_closure: response.is_closure || simple,
        }
    }

    /// Wake-up to wait on after [`WriteProgress::Pending`]. `None` when the
    /// body stream has no producer signal.
    pub fn ready_signal(&self) -> Option<Arc<Notify>> {
        self.ready.clone()
    }

    /// Whether the connection must close after this response.
    pub fn is_closure(&self) -> bool {
        self.is_closure
    }

    /// Writes as much as the transport accepts, refilling from the body
    /// stream between writes.
    pub fn write_to<T>(&mut self, transport: &mut T) -> Result<WriteProgress>
    where
        T: Transport + ?Sized,
    {
        loop {
            while self.written < self.buffer.len() {
                match transport.try_write(&self.buffer[self.written..]) {
                    Ok(0) => {
                        return Err(Error::Io(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "connection closed while writing",
                        )));
                    }
                    Ok(n) => self.written += n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Ok(WriteProgress::Again);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(Error::Io(e)),
                }
            }

            self.buffer.clear();
            self.written = 0;

            if self.remaining == 0 {
                self.stream = None;
                return Ok(WriteProgress::Done);
            }
            let Some(stream) = self.stream.as_mut() else {
                return Ok(WriteProgress::Done);
            };

            let block = self.remaining.min(BODY_BLOCK_SIZE as u64) as usize;
            self.buffer.resize(block, 0);

            match stream.read(&mut self.buffer[..]) {
                Ok(0) => {
                    self.buffer.clear();
                    return Err(Error::TruncatedBody {
                        sent: self.declared - self.remaining,
                        declared: self.declared,
                    });
                }
                Ok(n) => {
                    self.buffer.truncate(n);
                    self.remaining -= n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.buffer.clear();
                    return Ok(WriteProgress::Pending);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => self.buffer.clear(),
                Err(e) => {
                    self.buffer.clear();
                    return Err(Error::Io(e));
                }
            }
        }
    }
}
