use std::fmt;
use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Notify;

/// Where the bytes of a body come from.
pub enum Content {
    Empty,
    Bytes(Bytes),
    /// A pollable source. `ErrorKind::WouldBlock` from `read` means "nothing
    /// yet"; the producer then signals the body's ready [`Notify`] once more
    /// data can be read.
    Stream(Box<dyn Read + Send>),
}

/// Message body together with its entity headers.
pub struct Body {
    content: Content,
    content_type: Option<String>,
    content_encoding: Option<String>,
    content_length: u64,
    ready: Option<Arc<Notify>>,
}

impl Body {
    pub fn empty() -> Self {
        Self {
            content: Content::Empty,
            content_type: None,
            content_encoding: None,
            content_length: 0,
            ready: None,
        }
    }

    pub fn from_bytes(content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            content_length: bytes.len() as u64,
            content: Content::Bytes(bytes),
            content_type: Some(content_type.into()),
            content_encoding: None,
            ready: None,
        }
    }

    /// A body read from `stream`, which must yield exactly `length` bytes.
    pub fn from_stream(
        content_type: impl Into<String>,
        length: u64,
        stream: impl Read + Send + 'static,
    ) -> Self {
        Self {
            content: Content::Stream(Box::new(stream)),
            content_type: Some(content_type.into()),
            content_encoding: None,
            content_length: length,
            ready: None,
        }
    }

    /// Wake-up for a stream that can return `WouldBlock`. The producer calls
    /// `notify_one` whenever new data becomes readable.
    pub fn with_ready(mut self, ready: Arc<Notify>) -> Self {
        self.ready = Some(ready);
        self
    }

    pub fn ready(&self) -> Option<&Arc<Notify>> {
        self.ready.as_ref()
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.content_encoding = Some(encoding.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.content, Content::Empty)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn into_content(self) -> Content {
        self.content
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.content {
            Content::Empty => "empty",
            Content::Bytes(_) => "bytes",
            Content::Stream(_) => "stream",
        };
        f.debug_struct("Body")
            .field("kind", &kind)
            .field("content_type", &self.content_type)
            .field("content_encoding", &self.content_encoding)
            .field("content_length", &self.content_length)
            .field("pollable", &self.ready.is_some())
            .finish()
    }
}
