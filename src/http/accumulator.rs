//! Line extraction over non-blocking reads.
//!
//! The accumulator reads whatever the transport has, splits it into lines as
//! soon as a `\n` shows up and hands each line to a callback before looking
//! for the next one. Bytes after the last newline stay buffered until the next
//! read completes the line. The callback can switch the accumulator into body
//! mode to collect a fixed number of raw bytes (a `Content-Length` request
//! body) before line scanning resumes.

use std::io;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::http::transport::Transport;

/// Bytes requested from the transport per read call.
pub const BLOCK_SIZE: usize = 256;

/// Default limit for a single line.
pub const DEFAULT_MAX_LINE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Data was read; the transport is drained for now.
    Normal,
    /// Nothing to read yet.
    Again,
    /// The peer closed its side with nothing left buffered.
    Eof,
}

/// A unit handed to the line callback.
#[derive(Debug)]
pub enum Segment<'a> {
    /// One line without its `\n` or `\r\n`.
    Line(&'a [u8]),
    /// A complete body requested with [`Expect::Body`].
    Body(Bytes),
}

/// What the callback wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Line,
    /// Collect exactly this many raw bytes next.
    Body(usize),
}

#[derive(Debug)]
pub struct ByteAccumulator {
    buffer: BytesMut,
    /// Bytes at the front of `buffer` already searched for a newline.
    scanned: usize,
    /// Remaining body bytes when collecting a body.
    body_remaining: Option<usize>,
    max_line: usize,
}

impl ByteAccumulator {
    pub fn new(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(BLOCK_SIZE),
            scanned: 0,
            body_remaining: None,
            max_line,
        }
    }

    /// Bytes read but not yet handed out.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Whether a body is being collected.
    pub fn in_body(&self) -> bool {
        self.body_remaining.is_some()
    }

    /// Reads until the transport would block, calling `on_segment` for every
    /// complete line (or requested body) found along the way.
    pub fn read_more<T, F>(&mut self, transport: &mut T, mut on_segment: F) -> Result<ReadStatus>
    where
        T: Transport + ?Sized,
        F: FnMut(Segment<'_>) -> Result<Expect>,
    {
        let mut status = ReadStatus::Again;

        loop {
            let start = self.buffer.len();
            self.buffer.resize(start + BLOCK_SIZE, 0);

            match transport.try_read(&mut self.buffer[start..]) {
                Ok(0) => {
                    self.buffer.truncate(start);
                    if self.buffer.is_empty() && self.body_remaining.is_none() {
                        return Ok(ReadStatus::Eof);
                    }
                    return Err(Error::UnexpectedEof);
                }
                Ok(n) => {
                    self.buffer.truncate(start + n);
                    status = ReadStatus::Normal;
                    self.scan(&mut on_segment)?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.buffer.truncate(start);
                    return Ok(status);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.buffer.truncate(start);
                }
                Err(e) => {
                    self.buffer.truncate(start);
                    return Err(Error::Io(e));
                }
            }
        }
    }

    fn scan<F>(&mut self, on_segment: &mut F) -> Result<()>
    where
        F: FnMut(Segment<'_>) -> Result<Expect>,
    {
        loop {
            if let Some(remaining) = self.body_remaining {
                if self.buffer.len() < remaining {
                    return Ok(());
                }
                let body = self.buffer.split_to(remaining).freeze();
                self.body_remaining = None;
                self.scanned = 0;
                self.apply(on_segment(Segment::Body(body))?);
                continue;
            }

            let Some(offset) = memchr::memchr(b'\n', &self.buffer[self.scanned..]) else {
                self.scanned = self.buffer.len();
                if self.scanned > self.max_line {
                    return Err(Error::LineTooLong {
                        limit: self.max_line,
                    });
                }
                return Ok(());
            };

            let newline = self.scanned + offset;
            if newline > self.max_line {
                return Err(Error::LineTooLong {
                    limit: self.max_line,
                });
            }

            let end = match newline {
                n if n > 0 && self.buffer[n - 1] == b'\r' => n - 1,
                n => n,
            };

            let expect = on_segment(Segment::Line(&self.buffer[..end]))?;
            self.buffer.advance(newline + 1);
            self.scanned = 0;
            self.apply(expect);
        }
    }

    fn apply(&mut self, expect: Expect) {
        self.body_remaining = match expect {
            Expect::Line | Expect::Body(0) => None,
            Expect::Body(n) => Some(n),
        };
    }
}

impl Default for ByteAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE)
    }
}
