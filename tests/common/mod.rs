#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::Arc;

use webstep::handler::Handler;
use webstep::http::connection::{Connection, ConnectionOptions};
use webstep::http::transport::Transport;

/// One scripted outcome of a `try_read` call.
#[derive(Debug, Clone)]
pub enum Chunk {
    Data(Vec<u8>),
    Block,
    Eof,
}

/// In-memory transport that replays a read script and records writes.
///
/// When the script runs dry, reads would block. Writes accept at most
/// `write_limit` bytes per call, and every `block_writes_every`-th call
/// (when set) would block instead.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub script: VecDeque<Chunk>,
    pub written: Vec<u8>,
    pub write_limit: Option<usize>,
    pub block_writes_every: Option<usize>,
    write_calls: usize,
    eof: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script that delivers `bytes` in pieces of `size`.
    pub fn chunked(bytes: &[u8], size: usize) -> Self {
        let mut transport = Self::new();
        for piece in bytes.chunks(size.max(1)) {
            transport.push(piece);
        }
        transport
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.script.push_back(Chunk::Data(bytes.to_vec()));
    }

    pub fn push_block(&mut self) {
        self.script.push_back(Chunk::Block);
    }

    pub fn push_eof(&mut self) {
        self.script.push_back(Chunk::Eof);
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }
}

impl Transport for MockTransport {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        match self.script.pop_front() {
            Some(Chunk::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    let rest = data.split_off(n);
                    self.script.push_front(Chunk::Data(rest));
                }
                Ok(n)
            }
            Some(Chunk::Block) | None => Err(io::ErrorKind::WouldBlock.into()),
            Some(Chunk::Eof) => {
                self.eof = true;
                Ok(0)
            }
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_calls += 1;
        if let Some(every) = self.block_writes_every {
            if self.write_calls % every == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
        }
        let n = self.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

pub fn connection(transport: MockTransport, handler: Arc<dyn Handler>) -> Connection<MockTransport> {
    Connection::new(
        transport,
        handler,
        Arc::from(Path::new(".")),
        ConnectionOptions::default(),
    )
}

/// A response as seen by a client.
#[derive(Debug)]
pub struct ParsedResponse {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ParsedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Splits a byte stream into responses using `Content-Length` framing.
/// Bodies are skipped for the indexes listed in `head_only`.
pub fn parse_responses(mut bytes: &[u8], head_only: &[usize]) -> Vec<ParsedResponse> {
    let mut responses = Vec::new();

    while !bytes.is_empty() {
        let end = bytes
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response head terminator");
        let head = std::str::from_utf8(&bytes[..end]).expect("utf-8 head");
        bytes = &bytes[end + 4..];

        let mut lines = head.split("\r\n");
        let status_line = lines.next().expect("status line");
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap().to_string();
        let status = parts.next().unwrap().parse().unwrap();
        let reason = parts.next().unwrap_or("").to_string();

        let headers: Vec<(String, String)> = lines
            .map(|line| {
                let (name, value) = line.split_once(": ").expect("header line");
                (name.to_string(), value.to_string())
            })
            .collect();

        let length = headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
            .map(|(_, v)| v.parse::<usize>().unwrap())
            .unwrap_or(0);
        let length = if head_only.contains(&responses.len()) { 0 } else { length };

        let body = bytes[..length].to_vec();
        bytes = &bytes[length..];

        responses.push(ParsedResponse {
            version,
            status,
            reason,
            headers,
            body,
        });
    }

    responses
}
