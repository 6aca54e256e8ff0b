use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncWriteExt, Interest};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::http::accumulator::{ByteAccumulator, Expect, ReadStatus, Segment, DEFAULT_MAX_LINE};
use crate::http::headers::Headers;
use crate::http::message::{Message, SequenceId};
use crate::http::parser::{ParseError, RequestParser};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::http::transport::Transport;
use crate::http::version::HttpVersion;
use crate::http::writer::{ResponseWriter, WriteProgress};

/// Per-connection limits and timers.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Idle time after which a kept-alive connection is closed.
    pub keep_alive: Duration,
    pub max_line_length: usize,
    pub max_body_length: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(6),
            max_line_length: DEFAULT_MAX_LINE,
            max_body_length: 1024 * 1024,
        }
    }
}

impl From<&Config> for ConnectionOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            keep_alive: Duration::from_secs(cfg.keep_alive_secs),
            max_line_length: cfg.max_line_length,
            max_body_length: cfg.max_body_length,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Open,
    Closed,
}

/// One HTTP connection: reads and parses requests, dispatches them to the
/// handler and writes the responses back in request order.
///
/// The connection never waits. [`step`](Self::step) does all the work the
/// transport allows right now and returns; the caller decides when to call it
/// again (see [`run`](Connection::run) for the tokio driver).
pub struct Connection<T: Transport> {
    transport: T,
    accumulator: ByteAccumulator,
    parser: RequestParser,
    /// Request whose head is parsed but whose body is still arriving.
    awaiting_body: Option<Request>,
    negotiated_version: Option<HttpVersion>,

    next_read_seq: u32,
    next_write_seq: u32,
    out_queue: BTreeMap<SequenceId, Response>,
    writer: Option<ResponseWriter>,
    /// Dispatched requests whose response is not queued yet.
    in_flight: usize,

    handler: Arc<dyn Handler>,
    root: Arc<Path>,
    thaw_tx: UnboundedSender<Message>,
    thaw_rx: UnboundedReceiver<Message>,

    options: ConnectionOptions,
    last_activity: Instant,
    /// No more requests will be read (peer EOF or a closing request).
    read_closed: bool,
    write_blocked: bool,
    /// The body stream of the current response returned `WouldBlock`.
    body_pending: bool,
    /// Producer signal of that stream, when it has one.
    body_ready: Option<Arc<Notify>>,
    closed: bool,
}

impl<T: Transport> Connection<T> {
    pub fn new(
        transport: T,
        handler: Arc<dyn Handler>,
        root: Arc<Path>,
        options: ConnectionOptions,
    ) -> Self {
        let (thaw_tx, thaw_rx) = mpsc::unbounded_channel();

        Self {
            transport,
            accumulator: ByteAccumulator::new(options.max_line_length),
            parser: RequestParser::new(),
            awaiting_body: None,
            negotiated_version: None,
            next_read_seq: 0,
            next_write_seq: 0,
            out_queue: BTreeMap::new(),
            writer: None,
            in_flight: 0,
            handler,
            root,
            thaw_tx,
            thaw_rx,
            options,
            last_activity: Instant::now(),
            read_closed: false,
            write_blocked: false,
            body_pending: false,
            body_ready: None,
            closed: false,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn negotiated_version(&self) -> Option<HttpVersion> {
        self.negotiated_version
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Runs one read/dispatch/write cycle.
    ///
    /// Any error is fatal: the connection is marked closed and must be
    /// dropped by the caller.
    pub fn step(&mut self, now: Instant) -> Result<Status> {
        if self.closed {
            return Ok(Status::Closed);
        }

        let result = self.cycle(now);
        if result.is_err() {
            self.closed = true;
        }
        result
    }

    fn cycle(&mut self, now: Instant) -> Result<Status> {
        while let Ok(message) = self.thaw_rx.try_recv() {
            self.send(message);
        }

        if !self.read_closed {
            if let Err(e) = self.process_in(now) {
                // Requests that parsed before the failure still get their
                // responses, as far as the transport takes them right now.
                if let Err(write_error) = self.process_out(now) {
                    tracing::debug!(error = %write_error, "Flush before close failed");
                }
                return Err(e);
            }
        }

        self.process_out(now)?;

        if self.closed || (self.read_closed && self.is_drained()) {
            self.closed = true;
            return Ok(Status::Closed);
        }

        Ok(Status::Open)
    }

    /// Hands a message back for writing. A frozen message is parked until it
    /// thaws; the thaw delivers it to this connection again.
    pub fn send(&mut self, message: Message) {
        match message.take_or_wait(&self.thaw_tx) {
            Some(response) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                tracing::trace!(seq = message.seq(), "Response queued");
                self.out_queue.insert(message.seq(), response);
            }
            None if message.is_frozen() => {
                tracing::trace!(seq = message.seq(), "Waiting for handler");
            }
            None => {
                tracing::debug!(seq = message.seq(), "Message sent twice");
            }
        }
    }

    /// When the keep-alive timer runs out.
    ///
    /// The timer runs whenever the connection waits on the peer alone: no
    /// handler work and no output pending. A half-received request does not
    /// stop it; only completed lines count as progress.
    pub fn deadline(&self) -> Option<Instant> {
        (!self.closed && self.is_drained()).then(|| self.last_activity + self.options.keep_alive)
    }

    /// Closes the connection if the peer made no progress within the
    /// keep-alive window.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                tracing::debug!(partial = self.parser.has_started(), "Keep-alive timeout");
                self.closed = true;
                true
            }
            _ => false,
        }
    }

    fn is_drained(&self) -> bool {
        self.in_flight == 0 && self.out_queue.is_empty() && self.writer.is_none()
    }

    fn process_in(&mut self, now: Instant) -> Result<()> {
        let mut completed = Vec::new();

        let read = {
            let parser = &mut self.parser;
            let awaiting_body = &mut self.awaiting_body;
            let last_activity = &mut self.last_activity;
            let max_body = self.options.max_body_length;
            let mut stop = false;

            self.accumulator.read_more(&mut self.transport, |segment| {
                if stop {
                    return Ok(Expect::Line);
                }

                let request = match segment {
                    Segment::Line(line) => {
                        parser.feed(line)?;
                        *last_activity = now;
                        match parser.take_request() {
                            Some(request) => request,
                            None => return Ok(Expect::Line),
                        }
                    }
                    Segment::Body(body) => match awaiting_body.take() {
                        Some(mut request) => {
                            request.body = body;
                            *last_activity = now;
                            stop = !request.keep_alive();
                            completed.push(request);
                            return Ok(Expect::Line);
                        }
                        None => return Ok(Expect::Line),
                    },
                };

                let length = request.content_length().map_err(ParseError::from)?;
                if length > 0 && request.version != HttpVersion::Http09 {
                    if length > max_body as u64 {
                        return Err(Error::BodyTooLarge { limit: max_body });
                    }
                    *awaiting_body = Some(request);
                    return Ok(Expect::Body(length as usize));
                }

                stop = !request.keep_alive();
                completed.push(request);
                Ok(Expect::Line)
            })
        };

        // Everything that parsed before a read or parse failure is
        // dispatched first, in arrival order.
        for request in completed {
            self.dispatch(request)?;
        }
        let status = read?;

        if status == ReadStatus::Eof && !self.read_closed {
            if self.parser.has_started() || self.awaiting_body.is_some() {
                return Err(Error::UnexpectedEof);
            }
            tracing::debug!("Peer closed its sending side");
            self.read_closed = true;
        }

        Ok(())
    }

    fn dispatch(&mut self, request: Request) -> Result<()> {
        if self.read_closed {
            return Ok(());
        }

        match self.negotiated_version {
            None => self.negotiated_version = Some(request.version),
            Some(negotiated) if negotiated != request.version => {
                return Err(Error::VersionMismatch {
                    negotiated,
                    requested: request.version,
                });
            }
            Some(_) => {}
        }

        let seq = SequenceId::try_from(self.next_read_seq).map_err(|_| Error::RequestOverflow)?;
        self.next_read_seq += 1;

        let mut response = Response::new(StatusCode::Ok);
        response.version = request.version;
        response.is_closure = !request.keep_alive();
        response.head_only = request.method == Method::HEAD;

        if response.is_closure {
            self.read_closed = true;
        }

        tracing::debug!(
            seq,
            method = %request.method,
            path = request.path(),
            version = %request.version,
            "Request received"
        );

        let message = Message::new(seq, request, response);
        self.in_flight += 1;

        if let Err(e) = self.handler.dispatch(&message, &self.root) {
            tracing::error!(seq, error = %format!("{e:#}"), "Handler failed");
            message.reset_freeze();
            if let Some(mut response) = message.response() {
                response.headers = Headers::new();
                response.set_status_page(StatusCode::InternalServerError);
            }
        }

        self.send(message);
        Ok(())
    }

    fn process_out(&mut self, now: Instant) -> Result<()> {
        self.write_blocked = false;
        self.body_pending = false;
        self.body_ready = None;

        loop {
            if self.writer.is_none() {
                let Ok(seq) = SequenceId::try_from(self.next_write_seq) else {
                    return Ok(());
                };
                let Some(response) = self.out_queue.remove(&seq) else {
                    return Ok(());
                };
                self.next_write_seq += 1;
                tracing::debug!(seq, status = response.status.as_u16(), "Writing response");
                self.writer = Some(ResponseWriter::new(response, self.options.keep_alive));
            }

            let Some(writer) = self.writer.as_mut() else {
                return Ok(());
            };

            match writer.write_to(&mut self.transport)? {
                WriteProgress::Done => {
                    let closure = writer.is_closure();
                    self.writer = None;
                    self.last_activity = now;
                    if closure {
                        self.closed = true;
                        return Ok(());
                    }
                }
                WriteProgress::Again => {
                    self.write_blocked = true;
                    return Ok(());
                }
                WriteProgress::Pending => {
                    self.body_pending = true;
                    self.body_ready = writer.ready_signal();
                    return Ok(());
                }
            }
        }
    }
}

/// Retry interval for a pending body stream that has no producer signal.
const BODY_RETRY: Duration = Duration::from_millis(10);

enum Event {
    Ready,
    Thawed(Message),
    BodyReady,
    Timeout,
}

impl Connection<TcpStream> {
    /// Drives the connection on the current tokio runtime until it closes,
    /// then shuts the socket down.
    pub async fn run(mut self) -> Result<()> {
        let result = self.drive().await;

        if let Err(e) = self.transport.shutdown().await {
            tracing::trace!(error = %e, "Shutdown failed");
        }

        result
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            if self.step(Instant::now())? == Status::Closed {
                return Ok(());
            }

            let interest = match (!self.read_closed, self.write_blocked) {
                (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
                (true, false) => Some(Interest::READABLE),
                (false, true) => Some(Interest::WRITABLE),
                (false, false) => None,
            };
            let deadline = self.deadline();
            let body_pending = self.body_pending;
            let body_ready = self.body_ready.clone().unwrap_or_default();
            let signalled = self.body_ready.is_some();
            let sleep_until = tokio::time::Instant::from_std(
                deadline.unwrap_or_else(|| Instant::now() + self.options.keep_alive),
            );

            let event = tokio::select! {
                ready = self.transport.ready(interest.unwrap_or(Interest::READABLE)), if interest.is_some() => {
                    ready?;
                    Event::Ready
                }
                Some(message) = self.thaw_rx.recv() => Event::Thawed(message),
                _ = body_ready.notified(), if body_pending && signalled => Event::BodyReady,
                _ = tokio::time::sleep(BODY_RETRY), if body_pending && !signalled => Event::BodyReady,
                _ = tokio::time::sleep_until(sleep_until), if deadline.is_some() => Event::Timeout,
            };

            match event {
                Event::Ready | Event::BodyReady => {}
                Event::Thawed(message) => self.send(message),
                Event::Timeout => {
                    if self.expire(Instant::now()) {
                        return Ok(());
                    }
                }
            }
        }
    }
}
