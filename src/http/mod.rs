//! HTTP protocol implementation.
//!
//! This module implements HTTP/0.9, 1.0 and 1.1 over non-blocking sockets,
//! with pipelining and keep-alive.
//!
//! # Architecture
//!
//! - **`accumulator`**: Reads raw bytes and splits them into lines
//! - **`parser`**: Builds a request head out of those lines
//! - **`headers`**, **`request`**, **`response`**, **`body`**, **`version`**: The message model
//! - **`message`**: Request/response pair shared with handlers, with freeze/thaw
//! - **`connection`**: The per-socket state machine
//! - **`writer`**: Serializes responses and streams their bodies
//! - **`transport`**: The non-blocking socket seam
//!
//! # Connection cycle
//!
//! Every readiness event runs one [`Connection::step`](connection::Connection::step):
//!
//! ```text
//!   socket readable ──► ByteAccumulator::read_more
//!                              │ one line at a time
//!                              ▼
//!                       RequestParser::feed ──► Request complete
//!                                                     │ seq = n
//!                                                     ▼
//!                                              Handler::dispatch
//!                                                     │ (freeze ... thaw)
//!                                                     ▼
//!                                              Connection::send
//!                                                     │
//!                                                     ▼
//!                                   out_queue (ordered by seq)
//!                                                     │ only seq == next_write_seq
//!                                                     ▼
//!   socket writable ◄──────────────────────── ResponseWriter
//! ```
//!
//! Responses leave in request order even when handlers finish out of order.

pub mod accumulator;
pub mod body;
pub mod connection;
pub mod headers;
pub mod message;
pub mod parser;
pub mod request;
pub mod response;
pub mod transport;
pub mod version;
pub mod writer;
