//! webstep - a small HTTP/1.x server on non-blocking sockets.
//!
//! The protocol layer lives in [`http`]; [`server`] accepts sockets and
//! [`handler`] answers requests.

pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod server;

pub use error::{Error, Result};
