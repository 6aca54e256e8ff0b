//! Accepting side of the server.
//!
//! [`Server`] owns what every connection shares (the handler, the document
//! root and the connection options) and decides whether a freshly accepted
//! socket gets a [`Connection`]. The accept loop itself lives in
//! [`listener`].

pub mod listener;

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpStream;

use crate::config::Config;
use crate::handler::Handler;
use crate::http::connection::{Connection, ConnectionOptions};

#[derive(Clone)]
pub struct Server {
    handler: Arc<dyn Handler>,
    root: Arc<Path>,
    options: ConnectionOptions,
    max_connections: usize,
    active: Arc<AtomicUsize>,
}

impl Server {
    pub fn new(cfg: &Config, handler: Arc<dyn Handler>) -> Self {
        Self {
            handler,
            root: Arc::from(cfg.root.as_path()),
            options: ConnectionOptions::from(cfg),
            max_connections: cfg.max_connections,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Takes ownership of an accepted socket and spawns its connection task.
    ///
    /// Returns `false` (dropping the socket) when the connection limit is
    /// reached.
    pub fn on_new_connection(&self, stream: TcpStream) -> bool {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        if self.active.fetch_add(1, Ordering::AcqRel) >= self.max_connections {
            self.active.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!(peer = %peer, limit = self.max_connections, "Connection limit reached");
            return false;
        }

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer, error = %e, "Could not set TCP_NODELAY");
        }

        let connection = Connection::new(
            stream,
            Arc::clone(&self.handler),
            Arc::clone(&self.root),
            self.options.clone(),
        );
        let active = Arc::clone(&self.active);

        tokio::spawn(async move {
            match connection.run().await {
                Ok(()) => tracing::debug!(peer = %peer, "Connection closed"),
                Err(e) => tracing::warn!(peer = %peer, error = %e, "Connection failed"),
            }
            active.fetch_sub(1, Ordering::AcqRel);
        });

        true
    }

    pub fn on_failed_connection(&self, error: &io::Error) {
        tracing::warn!(error = %error, "Accept failed");
    }
}
