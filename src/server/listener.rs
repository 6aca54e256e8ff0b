use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use crate::server::Server;

/// Pause after a failed accept, so a persistent error (e.g. out of file
/// descriptors) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub async fn run(server: &Server, listen_addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    info!("Listening on {}", listener.local_addr()?);

    serve(server, listener).await
}

/// Accepts connections from an already bound listener forever.
pub async fn serve(server: &Server, listener: TcpListener) -> anyhow::Result<()> {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                info!(peer = %peer, "Accepted connection");
                server.on_new_connection(socket);
            }
            Err(e) => {
                server.on_failed_connection(&e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}
