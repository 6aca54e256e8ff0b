use std::sync::Arc;

use anyhow::Context;
use webstep::config::Config;
use webstep::handler::FileHandler;
use webstep::server::{listener, Server};

fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(cfg.level()?)
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .max_blocking_threads(cfg.workers.max(1))
        .build()
        .context("failed to start runtime")?;

    runtime.block_on(async {
        let server = Server::new(&cfg, Arc::new(FileHandler));
        tracing::info!(root = %cfg.root.display(), "Serving files");

        tokio::select! {
            res = listener::run(&server, &cfg.listen_addr) => {
                res?;
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
            }
        }

        Ok::<(), anyhow::Error>(())
    })
}
