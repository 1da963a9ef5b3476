use std::{future::Future, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{hub::Hub, routes};

/// Per-subscriber queue length used when nothing else is configured.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Chat page bundled with the crate, independent of the working directory.
pub const DEFAULT_PUBLIC_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/public");

/// Interval between keep-alive comments on idle event streams.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory served for `/` and any path without a dedicated route.
    pub public_dir: PathBuf,
    /// Messages a slow event-stream client may fall behind before it starts
    /// missing them.
    pub subscriber_buffer: usize,
    pub keep_alive: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_dir: PathBuf::from(DEFAULT_PUBLIC_DIR),
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}

pub struct Server {
    listener: TcpListener,
    hub: Hub,
    config: ServerConfig,
}

impl Server {
    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        Self::with_hub(listener, Hub::new(), config)
    }

    /// Serves an existing hub, e.g. one a test also publishes into directly.
    pub fn with_hub(listener: TcpListener, hub: Hub, config: ServerConfig) -> Self {
        Self {
            listener,
            hub,
            config,
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until `shutdown` resolves, then closes the hub so every open
    /// event stream ends and in-flight requests can drain.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Server {
            listener,
            hub,
            config,
        } = self;
        let app = routes::router(hub.clone(), config);

        let shutdown = async move {
            shutdown.await;
            handle_shutdown(&hub);
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("http server failed")
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_shutdown(hub: &Hub) {
    let closed = hub.close();
    info!(subscribers = closed, "server shutting down");
}
