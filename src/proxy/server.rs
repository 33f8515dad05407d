//! TCP accept loop for the data plane.
//!
//! One accepted connection becomes one spawned task. Shutdown stops the
//! accept loop; in-flight exchanges drain to their natural end.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::proxy::handler;
use crate::registry::Registry;
use crate::routing::{BalancerConfig, Selector};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Shared state for connection handlers
pub struct ProxyContext {
    pub selector: Selector,
    pub balancer: BalancerConfig,
    pub connect_timeout: Duration,
}

/// The data-plane listener and its wiring
pub struct ProxyServer {
    config: Arc<Config>,
    registry: Arc<Registry>,
    ctx: Arc<ProxyContext>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ProxyServer {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(Registry::new(&config.backends, &config.circuit_breaker));
        let selector = Selector::new(Arc::clone(&registry), config.balancer.clone());

        let ctx = Arc::new(ProxyContext {
            selector,
            balancer: config.balancer.clone(),
            connect_timeout: config.proxy.connect_timeout(),
        });

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config: Arc::new(config),
            registry,
            ctx,
            shutdown_tx,
        })
    }

    /// The backend registry shared with the health checker and metrics
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Sender used to signal graceful shutdown to every subsystem
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind the configured address and accept until shutdown
    pub async fn run(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.proxy.host, self.config.proxy.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Server(format!("Failed to bind {}: {}", addr, e)))?;

        self.serve(listener).await
    }

    /// Accept loop over a pre-bound listener (lets tests pick port 0)
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        info!("Data plane listening on {}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let ctx = Arc::clone(&self.ctx);
                            tokio::spawn(handler::handle_connection(ctx, stream, peer));
                        },
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                        },
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("Stopping accept loop, draining in-flight connections");
                    return Ok(());
                },
            }
        }
    }
}
