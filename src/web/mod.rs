//! HTTP API for hwprogd.
//!
//! Accepts job submissions as JSON and streams each job's live events back
//! as newline-delimited JSON until the job ends.
//!
//! ## Endpoints
//!
//! - `GET /servers` - Address book (name and address of each hardware server)
//! - `GET /jobs` - Queued and running jobs
//! - `POST /program_fpga` - Program a bitstream on every target of a server
//! - `POST /program_flash` - Program configuration flash on every target of a server
//! - `POST /list_targets` - List targets and devices of a server

mod routes;

use std::net::SocketAddr;
use tokio::sync::broadcast;

use crate::context::AppContext;

pub use routes::router;

/// Media type of streamed job responses.
pub const NDJSON: &str = "application/x-ndjson";

/// Web server for the job API.
pub struct WebServer {
    bind_addr: SocketAddr,
    ctx: AppContext,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebServer {
    /// Create a new web server bound to the given address.
    pub fn new(ctx: AppContext, bind_addr: SocketAddr) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            bind_addr,
            ctx,
            shutdown_tx,
        }
    }

    /// Start the web server. Runs until shutdown() is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        let app = router(self.ctx.clone());

        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "Job API listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Signal the server to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
