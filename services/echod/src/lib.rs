// echod: Demo echo service for the wirecall RPC endpoint.
//
// Serves an echo handler over plain TCP (every message comes back
// unchanged) and provides a one-shot client for poking a running server.
// Intentionally small: the point is showing how stream halves, handler,
// and endpoint wire together on a real transport.

pub mod config;

pub use config::{ConfigError, EchodConfig, load_config, load_config_from_path};

use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{info, warn};
use wc_endpoint::{RpcEndpoint, SendError, handler};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EchodError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("send: {0}")]
    Send(#[from] SendError),
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Bind the configured address and serve until ctrl-c.
pub async fn run_server(cfg: EchodConfig) -> Result<(), EchodError> {
    let listener = TcpListener::bind(&cfg.bind).await?;
    info!(bind = %listener.local_addr()?, "echod listening");
    tokio::select! {
        result = serve(listener, cfg) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            Ok(())
        }
    }
}

/// Accept connections on `listener` forever, one endpoint per connection.
///
/// Split out from [`run_server`] so tests can bind port 0 themselves.
pub async fn serve(listener: TcpListener, cfg: EchodConfig) -> Result<(), EchodError> {
    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "connection accepted");
        let endpoint_config = cfg.endpoint_config(&peer.to_string());
        tokio::spawn(async move {
            serve_connection(stream, endpoint_config).await;
            info!(%peer, "connection finished");
        });
    }
}

/// Drive one connection's endpoint until it tears down.
async fn serve_connection(stream: TcpStream, config: wc_endpoint::EndpointConfig) {
    let (reader, writer) = stream.into_split();
    let endpoint = RpcEndpoint::new(
        handler(|message| async move { Ok(message) }),
        reader,
        writer,
        config,
    );
    endpoint.run().await;
}

// ---------------------------------------------------------------------------
// One-shot client
// ---------------------------------------------------------------------------

/// Connect to `addr`, send one message, and return the response.
///
/// The client endpoint still serves inbound calls while the round trip is
/// pending (the protocol is symmetric), but answers them with an empty
/// payload.
pub async fn send_once(
    addr: impl ToSocketAddrs,
    message: Vec<u8>,
    cfg: &EchodConfig,
) -> Result<Vec<u8>, EchodError> {
    let stream = TcpStream::connect(addr).await?;
    let peer = stream.peer_addr()?;
    let (reader, writer) = stream.into_split();
    let endpoint = RpcEndpoint::new(
        handler(|_message| async move { Ok(Vec::new()) }),
        reader,
        writer,
        cfg.endpoint_config(&format!("client-{peer}")),
    );

    let driver = {
        let endpoint: Arc<RpcEndpoint> = endpoint.clone();
        tokio::spawn(async move { endpoint.run().await })
    };

    let result = endpoint.send_message(message).await;

    endpoint.close();
    endpoint.wait_closed().await;
    if let Err(err) = driver.await {
        if !err.is_cancelled() {
            warn!(%err, "client driver failed");
        }
    }

    Ok(result?)
}
