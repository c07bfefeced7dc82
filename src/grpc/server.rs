//! Listener setup and the tonic server loop

use super::proto::pub_sub_server::PubSubServer;
use super::service::PubSubService;
use crate::bus::EventBus;
use crate::config::ServerConfig;
use crate::error::{PubSubError, Result};
use std::future::Future;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

/// Bind the RPC listener described by `config`
pub async fn bind(config: &ServerConfig) -> Result<TcpListener> {
    let address = config.bind_address();
    TcpListener::bind(&address).await.map_err(|e| {
        tracing::error!(address = %address, error = %e, "Failed to bind listener");
        PubSubError::Io(e)
    })
}

/// Serve `bus` on `listener` until `shutdown` resolves
///
/// On shutdown the server stops accepting connections and waits for
/// in-flight calls. Open `Subscribe` streams only finish once the bus is
/// closed, so close the bus from the shutdown path before awaiting this.
pub async fn serve<F>(
    listener: TcpListener,
    bus: EventBus,
    config: &ServerConfig,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let address = listener.local_addr()?;
    tracing::info!(
        address = %address,
        max_concurrent_streams = config.max_concurrent_streams,
        "gRPC server listening"
    );

    Server::builder()
        .max_concurrent_streams(config.max_concurrent_streams)
        .add_service(PubSubServer::new(PubSubService::new(bus)))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await
        .map_err(|e| PubSubError::Transport(e.to_string()))?;

    tracing::info!(address = %address, "gRPC server stopped");
    Ok(())
}
