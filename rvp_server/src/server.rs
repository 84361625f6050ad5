use std::{io, net::SocketAddr, time::Duration};

use anyhow::Context;
use hyper::{server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use rvp_core::ChannelRegistry;
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{config::ServerConfig, handler::RelayHandler};

/// How long shutdown waits for open connections to finish.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bind the configured address and serve until `token` is cancelled.
pub async fn run(config: ServerConfig, token: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;
    info!(
        address = %listener.local_addr()?,
        request_timeout = ?config.request_timeout,
        channel_timeout = ?config.channel_timeout,
        "rvp relay listening"
    );

    let registry = ChannelRegistry::new(config.registry_config());
    let handler = RelayHandler::new(registry, &config);
    serve(listener, handler, token).await?;
    Ok(())
}

/// Accept connections on `listener` until `token` is cancelled.
///
/// On shutdown every channel is closed, so parked writes and reads answer
/// `Closed`, and open connections get a short grace period to flush.
pub async fn serve(
    listener: TcpListener,
    handler: RelayHandler,
    token: CancellationToken,
) -> io::Result<()> {
    let mut conns = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((tcp, addr)) => {
                    conns.spawn(serve_connection(tcp, addr, handler.clone(), token.clone()));
                }
                Err(e) => warn!("accept error: {e}"),
            },
            Some(_) = conns.join_next(), if !conns.is_empty() => {}
            () = token.cancelled() => break,
        }
    }

    info!("shutting down");
    let closed = handler.registry().shutdown();
    debug!(closed, "closed channels");

    let drain = async { while conns.join_next().await.is_some() {} };
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        warn!(remaining = conns.len(), "connections did not drain in time");
        conns.shutdown().await;
    }
    Ok(())
}

async fn serve_connection(
    tcp: TcpStream,
    addr: SocketAddr,
    handler: RelayHandler,
    token: CancellationToken,
) {
    debug!(%addr, "connection opened");
    let io = TokioIo::new(tcp);
    let service = service_fn(move |req| {
        let handler = handler.clone();
        async move { handler.handle(req).await }
    });

    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        () = token.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    match result {
        Ok(()) => debug!(%addr, "connection closed"),
        Err(e) => debug!(%addr, "connection ended: {e}"),
    }
}
