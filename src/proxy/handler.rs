//! Per-connection handling: initial read, backend selection, upstream
//! connect, and the byte pump, with breaker bookkeeping on the way out.

use crate::error::{Error, Result};
use crate::metrics;
use crate::proxy::pipe::{self, PipeError, PipeReport};
use crate::proxy::server::ProxyContext;
use crate::routing::session;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// First chunk of the request, enough for sticky-session extraction
const INITIAL_READ: usize = 1024;

const RESP_503: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\
Content-Type: text/plain\r\n\
Connection: close\r\n\
\r\n\
No available backends\n";

const RESP_502: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\
Content-Type: text/plain\r\n\
Connection: close\r\n\
\r\n\
Upstream connection failed\n";

/// Drive one accepted client connection to completion
pub async fn handle_connection(ctx: Arc<ProxyContext>, client: TcpStream, peer: SocketAddr) {
    if let Err(e) = proxy_connection(ctx, client, peer).await {
        match e {
            // The client went away or nothing was selectable; the 503 case
            // is already warned about by the selector
            Error::Client(_) | Error::NoBackendAvailable => {
                debug!("Connection from {} ended early: {}", peer, e);
            },
            _ => {
                warn!("Proxying for {} failed: {}", peer, e);
            },
        }
    }
}

/// One full exchange; errors carry which stage gave out
async fn proxy_connection(
    ctx: Arc<ProxyContext>,
    mut client: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    let mut initial = [0u8; INITIAL_READ];
    let read = client.read(&mut initial).await.map_err(Error::Client)?;
    let initial = &initial[..read];

    let session_key = ctx
        .balancer
        .sticky_session
        .then(|| session::extract(ctx.balancer.session_mode, &peer, initial));

    let Some(backend) = ctx.selector.choose(session_key.as_deref()) else {
        metrics::record_proxy_request("none", "no_backend");
        respond(&mut client, RESP_503).await;
        return Err(Error::NoBackendAvailable);
    };

    let addr = backend.addr();

    let mut upstream = match timeout(ctx.connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            backend.record_failure();
            metrics::record_proxy_request(&addr, "connect_error");
            respond(&mut client, RESP_502).await;
            return Err(Error::UpstreamConnect { addr, source: e });
        },
        Err(_) => {
            backend.record_failure();
            metrics::record_proxy_request(&addr, "connect_timeout");
            respond(&mut client, RESP_502).await;
            return Err(Error::UpstreamConnectTimeout(addr));
        },
    };

    // Seed the upstream with the bytes consumed for session extraction
    if !initial.is_empty() {
        if let Err(e) = upstream.write_all(initial).await {
            backend.record_failure();
            metrics::record_proxy_request(&addr, "upstream_error");
            respond(&mut client, RESP_502).await;
            return Err(Error::UpstreamPipe(e));
        }
    }

    let mut report = PipeReport::default();
    match pipe::run(&mut client, &mut upstream, &mut report).await {
        Ok(()) => {
            backend.record_success();
            metrics::record_proxy_request(&addr, "ok");
            debug!(
                "Exchange {} <-> {} complete ({}B up, {}B down)",
                peer, addr, report.client_to_upstream, report.upstream_to_client
            );
            Ok(())
        },
        Err(PipeError::Upstream(e)) => {
            backend.record_failure();
            metrics::record_proxy_request(&addr, "upstream_error");
            // A gateway error can only be injected while the client has
            // seen none of the response
            if report.upstream_to_client == 0 {
                respond(&mut client, RESP_502).await;
            } else {
                let _ = client.shutdown().await;
            }
            Err(Error::UpstreamPipe(e))
        },
        Err(PipeError::Client(e)) => {
            // The backend did nothing wrong; no breaker update
            metrics::record_proxy_request(&addr, "client_error");
            Err(Error::Client(e))
        },
    }
}

/// Best-effort error response followed by a close
async fn respond(client: &mut TcpStream, response: &[u8]) {
    let _ = client.write_all(response).await;
    let _ = client.shutdown().await;
}
