//! Bidirectional byte pump between the client and upstream sockets.
//!
//! The proxy is byte-transparent after the initial chunk: bytes are copied
//! both ways in ≤1 KiB chunks until either side reaches EOF or an error
//! occurs. A clean close by either side ends the exchange normally.

use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const CHUNK: usize = 1024;

/// Which half of the relay failed
#[derive(Debug)]
pub enum PipeError {
    Client(io::Error),
    Upstream(io::Error),
}

/// Bytes moved in each direction, kept current even when the pump errors
/// out so the caller can tell whether the client already saw a response.
#[derive(Debug, Default)]
pub struct PipeReport {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// Pump bytes both ways until either direction finishes
pub async fn run(
    client: &mut TcpStream,
    upstream: &mut TcpStream,
    report: &mut PipeReport,
) -> std::result::Result<(), PipeError> {
    let mut client_buf = [0u8; CHUNK];
    let mut upstream_buf = [0u8; CHUNK];

    loop {
        tokio::select! {
            read = client.read(&mut client_buf) => {
                let n = read.map_err(PipeError::Client)?;
                if n == 0 {
                    break;
                }
                upstream
                    .write_all(&client_buf[..n])
                    .await
                    .map_err(PipeError::Upstream)?;
                report.client_to_upstream += n as u64;
            },
            read = upstream.read(&mut upstream_buf) => {
                let n = read.map_err(PipeError::Upstream)?;
                if n == 0 {
                    break;
                }
                client
                    .write_all(&upstream_buf[..n])
                    .await
                    .map_err(PipeError::Client)?;
                report.upstream_to_client += n as u64;
            },
        }
    }

    let _ = client.shutdown().await;
    let _ = upstream.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connecting = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (accepted, _) = listener.accept().await.unwrap();
        (accepted, connecting.await.unwrap())
    }

    #[tokio::test]
    async fn relays_both_directions_until_eof() {
        let (mut client_near, mut client_far) = socket_pair().await;
        let (mut upstream_near, mut upstream_far) = socket_pair().await;

        let pump = tokio::spawn(async move {
            let mut report = PipeReport::default();
            let result = run(&mut client_near, &mut upstream_near, &mut report).await;
            (result, report)
        });

        client_far.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        let mut request = [0u8; 64];
        let n = upstream_far.read(&mut request).await.unwrap();
        assert_eq!(&request[..n], b"GET / HTTP/1.1\r\n\r\n");

        upstream_far.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
        upstream_far.shutdown().await.unwrap();
        drop(upstream_far);

        let mut response = Vec::new();
        client_far.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"HTTP/1.1 200 OK\r\n\r\n");

        let (result, report) = pump.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(report.client_to_upstream, 18);
        assert_eq!(report.upstream_to_client, 19);
    }

    #[tokio::test]
    async fn upstream_close_after_partial_body_is_clean() {
        let (mut client_near, mut client_far) = socket_pair().await;
        let (mut upstream_near, mut upstream_far) = socket_pair().await;

        let pump = tokio::spawn(async move {
            let mut report = PipeReport::default();
            let result = run(&mut client_near, &mut upstream_near, &mut report).await;
            (result, report)
        });

        // Upstream sends 512 bytes then closes without waiting for input
        let body = vec![0xABu8; 512];
        upstream_far.write_all(&body).await.unwrap();
        upstream_far.shutdown().await.unwrap();
        drop(upstream_far);

        let mut received = Vec::new();
        client_far.read_to_end(&mut received).await.unwrap();
        assert_eq!(received.len(), 512);

        let (result, report) = pump.await.unwrap();
        assert!(result.is_ok(), "upstream-initiated close is a success");
        assert_eq!(report.upstream_to_client, 512);
    }
}
