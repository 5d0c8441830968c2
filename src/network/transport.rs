// src/network/transport.rs
//! Byte-stream transport for pool connections
//!
//! Pools speak newline-delimited JSON over a plain TCP socket or, when the
//! pool's `ssl` flag is set, over a TLS-wrapped one. Everything above this
//! module works against the boxed stream type and never sees the difference.

use crate::utils::error::MinerError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A connected pool byte stream, plain or TLS
pub trait PoolStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> PoolStream for T {}

/// Opens a byte stream to the pool
///
/// # Arguments
/// * `host` - Pool hostname, also used for TLS certificate validation
/// * `port` - Pool port
/// * `ssl` - Wrap the connection in TLS
///
/// # Errors
/// Returns `MinerError::ConnectionError` if the TCP connect or the TLS
/// handshake fails.
pub async fn connect(
    host: &str,
    port: u16,
    ssl: bool,
) -> Result<Box<dyn PoolStream>, MinerError> {
    let tcp = TcpStream::connect((host, port)).await.map_err(|e| {
        MinerError::ConnectionError(format!("Failed to connect to {}:{}: {}", host, port, e))
    })?;

    if !ssl {
        return Ok(Box::new(tcp));
    }

    let connector = native_tls::TlsConnector::new()
        .map_err(|e| MinerError::ConnectionError(format!("Failed to build TLS connector: {}", e)))?;

    let connector = tokio_native_tls::TlsConnector::from(connector);

    let stream = connector.connect(host, tcp).await.map_err(|e| {
        MinerError::ConnectionError(format!("TLS handshake with {}:{} failed: {}", host, port, e))
    })?;

    Ok(Box::new(stream))
}
