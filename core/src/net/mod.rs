/*
 * mod.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Postern, a SASL client and secure connection library.
 *
 * Postern is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Postern is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Postern.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Network connection with optional TLS upgrade.
//!
//! A [`Connection`] starts as plain TCP. Implicit TLS (IMAPS 993, SMTPS 465) runs the
//! upgrader immediately after connect; STARTTLS runs it later, once the protocol layer has
//! negotiated the switch. Either way the active stream is type-erased behind [`BoxedStream`]
//! and wrapped in a [`LineStream`] so command lines reach the socket whole.

mod connection;
mod line_stream;

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::rustls::client::ClientConfig;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::RootCertStore;
use tokio_rustls::TlsConnector;
use tracing::debug;

pub use connection::{Connection, ConnectionState};
pub use line_stream::{LineStream, DEFAULT_CAPACITY};

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("host name must not be empty")]
    InvalidHost,
    #[error("port must be in 1..=65535")]
    InvalidPort,
    #[error("invalid timeout: {0} ms")]
    InvalidTimeout(i64),
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("connection has been closed")]
    Closed,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connect to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("stream upgrade failed: {0}")]
    Upgrade(#[source] io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Anything a connection can carry: TCP, TLS over TCP, or a test double.
pub trait NetStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> NetStream for T {}

pub type BoxedStream = Box<dyn NetStream>;

/// Endpoint details handed to a [`StreamUpgrader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: u32,
    pub host: String,
    pub port: u16,
    pub remote: Option<SocketAddr>,
    pub local: Option<SocketAddr>,
}

/// Negotiated TLS parameters, recorded for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityInfo {
    pub protocol_version: Option<String>,
    pub cipher_suite: Option<String>,
    pub alpn: Option<Vec<u8>>,
}

impl fmt::Display for SecurityInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.protocol_version.as_deref().unwrap_or("unknown"),
            self.cipher_suite.as_deref().unwrap_or("unknown")
        )?;
        if let Some(alpn) = &self.alpn {
            write!(f, " alpn={}", String::from_utf8_lossy(alpn))?;
        }
        Ok(())
    }
}

pub struct UpgradedStream {
    pub stream: BoxedStream,
    pub security: Option<SecurityInfo>,
}

pub type UpgradeFuture<'a> = Pin<Box<dyn Future<Output = io::Result<UpgradedStream>> + Send + 'a>>;

/// Replaces a raw stream with a wrapped one, typically after a TLS handshake.
///
/// The upgrader owns the stream it is given; on error the stream is dropped (and closed).
pub trait StreamUpgrader: Send + Sync {
    fn upgrade<'a>(&'a self, info: &'a ConnectionInfo, stream: BoxedStream) -> UpgradeFuture<'a>;
}

/// Build a root certificate store: platform native certs first, then webpki-roots as fallback.
fn build_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            let (added, ignored) = root_store.add_parsable_certificates(certs);
            debug!(added, ignored, "loaded native root certificates");
        }
        Err(e) => debug!("native root certificates unavailable: {}", e),
    }
    if root_store.is_empty() {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    root_store
}

/// Default TLS client config (native + Mozilla roots, no client auth).
fn default_client_config() -> Arc<ClientConfig> {
    static CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();
    CONFIG
        .get_or_init(|| {
            let config = ClientConfig::builder()
                .with_root_certificates(build_root_store())
                .with_no_client_auth();
            Arc::new(config)
        })
        .clone()
}

/// TLS handshake with rustls. The server name defaults to the connection's host.
#[derive(Clone)]
pub struct TlsUpgrader {
    connector: TlsConnector,
    server_name: Option<String>,
}

impl TlsUpgrader {
    pub fn new() -> Self {
        Self::with_config(default_client_config())
    }

    pub fn with_config(config: Arc<ClientConfig>) -> Self {
        Self { connector: TlsConnector::from(config), server_name: None }
    }

    /// Default roots with the given ALPN protocols offered.
    pub fn with_alpn(protocols: Vec<Vec<u8>>) -> Self {
        let mut config = (*default_client_config()).clone();
        config.alpn_protocols = protocols;
        Self::with_config(Arc::new(config))
    }

    /// Verify the certificate against `name` instead of the connection host.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

impl Default for TlsUpgrader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TlsUpgrader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsUpgrader").field("server_name", &self.server_name).finish()
    }
}

impl StreamUpgrader for TlsUpgrader {
    fn upgrade<'a>(&'a self, info: &'a ConnectionInfo, stream: BoxedStream) -> UpgradeFuture<'a> {
        Box::pin(async move {
            let name = self.server_name.as_deref().unwrap_or(&info.host);
            let server_name = ServerName::try_from(name)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid host name"))?
                .to_owned();
            debug!(id = info.id, host = %info.host, "starting TLS handshake");
            let tls = self.connector.connect(server_name, stream).await?;
            let (_, session) = tls.get_ref();
            let security = SecurityInfo {
                protocol_version: session.protocol_version().map(|v| format!("{:?}", v)),
                cipher_suite: session.negotiated_cipher_suite().map(|s| format!("{:?}", s.suite())),
                alpn: session.alpn_protocol().map(|p| p.to_vec()),
            };
            debug!(id = info.id, security = %security, "TLS established");
            Ok(UpgradedStream { stream: Box::new(tls), security: Some(security) })
        })
    }
}

/// Convert a millisecond timeout where `-1` means "no timeout". Zero becomes 1 ms.
pub fn timeout_from_millis(ms: i64) -> Result<Option<Duration>, ConnectionError> {
    match ms {
        -1 => Ok(None),
        ms if ms < -1 => Err(ConnectionError::InvalidTimeout(ms)),
        ms => Ok(Some(normalize_timeout(Duration::from_millis(ms as u64)))),
    }
}

pub(crate) fn normalize_timeout(timeout: Duration) -> Duration {
    if timeout.is_zero() {
        Duration::from_millis(1)
    } else {
        timeout
    }
}

/// Run an I/O future under an optional deadline.
pub(crate) async fn with_timeout<T, F>(limit: Option<Duration>, fut: F) -> Result<T, ConnectionError>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result.map_err(ConnectionError::Io),
            Err(_) => Err(ConnectionError::Timeout(limit)),
        },
        None => fut.await.map_err(ConnectionError::Io),
    }
}
