/*
 * connection.rs
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

//! Connection lifecycle: `Unconnected -> Connected -> Closed`, with any number of stream
//! upgrades while connected. A closed connection cannot be reconnected.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::{
    normalize_timeout, with_timeout, BoxedStream, ConnectionError, ConnectionInfo, LineStream,
    SecurityInfo, StreamUpgrader,
};

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connected,
    Closed,
}

pub struct Connection {
    id: u32,
    host: Option<String>,
    port: u16,
    remote: Option<SocketAddr>,
    local: Option<SocketAddr>,
    send_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
    secure_port: bool,
    secure: bool,
    security: Option<SecurityInfo>,
    stream: Option<LineStream<BoxedStream>>,
    state: ConnectionState,
}

impl Connection {
    pub fn new() -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            host: None,
            port: 0,
            remote: None,
            local: None,
            send_timeout: None,
            receive_timeout: None,
            secure_port: false,
            secure: false,
            security: None,
            stream: None,
            state: ConnectionState::Unconnected,
        }
    }

    /// Open a TCP connection, optionally bounded by `timeout`, and run `upgrader` on it
    /// straight away (implicit TLS). If the upgrade fails the connection is torn down before
    /// the error is returned.
    pub async fn connect(
        &mut self,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
        upgrader: Option<&dyn StreamUpgrader>,
    ) -> Result<(), ConnectionError> {
        match self.state {
            ConnectionState::Connected => return Err(ConnectionError::AlreadyConnected),
            ConnectionState::Closed => return Err(ConnectionError::Closed),
            ConnectionState::Unconnected => {}
        }
        if host.trim().is_empty() {
            return Err(ConnectionError::InvalidHost);
        }
        if port == 0 {
            return Err(ConnectionError::InvalidPort);
        }
        debug!(id = self.id, host, port, ?timeout, "connecting");
        self.establish(host, port, timeout, upgrader, TcpStream::connect((host, port))).await
    }

    /// Drive a TCP connect `attempt` to completion under `timeout`, then adopt the socket.
    async fn establish<F>(
        &mut self,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
        upgrader: Option<&dyn StreamUpgrader>,
        attempt: F,
    ) -> Result<(), ConnectionError>
    where
        F: Future<Output = io::Result<TcpStream>>,
    {
        let result = match timeout {
            // Dropping the pending attempt closes its socket.
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(id = self.id, host, port, "connect timed out after {:?}", limit);
                    return Err(ConnectionError::Timeout(limit));
                }
            },
            None => attempt.await,
        };
        let tcp = result.map_err(|source| ConnectionError::Connect {
            host: host.to_string(),
            port,
            source,
        })?;

        self.remote = tcp.peer_addr().ok();
        self.local = tcp.local_addr().ok();
        self.host = Some(host.to_string());
        self.port = port;
        self.send_timeout = None;
        self.receive_timeout = None;
        self.stream = Some(LineStream::new(Box::new(tcp)));
        self.state = ConnectionState::Connected;
        info!(id = self.id, "connected to {}", self);

        if let Some(upgrader) = upgrader {
            if let Err(e) = self.upgrade_stream(upgrader).await {
                self.close().await;
                return Err(e);
            }
            self.secure_port = true;
        }
        Ok(())
    }

    /// Replace the active stream with the upgrader's (STARTTLS). Pending output is flushed
    /// first. On failure the connection is closed and must be discarded.
    pub async fn upgrade_stream(&mut self, upgrader: &dyn StreamUpgrader) -> Result<(), ConnectionError> {
        let send_timeout = self.send_timeout;
        let stream = self.active_stream()?;
        if let Err(e) = with_timeout(send_timeout, stream.flush()).await {
            warn!(id = self.id, "flush before upgrade failed: {}", e);
            self.close().await;
            return Err(e);
        }
        let raw = match self.stream.take() {
            Some(s) => s.into_inner(),
            None => return Err(ConnectionError::NotConnected),
        };

        let info = self.info();
        match upgrader.upgrade(&info, raw).await {
            Ok(upgraded) => {
                if let Some(security) = &upgraded.security {
                    debug!(id = self.id, security = %security, "stream upgraded");
                }
                self.stream = Some(LineStream::new(upgraded.stream));
                self.security = upgraded.security;
                self.secure = true;
                Ok(())
            }
            Err(e) => {
                warn!(id = self.id, "stream upgrade failed: {}", e);
                self.state = ConnectionState::Closed;
                Err(ConnectionError::Upgrade(e))
            }
        }
    }

    /// Read from the active stream, honoring the receive timeout. `Ok(0)` means end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ConnectionError> {
        let limit = self.receive_timeout;
        let stream = self.active_stream()?;
        with_timeout(limit, stream.get_mut().read(buf)).await
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        let limit = self.send_timeout;
        let stream = self.active_stream()?;
        with_timeout(limit, stream.write(data)).await
    }

    /// Flush pending output, then relay `source` (literal or binary upload).
    pub async fn write_from<R>(&mut self, source: &mut R) -> Result<u64, ConnectionError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let limit = self.send_timeout;
        let stream = self.active_stream()?;
        with_timeout(limit, stream.write_from(source)).await
    }

    pub async fn flush(&mut self) -> Result<(), ConnectionError> {
        let limit = self.send_timeout;
        let stream = self.active_stream()?;
        with_timeout(limit, stream.flush()).await
    }

    /// Flush and shut down the stream, ignoring errors. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed && self.stream.is_none() {
            return;
        }
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = with_timeout(self.send_timeout, stream.shutdown()).await {
                debug!(id = self.id, "error during shutdown: {}", e);
            }
        }
        if self.state == ConnectionState::Connected {
            info!(id = self.id, "disconnected from {}", self.host.as_deref().unwrap_or(""));
        }
        self.state = ConnectionState::Closed;
    }

    /// `Some(ZERO)` is stored as 1 ms.
    pub fn set_send_timeout(&mut self, timeout: Option<Duration>) -> Result<(), ConnectionError> {
        self.active_stream()?;
        self.send_timeout = timeout.map(normalize_timeout);
        Ok(())
    }

    /// `Some(ZERO)` is stored as 1 ms.
    pub fn set_receive_timeout(&mut self, timeout: Option<Duration>) -> Result<(), ConnectionError> {
        self.active_stream()?;
        self.receive_timeout = timeout.map(normalize_timeout);
        Ok(())
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout
    }

    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// TLS was negotiated as part of connect (implicit-TLS port).
    pub fn is_secure_port_connection(&self) -> bool {
        self.secure_port
    }

    /// Some upgrade has taken place, at connect or later.
    pub fn is_secure_connection(&self) -> bool {
        self.secure
    }

    pub fn security_info(&self) -> Option<&SecurityInfo> {
        self.security.as_ref()
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            host: self.host.clone().unwrap_or_default(),
            port: self.port,
            remote: self.remote,
            local: self.local,
        }
    }

    fn active_stream(&mut self) -> Result<&mut LineStream<BoxedStream>, ConnectionError> {
        if self.state != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected);
        }
        self.stream.as_mut().ok_or(ConnectionError::NotConnected)
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.host, self.state) {
            (Some(host), ConnectionState::Connected) => {
                write!(f, "{{{}:{}", host, self.port)?;
                if let Some(remote) = self.remote {
                    write!(f, ", remote={}", remote)?;
                }
                if let Some(local) = self.local {
                    write!(f, ", local={}", local)?;
                }
                write!(f, "}}")
            }
            _ => write!(f, "{{not connected}}"),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("state", &self.state)
            .field("secure", &self.secure)
            .finish()
    }
}
