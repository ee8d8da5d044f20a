/*
 * config.rs
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

//! Connection settings (from a server URL or JSON) and credential lookup.
//!
//! Credentials come from a [`CredentialSource`]: an in-memory table for tests and embedding,
//! or the system keychain via the keyring crate. Keychain secrets are stored as a 4-byte LE
//! username length + username, 4-byte LE domain length + domain, then the password (UTF-8).

use std::time::Duration;

use keyring::Entry;
use serde::Deserialize;
use tracing::debug;
use zeroize::Zeroizing;

use crate::net::{timeout_from_millis, Connection, ConnectionError, StreamUpgrader, TlsUpgrader};
use crate::sasl::{Credential, MechanismRegistry, SaslClient, SaslError};
use crate::uri::ServerUri;

/// Service name for keyring entries.
const KEYRING_SERVICE: &str = "postern";

/// Tried in this order when no mechanism preference is configured. ANONYMOUS must be asked for.
const DEFAULT_PREFERENCE: [&str; 5] = ["DIGEST-MD5", "CRAM-MD5", "NTLM", "PLAIN", "LOGIN"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid server URI: {0}")]
    InvalidUri(String),
    #[error("unsupported URI scheme: {0}")]
    UnsupportedScheme(String),
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("missing setting: {0}")]
    MissingField(&'static str),
    #[error("no acceptable SASL mechanism offered")]
    NoMechanism,
    #[error("refusing plaintext mechanism over an insecure channel: {0}")]
    PlaintextRefused(String),
    #[error("no credential for {0}")]
    NoCredential(String),
    #[error("stored credential is malformed")]
    InvalidSecret,
    #[error("configuration parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Sasl(#[from] SaslError),
    #[error("keychain error: {0}")]
    Keyring(#[from] keyring::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// No TLS.
    Plain,
    /// Handshake immediately after connect.
    Implicit,
    /// Plain connect; the protocol layer upgrades after STARTTLS/STLS.
    #[serde(alias = "start_tls")]
    StartTls,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub tls: TlsMode,
    pub connect_timeout: Option<Duration>,
    pub send_timeout: Option<Duration>,
    pub receive_timeout: Option<Duration>,
    pub service_name: String,
    pub username: Option<String>,
    /// Preferred mechanisms, most preferred first. Empty means the built-in order.
    pub mechanisms: Vec<String>,
}

/// On-disk shape: either `uri` or `host` + `port`, plus optional overrides.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    uri: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    tls: Option<TlsMode>,
    connect_timeout_ms: Option<i64>,
    send_timeout_ms: Option<i64>,
    receive_timeout_ms: Option<i64>,
    service_name: Option<String>,
    username: Option<String>,
    #[serde(default)]
    mechanisms: Vec<String>,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: TlsMode::Plain,
            connect_timeout: None,
            send_timeout: None,
            receive_timeout: None,
            service_name: String::new(),
            username: None,
            mechanisms: Vec::new(),
        }
    }

    pub fn with_tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_mechanisms<I, S>(mut self, mechanisms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mechanisms = mechanisms.into_iter().map(|m| m.into().to_ascii_uppercase()).collect();
        self
    }

    /// Host, port, TLS mode, service name, user and `;AUTH=` preference from a server URL.
    /// Non-TLS schemes default to STARTTLS.
    pub fn from_uri(uri: &str) -> Result<Self, ConfigError> {
        let uri = ServerUri::parse(uri)?;
        let tls = if uri.scheme.implicit_tls() { TlsMode::Implicit } else { TlsMode::StartTls };
        let mut config = Self::new(uri.host.clone(), uri.port())
            .with_tls(tls)
            .with_service_name(uri.scheme.service_name());
        config.username = uri.username;
        if let Some(mechanism) = uri.mechanism {
            config.mechanisms = vec![mechanism];
        }
        Ok(config)
    }

    /// Timeouts are in milliseconds; `-1` means none.
    pub fn from_json(json: &[u8]) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_slice(json)?;
        let mut config = match (&file.uri, &file.host) {
            (Some(uri), _) => Self::from_uri(uri)?,
            (None, Some(host)) => {
                let port = file.port.ok_or(ConfigError::MissingField("port"))?;
                Self::new(host.clone(), port)
            }
            (None, None) => return Err(ConfigError::MissingField("host")),
        };
        if file.uri.is_some() {
            if let Some(host) = file.host {
                config.host = host;
            }
            if let Some(port) = file.port {
                config.port = port;
            }
        }
        if config.host.trim().is_empty() {
            return Err(ConnectionError::InvalidHost.into());
        }
        if config.port == 0 {
            return Err(ConnectionError::InvalidPort.into());
        }
        if let Some(tls) = file.tls {
            config.tls = tls;
        }
        if let Some(ms) = file.connect_timeout_ms {
            config.connect_timeout = timeout_from_millis(ms)?;
        }
        if let Some(ms) = file.send_timeout_ms {
            config.send_timeout = timeout_from_millis(ms)?;
        }
        if let Some(ms) = file.receive_timeout_ms {
            config.receive_timeout = timeout_from_millis(ms)?;
        }
        if let Some(service_name) = file.service_name {
            config.service_name = service_name;
        }
        if file.username.is_some() {
            config.username = file.username;
        }
        if !file.mechanisms.is_empty() {
            config = config.with_mechanisms(file.mechanisms);
        }
        Ok(config)
    }

    fn preference(&self) -> Vec<&str> {
        if self.mechanisms.is_empty() {
            DEFAULT_PREFERENCE.to_vec()
        } else {
            self.mechanisms.iter().map(String::as_str).collect()
        }
    }

    /// First preferred mechanism that the server offers and the registry knows. Plaintext
    /// mechanisms are skipped unless `secure`. The client gets the service name and the
    /// server host as NTLM target host.
    pub fn select_mechanism(
        &self,
        registry: &MechanismRegistry,
        server_offers: &[&str],
        secure: bool,
    ) -> Result<SaslClient, ConfigError> {
        let mut refused = Vec::new();
        for name in self.preference() {
            if !server_offers.iter().any(|o| o.eq_ignore_ascii_case(name)) || !registry.contains(name) {
                continue;
            }
            if !secure && registry.is_plain_text(name)? {
                debug!(mechanism = name, "skipping plaintext mechanism on insecure channel");
                refused.push(name);
                continue;
            }
            let mut client = registry.create(name)?;
            if !self.service_name.is_empty() {
                client.set_service_name(self.service_name.as_str())?;
            }
            client.set_target_host(self.host.as_str())?;
            return Ok(client);
        }
        if refused.is_empty() {
            Err(ConfigError::NoMechanism)
        } else {
            Err(ConfigError::PlaintextRefused(refused.join(", ")))
        }
    }

    /// `select_mechanism` plus a credential from `source`.
    pub fn prepare_client(
        &self,
        registry: &MechanismRegistry,
        server_offers: &[&str],
        secure: bool,
        source: &dyn CredentialSource,
    ) -> Result<SaslClient, ConfigError> {
        let mut client = self.select_mechanism(registry, server_offers, secure)?;
        let credential = source
            .lookup(&self.host, self.port, self.username.as_deref(), client.name())
            .ok_or_else(|| ConfigError::NoCredential(format!("{}:{}", self.host, self.port)))?;
        client.set_credential(credential)?;
        Ok(client)
    }

    /// Upgrader for STARTTLS on a connection opened with `TlsMode::StartTls`.
    pub fn tls_upgrader(&self) -> TlsUpgrader {
        TlsUpgrader::new().server_name(self.host.as_str())
    }

    /// Open a connection. Implicit TLS handshakes during connect; the send and receive
    /// timeouts are applied once connected.
    pub async fn connect(&self) -> Result<Connection, ConfigError> {
        let tls;
        let upgrader: Option<&dyn StreamUpgrader> = match self.tls {
            TlsMode::Implicit => {
                tls = self.tls_upgrader();
                Some(&tls as &dyn StreamUpgrader)
            }
            TlsMode::Plain | TlsMode::StartTls => None,
        };
        let mut connection = Connection::new();
        connection.connect(&self.host, self.port, self.connect_timeout, upgrader).await?;
        connection.set_send_timeout(self.send_timeout)?;
        connection.set_receive_timeout(self.receive_timeout)?;
        Ok(connection)
    }
}

/// Maps (host, port, username, mechanism) to a stored credential.
pub trait CredentialSource: Send + Sync {
    fn lookup(&self, host: &str, port: u16, username: Option<&str>, mechanism: &str) -> Option<Credential>;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    host: String,
    port: u16,
    mechanism: Option<String>,
    credential: Credential,
}

/// In-process credential table. A mechanism-specific entry wins over a generic one; among
/// equals the first inserted wins.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentials {
    entries: Vec<MemoryEntry>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, host: &str, port: u16, credential: Credential) {
        self.entries.push(MemoryEntry { host: host.to_ascii_lowercase(), port, mechanism: None, credential });
    }

    pub fn insert_for_mechanism(&mut self, host: &str, port: u16, mechanism: &str, credential: Credential) {
        self.entries.push(MemoryEntry {
            host: host.to_ascii_lowercase(),
            port,
            mechanism: Some(mechanism.to_ascii_uppercase()),
            credential,
        });
    }
}

impl CredentialSource for MemoryCredentials {
    fn lookup(&self, host: &str, port: u16, username: Option<&str>, mechanism: &str) -> Option<Credential> {
        let candidates = || {
            self.entries.iter().filter(move |e| {
                e.host.eq_ignore_ascii_case(host)
                    && e.port == port
                    && username.map_or(true, |u| e.credential.username() == u)
            })
        };
        candidates()
            .find(|e| e.mechanism.as_deref().is_some_and(|m| m.eq_ignore_ascii_case(mechanism)))
            .or_else(|| candidates().find(|e| e.mechanism.is_none()))
            .map(|e| e.credential.clone())
    }
}

/// Credentials in the platform keychain, one entry per host/port/user (and optionally mechanism).
#[derive(Debug, Clone)]
pub struct KeyringCredentials {
    service: String,
}

impl KeyringCredentials {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self { service: service.into() }
    }

    /// Save `credential` under its own key and as the endpoint default that lookups without a
    /// username read. The most recent store for an endpoint owns the default.
    pub fn store(
        &self,
        host: &str,
        port: u16,
        mechanism: Option<&str>,
        credential: &Credential,
    ) -> Result<(), ConfigError> {
        let secret = encode_secret(credential);
        for key in store_keys(host, port, credential.username(), mechanism) {
            Entry::new(&self.service, &key)?.set_secret(&secret)?;
        }
        Ok(())
    }

    /// Remove one entry, and the endpoint default if it belongs to the same user. No-op if
    /// nothing is stored.
    pub fn delete(&self, host: &str, port: u16, username: &str, mechanism: Option<&str>) -> Result<(), ConfigError> {
        let [own, default] = store_keys(host, port, username, mechanism);
        delete_entry(&Entry::new(&self.service, &own)?)?;
        if self.get(&default).is_some_and(|c| c.username() == username) {
            delete_entry(&Entry::new(&self.service, &default)?)?;
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Option<Credential> {
        let entry = Entry::new(&self.service, key).ok()?;
        let secret = Zeroizing::new(entry.get_secret().ok()?);
        match decode_secret(&secret) {
            Ok(c) => Some(c),
            Err(e) => {
                debug!(key, "ignoring keychain entry: {}", e);
                None
            }
        }
    }
}

impl Default for KeyringCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialSource for KeyringCredentials {
    fn lookup(&self, host: &str, port: u16, username: Option<&str>, mechanism: &str) -> Option<Credential> {
        lookup_keys(host, port, username, mechanism).iter().find_map(|key| self.get(key))
    }
}

fn delete_entry(entry: &Entry) -> Result<(), ConfigError> {
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// The user's own key, then the endpoint default.
fn store_keys(host: &str, port: u16, username: &str, mechanism: Option<&str>) -> [String; 2] {
    [entry_key(host, port, Some(username), mechanism), entry_key(host, port, None, mechanism)]
}

/// Mechanism-specific key first.
fn lookup_keys(host: &str, port: u16, username: Option<&str>, mechanism: &str) -> [String; 2] {
    [entry_key(host, port, username, Some(mechanism)), entry_key(host, port, username, None)]
}

/// `user@host:port`, with `;AUTH=MECH` appended for mechanism-specific entries.
fn entry_key(host: &str, port: u16, username: Option<&str>, mechanism: Option<&str>) -> String {
    let mut key = format!("{}@{}:{}", username.unwrap_or(""), host.to_ascii_lowercase(), port);
    if let Some(m) = mechanism {
        key.push_str(";AUTH=");
        key.push_str(&m.to_ascii_uppercase());
    }
    key
}

fn encode_secret(credential: &Credential) -> Zeroizing<Vec<u8>> {
    let u = credential.username().as_bytes();
    let d = credential.domain().unwrap_or("").as_bytes();
    let p = credential.password().as_bytes();
    let mut out = Zeroizing::new(Vec::with_capacity(8 + u.len() + d.len() + p.len()));
    out.extend_from_slice(&(u.len() as u32).to_le_bytes());
    out.extend_from_slice(u);
    out.extend_from_slice(&(d.len() as u32).to_le_bytes());
    out.extend_from_slice(d);
    out.extend_from_slice(p);
    out
}

fn decode_secret(secret: &[u8]) -> Result<Credential, ConfigError> {
    fn take_field(bytes: &[u8]) -> Result<(&str, &[u8]), ConfigError> {
        if bytes.len() < 4 {
            return Err(ConfigError::InvalidSecret);
        }
        let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let rest = &bytes[4..];
        if len > rest.len() {
            return Err(ConfigError::InvalidSecret);
        }
        let field = std::str::from_utf8(&rest[..len]).map_err(|_| ConfigError::InvalidSecret)?;
        Ok((field, &rest[len..]))
    }
    let (username, rest) = take_field(secret)?;
    let (domain, rest) = take_field(rest)?;
    let password = std::str::from_utf8(rest).map_err(|_| ConfigError::InvalidSecret)?;
    let credential = Credential::new(username, password);
    Ok(if domain.is_empty() { credential } else { credential.with_domain(domain) })
}
