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

//! SASL client: ANONYMOUS, LOGIN, PLAIN, CRAM-MD5, DIGEST-MD5, NTLM.
//!
//! - `MechanismRegistry` maps mechanism names to factories and answers "is this plaintext"
//! - `SaslClient` wraps one mechanism instance with its credential, service name and
//!   exchange status, and refuses further exchanges once the status is terminal
//! - each mechanism is a small state machine turning the previous server challenge into
//!   the next client response (raw octets; base64 framing belongs to the protocol layer)

mod anonymous;
mod cram_md5;
mod digest_md5;
mod login;
mod mechanism;
mod ntlm;
mod ntlm_crypto;
mod plain;
mod registry;

use std::fmt;

use tracing::debug;
use zeroize::Zeroize;

use crate::byte_string::ByteString;

pub use anonymous::AnonymousMechanism;
pub use cram_md5::{cram_md5_response, CramMd5Mechanism};
pub use digest_md5::{parse_directives, DigestMd5Mechanism};
pub use login::LoginMechanism;
pub use mechanism::{ClientMechanism, MechanismContext, SaslMechanism};
pub use ntlm::{NtlmChallengeMessage, NtlmFlags, NtlmMechanism};
pub use plain::{decode_plain, encode_plain, PlainMechanism};
pub use registry::{MechanismEntry, MechanismFactory, MechanismRegistry};

#[derive(Debug, thiserror::Error)]
pub enum SaslError {
    #[error("mechanism not supported: {0}")]
    NotSupported(String),
    #[error("invalid mechanism name")]
    InvalidMechanismName,
    #[error("credential must be set")]
    CredentialNotSet,
    #[error("service name must be set")]
    ServiceNameNotSet,
    #[error("initial response is not supported by {0}")]
    InitialResponseNotSupported(String),
    #[error("{0} mechanism has been disposed")]
    Disposed(String),
    #[error("malformed server challenge: {0}")]
    Malformed(String),
    #[error("crypto error: {0}")]
    Crypto(String),
}

/// Progress of one challenge/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStatus {
    None,
    Continuing,
    Succeeded,
    Failed,
}

impl ExchangeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExchangeStatus::Succeeded | ExchangeStatus::Failed)
    }
}

/// Status after one step plus the client response to send, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOutcome {
    pub status: ExchangeStatus,
    pub response: Option<ByteString>,
}

impl ExchangeOutcome {
    pub fn continuing(response: impl Into<ByteString>) -> Self {
        Self { status: ExchangeStatus::Continuing, response: Some(response.into()) }
    }

    pub fn succeeded(response: impl Into<ByteString>) -> Self {
        Self { status: ExchangeStatus::Succeeded, response: Some(response.into()) }
    }

    pub fn failed() -> Self {
        Self { status: ExchangeStatus::Failed, response: None }
    }
}

/// Username, password and optional domain (realm, authzid or NTLM domain).
/// The password is wiped from memory when the credential is dropped.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    username: String,
    password: String,
    domain: Option<String>,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into(), domain: None }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .finish()
    }
}

/// One authentication attempt driven through a mechanism instance.
///
/// Created by [`MechanismRegistry::create`]. Not synchronized: one caller drives the exchange.
pub struct SaslClient {
    name: String,
    plain_text: bool,
    client_first: bool,
    inner: Option<Box<dyn ClientMechanism>>,
    credential: Option<Credential>,
    service_name: Option<String>,
    target_host: Option<String>,
    client_nonce: Option<ByteString>,
    status: ExchangeStatus,
}

impl SaslClient {
    pub(crate) fn new(name: &str, plain_text: bool, inner: Box<dyn ClientMechanism>) -> Self {
        Self {
            name: name.to_string(),
            plain_text,
            client_first: inner.client_first(),
            inner: Some(inner),
            credential: None,
            service_name: None,
            target_host: None,
            client_nonce: None,
            status: ExchangeStatus::None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when the mechanism sends credentials without cryptographic protection.
    pub fn is_plain_text(&self) -> bool {
        self.plain_text
    }

    pub fn client_first(&self) -> bool {
        self.client_first
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_none()
    }

    pub fn credential(&self) -> Result<Option<&Credential>, SaslError> {
        self.check_disposed()?;
        Ok(self.credential.as_ref())
    }

    pub fn set_credential(&mut self, credential: Credential) -> Result<(), SaslError> {
        self.check_disposed()?;
        self.credential = Some(credential);
        Ok(())
    }

    /// GSSAPI service name (e.g. "imap", "smtp"); DIGEST-MD5 builds its digest-uri from it.
    pub fn set_service_name(&mut self, service_name: impl Into<String>) -> Result<(), SaslError> {
        self.check_disposed()?;
        self.service_name = Some(service_name.into());
        Ok(())
    }

    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// Workstation name sent by NTLM.
    pub fn set_target_host(&mut self, target_host: impl Into<String>) -> Result<(), SaslError> {
        self.check_disposed()?;
        self.target_host = Some(target_host.into());
        Ok(())
    }

    /// Fixed client nonce instead of a random one (DIGEST-MD5 cnonce).
    pub fn set_client_nonce(&mut self, nonce: impl Into<ByteString>) -> Result<(), SaslError> {
        self.check_disposed()?;
        self.client_nonce = Some(nonce.into());
        Ok(())
    }

    pub fn status(&self) -> Result<ExchangeStatus, SaslError> {
        self.check_disposed()?;
        Ok(self.status)
    }

    /// Reset to the initial state so the instance can start a fresh exchange.
    pub fn initialize(&mut self) -> Result<(), SaslError> {
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| SaslError::Disposed(self.name.clone()))?;
        inner.reset();
        self.client_nonce = None;
        self.status = ExchangeStatus::None;
        Ok(())
    }

    /// First message of a client-first mechanism, sent before any server challenge.
    pub fn initial_response(&mut self) -> Result<ExchangeOutcome, SaslError> {
        self.check_disposed()?;
        if !self.client_first {
            return Err(SaslError::InitialResponseNotSupported(self.name.clone()));
        }
        self.exchange(&[])
    }

    /// Feed one server challenge (raw octets) and produce the next client response.
    ///
    /// Once the status is `Succeeded` or `Failed` every further call yields a `Failed`
    /// outcome without a response; the recorded status is left as it was.
    pub fn exchange(&mut self, challenge: &[u8]) -> Result<ExchangeOutcome, SaslError> {
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| SaslError::Disposed(self.name.clone()))?;
        if self.status.is_terminal() {
            debug!(mechanism = %self.name, status = ?self.status, "exchange already terminated");
            return Ok(ExchangeOutcome::failed());
        }
        let ctx = MechanismContext {
            credential: self.credential.as_ref(),
            service_name: self.service_name.as_deref(),
            target_host: self.target_host.as_deref(),
            client_nonce: self.client_nonce.as_ref(),
        };
        let outcome = inner.exchange(&ctx, &ByteString::from(challenge))?;
        self.status = outcome.status;
        Ok(outcome)
    }

    /// Drop mechanism state and credential. Every later call fails with `Disposed`.
    pub fn dispose(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.reset();
        }
        self.credential = None;
        self.client_nonce = None;
    }

    fn check_disposed(&self) -> Result<(), SaslError> {
        if self.inner.is_none() {
            Err(SaslError::Disposed(self.name.clone()))
        } else {
            Ok(())
        }
    }
}

impl Drop for SaslClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for SaslClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslClient")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("disposed", &self.inner.is_none())
            .finish()
    }
}
