/*
 * mechanism.rs
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

//! SASL mechanism names, metadata and the per-mechanism exchange capability.

use super::{
    AnonymousMechanism, CramMd5Mechanism, Credential, DigestMd5Mechanism, ExchangeOutcome,
    LoginMechanism, NtlmMechanism, PlainMechanism, SaslError,
};
use crate::byte_string::ByteString;

/// Built-in SASL mechanisms (client-side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaslMechanism {
    /// ANONYMOUS (RFC 4505) – trace information only.
    Anonymous,
    /// Legacy LOGIN – username then password.
    Login,
    /// PLAIN (RFC 4616).
    Plain,
    /// CRAM-MD5 (RFC 2195) – challenge-response.
    CramMd5,
    /// DIGEST-MD5 (RFC 2831) – challenge-response, qop=auth only.
    DigestMd5,
    /// NTLM – negotiate / challenge / authenticate.
    Ntlm,
}

impl SaslMechanism {
    pub const ALL: [SaslMechanism; 6] = [
        SaslMechanism::Anonymous,
        SaslMechanism::Login,
        SaslMechanism::Plain,
        SaslMechanism::CramMd5,
        SaslMechanism::DigestMd5,
        SaslMechanism::Ntlm,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SaslMechanism::Anonymous => "ANONYMOUS",
            SaslMechanism::Login => "LOGIN",
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::CramMd5 => "CRAM-MD5",
            SaslMechanism::DigestMd5 => "DIGEST-MD5",
            SaslMechanism::Ntlm => "NTLM",
        }
    }

    /// Credentials cross the wire unprotected; only use over TLS.
    pub fn is_plain_text(&self) -> bool {
        matches!(
            self,
            SaslMechanism::Anonymous | SaslMechanism::Login | SaslMechanism::Plain
        )
    }

    pub fn client_first(&self) -> bool {
        !matches!(self, SaslMechanism::CramMd5 | SaslMechanism::DigestMd5)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_uppercase().as_str() {
            "ANONYMOUS" => Some(SaslMechanism::Anonymous),
            "LOGIN" => Some(SaslMechanism::Login),
            "PLAIN" => Some(SaslMechanism::Plain),
            "CRAM-MD5" => Some(SaslMechanism::CramMd5),
            "DIGEST-MD5" => Some(SaslMechanism::DigestMd5),
            "NTLM" => Some(SaslMechanism::Ntlm),
            _ => None,
        }
    }

    /// Fresh state machine for this mechanism.
    pub fn instantiate(&self) -> Box<dyn ClientMechanism> {
        match self {
            SaslMechanism::Anonymous => Box::new(AnonymousMechanism::new()),
            SaslMechanism::Login => Box::new(LoginMechanism::new()),
            SaslMechanism::Plain => Box::new(PlainMechanism::new()),
            SaslMechanism::CramMd5 => Box::new(CramMd5Mechanism::new()),
            SaslMechanism::DigestMd5 => Box::new(DigestMd5Mechanism::new()),
            SaslMechanism::Ntlm => Box::new(NtlmMechanism::new()),
        }
    }
}

impl std::fmt::Display for SaslMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Settings a mechanism reads while producing a response. Borrowed from the owning `SaslClient`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MechanismContext<'a> {
    pub credential: Option<&'a Credential>,
    pub service_name: Option<&'a str>,
    pub target_host: Option<&'a str>,
    pub client_nonce: Option<&'a ByteString>,
}

impl<'a> MechanismContext<'a> {
    pub fn require_credential(&self) -> Result<&'a Credential, SaslError> {
        self.credential.ok_or(SaslError::CredentialNotSet)
    }

    pub fn require_service_name(&self) -> Result<&'a str, SaslError> {
        match self.service_name {
            Some(s) if !s.is_empty() => Ok(s),
            _ => Err(SaslError::ServiceNameNotSet),
        }
    }
}

/// One client mechanism state machine.
///
/// `exchange` receives the previous server challenge (empty for the first call of a
/// client-first mechanism). Protocol problems are reported as a `Failed` outcome; `Err`
/// is reserved for caller misuse such as a missing credential.
pub trait ClientMechanism: Send {
    fn client_first(&self) -> bool {
        false
    }

    fn exchange(
        &mut self,
        ctx: &MechanismContext<'_>,
        challenge: &ByteString,
    ) -> Result<ExchangeOutcome, SaslError>;

    /// Return to step 0, releasing any per-exchange state.
    fn reset(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_case_insensitively() {
        for m in SaslMechanism::ALL {
            assert_eq!(SaslMechanism::from_name(&m.name().to_lowercase()), Some(m));
        }
        assert_eq!(SaslMechanism::from_name("X-UNKNOWN"), None);
    }

    #[test]
    fn plaintext_classification() {
        assert!(SaslMechanism::Anonymous.is_plain_text());
        assert!(SaslMechanism::Login.is_plain_text());
        assert!(SaslMechanism::Plain.is_plain_text());
        assert!(!SaslMechanism::CramMd5.is_plain_text());
        assert!(!SaslMechanism::DigestMd5.is_plain_text());
        assert!(!SaslMechanism::Ntlm.is_plain_text());
    }

    #[test]
    fn instance_agrees_on_client_first() {
        for m in SaslMechanism::ALL {
            assert_eq!(m.instantiate().client_first(), m.client_first(), "{}", m);
        }
    }
}
