/*
 * plain.rs
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

//! PLAIN SASL (RFC 4616). Requires TLS.

use super::{ClientMechanism, ExchangeOutcome, MechanismContext, SaslError};
use crate::byte_string::ByteString;

/// Build PLAIN message: authzid NUL authcid NUL password (UTF-8, no trailing NUL).
/// Caller must base64-encode for the wire (e.g. SMTP "AUTH PLAIN <base64>").
pub fn encode_plain(authzid: &str, authcid: &str, password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(authzid.len() + authcid.len() + password.len() + 2);
    out.extend_from_slice(authzid.as_bytes());
    out.push(0);
    out.extend_from_slice(authcid.as_bytes());
    out.push(0);
    out.extend_from_slice(password.as_bytes());
    out
}

/// Split a PLAIN message back into (authzid, authcid, password).
pub fn decode_plain(message: &[u8]) -> Result<(String, String, String), SaslError> {
    let invalid = || SaslError::Malformed("invalid PLAIN credentials format".to_string());
    let mut parts = message.splitn(3, |&b| b == 0);
    let authzid = parts.next().ok_or_else(invalid)?;
    let authcid = parts.next().ok_or_else(invalid)?;
    let password = parts.next().ok_or_else(invalid)?;
    let text = |b: &[u8]| String::from_utf8(b.to_vec()).map_err(|_| invalid());
    Ok((text(authzid)?, text(authcid)?, text(password)?))
}

#[derive(Debug, Default)]
pub struct PlainMechanism;

impl PlainMechanism {
    pub fn new() -> Self {
        Self
    }
}

impl ClientMechanism for PlainMechanism {
    fn client_first(&self) -> bool {
        true
    }

    fn exchange(
        &mut self,
        ctx: &MechanismContext<'_>,
        _challenge: &ByteString,
    ) -> Result<ExchangeOutcome, SaslError> {
        let credential = ctx.require_credential()?;
        if credential.username().is_empty() || credential.password().is_empty() {
            return Ok(ExchangeOutcome::failed());
        }
        let message = encode_plain(
            credential.domain().unwrap_or(""),
            credential.username(),
            credential.password(),
        );
        Ok(ExchangeOutcome::succeeded(message))
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sasl::{Credential, ExchangeStatus, MechanismRegistry};

    #[test]
    fn three_fields_two_nuls() {
        for (authzid, user, pass) in [("", "tim", "tanstaaf"), ("admin", "\u{e9}l\u{e8}ve", "p\u{e4}ss w0rd")] {
            let mut cred = Credential::new(user, pass);
            if !authzid.is_empty() {
                cred = cred.with_domain(authzid);
            }
            let mut client = MechanismRegistry::new().create("PLAIN").unwrap();
            client.set_credential(cred).unwrap();
            let outcome = client.initial_response().unwrap();
            assert_eq!(outcome.status, ExchangeStatus::Succeeded);
            let bytes = outcome.response.unwrap();
            assert_eq!(bytes.iter().filter(|&&b| b == 0).count(), 2);
            assert!(bytes.ends_with(pass.as_bytes()));
            let (z, c, p) = decode_plain(&bytes).unwrap();
            assert_eq!((z.as_str(), c.as_str(), p.as_str()), (authzid, user, pass));
        }
    }

    #[test]
    fn empty_password_fails() {
        let cred = Credential::new("tim", "");
        let ctx = MechanismContext { credential: Some(&cred), ..Default::default() };
        let outcome = PlainMechanism::new().exchange(&ctx, &ByteString::empty()).unwrap();
        assert_eq!(outcome, ExchangeOutcome::failed());
    }

    #[test]
    fn decode_rejects_missing_separator() {
        assert!(decode_plain(b"user\0pass").is_err());
    }
}
