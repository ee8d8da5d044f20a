/*
 * cram_md5.rs
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

//! CRAM-MD5 (RFC 2195): `username SP hex(HMAC-MD5(password, challenge))`.

use hmac::{Hmac, Mac};
use md5::Md5;

use super::{ClientMechanism, ExchangeOutcome, MechanismContext, SaslError};
use crate::byte_string::{to_hex_lower, ByteString};

type HmacMd5 = Hmac<Md5>;

/// Response for one CRAM-MD5 challenge (raw challenge octets, not base64).
pub fn cram_md5_response(
    authcid: &str,
    password: &str,
    challenge: &[u8],
) -> Result<Vec<u8>, SaslError> {
    let mut mac = <HmacMd5 as Mac>::new_from_slice(password.as_bytes())
        .map_err(|e| SaslError::Crypto(e.to_string()))?;
    mac.update(challenge);
    let digest = mac.finalize().into_bytes();
    let response = format!("{} {}", authcid, to_hex_lower(&digest));
    Ok(response.into_bytes())
}

#[derive(Debug, Default)]
pub struct CramMd5Mechanism {
    answered: bool,
}

impl CramMd5Mechanism {
    pub fn new() -> Self {
        Self { answered: false }
    }
}

impl ClientMechanism for CramMd5Mechanism {
    fn exchange(
        &mut self,
        ctx: &MechanismContext<'_>,
        challenge: &ByteString,
    ) -> Result<ExchangeOutcome, SaslError> {
        let credential = ctx.require_credential()?;
        if self.answered {
            return Ok(ExchangeOutcome::failed());
        }
        self.answered = true;
        if credential.username().is_empty() || credential.password().is_empty() {
            return Ok(ExchangeOutcome::failed());
        }
        let response = cram_md5_response(credential.username(), credential.password(), challenge)?;
        Ok(ExchangeOutcome::succeeded(response))
    }

    fn reset(&mut self) {
        self.answered = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sasl::{Credential, ExchangeStatus, MechanismRegistry};

    const CHALLENGE: &[u8] = b"<1896.697170952@postoffice.reston.mci.net>";

    #[test]
    fn rfc2195_example() {
        let r = cram_md5_response("tim", "tanstaaftanstaaf", CHALLENGE).unwrap();
        assert_eq!(r, b"tim b913a602c7eda7a495b4e6e7334d3890".to_vec());
    }

    #[test]
    fn deterministic_and_matches_hmac() {
        let mut client = MechanismRegistry::new().create("CRAM-MD5").unwrap();
        client.set_credential(Credential::new("tim", "tanstaaftanstaaf")).unwrap();
        let outcome = client.exchange(CHALLENGE).unwrap();
        assert_eq!(outcome.status, ExchangeStatus::Succeeded);
        let response = outcome.response.unwrap();

        let mut mac = <HmacMd5 as Mac>::new_from_slice(b"tanstaaftanstaaf").unwrap();
        mac.update(CHALLENGE);
        let expected = to_hex_lower(&mac.finalize().into_bytes());
        let text = String::from_utf8(response.to_vec()).unwrap();
        let (user, hex) = text.split_once(' ').unwrap();
        assert_eq!(user, "tim");
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_eq!(hex, expected);

        let again = cram_md5_response("tim", "tanstaaftanstaaf", CHALLENGE).unwrap();
        assert_eq!(response.as_bytes(), again.as_slice());
    }

    #[test]
    fn empty_username_fails() {
        let mut client = MechanismRegistry::new().create("CRAM-MD5").unwrap();
        client.set_credential(Credential::new("", "secret")).unwrap();
        assert_eq!(client.exchange(CHALLENGE).unwrap(), ExchangeOutcome::failed());
    }
}
