/*
 * anonymous.rs
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

//! ANONYMOUS SASL (RFC 4505). The username is sent as trace information.

use super::{ClientMechanism, ExchangeOutcome, MechanismContext, SaslError};
use crate::byte_string::ByteString;

#[derive(Debug, Default)]
pub struct AnonymousMechanism;

impl AnonymousMechanism {
    pub fn new() -> Self {
        Self
    }
}

impl ClientMechanism for AnonymousMechanism {
    fn client_first(&self) -> bool {
        true
    }

    fn exchange(
        &mut self,
        ctx: &MechanismContext<'_>,
        _challenge: &ByteString,
    ) -> Result<ExchangeOutcome, SaslError> {
        let credential = ctx.require_credential()?;
        if credential.username().is_empty() {
            return Ok(ExchangeOutcome::failed());
        }
        Ok(ExchangeOutcome::succeeded(credential.username()))
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sasl::{Credential, ExchangeStatus};

    #[test]
    fn sends_trace_username() {
        let cred = Credential::new("sirhc@example.com", "");
        let ctx = MechanismContext { credential: Some(&cred), ..Default::default() };
        let outcome = AnonymousMechanism::new().exchange(&ctx, &ByteString::empty()).unwrap();
        assert_eq!(outcome.status, ExchangeStatus::Succeeded);
        assert_eq!(outcome.response.unwrap(), "sirhc@example.com");
    }

    #[test]
    fn empty_username_fails() {
        let cred = Credential::new("", "");
        let ctx = MechanismContext { credential: Some(&cred), ..Default::default() };
        let outcome = AnonymousMechanism::new().exchange(&ctx, &ByteString::empty()).unwrap();
        assert_eq!(outcome, ExchangeOutcome::failed());
    }
}
