/*
 * login.rs
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

//! Legacy LOGIN: first challenge is "Username:", second is "Password:". Challenge text is not
//! inspected; the step counter decides what to send.

use super::{ClientMechanism, ExchangeOutcome, MechanismContext, SaslError};
use crate::byte_string::ByteString;

#[derive(Debug, Default)]
pub struct LoginMechanism {
    step: u8,
}

impl LoginMechanism {
    pub fn new() -> Self {
        Self { step: 0 }
    }
}

impl ClientMechanism for LoginMechanism {
    fn client_first(&self) -> bool {
        true
    }

    fn exchange(
        &mut self,
        ctx: &MechanismContext<'_>,
        _challenge: &ByteString,
    ) -> Result<ExchangeOutcome, SaslError> {
        let credential = ctx.require_credential()?;
        match self.step {
            0 => {
                self.step = 1;
                if credential.username().is_empty() {
                    return Ok(ExchangeOutcome::failed());
                }
                Ok(ExchangeOutcome::continuing(credential.username()))
            }
            1 => {
                self.step = 2;
                if credential.password().is_empty() {
                    return Ok(ExchangeOutcome::failed());
                }
                Ok(ExchangeOutcome::succeeded(credential.password()))
            }
            // unexpected challenge
            _ => Ok(ExchangeOutcome::failed()),
        }
    }

    fn reset(&mut self) {
        self.step = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sasl::{Credential, ExchangeStatus, MechanismRegistry};

    #[test]
    fn username_then_password() {
        let cred = Credential::new("tim", "tanstaaftanstaaf");
        let ctx = MechanismContext { credential: Some(&cred), ..Default::default() };
        let mut m = LoginMechanism::new();
        let first = m.exchange(&ctx, &ByteString::from("Username:")).unwrap();
        assert_eq!(first.status, ExchangeStatus::Continuing);
        assert_eq!(first.response.unwrap(), "tim");
        let second = m.exchange(&ctx, &ByteString::from("Password:")).unwrap();
        assert_eq!(second.status, ExchangeStatus::Succeeded);
        assert_eq!(second.response.unwrap(), "tanstaaftanstaaf");
        assert_eq!(m.exchange(&ctx, &ByteString::empty()).unwrap(), ExchangeOutcome::failed());
    }

    #[test]
    fn empty_password_fails_at_second_step() {
        let mut client = MechanismRegistry::new().create("LOGIN").unwrap();
        client.set_credential(Credential::new("tim", "")).unwrap();
        assert_eq!(client.initial_response().unwrap().status, ExchangeStatus::Continuing);
        assert_eq!(client.exchange(b"Password:").unwrap(), ExchangeOutcome::failed());
        assert_eq!(client.status().unwrap(), ExchangeStatus::Failed);
    }

    #[test]
    fn rejects_exchange_after_terminal_state() {
        let mut client = MechanismRegistry::new().create("LOGIN").unwrap();
        client.set_credential(Credential::new("tim", "secret")).unwrap();
        client.initial_response().unwrap();
        client.exchange(b"Password:").unwrap();
        assert_eq!(client.status().unwrap(), ExchangeStatus::Succeeded);
        let extra = client.exchange(b"Anything:").unwrap();
        assert_eq!(extra.status, ExchangeStatus::Failed);
        assert!(extra.response.is_none());
    }
}
