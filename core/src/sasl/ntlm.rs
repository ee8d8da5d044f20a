/*
 * ntlm.rs
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

//! NTLM (v1) over SASL: Type-1 negotiate, Type-2 challenge, Type-3 authenticate.
//!
//! Messages are the raw NTLMSSP binary form. The Type-3 message carries both the LM and the
//! NT response to the server nonce.

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use super::ntlm_crypto::{des_response, lm_hash, nt_hash};
use super::{ClientMechanism, Credential, ExchangeOutcome, MechanismContext, SaslError};
use crate::byte_string::ByteString;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";
const TYPE_NEGOTIATE: u32 = 1;
const TYPE_CHALLENGE: u32 = 2;
const TYPE_AUTHENTICATE: u32 = 3;

const NEGOTIATE_HEADER_LEN: usize = 32;
const CHALLENGE_MIN_LEN: usize = 32;
const AUTHENTICATE_HEADER_LEN: usize = 64;

bitflags! {
    /// NTLMSSP negotiation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NtlmFlags: u32 {
        const NEGOTIATE_UNICODE = 0x0000_0001;
        const NEGOTIATE_OEM = 0x0000_0002;
        const REQUEST_TARGET = 0x0000_0004;
        const NEGOTIATE_NTLM = 0x0000_0200;
        const NEGOTIATE_DOMAIN_SUPPLIED = 0x0000_1000;
        const NEGOTIATE_WORKSTATION_SUPPLIED = 0x0000_2000;
        const NEGOTIATE_ALWAYS_SIGN = 0x0000_8000;
        const TARGET_TYPE_DOMAIN = 0x0001_0000;
        const TARGET_TYPE_SERVER = 0x0002_0000;
        const NEGOTIATE_EXTENDED_SECURITY = 0x0008_0000;
        const NEGOTIATE_TARGET_INFO = 0x0080_0000;
    }
}

/// Length and offset of a variable field, relative to the start of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SecurityBuffer {
    length: u16,
    offset: u32,
}

impl SecurityBuffer {
    fn read(message: &[u8], at: usize) -> Self {
        Self {
            length: LittleEndian::read_u16(&message[at..at + 2]),
            offset: LittleEndian::read_u32(&message[at + 4..at + 8]),
        }
    }

    fn write(&self, header: &mut [u8], at: usize) {
        LittleEndian::write_u16(&mut header[at..at + 2], self.length);
        LittleEndian::write_u16(&mut header[at + 2..at + 4], self.length);
        LittleEndian::write_u32(&mut header[at + 4..at + 8], self.offset);
    }

    fn extract<'a>(&self, message: &'a [u8]) -> Result<&'a [u8], SaslError> {
        let start = self.offset as usize;
        let end = start + self.length as usize;
        if end > message.len() {
            return Err(SaslError::Malformed("NTLM security buffer extends beyond message".into()));
        }
        Ok(&message[start..end])
    }
}

/// Fixed header followed by the variable payload the header's security buffers point into.
struct MessageWriter {
    header: Vec<u8>,
    payload: Vec<u8>,
}

impl MessageWriter {
    fn new(message_type: u32, header_len: usize) -> Self {
        let mut header = vec![0u8; header_len];
        header[..8].copy_from_slice(SIGNATURE);
        LittleEndian::write_u32(&mut header[8..12], message_type);
        Self { header, payload: Vec::new() }
    }

    fn flags(&mut self, at: usize, flags: NtlmFlags) {
        LittleEndian::write_u32(&mut self.header[at..at + 4], flags.bits());
    }

    /// Append `data` to the payload and point the security buffer at `at` to it.
    fn field(&mut self, at: usize, data: &[u8]) -> Result<(), SaslError> {
        let length = u16::try_from(data.len())
            .map_err(|_| SaslError::Malformed("NTLM field too long".into()))?;
        let offset = u32::try_from(self.header.len() + self.payload.len())
            .map_err(|_| SaslError::Malformed("NTLM message too long".into()))?;
        SecurityBuffer { length, offset }.write(&mut self.header, at);
        self.payload.extend_from_slice(data);
        Ok(())
    }

    fn finish(mut self) -> ByteString {
        self.header.extend_from_slice(&self.payload);
        ByteString::from(self.header)
    }
}

fn oem(s: &str) -> ByteString {
    ByteString::from_latin1(s)
}

fn unicode(s: &str) -> ByteString {
    ByteString::from(s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect::<Vec<u8>>())
}

/// Type-1 message. Domain and workstation are sent upper-cased in the OEM charset.
pub(crate) fn negotiate_message(domain: &str, workstation: &str) -> Result<ByteString, SaslError> {
    let domain = oem(&domain.to_uppercase());
    let workstation = oem(&workstation.to_uppercase());
    let mut flags = NtlmFlags::NEGOTIATE_UNICODE
        | NtlmFlags::NEGOTIATE_OEM
        | NtlmFlags::REQUEST_TARGET
        | NtlmFlags::NEGOTIATE_NTLM;
    if !domain.is_empty() {
        flags |= NtlmFlags::NEGOTIATE_DOMAIN_SUPPLIED;
    }
    if !workstation.is_empty() {
        flags |= NtlmFlags::NEGOTIATE_WORKSTATION_SUPPLIED;
    }
    let mut w = MessageWriter::new(TYPE_NEGOTIATE, NEGOTIATE_HEADER_LEN);
    w.flags(12, flags);
    w.field(24, &workstation)?;
    w.field(16, &domain)?;
    Ok(w.finish())
}

/// Parsed Type-2 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmChallengeMessage {
    pub flags: NtlmFlags,
    /// Server nonce.
    pub challenge: [u8; 8],
    pub target_name: ByteString,
    pub target_info: ByteString,
}

impl NtlmChallengeMessage {
    pub fn parse(data: &[u8]) -> Result<Self, SaslError> {
        if data.len() < CHALLENGE_MIN_LEN {
            return Err(SaslError::Malformed("NTLM challenge message too short".into()));
        }
        if &data[..8] != SIGNATURE {
            return Err(SaslError::Malformed("NTLM signature missing".into()));
        }
        let message_type = LittleEndian::read_u32(&data[8..12]);
        if message_type != TYPE_CHALLENGE {
            return Err(SaslError::Malformed(format!("expected NTLM Type-2, got type {}", message_type)));
        }
        let flags = NtlmFlags::from_bits_retain(LittleEndian::read_u32(&data[20..24]));
        let mut challenge = [0u8; 8];
        challenge.copy_from_slice(&data[24..32]);
        let target_name = ByteString::from(SecurityBuffer::read(data, 12).extract(data)?);
        let target_info = if data.len() >= 48 && flags.contains(NtlmFlags::NEGOTIATE_TARGET_INFO) {
            ByteString::from(SecurityBuffer::read(data, 40).extract(data)?)
        } else {
            ByteString::empty()
        };
        Ok(Self { flags, challenge, target_name, target_info })
    }
}

/// Type-3 message with LM and NT responses to the Type-2 nonce.
pub(crate) fn authenticate_message(
    credential: &Credential,
    workstation: &str,
    type2: &NtlmChallengeMessage,
) -> Result<ByteString, SaslError> {
    let use_unicode = type2.flags.contains(NtlmFlags::NEGOTIATE_UNICODE);
    let encode = if use_unicode { unicode } else { oem };
    let charset = if use_unicode { NtlmFlags::NEGOTIATE_UNICODE } else { NtlmFlags::NEGOTIATE_OEM };

    let domain = encode(&credential.domain().unwrap_or("").to_uppercase());
    let user = encode(credential.username());
    let host = encode(&workstation.to_uppercase());
    let lm = des_response(&*lm_hash(credential.password())?, &type2.challenge)?;
    let nt = des_response(&*nt_hash(credential.password()), &type2.challenge)?;

    let mut w = MessageWriter::new(TYPE_AUTHENTICATE, AUTHENTICATE_HEADER_LEN);
    w.field(28, &domain)?;
    w.field(36, &user)?;
    w.field(44, &host)?;
    w.field(12, &lm)?;
    w.field(20, &nt)?;
    w.field(52, &[])?;
    w.flags(60, charset | NtlmFlags::NEGOTIATE_NTLM);
    Ok(w.finish())
}

#[derive(Debug, Default)]
pub struct NtlmMechanism {
    step: u8,
}

impl NtlmMechanism {
    pub fn new() -> Self {
        Self { step: 0 }
    }
}

impl ClientMechanism for NtlmMechanism {
    fn client_first(&self) -> bool {
        true
    }

    fn exchange(
        &mut self,
        ctx: &MechanismContext<'_>,
        challenge: &ByteString,
    ) -> Result<ExchangeOutcome, SaslError> {
        let credential = ctx.require_credential()?;
        let workstation = ctx.target_host.unwrap_or("");
        match self.step {
            0 => {
                self.step = 1;
                let message = negotiate_message(credential.domain().unwrap_or(""), workstation)?;
                Ok(ExchangeOutcome::continuing(message))
            }
            1 => {
                self.step = 2;
                if credential.username().is_empty() || credential.password().is_empty() {
                    return Ok(ExchangeOutcome::failed());
                }
                let type2 = match NtlmChallengeMessage::parse(challenge) {
                    Ok(t) => t,
                    Err(e) => {
                        debug!("NTLM: {}", e);
                        return Ok(ExchangeOutcome::failed());
                    }
                };
                let message = authenticate_message(credential, workstation, &type2)?;
                Ok(ExchangeOutcome::succeeded(message))
            }
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
    use crate::sasl::{ExchangeStatus, MechanismRegistry, SaslClient};

    const TYPE1: &str = "TlRMTVNTUAABAAAABzIAAAYABgArAAAACwALACAAAABXT1JLU1RBVElPTkRPTUFJTg==";
    const TYPE2: &str = "TlRMTVNTUAACAAAADAAMADAAAAABAoEAASNFZ4mrze8AAAAAAAAAAGIAYgA8AAAARABPAE0AQQBJAE4AAgAMAEQATwBNAEEASQBOAAEADABTAEUAUgBWAEUAUgAEABQAZABvAG0AYQBpAG4ALgBjAG8AbQADACIAcwBlAHIAdgBlAHIALgBkAG8AbQBhAGkAbgAuAGMAbwBtAAAAAAA=";
    const TYPE3: &str = "TlRMTVNTUAADAAAAGAAYAGoAAAAYABgAggAAAAwADABAAAAACAAIAEwAAAAWABYAVAAAAAAAAACaAAAAAQIAAEQATwBNAEEASQBOAHUAcwBlAHIAVwBPAFIASwBTAFQAQQBUAEkATwBOAMM3zVy9RPyXgqZnr21CfG3mfCDC0+d8ViWpjBwx6BhHRmspst9GgPOZWPuMITqcxg==";

    fn client(user: &str, password: &str) -> SaslClient {
        let mut client = MechanismRegistry::new().create("NTLM").unwrap();
        client.set_credential(Credential::new(user, password).with_domain("DOMAIN")).unwrap();
        client.set_target_host("WORKSTATION").unwrap();
        client
    }

    #[test]
    fn negotiate_challenge_authenticate() {
        let mut client = client("user", "SecREt01");
        let type1 = client.initial_response().unwrap();
        assert_eq!(type1.status, ExchangeStatus::Continuing);
        assert_eq!(type1.response.unwrap().to_base64(), TYPE1);

        let type2 = ByteString::from_base64(TYPE2).unwrap();
        let type3 = client.exchange(&type2).unwrap();
        assert_eq!(type3.status, ExchangeStatus::Succeeded);
        assert_eq!(type3.response.unwrap().to_base64(), TYPE3);

        assert_eq!(client.exchange(&type2).unwrap(), ExchangeOutcome::failed());
    }

    #[test]
    fn mechanism_fails_past_final_step() {
        let cred = Credential::new("user", "SecREt01");
        let ctx = MechanismContext { credential: Some(&cred), ..Default::default() };
        let type2 = ByteString::from_base64(TYPE2).unwrap();
        let mut m = NtlmMechanism::new();
        m.exchange(&ctx, &ByteString::empty()).unwrap();
        assert_eq!(m.exchange(&ctx, &type2).unwrap().status, ExchangeStatus::Succeeded);
        assert_eq!(m.exchange(&ctx, &type2).unwrap(), ExchangeOutcome::failed());
    }

    #[test]
    fn parses_type2() {
        let msg = NtlmChallengeMessage::parse(&ByteString::from_base64(TYPE2).unwrap()).unwrap();
        assert_eq!(msg.flags.bits(), 0x0081_0201);
        assert!(msg.flags.contains(NtlmFlags::TARGET_TYPE_DOMAIN));
        assert_eq!(msg.challenge, [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef]);
        assert_eq!(msg.target_name, unicode("DOMAIN"));
        assert_eq!(msg.target_info.len(), 98);
    }

    #[test]
    fn rejects_bad_type2() {
        assert!(NtlmChallengeMessage::parse(b"NTLMSSP\0").is_err());
        let mut wrong_type = ByteString::from_base64(TYPE2).unwrap().to_vec();
        wrong_type[8] = 3;
        assert!(NtlmChallengeMessage::parse(&wrong_type).is_err());
        let mut overflow = ByteString::from_base64(TYPE2).unwrap().to_vec();
        overflow[12] = 0xff;
        assert!(NtlmChallengeMessage::parse(&overflow).is_err());

        let mut client = client("user", "SecREt01");
        client.initial_response().unwrap();
        assert_eq!(client.exchange(b"garbage").unwrap(), ExchangeOutcome::failed());
    }

    #[test]
    fn oem_when_server_lacks_unicode() {
        let mut type2 = vec![0u8; 32];
        type2[..8].copy_from_slice(SIGNATURE);
        type2[8] = 2;
        LittleEndian::write_u32(&mut type2[20..24], 0x0000_0202);
        type2[24..32].copy_from_slice(&[0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef]);
        let cred = Credential::new("user", "SecREt01").with_domain("domain");
        let parsed = NtlmChallengeMessage::parse(&type2).unwrap();
        let type3 = authenticate_message(&cred, "ws", &parsed).unwrap();
        assert_eq!(LittleEndian::read_u32(&type3[60..64]), 0x0000_0202);
        assert_eq!(&type3[64..70], b"DOMAIN");
        assert_eq!(&type3[70..74], b"user");
        assert_eq!(&type3[74..76], b"WS");
        assert_eq!(type3.len(), 76 + 48);
    }

    #[test]
    fn negotiate_without_credentials() {
        let mut client = MechanismRegistry::new().create("NTLM").unwrap();
        client.set_credential(Credential::new("", "")).unwrap();
        let type1 = client.initial_response().unwrap();
        assert_eq!(type1.status, ExchangeStatus::Continuing);
        let bytes = type1.response.unwrap();
        assert_eq!(bytes.len(), NEGOTIATE_HEADER_LEN);
        assert_eq!(LittleEndian::read_u32(&bytes[12..16]), 0x0000_0207);
        let type2 = ByteString::from_base64(TYPE2).unwrap();
        assert_eq!(client.exchange(&type2).unwrap(), ExchangeOutcome::failed());
    }

    #[test]
    fn credential_required_at_every_step() {
        let mut client = MechanismRegistry::new().create("NTLM").unwrap();
        assert!(matches!(client.initial_response(), Err(SaslError::CredentialNotSet)));
    }
}
