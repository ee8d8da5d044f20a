/*
 * digest_md5.rs
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

//! DIGEST-MD5 (RFC 2831), authentication only.
//!
//! Step one parses the server's directive list, step two answers with the digest response,
//! step three accepts the server's `rspauth`. The server must offer a qop, but the answer is
//! always `auth`, so no integrity or confidentiality layer is ever negotiated.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use bytes::{BufMut, BytesMut};
use md5::{Digest, Md5};
use tracing::debug;
use zeroize::Zeroizing;

use super::{ClientMechanism, ExchangeOutcome, MechanismContext, SaslError};
use crate::byte_string::{to_hex_lower, ByteString};

const NONCE_COUNT: &str = "00000001";
const QOP_AUTH: &str = "auth";
/// 96 bits of entropy for the client nonce.
const CNONCE_LEN: usize = 12;

/// Parse a comma-separated `key=value` list. Values may be quoted; inside quotes commas are
/// literal and `\x` stands for `x`. Keys are lower-cased. Duplicate keys are rejected.
pub fn parse_directives(challenge: &[u8]) -> Result<HashMap<String, ByteString>, SaslError> {
    let mut segments = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    let mut i = 0;
    while i < challenge.len() {
        match challenge[i] {
            b'\\' => i += 1,
            b'"' => quoted = !quoted,
            b',' if !quoted => {
                segments.push(&challenge[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    segments.push(&challenge[start.min(challenge.len())..]);

    let mut directives = HashMap::new();
    for segment in segments {
        let segment = ByteString::from(segment).trim();
        if segment.is_empty() {
            continue;
        }
        let eq = segment
            .index_of(b"=")
            .ok_or_else(|| SaslError::Malformed(format!("directive without value: {}", segment)))?;
        let key = segment.substring(0, eq).trim().to_ascii_lowercase().to_string();
        let raw = segment.substring(eq + 1, segment.len()).trim();
        let value = if raw.len() >= 2 && raw.starts_with(b"\"") && raw.ends_with(b"\"") {
            unquote(&raw[1..raw.len() - 1])
        } else {
            raw
        };
        if directives.insert(key.clone(), value).is_some() {
            return Err(SaslError::Malformed(format!("duplicate directive: {}", key)));
        }
    }
    Ok(directives)
}

fn unquote(s: &[u8]) -> ByteString {
    let mut out = Vec::with_capacity(s.len());
    let mut iter = s.iter();
    while let Some(&b) = iter.next() {
        if b == b'\\' {
            if let Some(&escaped) = iter.next() {
                out.push(escaped);
            }
        } else {
            out.push(b);
        }
    }
    ByteString::from(out)
}

fn quote(buf: &mut BytesMut, s: &[u8]) {
    buf.put_u8(b'"');
    for &b in s {
        if b == b'"' || b == b'\\' {
            buf.put_u8(b'\\');
        }
        buf.put_u8(b);
    }
    buf.put_u8(b'"');
}

fn hex_md5(data: &[u8]) -> String {
    to_hex_lower(&Md5::digest(data))
}

/// HEX(H(A1)) where A1 = H(username ":" realm ":" password) ":" nonce ":" cnonce [":" authzid].
fn hex_ha1(
    username: &[u8],
    realm: &[u8],
    password: &[u8],
    nonce: &[u8],
    cnonce: &[u8],
    authzid: Option<&[u8]>,
) -> String {
    let mut secret = Zeroizing::new(Vec::with_capacity(username.len() + realm.len() + password.len() + 2));
    secret.extend_from_slice(username);
    secret.push(b':');
    secret.extend_from_slice(realm);
    secret.push(b':');
    secret.extend_from_slice(password);
    let inner = Zeroizing::new(Md5::digest(secret.as_slice()).to_vec());

    let mut a1 = Zeroizing::new(Vec::with_capacity(64 + nonce.len() + cnonce.len()));
    a1.extend_from_slice(&inner);
    a1.push(b':');
    a1.extend_from_slice(nonce);
    a1.push(b':');
    a1.extend_from_slice(cnonce);
    if let Some(authzid) = authzid {
        a1.push(b':');
        a1.extend_from_slice(authzid);
    }
    hex_md5(&a1)
}

/// HEX(H(A2)) where A2 = "AUTHENTICATE:" digest-uri (qop=auth has no suffix).
fn hex_ha2(digest_uri: &[u8]) -> String {
    let mut a2 = Vec::with_capacity(13 + digest_uri.len());
    a2.extend_from_slice(b"AUTHENTICATE:");
    a2.extend_from_slice(digest_uri);
    hex_md5(&a2)
}

/// HEX(KD(HEX(H(A1)), nonce ":" nc ":" cnonce ":" qop ":" HEX(H(A2)))).
fn response_value(hex_ha1: &str, nonce: &[u8], nc: &str, cnonce: &[u8], qop: &str, hex_ha2: &str) -> String {
    let kd = ByteString::concat(&[
        hex_ha1.as_bytes(),
        b":",
        nonce,
        b":",
        nc.as_bytes(),
        b":",
        cnonce,
        b":",
        qop.as_bytes(),
        b":",
        hex_ha2.as_bytes(),
    ]);
    hex_md5(&kd)
}

fn generate_cnonce() -> Result<ByteString, SaslError> {
    let mut bytes = [0u8; CNONCE_LEN];
    getrandom::getrandom(&mut bytes).map_err(|e| SaslError::Crypto(format!("RNG error: {}", e)))?;
    Ok(ByteString::from(STANDARD_NO_PAD.encode(bytes)))
}

#[derive(Debug, Default)]
pub struct DigestMd5Mechanism {
    step: u8,
}

impl DigestMd5Mechanism {
    pub fn new() -> Self {
        Self { step: 0 }
    }

    fn final_step(&mut self, challenge: &ByteString) -> ExchangeOutcome {
        self.step = 4;
        match parse_directives(challenge) {
            Ok(d) if d.contains_key("rspauth") => ExchangeOutcome::succeeded(ByteString::empty()),
            Ok(_) => {
                debug!("DIGEST-MD5: server did not send rspauth");
                ExchangeOutcome::failed()
            }
            Err(e) => {
                debug!("DIGEST-MD5: {}", e);
                ExchangeOutcome::failed()
            }
        }
    }
}

impl ClientMechanism for DigestMd5Mechanism {
    fn exchange(
        &mut self,
        ctx: &MechanismContext<'_>,
        challenge: &ByteString,
    ) -> Result<ExchangeOutcome, SaslError> {
        let credential = ctx.require_credential()?;
        let service_name = ctx.require_service_name()?;

        if self.step == 3 {
            return Ok(self.final_step(challenge));
        }
        if self.step > 3 {
            return Ok(ExchangeOutcome::failed());
        }

        // Step one: digest-challenge
        self.step = 1;
        if credential.username().is_empty() || credential.password().is_empty() {
            return Ok(ExchangeOutcome::failed());
        }
        let directives = match parse_directives(challenge) {
            Ok(d) => d,
            Err(e) => {
                debug!("DIGEST-MD5: {}", e);
                return Ok(ExchangeOutcome::failed());
            }
        };
        match directives.get("algorithm") {
            Some(a) if a.as_bytes() == b"md5-sess" => {}
            _ => {
                debug!("DIGEST-MD5: algorithm missing or not md5-sess");
                return Ok(ExchangeOutcome::failed());
            }
        }
        let utf8 = directives
            .get("charset")
            .map(|c| c.as_bytes() == b"utf-8")
            .unwrap_or(false);
        let (realm, nonce) = match (directives.get("realm"), directives.get("nonce")) {
            (Some(r), Some(n)) => (r, n),
            _ => {
                debug!("DIGEST-MD5: realm or nonce missing");
                return Ok(ExchangeOutcome::failed());
            }
        };
        // Any offered qop is answered with auth, but the server must offer one.
        if !directives.contains_key("qop") {
            debug!("DIGEST-MD5: qop missing");
            return Ok(ExchangeOutcome::failed());
        }

        // Step two: digest-response
        self.step = 2;
        let encode = |s: &str| if utf8 { ByteString::from(s) } else { ByteString::from_latin1(s) };
        let username = encode(credential.username());
        let password = Zeroizing::new(encode(credential.password()).to_vec());
        let cnonce = match ctx.client_nonce {
            Some(c) => c.clone(),
            None => generate_cnonce()?,
        };
        let digest_uri = format!("{}/{}", service_name, credential.domain().unwrap_or(""));

        let ha1 = Zeroizing::new(hex_ha1(&username, realm, &password, nonce, &cnonce, None));
        let ha2 = hex_ha2(digest_uri.as_bytes());
        let response = response_value(&ha1, nonce, NONCE_COUNT, &cnonce, QOP_AUTH, &ha2);

        let mut buf = BytesMut::with_capacity(0x200);
        if utf8 {
            buf.put_slice(b"charset=utf-8,");
        }
        buf.put_slice(b"username=");
        quote(&mut buf, &username);
        buf.put_slice(b",realm=");
        quote(&mut buf, realm);
        buf.put_slice(b",nonce=");
        quote(&mut buf, nonce);
        buf.put_slice(b",nc=");
        buf.put_slice(NONCE_COUNT.as_bytes());
        buf.put_slice(b",cnonce=");
        quote(&mut buf, &cnonce);
        buf.put_slice(b",digest-uri=");
        quote(&mut buf, digest_uri.as_bytes());
        buf.put_slice(b",response=");
        buf.put_slice(response.as_bytes());
        buf.put_slice(b",qop=");
        buf.put_slice(QOP_AUTH.as_bytes());

        self.step = 3;
        Ok(ExchangeOutcome::continuing(buf.freeze()))
    }

    fn reset(&mut self) {
        self.step = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sasl::{Credential, ExchangeStatus, MechanismRegistry, SaslClient};

    const CHALLENGE: &str = "realm=\"elwood.innosoft.com\",nonce=\"OA6MG9tEQGm2hh\",qop=\"auth\",algorithm=md5-sess,charset=utf-8";

    fn rfc2831_client() -> SaslClient {
        let mut client = MechanismRegistry::new().create("DIGEST-MD5").unwrap();
        client
            .set_credential(Credential::new("chris", "secret").with_domain("elwood.innosoft.com"))
            .unwrap();
        client.set_service_name("imap").unwrap();
        client.set_client_nonce("OA6MHXh6VqTrRk").unwrap();
        client
    }

    #[test]
    fn rfc2831_example() {
        let mut client = rfc2831_client();
        let step2 = client.exchange(CHALLENGE.as_bytes()).unwrap();
        assert_eq!(step2.status, ExchangeStatus::Continuing);
        assert_eq!(
            step2.response.unwrap(),
            "charset=utf-8,username=\"chris\",realm=\"elwood.innosoft.com\",nonce=\"OA6MG9tEQGm2hh\",\
             nc=00000001,cnonce=\"OA6MHXh6VqTrRk\",digest-uri=\"imap/elwood.innosoft.com\",\
             response=d388dad90d4bbd760a152321f2143af7,qop=auth"
        );

        let step3 = client.exchange(b"rspauth=ea40f60335c427b5527b84dbabcdfffd").unwrap();
        assert_eq!(step3.status, ExchangeStatus::Succeeded);
        assert!(step3.response.unwrap().is_empty());
        assert_eq!(client.exchange(b"rspauth=x").unwrap(), ExchangeOutcome::failed());
    }

    #[test]
    fn missing_rspauth_fails() {
        let mut client = rfc2831_client();
        client.exchange(CHALLENGE.as_bytes()).unwrap();
        let step3 = client.exchange(b"nonce=\"again\"").unwrap();
        assert_eq!(step3, ExchangeOutcome::failed());
        assert_eq!(client.status().unwrap(), ExchangeStatus::Failed);
    }

    #[test]
    fn qop_forced_to_auth() {
        let mut client = rfc2831_client();
        let challenge = "realm=\"elwood.innosoft.com\",nonce=\"OA6MG9tEQGm2hh\",qop=\"auth-int,auth-conf\",algorithm=md5-sess,charset=utf-8";
        let r = client.exchange(challenge.as_bytes()).unwrap().response.unwrap();
        assert!(r.ends_with(b",qop=auth"));
        assert!(r.contains(b"response=d388dad90d4bbd760a152321f2143af7"));
    }

    #[test]
    fn latin1_without_charset() {
        let mut client = MechanismRegistry::new().create("DIGEST-MD5").unwrap();
        client.set_credential(Credential::new("ren\u{e9}", "secret")).unwrap();
        client.set_service_name("smtp").unwrap();
        client.set_client_nonce("abc").unwrap();
        let r = client
            .exchange(b"realm=\"r\",nonce=\"n\",qop=\"auth\",algorithm=md5-sess")
            .unwrap()
            .response
            .unwrap();
        assert!(r.starts_with(b"username=\"ren\xe9\""));
        assert!(r.contains(b"digest-uri=\"smtp/\""));
    }

    #[test]
    fn rejects_wrong_algorithm_and_missing_nonce() {
        for challenge in ["realm=\"r\",nonce=\"n\",algorithm=md5", "realm=\"r\",algorithm=md5-sess", ""] {
            let mut client = rfc2831_client();
            assert_eq!(client.exchange(challenge.as_bytes()).unwrap(), ExchangeOutcome::failed(), "{}", challenge);
        }
    }

    #[test]
    fn rejects_missing_qop() {
        let mut client = rfc2831_client();
        let challenge = "realm=\"r\",nonce=\"n\",algorithm=md5-sess";
        assert_eq!(client.exchange(challenge.as_bytes()).unwrap(), ExchangeOutcome::failed());
        assert_eq!(client.status().unwrap(), ExchangeStatus::Failed);
    }

    #[test]
    fn algorithm_and_charset_are_case_sensitive() {
        let mut client = rfc2831_client();
        let upper = "realm=\"r\",nonce=\"n\",qop=\"auth\",algorithm=MD5-SESS";
        assert_eq!(client.exchange(upper.as_bytes()).unwrap(), ExchangeOutcome::failed());

        let mut client = MechanismRegistry::new().create("DIGEST-MD5").unwrap();
        client.set_credential(Credential::new("ren\u{e9}", "secret")).unwrap();
        client.set_service_name("smtp").unwrap();
        client.set_client_nonce("abc").unwrap();
        let r = client
            .exchange(b"realm=\"r\",nonce=\"n\",qop=\"auth\",algorithm=md5-sess,charset=UTF-8")
            .unwrap()
            .response
            .unwrap();
        assert!(r.starts_with(b"username=\"ren\xe9\""));
    }

    #[test]
    fn empty_username_fails() {
        let mut client = MechanismRegistry::new().create("DIGEST-MD5").unwrap();
        client.set_credential(Credential::new("", "secret")).unwrap();
        client.set_service_name("imap").unwrap();
        assert_eq!(client.exchange(CHALLENGE.as_bytes()).unwrap(), ExchangeOutcome::failed());
        assert_eq!(client.exchange(CHALLENGE.as_bytes()).unwrap(), ExchangeOutcome::failed());
    }

    #[test]
    fn service_name_required() {
        let mut client = MechanismRegistry::new().create("DIGEST-MD5").unwrap();
        client.set_credential(Credential::new("chris", "secret")).unwrap();
        assert!(matches!(client.exchange(CHALLENGE.as_bytes()), Err(SaslError::ServiceNameNotSet)));
    }

    #[test]
    fn random_cnonce_differs_between_attempts() {
        let mut client = MechanismRegistry::new().create("DIGEST-MD5").unwrap();
        client.set_credential(Credential::new("chris", "secret")).unwrap();
        client.set_service_name("imap").unwrap();
        let first = client.exchange(CHALLENGE.as_bytes()).unwrap().response.unwrap();
        client.initialize().unwrap();
        let second = client.exchange(CHALLENGE.as_bytes()).unwrap().response.unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn parse_handles_quoted_commas_and_escapes() {
        let d = parse_directives(b"realm=\"a,b\", nonce=\"x\\\"y\" ,qop=auth,algorithm=md5-sess").unwrap();
        assert_eq!(d["realm"], "a,b");
        assert_eq!(d["nonce"], "x\"y");
        assert_eq!(d["qop"], "auth");
        assert_eq!(d.len(), 4);
    }

    #[test]
    fn parse_rejects_duplicates_and_bare_tokens() {
        assert!(parse_directives(b"nonce=\"a\",nonce=\"b\"").is_err());
        assert!(parse_directives(b"realm=\"r\",garbage").is_err());
    }

    #[test]
    fn ha1_with_authzid_differs() {
        let without = hex_ha1(b"u", b"r", b"p", b"n", b"c", None);
        let with = hex_ha1(b"u", b"r", b"p", b"n", b"c", Some(b"admin"));
        assert_eq!(without.len(), 32);
        assert_ne!(without, with);
    }
}
