/*
 * byte_string.rs
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

//! Protocol octet strings. A `ByteString` carries bytes as they appear on the wire without
//! implying a text encoding; conversions to and from text are explicit (UTF-8 or Latin-1).

use std::fmt;
use std::ops::Deref;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{Bytes, BytesMut};

/// Cheaply clonable, immutable byte string.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteString {
    bytes: Bytes,
}

impl ByteString {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn empty() -> Self {
        Self { bytes: Bytes::new() }
    }

    /// Encode text as ISO-8859-1. Characters outside Latin-1 become `?`.
    pub fn from_latin1(s: &str) -> Self {
        let out: Vec<u8> = s
            .chars()
            .map(|c| if (c as u32) < 0x100 { c as u32 as u8 } else { b'?' })
            .collect();
        Self::new(out)
    }

    /// Decode standard base64 (whitespace around the payload is ignored).
    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        STANDARD.decode(encoded.trim()).map(Self::new)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// Lowercase hexadecimal rendering, two characters per octet.
    pub fn to_hex(&self) -> String {
        to_hex_lower(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// Zero-copy sub-range.
    pub fn substring(&self, start: usize, end: usize) -> Self {
        Self { bytes: self.bytes.slice(start..end) }
    }

    pub fn index_of(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() {
            return Some(0);
        }
        self.bytes.windows(needle.len()).position(|w| w == needle)
    }

    pub fn contains(&self, needle: &[u8]) -> bool {
        self.index_of(needle).is_some()
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.bytes.starts_with(prefix)
    }

    pub fn ends_with(&self, suffix: &[u8]) -> bool {
        self.bytes.ends_with(suffix)
    }

    pub fn eq_ignore_ascii_case(&self, other: &[u8]) -> bool {
        self.bytes.eq_ignore_ascii_case(other)
    }

    /// Strip leading and trailing ASCII whitespace.
    pub fn trim(&self) -> Self {
        let start = self
            .bytes
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(self.bytes.len());
        let end = self
            .bytes
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map(|i| i + 1)
            .unwrap_or(start);
        self.substring(start, end.max(start))
    }

    pub fn split(&self, delimiter: u8) -> Vec<ByteString> {
        let mut parts = Vec::new();
        let mut start = 0;
        for (i, &b) in self.bytes.iter().enumerate() {
            if b == delimiter {
                parts.push(self.substring(start, i));
                start = i + 1;
            }
        }
        parts.push(self.substring(start, self.bytes.len()));
        parts
    }

    pub fn to_ascii_uppercase(&self) -> Self {
        Self::new(self.bytes.to_ascii_uppercase())
    }

    pub fn to_ascii_lowercase(&self) -> Self {
        Self::new(self.bytes.to_ascii_lowercase())
    }

    /// Concatenate several byte strings into one.
    pub fn concat(parts: &[&[u8]]) -> Self {
        let mut buf = BytesMut::with_capacity(parts.iter().map(|p| p.len()).sum());
        for p in parts {
            buf.extend_from_slice(p);
        }
        Self { bytes: buf.freeze() }
    }
}

pub(crate) fn to_hex_lower(b: &[u8]) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut s = String::with_capacity(b.len() * 2);
    for &x in b {
        s.push(HEX[(x >> 4) as usize] as char);
        s.push(HEX[(x & 15) as usize] as char);
    }
    s
}

impl Deref for ByteString {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for ByteString {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<&str> for ByteString {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }
}

impl From<String> for ByteString {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

impl From<&[u8]> for ByteString {
    fn from(b: &[u8]) -> Self {
        Self::new(b.to_vec())
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(b: Vec<u8>) -> Self {
        Self::new(b)
    }
}

impl From<Bytes> for ByteString {
    fn from(b: Bytes) -> Self {
        Self { bytes: b }
    }
}

impl PartialEq<[u8]> for ByteString {
    fn eq(&self, other: &[u8]) -> bool {
        self.bytes.as_ref() == other
    }
}

impl PartialEq<&str> for ByteString {
    fn eq(&self, other: &&str) -> bool {
        self.bytes.as_ref() == other.as_bytes()
    }
}

/// Renders each octet as the Latin-1 character of the same value.
impl fmt::Display for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in self.bytes.iter() {
            write!(f, "{}", b as char)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteString({:?})", String::from_utf8_lossy(&self.bytes))
    }
}
