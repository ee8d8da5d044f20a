/*
 * ntlm_crypto.rs
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

//! NTLMv1 password hashes and challenge responses (LM and NT, DES based).

use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;
use md4::{Digest, Md4};
use zeroize::Zeroizing;

use super::SaslError;

const LM_MAGIC: &[u8; 8] = b"KGS!@#$%";

pub(crate) type Hash16 = Zeroizing<[u8; 16]>;

/// Spread 56 key bits over 8 octets, seven per octet. DES ignores the low (parity) bit.
fn expand_des_key(key7: &[u8]) -> [u8; 8] {
    [
        key7[0],
        (key7[0] << 7) | (key7[1] >> 1),
        (key7[1] << 6) | (key7[2] >> 2),
        (key7[2] << 5) | (key7[3] >> 3),
        (key7[3] << 4) | (key7[4] >> 4),
        (key7[4] << 3) | (key7[5] >> 5),
        (key7[5] << 2) | (key7[6] >> 6),
        key7[6] << 1,
    ]
}

fn des_encrypt(key7: &[u8], data: &[u8; 8]) -> Result<[u8; 8], SaslError> {
    let key = Zeroizing::new(expand_des_key(key7));
    let cipher = Des::new_from_slice(key.as_slice()).map_err(|e| SaslError::Crypto(e.to_string()))?;
    let mut block = GenericArray::clone_from_slice(data);
    cipher.encrypt_block(&mut block);
    let mut out = [0u8; 8];
    out.copy_from_slice(&block);
    Ok(out)
}

/// LM hash: upper-cased OEM password, zero padded or truncated to 14 octets, each half used
/// as a DES key over the constant "KGS!@#$%".
pub(crate) fn lm_hash(password: &str) -> Result<Hash16, SaslError> {
    let mut key = Zeroizing::new([0u8; 14]);
    for (slot, c) in key.iter_mut().zip(password.to_uppercase().chars()) {
        *slot = if (c as u32) < 0x100 { c as u32 as u8 } else { b'?' };
    }
    let mut hash = Zeroizing::new([0u8; 16]);
    hash[..8].copy_from_slice(&des_encrypt(&key[..7], LM_MAGIC)?);
    hash[8..].copy_from_slice(&des_encrypt(&key[7..], LM_MAGIC)?);
    Ok(hash)
}

/// NT hash: MD4 over the UTF-16LE password.
pub(crate) fn nt_hash(password: &str) -> Hash16 {
    let unicode: Zeroizing<Vec<u8>> =
        Zeroizing::new(password.encode_utf16().flat_map(|u| u.to_le_bytes()).collect());
    let mut hash = Zeroizing::new([0u8; 16]);
    hash.copy_from_slice(&Md4::digest(unicode.as_slice()));
    hash
}

/// 24-octet response: the hash padded to 21 octets, split into three DES keys, each
/// encrypting the server challenge.
pub(crate) fn des_response(hash: &[u8; 16], challenge: &[u8; 8]) -> Result<[u8; 24], SaslError> {
    let mut keys = Zeroizing::new([0u8; 21]);
    keys[..16].copy_from_slice(hash);
    let mut out = [0u8; 24];
    for (i, chunk) in out.chunks_mut(8).enumerate() {
        chunk.copy_from_slice(&des_encrypt(&keys[i * 7..i * 7 + 7], challenge)?);
    }
    Ok(out)
}
