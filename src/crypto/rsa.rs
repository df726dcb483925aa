// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Participant RSA private keys.
//!
//! The study apps encrypt the per-file AES key with textbook RSA (no OAEP or
//! PKCS#1 v1.5 padding), so decryption is the bare `c^d mod n`.

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey};

use super::DecryptError;

/// RSA private key belonging to one participant.
#[derive(Clone)]
pub struct ParticipantKey {
    inner: RsaPrivateKey,
}

impl std::fmt::Debug for ParticipantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantKey")
            .field("bits", &(self.inner.size() * 8))
            .finish_non_exhaustive()
    }
}

impl From<RsaPrivateKey> for ParticipantKey {
    fn from(inner: RsaPrivateKey) -> Self {
        Self { inner }
    }
}

impl ParticipantKey {
    /// Parse a PEM private key, PKCS#1 first and PKCS#8 as fallback.
    pub fn from_pem(pem_bytes: &[u8]) -> Result<Self, DecryptError> {
        let pem = std::str::from_utf8(pem_bytes)
            .map_err(|e| DecryptError::PrivateKey(format!("Invalid UTF-8: {}", e)))?;

        let inner = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| DecryptError::PrivateKey(format!("Invalid key format: {}", e)))?;

        Ok(Self { inner })
    }

    /// Modulus size in bytes.
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    /// Raw RSA decryption with leading zero bytes stripped.
    pub fn raw_decrypt(&self, ciphertext: &[u8]) -> Vec<u8> {
        let c = BigUint::from_bytes_be(ciphertext);
        let m = c.modpow(self.inner.d(), self.inner.n());
        let bytes = m.to_bytes_be();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        bytes[first..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
    use rsa::pkcs8::EncodePrivateKey;

    fn generate() -> RsaPrivateKey {
        RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap()
    }

    fn raw_encrypt(key: &RsaPrivateKey, message: &[u8]) -> Vec<u8> {
        BigUint::from_bytes_be(message)
            .modpow(key.e(), key.n())
            .to_bytes_be()
    }

    #[test]
    fn textbook_roundtrip() {
        let key = ParticipantKey::from(generate());
        let ciphertext = raw_encrypt(&key.inner, b"c2l4dGVlbiBieXRlIGtleQ==");
        assert_eq!(key.raw_decrypt(&ciphertext), b"c2l4dGVlbiBieXRlIGtleQ==");
    }

    #[test]
    fn parses_pkcs1_and_pkcs8() {
        let key = generate();
        let pkcs1 = key.to_pkcs1_pem(LineEnding::LF).unwrap();
        let pkcs8 = key.to_pkcs8_pem(LineEnding::LF).unwrap();

        let a = ParticipantKey::from_pem(pkcs1.as_bytes()).unwrap();
        let b = ParticipantKey::from_pem(pkcs8.as_bytes()).unwrap();
        assert_eq!(a.inner.n(), b.inner.n());
        assert_eq!(a.size(), 128);
    }

    #[test]
    fn rejects_garbage_pem() {
        let result = ParticipantKey::from_pem(b"-----BEGIN NOTHING-----");
        assert!(matches!(result, Err(DecryptError::PrivateKey(_))));
    }
}
