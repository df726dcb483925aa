// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Line-by-line decryption of device uploads.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use tracing::debug;

use super::rsa::ParticipantKey;
use super::{DecryptError, LineError, LineErrorKind};
use crate::codec::base64::{decode_base64, is_urlsafe_base64};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const BLOCK: usize = 16;
const AES_KEY_LEN: usize = 16;

/// Where the AES key of a decrypted file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Recovered from the file's own key line.
    KeyLine,
    /// Supplied by the caller (iOS key cache).
    Cached,
}

/// Result of decrypting one upload.
#[derive(Debug, Clone)]
pub struct DecryptedFile {
    /// Good lines joined with `\n`, in original order.
    pub plaintext: Vec<u8>,
    pub line_errors: Vec<LineError>,
    /// Non-empty lines in the upload, key line included.
    pub total_lines: usize,
    pub aes_key: Vec<u8>,
    pub key_source: KeySource,
    /// The last line was cut short; data at the end of the file may be lost.
    pub tail_truncated: bool,
}

impl DecryptedFile {
    pub fn is_empty(&self) -> bool {
        self.plaintext.is_empty()
    }
}

/// Decrypt an upload whose first line carries its RSA-wrapped AES key.
pub fn decrypt(
    file_name: &str,
    ciphertext: &[u8],
    private_key: &ParticipantKey,
) -> Result<DecryptedFile, DecryptError> {
    let lines = split_lines(ciphertext)?;
    let aes_key = extract_aes_key(lines[0], private_key)?;
    Ok(decrypt_lines(file_name, &lines, 1, aes_key.to_vec(), KeySource::KeyLine))
}

/// Decrypt an upload using an already known AES key.
///
/// Every line is treated as data; a file decrypted this way has no key line.
pub fn decrypt_with_key(
    file_name: &str,
    ciphertext: &[u8],
    aes_key: &[u8],
) -> Result<DecryptedFile, DecryptError> {
    if !aes_key.is_empty() && aes_key.len() != AES_KEY_LEN {
        return Err(DecryptError::KeyInvalidLength(aes_key.len()));
    }
    let lines = split_lines(ciphertext)?;
    Ok(decrypt_lines(file_name, &lines, 0, aes_key.to_vec(), KeySource::Cached))
}

/// Recover the AES key from a key line.
///
/// The line is base64 of the RSA ciphertext, whose plaintext is itself the
/// base64 of a 16-byte key.
pub fn extract_aes_key(
    key_line: &[u8],
    private_key: &ParticipantKey,
) -> Result<[u8; AES_KEY_LEN], DecryptError> {
    if !is_urlsafe_base64(key_line) {
        return Err(DecryptError::KeyNotBase64);
    }

    let wrapped = decode_base64(key_line).map_err(|e| DecryptError::KeyInvalid(e.to_string()))?;
    let key_b64 = private_key.raw_decrypt(&wrapped);
    let key = decode_base64(&key_b64).map_err(|e| DecryptError::KeyInvalid(e.to_string()))?;
    if key.is_empty() {
        return Err(DecryptError::KeyInvalid("decoded key was empty".into()));
    }

    key.as_slice()
        .try_into()
        .map_err(|_| DecryptError::KeyInvalidLength(key.len()))
}

fn split_lines(data: &[u8]) -> Result<Vec<&[u8]>, DecryptError> {
    let lines: Vec<&[u8]> = data
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() {
        return Err(DecryptError::EmptyFile);
    }
    Ok(lines)
}

fn decrypt_lines(
    file_name: &str,
    lines: &[&[u8]],
    first_data_line: usize,
    aes_key: Vec<u8>,
    key_source: KeySource,
) -> DecryptedFile {
    let mut good: Vec<Vec<u8>> = Vec::with_capacity(lines.len());
    let mut line_errors = Vec::new();
    let mut tail_truncated = false;
    let last = lines.len() - 1;

    for (line_index, line) in lines.iter().enumerate().skip(first_data_line) {
        match decrypt_line(line, &aes_key, line_index == last) {
            Ok(plain) => good.push(plain),
            Err(kind) => {
                debug!(file = %file_name, line_index, kind = ?kind, "Dropping undecryptable line");
                tail_truncated |= kind == LineErrorKind::Mp4PaddingTruncated;
                line_errors.push(LineError {
                    line_index,
                    kind,
                    raw_line: line.to_vec(),
                });
            }
        }
    }

    DecryptedFile {
        plaintext: good.join(&b'\n'),
        line_errors,
        total_lines: lines.len(),
        aes_key,
        key_source,
        tail_truncated,
    }
}

fn decrypt_line(line: &[u8], key: &[u8], is_last: bool) -> Result<Vec<u8>, LineErrorKind> {
    let mut parts = line.split(|b| *b == b':');
    let (iv_b64, data_b64) = match (parts.next(), parts.next(), parts.next()) {
        (Some(iv), Some(data), None) => (iv, data),
        _ => return Err(LineErrorKind::MalformedConfig),
    };

    // A short final line is an upload interrupted mid-write.
    let bad_base64 = if is_last {
        LineErrorKind::Mp4PaddingTruncated
    } else {
        LineErrorKind::PaddingError
    };
    let iv = decode_base64(iv_b64).map_err(|_| bad_base64)?;
    let mut data = decode_base64(data_b64).map_err(|_| bad_base64)?;

    if data.len() < BLOCK {
        return Err(LineErrorKind::LineEmpty);
    }
    if iv.len() < BLOCK {
        return Err(LineErrorKind::IvMissing);
    }
    if iv.len() != BLOCK {
        return Err(LineErrorKind::IvBadLength);
    }
    if key.is_empty() {
        return Err(LineErrorKind::EmptyKey);
    }

    data.truncate(data.len() - data.len() % BLOCK);

    let cipher =
        Aes128CbcDec::new_from_slices(key, &iv).map_err(|_| LineErrorKind::IvBadLength)?;
    let mut plain = cipher
        .decrypt_padded_vec_mut::<NoPadding>(&data)
        .map_err(|_| LineErrorKind::PaddingError)?;

    let pad = plain.last().copied().unwrap_or(0) as usize;
    plain.truncate(plain.len().saturating_sub(pad));
    Ok(plain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::base64::encode_base64;
    use aes::cipher::block_padding::Pkcs7;
    use aes::cipher::BlockEncryptMut;
    use rsa::traits::PublicKeyParts;
    use rsa::{BigUint, RsaPrivateKey};

    type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

    const KEY: [u8; 16] = *b"0123456789abcdef";
    const IV: [u8; 16] = *b"fedcba9876543210";

    fn private_key() -> (RsaPrivateKey, ParticipantKey) {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        (key.clone(), ParticipantKey::from(key))
    }

    fn key_line(public: &RsaPrivateKey, aes_key: &[u8]) -> Vec<u8> {
        let inner = encode_base64(aes_key);
        let wrapped = BigUint::from_bytes_be(inner.as_bytes())
            .modpow(public.e(), public.n())
            .to_bytes_be();
        encode_base64(&wrapped).into_bytes()
    }

    fn data_line(plain: &[u8]) -> Vec<u8> {
        let ct = Aes128CbcEnc::new_from_slices(&KEY, &IV)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(plain);
        format!("{}:{}", encode_base64(&IV), encode_base64(&ct)).into_bytes()
    }

    fn file(lines: &[Vec<u8>]) -> Vec<u8> {
        lines.join(&b'\n')
    }

    #[test]
    fn roundtrip_preserves_lines_in_order() {
        let (rsa_key, key) = private_key();
        let upload = file(&[
            key_line(&rsa_key, &KEY),
            data_line(b"timestamp,latitude"),
            data_line(b"1700000000000,42.1"),
            data_line(b"1700000001000,42.2 exactly sixteen!"),
        ]);

        let out = decrypt("a/b/gps/1.csv", &upload, &key).unwrap();
        assert!(out.line_errors.is_empty());
        assert_eq!(out.key_source, KeySource::KeyLine);
        assert_eq!(out.total_lines, 4);
        assert_eq!(
            out.plaintext,
            b"timestamp,latitude\n1700000000000,42.1\n1700000001000,42.2 exactly sixteen!"
        );
    }

    #[test]
    fn empty_upload_is_fatal() {
        let (_, key) = private_key();
        assert!(matches!(decrypt("f", b"\n\n", &key), Err(DecryptError::EmptyFile)));
    }

    #[test]
    fn key_line_must_be_urlsafe() {
        let (_, key) = private_key();
        let result = decrypt("f", b"abc+def\nx:y", &key);
        assert!(matches!(result, Err(DecryptError::KeyNotBase64)));
    }

    #[test]
    fn wrong_key_length_is_fatal() {
        let (rsa_key, key) = private_key();
        let upload = file(&[key_line(&rsa_key, b"only-twelve!")]);
        let result = decrypt("f", &upload, &key);
        assert!(matches!(result, Err(DecryptError::KeyInvalidLength(12))));
        assert!(result.unwrap_err().is_key_error());
    }

    #[test]
    fn bad_lines_are_recorded_and_skipped() {
        let (rsa_key, key) = private_key();
        let short_iv = format!("{}:{}", encode_base64(b"short"), encode_base64(&[7u8; 32]));
        let short_data = format!("{}:{}", encode_base64(&IV), encode_base64(b"tiny"));
        let upload = file(&[
            key_line(&rsa_key, &KEY),
            data_line(b"first"),
            b"no separator here".to_vec(),
            short_iv.into_bytes(),
            short_data.into_bytes(),
            b"a:b:c".to_vec(),
            data_line(b"last"),
        ]);

        let out = decrypt("f", &upload, &key).unwrap();
        assert_eq!(out.plaintext, b"first\nlast");
        let kinds: Vec<_> = out.line_errors.iter().map(|e| (e.line_index, e.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (2, LineErrorKind::MalformedConfig),
                (3, LineErrorKind::IvMissing),
                (4, LineErrorKind::LineEmpty),
                (5, LineErrorKind::MalformedConfig),
            ]
        );
        assert_eq!(out.line_errors[0].raw_line, b"no separator here");
    }

    #[test]
    fn trailing_partial_block_is_dropped() {
        let (rsa_key, key) = private_key();
        let mut ct = Aes128CbcEnc::new_from_slices(&KEY, &IV)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(b"exactly 16 bytes");
        ct.extend_from_slice(b"junk");
        let line = format!("{}:{}", encode_base64(&IV), encode_base64(&ct));
        let upload = file(&[key_line(&rsa_key, &KEY), line.into_bytes()]);

        let out = decrypt("f", &upload, &key).unwrap();
        assert!(out.line_errors.is_empty());
        assert_eq!(out.plaintext, b"exactly 16 bytes");
    }

    #[test]
    fn truncated_final_line_marks_tail() {
        let (rsa_key, key) = private_key();
        let upload = file(&[
            key_line(&rsa_key, &KEY),
            data_line(b"kept"),
            b"ZmVkY2JhOTg3NjU0MzIxMA==:QUJD$".to_vec(),
        ]);

        let out = decrypt("f.csv", &upload, &key).unwrap();
        assert_eq!(out.plaintext, b"kept");
        assert!(out.tail_truncated);
        assert_eq!(out.line_errors[0].kind, LineErrorKind::Mp4PaddingTruncated);
    }

    #[test]
    fn cached_key_treats_every_line_as_data() {
        let upload = file(&[data_line(b"one"), data_line(b"two")]);
        let out = decrypt_with_key("f", &upload, &KEY).unwrap();
        assert_eq!(out.key_source, KeySource::Cached);
        assert_eq!(out.plaintext, b"one\ntwo");
    }

    #[test]
    fn empty_cached_key_fails_per_line() {
        let upload = file(&[data_line(b"one")]);
        let out = decrypt_with_key("f", &upload, b"").unwrap();
        assert!(out.plaintext.is_empty());
        assert_eq!(out.line_errors[0].kind, LineErrorKind::EmptyKey);
    }
}
