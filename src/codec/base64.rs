// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! URL-safe base64 as written by the study apps.
//!
//! Devices occasionally drop the trailing `=` padding from a blob. Decoding
//! retries with one to four appended `=` before giving up. Non-zero trailing
//! bits in the last symbol are accepted.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE};
use base64::{DecodeError, Engine};

use super::CodecResult;

/// Largest number of `=` characters appended while repairing padding.
const MAX_PADDING_FIX: usize = 4;

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// Returns true if `byte` belongs to the URL-safe base64 alphabet (padding included).
pub fn is_urlsafe_base64_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'=')
}

/// Returns true if every byte of `data` is URL-safe base64.
pub fn is_urlsafe_base64(data: &[u8]) -> bool {
    data.iter().all(|b| is_urlsafe_base64_byte(*b))
}

/// Encode bytes as URL-safe base64 with padding.
pub fn encode_base64(data: &[u8]) -> String {
    URL_SAFE.encode(data)
}

/// Decode URL-safe base64, repairing missing padding.
pub fn decode_base64(data: &[u8]) -> CodecResult<Vec<u8>> {
    let first_error = match URL_SAFE_LENIENT.decode(data) {
        Ok(decoded) => return Ok(decoded),
        Err(e) => e,
    };

    if !is_padding_problem(&first_error) {
        return Err(first_error.into());
    }

    let mut padded = Vec::with_capacity(data.len() + MAX_PADDING_FIX);
    for fix in 1..=MAX_PADDING_FIX {
        padded.clear();
        padded.extend_from_slice(data);
        padded.extend(std::iter::repeat_n(b'=', fix));
        if let Ok(decoded) = URL_SAFE_LENIENT.decode(&padded) {
            return Ok(decoded);
        }
    }

    Err(first_error.into())
}

fn is_padding_problem(error: &DecodeError) -> bool {
    matches!(
        error,
        DecodeError::InvalidPadding | DecodeError::InvalidLength(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_canonical_input() {
        let encoded = encode_base64(b"sixteen byte key");
        assert_eq!(decode_base64(encoded.as_bytes()).unwrap(), b"sixteen byte key");
    }

    #[test]
    fn repairs_missing_padding() {
        // "ab" encodes as "YWI="
        assert_eq!(decode_base64(b"YWI").unwrap(), b"ab");
        // "a" encodes as "YQ=="
        assert_eq!(decode_base64(b"YQ").unwrap(), b"a");
    }

    #[test]
    fn accepts_non_zero_trailing_bits() {
        // "YQ==" is canonical for "a"; "YR==" sets a bit the decoder discards.
        assert_eq!(decode_base64(b"YR==").unwrap(), b"a");
        assert_eq!(decode_base64(b"YR").unwrap(), b"a");
    }

    #[test]
    fn rejects_unrepairable_length() {
        assert!(decode_base64(b"YWJjZ").is_err());
    }

    #[test]
    fn rejects_standard_alphabet_symbols() {
        assert!(decode_base64(b"a+b/").is_err());
    }

    #[test]
    fn alphabet_check() {
        assert!(is_urlsafe_base64(b"AZaz09-_=="));
        assert!(!is_urlsafe_base64(b"abc:def"));
        assert!(!is_urlsafe_base64(b"abc/"));
    }
}
