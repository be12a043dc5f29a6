//! Public-key fingerprints for out-of-band verification
//!
//! `XXXX-XXXX-...`: Whirlpool over the raw SHA-512 digest of the key's
//! canonical text (standard base64 of the key bytes), uppercase hex, in
//! groups of four. Display only; never used as key material.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::hash::sha512_whirlpool;

const GROUP_LEN: usize = 4;

/// Fingerprint raw public key bytes.
pub fn fingerprint(public_key: &[u8]) -> String {
    fingerprint_text(&STANDARD.encode(public_key))
}

/// Fingerprint a public key already in its textual (base64) form.
pub fn fingerprint_text(public_key: &str) -> String {
    let digest = hex::encode_upper(sha512_whirlpool(public_key.trim().as_bytes()));
    digest
        .as_bytes()
        .chunks(GROUP_LEN)
        .map(|group| String::from_utf8_lossy(group))
        .collect::<Vec<_>>()
        .join("-")
}
