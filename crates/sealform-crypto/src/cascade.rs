//! Cascade cipher: ChaCha20 → Serpent-256-CBC, authenticated with HMAC-SHA3-512
//!
//! Sealed format (binary):
//! ```text
//! [32 bytes: stretch salt][N bytes: Serpent-CBC ciphertext][64 bytes: HMAC-SHA3-512 tag]
//! tag = HMAC-SHA3-512(mac_key, ciphertext || serpent_iv)
//! ```
//!
//! All sub-keys come from a single Argon2id run over the caller's key
//! material and the per-message salt, with `iterations` as the time cost:
//! ```text
//! [32: ChaCha20 key][12: ChaCha20 nonce][32: Serpent key][16: Serpent IV][64: MAC key]
//! ```
//!
//! Decryption reports a bad tag as [`Checked::IntegrityFailure`] instead of an
//! error; the ciphertext is never decrypted when the tag does not verify.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serpent::cipher::generic_array::GenericArray;
use serpent::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use serpent::Serpent;
use sha3::Sha3_512;
use zeroize::{Zeroize, ZeroizeOnDrop};

use sealform_core::{EnvelopeConfig, SealformError, SealformResult};

use crate::credentials::Iterations;
use crate::{KEY_SIZE, SERPENT_BLOCK_SIZE};

type HmacSha3_512 = Hmac<Sha3_512>;

/// Size of the per-message stretch salt
pub const SALT_SIZE: usize = 32;

/// Size of an HMAC-SHA3-512 tag
pub const TAG_SIZE: usize = 64;

/// Smallest well-formed sealed payload (empty plaintext)
pub const MIN_SEALED_SIZE: usize = SALT_SIZE + TAG_SIZE;

const NONCE_SIZE: usize = 12;
const MAC_KEY_SIZE: usize = 64;
const STRETCH_LEN: usize = KEY_SIZE + NONCE_SIZE + KEY_SIZE + SERPENT_BLOCK_SIZE + MAC_KEY_SIZE;

/// Result of an operation whose integrity check can fail without it being an
/// error.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Checked<T> {
    /// The tag verified; holds the recovered value.
    Verified(T),
    /// The tag did not verify (wrong key or tampered data).
    IntegrityFailure,
}

impl<T> Checked<T> {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Verified(value) => Some(value),
            Self::IntegrityFailure => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Checked<U> {
        match self {
            Self::Verified(value) => Checked::Verified(f(value)),
            Self::IntegrityFailure => Checked::IntegrityFailure,
        }
    }
}

impl Checked<crate::padding::Unpadded> {
    /// The text, only if both the tag and the padding checked out.
    pub fn into_intact(self) -> Option<String> {
        self.into_option().and_then(crate::padding::Unpadded::into_valid)
    }
}

/// Argon2id memory cost for sub-key stretching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StretchParams {
    /// Memory cost in KiB (default: 512)
    pub mem_cost_kib: u32,
}

impl Default for StretchParams {
    fn default() -> Self {
        Self { mem_cost_kib: 512 }
    }
}

impl From<&EnvelopeConfig> for StretchParams {
    fn from(config: &EnvelopeConfig) -> Self {
        Self {
            mem_cost_kib: config.stretch_mem_cost_kib,
        }
    }
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct CascadeKeys {
    chacha_key: [u8; KEY_SIZE],
    chacha_nonce: [u8; NONCE_SIZE],
    serpent_key: [u8; KEY_SIZE],
    serpent_iv: [u8; SERPENT_BLOCK_SIZE],
    mac_key: [u8; MAC_KEY_SIZE],
}

impl CascadeKeys {
    fn stretch(
        key_material: &[u8],
        salt: &[u8],
        iterations: Iterations,
        params: &StretchParams,
    ) -> SealformResult<Self> {
        if key_material.is_empty() {
            return Err(SealformError::malformed("cascade key material is empty"));
        }

        let argon2_params = Params::new(params.mem_cost_kib, iterations.get(), 1, Some(STRETCH_LEN))
            .map_err(|e| SealformError::primitive(format!("invalid Argon2id params: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

        let mut derived = [0u8; STRETCH_LEN];
        argon2
            .hash_password_into(key_material, salt, &mut derived)
            .map_err(|e| SealformError::primitive(format!("Argon2id stretch failed: {e}")))?;

        let mut keys = Self {
            chacha_key: [0u8; KEY_SIZE],
            chacha_nonce: [0u8; NONCE_SIZE],
            serpent_key: [0u8; KEY_SIZE],
            serpent_iv: [0u8; SERPENT_BLOCK_SIZE],
            mac_key: [0u8; MAC_KEY_SIZE],
        };
        let (chacha_key, rest) = derived.split_at(KEY_SIZE);
        let (chacha_nonce, rest) = rest.split_at(NONCE_SIZE);
        let (serpent_key, rest) = rest.split_at(KEY_SIZE);
        let (serpent_iv, mac_key) = rest.split_at(SERPENT_BLOCK_SIZE);
        keys.chacha_key.copy_from_slice(chacha_key);
        keys.chacha_nonce.copy_from_slice(chacha_nonce);
        keys.serpent_key.copy_from_slice(serpent_key);
        keys.serpent_iv.copy_from_slice(serpent_iv);
        keys.mac_key.copy_from_slice(mac_key);
        derived.zeroize();

        Ok(keys)
    }

    fn tag(&self, ciphertext: &[u8]) -> SealformResult<HmacSha3_512> {
        let mut mac = <HmacSha3_512 as Mac>::new_from_slice(&self.mac_key)
            .map_err(|e| SealformError::primitive(format!("HMAC key rejected: {e}")))?;
        mac.update(ciphertext);
        mac.update(&self.serpent_iv);
        Ok(mac)
    }

    fn apply_chacha(&self, buf: &mut [u8]) {
        let mut cipher =
            <ChaCha20 as KeyIvInit>::new((&self.chacha_key).into(), (&self.chacha_nonce).into());
        cipher.apply_keystream(buf);
    }
}

/// Encrypt a block-aligned plaintext with default stretch params.
///
/// Returns `[32-byte salt][ciphertext][64-byte tag]`.
pub fn encrypt(plaintext: &[u8], key_material: &[u8], iterations: Iterations) -> SealformResult<Vec<u8>> {
    encrypt_with(plaintext, key_material, iterations, &StretchParams::default())
}

/// Encrypt a block-aligned plaintext.
///
/// The plaintext length must be a multiple of [`SERPENT_BLOCK_SIZE`]; run it
/// through [`crate::padding::pad`] first. This function never pads.
pub fn encrypt_with(
    plaintext: &[u8],
    key_material: &[u8],
    iterations: Iterations,
    params: &StretchParams,
) -> SealformResult<Vec<u8>> {
    if plaintext.len() % SERPENT_BLOCK_SIZE != 0 {
        return Err(SealformError::malformed(format!(
            "plaintext length {} is not a multiple of the {SERPENT_BLOCK_SIZE}-byte Serpent block",
            plaintext.len()
        )));
    }

    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    let keys = CascadeKeys::stretch(key_material, &salt, iterations, params)?;

    let mut body = plaintext.to_vec();
    keys.apply_chacha(&mut body);
    serpent_cbc_encrypt(&keys.serpent_key, &keys.serpent_iv, &mut body)?;
    let tag = keys.tag(&body)?.finalize().into_bytes();

    let mut sealed = Vec::with_capacity(SALT_SIZE + body.len() + TAG_SIZE);
    sealed.extend_from_slice(&salt);
    sealed.extend_from_slice(&body);
    sealed.extend_from_slice(&tag);

    tracing::debug!(len = plaintext.len(), %iterations, "cascade: sealed payload");
    Ok(sealed)
}

/// Decrypt a sealed payload with default stretch params.
pub fn decrypt(sealed: &[u8], key_material: &[u8], iterations: Iterations) -> SealformResult<Checked<Vec<u8>>> {
    decrypt_with(sealed, key_material, iterations, &StretchParams::default())
}

/// Verify and decrypt a payload produced by [`encrypt_with`].
///
/// Tag mismatches and payloads whose framing cannot be valid come back as
/// [`Checked::IntegrityFailure`]. Errors are reserved for bad key material
/// and primitive failures.
pub fn decrypt_with(
    sealed: &[u8],
    key_material: &[u8],
    iterations: Iterations,
    params: &StretchParams,
) -> SealformResult<Checked<Vec<u8>>> {
    if sealed.len() < MIN_SEALED_SIZE || (sealed.len() - MIN_SEALED_SIZE) % SERPENT_BLOCK_SIZE != 0 {
        tracing::debug!(len = sealed.len(), "cascade: framing cannot hold a sealed payload");
        return Ok(Checked::IntegrityFailure);
    }

    let (salt, rest) = sealed.split_at(SALT_SIZE);
    let (body, tag) = rest.split_at(rest.len() - TAG_SIZE);
    let keys = CascadeKeys::stretch(key_material, salt, iterations, params)?;

    // verify_slice compares in constant time
    if keys.tag(body)?.verify_slice(tag).is_err() {
        tracing::debug!(len = sealed.len(), %iterations, "cascade: tag mismatch");
        return Ok(Checked::IntegrityFailure);
    }

    let mut plaintext = body.to_vec();
    serpent_cbc_decrypt(&keys.serpent_key, &keys.serpent_iv, &mut plaintext)?;
    keys.apply_chacha(&mut plaintext);
    Ok(Checked::Verified(plaintext))
}

fn serpent(key: &[u8]) -> SealformResult<Serpent> {
    <Serpent as KeyInit>::new_from_slice(key)
        .map_err(|_| SealformError::malformed(format!("Serpent key must be 1..=32 bytes, got {}", key.len())))
}

fn serpent_cbc_encrypt(key: &[u8], iv: &[u8; SERPENT_BLOCK_SIZE], buf: &mut [u8]) -> SealformResult<()> {
    let cipher = serpent(key)?;
    let mut prev = *iv;
    for block in buf.chunks_exact_mut(SERPENT_BLOCK_SIZE) {
        for (b, p) in block.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
        prev.copy_from_slice(block);
    }
    Ok(())
}

fn serpent_cbc_decrypt(key: &[u8], iv: &[u8; SERPENT_BLOCK_SIZE], buf: &mut [u8]) -> SealformResult<()> {
    let cipher = serpent(key)?;
    let mut prev = *iv;
    for block in buf.chunks_exact_mut(SERPENT_BLOCK_SIZE) {
        let mut ciphertext = [0u8; SERPENT_BLOCK_SIZE];
        ciphertext.copy_from_slice(block);
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
        for (b, p) in block.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        prev = ciphertext;
    }
    Ok(())
}

/// Encrypt one block with Serpent-256 in ECB mode (used for the synthetic
/// backend credential).
pub(crate) fn serpent_ecb_encrypt_block(
    key: &[u8],
    block: &[u8; SERPENT_BLOCK_SIZE],
) -> SealformResult<[u8; SERPENT_BLOCK_SIZE]> {
    let cipher = serpent(key)?;
    let mut out = *block;
    cipher.encrypt_block(GenericArray::from_mut_slice(&mut out));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fast() -> StretchParams {
        StretchParams { mem_cost_kib: 8 }
    }

    fn iters(n: u32) -> Iterations {
        Iterations::new(n).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let plaintext = [0x5Au8; 48];
        let sealed = encrypt_with(&plaintext, b"key material", iters(2), &fast()).unwrap();
        let opened = decrypt_with(&sealed, b"key material", iters(2), &fast()).unwrap();

        assert_eq!(opened, Checked::Verified(plaintext.to_vec()));
    }

    #[test]
    fn test_default_params_roundtrip() {
        let plaintext = [7u8; 16];
        let sealed = encrypt(&plaintext, &[1u8; 32], iters(1)).unwrap();
        assert_eq!(
            decrypt(&sealed, &[1u8; 32], iters(1)).unwrap().into_option(),
            Some(plaintext.to_vec())
        );
    }

    #[test]
    fn test_empty_plaintext() {
        let sealed = encrypt_with(&[], b"k", iters(1), &fast()).unwrap();
        assert_eq!(sealed.len(), MIN_SEALED_SIZE);
        assert_eq!(
            decrypt_with(&sealed, b"k", iters(1), &fast()).unwrap(),
            Checked::Verified(Vec::new())
        );
    }

    #[test]
    fn test_sealed_size() {
        let sealed = encrypt_with(&[0u8; 64], b"k", iters(1), &fast()).unwrap();
        // salt (32) + ciphertext (64) + tag (64) = 160
        assert_eq!(sealed.len(), SALT_SIZE + 64 + TAG_SIZE);
    }

    #[test]
    fn test_ciphertext_differs_from_plaintext() {
        let plaintext = [0u8; 32];
        let sealed = encrypt_with(&plaintext, b"k", iters(1), &fast()).unwrap();
        assert_ne!(&sealed[SALT_SIZE..SALT_SIZE + 32], &plaintext[..]);
    }

    #[test]
    fn test_fresh_salt_per_message() {
        let a = encrypt_with(&[0u8; 16], b"k", iters(1), &fast()).unwrap();
        let b = encrypt_with(&[0u8; 16], b"k", iters(1), &fast()).unwrap();
        assert_ne!(a, b, "same plaintext and key must not repeat ciphertext");
    }

    #[test]
    fn test_unaligned_plaintext_rejected() {
        let result = encrypt_with(&[0u8; 15], b"k", iters(1), &fast());
        assert!(matches!(result, Err(SealformError::MalformedInput(_))));
    }

    #[test]
    fn test_empty_key_material_rejected() {
        assert!(encrypt_with(&[0u8; 16], b"", iters(1), &fast()).is_err());
        let sealed = encrypt_with(&[0u8; 16], b"k", iters(1), &fast()).unwrap();
        assert!(decrypt_with(&sealed, b"", iters(1), &fast()).is_err());
    }

    #[test]
    fn test_wrong_key_is_integrity_failure() {
        let sealed = encrypt_with(&[1u8; 32], b"right", iters(1), &fast()).unwrap();
        let opened = decrypt_with(&sealed, b"wrong", iters(1), &fast()).unwrap();
        assert_eq!(opened, Checked::IntegrityFailure);
    }

    #[test]
    fn test_wrong_iterations_is_integrity_failure() {
        let sealed = encrypt_with(&[1u8; 32], b"k", iters(2), &fast()).unwrap();
        let opened = decrypt_with(&sealed, b"k", iters(3), &fast()).unwrap();
        assert!(!opened.is_verified());
    }

    #[test]
    fn test_truncated_payload_is_integrity_failure() {
        let sealed = encrypt_with(&[1u8; 32], b"k", iters(1), &fast()).unwrap();
        assert_eq!(
            decrypt_with(&sealed[..sealed.len() - 1], b"k", iters(1), &fast()).unwrap(),
            Checked::IntegrityFailure
        );
        assert_eq!(
            decrypt_with(&sealed[..10], b"k", iters(1), &fast()).unwrap(),
            Checked::IntegrityFailure
        );
    }

    #[test]
    fn test_serpent_cbc_chains_blocks() {
        let key = [3u8; 32];
        let iv = [9u8; 16];
        let mut buf = [0u8; 32];
        serpent_cbc_encrypt(&key, &iv, &mut buf).unwrap();
        assert_ne!(buf[..16], buf[16..], "identical blocks must not repeat under CBC");

        serpent_cbc_decrypt(&key, &iv, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 32]);
    }

    #[test]
    fn test_serpent_ecb_block_deterministic() {
        let key = [0x42u8; 32];
        let block = [0x17u8; 16];
        let a = serpent_ecb_encrypt_block(&key, &block).unwrap();
        let b = serpent_ecb_encrypt_block(&key, &block).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, block);
    }

    #[test]
    fn test_checked_map() {
        let checked: Checked<u8> = Checked::Verified(2);
        assert_eq!(checked.map(|v| v * 2), Checked::Verified(4));
        let failed: Checked<u8> = Checked::IntegrityFailure;
        assert_eq!(failed.map(|v| v * 2), Checked::IntegrityFailure);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn roundtrip_any_aligned_plaintext(
            blocks in 0usize..8,
            fill in any::<u8>(),
            key in proptest::collection::vec(any::<u8>(), 1..96),
            n in 1u32..4,
        ) {
            let plaintext = vec![fill; blocks * SERPENT_BLOCK_SIZE];
            let sealed = encrypt_with(&plaintext, &key, iters(n), &fast()).unwrap();
            let opened = decrypt_with(&sealed, &key, iters(n), &fast()).unwrap();
            prop_assert_eq!(opened, Checked::Verified(plaintext));
        }

        #[test]
        fn any_flipped_byte_fails_integrity(
            index in any::<proptest::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut sealed = encrypt_with(&[0xC3u8; 32], b"tamper", iters(1), &fast()).unwrap();
            let i = index.index(sealed.len());
            sealed[i] ^= flip;
            let opened = decrypt_with(&sealed, b"tamper", iters(1), &fast()).unwrap();
            prop_assert_eq!(opened, Checked::IntegrityFailure);
        }
    }
}
