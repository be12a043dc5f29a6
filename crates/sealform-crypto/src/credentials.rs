//! Credential key derivation: (email, password) → key bundle, iteration count,
//! synthetic backend credential
//!
//! ```text
//! email_salt      = Whirlpool(SHA-512(email))
//! password_digest = Whirlpool(SHA-512(password))
//! iterations      = 1100 + (Σ password_digest bytes mod 301)
//! bundle          = Argon2id(password, email_salt ⊕ password_digest, p=1, t=iterations, m=512 KiB, 336 bytes)
//!                 = [16: ID_A][16: ID_B][32: CredKey][272: MasterSecret]
//! credential      = hex(Serpent-256-ECB(ID_A ⊕ ID_B, key = CredKey))
//! ```
//!
//! Sign-in and sign-up must produce byte-identical output, so every constant
//! here is part of the compatibility surface.

use std::fmt;
use std::ops::Range;

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use zeroize::{Zeroize, Zeroizing};

use sealform_core::{EnvelopeConfig, SealformError, SealformResult};

use crate::cascade::serpent_ecb_encrypt_block;
use crate::hash::{sha512_whirlpool, DIGEST_SIZE};
use crate::keys::Session;
use crate::SERPENT_BLOCK_SIZE;

/// Size of the derived key bundle
pub const BUNDLE_SIZE: usize = 336;

/// Size of the master secret (bundle tail)
pub const MASTER_SECRET_SIZE: usize = 272;

/// Divisor applied to the credential iteration count when wrapping form keys
/// and the PQ private key.
pub const SECONDARY_WRAP_DIVISOR: u32 = 9;

const ID_A: Range<usize> = 0..16;
const ID_B: Range<usize> = 16..32;
const CRED_KEY: Range<usize> = 32..64;
const MASTER_SECRET: Range<usize> = 64..BUNDLE_SIZE;

/// Argon2id work factor (time cost).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Iterations(u32);

impl Iterations {
    pub fn new(count: u32) -> SealformResult<Self> {
        if count == 0 {
            return Err(SealformError::malformed("iteration count must be at least 1"));
        }
        Ok(Self(count))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// `floor + (Σ digest bytes mod span)`
    ///
    /// Fails with a config error when `floor + span - 1` does not fit a `u32`.
    pub fn from_password_digest(digest: &[u8], params: &CredentialParams) -> SealformResult<Self> {
        let sum: u64 = digest.iter().map(|&b| u64::from(b)).sum();
        let offset = (sum % u64::from(params.iteration_span.max(1))) as u32;
        params
            .iteration_floor
            .max(1)
            .checked_add(offset)
            .map(Self)
            .ok_or_else(|| {
                SealformError::Config(format!(
                    "iteration_floor {} + offset {offset} overflows the iteration count",
                    params.iteration_floor
                ))
            })
    }

    /// Reduced count used for secondary wraps.
    pub fn secondary(self) -> Self {
        self.secondary_with(SECONDARY_WRAP_DIVISOR)
    }

    pub fn secondary_with(self, divisor: u32) -> Self {
        Self((self.0 / divisor.max(1)).max(1))
    }
}

impl fmt::Display for Iterations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Parameters for credential derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialParams {
    /// Argon2id memory cost in KiB (default: 512)
    pub mem_cost_kib: u32,
    /// Lowest iteration count (default: 1100)
    pub iteration_floor: u32,
    /// Iteration counts above the floor (default: 301, giving 1100..=1400)
    pub iteration_span: u32,
}

impl Default for CredentialParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 512,
            iteration_floor: 1100,
            iteration_span: 301,
        }
    }
}

impl From<&EnvelopeConfig> for CredentialParams {
    fn from(config: &EnvelopeConfig) -> Self {
        Self {
            mem_cost_kib: config.argon2_mem_cost_kib,
            iteration_floor: config.iteration_floor,
            iteration_span: config.iteration_span,
        }
    }
}

/// The 272-byte secret that wraps every durable key. Zeroized on drop.
#[derive(Clone)]
pub struct MasterSecret {
    bytes: [u8; MASTER_SECRET_SIZE],
}

impl MasterSecret {
    pub fn from_bytes(bytes: [u8; MASTER_SECRET_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; MASTER_SECRET_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterSecret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The 336-byte Argon2id output, sliced at fixed offsets. Zeroized on drop.
pub struct DerivedKeyBundle {
    bytes: [u8; BUNDLE_SIZE],
}

impl DerivedKeyBundle {
    pub fn from_bytes(bytes: [u8; BUNDLE_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn id_a(&self) -> &[u8] {
        &self.bytes[ID_A]
    }

    pub fn id_b(&self) -> &[u8] {
        &self.bytes[ID_B]
    }

    pub fn cred_key(&self) -> &[u8] {
        &self.bytes[CRED_KEY]
    }

    pub fn master_secret(&self) -> MasterSecret {
        let mut bytes = [0u8; MASTER_SECRET_SIZE];
        bytes.copy_from_slice(&self.bytes[MASTER_SECRET]);
        MasterSecret::from_bytes(bytes)
    }

    /// `hex(Serpent-256-ECB(ID_A ⊕ ID_B, CredKey))`
    pub fn synthetic_credential(&self) -> SealformResult<String> {
        let mut block = [0u8; SERPENT_BLOCK_SIZE];
        for (out, (a, b)) in block.iter_mut().zip(self.id_a().iter().zip(self.id_b())) {
            *out = a ^ b;
        }
        let encrypted = serpent_ecb_encrypt_block(self.cred_key(), &block);
        block.zeroize();
        Ok(hex::encode(encrypted?))
    }
}

impl Drop for DerivedKeyBundle {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for DerivedKeyBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKeyBundle")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Everything a successful sign-in or sign-up derives.
#[derive(Debug)]
pub struct Credentials {
    pub bundle: DerivedKeyBundle,
    pub iterations: Iterations,
    /// Lowercase hex, submitted to the identity backend in place of the password.
    pub synthetic_credential: String,
}

impl Credentials {
    /// Session context carrying the master secret and iteration count.
    pub fn session(&self) -> Session {
        Session::new(self.bundle.master_secret(), self.iterations)
    }
}

/// Derive the key bundle, iteration count, and synthetic credential.
///
/// Deterministic: the same inputs always give the same output. Empty inputs
/// are accepted; validating them is the caller's concern.
pub fn derive_credentials(
    email: &str,
    password: &SecretString,
    params: &CredentialParams,
) -> SealformResult<Credentials> {
    let password = password.expose_secret().as_bytes();

    let email_salt = sha512_whirlpool(email.as_bytes());
    let password_digest = Zeroizing::new(sha512_whirlpool(password));
    let iterations = Iterations::from_password_digest(password_digest.as_slice(), params)?;

    let mut salt = Zeroizing::new([0u8; DIGEST_SIZE]);
    for (out, (e, p)) in salt.iter_mut().zip(email_salt.iter().zip(password_digest.iter())) {
        *out = e ^ p;
    }

    let argon2_params = Params::new(params.mem_cost_kib, iterations.get(), 1, Some(BUNDLE_SIZE))
        .map_err(|e| SealformError::primitive(format!("invalid Argon2id params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut bytes = [0u8; BUNDLE_SIZE];
    argon2
        .hash_password_into(password, salt.as_slice(), &mut bytes)
        .map_err(|e| SealformError::primitive(format!("Argon2id KDF failed: {e}")))?;
    let bundle = DerivedKeyBundle::from_bytes(bytes);
    bytes.zeroize();

    let synthetic_credential = bundle.synthetic_credential()?;
    tracing::debug!(%iterations, "derived credential key bundle");

    Ok(Credentials {
        bundle,
        iterations,
        synthetic_credential,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Cheap memory cost; iteration counts still follow the password digest.
    fn fast() -> CredentialParams {
        CredentialParams {
            mem_cost_kib: 8,
            ..CredentialParams::default()
        }
    }

    #[test]
    fn test_derivation_deterministic() {
        let password = SecretString::from("test-passphrase-123");
        let a = derive_credentials("user@example.com", &password, &fast()).unwrap();
        let b = derive_credentials("user@example.com", &password, &fast()).unwrap();

        assert_eq!(a.iterations, b.iterations);
        assert_eq!(a.synthetic_credential, b.synthetic_credential);
        assert_eq!(
            a.bundle.master_secret().as_bytes(),
            b.bundle.master_secret().as_bytes(),
            "derivation must be deterministic"
        );
    }

    #[test]
    fn test_different_passwords() {
        let a = derive_credentials("u@x.io", &SecretString::from("passphrase-a"), &fast()).unwrap();
        let b = derive_credentials("u@x.io", &SecretString::from("passphrase-b"), &fast()).unwrap();

        assert_ne!(a.synthetic_credential, b.synthetic_credential);
        assert_ne!(a.bundle.cred_key(), b.bundle.cred_key());
    }

    #[test]
    fn test_different_emails() {
        let password = SecretString::from("same-password");
        let a = derive_credentials("a@x.io", &password, &fast()).unwrap();
        let b = derive_credentials("b@x.io", &password, &fast()).unwrap();

        // Iterations depend on the password only
        assert_eq!(a.iterations, b.iterations);
        assert_ne!(
            a.bundle.master_secret().as_bytes(),
            b.bundle.master_secret().as_bytes(),
            "email salts the derivation"
        );
    }

    #[test]
    fn test_iterations_golden() {
        let digest = sha512_whirlpool(b"Secret123!");
        let iterations = Iterations::from_password_digest(&digest, &CredentialParams::default()).unwrap();
        assert_eq!(iterations.get(), 1196);

        let digest = sha512_whirlpool(b"password");
        let iterations = Iterations::from_password_digest(&digest, &CredentialParams::default()).unwrap();
        assert_eq!(iterations.get(), 1354);
    }

    #[test]
    fn test_iterations_in_range() {
        let params = CredentialParams::default();
        for password in ["", "a", "hunter2", "correct horse battery staple"] {
            let n = Iterations::from_password_digest(&sha512_whirlpool(password.as_bytes()), &params)
                .unwrap()
                .get();
            assert!((1100..=1400).contains(&n), "{n} out of range");
        }
    }

    #[test]
    fn test_secondary_iterations() {
        assert_eq!(Iterations::new(1196).unwrap().secondary().get(), 132);
        assert_eq!(Iterations::new(1100).unwrap().secondary().get(), 122);
        assert_eq!(Iterations::new(1400).unwrap().secondary().get(), 155);
        // Never drops to zero
        assert_eq!(Iterations::new(3).unwrap().secondary().get(), 1);
    }

    #[test]
    fn test_oversized_floor_is_config_error() {
        let params = CredentialParams {
            mem_cost_kib: 8,
            iteration_floor: u32::MAX,
            iteration_span: 301,
        };
        // Digest bytes summing to 1 give offset 1, one past u32::MAX
        let mut digest = [0u8; DIGEST_SIZE];
        digest[0] = 1;
        assert!(matches!(
            Iterations::from_password_digest(&digest, &params),
            Err(SealformError::Config(_))
        ));

        // Offset 0 still fits
        assert_eq!(
            Iterations::from_password_digest(&[0u8; DIGEST_SIZE], &params).unwrap().get(),
            u32::MAX
        );
    }

    #[test]
    fn test_zero_iterations_rejected() {
        assert!(Iterations::new(0).is_err());
    }

    #[test]
    fn test_bundle_slices() {
        let mut bytes = [0u8; BUNDLE_SIZE];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        let bundle = DerivedKeyBundle::from_bytes(bytes);

        assert_eq!(bundle.id_a(), &bytes[0..16]);
        assert_eq!(bundle.id_b(), &bytes[16..32]);
        assert_eq!(bundle.cred_key(), &bytes[32..64]);
        assert_eq!(bundle.master_secret().as_bytes()[..], bytes[64..]);
    }

    #[test]
    fn test_synthetic_credential_format() {
        let creds = derive_credentials("a@b.com", &SecretString::from("pw"), &fast()).unwrap();
        assert_eq!(creds.synthetic_credential.len(), 32);
        assert!(creds
            .synthetic_credential
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_empty_password_still_derives() {
        let creds = derive_credentials("a@b.com", &SecretString::from(""), &fast()).unwrap();
        assert_eq!(creds.iterations.get(), 1397);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = derive_credentials("a@b.com", &SecretString::from("pw"), &fast()).unwrap();
        let rendered = format!("{:?}", creds.bundle);
        assert!(rendered.contains("REDACTED"));
        assert!(format!("{:?}", creds.bundle.master_secret()).contains("REDACTED"));
    }

    #[test]
    fn test_params_from_config() {
        let params = CredentialParams::from(&EnvelopeConfig::default());
        assert_eq!(params, CredentialParams::default());
    }
}
