//! ML-KEM-1024 envelope for respondent submissions
//!
//! Each author holds one keypair. A respondent seals a submission by
//! encapsulating twice against the author's public key and using the
//! concatenated shared secrets as cascade key material:
//! ```text
//! (ct1, ss1) = Encaps(pk)    (ct2, ss2) = Encaps(pk)
//! session_key = ss1 ‖ ss2                              (64 bytes)
//! response    = cascade(pad(text), session_key)
//! ```
//! The author decapsulates both ciphertexts with the unwrapped private key to
//! rebuild the session key. ML-KEM uses implicit rejection, so a mismatched
//! keypair yields an unrelated secret and the cascade tag check fails.

use fips203::ml_kem_1024;
use fips203::traits::{Decaps, Encaps, KeyGen, SerDes};
use zeroize::{Zeroize, Zeroizing};

use sealform_core::{SealformError, SealformResult};

use crate::cascade::{self, Checked, StretchParams};
use crate::credentials::Iterations;
use crate::keys::Session;
use crate::padding::{self, Unpadded, DEFAULT_DELIMITER};
use crate::SERPENT_BLOCK_SIZE;

/// ML-KEM-1024 encapsulation (public) key size
pub const PUBLIC_KEY_SIZE: usize = 1568;

/// ML-KEM-1024 decapsulation (private) key size
pub const PRIVATE_KEY_SIZE: usize = 3168;

/// ML-KEM-1024 ciphertext size
pub const CIPHERTEXT_SIZE: usize = 1568;

/// ML-KEM shared secret size
pub const SHARED_SECRET_SIZE: usize = 32;

/// Response session key size (two shared secrets)
pub const SESSION_KEY_SIZE: usize = 2 * SHARED_SECRET_SIZE;

/// ML-KEM-1024 decapsulation key bytes. Zeroized on drop.
#[derive(Clone)]
pub struct PqPrivateKey {
    bytes: Zeroizing<Vec<u8>>,
}

impl PqPrivateKey {
    pub fn from_bytes(bytes: &[u8]) -> SealformResult<Self> {
        if bytes.len() != PRIVATE_KEY_SIZE {
            return Err(SealformError::malformed(format!(
                "ML-KEM-1024 private key must be {PRIVATE_KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            bytes: Zeroizing::new(bytes.to_vec()),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn decaps_key(&self) -> SealformResult<ml_kem_1024::DecapsKey> {
        let mut raw = [0u8; PRIVATE_KEY_SIZE];
        raw.copy_from_slice(&self.bytes);
        let key = ml_kem_1024::DecapsKey::try_from_bytes(raw)
            .map_err(|e| SealformError::malformed(format!("invalid ML-KEM-1024 private key: {e}")));
        raw.zeroize();
        key
    }
}

impl std::fmt::Debug for PqPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PqPrivateKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// An author's ML-KEM-1024 keypair.
#[derive(Debug, Clone)]
pub struct PqKeypair {
    public_key: Vec<u8>,
    private_key: PqPrivateKey,
}

impl PqKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> SealformResult<Self> {
        let (ek, dk) = ml_kem_1024::KG::try_keygen()
            .map_err(|e| SealformError::primitive(format!("ML-KEM-1024 keygen failed: {e}")))?;

        let public_key = ek.into_bytes().to_vec();
        let mut dk_bytes = dk.into_bytes();
        let private_key = PqPrivateKey::from_bytes(&dk_bytes);
        dk_bytes.zeroize();

        tracing::debug!("generated ML-KEM-1024 keypair");
        Ok(Self {
            public_key,
            private_key: private_key?,
        })
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn private_key(&self) -> &PqPrivateKey {
        &self.private_key
    }

    /// Wrap the private key under the session's master secret for storage.
    pub fn wrap_private_key(&self, session: &Session) -> SealformResult<Vec<u8>> {
        session.wrap_secret(self.private_key.as_bytes())
    }
}

/// Unwrap a private key stored by [`PqKeypair::wrap_private_key`].
pub fn unwrap_private_key(session: &Session, wrapped: &[u8]) -> SealformResult<Checked<PqPrivateKey>> {
    match session.unwrap_secret(wrapped)? {
        Checked::Verified(bytes) => Ok(Checked::Verified(PqPrivateKey::from_bytes(&bytes)?)),
        Checked::IntegrityFailure => Ok(Checked::IntegrityFailure),
    }
}

/// One ML-KEM shared secret. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}

/// Single-use response key, `ss1 ‖ ss2`. Zeroized on drop.
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    pub fn combine(first: &SharedSecret, second: &SharedSecret) -> Self {
        let mut bytes = [0u8; SESSION_KEY_SIZE];
        bytes[..SHARED_SECRET_SIZE].copy_from_slice(first.as_bytes());
        bytes[SHARED_SECRET_SIZE..].copy_from_slice(second.as_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

/// Output of [`encapsulate`]
#[derive(Debug)]
pub struct Encapsulation {
    pub ciphertext: Vec<u8>,
    pub shared_secret: SharedSecret,
}

/// Encapsulate a fresh shared secret against `public_key`.
pub fn encapsulate(public_key: &[u8]) -> SealformResult<Encapsulation> {
    let raw: [u8; PUBLIC_KEY_SIZE] = public_key.try_into().map_err(|_| {
        SealformError::malformed(format!(
            "ML-KEM-1024 public key must be {PUBLIC_KEY_SIZE} bytes, got {}",
            public_key.len()
        ))
    })?;
    let ek = ml_kem_1024::EncapsKey::try_from_bytes(raw)
        .map_err(|e| SealformError::malformed(format!("invalid ML-KEM-1024 public key: {e}")))?;

    let (ssk, ct) = ek
        .try_encaps()
        .map_err(|e| SealformError::primitive(format!("ML-KEM-1024 encapsulation failed: {e}")))?;

    Ok(Encapsulation {
        ciphertext: ct.into_bytes().to_vec(),
        shared_secret: SharedSecret(ssk.into_bytes()),
    })
}

/// Recover the shared secret for `ciphertext`.
///
/// A ciphertext made for another keypair does not fail here; it yields an
/// unrelated secret.
pub fn decapsulate(ciphertext: &[u8], private_key: &PqPrivateKey) -> SealformResult<SharedSecret> {
    let raw: [u8; CIPHERTEXT_SIZE] = ciphertext.try_into().map_err(|_| {
        SealformError::malformed(format!(
            "ML-KEM-1024 ciphertext must be {CIPHERTEXT_SIZE} bytes, got {}",
            ciphertext.len()
        ))
    })?;
    let ct = ml_kem_1024::CipherText::try_from_bytes(raw)
        .map_err(|e| SealformError::primitive(format!("ML-KEM-1024 ciphertext rejected: {e}")))?;

    let ssk = private_key
        .decaps_key()?
        .try_decaps(&ct)
        .map_err(|e| SealformError::primitive(format!("ML-KEM-1024 decapsulation failed: {e}")))?;

    Ok(SharedSecret(ssk.into_bytes()))
}

/// A sealed submission: cascade payload plus both KEM ciphertexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedResponse {
    pub ciphertext: Vec<u8>,
    pub kem_ciphertext_1: Vec<u8>,
    pub kem_ciphertext_2: Vec<u8>,
}

/// Seal a response to the author's public key.
pub fn seal_response(
    public_key: &[u8],
    response: &str,
    iterations: Iterations,
    stretch: &StretchParams,
) -> SealformResult<SealedResponse> {
    let first = encapsulate(public_key)?;
    let second = encapsulate(public_key)?;
    let session_key = SessionKey::combine(&first.shared_secret, &second.shared_secret);

    let padded = Zeroizing::new(padding::pad(response, SERPENT_BLOCK_SIZE)?);
    let ciphertext = cascade::encrypt_with(&padded, session_key.as_bytes(), iterations, stretch)?;

    tracing::debug!(len = ciphertext.len(), "sealed response");
    Ok(SealedResponse {
        ciphertext,
        kem_ciphertext_1: first.ciphertext,
        kem_ciphertext_2: second.ciphertext,
    })
}

/// Open a sealed response with the author's private key.
pub fn open_response(
    private_key: &PqPrivateKey,
    sealed: &SealedResponse,
    iterations: Iterations,
    stretch: &StretchParams,
) -> SealformResult<Checked<Unpadded>> {
    let first = decapsulate(&sealed.kem_ciphertext_1, private_key)?;
    let second = decapsulate(&sealed.kem_ciphertext_2, private_key)?;
    let session_key = SessionKey::combine(&first, &second);

    let opened = cascade::decrypt_with(&sealed.ciphertext, session_key.as_bytes(), iterations, stretch)?;
    Ok(opened.map(|padded| {
        let padded = Zeroizing::new(padded);
        padding::unpad(&padded, DEFAULT_DELIMITER)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{MasterSecret, MASTER_SECRET_SIZE};
    use sealform_core::EnvelopeConfig;

    fn fast() -> StretchParams {
        StretchParams { mem_cost_kib: 8 }
    }

    fn one() -> Iterations {
        Iterations::new(1).unwrap()
    }

    #[test]
    fn test_keypair_sizes() {
        let keypair = PqKeypair::generate().unwrap();
        assert_eq!(keypair.public_key().len(), PUBLIC_KEY_SIZE);
        assert_eq!(keypair.private_key().as_bytes().len(), PRIVATE_KEY_SIZE);
    }

    #[test]
    fn test_encapsulate_decapsulate() {
        let keypair = PqKeypair::generate().unwrap();

        let encap = encapsulate(keypair.public_key()).unwrap();
        assert_eq!(encap.ciphertext.len(), CIPHERTEXT_SIZE);

        let recovered = decapsulate(&encap.ciphertext, keypair.private_key()).unwrap();
        assert_eq!(recovered, encap.shared_secret);
    }

    #[test]
    fn test_independent_encapsulations_differ() {
        let keypair = PqKeypair::generate().unwrap();
        let a = encapsulate(keypair.public_key()).unwrap();
        let b = encapsulate(keypair.public_key()).unwrap();

        assert_ne!(a.ciphertext, b.ciphertext);
        assert_ne!(a.shared_secret, b.shared_secret);
    }

    #[test]
    fn test_mismatched_keypair_gives_other_secret() {
        let alice = PqKeypair::generate().unwrap();
        let mallory = PqKeypair::generate().unwrap();

        let encap = encapsulate(alice.public_key()).unwrap();
        let wrong = decapsulate(&encap.ciphertext, mallory.private_key()).unwrap();
        assert_ne!(wrong, encap.shared_secret);
    }

    #[test]
    fn test_bad_lengths_rejected() {
        let keypair = PqKeypair::generate().unwrap();
        assert!(matches!(
            encapsulate(&[0u8; 100]),
            Err(SealformError::MalformedInput(_))
        ));
        assert!(matches!(
            decapsulate(&[0u8; 100], keypair.private_key()),
            Err(SealformError::MalformedInput(_))
        ));
        assert!(PqPrivateKey::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_session_key_layout() {
        let a = SharedSecret([1u8; SHARED_SECRET_SIZE]);
        let b = SharedSecret([2u8; SHARED_SECRET_SIZE]);
        let key = SessionKey::combine(&a, &b);

        assert_eq!(&key.as_bytes()[..32], &[1u8; 32]);
        assert_eq!(&key.as_bytes()[32..], &[2u8; 32]);
    }

    #[test]
    fn test_response_roundtrip() {
        let keypair = PqKeypair::generate().unwrap();
        let answer = r#"{"q1":"yes","q2":"Blue, but only on Tuesdays"}"#;

        let sealed = seal_response(keypair.public_key(), answer, one(), &fast()).unwrap();
        let opened = open_response(keypair.private_key(), &sealed, one(), &fast()).unwrap();

        assert_eq!(opened.into_intact().as_deref(), Some(answer));
    }

    #[test]
    fn test_response_to_other_author_fails_integrity() {
        let author = PqKeypair::generate().unwrap();
        let other = PqKeypair::generate().unwrap();

        let sealed = seal_response(author.public_key(), "hello", one(), &fast()).unwrap();
        let opened = open_response(other.private_key(), &sealed, one(), &fast()).unwrap();

        assert_eq!(opened, Checked::IntegrityFailure);
    }

    #[test]
    fn test_swapped_kem_ciphertexts_fail_integrity() {
        let keypair = PqKeypair::generate().unwrap();
        let mut sealed = seal_response(keypair.public_key(), "order matters", one(), &fast()).unwrap();
        std::mem::swap(&mut sealed.kem_ciphertext_1, &mut sealed.kem_ciphertext_2);

        let opened = open_response(keypair.private_key(), &sealed, one(), &fast()).unwrap();
        assert!(!opened.is_verified());
    }

    #[test]
    fn test_private_key_wrap_roundtrip() {
        let config = EnvelopeConfig {
            stretch_mem_cost_kib: 8,
            ..EnvelopeConfig::default()
        };
        let session = Session::new(
            MasterSecret::from_bytes([7u8; MASTER_SECRET_SIZE]),
            Iterations::new(9).unwrap(),
        )
        .with_config(&config);
        let keypair = PqKeypair::generate().unwrap();

        let wrapped = keypair.wrap_private_key(&session).unwrap();
        let unwrapped = unwrap_private_key(&session, &wrapped).unwrap().into_option().unwrap();
        assert_eq!(unwrapped.as_bytes(), keypair.private_key().as_bytes());

        let other = Session::new(
            MasterSecret::from_bytes([8u8; MASTER_SECRET_SIZE]),
            Iterations::new(9).unwrap(),
        )
        .with_config(&config);
        assert!(!unwrap_private_key(&other, &wrapped).unwrap().is_verified());
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let keypair = PqKeypair::generate().unwrap();
        assert!(format!("{:?}", keypair.private_key()).contains("REDACTED"));
    }
}
