//! Key hierarchy: session context, form key generation, key wrapping, and
//! template sealing

use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use sealform_core::{EnvelopeConfig, SealformError, SealformResult};

use crate::cascade::{self, Checked, StretchParams};
use crate::credentials::{Iterations, MasterSecret, SECONDARY_WRAP_DIVISOR};
use crate::padding::{self, Unpadded, DEFAULT_DELIMITER};
use crate::{KEY_SIZE, SERPENT_BLOCK_SIZE};

/// The symmetric key protecting one form's template.
///
/// Stored only wrapped under the author's master secret (cascade at
/// `iterations / SECONDARY_WRAP_DIVISOR`, see [`wrap_form_key`]); plaintext
/// exists only while a form is being edited, published, or its responses
/// read. Zeroized on drop.
#[derive(Clone)]
pub struct FormKey {
    bytes: [u8; KEY_SIZE],
}

impl FormKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for FormKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for FormKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Draw a fresh form key when a form is created.
///
/// Re-sealing an existing form reuses its key; only a new form gets a new one.
pub fn generate_form_key() -> FormKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    FormKey::from_bytes(bytes)
}

/// An unlocked session: the master secret and iteration count of the signed-in
/// author.
///
/// The caller owns and scopes it; the envelope functions only borrow it.
#[derive(Debug, Clone)]
pub struct Session {
    master_secret: MasterSecret,
    iterations: Iterations,
    wrap_divisor: u32,
    stretch: StretchParams,
}

impl Session {
    pub fn new(master_secret: MasterSecret, iterations: Iterations) -> Self {
        Self {
            master_secret,
            iterations,
            wrap_divisor: SECONDARY_WRAP_DIVISOR,
            stretch: StretchParams::default(),
        }
    }

    /// Apply the wrap divisor and stretch cost from config.
    pub fn with_config(mut self, config: &EnvelopeConfig) -> Self {
        self.wrap_divisor = config.secondary_wrap_divisor;
        self.stretch = StretchParams::from(config);
        self
    }

    pub fn master_secret(&self) -> &MasterSecret {
        &self.master_secret
    }

    pub fn iterations(&self) -> Iterations {
        self.iterations
    }

    /// Work factor for secondary wraps (form keys, private key, templates).
    pub fn wrap_iterations(&self) -> Iterations {
        self.iterations.secondary_with(self.wrap_divisor)
    }

    pub fn stretch_params(&self) -> &StretchParams {
        &self.stretch
    }

    /// Wrap (encrypt) a block-aligned secret under the master secret.
    pub fn wrap_secret(&self, secret: &[u8]) -> SealformResult<Vec<u8>> {
        cascade::encrypt_with(
            secret,
            self.master_secret.as_bytes(),
            self.wrap_iterations(),
            &self.stretch,
        )
    }

    /// Unwrap (decrypt) a secret produced by [`Session::wrap_secret`].
    pub fn unwrap_secret(&self, wrapped: &[u8]) -> SealformResult<Checked<Zeroizing<Vec<u8>>>> {
        let opened = cascade::decrypt_with(
            wrapped,
            self.master_secret.as_bytes(),
            self.wrap_iterations(),
            &self.stretch,
        )?;
        Ok(opened.map(Zeroizing::new))
    }
}

/// Wrap (encrypt) a form key under the session's master secret.
///
/// Output: cascade payload, `[32-byte salt][32-byte ciphertext][64-byte tag]`
pub fn wrap_form_key(session: &Session, form_key: &FormKey) -> SealformResult<Vec<u8>> {
    session.wrap_secret(form_key.as_bytes())
}

/// Unwrap (decrypt) a form key.
///
/// A wrong master secret or tampered payload gives
/// [`Checked::IntegrityFailure`]; a verified payload of the wrong size is an
/// error because it was never a wrapped form key.
pub fn unwrap_form_key(session: &Session, wrapped: &[u8]) -> SealformResult<Checked<FormKey>> {
    let plaintext = match session.unwrap_secret(wrapped)? {
        Checked::Verified(plaintext) => plaintext,
        Checked::IntegrityFailure => return Ok(Checked::IntegrityFailure),
    };

    if plaintext.len() != KEY_SIZE {
        return Err(SealformError::malformed(format!(
            "unwrapped form key has wrong size: {} bytes (expected {KEY_SIZE})",
            plaintext.len()
        )));
    }

    let mut key_bytes = [0u8; KEY_SIZE];
    key_bytes.copy_from_slice(&plaintext);
    Ok(Checked::Verified(FormKey::from_bytes(key_bytes)))
}

/// Pad and encrypt a form template under its form key.
pub fn seal_template(
    form_key: &FormKey,
    template: &str,
    iterations: Iterations,
    stretch: &StretchParams,
) -> SealformResult<Vec<u8>> {
    let padded = Zeroizing::new(padding::pad(template, SERPENT_BLOCK_SIZE)?);
    cascade::encrypt_with(&padded, form_key.as_bytes(), iterations, stretch)
}

/// Decrypt and unpad a form template.
pub fn open_template(
    form_key: &FormKey,
    sealed: &[u8],
    iterations: Iterations,
    stretch: &StretchParams,
) -> SealformResult<Checked<Unpadded>> {
    let opened = cascade::decrypt_with(sealed, form_key.as_bytes(), iterations, stretch)?;
    Ok(opened.map(|padded| {
        let padded = Zeroizing::new(padded);
        padding::unpad(&padded, DEFAULT_DELIMITER)
    }))
}
