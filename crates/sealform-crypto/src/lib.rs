//! sealform-crypto: the envelope subsystem behind sealform's end-to-end
//! encrypted forms.
//!
//! Every stored secret passes through the cascade cipher; nothing here
//! performs I/O or keeps state between calls.
//!
//! Key hierarchy:
//! ```text
//! (email, password) ── SHA-512 → Whirlpool salts ── Argon2id (1100..=1400 passes) ──► 336-byte bundle
//!   ├── ID_A ⊕ ID_B ── Serpent-256-ECB(CredKey) ──► synthetic backend credential (hex)
//!   └── MasterSecret (272 bytes)
//!         ├── Form Key (per form, random, wrapped at iterations / 9)
//!         │   └── Template: pad → ChaCha20 → Serpent-256-CBC → HMAC-SHA3-512
//!         └── ML-KEM-1024 private key (wrapped at iterations / 9)
//!               └── Response session key = ss1 ‖ ss2 (two encapsulations)
//!                   └── Response: pad → cascade
//! ```

pub mod cascade;
pub mod credentials;
pub mod fingerprint;
pub mod hash;
pub mod keys;
pub mod padding;
pub mod pq;
pub mod records;

pub use cascade::{decrypt, encrypt, Checked, StretchParams};
pub use credentials::{
    derive_credentials, CredentialParams, Credentials, DerivedKeyBundle, Iterations, MasterSecret,
    SECONDARY_WRAP_DIVISOR,
};
pub use fingerprint::{fingerprint, fingerprint_text};
pub use keys::{
    generate_form_key, open_template, seal_template, unwrap_form_key, wrap_form_key, FormKey,
    Session,
};
pub use padding::{pad, pad_with_delimiter, unpad, Unpadded, DEFAULT_DELIMITER};
pub use pq::{
    decapsulate, encapsulate, open_response, seal_response, unwrap_private_key, PqKeypair,
    PqPrivateKey, SealedResponse, SessionKey, SharedSecret,
};
pub use records::{open_responses, StoredForm, StoredKeypair, StoredResponse};

/// Serpent block size; every cascade plaintext must be a multiple of it.
pub const SERPENT_BLOCK_SIZE: usize = 16;

/// Size of a Serpent-256 / ChaCha20 key in bytes
pub const KEY_SIZE: usize = 32;
