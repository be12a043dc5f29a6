//! Stored-field records
//!
//! The persistence layer stores these as base64 text; the field names are the
//! storage contract:
//! - form: `encrypted_form_template`, `encryption_key` (wrapped form key)
//! - keypair: `public_key` (raw), `private_key` (wrapped)
//! - response: `encrypted_form_response`, `mlkem_ciphertext_1`, `mlkem_ciphertext_2`

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use sealform_core::{SealformError, SealformResult};

use crate::cascade::{Checked, StretchParams};
use crate::credentials::Iterations;
use crate::fingerprint::fingerprint;
use crate::keys::{
    generate_form_key, open_template, seal_template, unwrap_form_key, wrap_form_key, FormKey,
    Session,
};
use crate::padding::Unpadded;
use crate::pq::{self, PqKeypair, PqPrivateKey, SealedResponse};

/// A form as persisted: encrypted template plus its wrapped form key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredForm {
    /// Padded template sealed under the form key (base64)
    pub encrypted_form_template: String,
    /// Form key wrapped under the author's master secret (base64)
    pub encryption_key: String,
}

impl StoredForm {
    /// Create a new form with a fresh form key.
    pub fn create(session: &Session, template: &str) -> SealformResult<(Self, FormKey)> {
        let form_key = generate_form_key();
        let form = Self::seal(session, &form_key, template)?;
        Ok((form, form_key))
    }

    /// Seal `template` under an existing form key (edit/publish).
    pub fn seal(session: &Session, form_key: &FormKey, template: &str) -> SealformResult<Self> {
        let sealed = seal_template(
            form_key,
            template,
            session.wrap_iterations(),
            session.stretch_params(),
        )?;
        let wrapped = wrap_form_key(session, form_key)?;

        Ok(Self {
            encrypted_form_template: base64_encode(&sealed),
            encryption_key: base64_encode(&wrapped),
        })
    }

    /// Extract the form key by unwrapping with the master secret.
    pub fn unwrap_form_key(&self, session: &Session) -> SealformResult<Checked<FormKey>> {
        let wrapped = base64_decode(&self.encryption_key, "encryption_key")?;
        unwrap_form_key(session, &wrapped)
    }

    /// Unwrap the form key and open the template.
    pub fn open(&self, session: &Session) -> SealformResult<Checked<Unpadded>> {
        let form_key = match self.unwrap_form_key(session)? {
            Checked::Verified(key) => key,
            Checked::IntegrityFailure => return Ok(Checked::IntegrityFailure),
        };
        let sealed = base64_decode(&self.encrypted_form_template, "encrypted_form_template")?;
        open_template(
            &form_key,
            &sealed,
            session.wrap_iterations(),
            session.stretch_params(),
        )
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> SealformResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SealformError::Other(anyhow::anyhow!("form serialization: {e}")))
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(data: &[u8]) -> SealformResult<Self> {
        serde_json::from_slice(data).map_err(|e| SealformError::malformed(format!("form deserialization: {e}")))
    }
}

/// An author's keypair as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKeypair {
    /// ML-KEM-1024 public key, unwrapped (base64)
    pub public_key: String,
    /// ML-KEM-1024 private key wrapped under the master secret (base64)
    pub private_key: String,
}

impl StoredKeypair {
    pub fn seal(session: &Session, keypair: &PqKeypair) -> SealformResult<Self> {
        let wrapped = keypair.wrap_private_key(session)?;
        Ok(Self {
            public_key: base64_encode(keypair.public_key()),
            private_key: base64_encode(&wrapped),
        })
    }

    /// Generate a new keypair (registration or regeneration) and seal it.
    ///
    /// Responses sealed to the previous public key can no longer be opened
    /// once the old record is replaced.
    pub fn generate(session: &Session) -> SealformResult<Self> {
        Self::seal(session, &PqKeypair::generate()?)
    }

    pub fn public_key_bytes(&self) -> SealformResult<Vec<u8>> {
        base64_decode(&self.public_key, "public_key")
    }

    pub fn unwrap_private_key(&self, session: &Session) -> SealformResult<Checked<PqPrivateKey>> {
        let wrapped = base64_decode(&self.private_key, "private_key")?;
        pq::unwrap_private_key(session, &wrapped)
    }

    pub fn fingerprint(&self) -> SealformResult<String> {
        Ok(fingerprint(&self.public_key_bytes()?))
    }

    pub fn to_bytes(&self) -> SealformResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SealformError::Other(anyhow::anyhow!("keypair serialization: {e}")))
    }

    pub fn from_bytes(data: &[u8]) -> SealformResult<Self> {
        serde_json::from_slice(data).map_err(|e| SealformError::malformed(format!("keypair deserialization: {e}")))
    }
}

/// A respondent submission as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    /// Padded response sealed under the session key (base64)
    pub encrypted_form_response: String,
    /// First ML-KEM-1024 ciphertext (base64)
    pub mlkem_ciphertext_1: String,
    /// Second ML-KEM-1024 ciphertext (base64)
    pub mlkem_ciphertext_2: String,
}

impl StoredResponse {
    /// Seal a response to the author's public key.
    pub fn seal(
        public_key: &[u8],
        response: &str,
        iterations: Iterations,
        stretch: &StretchParams,
    ) -> SealformResult<Self> {
        Ok(Self::from(&pq::seal_response(public_key, response, iterations, stretch)?))
    }

    pub fn to_sealed(&self) -> SealformResult<SealedResponse> {
        Ok(SealedResponse {
            ciphertext: base64_decode(&self.encrypted_form_response, "encrypted_form_response")?,
            kem_ciphertext_1: base64_decode(&self.mlkem_ciphertext_1, "mlkem_ciphertext_1")?,
            kem_ciphertext_2: base64_decode(&self.mlkem_ciphertext_2, "mlkem_ciphertext_2")?,
        })
    }

    pub fn open(
        &self,
        private_key: &PqPrivateKey,
        iterations: Iterations,
        stretch: &StretchParams,
    ) -> SealformResult<Checked<Unpadded>> {
        pq::open_response(private_key, &self.to_sealed()?, iterations, stretch)
    }

    pub fn to_bytes(&self) -> SealformResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SealformError::Other(anyhow::anyhow!("response serialization: {e}")))
    }

    pub fn from_bytes(data: &[u8]) -> SealformResult<Self> {
        serde_json::from_slice(data).map_err(|e| SealformError::malformed(format!("response deserialization: {e}")))
    }
}

impl From<&SealedResponse> for StoredResponse {
    fn from(sealed: &SealedResponse) -> Self {
        Self {
            encrypted_form_response: base64_encode(&sealed.ciphertext),
            mlkem_ciphertext_1: base64_encode(&sealed.kem_ciphertext_1),
            mlkem_ciphertext_2: base64_encode(&sealed.kem_ciphertext_2),
        }
    }
}

/// Open many stored responses in parallel.
///
/// Items are independent: one outcome per input, in input order, so a corrupt
/// or malformed record never aborts the rest of the batch.
pub fn open_responses(
    responses: &[StoredResponse],
    private_key: &PqPrivateKey,
    iterations: Iterations,
    stretch: &StretchParams,
) -> Vec<SealformResult<Checked<Unpadded>>> {
    let outcomes: Vec<_> = responses
        .par_iter()
        .map(|response| response.open(private_key, iterations, stretch))
        .collect();

    let corrupt = outcomes
        .iter()
        .filter(|outcome| match outcome {
            Ok(Checked::Verified(unpadded)) => !unpadded.is_valid(),
            _ => true,
        })
        .count();
    if corrupt > 0 {
        tracing::warn!(total = responses.len(), corrupt, "some responses failed to open");
    } else {
        tracing::debug!(total = responses.len(), "opened response batch");
    }

    outcomes
}

fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

fn base64_decode(s: &str, field: &str) -> SealformResult<Vec<u8>> {
    if s.is_empty() {
        return Err(SealformError::malformed(format!("{field} is empty")));
    }
    STANDARD
        .decode(s)
        .map_err(|e| SealformError::malformed(format!("{field}: base64 decode: {e}")))
}
