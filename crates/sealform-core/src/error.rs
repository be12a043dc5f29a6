use thiserror::Error;

pub type SealformResult<T> = Result<T, SealformError>;

/// Failures surfaced by the envelope subsystem.
///
/// Integrity failures (MAC mismatch, broken padding) are not errors; they come
/// back as `Checked::IntegrityFailure` and `Unpadded::Corrupt`.
#[derive(Debug, Error)]
pub enum SealformError {
    /// Caller error: wrong key length, invalid base64, empty required field.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// An underlying primitive (Argon2, ML-KEM, block cipher) rejected its input.
    #[error("primitive failure: {0}")]
    Primitive(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SealformError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedInput(msg.into())
    }

    pub fn primitive(msg: impl Into<String>) -> Self {
        Self::Primitive(msg.into())
    }
}
