//! Block-alignment padding for text payloads
//!
//! Padded layout:
//! ```text
//! [UTF-8 text][delimiter, UTF-8 encoded][f filler bytes, each equal to f]
//! 1 <= f <= block_size, total length a multiple of block_size
//! ```
//!
//! The filler count doubles as a structure check: after decryption with the
//! wrong key (or for data written by an older client) the trailing bytes
//! rarely form a consistent filler run followed by the delimiter, which gives
//! a second integrity signal next to the MAC tag.

use sealform_core::{SealformError, SealformResult};

/// Sentinel placed between the text and the filler (U+2063 INVISIBLE SEPARATOR).
pub const DEFAULT_DELIMITER: char = '\u{2063}';

/// Largest block size the one-byte filler count can describe.
pub const MAX_BLOCK_SIZE: usize = 255;

/// Outcome of [`unpad`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Unpadded {
    /// Padding structure was consistent; holds the original text.
    Valid(String),
    /// Padding structure was inconsistent; holds a best-effort rendering.
    Corrupt(String),
}

impl Unpadded {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// The recovered text, whether or not the padding checked out.
    pub fn text(&self) -> &str {
        match self {
            Self::Valid(text) | Self::Corrupt(text) => text,
        }
    }

    /// The original text, only if the padding was valid.
    pub fn into_valid(self) -> Option<String> {
        match self {
            Self::Valid(text) => Some(text),
            Self::Corrupt(_) => None,
        }
    }
}

/// Pad `text` with [`DEFAULT_DELIMITER`] to a multiple of `block_size` bytes.
pub fn pad(text: &str, block_size: usize) -> SealformResult<Vec<u8>> {
    pad_with_delimiter(text, block_size, DEFAULT_DELIMITER)
}

/// Pad `text` to a multiple of `block_size` bytes using a custom delimiter.
///
/// A full filler block is appended when the text plus delimiter is already
/// aligned, so the result is never ambiguous.
pub fn pad_with_delimiter(text: &str, block_size: usize, delimiter: char) -> SealformResult<Vec<u8>> {
    if block_size == 0 || block_size > MAX_BLOCK_SIZE {
        return Err(SealformError::malformed(format!(
            "padding block size {block_size} outside 1..={MAX_BLOCK_SIZE}"
        )));
    }

    let mut delim_buf = [0u8; 4];
    let delim = delimiter.encode_utf8(&mut delim_buf).as_bytes();

    let used = text.len() + delim.len();
    let filler = block_size - used % block_size;

    let mut padded = Vec::with_capacity(used + filler);
    padded.extend_from_slice(text.as_bytes());
    padded.extend_from_slice(delim);
    padded.resize(used + filler, filler as u8);
    Ok(padded)
}

/// Strip the padding added by [`pad_with_delimiter`].
///
/// Never fails: an inconsistent structure yields [`Unpadded::Corrupt`] with
/// whatever text could be salvaged.
pub fn unpad(bytes: &[u8], delimiter: char) -> Unpadded {
    let mut delim_buf = [0u8; 4];
    let delim = delimiter.encode_utf8(&mut delim_buf).as_bytes();

    let Some(&last) = bytes.last() else {
        return Unpadded::Corrupt(String::new());
    };

    let filler = last as usize;
    if filler == 0 || filler > bytes.len() {
        return Unpadded::Corrupt(best_effort(bytes, delim));
    }

    let (body, tail) = bytes.split_at(bytes.len() - filler);
    if tail.iter().any(|&b| b != last) {
        return Unpadded::Corrupt(best_effort(bytes, delim));
    }

    let Some(text) = body.strip_suffix(delim) else {
        return Unpadded::Corrupt(best_effort(bytes, delim));
    };

    match std::str::from_utf8(text) {
        Ok(text) => Unpadded::Valid(text.to_owned()),
        Err(_) => Unpadded::Corrupt(String::from_utf8_lossy(text).into_owned()),
    }
}

/// Everything before the last delimiter if there is one, else the whole buffer.
fn best_effort(bytes: &[u8], delim: &[u8]) -> String {
    let cut = bytes
        .windows(delim.len())
        .rposition(|w| w == delim)
        .unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..cut]).into_owned()
}
