//! SHA-512 → Whirlpool digest chain shared by the credential salts and
//! public-key fingerprints.

use sha2::{Digest, Sha512};
use whirlpool::Whirlpool;

/// Size of a Whirlpool digest in bytes
pub const DIGEST_SIZE: usize = 64;

/// Whirlpool over the raw SHA-512 digest of `data`.
pub fn sha512_whirlpool(data: &[u8]) -> [u8; DIGEST_SIZE] {
    let inner = Sha512::digest(data);
    let outer = Whirlpool::digest(inner);
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&outer);
    out
}
