//! Payload masking (RFC 6455 Section 5.3).
//!
//! Masking is a byte-wise XOR with a 4-byte key, so applying the same key
//! twice restores the input.

use crate::error::{Error, Result};

/// XOR `data` in place with `mask[i % 4]`.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Same result as [`apply_mask`], processing four bytes per step.
#[inline]
pub fn apply_mask_fast(data: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);
    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let val = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ mask_u32;
        chunk.copy_from_slice(&val.to_ne_bytes());
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i];
    }
}

/// Draw a fresh masking key from the operating system's RNG.
///
/// # Errors
///
/// Returns [`Error::Io`] if no entropy is available.
pub fn generate_mask() -> Result<[u8; 4]> {
    let mut mask = [0u8; 4];
    getrandom::getrandom(&mut mask).map_err(|e| Error::Io(format!("mask generation: {e}")))?;
    Ok(mask)
}
