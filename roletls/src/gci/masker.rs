//! Obfuscation of message bodies so unverified bytes cannot be consumed by
//! accident.
//!
//! The 32-byte mask travels alongside the sealed body, so this adds no
//! secrecy. What it guarantees is that nothing can read a payload out of a
//! captured or half-handled message without going through the verifier,
//! which is the only place that unmasks.

use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::{Nonce, XSalsa20Poly1305};
use rand::RngCore;

use crate::error::Error;

/// Byte length of a mask key.
pub const MASK_LEN: usize = 32;

/// Byte length of the XSalsa20-Poly1305 nonce prefixed to the sealed form.
const NONCE_LEN: usize = 24;

/// Seal `data` under `mask`. The output is `nonce || ciphertext+tag`.
pub fn mask(mask: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    let cipher = XSalsa20Poly1305::new_from_slice(mask).map_err(|_| Error::Mask)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from(nonce_bytes);

    let sealed = cipher.encrypt(&nonce, data).map_err(|_| Error::Mask)?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open a sealed body produced by [`mask`]. Fails on a wrong-length key,
/// truncated input, or any tampering with the sealed bytes.
pub fn unmask(mask: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    let cipher = XSalsa20Poly1305::new_from_slice(mask).map_err(|_| Error::Mask)?;

    if data.len() < NONCE_LEN {
        return Err(Error::Mask);
    }
    let (nonce, sealed) = data.split_at(NONCE_LEN);

    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| Error::Mask)
}
