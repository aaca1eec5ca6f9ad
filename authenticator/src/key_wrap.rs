//! At-rest wrapping of the device key.
//!
//! The wrapped form is `nonce(12) || ciphertext(32) || tag(16)`, produced by
//! ChaCha20-Poly1305 with no associated data.

use core::fmt;

#[allow(deprecated)]
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Key, Nonce, Tag,
};
use rand_core::{CryptoRng, RngCore};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const DEVICE_KEY_LEN: usize = 32;
pub const WRAP_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const WRAPPED_KEY_LEN: usize = NONCE_LEN + DEVICE_KEY_LEN + TAG_LEN;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum KeyWrapError {
    #[error("key material has the wrong length")]
    InvalidKeyLength,
    #[error("wrapped key blob must be {WRAPPED_KEY_LEN} bytes")]
    InvalidBlob,
    #[error("encryption failed")]
    Encrypt,
    #[error("wrapped key failed authentication")]
    Decrypt,
}

/// The device root key in the clear.  Wiped when dropped.
#[derive(Clone, Eq, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct DeviceKey([u8; DEVICE_KEY_LEN]);

impl DeviceKey {
    pub const fn from_bytes(bytes: [u8; DEVICE_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyWrapError> {
        let mut key = Self([0; DEVICE_KEY_LEN]);
        if bytes.len() != DEVICE_KEY_LEN {
            return Err(KeyWrapError::InvalidKeyLength);
        }
        key.0.copy_from_slice(bytes);
        Ok(key)
    }

    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut key = Self([0; DEVICE_KEY_LEN]);
        rng.fill_bytes(&mut key.0);
        key
    }

    pub fn as_bytes(&self) -> &[u8; DEVICE_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceKey(..)")
    }
}

/// Symmetric key that wraps the device key, handed over by the secure
/// channel.  Wiped when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct WrapKey([u8; WRAP_KEY_LEN]);

impl WrapKey {
    pub const fn from_bytes(bytes: [u8; WRAP_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyWrapError> {
        let mut key = Self([0; WRAP_KEY_LEN]);
        if bytes.len() != WRAP_KEY_LEN {
            return Err(KeyWrapError::InvalidKeyLength);
        }
        key.0.copy_from_slice(bytes);
        Ok(key)
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }
}

impl fmt::Debug for WrapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WrapKey(..)")
    }
}

/// Encrypt `device_key` under `wrap_key` with a fresh random nonce.
#[allow(deprecated)]
pub fn wrap_device_key<R: RngCore + CryptoRng>(
    wrap_key: &WrapKey,
    device_key: &[u8],
    rng: &mut R,
) -> Result<[u8; WRAPPED_KEY_LEN], KeyWrapError> {
    if device_key.len() != DEVICE_KEY_LEN {
        return Err(KeyWrapError::InvalidKeyLength);
    }

    // The body holds plaintext until encryption succeeds.
    let mut blob = Zeroizing::new([0u8; WRAPPED_KEY_LEN]);
    let (nonce, rest) = blob.split_at_mut(NONCE_LEN);
    let (body, tag_out) = rest.split_at_mut(DEVICE_KEY_LEN);
    rng.fill_bytes(nonce);
    body.copy_from_slice(device_key);

    let tag = wrap_key
        .cipher()
        .encrypt_in_place_detached(Nonce::from_slice(nonce), &[], body)
        .map_err(|_| KeyWrapError::Encrypt)?;
    tag_out.copy_from_slice(&tag);

    Ok(*blob)
}

/// Authenticate and decrypt a blob produced by [`wrap_device_key`].
#[allow(deprecated)]
pub fn unwrap_device_key(wrap_key: &WrapKey, blob: &[u8]) -> Result<DeviceKey, KeyWrapError> {
    if blob.len() != WRAPPED_KEY_LEN {
        return Err(KeyWrapError::InvalidBlob);
    }
    let (nonce, rest) = blob.split_at(NONCE_LEN);
    let (ciphertext, tag) = rest.split_at(DEVICE_KEY_LEN);

    let mut key = DeviceKey::from_slice(ciphertext)?;
    wrap_key
        .cipher()
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            &[],
            &mut key.0,
            Tag::from_slice(tag),
        )
        .map_err(|_| KeyWrapError::Decrypt)?;
    Ok(key)
}
