//! Secure channel between platform and authenticator.
//!
//! Negotiation runs ECDH on P-256 and feeds the shared secret through
//! HKDF-SHA256 to obtain an AES-256-GCM session key.  Messages on the channel
//! are `nonce(12) || ciphertext || tag(16)` without associated data.  Besides
//! the decrypt primitive the channel may hold a device key that an earlier
//! exchange unlocked; the config command consumes it when protection is
//! disabled.

use core::fmt;

#[allow(deprecated)]
use aes_gcm::aead::{generic_array::GenericArray, Aead, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use hkdf::Hkdf;
use p256::{ecdh::diffie_hellman, PublicKey, SecretKey};
use rand_core::{CryptoRng, RngCore};
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::key_wrap::DeviceKey;

pub const SESSION_KEY_LEN: usize = 32;
pub const ENVELOPE_NONCE_LEN: usize = 12;
pub const ENVELOPE_TAG_LEN: usize = 16;

const SESSION_INFO: &[u8] = b"keydev-channel v1";

#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum ChannelError {
    #[error("no session has been negotiated")]
    NotNegotiated,
    #[error("envelope is too short")]
    InvalidEnvelope,
    #[error("session key derivation failed")]
    KeyDerivation,
    #[error("envelope failed authentication")]
    Decrypt,
    #[error("envelope encryption failed")]
    Encrypt,
}

/// What the config command needs from the secure channel.
pub trait SecureChannel {
    fn is_negotiated(&self) -> bool;

    /// Open an envelope sealed by the peer under the session key.
    fn decrypt(&self, envelope: &[u8]) -> Result<Zeroizing<Vec<u8>>, ChannelError>;

    /// Plaintext device key unlocked earlier in the session, if any.
    fn cached_device_key(&self) -> Option<&DeviceKey>;

    fn clear_cached_device_key(&mut self);
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    fn cipher(&self) -> Result<Aes256Gcm, ChannelError> {
        Aes256Gcm::new_from_slice(&self.0).map_err(|_| ChannelError::KeyDerivation)
    }
}

/// Channel state owned by whoever drives the command loop and passed to each
/// command that needs it.
#[derive(Default)]
pub struct ChannelSession {
    session_key: Option<SessionKey>,
    cached_device_key: Option<DeviceKey>,
}

impl ChannelSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session whose key was agreed out of band.
    pub fn with_session_key(key: [u8; SESSION_KEY_LEN]) -> Self {
        Self {
            session_key: Some(SessionKey(key)),
            cached_device_key: None,
        }
    }

    /// Agree a session key with the peer.  Both sides run this with their own
    /// secret and the other side's public key and end up with the same key.
    pub fn negotiate(&mut self, local: &SecretKey, peer: &PublicKey) -> Result<(), ChannelError> {
        let shared = diffie_hellman(local.to_nonzero_scalar(), peer.as_affine());
        let hkdf = Hkdf::<Sha256>::new(None, shared.raw_secret_bytes());
        let mut key = SessionKey([0; SESSION_KEY_LEN]);
        hkdf.expand(SESSION_INFO, &mut key.0)
            .map_err(|_| ChannelError::KeyDerivation)?;
        self.session_key = Some(key);
        log::debug!("secure channel negotiated");
        Ok(())
    }

    /// Seal `plaintext` for the peer.
    #[allow(deprecated)]
    pub fn seal<R: RngCore + CryptoRng>(
        &self,
        plaintext: &[u8],
        rng: &mut R,
    ) -> Result<Vec<u8>, ChannelError> {
        let key = self.session_key.as_ref().ok_or(ChannelError::NotNegotiated)?;
        let mut nonce = [0u8; ENVELOPE_NONCE_LEN];
        rng.fill_bytes(&mut nonce);
        let ciphertext = key
            .cipher()?
            .encrypt(
                GenericArray::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &[],
                },
            )
            .map_err(|_| ChannelError::Encrypt)?;

        let mut out = Vec::with_capacity(ENVELOPE_NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn cache_device_key(&mut self, key: DeviceKey) {
        self.cached_device_key = Some(key);
    }

    /// Forget the session key and any cached device key.
    pub fn reset(&mut self) {
        self.session_key = None;
        self.cached_device_key = None;
    }
}

impl SecureChannel for ChannelSession {
    fn is_negotiated(&self) -> bool {
        self.session_key.is_some()
    }

    #[allow(deprecated)]
    fn decrypt(&self, envelope: &[u8]) -> Result<Zeroizing<Vec<u8>>, ChannelError> {
        let key = self.session_key.as_ref().ok_or(ChannelError::NotNegotiated)?;
        if envelope.len() < ENVELOPE_NONCE_LEN + ENVELOPE_TAG_LEN {
            return Err(ChannelError::InvalidEnvelope);
        }
        let (nonce, ciphertext) = envelope.split_at(ENVELOPE_NONCE_LEN);
        key.cipher()?
            .decrypt(
                GenericArray::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &[],
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| ChannelError::Decrypt)
    }

    fn cached_device_key(&self) -> Option<&DeviceKey> {
        self.cached_device_key.as_ref()
    }

    fn clear_cached_device_key(&mut self) {
        // Dropping the key wipes it.
        self.cached_device_key = None;
    }
}

impl fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSession")
            .field("negotiated", &self.session_key.is_some())
            .field("device_key_cached", &self.cached_device_key.is_some())
            .finish()
    }
}
