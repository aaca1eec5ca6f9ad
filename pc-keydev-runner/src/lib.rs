//! Host-side driver for device key protection.
//!
//! A [`Device`] is an authenticatorConfig app running on a state directory.
//! The driver also plays the platform: it negotiates a fresh secure channel
//! for every command, seals the wrap key for the device and builds the CBOR
//! request the way a client would.

use std::{fmt, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use ciborium::value::{Integer, Value};
use keydev_authenticator::{
    cbor::{encode_value, int_map},
    key_wrap::{unwrap_device_key, WRAPPED_KEY_LEN},
    ChannelSession, ConfigApp, Ctap2Error, DeviceKey, SecureChannel, SlotId, SlotStore, WrapKey,
    AUTHENTICATOR_CONFIG, CTAP2_OK, DISABLE_KEY_PROTECTION, ENABLE_KEY_PROTECTION,
    VENDOR_PROTOTYPE,
};
use keydev_host_state::{load_or_create_secret, FileSlotStore};
use p256::SecretKey;
use rand_core::{OsRng, RngCore};
use zeroize::Zeroizing;

pub const CHANNEL_KEY_FILE: &str = "channel.key";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Protection {
    Unprovisioned,
    Plaintext,
    Encrypted,
    /// Both slots hold data; the last transition did not complete.
    Inconsistent,
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Protection::Unprovisioned => "no device key",
            Protection::Plaintext => "device key stored in the clear",
            Protection::Encrypted => "device key protected",
            Protection::Inconsistent => "both slots hold data",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SlotStatus {
    pub plaintext_len: usize,
    pub encrypted_len: usize,
}

impl SlotStatus {
    pub fn protection(&self) -> Protection {
        match (self.plaintext_len > 0, self.encrypted_len > 0) {
            (false, false) => Protection::Unprovisioned,
            (true, false) => Protection::Plaintext,
            (false, true) => Protection::Encrypted,
            (true, true) => Protection::Inconsistent,
        }
    }
}

pub struct Device {
    app: ConfigApp<FileSlotStore, OsRng>,
    channel_secret: SecretKey,
}

impl Device {
    pub fn open(state_dir: &Path) -> Result<Self> {
        let store = FileSlotStore::open(state_dir)
            .with_context(|| format!("opening state directory {}", state_dir.display()))?;
        let channel_secret = load_channel_secret(store.dir())?;
        Ok(Self {
            app: ConfigApp::new(store, OsRng),
            channel_secret,
        })
    }

    pub fn status(&self) -> Result<SlotStatus> {
        let store = self.app.store();
        Ok(SlotStatus {
            plaintext_len: store.read(SlotId::DeviceKey)?.len(),
            encrypted_len: store.read(SlotId::DeviceKeyEncrypted)?.len(),
        })
    }

    /// Store a freshly generated plaintext device key.
    pub fn provision(&mut self, force: bool) -> Result<()> {
        let status = self.status()?;
        if status.protection() != Protection::Unprovisioned && !force {
            bail!("refusing to replace existing key material ({})", status.protection());
        }
        let key = DeviceKey::generate(&mut OsRng);
        let store = self.app.store_mut();
        store.write(SlotId::DeviceKey, key.as_bytes())?;
        store.truncate(SlotId::DeviceKeyEncrypted)?;
        store.commit()?;
        log::info!("provisioned new device key");
        Ok(())
    }

    pub fn enable(&mut self, wrap_key: &[u8]) -> Result<()> {
        let platform = self.connect()?;
        let sealed = platform.seal(wrap_key, &mut OsRng)?;
        let result = self.execute(ENABLE_KEY_PROTECTION, Some(sealed));
        self.app.channel_mut().reset();
        result
    }

    /// Unlock the encrypted key on the device with `wrap_key`, then ask it to
    /// store the key in the clear again.
    pub fn disable(&mut self, wrap_key: &[u8]) -> Result<()> {
        let platform = self.connect()?;
        let sealed = platform.seal(wrap_key, &mut OsRng)?;
        let result = self
            .unlock(&sealed)
            .and_then(|()| self.execute(DISABLE_KEY_PROTECTION, None));
        self.app.channel_mut().reset();
        result
    }

    /// Device side: open the sealed wrap key and cache the unwrapped device
    /// key in the channel session.
    fn unlock(&mut self, sealed: &[u8]) -> Result<()> {
        let blob = self.app.store().read(SlotId::DeviceKeyEncrypted)?;
        if blob.len() != WRAPPED_KEY_LEN {
            log::debug!("nothing to unlock ({} byte blob)", blob.len());
            return Ok(());
        }
        let channel = self.app.channel_mut();
        let wrap_key = channel.decrypt(sealed)?;
        let wrap_key = WrapKey::from_slice(&wrap_key)?;
        let device_key = unwrap_device_key(&wrap_key, &blob)
            .context("wrap key does not open the encrypted device key")?;
        channel.cache_device_key(device_key);
        Ok(())
    }

    /// Negotiate a new session between an ephemeral platform key and the
    /// device channel key.  Returns the platform half.
    fn connect(&mut self) -> Result<ChannelSession> {
        let platform_secret = SecretKey::random(&mut OsRng);
        let mut platform = ChannelSession::new();
        platform.negotiate(&platform_secret, &self.channel_secret.public_key())?;
        self.app
            .channel_mut()
            .negotiate(&self.channel_secret, &platform_secret.public_key())?;
        Ok(platform)
    }

    fn execute(&mut self, command_id: u64, auth_ciphertext: Option<Vec<u8>>) -> Result<()> {
        let request = vendor_request(command_id, auth_ciphertext)?;
        let response = self.app.call(&request);
        match response.split_first() {
            Some((&CTAP2_OK, _)) => Ok(()),
            Some((&status, _)) => Err(Ctap2Error::from_status(status)
                .map(anyhow::Error::from)
                .unwrap_or_else(|| anyhow!("unknown status {status:#04x}"))),
            None => Err(anyhow!("empty response")),
        }
    }
}

fn load_channel_secret(dir: &Path) -> Result<SecretKey> {
    let bytes = Zeroizing::new(load_or_create_secret(dir, CHANNEL_KEY_FILE, 32, |buf| {
        // Retry the (astronomically unlikely) draw outside the curve order.
        loop {
            OsRng.fill_bytes(buf);
            if SecretKey::from_slice(buf).is_ok() {
                break;
            }
        }
    })?);
    SecretKey::from_slice(&bytes).context("channel key is not a valid P-256 scalar")
}

/// `command || {1: vendorPrototype, 2: {1: command_id, 2: ciphertext}}`
pub fn vendor_request(command_id: u64, auth_ciphertext: Option<Vec<u8>>) -> Result<Vec<u8>> {
    let mut params = vec![(1, Value::Integer(Integer::from(command_id)))];
    if let Some(ciphertext) = auth_ciphertext {
        params.push((2, Value::Bytes(ciphertext)));
    }
    let map = int_map(vec![
        (1, Value::Integer(Integer::from(VENDOR_PROTOTYPE))),
        (2, int_map(params)),
    ]);
    let mut request = vec![AUTHENTICATOR_CONFIG];
    request.extend(encode_value(&map)?);
    Ok(request)
}

pub fn parse_wrap_key(input: &str) -> std::result::Result<Zeroizing<[u8; 32]>, String> {
    let decoded = Zeroizing::new(hex::decode(input.trim()).map_err(|err| err.to_string())?);
    if decoded.len() != 32 {
        return Err(format!("expected 32 bytes, got {}", decoded.len()));
    }
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&decoded);
    Ok(key)
}
