//! authenticatorConfig (0x0D) with the vendor key-protection subcommand.
//!
//! Under the vendor prototype subcommand the device key can be moved between
//! the plaintext slot and the encrypted slot:
//!
//! * ENABLE wraps the plaintext key with a wrap key the platform sends over
//!   the secure channel, stores the wrapped blob and clears the plaintext
//!   slot.
//! * DISABLE writes back the plaintext key that the secure channel unlocked
//!   earlier and clears the encrypted slot.
//!
//! In both directions the new slot is written before the old one is cleared
//! and the store is committed last.

use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::{
    cbor::{encode_empty_map, ok_response, Field, FieldType, OrderedMap},
    channel::{ChannelSession, SecureChannel},
    key_wrap::{wrap_device_key, WrapKey},
    status::{Ctap2Error, Result},
    store::{SlotId, SlotStore, StoreError},
};

pub const AUTHENTICATOR_CONFIG: u8 = 0x0D;

/// `vendorPrototype` subcommand of authenticatorConfig.
pub const VENDOR_PROTOTYPE: u64 = 0xFF;
pub const ENABLE_KEY_PROTECTION: u64 = 0x03e4_3f56_b342_85e2;
pub const DISABLE_KEY_PROTECTION: u64 = 0x1831_a40f_04a2_5ed9;

mod keys {
    pub const SUBCOMMAND: u64 = 0x01;
    pub const SUBCOMMAND_PARAMS: u64 = 0x02;
    pub const PIN_UV_AUTH_PROTOCOL: u64 = 0x03;
    pub const PIN_UV_AUTH_PARAM: u64 = 0x04;

    pub const VENDOR_COMMAND_ID: u64 = 0x01;
    pub const VENDOR_AUTH_CIPHERTEXT: u64 = 0x02;
}

const REQUEST_FIELDS: &[Field] = &[
    Field::required(keys::SUBCOMMAND, FieldType::Uint),
    Field::optional(keys::SUBCOMMAND_PARAMS, FieldType::Map),
    Field::optional(keys::PIN_UV_AUTH_PROTOCOL, FieldType::Uint),
    Field::optional(keys::PIN_UV_AUTH_PARAM, FieldType::Bytes),
];

const VENDOR_PARAM_FIELDS: &[Field] = &[
    Field::optional(keys::VENDOR_COMMAND_ID, FieldType::Uint),
    Field::optional(keys::VENDOR_AUTH_CIPHERTEXT, FieldType::Bytes),
];

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VendorCommand {
    EnableKeyProtection,
    DisableKeyProtection,
}

impl TryFrom<u64> for VendorCommand {
    type Error = Ctap2Error;

    fn try_from(value: u64) -> Result<Self> {
        match value {
            ENABLE_KEY_PROTECTION => Ok(Self::EnableKeyProtection),
            DISABLE_KEY_PROTECTION => Ok(Self::DisableKeyProtection),
            _ => Err(Ctap2Error::InvalidSubcommand),
        }
    }
}

/// Decoded authenticatorConfig parameters.
///
/// `vendor_command_id` and `vendor_auth_ciphertext` are only read from
/// `subCommandParams` when `subcommand` is [`VENDOR_PROTOTYPE`]; for other
/// subcommands they keep their defaults.
#[derive(Debug)]
pub struct ConfigRequest {
    pub subcommand: u64,
    pub vendor_command_id: u64,
    pub vendor_auth_ciphertext: Zeroizing<Vec<u8>>,
    pub pin_uv_auth_protocol: Option<u64>,
    pub pin_uv_auth_param: Option<Vec<u8>>,
}

impl ConfigRequest {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut map = OrderedMap::from_bytes(payload, REQUEST_FIELDS)?;
        let subcommand = map
            .uint(keys::SUBCOMMAND)?
            .ok_or(Ctap2Error::MissingParameter)?;

        let mut request = Self {
            subcommand,
            vendor_command_id: 0,
            vendor_auth_ciphertext: Zeroizing::new(Vec::new()),
            pin_uv_auth_protocol: map.uint(keys::PIN_UV_AUTH_PROTOCOL)?,
            pin_uv_auth_param: map.take_bytes(keys::PIN_UV_AUTH_PARAM)?,
        };

        if let Some(params) = map.take(keys::SUBCOMMAND_PARAMS) {
            if subcommand == VENDOR_PROTOTYPE {
                let mut params = OrderedMap::from_value(params, VENDOR_PARAM_FIELDS)?;
                request.vendor_command_id = params.uint(keys::VENDOR_COMMAND_ID)?.unwrap_or(0);
                if let Some(ciphertext) = params.take_bytes(keys::VENDOR_AUTH_CIPHERTEXT)? {
                    request.vendor_auth_ciphertext = Zeroizing::new(ciphertext);
                }
            } else {
                log::debug!("subCommandParams ignored for subcommand {subcommand:#x}");
            }
        }

        Ok(request)
    }
}

fn storage_failure(err: StoreError) -> Ctap2Error {
    log::error!("key slot storage failed: {err}");
    Ctap2Error::Processing
}

/// Handle an authenticatorConfig payload (the CBOR map after the command
/// byte).  Returns the encoded response body.
pub fn authenticator_config<S, C, R>(
    payload: &[u8],
    store: &mut S,
    channel: &mut C,
    rng: &mut R,
) -> Result<Vec<u8>>
where
    S: SlotStore,
    C: SecureChannel,
    R: RngCore + CryptoRng,
{
    let request = ConfigRequest::decode(payload)?;
    log::debug!(
        "authenticatorConfig subcommand={:#x} vendor_command={:#x}",
        request.subcommand,
        request.vendor_command_id
    );

    if request.subcommand != VENDOR_PROTOTYPE {
        return Err(Ctap2Error::UnsupportedOption);
    }

    match VendorCommand::try_from(request.vendor_command_id)? {
        VendorCommand::DisableKeyProtection => disable_key_protection(store, channel)?,
        VendorCommand::EnableKeyProtection => {
            enable_key_protection(store, channel, &request.vendor_auth_ciphertext, rng)?
        }
    }

    encode_empty_map()
}

/// Move the device key from the plaintext slot into the encrypted slot.
pub fn enable_key_protection<S, C, R>(
    store: &mut S,
    channel: &C,
    auth_ciphertext: &[u8],
    rng: &mut R,
) -> Result<()>
where
    S: SlotStore,
    C: SecureChannel,
    R: RngCore + CryptoRng,
{
    if !store.has_data(SlotId::DeviceKey).map_err(storage_failure)? {
        log::warn!("enable refused: no plaintext device key");
        return Err(Ctap2Error::NotAllowed);
    }
    if !channel.is_negotiated() {
        log::warn!("enable refused: secure channel not negotiated");
        return Err(Ctap2Error::NotAllowed);
    }

    let wrap_key = {
        let raw = channel.decrypt(auth_ciphertext).map_err(|err| {
            log::warn!("wrap key rejected: {err}");
            Ctap2Error::InvalidParameter
        })?;
        WrapKey::from_slice(&raw).map_err(|_| Ctap2Error::InvalidParameter)?
    };

    let device_key = Zeroizing::new(store.read(SlotId::DeviceKey).map_err(storage_failure)?);
    let wrapped = wrap_device_key(&wrap_key, &device_key, rng).map_err(|err| {
        log::warn!("device key wrap failed: {err}");
        Ctap2Error::InvalidParameter
    })?;
    drop(wrap_key);

    store
        .write(SlotId::DeviceKeyEncrypted, &wrapped)
        .map_err(storage_failure)?;
    store
        .write(SlotId::DeviceKey, &vec![0u8; device_key.len()])
        .map_err(storage_failure)?;
    store.truncate(SlotId::DeviceKey).map_err(storage_failure)?;
    store.commit().map_err(storage_failure)?;

    log::info!("device key protection enabled");
    Ok(())
}

/// Restore the plaintext device key from the secure channel's cache and drop
/// the encrypted copy.
pub fn disable_key_protection<S, C>(store: &mut S, channel: &mut C) -> Result<()>
where
    S: SlotStore,
    C: SecureChannel,
{
    if !store
        .has_data(SlotId::DeviceKeyEncrypted)
        .map_err(storage_failure)?
    {
        log::warn!("disable refused: no encrypted device key");
        return Err(Ctap2Error::NotAllowed);
    }
    let Some(device_key) = channel.cached_device_key() else {
        log::warn!("disable refused: secure channel holds no device key");
        return Err(Ctap2Error::PinAuthInvalid);
    };

    let restored = store.write(SlotId::DeviceKey, device_key.as_bytes());
    channel.clear_cached_device_key();
    restored.map_err(storage_failure)?;

    store
        .truncate(SlotId::DeviceKeyEncrypted)
        .map_err(storage_failure)?;
    store.commit().map_err(storage_failure)?;

    log::info!("device key protection disabled");
    Ok(())
}

/// Command entry point for a transport: requests are `command || cbor` and
/// responses are `status || body`.
pub struct ConfigApp<S, R, C = ChannelSession> {
    store: S,
    channel: C,
    rng: R,
}

impl<S, R> ConfigApp<S, R, ChannelSession> {
    pub fn new(store: S, rng: R) -> Self {
        Self::with_channel(store, ChannelSession::new(), rng)
    }
}

impl<S, R, C> ConfigApp<S, R, C> {
    pub fn with_channel(store: S, channel: C, rng: R) -> Self {
        Self {
            store,
            channel,
            rng,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }
}

impl<S, R, C> ConfigApp<S, R, C>
where
    S: SlotStore,
    C: SecureChannel,
    R: RngCore + CryptoRng,
{
    pub fn call(&mut self, request: &[u8]) -> Vec<u8> {
        let Some((&command, payload)) = request.split_first() else {
            return vec![Ctap2Error::InvalidLength.status()];
        };

        let result = match command {
            AUTHENTICATOR_CONFIG => {
                authenticator_config(payload, &mut self.store, &mut self.channel, &mut self.rng)
            }
            _ => Err(Ctap2Error::InvalidCommand),
        };

        match result {
            Ok(body) => ok_response(&body),
            Err(err) => {
                log::debug!("command {command:#04x} failed: {err}");
                vec![err.status()]
            }
        }
    }
}

#[cfg(test)]
mod tests;
