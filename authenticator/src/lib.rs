//! Device key protection for a FIDO2 authenticator.
//!
//! The device root key lives in one of two slots: in the clear, or wrapped
//! under a key the platform supplies over the secure channel.  The vendor
//! subcommand of authenticatorConfig moves it between the two.

pub mod cbor;
pub mod channel;
pub mod config;
pub mod key_wrap;
pub mod status;
pub mod store;

#[cfg(test)]
mod testing;

pub use channel::{ChannelError, ChannelSession, SecureChannel};
pub use config::{
    authenticator_config, ConfigApp, ConfigRequest, VendorCommand, AUTHENTICATOR_CONFIG,
    DISABLE_KEY_PROTECTION, ENABLE_KEY_PROTECTION, VENDOR_PROTOTYPE,
};
pub use key_wrap::{DeviceKey, KeyWrapError, WrapKey};
pub use status::{Ctap2Error, CTAP2_OK};
pub use store::{RamSlotStore, SlotId, SlotStore, StoreError};
