//! Persistent slots holding the device key.

use std::collections::HashMap;

use thiserror::Error;
use zeroize::Zeroize;

/// The two storage locations the device key can live in.  At rest at most
/// one of them holds data.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SlotId {
    /// Raw device key.
    DeviceKey,
    /// `nonce || ciphertext || tag` of the wrapped device key.
    DeviceKeyEncrypted,
}

impl SlotId {
    pub const ALL: [SlotId; 2] = [SlotId::DeviceKey, SlotId::DeviceKeyEncrypted];

    pub const fn file_name(self) -> &'static str {
        match self {
            SlotId::DeviceKey => "keydev.bin",
            SlotId::DeviceKeyEncrypted => "keydev.enc",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("slot {0:?} is unavailable")]
    Unavailable(SlotId),
    #[error("slot I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Blob store backing the key slots.
///
/// Writes may be buffered by the implementation; `commit` makes every write
/// issued so far durable.
pub trait SlotStore {
    fn has_data(&self, slot: SlotId) -> Result<bool, StoreError>;

    fn read(&self, slot: SlotId) -> Result<Vec<u8>, StoreError>;

    fn write(&mut self, slot: SlotId, data: &[u8]) -> Result<(), StoreError>;

    fn truncate(&mut self, slot: SlotId) -> Result<(), StoreError> {
        self.write(slot, &[])
    }

    fn commit(&mut self) -> Result<(), StoreError>;
}

/// One mutation observed by a [`RamSlotStore`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StoreOp {
    Write { slot: SlotId, len: usize },
    Truncate { slot: SlotId },
    Commit,
}

/// Volatile slot store.  Every mutation is recorded in a journal so callers
/// can check the order in which slots were touched.
#[derive(Debug, Default)]
pub struct RamSlotStore {
    slots: HashMap<SlotId, Vec<u8>>,
    journal: Vec<StoreOp>,
    fail_writes: bool,
}

impl RamSlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slot(mut self, slot: SlotId, data: &[u8]) -> Self {
        self.slots.insert(slot, data.to_vec());
        self
    }

    pub fn slot(&self, slot: SlotId) -> &[u8] {
        self.slots.get(&slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn journal(&self) -> &[StoreOp] {
        &self.journal
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    fn replace(&mut self, slot: SlotId, data: &[u8]) {
        let entry = self.slots.entry(slot).or_default();
        // Wipe the whole allocation so no copy of a previous key survives.
        entry.zeroize();
        entry.extend_from_slice(data);
    }
}

impl SlotStore for RamSlotStore {
    fn has_data(&self, slot: SlotId) -> Result<bool, StoreError> {
        Ok(!self.slot(slot).is_empty())
    }

    fn read(&self, slot: SlotId) -> Result<Vec<u8>, StoreError> {
        Ok(self.slot(slot).to_vec())
    }

    fn write(&mut self, slot: SlotId, data: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Unavailable(slot));
        }
        self.journal.push(StoreOp::Write {
            slot,
            len: data.len(),
        });
        self.replace(slot, data);
        Ok(())
    }

    fn truncate(&mut self, slot: SlotId) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Unavailable(slot));
        }
        self.journal.push(StoreOp::Truncate { slot });
        self.replace(slot, &[]);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.journal.push(StoreOp::Commit);
        Ok(())
    }
}
