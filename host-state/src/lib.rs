//! Device key slots backed by files in a host state directory.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    os::unix::fs::{FileExt, OpenOptionsExt, PermissionsExt},
    path::{Path, PathBuf},
};

use keydev_authenticator::store::{SlotId, SlotStore, StoreError};

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

pub fn default_state_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_DATA_HOME") {
        PathBuf::from(dir).join("keydev-authenticator")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".local/share/keydev-authenticator")
    } else {
        PathBuf::from("./keydev-authenticator")
    }
}

fn ensure_permissions(path: &Path, mode: u32) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(mode);
    fs::set_permissions(path, permissions)
}

pub fn ensure_state_dir(path: &Path) -> io::Result<()> {
    if path.exists() {
        if !path.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "state path exists but is not a directory",
            ));
        }
    } else {
        fs::create_dir_all(path)?;
    }
    ensure_permissions(path, DIR_MODE)
}

fn write_exact_at(file: &File, mut offset: u64, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        let written = file.write_at(data, offset)?;
        if written == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short write"));
        }
        offset += written as u64;
        data = &data[written..];
    }
    Ok(())
}

/// Read `name` from `dir`, creating it with `len` fresh bytes from `fill`
/// the first time.
pub fn load_or_create_secret(
    dir: &Path,
    name: &str,
    len: usize,
    fill: impl FnOnce(&mut [u8]),
) -> io::Result<Vec<u8>> {
    let path = dir.join(name);
    if path.exists() {
        let mut secret = Vec::with_capacity(len);
        File::open(&path)?.read_to_end(&mut secret)?;
        if secret.len() != len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} has {} bytes, expected {len}", path.display(), secret.len()),
            ));
        }
        Ok(secret)
    } else {
        let mut secret = vec![0u8; len];
        fill(&mut secret);
        let mut options = OpenOptions::new();
        options.create_new(true).write(true).mode(FILE_MODE);
        let mut file = options.open(&path)?;
        file.write_all(&secret)?;
        file.sync_data()?;
        log::info!("created {}", path.display());
        Ok(secret)
    }
}

/// One file per slot inside the state directory.
///
/// Writes go straight to the slot file and are synced before returning, so
/// a slot is durable before the next one is touched.  Non-empty writes
/// overwrite the existing bytes in place before the file is cut to the new
/// length.  A write that creates the slot file also syncs the directory, so
/// the new entry survives a power loss before the old slot is cleared.
#[derive(Debug)]
pub struct FileSlotStore {
    dir: PathBuf,
    dir_syncs: u64,
}

impl FileSlotStore {
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        ensure_state_dir(&dir)?;
        Ok(Self { dir, dir_syncs: 0 })
    }

    /// Number of directory syncs issued so far.
    pub fn dir_syncs(&self) -> u64 {
        self.dir_syncs
    }

    fn sync_dir(&mut self) -> io::Result<()> {
        File::open(&self.dir)?.sync_all()?;
        self.dir_syncs += 1;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn slot_path(&self, slot: SlotId) -> PathBuf {
        self.dir.join(slot.file_name())
    }
}

impl SlotStore for FileSlotStore {
    fn has_data(&self, slot: SlotId) -> Result<bool, StoreError> {
        match fs::metadata(self.slot_path(slot)) {
            Ok(metadata) => Ok(metadata.len() > 0),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn read(&self, slot: SlotId) -> Result<Vec<u8>, StoreError> {
        match fs::read(self.slot_path(slot)) {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&mut self, slot: SlotId, data: &[u8]) -> Result<(), StoreError> {
        let path = self.slot_path(slot);
        let created = !path.exists();
        let mut options = OpenOptions::new();
        options.write(true).create(true).mode(FILE_MODE);
        let file = options.open(&path)?;
        write_exact_at(&file, 0, data)?;
        file.set_len(data.len() as u64)?;
        file.sync_data()?;
        if created {
            self.sync_dir()?;
        }
        log::debug!("wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.sync_dir()?;
        Ok(())
    }
}
