use anyhow::{Context, Result};
use pc_keydev_runner::Device;
use tempfile::TempDir;

pub const WRAP_KEY: [u8; 32] = [0x3C; 32];

pub struct TestDevice {
    pub dir: TempDir,
    pub device: Device,
}

impl TestDevice {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create state directory")?;
        let device = Device::open(dir.path())?;
        Ok(Self { dir, device })
    }

    pub fn reopen(&mut self) -> Result<()> {
        self.device = Device::open(self.dir.path())?;
        Ok(())
    }

    /// Contents of a file in the state directory, empty if it does not exist.
    pub fn slot(&self, name: &str) -> Vec<u8> {
        std::fs::read(self.dir.path().join(name)).unwrap_or_default()
    }
}
