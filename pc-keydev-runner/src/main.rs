use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use keydev_host_state::default_state_dir;
use pc_keydev_runner::{parse_wrap_key, Device};
use zeroize::Zeroizing;

#[derive(Parser, Debug)]
#[command(about, version, author)]
struct Args {
    /// Directory holding the key slots and the device channel key
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show which slot holds the device key
    Status,
    /// Generate a new plaintext device key
    Provision {
        /// Replace existing key material
        #[arg(long)]
        force: bool,
    },
    /// Wrap the device key under a 32-byte hex wrap key
    Enable {
        #[arg(long, value_parser = parse_wrap_key)]
        wrap_key: Zeroizing<[u8; 32]>,
    },
    /// Store the device key in the clear again
    Disable {
        #[arg(long, value_parser = parse_wrap_key)]
        wrap_key: Zeroizing<[u8; 32]>,
    },
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    let args = Args::parse();
    let state_dir = args.state_dir.unwrap_or_else(default_state_dir);
    log::info!("Using state directory {}", state_dir.display());

    let mut device = Device::open(&state_dir)?;
    match args.command {
        Command::Status => {}
        Command::Provision { force } => device.provision(force)?,
        Command::Enable { wrap_key } => device.enable(wrap_key.as_slice())?,
        Command::Disable { wrap_key } => device.disable(wrap_key.as_slice())?,
    }

    let status = device.status()?;
    println!(
        "{} (plaintext slot: {} bytes, encrypted slot: {} bytes)",
        status.protection(),
        status.plaintext_len,
        status.encrypted_len
    );
    Ok(())
}
