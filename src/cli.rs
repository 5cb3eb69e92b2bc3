//! CLI argument parsing

use clap::{Parser, Subcommand};
use kflash_core::discovery::SERIAL_BY_ID;
use std::path::PathBuf;

/// Parse a positive number of seconds.
fn parse_seconds(s: &str) -> Result<u64, String> {
    match s.parse::<u64>() {
        Ok(0) => Err("timeout must be at least 1 second".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("invalid number: {}", e)),
    }
}

#[derive(Parser)]
#[command(name = "kflash")]
#[command(author, version, about = "Registry-driven firmware flasher for Klipper MCUs", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Device registry file
    /// Defaults to ~/.config/kflash/devices.json
    #[arg(long, global = true)]
    pub registry: Option<PathBuf>,

    /// Serial device directory scanned for boards
    #[arg(long, global = true, hide = true, default_value = SERIAL_BY_ID)]
    pub serial_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flash options shared by `flash` and `flash-all`
#[derive(clap::Args, Debug, Clone)]
pub struct FlashOpts {
    /// Flash method override: katapult or make_flash
    #[arg(short, long)]
    pub method: Option<String>,

    /// Do not fall back to the other method on failure
    #[arg(long)]
    pub no_fallback: bool,

    /// Timeout per flash attempt, in seconds
    #[arg(long, default_value = "60", value_parser = parse_seconds)]
    pub timeout: u64,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered devices and their attachment status
    List,

    /// Register an attached device under a key
    Add {
        /// Registry key, e.g. "octopus-pro"
        key: String,

        /// Display name; defaults to the key
        #[arg(short, long)]
        name: Option<String>,

        /// Serial substring selecting the device when several
        /// unregistered boards are attached
        #[arg(short, long)]
        serial: Option<String>,
    },

    /// Remove a device from the registry
    Remove {
        /// Registry key
        key: String,
    },

    /// Probe a device for Katapult bootloader support
    Check {
        /// Registry key
        key: String,
    },

    /// Flash firmware to one device
    Flash {
        /// Registry key
        key: String,

        /// Firmware binary to flash
        #[arg(short, long)]
        firmware: PathBuf,

        /// Probe for Katapult first and pick the method from the verdict
        #[arg(long)]
        probe: bool,

        #[command(flatten)]
        opts: FlashOpts,
    },

    /// Flash every flashable device, one at a time
    FlashAll {
        /// Directory holding one <key>.bin per device
        #[arg(short = 'd', long)]
        firmware_dir: PathBuf,

        #[command(flatten)]
        opts: FlashOpts,
    },
}
