//! kflash - Registry-driven firmware flasher for Klipper MCUs
//!
//! Boards are registered once by their USB serial identity and from then on
//! addressed by key: `kflash flash octopus --firmware out/klipper.bin`. A
//! flash resolves the key against the attached devices, stops the Klipper
//! service, pushes the firmware through Katapult or `make flash`, waits for
//! the board to re-enumerate, and restarts the service no matter how the
//! flash went.

mod cli;
mod commands;
mod status;

use clap::Parser;
use cli::{Cli, Commands};
use kflash_core::Registry;
use kflash_core::Scanner;
use kflash_flash::{CancelToken, SystemRunner};
use status::NoStatus;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let registry = Registry::new(match cli.registry {
        Some(path) => path,
        None => default_registry_path(),
    });
    let scanner = Scanner::new(&cli.serial_dir);
    let runner = SystemRunner;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            log::warn!("interrupt received, finishing current step...");
            cancel.cancel();
        })?;
    }

    match cli.command {
        Commands::List => commands::list::cmd_list(&registry, &scanner),
        Commands::Add { key, name, serial } => commands::manage::cmd_add(
            &registry,
            &scanner,
            &key,
            name.as_deref(),
            serial.as_deref(),
        ),
        Commands::Remove { key } => commands::manage::cmd_remove(&registry, &key),
        Commands::Check { key } => {
            commands::check::cmd_check(&registry, &scanner, &runner, cancel, &key)
        }
        Commands::Flash {
            key,
            firmware,
            probe,
            opts,
        } => commands::flash::cmd_flash(
            &registry, &scanner, &runner, &NoStatus, cancel, &key, &firmware, probe, &opts,
        ),
        Commands::FlashAll { firmware_dir, opts } => commands::flash::cmd_flash_all(
            &registry,
            &scanner,
            &runner,
            &NoStatus,
            cancel,
            &firmware_dir,
            &opts,
        ),
    }
}

/// `~/.config/kflash/devices.json`, or the working directory as a last
/// resort on hosts with no config directory.
fn default_registry_path() -> PathBuf {
    match dirs::config_dir() {
        Some(dir) => dir.join("kflash").join("devices.json"),
        None => PathBuf::from("devices.json"),
    }
}
