//! Bootloader check command implementation

use crate::commands::expand_tilde;
use indicatif::{ProgressBar, ProgressStyle};
use kflash_core::{resolve, Registry, Scanner};
use kflash_flash::{BootloaderProbe, BootloaderSupport, CancelToken, CommandRunner, SysfsResolver};
use std::time::Duration;

/// Probe one registered device for Katapult support and report the verdict.
pub fn cmd_check(
    registry: &Registry,
    scanner: &Scanner,
    runner: &dyn CommandRunner,
    cancel: CancelToken,
    key: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = registry.load()?;
    let entry = data.device(key)?.clone();
    let devices = scanner.scan();
    let entries: Vec<_> = data.devices.values().cloned().collect();
    let matches = resolve(&devices, &entries);

    if let Some(dup) = matches.duplicate_for(key) {
        eprintln!("Pattern {} matches several devices:", entry.serial_pattern);
        for d in &dup.devices {
            eprintln!("  {}", d.filename);
        }
        return Err("ambiguous match, refusing to probe".into());
    }
    let matched = matches
        .unique_for(key)
        .ok_or_else(|| format!("device not attached: {}", key))?;

    println!("Probing {} ({})", entry.name, matched.device.path.display());
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));

    let katapult_dir = expand_tilde(&data.global_config.katapult_dir);
    let resolver = SysfsResolver;
    let probe = BootloaderProbe::new(runner, &resolver, scanner).with_cancel(cancel);
    let result = probe.check(
        &katapult_dir,
        &matched.device.path,
        &entry.serial_pattern,
        &mut |msg| spinner.set_message(msg.to_string()),
    );
    spinner.finish_and_clear();

    match result.support {
        BootloaderSupport::Present => {
            println!("Katapult bootloader: present ({:.1?})", result.elapsed)
        }
        BootloaderSupport::Absent => {
            println!("Katapult bootloader: absent ({:.1?})", result.elapsed)
        }
        BootloaderSupport::Unknown => {
            println!("Katapult bootloader: unknown ({:.1?})", result.elapsed)
        }
    }
    if let Some(detail) = &result.detail {
        println!("  {}", detail);
    }
    Ok(())
}
