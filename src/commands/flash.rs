//! Flash command implementations
//!
//! Both entry points share the same per-device pipeline: resolve the board,
//! flash it through the coordinator, then poll for it to reappear under its
//! registered identity. The Klipper service is stopped before the first
//! flash and restarted afterwards; `flash-all` keeps one guard across the
//! whole batch so the service does not bounce between boards.

use crate::cli::FlashOpts;
use crate::commands::expand_tilde;
use crate::status::StatusProvider;
use indicatif::{ProgressBar, ProgressStyle};
use kflash_core::{resolve, DeviceEntry, MatchResult, Registry, RegistryData, Scanner};
use kflash_flash::flasher::verify_firmware_path;
use kflash_flash::service::{KLIPPER_SERVICE, TIMEOUT_SERVICE};
use kflash_flash::verify::{VERIFY_INTERVAL, VERIFY_TIMEOUT};
use kflash_flash::{
    flash_device, verify_passwordless_sudo, wait_for_device, BootloaderProbe, BootloaderSupport,
    CancelToken, CommandRunner, FlashMethod, FlashRequest, ServiceGuard, SysfsResolver,
};
use std::path::Path;
use std::time::Duration;

type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Flash one registered device.
#[allow(clippy::too_many_arguments)]
pub fn cmd_flash(
    registry: &Registry,
    scanner: &Scanner,
    runner: &dyn CommandRunner,
    status: &dyn StatusProvider,
    cancel: CancelToken,
    key: &str,
    firmware: &Path,
    probe: bool,
    opts: &FlashOpts,
) -> CmdResult {
    let data = registry.load()?;
    let entry = data.device(key)?.clone();
    refuse_during_print(status)?;
    verify_firmware_path(firmware)?;

    let matched = resolve_one(scanner, &data, key)?;
    let mut method = opts
        .method
        .clone()
        .unwrap_or_else(|| data.flash_method_for(&entry).to_string());
    method.parse::<FlashMethod>()?;

    if probe {
        if let Some(probed) = probe_method(runner, scanner, &data, &entry, &matched, &cancel) {
            method = probed.to_string();
        }
    }

    warn_if_sudo_prompts(runner);
    log::info!("Stopping {} service", KLIPPER_SERVICE);
    let guard = ServiceGuard::stop(runner, KLIPPER_SERVICE, TIMEOUT_SERVICE)?;

    // Re-scan under the guard: entering bootloader mode during the probe
    // may have changed the device path.
    let outcome = resolve_one(scanner, &data, key).and_then(|matched| {
        flash_one(
            runner,
            scanner,
            &data,
            &entry,
            &matched.device.path,
            firmware,
            &method,
            opts,
            &cancel,
        )
    });

    if let Err(e) = guard.restart() {
        log::warn!("{}", e);
    }
    outcome.map(|report| println!("{}", report))
}

/// Flash every flashable device in registry order.
///
/// Firmware comes from `firmware_dir` as one `<key>.bin` per device, all
/// validated before the service is touched. One device failing never stops
/// the rest; the summary decides the exit status.
pub fn cmd_flash_all(
    registry: &Registry,
    scanner: &Scanner,
    runner: &dyn CommandRunner,
    status: &dyn StatusProvider,
    cancel: CancelToken,
    firmware_dir: &Path,
    opts: &FlashOpts,
) -> CmdResult {
    let data = registry.load()?;
    refuse_during_print(status)?;

    let entries: Vec<DeviceEntry> = data.flashable_devices().into_iter().cloned().collect();
    if entries.is_empty() {
        return Err("no flashable devices registered".into());
    }

    let mut firmware = Vec::with_capacity(entries.len());
    let mut missing = Vec::new();
    for entry in &entries {
        let path = firmware_dir.join(format!("{}.bin", entry.key));
        if path.exists() {
            firmware.push(path);
        } else {
            missing.push(path);
        }
    }
    if !missing.is_empty() {
        for path in &missing {
            eprintln!("missing firmware: {}", path.display());
        }
        return Err(format!("{} firmware file(s) missing, nothing flashed", missing.len()).into());
    }

    warn_if_sudo_prompts(runner);
    log::info!("Stopping {} service for {} devices", KLIPPER_SERVICE, entries.len());
    let guard = ServiceGuard::stop(runner, KLIPPER_SERVICE, TIMEOUT_SERVICE)?;

    let stagger = Duration::from_secs_f64(data.global_config.stagger_delay.max(0.0));
    let mut rows: Vec<(String, Result<String, String>)> = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        if cancel.is_cancelled() {
            rows.push((entry.key.clone(), Err("skipped (interrupted)".to_string())));
            continue;
        }
        if i > 0 {
            std::thread::sleep(stagger);
        }

        println!("[{}/{}] {}", i + 1, entries.len(), entry.name);
        // Fresh scan per device: the previous flash may have shuffled paths.
        let method = opts
            .method
            .clone()
            .unwrap_or_else(|| data.flash_method_for(entry).to_string());
        let outcome = resolve_one(scanner, &data, &entry.key).and_then(|matched| {
            flash_one(
                runner,
                scanner,
                &data,
                entry,
                &matched.device.path,
                &firmware[i],
                &method,
                opts,
                &cancel,
            )
        });
        rows.push((entry.key.clone(), outcome.map_err(|e| e.to_string())));
    }

    if let Err(e) = guard.restart() {
        log::warn!("{}", e);
    }

    println!();
    println!("Flash summary:");
    let mut failures = 0;
    for (key, outcome) in &rows {
        match outcome {
            Ok(report) => println!("  {:<16} ok    {}", key, report),
            Err(reason) => {
                failures += 1;
                println!("  {:<16} FAIL  {}", key, reason);
            }
        }
    }
    if failures > 0 {
        return Err(format!("{} of {} devices failed", failures, rows.len()).into());
    }
    Ok(())
}

fn refuse_during_print(status: &dyn StatusProvider) -> CmdResult {
    if let Some(state) = status.active_print() {
        return Err(format!("refusing to flash while a print is active: {}", state).into());
    }
    Ok(())
}

fn warn_if_sudo_prompts(runner: &dyn CommandRunner) {
    if !verify_passwordless_sudo(runner) {
        log::warn!("sudo may prompt for a password during service and USB operations");
    }
}

fn resolve_one(
    scanner: &Scanner,
    data: &RegistryData,
    key: &str,
) -> Result<kflash_core::UniqueMatch, Box<dyn std::error::Error>> {
    let devices = scanner.scan();
    let entries: Vec<_> = data.devices.values().cloned().collect();
    let matches: MatchResult = resolve(&devices, &entries);

    if let Some(dup) = matches.duplicate_for(key) {
        let names: Vec<_> = dup.devices.iter().map(|d| d.filename.clone()).collect();
        return Err(format!(
            "pattern {} matches several devices, refusing to flash: {}",
            dup.entry.serial_pattern,
            names.join(", "),
        )
        .into());
    }
    matches
        .unique_for(key)
        .cloned()
        .ok_or_else(|| format!("device not attached: {}", key).into())
}

/// Probe for Katapult and pick the method from a conclusive verdict.
/// `Unknown` keeps the configured method.
fn probe_method(
    runner: &dyn CommandRunner,
    scanner: &Scanner,
    data: &RegistryData,
    entry: &DeviceEntry,
    matched: &kflash_core::UniqueMatch,
    cancel: &CancelToken,
) -> Option<FlashMethod> {
    let katapult_dir = expand_tilde(&data.global_config.katapult_dir);
    let resolver = SysfsResolver;
    let probe = BootloaderProbe::new(runner, &resolver, scanner).with_cancel(cancel.clone());
    let spinner = spinner();
    let result = probe.check(
        &katapult_dir,
        &matched.device.path,
        &entry.serial_pattern,
        &mut |msg| spinner.set_message(msg.to_string()),
    );
    spinner.finish_and_clear();

    match result.support {
        BootloaderSupport::Present => Some(FlashMethod::Katapult),
        BootloaderSupport::Absent => Some(FlashMethod::MakeFlash),
        BootloaderSupport::Unknown => {
            log::warn!(
                "bootloader probe inconclusive ({}), keeping configured method",
                result.detail.as_deref().unwrap_or("no detail"),
            );
            None
        }
    }
}

/// Flash one device and verify it reappears. Returns a short report line.
#[allow(clippy::too_many_arguments)]
fn flash_one(
    runner: &dyn CommandRunner,
    scanner: &Scanner,
    data: &RegistryData,
    entry: &DeviceEntry,
    device_path: &Path,
    firmware: &Path,
    method: &str,
    opts: &FlashOpts,
    cancel: &CancelToken,
) -> Result<String, Box<dyn std::error::Error>> {
    let request = FlashRequest {
        device_path: device_path.to_path_buf(),
        firmware_path: firmware.to_path_buf(),
        katapult_dir: expand_tilde(&data.global_config.katapult_dir),
        klipper_dir: expand_tilde(&data.global_config.klipper_dir),
        method: method.to_string(),
        allow_fallback: !opts.no_fallback && data.global_config.allow_flash_fallback,
        timeout: Duration::from_secs(opts.timeout),
    };

    let spinner = spinner();
    spinner.set_message(format!("flashing via {}...", request.method));
    let result = flash_device(runner, &request, &mut |msg| {
        spinner.set_message(msg.to_string())
    });
    if !result.success {
        spinner.finish_and_clear();
        return Err(result
            .error
            .unwrap_or_else(|| "flash failed".to_string())
            .into());
    }

    spinner.set_message("waiting for device to reappear...");
    let outcome = wait_for_device(
        scanner,
        &entry.serial_pattern,
        VERIFY_TIMEOUT,
        VERIFY_INTERVAL,
        cancel,
    )?;
    spinner.finish_and_clear();

    match outcome.failure_reason() {
        None => Ok(format!(
            "flashed via {} in {:.1?}",
            result.method.map(|m| m.to_string()).unwrap_or_default(),
            result.elapsed,
        )),
        Some(reason) => Err(format!("flash completed but verification failed: {}", reason).into()),
    }
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
