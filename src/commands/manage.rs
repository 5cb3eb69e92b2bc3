//! Registry management: add and remove devices

use kflash_core::{identity, resolve, DeviceEntry, Registry, Scanner};

type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Register an attached, not-yet-registered device under `key`.
///
/// With one candidate attached the choice is automatic; with several, the
/// `--serial` substring narrows it down. The stored pattern is the filename
/// with its interface suffix replaced by a trailing glob, so the entry keeps
/// matching across replugs and bootloader mode switches.
pub fn cmd_add(
    registry: &Registry,
    scanner: &Scanner,
    key: &str,
    name: Option<&str>,
    serial: Option<&str>,
) -> CmdResult {
    let mut data = registry.load()?;
    if data.devices.contains_key(key) {
        return Err(format!("device key already registered: {}", key).into());
    }

    let devices = scanner.scan();
    let entries: Vec<_> = data.devices.values().cloned().collect();
    let matches = resolve(&devices, &entries);

    let mut candidates: Vec<_> = matches
        .unmatched
        .iter()
        .filter(|d| identity::is_supported(&d.filename))
        .collect();
    if let Some(serial) = serial {
        candidates.retain(|d| d.filename.contains(serial));
    }

    let device = match candidates.as_slice() {
        [] => {
            return Err("no unregistered Klipper or Katapult device found; \
                 run `kflash list` to see what is attached"
                .into())
        }
        [single] => *single,
        many => {
            eprintln!("Several unregistered devices match:");
            for d in many {
                eprintln!("  {}", d.filename);
            }
            return Err("pass --serial with a unique substring to pick one".into());
        }
    };

    let mcu = identity::extract_mcu(&device.filename)
        .ok_or_else(|| format!("could not extract MCU type from {}", device.filename))?;
    let entry = DeviceEntry {
        key: key.to_string(),
        name: name.unwrap_or(key).to_string(),
        mcu,
        serial_pattern: identity::generate_pattern(&device.filename),
        flash_method: None,
        flashable: true,
    };

    println!("Registering {}:", key);
    println!("  name:    {}", entry.name);
    println!("  mcu:     {}", entry.mcu);
    println!("  pattern: {}", entry.serial_pattern);

    data.insert_device(entry)?;
    registry.save(&data)?;
    println!("Saved to {}", registry.path().display());
    Ok(())
}

/// Remove a device from the registry.
pub fn cmd_remove(registry: &Registry, key: &str) -> CmdResult {
    let mut data = registry.load()?;
    let entry = data.remove_device(key)?;
    registry.save(&data)?;
    println!("Removed {} ({})", entry.key, entry.name);
    Ok(())
}
