//! List command implementation

use kflash_core::{identity, resolve, Registry, Scanner};

/// List registered devices with their attachment status, then any attached
/// boards the registry does not know about.
pub fn cmd_list(registry: &Registry, scanner: &Scanner) -> Result<(), Box<dyn std::error::Error>> {
    let data = registry.load()?;
    let devices = scanner.scan();
    let entries: Vec<_> = data.devices.values().cloned().collect();
    let matches = resolve(&devices, &entries);

    if entries.is_empty() {
        println!("No devices registered (registry: {})", registry.path().display());
    } else {
        println!(
            "{:<16} {:<24} {:<12} {:<10} Status",
            "Key", "Name", "MCU", "Method"
        );
        println!("{}", "-".repeat(78));
        for entry in &entries {
            let method = data.flash_method_for(entry);
            let status = if let Some(m) = matches.unique_for(&entry.key) {
                format!("attached ({})", m.device.path.display())
            } else if let Some(d) = matches.duplicate_for(&entry.key) {
                format!("AMBIGUOUS: {} devices match", d.devices.len())
            } else {
                "not attached".to_string()
            };
            let flag = if entry.flashable { "" } else { " [not flashable]" };
            println!(
                "{:<16} {:<24} {:<12} {:<10} {}{}",
                entry.key, entry.name, entry.mcu, method, status, flag
            );
        }
    }

    if !matches.unmatched.is_empty() {
        println!();
        println!("Unregistered devices:");
        for device in &matches.unmatched {
            let note = if identity::is_supported(&device.filename) {
                ""
            } else {
                " (unsupported)"
            };
            println!("  {}{}", device.filename, note);
        }
    }

    Ok(())
}
