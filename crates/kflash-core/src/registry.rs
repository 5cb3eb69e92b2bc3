//! Registered-board table backed by a JSON file
//!
//! The registry maps operator-chosen keys ("octopus-pro") to the identity
//! pattern and flash settings of a physical board. Saves are atomic: the
//! file is written to a temporary sibling and renamed over the original, so
//! a crash mid-save never leaves a half-written table.

use crate::error::{Error, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn default_klipper_dir() -> String {
    "~/klipper".to_string()
}

fn default_katapult_dir() -> String {
    "~/katapult".to_string()
}

fn default_flash_method() -> String {
    "katapult".to_string()
}

fn default_true() -> bool {
    true
}

fn default_stagger_delay() -> f64 {
    2.0
}

/// Global settings shared across all devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Klipper checkout, home of `make flash`
    #[serde(default = "default_klipper_dir")]
    pub klipper_dir: String,
    /// Katapult checkout, home of `scripts/flashtool.py`
    #[serde(default = "default_katapult_dir")]
    pub katapult_dir: String,
    /// Method used when a device has no override: "katapult" or "make_flash"
    #[serde(default = "default_flash_method")]
    pub default_flash_method: String,
    /// Try the other method when the preferred one fails
    #[serde(default = "default_true")]
    pub allow_flash_fallback: bool,
    /// Seconds to wait between devices during batch flashing
    #[serde(default = "default_stagger_delay")]
    pub stagger_delay: f64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            klipper_dir: default_klipper_dir(),
            katapult_dir: default_katapult_dir(),
            default_flash_method: default_flash_method(),
            allow_flash_fallback: true,
            stagger_delay: default_stagger_delay(),
        }
    }
}

/// A registered board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Registry key, mirrored from the map key on load
    #[serde(skip)]
    pub key: String,
    /// Display name, e.g. "Octopus Pro v1.1"
    pub name: String,
    /// MCU type extracted from the serial filename, e.g. "stm32h723"
    pub mcu: String,
    /// Identity glob, e.g. "usb-Klipper_stm32h723xx_29001A*"
    pub serial_pattern: String,
    /// Per-device flash method override; None means the global default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flash_method: Option<String>,
    /// Excluded from batch flashing when false
    #[serde(default = "default_true")]
    pub flashable: bool,
}

impl DeviceEntry {
    /// Validate that the stored pattern compiles as a glob.
    pub fn validate_pattern(&self) -> Result<()> {
        Pattern::new(&self.serial_pattern)
            .map(|_| ())
            .map_err(|source| Error::InvalidPattern {
                pattern: self.serial_pattern.clone(),
                source,
            })
    }
}

/// Complete registry file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryData {
    /// Global settings
    #[serde(default, rename = "global")]
    pub global_config: GlobalConfig,
    /// Registered devices, key -> entry
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceEntry>,
}

impl RegistryData {
    /// Registered devices eligible for batch flashing, sorted by key.
    pub fn flashable_devices(&self) -> Vec<&DeviceEntry> {
        self.devices.values().filter(|e| e.flashable).collect()
    }

    /// Look up a device by key.
    pub fn device(&self, key: &str) -> Result<&DeviceEntry> {
        self.devices
            .get(key)
            .ok_or_else(|| Error::UnknownDevice(key.to_string()))
    }

    /// Insert a new device; refuses to replace an existing key.
    pub fn insert_device(&mut self, entry: DeviceEntry) -> Result<()> {
        if self.devices.contains_key(&entry.key) {
            return Err(Error::DuplicateKey(entry.key));
        }
        entry.validate_pattern()?;
        self.devices.insert(entry.key.clone(), entry);
        Ok(())
    }

    /// Remove a device by key.
    pub fn remove_device(&mut self, key: &str) -> Result<DeviceEntry> {
        self.devices
            .remove(key)
            .ok_or_else(|| Error::UnknownDevice(key.to_string()))
    }

    /// The flash method for an entry: its override or the global default.
    pub fn flash_method_for<'a>(&'a self, entry: &'a DeviceEntry) -> &'a str {
        entry
            .flash_method
            .as_deref()
            .unwrap_or(&self.global_config.default_flash_method)
    }
}

/// Registry file handle.
#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
}

impl Registry {
    /// Create a handle for the registry at `path`. Nothing is read yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the registry, returning defaults when the file does not exist.
    pub fn load(&self) -> Result<RegistryData> {
        if !self.path.exists() {
            return Ok(RegistryData::default());
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|source| Error::RegistryRead {
            path: self.path.clone(),
            source,
        })?;
        let mut data: RegistryData =
            serde_json::from_str(&raw).map_err(|source| Error::RegistryCorrupt {
                path: self.path.clone(),
                source,
            })?;
        for (key, entry) in data.devices.iter_mut() {
            entry.key = key.clone();
        }
        log::debug!(
            "loaded {} devices from {}",
            data.devices.len(),
            self.path.display()
        );
        Ok(data)
    }

    /// Save the registry atomically (write temp sibling, rename over).
    pub fn save(&self, data: &RegistryData) -> Result<()> {
        let write_err = |source| Error::RegistryWrite {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(data).expect("registry serializes");
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, pattern: &str) -> DeviceEntry {
        DeviceEntry {
            key: key.to_string(),
            name: key.to_string(),
            mcu: "rp2040".to_string(),
            serial_pattern: pattern.to_string(),
            flash_method: None,
            flashable: true,
        }
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().join("devices.json"));
        let data = registry.load().unwrap();
        assert!(data.devices.is_empty());
        assert_eq!(data.global_config.default_flash_method, "katapult");
        assert!(data.global_config.allow_flash_fallback);
    }

    #[test]
    fn test_round_trip_preserves_entries_and_keys() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().join("devices.json"));

        let mut data = RegistryData::default();
        data.insert_device(entry("octopus", "usb-Klipper_stm32h723xx_29*"))
            .unwrap();
        data.insert_device(entry("nitehawk", "usb-Klipper_rp2040_30*"))
            .unwrap();
        registry.save(&data).unwrap();

        let loaded = registry.load().unwrap();
        assert_eq!(loaded.devices.len(), 2);
        assert_eq!(loaded.devices["octopus"].key, "octopus");
        assert_eq!(
            loaded.devices["octopus"].serial_pattern,
            "usb-Klipper_stm32h723xx_29*",
        );
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = Registry::new(&path).load().unwrap_err();
        assert!(matches!(err, Error::RegistryCorrupt { .. }));
    }

    #[test]
    fn test_insert_refuses_duplicate_key() {
        let mut data = RegistryData::default();
        data.insert_device(entry("a", "usb-Klipper_rp2040_30*"))
            .unwrap();
        let err = data
            .insert_device(entry("a", "usb-Klipper_rp2040_31*"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_)));
    }

    #[test]
    fn test_flash_method_override() {
        let mut data = RegistryData::default();
        let mut e = entry("a", "usb-Klipper_rp2040_30*");
        e.flash_method = Some("make_flash".to_string());
        data.insert_device(e).unwrap();
        data.insert_device(entry("b", "usb-Klipper_rp2040_31*"))
            .unwrap();

        assert_eq!(data.flash_method_for(&data.devices["a"]), "make_flash");
        assert_eq!(data.flash_method_for(&data.devices["b"]), "katapult");
    }
}
