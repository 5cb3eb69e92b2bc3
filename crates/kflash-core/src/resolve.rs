//! Cross-referencing scanned devices against the registered-board table
//!
//! An identity pattern matching more than one attached device is ambiguous:
//! silently picking a candidate risks flashing the wrong physical board, so
//! duplicates are classified up front and excluded from the selectable set.
//! Callers render the duplicate bucket as a warning and refuse selection.

use crate::discovery::DiscoveredDevice;
use crate::identity;
use crate::registry::DeviceEntry;

/// A registered identity matched by exactly one attached device.
#[derive(Debug, Clone)]
pub struct UniqueMatch {
    /// The registry entry
    pub entry: DeviceEntry,
    /// The single attached device it matched
    pub device: DiscoveredDevice,
}

/// A registered identity matched by two or more attached devices.
#[derive(Debug, Clone)]
pub struct DuplicateMatch {
    /// The registry entry
    pub entry: DeviceEntry,
    /// Every attached device it matched, in scan order
    pub devices: Vec<DiscoveredDevice>,
}

/// Partition of attached devices against registered identities.
///
/// Every scanned device lands in exactly one of the three buckets.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// Identities with a one-to-one device match
    pub unique: Vec<UniqueMatch>,
    /// Identities with an ambiguous match; excluded from selection
    pub duplicates: Vec<DuplicateMatch>,
    /// Attached devices matching no registered identity
    pub unmatched: Vec<DiscoveredDevice>,
}

impl MatchResult {
    /// Find the unique match for a registry key, if any.
    pub fn unique_for(&self, key: &str) -> Option<&UniqueMatch> {
        self.unique.iter().find(|m| m.entry.key == key)
    }

    /// Find the duplicate classification for a registry key, if any.
    pub fn duplicate_for(&self, key: &str) -> Option<&DuplicateMatch> {
        self.duplicates.iter().find(|m| m.entry.key == key)
    }
}

/// Cross-reference scanned devices against registered identities.
///
/// Matching is prefix-agnostic (see [`identity::expand_variants`]): a board
/// currently sitting in the Katapult bootloader still matches its
/// `usb-Klipper_*` pattern. Devices claimed by at least one identity never
/// appear in `unmatched`, even when every claim was ambiguous.
pub fn resolve(devices: &[DiscoveredDevice], entries: &[DeviceEntry]) -> MatchResult {
    let mut result = MatchResult::default();
    let mut claimed = vec![false; devices.len()];

    for entry in entries {
        let matched: Vec<usize> = devices
            .iter()
            .enumerate()
            .filter(|(_, device)| identity::matches(&entry.serial_pattern, &device.filename))
            .map(|(i, _)| i)
            .collect();

        for &i in &matched {
            claimed[i] = true;
        }

        match matched.as_slice() {
            [] => {}
            [single] => result.unique.push(UniqueMatch {
                entry: entry.clone(),
                device: devices[*single].clone(),
            }),
            many => result.duplicates.push(DuplicateMatch {
                entry: entry.clone(),
                devices: many.iter().map(|&i| devices[i].clone()).collect(),
            }),
        }
    }

    result.unmatched = devices
        .iter()
        .zip(&claimed)
        .filter(|(_, &claimed)| !claimed)
        .map(|(device, _)| device.clone())
        .collect();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn device(filename: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            path: PathBuf::from(format!("/dev/serial/by-id/{}", filename)),
            filename: filename.to_string(),
        }
    }

    fn entry(key: &str, pattern: &str) -> DeviceEntry {
        DeviceEntry {
            key: key.to_string(),
            name: key.to_string(),
            mcu: "stm32h723".to_string(),
            serial_pattern: pattern.to_string(),
            flash_method: None,
            flashable: true,
        }
    }

    #[test]
    fn test_every_device_lands_in_exactly_one_bucket() {
        let devices = vec![
            device("usb-Klipper_stm32h723xx_AA01-if00"),
            device("usb-Klipper_rp2040_BB02-if00"),
            device("usb-Beacon_Beacon_RevH_CC03-if00"),
        ];
        let entries = vec![entry("octopus", "usb-Klipper_stm32h723xx_AA01*")];

        let result = resolve(&devices, &entries);
        assert_eq!(result.unique.len(), 1);
        assert!(result.duplicates.is_empty());
        assert_eq!(result.unmatched.len(), 2);

        let bucketed = result.unique.len()
            + result
                .duplicates
                .iter()
                .map(|d| d.devices.len())
                .sum::<usize>()
            + result.unmatched.len();
        assert_eq!(bucketed, devices.len());
    }

    #[test]
    fn test_duplicate_identity_is_excluded_from_unique() {
        // Same board suffix in both modes at once means two physical boards.
        let devices = vec![
            device("usb-Klipper_stm32h723xx_ABC123-if00"),
            device("usb-katapult_stm32h723xx_ABC123-if00"),
        ];
        let entries = vec![entry("octopus", "usb-Klipper_stm32h723xx_ABC123*")];

        let result = resolve(&devices, &entries);
        assert!(result.unique.is_empty());
        assert_eq!(result.duplicates.len(), 1);
        assert_eq!(result.duplicates[0].devices.len(), 2);
        assert!(result.unmatched.is_empty());
        assert!(result.unique_for("octopus").is_none());
        assert!(result.duplicate_for("octopus").is_some());
    }

    #[test]
    fn test_bootloader_mode_device_matches_klipper_pattern() {
        let devices = vec![device("usb-katapult_rp2040_303030-if00")];
        let entries = vec![entry("nitehawk", "usb-Klipper_rp2040_303030*")];

        let result = resolve(&devices, &entries);
        assert_eq!(result.unique.len(), 1);
        assert_eq!(
            result.unique[0].device.filename,
            "usb-katapult_rp2040_303030-if00",
        );
    }

    #[test]
    fn test_device_never_in_both_matched_and_unmatched() {
        let devices = vec![
            device("usb-Klipper_rp2040_AA-if00"),
            device("usb-Klipper_rp2040_AB-if00"),
        ];
        // One pattern claims both devices; neither may fall through to
        // unmatched just because the claim was ambiguous.
        let entries = vec![entry("wide", "usb-Klipper_rp2040_A*")];

        let result = resolve(&devices, &entries);
        assert!(result.unique.is_empty());
        assert_eq!(result.duplicates.len(), 1);
        assert!(result.unmatched.is_empty());
    }

    #[test]
    fn test_no_entries_means_everything_unmatched() {
        let devices = vec![device("usb-Klipper_rp2040_AA-if00")];
        let result = resolve(&devices, &[]);
        assert!(result.unique.is_empty());
        assert_eq!(result.unmatched.len(), 1);
    }
}
