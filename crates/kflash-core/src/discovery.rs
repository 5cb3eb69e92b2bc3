//! USB serial device scanning
//!
//! Attached boards show up as stable-named symlinks under
//! `/dev/serial/by-id`. A scan is a plain directory listing; nothing is
//! cached, because the attached set changes under our feet whenever a board
//! reboots between Klipper and Katapult modes. Callers re-scan instead of
//! holding on to a stale list.

use std::path::{Path, PathBuf};

/// Default location of the stable-named serial device symlinks
pub const SERIAL_BY_ID: &str = "/dev/serial/by-id";

/// A USB serial device found during scanning.
///
/// Ephemeral: recreated on every scan, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Absolute path, e.g. `/dev/serial/by-id/usb-Klipper_rp2040_3030-if00`
    pub path: PathBuf,
    /// Symlink filename, the identity token used for pattern matching
    pub filename: String,
}

/// Scans a by-id directory for attached serial devices.
///
/// The directory is configurable so tests can point a scanner at a tempdir;
/// production callers use [`Scanner::default`].
#[derive(Debug, Clone)]
pub struct Scanner {
    dir: PathBuf,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(SERIAL_BY_ID)
    }
}

impl Scanner {
    /// Create a scanner over the given by-id directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory this scanner reads.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// List currently attached serial devices, lexicographic by filename.
    ///
    /// A missing directory is an empty result, not an error: the kernel
    /// removes `/dev/serial/by-id` entirely while no serial device is
    /// attached, and it can vanish briefly during a USB reset.
    pub fn scan(&self) -> Vec<DiscoveredDevice> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut devices: Vec<DiscoveredDevice> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let filename = entry.file_name().into_string().ok()?;
                Some(DiscoveredDevice {
                    path: entry.path(),
                    filename,
                })
            })
            .collect();
        devices.sort_by(|a, b| a.filename.cmp(&b.filename));
        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_dir_yields_empty() {
        let scanner = Scanner::new("/nonexistent/serial/by-id");
        assert!(scanner.scan().is_empty());
    }

    #[test]
    fn test_scan_is_sorted_and_fresh() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("usb-Klipper_rp2040_BB-if00"), b"").unwrap();
        std::fs::write(dir.path().join("usb-Klipper_rp2040_AA-if00"), b"").unwrap();

        let scanner = Scanner::new(dir.path());
        let devices = scanner.scan();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].filename, "usb-Klipper_rp2040_AA-if00");
        assert_eq!(devices[1].filename, "usb-Klipper_rp2040_BB-if00");

        // A later scan sees newly attached devices.
        std::fs::write(dir.path().join("usb-katapult_rp2040_CC-if00"), b"").unwrap();
        assert_eq!(scanner.scan().len(), 3);
    }
}
