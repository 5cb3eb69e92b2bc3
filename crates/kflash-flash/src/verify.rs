//! Post-flash device verification
//!
//! After a flash the board re-enumerates, and the identity it comes back
//! with tells us how the flash went: the normal-mode prefix means the new
//! firmware is up, the katapult prefix means the board is stuck in the
//! bootloader, anything else matching the pattern is suspicious and
//! reported as-is. Running this before the service guard releases keeps
//! Klipper from being restarted against a half-flashed board.

use crate::cancel::CancelToken;
use crate::error::{FlashError, Result};
use kflash_core::discovery::{DiscoveredDevice, Scanner};
use kflash_core::identity;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Default wall-clock budget for the device to re-enumerate.
pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(30);
/// Sleep between serial directory re-scans.
pub const VERIFY_INTERVAL: Duration = Duration::from_millis(500);

/// What the poller observed once the device (or the deadline) arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The device reappeared under its normal-mode identity
    Confirmed {
        /// Serial-by-id path of the confirmed device
        path: PathBuf,
    },
    /// The device reappeared in katapult mode; the new firmware is not
    /// running
    BootloaderMode {
        /// Serial-by-id path of the katapult-mode device
        path: PathBuf,
    },
    /// A device matched the pattern under an identity carrying neither
    /// mode prefix
    UnexpectedIdentity {
        /// Serial-by-id path of the device
        path: PathBuf,
        /// Its by-id filename
        filename: String,
    },
    /// No matching device appeared before the deadline
    TimedOut,
}

impl VerifyOutcome {
    /// Whether this outcome confirms a successful flash.
    pub fn verified(&self) -> bool {
        matches!(self, VerifyOutcome::Confirmed { .. })
    }

    /// Human-readable reason for non-`Confirmed` outcomes.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            VerifyOutcome::Confirmed { .. } => None,
            VerifyOutcome::BootloaderMode { path } => Some(format!(
                "device is in bootloader mode ({}), firmware is not running",
                path.display()
            )),
            VerifyOutcome::UnexpectedIdentity { filename, .. } => Some(format!(
                "device reappeared with unexpected identity {}",
                filename
            )),
            VerifyOutcome::TimedOut => {
                Some("device did not reappear before the timeout".to_string())
            }
        }
    }
}

// Prefix detection is case-insensitive, same as `identity::is_supported`.
fn classify(device: &DiscoveredDevice) -> VerifyOutcome {
    let lower = device.filename.to_ascii_lowercase();
    if lower.starts_with(&identity::PREFIX_KLIPPER.to_ascii_lowercase()) {
        VerifyOutcome::Confirmed {
            path: device.path.clone(),
        }
    } else if lower.starts_with(identity::PREFIX_KATAPULT) {
        VerifyOutcome::BootloaderMode {
            path: device.path.clone(),
        }
    } else {
        VerifyOutcome::UnexpectedIdentity {
            path: device.path.clone(),
            filename: device.filename.clone(),
        }
    }
}

/// Poll `scanner` until a device matching `pattern` (variant-expanded)
/// appears, then classify it by mode prefix.
///
/// When one scan yields several matching devices, a normal-mode sighting
/// wins over the others. The deadline is checked after each scan so an
/// appearance at the boundary still counts.
pub fn wait_for_device(
    scanner: &Scanner,
    pattern: &str,
    timeout: Duration,
    interval: Duration,
    cancel: &CancelToken,
) -> Result<VerifyOutcome> {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return Err(FlashError::Interrupted);
        }

        let mut fallback = None;
        for device in scanner.scan() {
            if !identity::matches(pattern, &device.filename) {
                continue;
            }
            let outcome = classify(&device);
            if outcome.verified() {
                return Ok(outcome);
            }
            fallback.get_or_insert(outcome);
        }
        if let Some(outcome) = fallback {
            return Ok(outcome);
        }

        if Instant::now() >= deadline {
            return Ok(VerifyOutcome::TimedOut);
        }
        std::thread::sleep(interval);
    }
}
