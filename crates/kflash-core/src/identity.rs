//! Identity patterns for USB serial device filenames
//!
//! A board enumerates under `/dev/serial/by-id` as
//! `usb-<prefix>_<mcu>_<hexserial>-if<NN>` where the prefix is
//! `Klipper_` (application firmware running) or `katapult_` (bootloader).
//! The suffix after the prefix is stable across both modes, so a registered
//! board is recognized by a glob pattern derived from its filename with the
//! interface suffix stripped, and every match is tried against both prefix
//! variants.
//!
//! Everything in this module is a pure function over filenames and patterns.

use crate::discovery::DiscoveredDevice;
use glob::Pattern;
use once_cell::sync::Lazy;
use regex::Regex;

/// Prefix of a device running Klipper application firmware
pub const PREFIX_KLIPPER: &str = "usb-Klipper_";
/// Prefix of a device sitting in the Katapult bootloader
pub const PREFIX_KATAPULT: &str = "usb-katapult_";

static INTERFACE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-if\d+$").expect("interface suffix regex"));

/// MCU type token, without the vendor variant suffix (xx, xe, ...)
static MCU_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^usb-(?:Klipper|katapult)_([a-z0-9]+?)(?:x[a-z0-9]*)?_")
        .expect("mcu token regex")
});

/// Hexadecimal serial run after the MCU type token
static SERIAL_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"usb-(?:Klipper|katapult)_[a-zA-Z0-9]+_([A-Fa-f0-9]+)")
        .expect("serial token regex")
});

/// Return true if the filename looks like a Klipper or Katapult device.
pub fn is_supported(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    lower.starts_with(&PREFIX_KLIPPER.to_ascii_lowercase())
        || lower.starts_with(&PREFIX_KATAPULT.to_ascii_lowercase())
}

/// Generate a serial glob pattern from a full device filename.
///
/// The `-ifNN` interface suffix is stripped and a wildcard appended, so the
/// pattern keeps matching whichever interface index the board enumerates
/// with. Applying this to a filename that already lacks the suffix still
/// yields a usable pattern.
///
/// ```
/// # use kflash_core::identity::generate_pattern;
/// assert_eq!(
///     generate_pattern("usb-Klipper_stm32h723xx_29001A-if00"),
///     "usb-Klipper_stm32h723xx_29001A*",
/// );
/// ```
pub fn generate_pattern(filename: &str) -> String {
    let base = INTERFACE_SUFFIX.replace(filename, "");
    format!("{}*", base)
}

/// Return the pattern plus its sibling with the other mode prefix.
///
/// A `usb-katapult_rp2040_30*` pattern also yields
/// `usb-Klipper_rp2040_30*` and vice-versa, so matching works regardless of
/// which mode the board booted into. Patterns carrying neither prefix come
/// back as a singleton.
pub fn expand_variants(pattern: &str) -> Vec<String> {
    let lower = pattern.to_ascii_lowercase();
    if lower.starts_with("usb-klipper_") {
        let alt = format!("{}{}", PREFIX_KATAPULT, &pattern[PREFIX_KLIPPER.len()..]);
        vec![pattern.to_string(), alt]
    } else if lower.starts_with("usb-katapult_") {
        let alt = format!("{}{}", PREFIX_KLIPPER, &pattern[PREFIX_KATAPULT.len()..]);
        vec![pattern.to_string(), alt]
    } else {
        vec![pattern.to_string()]
    }
}

/// Return true if the filename matches the pattern or any prefix variant.
///
/// Variants that fail to compile as globs are skipped rather than erroring;
/// registry validation rejects malformed patterns before they get here.
pub fn matches(pattern: &str, filename: &str) -> bool {
    expand_variants(pattern).iter().any(|variant| {
        Pattern::new(variant)
            .map(|p| p.matches(filename))
            .unwrap_or(false)
    })
}

/// Return true if the filename matches the pattern as written, with no
/// prefix variant expansion.
///
/// Used when the mode matters: polling for a katapult identity must not be
/// satisfied by the normal-mode sibling, and vice-versa.
pub fn matches_exact(pattern: &str, filename: &str) -> bool {
    Pattern::new(pattern)
        .map(|p| p.matches(filename))
        .unwrap_or(false)
}

/// Find all devices whose filename matches the pattern, in scan order.
pub fn match_all<'a>(pattern: &str, devices: &'a [DiscoveredDevice]) -> Vec<&'a DiscoveredDevice> {
    devices
        .iter()
        .filter(|device| matches(pattern, &device.filename))
        .collect()
}

/// Extract the MCU type from a device filename.
///
/// Examples:
/// - `usb-Klipper_stm32h723xx_290...` -> `stm32h723`
/// - `usb-katapult_rp2040_303...`     -> `rp2040`
/// - `usb-Beacon_Beacon_RevH_FC2...`  -> `None`
pub fn extract_mcu(filename: &str) -> Option<String> {
    MCU_TOKEN
        .captures(filename)
        .map(|caps| caps[1].to_ascii_lowercase())
}

/// Extract the embedded hexadecimal serial run from a device filename.
///
/// The grammar is deliberately loose: the first hex run after the MCU type
/// token is taken, which is what the by-id naming produces for every board
/// seen in practice. Filenames with several hex-like tokens extract the
/// first one; callers downstream treat a failed match as uncertainty, never
/// as a guess.
pub fn extract_serial(filename: &str) -> Option<String> {
    SERIAL_TOKEN
        .captures(filename)
        .map(|caps| caps[1].to_string())
}
