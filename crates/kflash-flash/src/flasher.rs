//! Dual-method flash coordination: Katapult-first with make-flash fallback
//!
//! A flash attempt is an external tool run with a bounded timeout. The
//! coordinator tries the preferred method and, when permitted, the other
//! one; each attempt's failure becomes diagnostic text in a candidate
//! result rather than an error, and the public operation always returns a
//! [`FlashResult`]. On full failure the reported elapsed time spans every
//! attempt made.

use crate::error::{FlashError, Result};
use crate::runner::{CommandRunner, CommandSpec, RunOutcome};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Default timeout per flash attempt
pub const TIMEOUT_FLASH: Duration = Duration::from_secs(60);

/// The two ways firmware gets onto a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashMethod {
    /// Katapult flashtool against a device in (or entering) bootloader mode
    Katapult,
    /// Klipper's own `make FLASH_DEVICE=... flash`
    MakeFlash,
}

impl FlashMethod {
    /// The alternate method used for fallback.
    pub fn other(self) -> Self {
        match self {
            Self::Katapult => Self::MakeFlash,
            Self::MakeFlash => Self::Katapult,
        }
    }

    /// Configuration-file spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Katapult => "katapult",
            Self::MakeFlash => "make_flash",
        }
    }
}

impl fmt::Display for FlashMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlashMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "katapult" => Ok(Self::Katapult),
            "make_flash" => Ok(Self::MakeFlash),
            other => Err(format!("unknown flash method: {}", other)),
        }
    }
}

/// Outcome of a flash operation. Always returned, never thrown.
#[derive(Debug, Clone)]
pub struct FlashResult {
    /// Whether firmware landed on the board
    pub success: bool,
    /// The method that produced this result; `None` when no attempt ran
    pub method: Option<FlashMethod>,
    /// Elapsed wall time; spans all attempts on full failure
    pub elapsed: Duration,
    /// Diagnostic text for a failed result
    pub error: Option<String>,
}

impl FlashResult {
    fn failed(method: Option<FlashMethod>, elapsed: Duration, error: impl Into<String>) -> Self {
        Self {
            success: false,
            method,
            elapsed,
            error: Some(error.into()),
        }
    }
}

/// Everything a flash operation needs to know.
#[derive(Debug, Clone)]
pub struct FlashRequest {
    /// USB serial device path
    pub device_path: PathBuf,
    /// Firmware binary (klipper.bin)
    pub firmware_path: PathBuf,
    /// Katapult checkout holding `scripts/flashtool.py`
    pub katapult_dir: PathBuf,
    /// Klipper checkout where `make flash` runs
    pub klipper_dir: PathBuf,
    /// Preferred method as configured, e.g. "katapult"
    pub method: String,
    /// Try the other method when the preferred one fails
    pub allow_fallback: bool,
    /// Timeout per attempt
    pub timeout: Duration,
}

/// Error when the device is gone before flashing even starts.
pub fn verify_device_path(device_path: &Path) -> Result<()> {
    if device_path.exists() {
        Ok(())
    } else {
        Err(FlashError::DeviceVanished {
            path: device_path.to_path_buf(),
        })
    }
}

/// Error when the firmware binary is missing.
pub fn verify_firmware_path(firmware_path: &Path) -> Result<()> {
    if firmware_path.exists() {
        Ok(())
    } else {
        Err(FlashError::FirmwareMissing {
            path: firmware_path.to_path_buf(),
        })
    }
}

/// Flash firmware, trying the preferred method first.
///
/// An unrecognized method string or a device path that no longer exists
/// fails immediately with no attempt made. `progress` receives a line
/// between attempts when falling back.
pub fn flash_device(
    runner: &dyn CommandRunner,
    request: &FlashRequest,
    progress: &mut dyn FnMut(&str),
) -> FlashResult {
    let start = Instant::now();

    if let Err(e) = verify_device_path(&request.device_path) {
        return FlashResult::failed(None, Duration::ZERO, e.to_string());
    }

    let preferred = match request.method.parse::<FlashMethod>() {
        Ok(method) => method,
        Err(message) => return FlashResult::failed(None, Duration::ZERO, message),
    };

    let mut methods = vec![preferred];
    if request.allow_fallback {
        methods.push(preferred.other());
    }

    let mut last: Option<FlashResult> = None;
    let count = methods.len();
    for (i, method) in methods.into_iter().enumerate() {
        let result = match method {
            FlashMethod::Katapult => try_katapult(runner, request),
            FlashMethod::MakeFlash => try_make_flash(runner, request),
        };

        if result.success {
            return result;
        }
        if i + 1 < count {
            progress(&format!(
                "{} failed: {}",
                method,
                result.error.as_deref().unwrap_or("unknown error"),
            ));
            progress("trying fallback method...");
        }
        last = Some(result);
    }

    let mut result = last.unwrap_or_else(|| {
        FlashResult::failed(Some(preferred), Duration::ZERO, "no flash methods attempted")
    });
    result.elapsed = start.elapsed();
    result
}

fn try_katapult(runner: &dyn CommandRunner, request: &FlashRequest) -> FlashResult {
    let start = Instant::now();
    let method = Some(FlashMethod::Katapult);

    let flashtool = request.katapult_dir.join("scripts").join("flashtool.py");
    if !flashtool.exists() {
        return FlashResult::failed(
            method,
            start.elapsed(),
            format!("katapult flashtool not found: {}", flashtool.display()),
        );
    }

    let spec = CommandSpec::new("python3")
        .arg(flashtool.to_string_lossy())
        .args(["-d"])
        .arg(request.device_path.to_string_lossy())
        .args(["-f"])
        .arg(request.firmware_path.to_string_lossy());

    finish_attempt(runner.run(&spec, request.timeout), method, start, request)
}

fn try_make_flash(runner: &dyn CommandRunner, request: &FlashRequest) -> FlashResult {
    let start = Instant::now();
    let method = Some(FlashMethod::MakeFlash);

    let spec = CommandSpec::new("make")
        .arg(format!(
            "FLASH_DEVICE={}",
            request.device_path.to_string_lossy()
        ))
        .arg("flash")
        .current_dir(&request.klipper_dir);

    finish_attempt(runner.run(&spec, request.timeout), method, start, request)
}

fn finish_attempt(
    outcome: std::io::Result<RunOutcome>,
    method: Option<FlashMethod>,
    start: Instant,
    request: &FlashRequest,
) -> FlashResult {
    match outcome {
        Ok(RunOutcome::Completed(output)) if output.success() => FlashResult {
            success: true,
            method,
            elapsed: start.elapsed(),
            error: None,
        },
        Ok(RunOutcome::Completed(output)) => {
            FlashResult::failed(method, start.elapsed(), output.message())
        }
        Ok(RunOutcome::TimedOut) => FlashResult::failed(
            method,
            request.timeout,
            format!(
                "flash timeout ({:?}) - device may need manual recovery",
                request.timeout
            ),
        ),
        Err(source) => FlashResult::failed(
            method,
            start.elapsed(),
            format!("failed to run flash tool: {}", source),
        ),
    }
}
