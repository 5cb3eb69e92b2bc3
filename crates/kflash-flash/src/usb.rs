//! USB authorization toggle via sysfs
//!
//! Last-resort recovery for a board that was told to reboot into the
//! bootloader and never came back: writing `0` then `1` to the owning USB
//! device's `authorized` attribute forces a disconnect and re-enumeration,
//! equivalent to replugging the cable.
//!
//! Resolution path: the `/dev/serial/by-id` symlink points at a tty node;
//! `/sys/class/tty/<tty>/device` is a symlink into the USB interface
//! directory, whose parent is the USB device node carrying `authorized`.
//! The writes need elevated privilege and go through `sudo tee` on the
//! [`CommandRunner`] seam.

use crate::error::{FlashError, Result};
use crate::runner::{CommandRunner, CommandSpec, RunOutcome};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pause between deauthorize and reauthorize
pub const USB_RESET_SLEEP: Duration = Duration::from_millis(500);

const AUTHORIZE_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves a serial device path to its USB `authorized` control file.
///
/// A trait so the probe can be exercised without a real sysfs tree; the
/// production implementation is [`SysfsResolver`].
pub trait AuthorizedResolver {
    /// Resolve `serial_path` to the owning USB device's `authorized` file.
    fn authorized_path(&self, serial_path: &Path) -> Result<PathBuf>;
}

/// Production resolver chasing symlinks through `/sys/class/tty`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysfsResolver;

impl AuthorizedResolver for SysfsResolver {
    fn authorized_path(&self, serial_path: &Path) -> Result<PathBuf> {
        let resolve_err = |source| FlashError::SysfsResolve {
            path: serial_path.to_path_buf(),
            source,
        };

        let real_dev = std::fs::canonicalize(serial_path).map_err(resolve_err)?;
        let tty_name = real_dev
            .file_name()
            .ok_or_else(|| FlashError::SysfsPathNotFound {
                path: real_dev.clone(),
            })?
            .to_string_lossy()
            .into_owned();

        let sysfs_device = PathBuf::from(format!("/sys/class/tty/{}/device", tty_name));
        if !sysfs_device.exists() {
            return Err(FlashError::SysfsPathNotFound { path: sysfs_device });
        }

        let iface_path = std::fs::canonicalize(&sysfs_device).map_err(resolve_err)?;
        let usb_dev_path = iface_path
            .parent()
            .ok_or_else(|| FlashError::SysfsPathNotFound {
                path: iface_path.clone(),
            })?;

        let authorized = usb_dev_path.join("authorized");
        if !authorized.exists() {
            return Err(FlashError::SysfsPathNotFound { path: authorized });
        }
        Ok(authorized)
    }
}

fn write_authorized(runner: &dyn CommandRunner, authorized: &Path, value: char) -> Result<()> {
    let spec = CommandSpec::new("sudo")
        .arg("tee")
        .arg(authorized.to_string_lossy())
        .stdin_data(value.to_string());

    match runner.run(&spec, AUTHORIZE_WRITE_TIMEOUT) {
        Ok(RunOutcome::Completed(output)) if output.success() => Ok(()),
        Ok(RunOutcome::Completed(output)) => Err(FlashError::AuthorizeWrite {
            path: authorized.to_path_buf(),
            value,
            detail: output.message(),
        }),
        Ok(RunOutcome::TimedOut) => Err(FlashError::AuthorizeWrite {
            path: authorized.to_path_buf(),
            value,
            detail: format!("timed out after {:?}", AUTHORIZE_WRITE_TIMEOUT),
        }),
        Err(source) => Err(FlashError::Spawn {
            program: "sudo".to_string(),
            source,
        }),
    }
}

/// Toggle the `authorized` flag to force the device to re-enumerate.
///
/// Writes `0` (disconnect), pauses [`USB_RESET_SLEEP`], writes `1`
/// (reconnect). Any write failure surfaces as
/// [`FlashError::AuthorizeWrite`]; the device state is then uncertain and
/// callers report it as such.
pub fn usb_reset(runner: &dyn CommandRunner, authorized: &Path) -> Result<()> {
    write_authorized(runner, authorized, '0')?;
    std::thread::sleep(USB_RESET_SLEEP);
    write_authorized(runner, authorized, '1')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandOutput;
    use std::cell::RefCell;

    struct RecordingRunner {
        fail_on: Option<usize>,
        calls: RefCell<Vec<CommandSpec>>,
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, spec: &CommandSpec, _timeout: Duration) -> std::io::Result<RunOutcome> {
            let mut calls = self.calls.borrow_mut();
            calls.push(spec.clone());
            let code = if self.fail_on == Some(calls.len()) { 1 } else { 0 };
            Ok(RunOutcome::Completed(CommandOutput {
                code: Some(code),
                stdout: String::new(),
                stderr: if code != 0 {
                    "tee: permission denied".to_string()
                } else {
                    String::new()
                },
            }))
        }
    }

    #[test]
    fn test_reset_writes_zero_then_one() {
        let runner = RecordingRunner {
            fail_on: None,
            calls: RefCell::new(Vec::new()),
        };
        usb_reset(&runner, Path::new("/sys/devices/usb1/authorized")).unwrap();

        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].stdin.as_deref(), Some("0"));
        assert_eq!(calls[1].stdin.as_deref(), Some("1"));
        assert_eq!(calls[0].program, "sudo");
    }

    #[test]
    fn test_failed_write_stops_the_toggle() {
        let runner = RecordingRunner {
            fail_on: Some(1),
            calls: RefCell::new(Vec::new()),
        };
        let err = usb_reset(&runner, Path::new("/sys/devices/usb1/authorized")).unwrap_err();
        assert!(matches!(err, FlashError::AuthorizeWrite { value: '0', .. }));
        assert_eq!(runner.calls.borrow().len(), 1);
    }

    #[test]
    fn test_missing_serial_path_is_a_resolve_error() {
        let err = SysfsResolver
            .authorized_path(Path::new("/nonexistent/by-id/usb-Klipper_rp2040_30-if00"))
            .unwrap_err();
        assert!(matches!(err, FlashError::SysfsResolve { .. }));
    }
}
