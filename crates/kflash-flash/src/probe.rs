//! Tri-state Katapult bootloader detection
//!
//! The probe answers "can this board take the fast flash path?" by actually
//! driving it: ask the flashtool to reboot the board into the bootloader,
//! watch `/dev/serial/by-id` for a `usb-katapult_*` identity carrying the
//! same embedded serial, then put the board back the way it was found.
//! Recovery is part of the contract: a board with Katapult is toggled back
//! via a second flashtool invocation, a board without it is re-enumerated
//! through the USB authorization reset.
//!
//! The verdict is deliberately three-valued. `Unknown` means the probe
//! itself could not complete and the board's state is uncertain; it is
//! never folded into `Absent`, because callers deciding the flash method
//! must not rely on the fast path they could not confirm.

use crate::cancel::CancelToken;
use crate::error::{FlashError, Result};
use crate::runner::{CommandRunner, CommandSpec, RunOutcome};
use crate::usb::{usb_reset, AuthorizedResolver};
use kflash_core::discovery::{DiscoveredDevice, Scanner};
use kflash_core::identity;
use std::path::Path;
use std::time::{Duration, Instant};

/// Whether the board runs the Katapult bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootloaderSupport {
    /// A katapult-mode identity was observed; the fast path works
    Present,
    /// The board rebooted through a USB reset without ever showing a
    /// katapult identity
    Absent,
    /// The probe could not complete; state of the board is uncertain
    Unknown,
}

/// Probe verdict with diagnostics and timing.
#[derive(Debug, Clone)]
pub struct BootloaderCheckResult {
    /// Tri-state verdict
    pub support: BootloaderSupport,
    /// Diagnostic text; set for every `Unknown`, and for a `Present` whose
    /// recovery to normal mode was not confirmed
    pub detail: Option<String>,
    /// Wall time the probe took
    pub elapsed: Duration,
}

/// Probe timing knobs, defaulting to the hardware-derived values.
#[derive(Debug, Clone, Copy)]
pub struct ProbeTimings {
    /// Max wait for a `flashtool.py -r` invocation
    pub entry_timeout: Duration,
    /// Max wait for a device identity to (re)appear
    pub poll_timeout: Duration,
    /// Sleep between serial directory re-scans
    pub poll_interval: Duration,
}

impl Default for ProbeTimings {
    fn default() -> Self {
        Self {
            entry_timeout: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Poll the serial directory until a device matches `pattern` or the
/// timeout elapses. The deadline is checked after each scan, so a device
/// appearing right at the boundary is still observed.
pub(crate) fn poll_for_match(
    scanner: &Scanner,
    pattern: &str,
    timeout: Duration,
    interval: Duration,
    cancel: &CancelToken,
) -> Result<Option<DiscoveredDevice>> {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return Err(FlashError::Interrupted);
        }
        for device in scanner.scan() {
            if identity::matches_exact(pattern, &device.filename) {
                return Ok(Some(device));
            }
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(interval);
    }
}

/// Katapult detection driver.
pub struct BootloaderProbe<'a> {
    runner: &'a dyn CommandRunner,
    resolver: &'a dyn AuthorizedResolver,
    scanner: &'a Scanner,
    timings: ProbeTimings,
    cancel: CancelToken,
}

impl<'a> BootloaderProbe<'a> {
    /// Create a probe with default timings and no cancellation source.
    pub fn new(
        runner: &'a dyn CommandRunner,
        resolver: &'a dyn AuthorizedResolver,
        scanner: &'a Scanner,
    ) -> Self {
        Self {
            runner,
            resolver,
            scanner,
            timings: ProbeTimings::default(),
            cancel: CancelToken::new(),
        }
    }

    /// Override the timing knobs.
    pub fn with_timings(mut self, timings: ProbeTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Attach a cancellation token checked between re-scans.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Probe `device_path` (a normal-mode device) for Katapult.
    ///
    /// `serial_pattern` is the board's registered identity, polled for when
    /// recovering the board to normal mode. `progress` receives one line
    /// per phase for interactive display.
    pub fn check(
        &self,
        katapult_dir: &Path,
        device_path: &Path,
        serial_pattern: &str,
        progress: &mut dyn FnMut(&str),
    ) -> BootloaderCheckResult {
        let start = Instant::now();
        let unknown = |detail: String| BootloaderCheckResult {
            support: BootloaderSupport::Unknown,
            detail: Some(detail),
            elapsed: start.elapsed(),
        };

        let filename = match device_path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => return unknown("device path has no filename".to_string()),
        };
        let serial = match identity::extract_serial(&filename) {
            Some(serial) => serial,
            None => return unknown("could not extract serial from device path".to_string()),
        };

        // Resolve the recovery handle up front, while the device is still
        // attached under its normal identity.
        let authorized = match self.resolver.authorized_path(device_path) {
            Ok(path) => path,
            Err(e) => return unknown(format!("failed to resolve sysfs path: {}", e)),
        };

        let flashtool = katapult_dir.join("scripts").join("flashtool.py");
        if !flashtool.exists() {
            return unknown(format!(
                "katapult flashtool not found: {}",
                flashtool.display()
            ));
        }

        progress("entering bootloader mode...");
        match self.request_bootloader(&flashtool, device_path) {
            Ok(RunOutcome::Completed(output)) if output.success() => {}
            Ok(RunOutcome::Completed(output)) => return unknown(output.message()),
            Ok(RunOutcome::TimedOut) => {
                return unknown(format!(
                    "flashtool.py -r timed out ({:?})",
                    self.timings.entry_timeout
                ))
            }
            Err(e) => return unknown(format!("failed to run flashtool.py: {}", e)),
        }

        progress("polling for katapult device...");
        let katapult_pattern = format!("usb-katapult_*_{}*", serial);
        let found = match self.poll(&katapult_pattern) {
            Ok(found) => found,
            Err(_) => return unknown("interrupted".to_string()),
        };

        if let Some(katapult_device) = found {
            // Katapult confirmed. A second -r against the katapult-mode
            // path is also how the tool exits bootloader mode; best-effort.
            progress("katapult detected, recovering device...");
            let _ = self.request_bootloader(&flashtool, &katapult_device.path);
            let recovered = self.poll(serial_pattern).unwrap_or(None);
            return BootloaderCheckResult {
                support: BootloaderSupport::Present,
                detail: if recovered.is_some() {
                    None
                } else {
                    Some("device may still be in bootloader mode".to_string())
                },
                elapsed: start.elapsed(),
            };
        }

        progress("no katapult detected, recovering device...");
        if let Err(e) = usb_reset(self.runner, &authorized) {
            return unknown(format!("USB reset failed: {}", e));
        }

        match self.poll(serial_pattern) {
            Ok(Some(_)) => BootloaderCheckResult {
                support: BootloaderSupport::Absent,
                detail: None,
                elapsed: start.elapsed(),
            },
            Ok(None) => unknown("device did not recover after USB reset".to_string()),
            Err(_) => unknown("interrupted".to_string()),
        }
    }

    fn request_bootloader(
        &self,
        flashtool: &Path,
        device_path: &Path,
    ) -> std::io::Result<RunOutcome> {
        let spec = CommandSpec::new("python3")
            .arg(flashtool.to_string_lossy())
            .arg("-r")
            .arg("-d")
            .arg(device_path.to_string_lossy());
        self.runner.run(&spec, self.timings.entry_timeout)
    }

    fn poll(&self, pattern: &str) -> Result<Option<DiscoveredDevice>> {
        poll_for_match(
            self.scanner,
            pattern,
            self.timings.poll_timeout,
            self.timings.poll_interval,
            &self.cancel,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandOutput;
    use std::cell::Cell;
    use std::path::PathBuf;

    const SERIAL: &str = "29001A0011";

    struct FixedResolver(std::result::Result<PathBuf, ()>);

    impl AuthorizedResolver for FixedResolver {
        fn authorized_path(&self, serial_path: &Path) -> Result<PathBuf> {
            match &self.0 {
                Ok(path) => Ok(path.clone()),
                Err(()) => Err(FlashError::SysfsPathNotFound {
                    path: serial_path.to_path_buf(),
                }),
            }
        }
    }

    /// Runner whose behavior is a closure, so tests can mutate the fake
    /// serial directory in reaction to tool invocations.
    struct FnRunner<F: Fn(&CommandSpec) -> std::io::Result<RunOutcome>>(F);

    impl<F: Fn(&CommandSpec) -> std::io::Result<RunOutcome>> CommandRunner for FnRunner<F> {
        fn run(&self, spec: &CommandSpec, _timeout: Duration) -> std::io::Result<RunOutcome> {
            (self.0)(spec)
        }
    }

    fn ok_outcome() -> std::io::Result<RunOutcome> {
        Ok(RunOutcome::Completed(CommandOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        }))
    }

    fn fail_outcome(stderr: &str) -> std::io::Result<RunOutcome> {
        Ok(RunOutcome::Completed(CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }))
    }

    fn short_timings() -> ProbeTimings {
        ProbeTimings {
            entry_timeout: Duration::from_millis(100),
            poll_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
        }
    }

    struct Fixture {
        serial_dir: tempfile::TempDir,
        katapult_dir: tempfile::TempDir,
        klipper_name: String,
        katapult_name: String,
    }

    impl Fixture {
        fn new() -> Self {
            let katapult_dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(katapult_dir.path().join("scripts")).unwrap();
            std::fs::write(katapult_dir.path().join("scripts").join("flashtool.py"), b"").unwrap();
            Self {
                serial_dir: tempfile::tempdir().unwrap(),
                katapult_dir,
                klipper_name: format!("usb-Klipper_rp2040_{}-if00", SERIAL),
                katapult_name: format!("usb-katapult_rp2040_{}-if00", SERIAL),
            }
        }

        fn scanner(&self) -> Scanner {
            Scanner::new(self.serial_dir.path())
        }

        fn device_path(&self) -> PathBuf {
            let path = self.serial_dir.path().join(&self.klipper_name);
            std::fs::write(&path, b"").unwrap();
            path
        }

        fn pattern(&self) -> String {
            format!("usb-Klipper_rp2040_{}*", SERIAL)
        }
    }

    #[test]
    fn test_unextractable_serial_is_unknown() {
        let fixture = Fixture::new();
        let scanner = fixture.scanner();
        let runner = FnRunner(|_| panic!("no tool should run"));
        let resolver = FixedResolver(Ok(PathBuf::from("/sys/devices/usb1/authorized")));
        let probe = BootloaderProbe::new(&runner, &resolver, &scanner).with_timings(short_timings());

        let result = probe.check(
            fixture.katapult_dir.path(),
            Path::new("/dev/serial/by-id/usb-Beacon_RevH-if00"),
            "usb-Beacon_RevH*",
            &mut |_| {},
        );
        assert_eq!(result.support, BootloaderSupport::Unknown);
        assert!(result.detail.unwrap().contains("serial"));
    }

    #[test]
    fn test_unresolvable_sysfs_is_unknown() {
        let fixture = Fixture::new();
        let scanner = fixture.scanner();
        let device_path = fixture.device_path();
        let runner = FnRunner(|_| panic!("no tool should run"));
        let resolver = FixedResolver(Err(()));
        let probe = BootloaderProbe::new(&runner, &resolver, &scanner).with_timings(short_timings());

        let result = probe.check(
            fixture.katapult_dir.path(),
            &device_path,
            &fixture.pattern(),
            &mut |_| {},
        );
        assert_eq!(result.support, BootloaderSupport::Unknown);
        assert!(result.detail.unwrap().contains("sysfs"));
    }

    #[test]
    fn test_tool_failure_is_unknown_not_absent() {
        let fixture = Fixture::new();
        let scanner = fixture.scanner();
        let device_path = fixture.device_path();
        let runner = FnRunner(|_| fail_outcome("can't connect"));
        let resolver = FixedResolver(Ok(PathBuf::from("/sys/devices/usb1/authorized")));
        let probe = BootloaderProbe::new(&runner, &resolver, &scanner).with_timings(short_timings());

        let result = probe.check(
            fixture.katapult_dir.path(),
            &device_path,
            &fixture.pattern(),
            &mut |_| {},
        );
        assert_eq!(result.support, BootloaderSupport::Unknown);
        assert_eq!(result.detail.as_deref(), Some("can't connect"));
    }

    #[test]
    fn test_tool_timeout_is_unknown() {
        let fixture = Fixture::new();
        let scanner = fixture.scanner();
        let device_path = fixture.device_path();
        let runner = FnRunner(|_| Ok(RunOutcome::TimedOut));
        let resolver = FixedResolver(Ok(PathBuf::from("/sys/devices/usb1/authorized")));
        let probe = BootloaderProbe::new(&runner, &resolver, &scanner).with_timings(short_timings());

        let result = probe.check(
            fixture.katapult_dir.path(),
            &device_path,
            &fixture.pattern(),
            &mut |_| {},
        );
        assert_eq!(result.support, BootloaderSupport::Unknown);
        assert!(result.detail.unwrap().contains("timed out"));
    }

    #[test]
    fn test_katapult_appearing_means_present() {
        let fixture = Fixture::new();
        let scanner = fixture.scanner();
        let device_path = fixture.device_path();
        let katapult_path = fixture.serial_dir.path().join(&fixture.katapult_name);
        let resolver = FixedResolver(Ok(PathBuf::from("/sys/devices/usb1/authorized")));

        // First -r reboots into katapult; second -r (against the katapult
        // path) reboots back. The device file follows along.
        let reboots = Cell::new(0usize);
        let runner = FnRunner(|spec: &CommandSpec| {
            assert!(spec.args.iter().any(|a| a == "-r"));
            reboots.set(reboots.get() + 1);
            if reboots.get() == 1 {
                std::fs::remove_file(&device_path).unwrap();
                std::fs::write(&katapult_path, b"").unwrap();
            } else {
                std::fs::remove_file(&katapult_path).unwrap();
                std::fs::write(&device_path, b"").unwrap();
            }
            ok_outcome()
        });

        let probe = BootloaderProbe::new(&runner, &resolver, &scanner).with_timings(short_timings());
        let result = probe.check(
            fixture.katapult_dir.path(),
            &device_path,
            &fixture.pattern(),
            &mut |_| {},
        );
        assert_eq!(result.support, BootloaderSupport::Present);
        assert!(result.detail.is_none());
        assert_eq!(reboots.get(), 2);
    }

    #[test]
    fn test_present_with_failed_recovery_sets_detail() {
        let fixture = Fixture::new();
        let scanner = fixture.scanner();
        let device_path = fixture.device_path();
        let katapult_path = fixture.serial_dir.path().join(&fixture.katapult_name);
        let resolver = FixedResolver(Ok(PathBuf::from("/sys/devices/usb1/authorized")));

        // The device enters katapult mode and stays stuck there.
        let reboots = Cell::new(0usize);
        let runner = FnRunner(|_spec: &CommandSpec| {
            reboots.set(reboots.get() + 1);
            if reboots.get() == 1 {
                std::fs::remove_file(&device_path).unwrap();
                std::fs::write(&katapult_path, b"").unwrap();
            }
            ok_outcome()
        });

        let probe = BootloaderProbe::new(&runner, &resolver, &scanner).with_timings(short_timings());
        let result = probe.check(
            fixture.katapult_dir.path(),
            &device_path,
            &fixture.pattern(),
            &mut |_| {},
        );
        assert_eq!(result.support, BootloaderSupport::Present);
        assert!(result
            .detail
            .unwrap()
            .contains("still be in bootloader mode"));
    }

    #[test]
    fn test_no_katapult_and_reset_recovery_means_absent() {
        let fixture = Fixture::new();
        let scanner = fixture.scanner();
        let device_path = fixture.device_path();
        let resolver = FixedResolver(Ok(PathBuf::from("/sys/devices/usb1/authorized")));

        // -r is acknowledged but no katapult identity ever shows up (the
        // device file never changes), so the probe falls through to the USB
        // reset; the reauthorize write "re-enumerates" the device, which is
        // already present under its normal name.
        let runner = FnRunner(|spec: &CommandSpec| {
            if spec.program == "sudo" {
                assert_eq!(spec.args[0], "tee");
            }
            ok_outcome()
        });

        let probe = BootloaderProbe::new(&runner, &resolver, &scanner).with_timings(short_timings());
        let result = probe.check(
            fixture.katapult_dir.path(),
            &device_path,
            &fixture.pattern(),
            &mut |_| {},
        );
        assert_eq!(result.support, BootloaderSupport::Absent);
        assert!(result.detail.is_none());
    }

    #[test]
    fn test_vanished_device_after_reset_is_unknown() {
        let fixture = Fixture::new();
        let scanner = fixture.scanner();
        let device_path = fixture.device_path();
        let resolver = FixedResolver(Ok(PathBuf::from("/sys/devices/usb1/authorized")));

        // The -r drops the device off the bus entirely; no katapult, and
        // the USB reset does not bring it back either.
        let runner = FnRunner(|spec: &CommandSpec| {
            if spec.program == "python3" && device_path.exists() {
                std::fs::remove_file(&device_path).unwrap();
            }
            ok_outcome()
        });

        let probe = BootloaderProbe::new(&runner, &resolver, &scanner).with_timings(short_timings());
        let result = probe.check(
            fixture.katapult_dir.path(),
            &device_path,
            &fixture.pattern(),
            &mut |_| {},
        );
        assert_eq!(result.support, BootloaderSupport::Unknown);
        assert!(result.detail.unwrap().contains("did not recover"));
    }

    #[test]
    fn test_failed_auth_write_is_unknown() {
        let fixture = Fixture::new();
        let scanner = fixture.scanner();
        let device_path = fixture.device_path();
        let resolver = FixedResolver(Ok(PathBuf::from("/sys/devices/usb1/authorized")));

        let runner = FnRunner(|spec: &CommandSpec| {
            if spec.program == "sudo" {
                fail_outcome("permission denied")
            } else {
                if device_path.exists() {
                    std::fs::remove_file(&device_path).unwrap();
                }
                ok_outcome()
            }
        });

        let probe = BootloaderProbe::new(&runner, &resolver, &scanner).with_timings(short_timings());
        let result = probe.check(
            fixture.katapult_dir.path(),
            &device_path,
            &fixture.pattern(),
            &mut |_| {},
        );
        assert_eq!(result.support, BootloaderSupport::Unknown);
        assert!(result.detail.unwrap().contains("USB reset failed"));
    }

    #[test]
    fn test_cancelled_poll_is_interrupted() {
        let fixture = Fixture::new();
        let scanner = fixture.scanner();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = poll_for_match(
            &scanner,
            "usb-Klipper_*",
            Duration::from_secs(1),
            Duration::from_millis(10),
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, FlashError::Interrupted));
    }
}
