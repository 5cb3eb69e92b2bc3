//! Klipper service lifecycle with guaranteed restart
//!
//! Klipper holds the serial port open and would fight the flash tools for
//! it, so every flash happens inside a stop/start bracket. The bracket is a
//! guard value: [`ServiceGuard::stop`] only returns a guard once the stop
//! command succeeded, and the start command runs exactly once on every exit
//! path, including early `?` returns and panics, via `Drop`. A start
//! failure is logged but never raised, so it cannot mask whatever the
//! guarded body itself reported.

use crate::runner::{CommandRunner, CommandSpec, RunOutcome};
use std::time::Duration;
use thiserror::Error;

/// Default timeout for systemctl operations
pub const TIMEOUT_SERVICE: Duration = Duration::from_secs(30);

/// The dependent service bracketed around flashing
pub const KLIPPER_SERVICE: &str = "klipper";

/// Errors from service control
#[derive(Debug, Error)]
pub enum ServiceError {
    /// `systemctl stop` exited non-zero
    #[error("failed to stop {service}: {detail}")]
    StopFailed {
        /// Service name
        service: String,
        /// stderr from systemctl
        detail: String,
    },

    /// `systemctl stop` did not finish in time
    #[error("timeout ({timeout:?}) stopping {service}")]
    StopTimeout {
        /// Service name
        service: String,
        /// The expired timeout
        timeout: Duration,
    },

    /// `systemctl start` exited non-zero (reported, never raised mid-flash)
    #[error("failed to start {service}: {detail}")]
    StartFailed {
        /// Service name
        service: String,
        /// stderr from systemctl
        detail: String,
    },

    /// `systemctl start` did not finish in time
    #[error("timeout ({timeout:?}) starting {service}")]
    StartTimeout {
        /// Service name
        service: String,
        /// The expired timeout
        timeout: Duration,
    },

    /// systemctl could not be spawned
    #[error("failed to run systemctl: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Check whether sudo works without a password prompt.
///
/// Informational only; a `false` just means systemctl may prompt.
pub fn verify_passwordless_sudo(runner: &dyn CommandRunner) -> bool {
    let spec = CommandSpec::new("sudo").args(["-n", "true"]);
    matches!(
        runner.run(&spec, Duration::from_secs(5)),
        Ok(RunOutcome::Completed(output)) if output.success()
    )
}

/// Scoped stop of the Klipper service with restart on drop.
///
/// ```no_run
/// # use kflash_flash::{ServiceGuard, SystemRunner};
/// # use kflash_flash::service::TIMEOUT_SERVICE;
/// # fn flash() -> Result<(), Box<dyn std::error::Error>> {
/// let runner = SystemRunner;
/// let guard = ServiceGuard::stop(&runner, "klipper", TIMEOUT_SERVICE)?;
/// // ... flash while Klipper is down; any early return restarts it ...
/// guard.restart()?;
/// # Ok(()) }
/// ```
#[must_use = "dropping the guard immediately would restart the service at once"]
pub struct ServiceGuard<'a> {
    runner: &'a dyn CommandRunner,
    service: String,
    timeout: Duration,
    restarted: bool,
}

impl<'a> ServiceGuard<'a> {
    /// Stop the service; only hand out a guard once the stop succeeded.
    ///
    /// On `Err` the guarded body must not run: the service may still be
    /// holding the serial port.
    pub fn stop(
        runner: &'a dyn CommandRunner,
        service: &str,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let spec = CommandSpec::new("sudo").args(["systemctl", "stop", service]);
        match runner.run(&spec, timeout) {
            Ok(RunOutcome::Completed(output)) if output.success() => Ok(Self {
                runner,
                service: service.to_string(),
                timeout,
                restarted: false,
            }),
            Ok(RunOutcome::Completed(output)) => Err(ServiceError::StopFailed {
                service: service.to_string(),
                detail: output.message(),
            }),
            Ok(RunOutcome::TimedOut) => Err(ServiceError::StopTimeout {
                service: service.to_string(),
                timeout,
            }),
            Err(source) => Err(ServiceError::Spawn(source)),
        }
    }

    fn start_service(&self) -> Result<(), ServiceError> {
        let spec = CommandSpec::new("sudo").args(["systemctl", "start", &self.service]);
        match self.runner.run(&spec, self.timeout) {
            Ok(RunOutcome::Completed(output)) if output.success() => Ok(()),
            Ok(RunOutcome::Completed(output)) => Err(ServiceError::StartFailed {
                service: self.service.clone(),
                detail: output.message(),
            }),
            Ok(RunOutcome::TimedOut) => Err(ServiceError::StartTimeout {
                service: self.service.clone(),
                timeout: self.timeout,
            }),
            Err(source) => Err(ServiceError::Spawn(source)),
        }
    }

    /// Restart the service on the normal exit path.
    ///
    /// Consumes the guard; `Drop` will not start a second time. The error
    /// is returned so the caller can tell the operator, but by this point
    /// the flash outcome is already decided.
    pub fn restart(mut self) -> Result<(), ServiceError> {
        self.restarted = true;
        self.start_service()
    }
}

impl Drop for ServiceGuard<'_> {
    fn drop(&mut self) {
        if self.restarted {
            return;
        }
        self.restarted = true;
        if let Err(e) = self.start_service() {
            // Never panic in drop; never mask the in-flight error.
            log::warn!(
                "{} (start it manually: sudo systemctl start {})",
                e,
                self.service
            );
        }
    }
}
