//! kflash-flash - Flash orchestration for kflash
//!
//! This crate owns every operation that touches a live board or the host
//! system: probing for the Katapult bootloader, flashing firmware through
//! the Katapult flashtool or `make flash` with automatic fallback, stopping
//! and restarting the Klipper service around a flash, resetting a wedged
//! device through the kernel's USB authorization toggle, and polling for a
//! flashed board to reappear.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    CLI (bin/kflash)                    │
//! └────────────────────────────────────────────────────────┘
//!                             │
//!                             ▼
//! ┌────────────────────────────────────────────────────────┐
//! │              kflash-flash (this crate)                 │
//! │  - BootloaderProbe: tri-state Katapult detection       │
//! │  - flash_device: dual-method flashing with fallback    │
//! │  - ServiceGuard: guaranteed Klipper stop/restart       │
//! │  - wait_for_device: post-flash verification poll       │
//! └────────────────────────────────────────────────────────┘
//!                             │
//!                             ▼
//! ┌────────────────────────────────────────────────────────┐
//! │  CommandRunner seam: external tools as subprocesses    │
//! │  (flashtool.py, make flash, systemctl, sudo tee)       │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! All subprocess invocations go through the [`runner::CommandRunner`]
//! trait with a bounded timeout, so orchestration logic is testable with
//! recording fakes and no tool ever hangs the process.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cancel;
pub mod error;
pub mod flasher;
pub mod probe;
pub mod runner;
pub mod service;
pub mod usb;
pub mod verify;

pub use cancel::CancelToken;
pub use error::{FlashError, Result};
pub use flasher::{flash_device, verify_device_path, FlashMethod, FlashRequest, FlashResult};
pub use probe::{BootloaderCheckResult, BootloaderProbe, BootloaderSupport, ProbeTimings};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, RunOutcome, SystemRunner};
pub use service::{verify_passwordless_sudo, ServiceError, ServiceGuard};
pub use usb::{usb_reset, AuthorizedResolver, SysfsResolver};
pub use verify::{wait_for_device, VerifyOutcome};
