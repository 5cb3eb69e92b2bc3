//! Error types for flash orchestration
//!
//! Per-attempt flash failures are data ([`crate::FlashResult`]), probe
//! uncertainty is data ([`crate::BootloaderSupport::Unknown`]); this error
//! type covers the failures that abort an operation outright.

use crate::service::ServiceError;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors from discovery, recovery plumbing, and service control
#[derive(Debug, Error)]
pub enum FlashError {
    /// Device path no longer exists
    #[error("device disconnected: {path} no longer exists")]
    DeviceVanished {
        /// The vanished /dev/serial/by-id path
        path: PathBuf,
    },

    /// Firmware binary does not exist
    #[error("firmware not found: {path}")]
    FirmwareMissing {
        /// The missing firmware path
        path: PathBuf,
    },

    /// Expected sysfs node is absent
    #[error("sysfs path not found: {path}")]
    SysfsPathNotFound {
        /// The missing sysfs path
        path: PathBuf,
    },

    /// Following the serial symlink into sysfs failed
    #[error("failed to resolve sysfs path for {path}: {source}")]
    SysfsResolve {
        /// The serial device path being resolved
        path: PathBuf,
        /// Underlying filesystem error
        #[source]
        source: std::io::Error,
    },

    /// Writing the USB authorization toggle failed
    #[error("failed to write '{value}' to {path}: {detail}")]
    AuthorizeWrite {
        /// The sysfs `authorized` file
        path: PathBuf,
        /// The value being written ('0' or '1')
        value: char,
        /// stderr or timeout description
        detail: String,
    },

    /// An external tool could not be spawned at all
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program name
        program: String,
        /// Underlying spawn error
        #[source]
        source: std::io::Error,
    },

    /// Operator interrupt delivered during a polling loop
    #[error("interrupted")]
    Interrupted,

    /// Service stop failed; the guarded scope was never entered
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Result type alias using [`FlashError`]
pub type Result<T> = std::result::Result<T, FlashError>;
