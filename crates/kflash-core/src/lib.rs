//! kflash-core - Device identity and registry library for kflash
//!
//! This crate provides everything kflash knows about boards without touching
//! one: scanning `/dev/serial/by-id` for attached USB serial devices,
//! deriving and matching the glob-style identity patterns that recognize a
//! physical board across its Klipper/Katapult enumerations, cross-referencing
//! attached devices against the registered-board table, and persisting that
//! table as JSON.
//!
//! The orchestration that drives real hardware (bootloader probing, flashing,
//! service control) lives in `kflash-flash`; the CLI should interact with
//! both crates and never shell out on its own.
//!
//! # Example
//!
//! ```no_run
//! use kflash_core::discovery::Scanner;
//! use kflash_core::identity;
//!
//! let devices = Scanner::default().scan();
//! for device in &devices {
//!     if identity::is_supported(&device.filename) {
//!         println!("{} -> {}", device.filename,
//!                  identity::generate_pattern(&device.filename));
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod discovery;
pub mod error;
pub mod identity;
pub mod registry;
pub mod resolve;

pub use discovery::{DiscoveredDevice, Scanner};
pub use error::{Error, Result};
pub use registry::{DeviceEntry, GlobalConfig, Registry, RegistryData};
pub use resolve::{resolve, DuplicateMatch, MatchResult, UniqueMatch};
