//! Printer-state gate for flash operations
//!
//! Flashing while a print is running would kill the print mid-layer, so the
//! flash commands consult a [`StatusProvider`] first. The default provider
//! reports nothing; a deployment that can see the printer's state plugs in
//! its own implementation.

/// Source of the printer's current activity.
pub trait StatusProvider {
    /// Description of an active print, if one is running.
    fn active_print(&self) -> Option<String>;
}

/// Provider for hosts with no way to ask the printer; never blocks a flash.
pub struct NoStatus;

impl StatusProvider for NoStatus {
    fn active_print(&self) -> Option<String> {
        None
    }
}
