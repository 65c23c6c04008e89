//! System-backed device-mapper control for the lukskit stack. `system` holds
//! the `DeviceMapper` implementation while `command` and `parse` cover the
//! `dmsetup` process and its output.

mod command;
mod parse;
mod system;

pub use system::{SystemDeviceMapper, DEFAULT_DMSETUP_PATHS};
