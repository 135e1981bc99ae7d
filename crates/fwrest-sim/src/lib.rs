//! fwrest-sim - Simulated device behind the firmware REST surface
//!
//! Host-side stand-ins for the hardware the control plane drives:
//!
//! - [`SimFlash`]: NOR flash in RAM, optionally mirrored to an image file
//! - [`DirStore`]: file store rooted in a host directory
//! - [`AbPartitions`]: two-slot boot partition table
//! - [`ResetNotifier`]: deferred reset delivered as a shutdown signal
//! - [`MemPins`], [`MemChannels`], [`SimConsole`]: pin configuration, channel
//!   values and the console command interpreter

pub mod console;
pub mod flash;
pub mod partitions;
pub mod pins;
pub mod reset;
pub mod store;

pub use console::SimConsole;
pub use flash::SimFlash;
pub use partitions::AbPartitions;
pub use pins::{MemChannels, MemPins, ROLE_NAMES};
pub use reset::ResetNotifier;
pub use store::DirStore;
