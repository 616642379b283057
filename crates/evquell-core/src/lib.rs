// Evquell Core Library
// Device cloning, activity-driven suppression, and the dispatch loop

pub mod caps;
pub mod config;
pub mod daemon;
pub mod device;
pub mod filter;

pub use caps::{Bitset, CapabilitySet, EventSet};
pub use config::{Config, ConfigError, ConfigFile};
pub use daemon::{run, Daemon, DaemonError};
pub use device::{
    list_devices, resolve, CloneDevice, CloneError, DeviceError, DeviceIdentity, DeviceListing,
    GrabbedDevice, IdentityOverride, InputHandle,
};
pub use filter::{decide, note_activity, FilterState, Verdict};
