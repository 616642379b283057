// Evquell Device Layer

pub mod clone;
pub mod identity;
pub mod resolve;

pub use clone::{read_capabilities, CloneDevice, CloneError};
pub use identity::{DeviceIdentity, IdentityOverride};
pub use resolve::{list_devices, resolve, DeviceError, DeviceListing, GrabbedDevice, InputHandle};
