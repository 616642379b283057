// Evquell Device Layer - Identity
// Name and id fields copied from a source device onto its clone

use evdev_rs::{DeviceWrapper, UninitDevice};

/// Identity fields of an input device, snapshotted once and immutable after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub name: String,
    pub bustype: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
}

/// Optional per-field replacements supplied by configuration; unset fields
/// keep the source device's values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityOverride {
    pub name: Option<String>,
    pub bustype: Option<u16>,
    pub vendor: Option<u16>,
    pub product: Option<u16>,
    pub version: Option<u16>,
}

impl IdentityOverride {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl DeviceIdentity {
    /// Snapshot the identity of an open device.
    pub fn from_device<D: DeviceWrapper>(device: &D) -> Self {
        Self {
            name: device.name().unwrap_or("").to_string(),
            bustype: device.bustype(),
            vendor: device.vendor_id(),
            product: device.product_id(),
            version: device.version(),
        }
    }

    /// Apply configuration overrides on top of this identity.
    pub fn with_override(mut self, overrides: &IdentityOverride) -> Self {
        if let Some(name) = &overrides.name {
            self.name = name.clone();
        }
        if let Some(bustype) = overrides.bustype {
            self.bustype = bustype;
        }
        if let Some(vendor) = overrides.vendor {
            self.vendor = vendor;
        }
        if let Some(product) = overrides.product {
            self.product = product;
        }
        if let Some(version) = overrides.version {
            self.version = version;
        }
        self
    }

    /// Stamp the identity onto a device under construction.
    pub fn apply_to(&self, device: &UninitDevice) {
        device.set_name(&self.name);
        device.set_bustype(self.bustype);
        device.set_vendor_id(self.vendor);
        device.set_product_id(self.product);
        device.set_version(self.version);
    }
}
