// Evquell Device Layer - Cloning
// Replicates a source device's capability surface onto a uinput device

use evdev_rs::enums::{EventCode, EventType};
use evdev_rs::{Device, DeviceWrapper, EnableCodeData, InputEvent, UInputDevice, UninitDevice};

use crate::caps::{self, CapabilitySet, EV_TYPE_MAX};
use crate::device::identity::DeviceIdentity;

/// Errors while replicating a device onto its clone.
#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    #[error("allocating uinput device memory")]
    Alloc,

    #[error("enabling event type {ev_type:#x}: {source}")]
    EnableType {
        ev_type: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("enabling event code {ev_type:#x}/{code:#x}: {source}")]
    EnableCode {
        ev_type: u16,
        code: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("creating uinput device: {0}")]
    Create(#[source] std::io::Error),
}

/// Query the full declared capability surface of an open device.
///
/// Walks event types in ascending order and, under each table type, codes in
/// ascending order, so the resulting set enumerates exactly the way it is
/// later replayed onto the clone.
pub fn read_capabilities(device: &Device) -> CapabilitySet {
    let mut set = CapabilitySet::new();
    for ev_type in 0..=EV_TYPE_MAX {
        let Some(event_type) = caps::event_type_for(ev_type) else {
            continue;
        };
        if !device.has(event_type) {
            continue;
        }
        set.insert_type(ev_type);
        let Some(max) = caps::code_max(ev_type) else {
            continue;
        };
        for code in 0..=max {
            if let Some(event_code) = caps::event_code_for(ev_type, code) {
                if device.has(event_code) {
                    set.insert_code(ev_type, code);
                }
            }
        }
    }
    set
}

/// The live clone device receiving forwarded events.
pub struct CloneDevice {
    uinput: UInputDevice,
}

impl CloneDevice {
    /// Build a virtual device mirroring `capabilities` under `identity` and
    /// create its device node.
    ///
    /// Axis ranges for absolute codes are copied from `source`. On any
    /// failure the partially built device is torn down by drop before the
    /// error propagates; nothing is left registered with the kernel.
    pub fn create(
        source: &Device,
        identity: &DeviceIdentity,
        capabilities: &CapabilitySet,
    ) -> Result<Self, CloneError> {
        let template = UninitDevice::new().ok_or(CloneError::Alloc)?;
        identity.apply_to(&template);

        for ev_type in capabilities.types() {
            let Some(event_type) = caps::event_type_for(ev_type) else {
                continue;
            };
            template
                .enable(event_type)
                .map_err(|source| CloneError::EnableType { ev_type, source })?;

            for code in capabilities.codes(ev_type) {
                let Some(event_code) = caps::event_code_for(ev_type, code) else {
                    continue;
                };
                enable_code(&template, source, event_type, &event_code).map_err(|source| {
                    CloneError::EnableCode {
                        ev_type,
                        code,
                        source,
                    }
                })?;
            }
        }

        let uinput = UInputDevice::create_from_device(&template).map_err(CloneError::Create)?;
        if let Some(devnode) = uinput.devnode() {
            log::info!("clone device created at {devnode}");
        }
        Ok(Self { uinput })
    }

    /// Forward one record to the clone, fields untouched.
    pub fn write(&self, event: &InputEvent) -> Result<(), std::io::Error> {
        self.uinput.write_event(event)
    }

    pub fn devnode(&self) -> Option<&str> {
        self.uinput.devnode()
    }
}

/// Absolute axes need their range data alongside the capability bit; every
/// other table code is a bare bit.
fn enable_code(
    template: &UninitDevice,
    source: &Device,
    event_type: EventType,
    event_code: &EventCode,
) -> Result<(), std::io::Error> {
    if event_type == EventType::EV_ABS {
        if let Some(abs_info) = source.abs_info(event_code) {
            return template.enable_event_code(event_code, Some(EnableCodeData::AbsInfo(abs_info)));
        }
    }
    template.enable(event_code.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::CapabilitySet;

    const EV_KEY: u16 = 1;
    const EV_REL: u16 = 2;
    const EV_MSC: u16 = 4;

    // A source exposing {EV_KEY: {BTN_LEFT, BTN_RIGHT}, EV_REL: {X, Y},
    // EV_MSC: {SCAN}} must produce exactly that shape, with EV_SYN implied.
    fn mouse_caps() -> CapabilitySet {
        let mut set = CapabilitySet::new();
        set.insert_code(EV_KEY, 272);
        set.insert_code(EV_KEY, 273);
        set.insert_code(EV_REL, 0);
        set.insert_code(EV_REL, 1);
        set.insert_code(EV_MSC, 4);
        set
    }

    #[test]
    fn capability_shape_matches_source_exactly() {
        let caps = mouse_caps();
        assert_eq!(
            caps.types().collect::<Vec<_>>(),
            vec![0, EV_KEY, EV_REL, EV_MSC]
        );
        assert_eq!(caps.codes(EV_KEY).collect::<Vec<_>>(), vec![272, 273]);
        assert_eq!(caps.codes(EV_REL).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(caps.codes(EV_MSC).collect::<Vec<_>>(), vec![4]);
        assert!(!caps.supports_code(EV_KEY, 274));
        assert!(!caps.supports_type(3));
    }

    #[test]
    fn replication_enumerates_in_ascending_order() {
        let caps = mouse_caps();
        let mut pairs = Vec::new();
        for ev_type in caps.types() {
            for code in caps.codes(ev_type) {
                pairs.push((ev_type, code));
            }
        }
        let mut sorted = pairs.clone();
        sorted.sort_unstable();
        assert_eq!(pairs, sorted);
    }

    #[test]
    fn clone_against_real_uinput_if_available() {
        // Exercises the full replication path. Needs an event node and
        // /dev/uinput access, so it degrades to a no-op elsewhere.
        let Ok(handle) = crate::device::resolve::InputHandle::open("/dev/input/event0") else {
            eprintln!("skipping: no /dev/input/event0");
            return;
        };
        let identity = DeviceIdentity::from_device(handle.device());
        let caps = read_capabilities(handle.device());
        match CloneDevice::create(handle.device(), &identity, &caps) {
            Ok(clone) => assert!(clone.devnode().is_some()),
            Err(err) => eprintln!("skipping: uinput unavailable ({err})"),
        }
    }
}
