// Evquell Device Layer - Resolution
// Selector matching and non-blocking opens over /dev/input/event*

use std::fs::{self, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use evdev_rs::{Device, DeviceWrapper, GrabMode};

const INPUT_DIR: &str = "/dev/input";

/// Errors from resolving, opening or grabbing a source device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no input device matches `{0}`")]
    NotFound(String),

    #[error("scanning /dev/input: {0}")]
    Scan(#[source] std::io::Error),

    #[error("opening {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("grabbing {path}: {source}")]
    Grab {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An open event device plus the bits the dispatch loop needs: the raw fd
/// for the readiness wait and the path for diagnostics.
pub struct InputHandle {
    device: Device,
    path: PathBuf,
    fd: RawFd,
}

impl InputHandle {
    /// Open an event node read-only and non-blocking.
    ///
    /// Non-blocking matters: libevdev slurps whole bursts per read, and the
    /// drain loop relies on EAGAIN to find the end of a burst.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DeviceError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .map_err(|source| DeviceError::Open {
                path: path.clone(),
                source,
            })?;
        let fd = file.as_raw_fd();
        let device = Device::new_from_file(file).map_err(|source| DeviceError::Open {
            path: path.clone(),
            source,
        })?;
        Ok(Self { device, path, fd })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> String {
        self.device.name().unwrap_or("?").to_string()
    }
}

/// A filter device held under an exclusive kernel grab.
///
/// The grab is the one real lock in the system: while held, no other reader
/// sees the raw device. Drop releases it so no exit path, including a failed
/// clone right after a successful grab, leaves the device inaccessible.
pub struct GrabbedDevice {
    handle: InputHandle,
    grabbed: bool,
}

impl GrabbedDevice {
    pub fn grab(mut handle: InputHandle) -> Result<Self, DeviceError> {
        handle
            .device
            .grab(GrabMode::Grab)
            .map_err(|source| DeviceError::Grab {
                path: handle.path.clone(),
                source,
            })?;
        Ok(Self {
            handle,
            grabbed: true,
        })
    }

    pub fn device(&self) -> &Device {
        &self.handle.device
    }

    pub fn fd(&self) -> RawFd {
        self.handle.fd
    }

    pub fn path(&self) -> &Path {
        self.handle.path()
    }

    pub fn name(&self) -> String {
        self.handle.name()
    }

    /// Release the exclusive grab ahead of closing the descriptor.
    pub fn release(&mut self) -> Result<(), std::io::Error> {
        if self.grabbed {
            self.grabbed = false;
            self.handle.device.grab(GrabMode::Ungrab)
        } else {
            Ok(())
        }
    }
}

impl Drop for GrabbedDevice {
    fn drop(&mut self) {
        if self.grabbed {
            if let Err(err) = self.handle.device.grab(GrabMode::Ungrab) {
                log::warn!(
                    "releasing grab on {}: {}",
                    self.handle.path().display(),
                    err
                );
            }
        }
    }
}

/// Resolve a selector to an open device.
///
/// Absolute paths open directly; anything else is matched against device
/// names over the event nodes, first match in ascending node order winning.
pub fn resolve(selector: &str) -> Result<InputHandle, DeviceError> {
    if selector.starts_with('/') {
        return InputHandle::open(selector);
    }
    for path in event_nodes()? {
        // Nodes we cannot open (permissions, raced unplug) are not matches.
        let Ok(handle) = InputHandle::open(&path) else {
            continue;
        };
        if handle.name() == selector {
            return Ok(handle);
        }
    }
    Err(DeviceError::NotFound(selector.to_string()))
}

/// One row of `--list-devices` output.
#[derive(Debug, Clone)]
pub struct DeviceListing {
    pub path: PathBuf,
    pub name: String,
}

/// Enumerate openable event devices in ascending node order.
pub fn list_devices() -> Result<Vec<DeviceListing>, DeviceError> {
    let mut listings = Vec::new();
    for path in event_nodes()? {
        if let Ok(handle) = InputHandle::open(&path) {
            listings.push(DeviceListing {
                name: handle.name(),
                path,
            });
        }
    }
    Ok(listings)
}

fn event_nodes() -> Result<Vec<PathBuf>, DeviceError> {
    let mut nodes: Vec<PathBuf> = fs::read_dir(INPUT_DIR)
        .map_err(DeviceError::Scan)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("event"))
        })
        .collect();
    // event10 must sort after event9, so order by the numeric suffix
    nodes.sort_by_key(|path| {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.trim_start_matches("event").parse::<u32>().ok())
            .unwrap_or(u32::MAX)
    });
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_missing_name_reports_not_found() {
        match resolve("evquell test device that cannot exist") {
            Err(DeviceError::NotFound(name)) => {
                assert!(name.contains("cannot exist"));
            }
            // Environments without /dev/input surface a scan error instead.
            Err(DeviceError::Scan(_)) => {}
            other => panic!("unexpected result: {:?}", other.map(|h| h.name())),
        }
    }

    #[test]
    fn open_missing_path_reports_open_error() {
        match InputHandle::open("/dev/input/event-does-not-exist") {
            Err(DeviceError::Open { path, .. }) => {
                assert_eq!(path, PathBuf::from("/dev/input/event-does-not-exist"));
            }
            other => panic!("unexpected result: {:?}", other.map(|h| h.name())),
        }
    }

    #[test]
    fn list_devices_skips_gracefully_without_hardware() {
        // In CI there may be no event nodes or no permission to open them;
        // the listing must simply come back shorter, never fail per-node.
        match list_devices() {
            Ok(devices) => {
                for device in devices {
                    assert!(device.path.starts_with(INPUT_DIR));
                }
            }
            Err(DeviceError::Scan(_)) => {}
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
}
