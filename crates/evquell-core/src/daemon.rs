// Evquell Dispatch Loop
// Owns the three descriptors and drives monitoring, filtering and teardown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use evdev_rs::{ReadFlag, ReadStatus};

use crate::caps;
use crate::config::Config;
use crate::device::clone::{read_capabilities, CloneDevice, CloneError};
use crate::device::identity::DeviceIdentity;
use crate::device::resolve::{self, DeviceError, GrabbedDevice, InputHandle};
use crate::filter::{self, FilterState, Verdict};

/// Bounded readiness wait; also the upper bound on cancellation latency.
const WAIT_TIMEOUT_MS: i32 = 1000;

/// Fatal daemon errors. Nothing here is retried; each one ends the run.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("monitor device: {0}")]
    MonitorOpen(#[source] DeviceError),

    #[error("filter device: {0}")]
    FilterOpen(#[source] DeviceError),

    #[error("cloning filter device: {0}")]
    Clone(#[from] CloneError),

    #[error("waiting for events: {0}")]
    Wait(#[source] std::io::Error),

    #[error("reading monitor device: {0}")]
    MonitorRead(#[source] std::io::Error),

    #[error("reading filter device: {0}")]
    FilterRead(#[source] std::io::Error),

    #[error("writing to clone device: {0}")]
    CloneWrite(#[source] std::io::Error),

    #[error("{failed} teardown step(s) failed")]
    Teardown { failed: usize },
}

/// Everything one running instance owns: both source descriptors, the clone,
/// the rule sets and the debounce state. Single-threaded by design; the only
/// thing shared with the outside is the shutdown flag.
pub struct Daemon {
    idle: std::time::Duration,
    activity: caps::EventSet,
    suppress: caps::EventSet,
    state: FilterState,
    // Declaration order doubles as drop order: clone before the grab is
    // released, grab before the source descriptors close.
    clone: CloneDevice,
    filter: GrabbedDevice,
    monitor: InputHandle,
    shutdown: Arc<AtomicBool>,
}

impl Daemon {
    /// Open both devices, take the exclusive grab, and clone the filter
    /// device's capability surface.
    ///
    /// Failure after the grab succeeded releases it on the way out (drop on
    /// `GrabbedDevice`), so a failed clone never leaves the physical device
    /// unreadable for the rest of the system.
    pub fn new(config: &Config, shutdown: Arc<AtomicBool>) -> Result<Self, DaemonError> {
        let monitor = resolve::resolve(&config.monitor_device).map_err(DaemonError::MonitorOpen)?;
        log::info!(
            "monitoring {} ({})",
            monitor.name(),
            monitor.path().display()
        );

        let filter = resolve::resolve(&config.filter_device).map_err(DaemonError::FilterOpen)?;
        log::info!("filtering {} ({})", filter.name(), filter.path().display());
        let filter = GrabbedDevice::grab(filter).map_err(DaemonError::FilterOpen)?;

        let identity =
            DeviceIdentity::from_device(filter.device()).with_override(&config.clone_identity);
        let capabilities = read_capabilities(filter.device());
        let clone = CloneDevice::create(filter.device(), &identity, &capabilities)?;

        Ok(Self {
            idle: config.idle,
            activity: config.activity.clone(),
            suppress: config.suppress.clone(),
            state: FilterState::new(),
            clone,
            filter,
            monitor,
            shutdown,
        })
    }

    /// Run until cancellation or a fatal error, then tear down.
    ///
    /// A loop error takes precedence in the result; teardown still runs in
    /// full either way, and its own failures surface when the loop was clean.
    pub fn run(mut self) -> Result<(), DaemonError> {
        let outcome = self.dispatch();
        let teardown = self.teardown();
        outcome.and(teardown)
    }

    fn dispatch(&mut self) -> Result<(), DaemonError> {
        while !self.shutdown.load(Ordering::SeqCst) {
            let mut fds = [
                libc::pollfd {
                    fd: self.monitor.fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.filter.fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];

            let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, WAIT_TIMEOUT_MS) };
            if ret < 0 {
                let err = std::io::Error::last_os_error();
                // A signal landed outside the wait; the loop condition picks
                // the flag up now.
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(DaemonError::Wait(err));
            }
            if ret == 0 {
                // Timeout: nothing to service, re-check the flag promptly.
                continue;
            }

            let ready = |revents: libc::c_short| {
                revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0
            };

            // Filter device first when both woke us in the same poll.
            if ready(fds[1].revents) {
                self.service_filter()?;
            } else if ready(fds[0].revents) {
                self.service_monitor()?;
            }
        }
        log::info!("terminating");
        Ok(())
    }

    /// Drain the filter device, deciding each record as it is read.
    ///
    /// libevdev reads whole bursts off the descriptor, so stopping after one
    /// record would strand the rest of the burst (its synchronization record
    /// included) until the next wakeup.
    fn service_filter(&mut self) -> Result<(), DaemonError> {
        loop {
            let event = match self.filter.device().next_event(ReadFlag::NORMAL) {
                Ok((ReadStatus::Success, event)) => event,
                Ok((ReadStatus::Sync, event)) => {
                    log::warn!("filter device dropped events; continuing with resynced stream");
                    event
                }
                Err(err) if would_block(&err) => return Ok(()),
                Err(err) => return Err(DaemonError::FilterRead(err)),
            };

            // Codes outside the known tables can never match a rule set.
            let (ev_type, code) = caps::event_ids(&event.event_code).unwrap_or((u16::MAX, u16::MAX));
            let verdict = filter::decide(
                &mut self.state,
                Instant::now(),
                self.idle,
                &self.suppress,
                ev_type,
                code,
            );
            match verdict {
                Verdict::Drop => {
                    log::debug!("suppressed {:?} value {}", event.event_code, event.value);
                }
                Verdict::Forward => {
                    self.clone
                        .write(&event)
                        .map_err(DaemonError::CloneWrite)?;
                }
            }
        }
    }

    /// Drain the monitor device, feeding each record to the state machine.
    fn service_monitor(&mut self) -> Result<(), DaemonError> {
        loop {
            let event = match self.monitor.device().next_event(ReadFlag::NORMAL) {
                Ok((ReadStatus::Success, event)) => event,
                Ok((ReadStatus::Sync, event)) => {
                    log::warn!("monitor device dropped events; continuing with resynced stream");
                    event
                }
                Err(err) if would_block(&err) => return Ok(()),
                Err(err) => return Err(DaemonError::MonitorRead(err)),
            };

            let (ev_type, code) = caps::event_ids(&event.event_code).unwrap_or((u16::MAX, u16::MAX));
            let was_filtering = self.state.is_filtering();
            if filter::note_activity(
                &mut self.state,
                Instant::now(),
                &self.activity,
                ev_type,
                code,
            ) && !was_filtering
            {
                log::debug!("activity on {:?}, suppression armed", event.event_code);
            }
        }
    }

    /// Fixed-order teardown: destroy and close the clone, release the grab,
    /// close the filter, close the monitor. Every step is attempted; failures
    /// are logged and aggregated, never short-circuited.
    fn teardown(self) -> Result<(), DaemonError> {
        let Daemon {
            clone,
            mut filter,
            monitor,
            ..
        } = self;
        let mut failed = 0;

        log::debug!("destroying clone device");
        // libevdev issues device destruction before closing the descriptor.
        drop(clone);

        if let Err(err) = filter.release() {
            log::error!("releasing grab on {}: {}", filter.path().display(), err);
            failed += 1;
        }
        drop(filter);
        drop(monitor);

        if failed > 0 {
            Err(DaemonError::Teardown { failed })
        } else {
            Ok(())
        }
    }
}

/// Set up from configuration and run to completion.
pub fn run(config: &Config, shutdown: Arc<AtomicBool>) -> Result<(), DaemonError> {
    Daemon::new(config, shutdown)?.run()
}

fn would_block(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EAGAIN)
}
