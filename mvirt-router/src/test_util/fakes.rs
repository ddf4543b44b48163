//! Fakes for the host-facing seams.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::dataplane::Dataplane;
use crate::error::{Error, ProvisionError, Result};
use crate::interface::{InterfaceFlags, InterfaceId, TapId};
use crate::netns::NamespaceSource;
use crate::provision::TapProvisioner;

/// First host ifindex handed out by [`RecordingProvisioner`].
pub const FIRST_HOST_INDEX: u32 = 100;

/// Provisioner that wires the dataplane side like the real one but never
/// touches the host. Host ifindexes are allocated from [`FIRST_HOST_INDEX`].
pub struct RecordingProvisioner<D> {
    dataplane: Arc<D>,
    next_host_index: AtomicUsize,
    fail_next: AtomicBool,
    provisioned: Mutex<Vec<TapId>>,
    released: Mutex<Vec<TapId>>,
}

impl<D: Dataplane> RecordingProvisioner<D> {
    pub fn new(dataplane: Arc<D>) -> Self {
        Self {
            dataplane,
            next_host_index: AtomicUsize::new(FIRST_HOST_INDEX as usize),
            fail_next: AtomicBool::new(false),
            provisioned: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
        }
    }

    /// Make the next `provision` call fail.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn provisioned(&self) -> Vec<TapId> {
        self.provisioned.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<TapId> {
        self.released.lock().unwrap().clone()
    }
}

impl<D: Dataplane> TapProvisioner for RecordingProvisioner<D> {
    fn provision(&self, name: &str, interface: InterfaceId) -> std::result::Result<TapId, ProvisionError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ProvisionError::Create(
                name.to_string(),
                io::Error::other("injected failure"),
            ));
        }

        let mac = self
            .dataplane
            .hardware_address(interface)
            .ok_or(ProvisionError::NoHardwareAddress(interface))?;
        let host_index = self.next_host_index.fetch_add(1, Ordering::SeqCst) as u32;
        let tap = self
            .dataplane
            .create_tap_interface(name, host_index, mac)
            .map_err(|e| ProvisionError::Attach(name.to_string(), e))?;
        self.dataplane
            .set_l2_xconnect(tap, interface)
            .map_err(|e| ProvisionError::Xconnect(name.to_string(), e))?;
        self.dataplane
            .set_interface_flags(tap, InterfaceFlags::ADMIN_UP)
            .map_err(|e| ProvisionError::AdminUp(name.to_string(), e))?;

        let tap = TapId {
            interface: tap,
            host_index,
        };
        self.provisioned.lock().unwrap().push(tap);
        Ok(tap)
    }

    fn release(&self, tap: TapId) {
        let _ = self.dataplane.delete_interface(tap.interface);
        self.released.lock().unwrap().push(tap);
    }
}

/// Namespace source that only counts how often it was opened.
#[derive(Clone, Default)]
pub struct RecordingNamespace {
    opens: Arc<AtomicUsize>,
    fail: bool,
}

impl RecordingNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose `open` always fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl NamespaceSource for RecordingNamespace {
    fn open(&self) -> Result<()> {
        if self.fail {
            return Err(Error::Netlink("namespace unavailable".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
