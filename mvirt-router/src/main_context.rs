//! Requests that must run on the dataplane's main context.
//!
//! Interface flag changes are not safe from the namespace event thread, so
//! the sync bridge submits them here and the worker applies them between
//! batches. Requests are applied in submission order.

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, warn};

use crate::dataplane::Dataplane;
use crate::interface::{InterfaceFlags, InterfaceId};

/// An operation marshaled to the main context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainRequest {
    /// Set or clear ADMIN_UP, leaving every other flag bit as it is when the
    /// request is applied.
    SetAdminState { interface: InterfaceId, up: bool },
}

/// Submitting half, cloned into event contexts.
#[derive(Clone)]
pub struct MainHandle {
    tx: Sender<MainRequest>,
}

impl MainHandle {
    /// Queue `request`. Returns false once the main context is gone.
    pub fn submit(&self, request: MainRequest) -> bool {
        self.tx.send(request).is_ok()
    }
}

/// Receiving half, owned by the thread that runs main-context work.
pub struct MainContext {
    rx: Receiver<MainRequest>,
}

/// Create a connected handle/context pair.
pub fn main_context() -> (MainHandle, MainContext) {
    let (tx, rx) = unbounded();
    (MainHandle { tx }, MainContext { rx })
}

impl MainContext {
    /// Apply every queued request. Returns how many were applied.
    pub fn drain<D: Dataplane + ?Sized>(&self, dataplane: &D) -> usize {
        let mut count = 0;
        while let Ok(request) = self.rx.try_recv() {
            apply(dataplane, request);
            count += 1;
        }
        count
    }
}

fn apply<D: Dataplane + ?Sized>(dataplane: &D, request: MainRequest) {
    match request {
        MainRequest::SetAdminState { interface, up } => {
            let Some(flags) = dataplane.interface_flags(interface) else {
                warn!(%interface, "Interface vanished before flag change");
                return;
            };
            let flags = flags.with(InterfaceFlags::ADMIN_UP, up);
            match dataplane.set_interface_flags(interface, flags) {
                Ok(()) => debug!(%interface, up, "Admin state applied"),
                Err(e) => warn!(%interface, error = %e, "Failed to set admin state"),
            }
        }
    }
}
