//! Interface ↔ TAP mapping directory.
//!
//! Read on every packet by the injection nodes and on every namespace event
//! by the sync bridge, written only by the control plane. Both tables are
//! published through [`ArcSwap`] so readers never block: a reader sees a
//! whole snapshot, either before or after a given update.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;

use crate::interface::{InterfaceId, TapId};
use crate::protocol::ProtocolSet;

/// Forward entry for one dataplane interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceBinding {
    pub tap: Option<TapId>,
    pub protocols: ProtocolSet,
}

/// Reverse entry: host TAP ifindex → dataplane interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TapEntry {
    host_index: u32,
    interface: InterfaceId,
}

/// Bidirectional mapping between dataplane interfaces and host TAPs.
pub struct MappingDirectory {
    /// Indexed by interface id, grown on demand.
    bindings: ArcSwap<Vec<InterfaceBinding>>,
    /// Searched linearly, first match wins.
    taps: ArcSwap<Vec<TapEntry>>,
}

impl MappingDirectory {
    pub fn new() -> Self {
        Self {
            bindings: ArcSwap::new(Arc::new(Vec::new())),
            taps: ArcSwap::new(Arc::new(Vec::new())),
        }
    }

    /// Bind `interface` to `tap` with the given protocols.
    ///
    /// Previous reverse entries are left in place, so rebinding an interface
    /// to a new TAP keeps the old TAP's ifindex resolvable.
    pub fn bind(&self, interface: InterfaceId, tap: TapId, protocols: ProtocolSet) {
        self.bindings.rcu(|current| {
            let mut bindings = (**current).clone();
            if bindings.len() <= interface.index() {
                bindings.resize(interface.index() + 1, InterfaceBinding::default());
            }
            bindings[interface.index()] = InterfaceBinding {
                tap: Some(tap),
                protocols,
            };
            bindings
        });

        self.taps.rcu(|current| {
            let mut taps = (**current).clone();
            taps.push(TapEntry {
                host_index: tap.host_index,
                interface,
            });
            taps
        });

        debug!(%interface, tap = %tap.interface, host_index = tap.host_index, %protocols, "Bound interface");
    }

    /// Forward lookup. Out-of-range or never-bound interfaces are unbound.
    #[inline]
    pub fn lookup_by_interface(&self, interface: InterfaceId) -> InterfaceBinding {
        self.bindings
            .load()
            .get(interface.index())
            .copied()
            .unwrap_or_default()
    }

    /// Reverse lookup by host ifindex.
    pub fn lookup_by_tap(&self, host_index: u32) -> Option<InterfaceId> {
        self.taps
            .load()
            .iter()
            .find(|entry| entry.host_index == host_index)
            .map(|entry| entry.interface)
    }

    /// Clear the forward entry of `interface`, leaving reverse entries alone.
    pub fn reset(&self, interface: InterfaceId) {
        self.bindings.rcu(|current| {
            let mut bindings = (**current).clone();
            if let Some(binding) = bindings.get_mut(interface.index()) {
                *binding = InterfaceBinding::default();
            }
            bindings
        });
    }
}

impl Default for MappingDirectory {
    fn default() -> Self {
        Self::new()
    }
}
