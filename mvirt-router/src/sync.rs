//! Host namespace → dataplane synchronization.
//!
//! The host routing daemon configures addresses, routes and link state on
//! the TAP devices. [`SyncBridge`] translates each change onto the dataplane
//! interface paired with the TAP. Events for devices that are not paired
//! TAPs are ignored.

use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnet::Ipv4Net;
use tracing::{debug, trace, warn};

use crate::dataplane::{Dataplane, Ipv4Route};
use crate::directory::MappingDirectory;
use crate::main_context::{MainHandle, MainRequest};

/// The host's main routing table.
pub const MAIN_TABLE: u32 = 254;

/// Host link flag for administratively up.
pub const HOST_IFF_UP: u32 = nix::libc::IFF_UP as u32;

/// Whether the host object appeared/changed or went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Add,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressEvent {
    pub host_index: u32,
    /// Local address with its prefix length.
    pub address: Ipv4Net,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEvent {
    pub destination: Ipv4Net,
    pub gateway: Option<Ipv4Addr>,
    /// Host ifindex of the output device.
    pub output: u32,
    pub table: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEvent {
    pub host_index: u32,
    /// Host `IFF_*` flags after the change.
    pub flags: u32,
}

/// A change observed in the host namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceEvent {
    Address(Change, AddressEvent),
    Route(Change, RouteEvent),
    /// Link deletions are treated like changes: the carried flags decide.
    Link(Change, LinkEvent),
}

/// What the bridge did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Applied to the dataplane directly.
    Applied,
    /// Queued for the main context.
    Submitted,
    /// Not a paired TAP, not the main table, or the dataplane refused.
    Ignored,
}

/// Mirrors host namespace changes on paired TAPs into the dataplane.
pub struct SyncBridge<D> {
    directory: Arc<MappingDirectory>,
    dataplane: Arc<D>,
    main: MainHandle,
}

impl<D: Dataplane> SyncBridge<D> {
    pub fn new(directory: Arc<MappingDirectory>, dataplane: Arc<D>, main: MainHandle) -> Self {
        Self {
            directory,
            dataplane,
            main,
        }
    }

    /// Handle one event. Events must be fed in delivery order.
    pub fn handle(&self, event: &NamespaceEvent) -> Disposition {
        match *event {
            NamespaceEvent::Address(change, address) => self.address(change, address),
            NamespaceEvent::Route(change, route) => self.route(change, route),
            NamespaceEvent::Link(_, link) => self.link(link),
        }
    }

    fn address(&self, change: Change, event: AddressEvent) -> Disposition {
        let Some(interface) = self.directory.lookup_by_tap(event.host_index) else {
            trace!(host_index = event.host_index, "Address event for unpaired device");
            return Disposition::Ignored;
        };

        let result = match change {
            Change::Add => self.dataplane.add_address(interface, event.address),
            Change::Delete => self.dataplane.remove_address(interface, event.address),
        };
        match result {
            Ok(()) => {
                debug!(%interface, address = %event.address, ?change, "Mirrored host address");
                Disposition::Applied
            }
            Err(e) => {
                warn!(%interface, address = %event.address, error = %e, "Failed to mirror host address");
                Disposition::Ignored
            }
        }
    }

    fn route(&self, change: Change, event: RouteEvent) -> Disposition {
        let Some(interface) = self.directory.lookup_by_tap(event.output) else {
            trace!(output = event.output, "Route event for unpaired device");
            return Disposition::Ignored;
        };
        if event.table != MAIN_TABLE {
            trace!(table = event.table, destination = %event.destination, "Route outside main table");
            return Disposition::Ignored;
        }

        let route = Ipv4Route {
            destination: event.destination,
            gateway: event.gateway,
            interface,
        };
        let result = match change {
            Change::Add => self.dataplane.add_route(&route),
            Change::Delete => self.dataplane.remove_route(&route),
        };
        match result {
            Ok(()) => {
                debug!(%interface, destination = %event.destination, gateway = ?event.gateway, ?change, "Mirrored host route");
                Disposition::Applied
            }
            Err(e) => {
                warn!(%interface, destination = %event.destination, error = %e, "Failed to mirror host route");
                Disposition::Ignored
            }
        }
    }

    fn link(&self, event: LinkEvent) -> Disposition {
        let Some(interface) = self.directory.lookup_by_tap(event.host_index) else {
            trace!(host_index = event.host_index, "Link event for unpaired device");
            return Disposition::Ignored;
        };

        let up = event.flags & HOST_IFF_UP != 0;
        if self.main.submit(MainRequest::SetAdminState { interface, up }) {
            debug!(%interface, up, "Queued admin state change");
            Disposition::Submitted
        } else {
            warn!(%interface, "Main context gone, dropping admin state change");
            Disposition::Ignored
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::DataplaneState;
    use crate::interface::{InterfaceFlags, InterfaceId, TapId};
    use crate::main_context::{MainContext, main_context};
    use crate::protocol::{Protocol, ProtocolSet};

    const TAP_HOST: u32 = 40;

    fn setup() -> (SyncBridge<DataplaneState>, Arc<DataplaneState>, MainContext) {
        let dp = Arc::new(DataplaneState::new());
        dp.add_interface(InterfaceId(1), "eth0", [2, 0, 0, 0, 0, 1], InterfaceFlags::PUNT)
            .unwrap();
        let dir = Arc::new(MappingDirectory::new());
        dir.bind(
            InterfaceId(1),
            TapId {
                interface: InterfaceId(9),
                host_index: TAP_HOST,
            },
            ProtocolSet::empty().with(Protocol::Arp),
        );
        let (handle, ctx) = main_context();
        (SyncBridge::new(dir, dp.clone(), handle), dp, ctx)
    }

    fn route(table: u32, output: u32) -> RouteEvent {
        RouteEvent {
            destination: "192.168.0.0/16".parse().unwrap(),
            gateway: Some(Ipv4Addr::new(10, 0, 0, 2)),
            output,
            table,
        }
    }

    #[test]
    fn test_address_add_and_delete() {
        let (bridge, dp, _ctx) = setup();
        let event = AddressEvent {
            host_index: TAP_HOST,
            address: "10.0.0.1/24".parse().unwrap(),
        };
        assert_eq!(
            bridge.handle(&NamespaceEvent::Address(Change::Add, event)),
            Disposition::Applied
        );
        assert_eq!(dp.interface_addresses(InterfaceId(1)), vec![event.address]);

        assert_eq!(
            bridge.handle(&NamespaceEvent::Address(Change::Delete, event)),
            Disposition::Applied
        );
        assert!(dp.interface_addresses(InterfaceId(1)).is_empty());
    }

    #[test]
    fn test_unpaired_device_ignored() {
        let (bridge, dp, ctx) = setup();
        let address = AddressEvent {
            host_index: 3,
            address: "10.0.0.1/24".parse().unwrap(),
        };
        assert_eq!(
            bridge.handle(&NamespaceEvent::Address(Change::Add, address)),
            Disposition::Ignored
        );
        assert_eq!(
            bridge.handle(&NamespaceEvent::Route(Change::Add, route(MAIN_TABLE, 3))),
            Disposition::Ignored
        );
        assert_eq!(
            bridge.handle(&NamespaceEvent::Link(
                Change::Add,
                LinkEvent {
                    host_index: 3,
                    flags: HOST_IFF_UP,
                }
            )),
            Disposition::Ignored
        );
        assert!(dp.interface_addresses(InterfaceId(1)).is_empty());
        assert_eq!(ctx.drain(dp.as_ref()), 0);
    }

    #[test]
    fn test_route_only_from_main_table() {
        let (bridge, dp, _ctx) = setup();
        assert_eq!(
            bridge.handle(&NamespaceEvent::Route(Change::Add, route(100, TAP_HOST))),
            Disposition::Ignored
        );
        assert!(dp.route("192.168.0.0/16".parse().unwrap()).is_none());

        assert_eq!(
            bridge.handle(&NamespaceEvent::Route(Change::Add, route(MAIN_TABLE, TAP_HOST))),
            Disposition::Applied
        );
        let hops = dp.route("192.168.0.0/16".parse().unwrap()).unwrap();
        assert_eq!(hops[0].interface, InterfaceId(1));
        assert_eq!(hops[0].gateway, Some(Ipv4Addr::new(10, 0, 0, 2)));

        assert_eq!(
            bridge.handle(&NamespaceEvent::Route(Change::Delete, route(MAIN_TABLE, TAP_HOST))),
            Disposition::Applied
        );
        assert!(dp.route("192.168.0.0/16".parse().unwrap()).is_none());
    }

    #[test]
    fn test_link_marshaled_to_main_context() {
        let (bridge, dp, ctx) = setup();
        let up = LinkEvent {
            host_index: TAP_HOST,
            flags: HOST_IFF_UP | nix::libc::IFF_RUNNING as u32,
        };
        assert_eq!(
            bridge.handle(&NamespaceEvent::Link(Change::Add, up)),
            Disposition::Submitted
        );
        // Applied only when the main context runs
        assert!(!dp.interface_flags(InterfaceId(1)).unwrap().is_admin_up());
        assert_eq!(ctx.drain(dp.as_ref()), 1);
        let flags = dp.interface_flags(InterfaceId(1)).unwrap();
        assert!(flags.is_admin_up());
        assert!(flags.contains(InterfaceFlags::PUNT));

        let down = LinkEvent {
            host_index: TAP_HOST,
            flags: 0,
        };
        bridge.handle(&NamespaceEvent::Link(Change::Delete, down));
        ctx.drain(dp.as_ref());
        let flags = dp.interface_flags(InterfaceId(1)).unwrap();
        assert!(!flags.is_admin_up());
        assert!(flags.contains(InterfaceFlags::PUNT));
    }
}
