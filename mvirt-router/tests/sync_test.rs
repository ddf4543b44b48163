//! Host namespace synchronization tests.
//!
//! Pairs a dataplane interface with a recorded TAP through the control path
//! and feeds the bridge the events the namespace watcher would deliver.

use std::net::Ipv4Addr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use ipnet::Ipv4Net;
use mvirt_router::dataplane::NextHop;
use mvirt_router::hooks::InputHooks;
use mvirt_router::main_context::{MainContext, main_context};
use mvirt_router::sync::{
    AddressEvent, Change, Disposition, HOST_IFF_UP, LinkEvent, MAIN_TABLE, RouteEvent,
};
use mvirt_router::test_util::{
    FIRST_HOST_INDEX, RecordingNamespace, RecordingProvisioner, test_dataplane,
};
use mvirt_router::{
    Dataplane, DataplaneState, InjectRequest, InterfaceFlags, InterfaceId, MappingDirectory,
    NamespaceEvent, ProtocolSet, SyncBridge, TapId, TapInject,
};

const ETH0: InterfaceId = InterfaceId(1);
const ETH1: InterfaceId = InterfaceId(2);
const GATEWAY: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

struct Harness {
    dataplane: Arc<DataplaneState>,
    directory: Arc<MappingDirectory>,
    bridge: SyncBridge<DataplaneState>,
    main: MainContext,
    tap: TapId,
}

/// eth0 paired with a TAP at host index [`FIRST_HOST_INDEX`].
fn setup() -> Harness {
    let dataplane = test_dataplane();
    let directory = Arc::new(MappingDirectory::new());
    let router = TapInject::new(
        Arc::clone(&directory),
        Arc::clone(&dataplane),
        Arc::new(ArcSwap::from_pointee(InputHooks::default())),
        RecordingProvisioner::new(Arc::clone(&dataplane)),
        Box::new(RecordingNamespace::new()),
    );
    let protocols: ProtocolSet = "arp,icmp4,igmp4,ospf2".parse().unwrap();
    let tap = router
        .enable(&InjectRequest::new(protocols, ETH0, "vpp0"))
        .unwrap();
    assert_eq!(tap.host_index, FIRST_HOST_INDEX);

    let (handle, main) = main_context();
    let bridge = SyncBridge::new(Arc::clone(&directory), Arc::clone(&dataplane), handle);
    Harness {
        dataplane,
        directory,
        bridge,
        main,
        tap,
    }
}

fn route(output: u32, table: u32) -> RouteEvent {
    RouteEvent {
        destination: "172.16.0.0/12".parse().unwrap(),
        gateway: Some(GATEWAY),
        output,
        table,
    }
}

#[test]
fn test_bind_lookup_round_trip() {
    let h = setup();
    let binding = h.directory.lookup_by_interface(ETH0);
    assert_eq!(binding.tap, Some(h.tap));
    assert_eq!(binding.protocols.to_string(), "arp,icmp4,igmp4,ospf2");
    assert_eq!(h.directory.lookup_by_tap(h.tap.host_index), Some(ETH0));

    assert_eq!(h.directory.lookup_by_interface(ETH1).tap, None);
    assert!(h.directory.lookup_by_interface(ETH1).protocols.is_empty());
}

#[test]
fn test_address_mirrored() {
    let h = setup();
    let address: Ipv4Net = "10.0.0.77/24".parse().unwrap();
    let event = AddressEvent {
        host_index: h.tap.host_index,
        address,
    };

    let applied = h.bridge.handle(&NamespaceEvent::Address(Change::Add, event));
    assert_eq!(applied, Disposition::Applied);
    assert!(h.dataplane.interface_addresses(ETH0).contains(&address));

    let removed = h.bridge.handle(&NamespaceEvent::Address(Change::Delete, event));
    assert_eq!(removed, Disposition::Applied);
    assert!(!h.dataplane.interface_addresses(ETH0).contains(&address));
}

#[test]
fn test_unpaired_device_ignored() {
    let h = setup();
    let event = NamespaceEvent::Address(
        Change::Add,
        AddressEvent {
            host_index: 1,
            address: "10.9.9.9/24".parse().unwrap(),
        },
    );
    assert_eq!(h.bridge.handle(&event), Disposition::Ignored);
    assert_eq!(
        h.bridge.handle(&NamespaceEvent::Route(Change::Add, route(1, MAIN_TABLE))),
        Disposition::Ignored
    );
}

#[test]
fn test_main_table_route_mirrored() {
    let h = setup();
    let event = route(h.tap.host_index, MAIN_TABLE);

    assert_eq!(
        h.bridge.handle(&NamespaceEvent::Route(Change::Add, event)),
        Disposition::Applied
    );
    assert_eq!(
        h.dataplane.route(event.destination),
        Some(vec![NextHop {
            gateway: Some(GATEWAY),
            interface: ETH0,
        }])
    );

    assert_eq!(
        h.bridge.handle(&NamespaceEvent::Route(Change::Delete, event)),
        Disposition::Applied
    );
    assert_eq!(h.dataplane.route(event.destination), None);
}

#[test]
fn test_other_table_route_ignored() {
    let h = setup();
    let event = route(h.tap.host_index, 100);

    assert_eq!(
        h.bridge.handle(&NamespaceEvent::Route(Change::Add, event)),
        Disposition::Ignored
    );
    assert_eq!(h.dataplane.route(event.destination), None);
}

/// Link changes only take effect once the main context drains, and only
/// the admin-up bit moves.
#[test]
fn test_link_up_preserves_other_flags() {
    let h = setup();
    h.dataplane
        .set_interface_flags(ETH0, InterfaceFlags::PROMISCUOUS)
        .unwrap();

    let event = NamespaceEvent::Link(
        Change::Add,
        LinkEvent {
            host_index: h.tap.host_index,
            flags: HOST_IFF_UP,
        },
    );
    assert_eq!(h.bridge.handle(&event), Disposition::Submitted);
    assert_eq!(
        h.dataplane.interface_flags(ETH0),
        Some(InterfaceFlags::PROMISCUOUS)
    );

    assert_eq!(h.main.drain(h.dataplane.as_ref()), 1);
    assert_eq!(
        h.dataplane.interface_flags(ETH0),
        Some(InterfaceFlags::PROMISCUOUS | InterfaceFlags::ADMIN_UP)
    );

    let down = NamespaceEvent::Link(
        Change::Add,
        LinkEvent {
            host_index: h.tap.host_index,
            flags: 0,
        },
    );
    h.bridge.handle(&down);
    h.main.drain(h.dataplane.as_ref());
    assert_eq!(
        h.dataplane.interface_flags(ETH0),
        Some(InterfaceFlags::PROMISCUOUS)
    );
}

/// Rebinding leaves the old TAP resolving to the interface.
#[test]
fn test_rebind_keeps_stale_reverse_entry() {
    let h = setup();
    let replacement = TapId {
        interface: InterfaceId(42),
        host_index: 200,
    };
    h.directory
        .bind(ETH0, replacement, "arp".parse().unwrap());

    assert_eq!(h.directory.lookup_by_interface(ETH0).tap, Some(replacement));
    assert_eq!(h.directory.lookup_by_tap(200), Some(ETH0));
    assert_eq!(h.directory.lookup_by_tap(h.tap.host_index), Some(ETH0));

    let event = AddressEvent {
        host_index: h.tap.host_index,
        address: "10.0.0.78/24".parse().unwrap(),
    };
    assert_eq!(
        h.bridge.handle(&NamespaceEvent::Address(Change::Add, event)),
        Disposition::Applied
    );
}
