//! Injection engine integration tests.
//!
//! Binds a dataplane interface to a recorded TAP through the control path
//! and runs frames through the injection nodes, without CAP_NET_ADMIN.

use std::net::Ipv4Addr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use mvirt_router::hooks::InputHooks;
use mvirt_router::test_util::{
    IP_PROTO_OSPF, PEER_MAC, ROUTER_MAC, RecordingNamespace, RecordingProvisioner, arp_frame,
    ipv4_frame, test_dataplane,
};
use mvirt_router::{
    DataplaneState, InjectCounters, InjectMode, InjectNode, InjectRequest, InterfaceId,
    MappingDirectory, NextNode, PacketBuffer, TapId, TapInject,
};
use smoltcp::wire::{ArpOperation, IpProtocol};

const ETH0: InterfaceId = InterfaceId(1);
const ETH1: InterfaceId = InterfaceId(2);

const ROUTER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const PEER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);

struct Harness {
    dataplane: Arc<DataplaneState>,
    directory: Arc<MappingDirectory>,
    counters: Arc<InjectCounters>,
    router: TapInject<DataplaneState, RecordingProvisioner<DataplaneState>>,
}

impl Harness {
    fn new() -> Self {
        let dataplane = test_dataplane();
        let directory = Arc::new(MappingDirectory::new());
        let router = TapInject::new(
            Arc::clone(&directory),
            Arc::clone(&dataplane),
            Arc::new(ArcSwap::from_pointee(InputHooks::default())),
            RecordingProvisioner::new(Arc::clone(&dataplane)),
            Box::new(RecordingNamespace::new()),
        );
        Self {
            dataplane,
            directory,
            counters: Arc::new(InjectCounters::new()),
            router,
        }
    }

    fn enable(&self, protocols: &str, interface: InterfaceId, tap: &str) -> TapId {
        let request = InjectRequest::new(protocols.parse().unwrap(), interface, tap);
        self.router.enable(&request).expect("enable tap inject")
    }

    fn node(&self, mode: InjectMode) -> InjectNode<DataplaneState> {
        InjectNode::new(
            mode,
            Arc::clone(&self.directory),
            Arc::clone(&self.dataplane),
            Arc::clone(&self.counters),
        )
    }
}

fn arp_reply_from_peer() -> Vec<u8> {
    arp_frame(ArpOperation::Reply, PEER_MAC, ROUTER_MAC, PEER_IP, ROUTER_IP)
}

fn ip_to_router(protocol: IpProtocol) -> Vec<u8> {
    ipv4_frame(PEER_MAC, ROUTER_MAC, PEER_IP, ROUTER_IP, protocol, &[0u8; 8])
}

/// Whatever the packet carries, an unbound interface goes to the untapped
/// destination of each node.
#[test]
fn test_unbound_interface_is_untapped() {
    let h = Harness::new();
    h.enable("arp,icmp4,igmp4,ospf2,tcp,udp", ETH1, "vpp1");

    let frames = [
        arp_reply_from_peer(),
        arp_frame(ArpOperation::Request, PEER_MAC, [0xff; 6], PEER_IP, ROUTER_IP),
        ip_to_router(IpProtocol::Icmp),
        ip_to_router(IpProtocol::Tcp),
        ip_to_router(IpProtocol::Udp),
        ip_to_router(IpProtocol::Unknown(IP_PROTO_OSPF)),
        vec![0xde, 0xad, 0xbe, 0xef],
    ];

    for mode in InjectMode::ALL {
        let node = h.node(mode);
        let mut batch: Vec<PacketBuffer> = frames
            .iter()
            .map(|f| PacketBuffer::after_ethernet(ETH0, f))
            .collect();
        let next = node.process(&mut batch);

        assert!(next.iter().all(|n| *n == mode.untapped()), "{mode:?}: {next:?}");
        assert!(batch.iter().all(|p| p.tx.is_none()));
        assert_eq!(h.counters.get(mode), 0, "{}", mode.counter_name());
    }
}

/// A valid reply is learned and handed to the TAP as a full L2 frame.
#[test]
fn test_arp_reply_learned_and_injected() {
    let h = Harness::new();
    let tap = h.enable("arp", ETH0, "vpp0");

    let frame = arp_reply_from_peer();
    let mut batch = vec![PacketBuffer::after_ethernet(ETH0, &frame)];
    let next = h.node(InjectMode::Arp).process(&mut batch);

    assert_eq!(next, vec![NextNode::InterfaceOutput]);
    assert_eq!(h.dataplane.neighbor(ETH0, PEER_IP), Some(PEER_MAC));

    let packet = &batch[0];
    assert_eq!(packet.tx, Some(tap.interface));
    assert_eq!(packet.start, 0);
    assert_eq!(packet.len, frame.len());
    assert_eq!(packet.data(), &frame[..]);

    assert_eq!(h.counters.get(InjectMode::Arp), 1);
    assert_eq!(h.counters.snapshot()[0], ("Inject ARP", 1));
}

/// ARP requests are diverted but never teach the neighbor table.
#[test]
fn test_arp_request_injected_without_learning() {
    let h = Harness::new();
    h.enable("arp", ETH0, "vpp0");

    let frame = arp_frame(ArpOperation::Request, PEER_MAC, [0xff; 6], PEER_IP, ROUTER_IP);
    let mut batch = vec![PacketBuffer::after_ethernet(ETH0, &frame)];
    let next = h.node(InjectMode::Arp).process(&mut batch);

    assert_eq!(next, vec![NextNode::InterfaceOutput]);
    assert_eq!(h.dataplane.neighbor(ETH0, PEER_IP), None);
}

#[test]
fn test_icmp_follows_protocol_set() {
    let h = Harness::new();
    h.enable("arp", ETH0, "vpp0");
    let tap = h.enable("arp,icmp4", ETH1, "vpp1");

    let frame = ip_to_router(IpProtocol::Icmp);
    let mut batch = vec![
        PacketBuffer::after_ethernet(ETH0, &frame),
        PacketBuffer::after_ethernet(ETH1, &frame),
    ];
    let next = h.node(InjectMode::Icmp4).process(&mut batch);

    assert_eq!(next, vec![NextNode::Icmp4Input, NextNode::InterfaceOutput]);
    assert_eq!(batch[0].tx, None);
    assert_eq!(batch[1].tx, Some(tap.interface));
    assert_eq!(h.counters.get(InjectMode::Icmp4), 1);
}

/// Classified packets either match a bound protocol or are dropped.
#[test]
fn test_classified_divert_or_drop() {
    let h = Harness::new();
    let tap = h.enable("arp,icmp4,igmp4,ospf2", ETH0, "vpp0");

    let protocols = [
        (IpProtocol::Unknown(IP_PROTO_OSPF), NextNode::InterfaceOutput),
        (IpProtocol::Igmp, NextNode::InterfaceOutput),
        (IpProtocol::Tcp, NextNode::Drop),
        (IpProtocol::Udp, NextNode::Drop),
        (IpProtocol::Unknown(47), NextNode::Drop),
    ];

    let mut batch: Vec<PacketBuffer> = protocols
        .iter()
        .map(|(p, _)| PacketBuffer::after_ethernet(ETH0, &ip_to_router(*p)))
        .collect();
    let next = h.node(InjectMode::Classified).process(&mut batch);

    let expected: Vec<NextNode> = protocols.iter().map(|(_, n)| *n).collect();
    assert_eq!(next, expected);
    assert_eq!(batch[0].tx, Some(tap.interface));
    assert_eq!(h.counters.get(InjectMode::Classified), 2);
    assert_eq!(h.counters.get(InjectMode::Arp), 0);
}

/// Counters accumulate across batches.
#[test]
fn test_counters_accumulate() {
    let h = Harness::new();
    h.enable("arp,icmp4,tcp", ETH0, "vpp0");
    let node = h.node(InjectMode::Classified);

    for _ in 0..3 {
        let mut batch = vec![
            PacketBuffer::after_ethernet(ETH0, &ip_to_router(IpProtocol::Tcp)),
            PacketBuffer::after_ethernet(ETH0, &ip_to_router(IpProtocol::Tcp)),
        ];
        node.process(&mut batch);
    }

    assert_eq!(h.counters.get(InjectMode::Classified), 6);
}
