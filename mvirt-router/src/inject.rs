//! Packet injection nodes.
//!
//! Three nodes sit on the dataplane's input paths, one per [`InjectMode`].
//! For each packet in a batch a node decides between diverting the packet to
//! the paired host TAP (re-exposing the Ethernet header and handing it to
//! interface output) and letting it continue to the node that would have
//! handled it had tap-inject not been hooked in.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use smoltcp::wire::{IpProtocol, Ipv4Packet};
use tracing::{debug, trace, warn};

use crate::arp::{self, ArpVerdict};
use crate::dataplane::Dataplane;
use crate::directory::{InterfaceBinding, MappingDirectory};
use crate::interface::TapId;
use crate::packet::{ETH_HEADER_LEN, PacketBuffer};
use crate::protocol::Protocol;

/// Which input path a node is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InjectMode {
    /// ARP after ethernet input.
    Arp,
    /// ICMPv4 after IPv4 local delivery.
    Icmp4,
    /// OSPF, TCP, UDP and link-local multicast (IGMP) traffic.
    Classified,
}

impl InjectMode {
    pub const ALL: [InjectMode; 3] = [InjectMode::Arp, InjectMode::Icmp4, InjectMode::Classified];

    pub fn node_name(self) -> &'static str {
        match self {
            InjectMode::Arp => "tap-inject-arp",
            InjectMode::Icmp4 => "tap-inject-icmp",
            InjectMode::Classified => "tap-inject-classified",
        }
    }

    pub fn counter_name(self) -> &'static str {
        match self {
            InjectMode::Arp => "Inject ARP",
            InjectMode::Icmp4 => "Inject ICMP",
            InjectMode::Classified => "Inject Classified",
        }
    }

    /// Where packets go when they are not diverted.
    pub fn untapped(self) -> NextNode {
        match self {
            InjectMode::Arp => NextNode::ArpInput,
            InjectMode::Icmp4 => NextNode::Icmp4Input,
            InjectMode::Classified => NextNode::Drop,
        }
    }

    /// Index of this mode in [`InjectMode::ALL`].
    pub(crate) fn slot(self) -> usize {
        match self {
            InjectMode::Arp => 0,
            InjectMode::Icmp4 => 1,
            InjectMode::Classified => 2,
        }
    }
}

/// Successor chosen for a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NextNode {
    /// Diverted: transmit on `PacketBuffer::tx`.
    InterfaceOutput,
    ArpInput,
    Icmp4Input,
    Drop,
}

/// Per-mode count of diverted packets.
#[derive(Debug, Default)]
pub struct InjectCounters {
    injected: [AtomicU64; 3],
}

impl InjectCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, mode: InjectMode, n: u64) {
        self.injected[mode.slot()].fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, mode: InjectMode) -> u64 {
        self.injected[mode.slot()].load(Ordering::Relaxed)
    }

    /// Counter values keyed by their display names.
    pub fn snapshot(&self) -> [(&'static str, u64); 3] {
        InjectMode::ALL.map(|mode| (mode.counter_name(), self.get(mode)))
    }
}

/// Protocol bit for an IPv4 packet reaching the classified node.
fn classify(l3: &[u8]) -> Option<Protocol> {
    let packet = Ipv4Packet::new_checked(l3).ok()?;
    match packet.next_header() {
        IpProtocol::Tcp => Some(Protocol::Tcp),
        IpProtocol::Udp => Some(Protocol::Udp),
        IpProtocol::Igmp => Some(Protocol::Igmp4),
        IpProtocol::Unknown(89) => Some(Protocol::Ospf2),
        _ => None,
    }
}

/// One injection node.
pub struct InjectNode<D> {
    mode: InjectMode,
    directory: Arc<MappingDirectory>,
    dataplane: Arc<D>,
    counters: Arc<InjectCounters>,
}

impl<D: Dataplane> InjectNode<D> {
    pub fn new(
        mode: InjectMode,
        directory: Arc<MappingDirectory>,
        dataplane: Arc<D>,
        counters: Arc<InjectCounters>,
    ) -> Self {
        Self {
            mode,
            directory,
            dataplane,
            counters,
        }
    }

    pub fn mode(&self) -> InjectMode {
        self.mode
    }

    /// Process a batch, returning the successor for each packet in order.
    ///
    /// Packets are expected with their cursor at the L3 header (ARP or
    /// IPv4) and the Ethernet header in the headroom.
    pub fn process(&self, batch: &mut [PacketBuffer]) -> Vec<NextNode> {
        let next: Vec<NextNode> = batch.iter_mut().map(|p| self.dispatch(p)).collect();
        let injected = next
            .iter()
            .filter(|n| **n == NextNode::InterfaceOutput)
            .count();
        self.counters.add(self.mode, injected as u64);
        next
    }

    fn dispatch(&self, packet: &mut PacketBuffer) -> NextNode {
        let binding = self.directory.lookup_by_interface(packet.rx);
        let Some(tap) = self.divert_target(&binding, packet) else {
            return self.mode.untapped();
        };

        if packet.headroom() < ETH_HEADER_LEN {
            warn!(node = self.mode.node_name(), rx = %packet.rx, "No headroom for Ethernet header");
            return self.mode.untapped();
        }

        packet.tx = Some(tap.interface);

        if self.mode == InjectMode::Arp && arp::is_reply(packet.data()) {
            self.learn(packet);
        }

        packet.retreat(ETH_HEADER_LEN);
        trace!(node = self.mode.node_name(), rx = %packet.rx, tx = %tap.interface, "Diverted to tap");
        NextNode::InterfaceOutput
    }

    fn divert_target(&self, binding: &InterfaceBinding, packet: &PacketBuffer) -> Option<TapId> {
        let tap = binding.tap?;
        let diverted = match self.mode {
            InjectMode::Arp => binding.protocols.arp(),
            InjectMode::Icmp4 => binding.protocols.icmp4(),
            InjectMode::Classified => {
                classify(packet.data()).is_some_and(|p| binding.protocols.contains(p))
            }
        };
        diverted.then_some(tap)
    }

    fn learn(&self, packet: &PacketBuffer) {
        let (Some(l2_source), Some(l2_destination)) = (packet.l2_source(), packet.l2_destination())
        else {
            trace!(rx = %packet.rx, "ARP reply without Ethernet header");
            return;
        };

        let local = self.dataplane.interface_addresses(packet.rx);
        match arp::validate_reply(packet.rx, packet.data(), l2_source, l2_destination, &local) {
            ArpVerdict::Learn(neighbor) => match self.dataplane.set_neighbor(&neighbor) {
                Ok(()) => debug!(
                    interface = %neighbor.interface,
                    ip = %neighbor.ip,
                    mac = %crate::interface::format_mac(&neighbor.mac),
                    "Learned neighbor from ARP reply"
                ),
                Err(e) => warn!(error = %e, ip = %neighbor.ip, "Failed to install neighbor"),
            },
            ArpVerdict::Ignore(reason) => {
                trace!(rx = %packet.rx, ?reason, "ARP reply not learned");
            }
        }
    }
}
