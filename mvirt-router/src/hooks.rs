//! Input hooks: which traffic is steered to which injection node.
//!
//! Hooks are registered by [`crate::router::TapInject::enable`] and are
//! global, not per interface. A packet steered to a node whose interface has
//! no binding simply continues on the node's untapped path.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use smoltcp::wire::{EthernetProtocol, IpProtocol, Ipv4Packet};

use crate::dataplane::Dataplane;
use crate::inject::InjectMode;
use crate::packet::{ETH_HEADER_LEN, PacketBuffer};
use crate::protocol::{Protocol, ProtocolSet};

/// Whether `addr` is in 224.0.0.0/24, the link-local multicast range routed
/// to the classified node when IGMP is enabled (OSPF hellos, IGMP reports).
pub fn is_local_multicast(addr: Ipv4Addr) -> bool {
    matches!(addr.octets(), [224, 0, 0, _])
}

const IP_PROTO_OSPF: u8 = 89;

/// Registered ethertype, IP protocol and multicast hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputHooks {
    arp: bool,
    /// IP protocol number → node, for locally addressed packets.
    ip_protocols: HashMap<u8, InjectMode>,
    local_multicast: bool,
}

impl InputHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the hooks needed for `protocols`.
    pub fn register(&mut self, protocols: ProtocolSet) {
        for protocol in protocols.iter() {
            match protocol {
                Protocol::Arp => self.arp = true,
                Protocol::Icmp4 => {
                    self.ip_protocols
                        .insert(u8::from(IpProtocol::Icmp), InjectMode::Icmp4);
                }
                Protocol::Igmp4 => self.local_multicast = true,
                Protocol::Ospf2 => {
                    self.ip_protocols.insert(IP_PROTO_OSPF, InjectMode::Classified);
                }
                Protocol::Tcp => {
                    self.ip_protocols
                        .insert(u8::from(IpProtocol::Tcp), InjectMode::Classified);
                }
                Protocol::Udp => {
                    self.ip_protocols
                        .insert(u8::from(IpProtocol::Udp), InjectMode::Classified);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.arp && !self.local_multicast && self.ip_protocols.is_empty()
    }

    /// Node for a frame positioned at its Ethernet header, if any hook
    /// claims it. A claimed packet is advanced past the Ethernet header.
    pub fn steer<D: Dataplane + ?Sized>(
        &self,
        packet: &mut PacketBuffer,
        dataplane: &D,
    ) -> Option<InjectMode> {
        let mode = match packet.ethertype()? {
            EthernetProtocol::Arp if self.arp => InjectMode::Arp,
            EthernetProtocol::Ipv4 => {
                self.steer_ipv4(packet.data().get(ETH_HEADER_LEN..)?, dataplane)?
            }
            _ => return None,
        };
        packet.advance(ETH_HEADER_LEN).then_some(mode)
    }

    fn steer_ipv4<D: Dataplane + ?Sized>(&self, l3: &[u8], dataplane: &D) -> Option<InjectMode> {
        let ip = Ipv4Packet::new_checked(l3).ok()?;
        let destination = Ipv4Addr::from(ip.dst_addr());

        if self.local_multicast && is_local_multicast(destination) {
            return Some(InjectMode::Classified);
        }
        if !dataplane.is_local_address(destination) {
            return None;
        }
        self.ip_protocols.get(&u8::from(ip.next_header())).copied()
    }
}
