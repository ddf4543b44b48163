//! Frame builders for tests.
//!
//! Frames start with the Ethernet header, as received from a NIC.

use std::net::Ipv4Addr;

use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{
    ArpOperation, ArpPacket, ArpRepr, EthernetAddress, EthernetFrame, EthernetProtocol,
    EthernetRepr, IpProtocol, Ipv4Address, Ipv4Packet, Ipv4Repr,
};

/// Ethernet header size
pub const ETHERNET_HDR_SIZE: usize = 14;

/// IP header size (without options)
pub const IP_HDR_SIZE: usize = 20;

/// ARP packet size (Ethernet + IPv4)
pub const ARP_PKT_SIZE: usize = 28;

/// Broadcast MAC address
pub const BROADCAST_MAC: [u8; 6] = [0xff; 6];

/// OSPF IP protocol number
pub const IP_PROTO_OSPF: u8 = 89;

/// ARP frame whose sender hardware address matches the Ethernet source.
///
/// For replies the target hardware address is the Ethernet destination, for
/// requests it is zero.
pub fn arp_frame(
    op: ArpOperation,
    l2_src: [u8; 6],
    l2_dst: [u8; 6],
    sender_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
) -> Vec<u8> {
    let target_mac = if op == ArpOperation::Reply { l2_dst } else { [0; 6] };
    arp_frame_with(op, l2_src, l2_dst, l2_src, sender_ip, target_mac, target_ip)
}

/// ARP frame with every address chosen by the caller.
pub fn arp_frame_with(
    op: ArpOperation,
    l2_src: [u8; 6],
    l2_dst: [u8; 6],
    sender_mac: [u8; 6],
    sender_ip: Ipv4Addr,
    target_mac: [u8; 6],
    target_ip: Ipv4Addr,
) -> Vec<u8> {
    let mut packet = vec![0u8; ETHERNET_HDR_SIZE + ARP_PKT_SIZE];

    let eth_repr = EthernetRepr {
        src_addr: EthernetAddress(l2_src),
        dst_addr: EthernetAddress(l2_dst),
        ethertype: EthernetProtocol::Arp,
    };
    let mut eth_frame = EthernetFrame::new_unchecked(&mut packet[..]);
    eth_repr.emit(&mut eth_frame);

    let arp_repr = ArpRepr::EthernetIpv4 {
        operation: op,
        source_hardware_addr: EthernetAddress(sender_mac),
        source_protocol_addr: Ipv4Address::from(sender_ip),
        target_hardware_addr: EthernetAddress(target_mac),
        target_protocol_addr: Ipv4Address::from(target_ip),
    };
    let mut arp_packet = ArpPacket::new_unchecked(eth_frame.payload_mut());
    arp_repr.emit(&mut arp_packet);

    packet
}

/// IPv4 frame carrying `payload` as the given protocol.
pub fn ipv4_frame(
    l2_src: [u8; 6],
    l2_dst: [u8; 6],
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    protocol: IpProtocol,
    payload: &[u8],
) -> Vec<u8> {
    let mut packet = vec![0u8; ETHERNET_HDR_SIZE + IP_HDR_SIZE + payload.len()];

    let eth_repr = EthernetRepr {
        src_addr: EthernetAddress(l2_src),
        dst_addr: EthernetAddress(l2_dst),
        ethertype: EthernetProtocol::Ipv4,
    };
    let mut eth_frame = EthernetFrame::new_unchecked(&mut packet[..]);
    eth_repr.emit(&mut eth_frame);

    let ip_repr = Ipv4Repr {
        src_addr: Ipv4Address::from(src_ip),
        dst_addr: Ipv4Address::from(dst_ip),
        next_header: protocol,
        payload_len: payload.len(),
        hop_limit: 64,
    };
    let mut ip_packet = Ipv4Packet::new_unchecked(eth_frame.payload_mut());
    ip_repr.emit(&mut ip_packet, &ChecksumCapabilities::default());
    ip_packet.payload_mut().copy_from_slice(payload);

    packet
}
