//! Validation of ARP replies before they are learned.
//!
//! ARP replies that are diverted to the host are also used to populate the
//! dataplane neighbor table. A reply is only learned when it passes a set of
//! anti-spoofing checks against the receiving interface's own addresses.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use smoltcp::wire::{ArpHardware, ArpOperation, ArpPacket, ArpRepr, EthernetAddress, EthernetProtocol};

use crate::interface::InterfaceId;

/// Why a reply was not learned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Truncated or inconsistent ARP header.
    Malformed,
    /// Hardware type is not Ethernet or protocol type is not IPv4.
    NotEthernetIpv4,
    NotReply,
    /// No address on the interface covers the target IP.
    TargetNotLocal,
    /// Sender IP is outside the matched local prefix.
    SenderOffLink,
    /// Sender claims our own address.
    SenderIsLocal,
    /// Target is on-link but is not our address.
    TargetNotOurs,
    /// ARP sender MAC differs from the Ethernet source.
    MacMismatch,
    /// Sender IP is unspecified or equal to the target IP.
    BogusSender,
    /// Ethernet destination is broadcast or multicast.
    NotUnicast,
}

/// A neighbor binding learned from a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    pub interface: InterfaceId,
    pub ip: Ipv4Addr,
    pub mac: [u8; 6],
}

/// Outcome of [`validate_reply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpVerdict {
    Learn(Neighbor),
    Ignore(IgnoreReason),
}

/// Whether `payload` carries an ARP reply opcode. No other field is checked.
pub fn is_reply(payload: &[u8]) -> bool {
    ArpPacket::new_checked(payload)
        .map(|arp| arp.operation() == ArpOperation::Reply)
        .unwrap_or(false)
}

/// The interface address configured as `ip`, else the first one, in
/// configuration order, whose prefix contains `ip`.
pub fn matching_local_address(local: &[Ipv4Net], ip: Ipv4Addr) -> Option<Ipv4Net> {
    local
        .iter()
        .find(|net| net.addr() == ip)
        .or_else(|| local.iter().find(|net| net.contains(&ip)))
        .copied()
}

/// Decide whether an ARP reply received on `rx` may be learned.
///
/// `payload` is the ARP header, `l2_source` and `l2_destination` come from
/// the frame's Ethernet header and `local` lists the addresses configured on
/// `rx`. Checks run in a fixed order; the first failing one is reported.
pub fn validate_reply(
    rx: InterfaceId,
    payload: &[u8],
    l2_source: EthernetAddress,
    l2_destination: EthernetAddress,
    local: &[Ipv4Net],
) -> ArpVerdict {
    let Ok(packet) = ArpPacket::new_checked(payload) else {
        return ArpVerdict::Ignore(IgnoreReason::Malformed);
    };
    if packet.hardware_type() != ArpHardware::Ethernet
        || packet.protocol_type() != EthernetProtocol::Ipv4
    {
        return ArpVerdict::Ignore(IgnoreReason::NotEthernetIpv4);
    }
    let Ok(repr) = ArpRepr::parse(&packet) else {
        return ArpVerdict::Ignore(IgnoreReason::Malformed);
    };

    #[allow(irrefutable_let_patterns)]
    let ArpRepr::EthernetIpv4 {
        operation,
        source_hardware_addr,
        source_protocol_addr,
        target_protocol_addr,
        ..
    } = repr
    else {
        return ArpVerdict::Ignore(IgnoreReason::NotEthernetIpv4);
    };

    if operation != ArpOperation::Reply {
        return ArpVerdict::Ignore(IgnoreReason::NotReply);
    }

    let sender = Ipv4Addr::from(source_protocol_addr);
    let target = Ipv4Addr::from(target_protocol_addr);

    let Some(matched) = matching_local_address(local, target) else {
        return ArpVerdict::Ignore(IgnoreReason::TargetNotLocal);
    };

    if !matched.contains(&sender) {
        return ArpVerdict::Ignore(IgnoreReason::SenderOffLink);
    }

    if matched.addr() == sender {
        return ArpVerdict::Ignore(IgnoreReason::SenderIsLocal);
    }

    if matched.addr() != target {
        return ArpVerdict::Ignore(IgnoreReason::TargetNotOurs);
    }

    if l2_source != source_hardware_addr {
        return ArpVerdict::Ignore(IgnoreReason::MacMismatch);
    }

    if sender.is_unspecified() || sender == target {
        return ArpVerdict::Ignore(IgnoreReason::BogusSender);
    }

    if !l2_destination.is_unicast() {
        return ArpVerdict::Ignore(IgnoreReason::NotUnicast);
    }

    ArpVerdict::Learn(Neighbor {
        interface: rx,
        ip: sender,
        mac: source_hardware_addr.0,
    })
}
