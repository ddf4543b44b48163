//! Protocol selection for tap-inject.
//!
//! A [`ProtocolSet`] names which traffic classes an interface diverts to its
//! paired host TAP. Some protocols only work when their helpers are diverted
//! too (OSPF needs ARP to resolve neighbors and IGMP to join AllSPFRouters),
//! which [`ProtocolSet::validate`] enforces.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// A single selectable protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Arp,
    Icmp4,
    Igmp4,
    Ospf2,
    Tcp,
    Udp,
}

impl Protocol {
    /// Every protocol, in canonical order.
    pub const ALL: [Protocol; 6] = [
        Protocol::Arp,
        Protocol::Icmp4,
        Protocol::Igmp4,
        Protocol::Ospf2,
        Protocol::Tcp,
        Protocol::Udp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Protocol::Arp => "arp",
            Protocol::Icmp4 => "icmp4",
            Protocol::Igmp4 => "igmp4",
            Protocol::Ospf2 => "ospf2",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }

    /// Protocols that must be selected alongside this one.
    pub fn prerequisites(self) -> &'static [Protocol] {
        match self {
            Protocol::Ospf2 | Protocol::Udp => &[Protocol::Arp, Protocol::Icmp4, Protocol::Igmp4],
            Protocol::Tcp => &[Protocol::Arp, Protocol::Icmp4],
            Protocol::Arp | Protocol::Icmp4 | Protocol::Igmp4 => &[],
        }
    }

    fn prerequisites_text(self) -> &'static str {
        match self {
            Protocol::Ospf2 | Protocol::Udp => "arp, icmp4, and igmp4",
            Protocol::Tcp => "arp and icmp4",
            Protocol::Arp | Protocol::Icmp4 | Protocol::Igmp4 => "nothing",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Protocol::Arp => 1 << 0,
            Protocol::Icmp4 => 1 << 1,
            Protocol::Igmp4 => 1 << 2,
            Protocol::Ospf2 => 1 << 3,
            Protocol::Tcp => 1 << 4,
            Protocol::Udp => 1 << 5,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Protocol::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| ConfigError::UnknownProtocol(s.to_string()))
    }
}

/// A set of [`Protocol`]s. The empty set means "not bound".
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ProtocolSet(u8);

impl ProtocolSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, protocol: Protocol) -> bool {
        self.0 & protocol.bit() != 0
    }

    pub fn insert(&mut self, protocol: Protocol) {
        self.0 |= protocol.bit();
    }

    #[must_use]
    pub fn with(mut self, protocol: Protocol) -> Self {
        self.insert(protocol);
        self
    }

    pub fn iter(self) -> impl Iterator<Item = Protocol> {
        Protocol::ALL.into_iter().filter(move |p| self.contains(*p))
    }

    pub fn arp(self) -> bool {
        self.contains(Protocol::Arp)
    }

    pub fn icmp4(self) -> bool {
        self.contains(Protocol::Icmp4)
    }

    /// Whether the host namespace has to be watched for this set.
    pub fn needs_namespace_sync(self) -> bool {
        self.arp() || self.icmp4()
    }

    /// Whether any protocol that goes through the classified node is selected.
    pub fn needs_classified(self) -> bool {
        self.contains(Protocol::Ospf2) || self.contains(Protocol::Tcp) || self.contains(Protocol::Udp)
    }

    /// Checks that the set is non-empty and every protocol's prerequisites
    /// are also selected.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.is_empty() {
            return Err(ConfigError::NoProtocols);
        }
        for protocol in self.iter() {
            if !protocol.prerequisites().iter().all(|p| self.contains(*p)) {
                return Err(ConfigError::MissingPrerequisite {
                    protocol,
                    requires: protocol.prerequisites_text(),
                });
            }
        }
        Ok(self)
    }
}

impl FromIterator<Protocol> for ProtocolSet {
    fn from_iter<I: IntoIterator<Item = Protocol>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), ProtocolSet::with)
    }
}

/// Parses a comma separated list such as `"arp,icmp4,igmp4,ospf2"`.
///
/// Unknown tokens are rejected. Prerequisites are not checked here.
impl FromStr for ProtocolSet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(Protocol::from_str)
            .collect()
    }
}

impl fmt::Display for ProtocolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Protocol::name).collect();
        f.write_str(&names.join(","))
    }
}

impl fmt::Debug for ProtocolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProtocolSet({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let set: ProtocolSet = "arp, icmp4,igmp4,ospf2".parse().unwrap();
        assert!(set.arp());
        assert!(set.icmp4());
        assert!(set.contains(Protocol::Igmp4));
        assert!(set.contains(Protocol::Ospf2));
        assert!(!set.contains(Protocol::Tcp));
        assert_eq!(set.to_string(), "arp,icmp4,igmp4,ospf2");
    }

    #[test]
    fn test_parse_order_independent() {
        let a: ProtocolSet = "tcp,arp,icmp4".parse().unwrap();
        let b: ProtocolSet = "arp,icmp4,tcp".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "arp,icmp4,tcp");

        let dup: ProtocolSet = "arp,arp,icmp4".parse().unwrap();
        assert_eq!(dup, "arp,icmp4".parse::<ProtocolSet>().unwrap());

        // Parsing the rendered set yields the same set
        assert_eq!(a.to_string().parse::<ProtocolSet>().unwrap(), a);
    }

    #[test]
    fn test_parse_rejects_unknown_token() {
        let err = "arp,icmp6".parse::<ProtocolSet>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProtocol(ref t) if t == "icmp6"));
    }

    #[test]
    fn test_empty_set_rejected() {
        let set: ProtocolSet = "".parse().unwrap();
        assert!(set.is_empty());
        assert!(matches!(set.validate(), Err(ConfigError::NoProtocols)));
    }

    #[test]
    fn test_ospf2_requires_helpers() {
        let set: ProtocolSet = "arp,ospf2".parse().unwrap();
        let err = set.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingPrerequisite { protocol: Protocol::Ospf2, .. }
        ));
        assert_eq!(err.to_string(), "ospf2 requires arp, icmp4, and igmp4");
    }

    #[test]
    fn test_tcp_and_udp_prerequisites() {
        assert!("arp,icmp4,tcp".parse::<ProtocolSet>().unwrap().validate().is_ok());
        assert!("arp,icmp4,udp".parse::<ProtocolSet>().unwrap().validate().is_err());
        assert!(
            "arp,icmp4,igmp4,udp"
                .parse::<ProtocolSet>()
                .unwrap()
                .validate()
                .is_ok()
        );
        assert!("tcp".parse::<ProtocolSet>().unwrap().validate().is_err());
    }

    #[test]
    fn test_standalone_protocols_valid() {
        for p in [Protocol::Arp, Protocol::Icmp4, Protocol::Igmp4] {
            let set = ProtocolSet::empty().with(p);
            assert!(set.validate().is_ok(), "{p} alone should be valid");
        }
    }

    #[test]
    fn test_needs_namespace_sync() {
        assert!(ProtocolSet::empty().with(Protocol::Arp).needs_namespace_sync());
        assert!(ProtocolSet::empty().with(Protocol::Icmp4).needs_namespace_sync());
        assert!(!ProtocolSet::empty().with(Protocol::Igmp4).needs_namespace_sync());
    }
}
