//! Interface identifiers, flags and MAC helpers.

use std::fmt;

/// A dataplane interface index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceId(pub u32);

impl InterfaceId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// A provisioned host TAP.
///
/// The same device is known by two indices: the dataplane interface that
/// transmits into the TAP, and the host kernel's ifindex that shows up in
/// netlink events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TapId {
    /// Dataplane-side interface used as the egress of diverted packets.
    pub interface: InterfaceId,
    /// Host kernel ifindex of the TAP.
    pub host_index: u32,
}

/// Dataplane interface flags.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct InterfaceFlags(u32);

impl InterfaceFlags {
    pub const ADMIN_UP: InterfaceFlags = InterfaceFlags(1 << 0);
    pub const PUNT: InterfaceFlags = InterfaceFlags(1 << 1);
    pub const PROMISCUOUS: InterfaceFlags = InterfaceFlags(1 << 2);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: InterfaceFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns a copy with `flag` set or cleared, all other bits untouched.
    #[must_use]
    pub fn with(self, flag: InterfaceFlags, on: bool) -> Self {
        if on {
            Self(self.0 | flag.0)
        } else {
            Self(self.0 & !flag.0)
        }
    }

    pub fn is_admin_up(self) -> bool {
        self.contains(Self::ADMIN_UP)
    }
}

impl std::ops::BitOr for InterfaceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for InterfaceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterfaceFlags({:#x})", self.0)
    }
}

/// Parse MAC address string to bytes.
pub fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        return None;
    }

    let mut mac = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        if part.len() != 2 {
            return None;
        }
        mac[i] = u8::from_str_radix(part, 16).ok()?;
    }
    Some(mac)
}

/// Format MAC address bytes as string.
pub fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}
