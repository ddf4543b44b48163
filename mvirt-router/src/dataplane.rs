//! The dataplane surface the router drives.
//!
//! [`Dataplane`] is the seam between tap-inject and the forwarding engine:
//! interface state, IPv4 addresses, the FIB, the neighbor table and L2
//! cross-connects. [`DataplaneState`] is the in-process implementation used
//! by the daemon and the tests.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::{PoisonError, RwLock};

use ipnet::Ipv4Net;
use prefix_trie::PrefixMap;
use tracing::debug;

use crate::arp::Neighbor;
use crate::error::DataplaneError;
use crate::interface::{InterfaceFlags, InterfaceId, format_mac};

pub type Result<T> = std::result::Result<T, DataplaneError>;

/// An IPv4 route mirrored from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Route {
    pub destination: Ipv4Net,
    /// `None` for on-link routes.
    pub gateway: Option<Ipv4Addr>,
    pub interface: InterfaceId,
}

/// One next hop of a FIB entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextHop {
    pub gateway: Option<Ipv4Addr>,
    pub interface: InterfaceId,
}

/// Operations tap-inject needs from the forwarding engine.
pub trait Dataplane: Send + Sync {
    fn interface_exists(&self, interface: InterfaceId) -> bool;

    fn interface_by_name(&self, name: &str) -> Option<InterfaceId>;

    fn hardware_address(&self, interface: InterfaceId) -> Option<[u8; 6]>;

    fn interface_flags(&self, interface: InterfaceId) -> Option<InterfaceFlags>;

    fn set_interface_flags(&self, interface: InterfaceId, flags: InterfaceFlags) -> Result<()>;

    /// IPv4 addresses configured on `interface`, host bits included.
    fn interface_addresses(&self, interface: InterfaceId) -> Vec<Ipv4Net>;

    /// Whether `addr` is configured on any interface.
    fn is_local_address(&self, addr: Ipv4Addr) -> bool;

    fn add_address(&self, interface: InterfaceId, address: Ipv4Net) -> Result<()>;

    fn remove_address(&self, interface: InterfaceId, address: Ipv4Net) -> Result<()>;

    /// Add a next hop to the FIB entry for `route.destination`.
    fn add_route(&self, route: &Ipv4Route) -> Result<()>;

    /// Remove a next hop, dropping the FIB entry once it has none left.
    fn remove_route(&self, route: &Ipv4Route) -> Result<()>;

    /// Install or overwrite a static neighbor entry.
    fn set_neighbor(&self, neighbor: &Neighbor) -> Result<()>;

    /// Create the dataplane side of a host TAP and return its interface.
    fn create_tap_interface(&self, name: &str, host_index: u32, mac: [u8; 6])
    -> Result<InterfaceId>;

    fn delete_interface(&self, interface: InterfaceId) -> Result<()>;

    /// Forward everything received on `from` out of `to`.
    fn set_l2_xconnect(&self, from: InterfaceId, to: InterfaceId) -> Result<()>;
}

#[derive(Debug, Clone)]
struct InterfaceRecord {
    name: String,
    mac: [u8; 6],
    flags: InterfaceFlags,
    addresses: Vec<Ipv4Net>,
    xconnect: Option<InterfaceId>,
}

#[derive(Default)]
struct Tables {
    interfaces: BTreeMap<InterfaceId, InterfaceRecord>,
    fib: PrefixMap<Ipv4Net, Vec<NextHop>>,
    neighbors: HashMap<(InterfaceId, Ipv4Addr), [u8; 6]>,
}

impl Tables {
    fn record(&self, interface: InterfaceId) -> Result<&InterfaceRecord> {
        self.interfaces
            .get(&interface)
            .ok_or(DataplaneError::NoSuchInterface(interface))
    }

    fn record_mut(&mut self, interface: InterfaceId) -> Result<&mut InterfaceRecord> {
        self.interfaces
            .get_mut(&interface)
            .ok_or(DataplaneError::NoSuchInterface(interface))
    }

    fn next_free_id(&self) -> InterfaceId {
        self.interfaces
            .keys()
            .next_back()
            .map(|id| InterfaceId(id.0 + 1))
            .unwrap_or(InterfaceId(1))
    }
}

/// In-process dataplane tables.
#[derive(Default)]
pub struct DataplaneState {
    tables: RwLock<Tables>,
}

impl DataplaneState {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an interface under a fixed id.
    pub fn add_interface(
        &self,
        id: InterfaceId,
        name: &str,
        mac: [u8; 6],
        flags: InterfaceFlags,
    ) -> Result<()> {
        let mut tables = self.write();
        if tables.interfaces.contains_key(&id) {
            return Err(DataplaneError::InterfaceExists(id));
        }
        if tables.interfaces.values().any(|r| r.name == name) {
            return Err(DataplaneError::NameInUse(name.to_string()));
        }
        tables.interfaces.insert(
            id,
            InterfaceRecord {
                name: name.to_string(),
                mac,
                flags,
                addresses: Vec::new(),
                xconnect: None,
            },
        );
        debug!(interface = %id, name, mac = %format_mac(&mac), "Interface added");
        Ok(())
    }

    pub fn neighbor(&self, interface: InterfaceId, ip: Ipv4Addr) -> Option<[u8; 6]> {
        self.read().neighbors.get(&(interface, ip)).copied()
    }

    /// Longest-prefix match in the FIB.
    pub fn lookup_route(&self, addr: Ipv4Addr) -> Option<(Ipv4Net, Vec<NextHop>)> {
        let prefix = Ipv4Net::new(addr, 32).ok()?;
        self.read()
            .fib
            .get_lpm(&prefix)
            .map(|(net, hops)| (*net, hops.clone()))
    }

    /// Next hops installed for exactly `destination`.
    pub fn route(&self, destination: Ipv4Net) -> Option<Vec<NextHop>> {
        self.read().fib.get(&destination.trunc()).cloned()
    }

    pub fn l2_xconnect(&self, interface: InterfaceId) -> Option<InterfaceId> {
        self.read().interfaces.get(&interface).and_then(|r| r.xconnect)
    }

    pub fn interface_name(&self, interface: InterfaceId) -> Option<String> {
        self.read().interfaces.get(&interface).map(|r| r.name.clone())
    }
}

impl Dataplane for DataplaneState {
    fn interface_exists(&self, interface: InterfaceId) -> bool {
        self.read().interfaces.contains_key(&interface)
    }

    fn interface_by_name(&self, name: &str) -> Option<InterfaceId> {
        self.read()
            .interfaces
            .iter()
            .find(|(_, r)| r.name == name)
            .map(|(id, _)| *id)
    }

    fn hardware_address(&self, interface: InterfaceId) -> Option<[u8; 6]> {
        self.read().interfaces.get(&interface).map(|r| r.mac)
    }

    fn interface_flags(&self, interface: InterfaceId) -> Option<InterfaceFlags> {
        self.read().interfaces.get(&interface).map(|r| r.flags)
    }

    fn set_interface_flags(&self, interface: InterfaceId, flags: InterfaceFlags) -> Result<()> {
        self.write().record_mut(interface)?.flags = flags;
        debug!(%interface, ?flags, "Interface flags set");
        Ok(())
    }

    fn interface_addresses(&self, interface: InterfaceId) -> Vec<Ipv4Net> {
        self.read()
            .interfaces
            .get(&interface)
            .map(|r| r.addresses.clone())
            .unwrap_or_default()
    }

    fn is_local_address(&self, addr: Ipv4Addr) -> bool {
        self.read()
            .interfaces
            .values()
            .any(|r| r.addresses.iter().any(|a| a.addr() == addr))
    }

    fn add_address(&self, interface: InterfaceId, address: Ipv4Net) -> Result<()> {
        let mut tables = self.write();
        let record = tables.record_mut(interface)?;
        if !record.addresses.contains(&address) {
            record.addresses.push(address);
        }
        debug!(%interface, %address, "Address added");
        Ok(())
    }

    fn remove_address(&self, interface: InterfaceId, address: Ipv4Net) -> Result<()> {
        let mut tables = self.write();
        tables.record_mut(interface)?.addresses.retain(|a| *a != address);
        debug!(%interface, %address, "Address removed");
        Ok(())
    }

    fn add_route(&self, route: &Ipv4Route) -> Result<()> {
        let mut tables = self.write();
        tables.record(route.interface)?;
        let hop = NextHop {
            gateway: route.gateway,
            interface: route.interface,
        };
        let key = route.destination.trunc();
        match tables.fib.get_mut(&key) {
            Some(hops) if hops.contains(&hop) => {}
            Some(hops) => hops.push(hop),
            None => {
                tables.fib.insert(key, vec![hop]);
            }
        }
        debug!(destination = %key, gateway = ?route.gateway, interface = %route.interface, "Route added");
        Ok(())
    }

    fn remove_route(&self, route: &Ipv4Route) -> Result<()> {
        let mut tables = self.write();
        let key = route.destination.trunc();
        let hop = NextHop {
            gateway: route.gateway,
            interface: route.interface,
        };
        let now_empty = match tables.fib.get_mut(&key) {
            Some(hops) => {
                hops.retain(|h| *h != hop);
                hops.is_empty()
            }
            None => false,
        };
        if now_empty {
            tables.fib.remove(&key);
        }
        debug!(destination = %key, gateway = ?route.gateway, interface = %route.interface, "Route removed");
        Ok(())
    }

    fn set_neighbor(&self, neighbor: &Neighbor) -> Result<()> {
        let mut tables = self.write();
        tables.record(neighbor.interface)?;
        tables
            .neighbors
            .insert((neighbor.interface, neighbor.ip), neighbor.mac);
        Ok(())
    }

    fn create_tap_interface(
        &self,
        name: &str,
        host_index: u32,
        mac: [u8; 6],
    ) -> Result<InterfaceId> {
        let mut tables = self.write();
        if tables.interfaces.values().any(|r| r.name == name) {
            return Err(DataplaneError::NameInUse(name.to_string()));
        }
        let id = tables.next_free_id();
        tables.interfaces.insert(
            id,
            InterfaceRecord {
                name: name.to_string(),
                mac,
                flags: InterfaceFlags::empty(),
                addresses: Vec::new(),
                xconnect: None,
            },
        );
        debug!(interface = %id, name, host_index, "Tap interface created");
        Ok(id)
    }

    fn delete_interface(&self, interface: InterfaceId) -> Result<()> {
        let mut tables = self.write();
        tables
            .interfaces
            .remove(&interface)
            .ok_or(DataplaneError::NoSuchInterface(interface))?;
        tables.neighbors.retain(|(i, _), _| *i != interface);
        for record in tables.interfaces.values_mut() {
            if record.xconnect == Some(interface) {
                record.xconnect = None;
            }
        }
        debug!(%interface, "Interface deleted");
        Ok(())
    }

    fn set_l2_xconnect(&self, from: InterfaceId, to: InterfaceId) -> Result<()> {
        let mut tables = self.write();
        tables.record(to)?;
        tables.record_mut(from)?.xconnect = Some(to);
        debug!(%from, %to, "L2 cross-connect set");
        Ok(())
    }
}
