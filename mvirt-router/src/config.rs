//! Daemon configuration file.
//!
//! ```json
//! {
//!   "interfaces": [
//!     { "name": "eth0", "id": 1, "mac": "02:00:00:00:00:01",
//!       "addresses": ["10.0.0.1/24"], "admin_up": true }
//!   ],
//!   "inject": [
//!     { "protocols": "arp,icmp4,igmp4,ospf2", "from": "eth0", "as": "vpp0" }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use ipnet::Ipv4Net;
use serde::Deserialize;

use crate::dataplane::{Dataplane, DataplaneState};
use crate::error::{ConfigError, Error};
use crate::interface::{InterfaceFlags, InterfaceId, parse_mac};
use crate::protocol::ProtocolSet;
use crate::router::InjectRequest;

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/mvirt/router.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    pub interfaces: Vec<InterfaceConfig>,
    #[serde(default)]
    pub inject: Vec<InjectConfig>,
}

/// A dataplane interface
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceConfig {
    pub name: String,
    pub id: u32,
    pub mac: String,
    #[serde(default)]
    pub addresses: Vec<Ipv4Net>,
    #[serde(default)]
    pub admin_up: bool,
}

/// A `tap inject` request
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InjectConfig {
    pub protocols: String,
    pub from: String,
    #[serde(rename = "as")]
    pub tap: String,
}

impl RouterConfig {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check interface entries for bad MACs and duplicate names or ids.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for iface in &self.interfaces {
            if parse_mac(&iface.mac).is_none() {
                return Err(ConfigError::InvalidMac(iface.mac.clone()));
            }
            if !names.insert(iface.name.as_str()) {
                return Err(ConfigError::DuplicateInterface(iface.name.clone()));
            }
            if !ids.insert(iface.id) {
                return Err(ConfigError::DuplicateInterface(format!("id {}", iface.id)));
            }
        }
        Ok(())
    }

    /// Build the in-process dataplane described by `interfaces`.
    pub fn build_dataplane(&self) -> Result<DataplaneState, Error> {
        let dataplane = DataplaneState::new();
        for iface in &self.interfaces {
            let mac = parse_mac(&iface.mac).ok_or_else(|| ConfigError::InvalidMac(iface.mac.clone()))?;
            let flags = InterfaceFlags::empty().with(InterfaceFlags::ADMIN_UP, iface.admin_up);
            let id = InterfaceId(iface.id);
            dataplane.add_interface(id, &iface.name, mac, flags)?;
            for address in &iface.addresses {
                dataplane.add_address(id, *address)?;
            }
        }
        Ok(dataplane)
    }
}

impl InjectConfig {
    /// Resolve interface names and parse the protocol list.
    pub fn resolve<D: Dataplane + ?Sized>(&self, dataplane: &D) -> Result<InjectRequest, ConfigError> {
        let protocols: ProtocolSet = self.protocols.parse()?;
        let interface = dataplane
            .interface_by_name(&self.from)
            .ok_or_else(|| ConfigError::UnknownInterfaceName(self.from.clone()))?;
        Ok(InjectRequest::new(protocols, interface, self.tap.clone()))
    }
}
