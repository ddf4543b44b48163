//! mvirt-router: host-stack protocol diversion for the mvirt packet dataplane.
//!
//! Selected control-plane protocols (ARP, ICMPv4, IGMPv4, OSPFv2, TCP, UDP)
//! arriving on a dataplane interface are diverted to a paired host TAP
//! device, so a routing daemon on the host sees them on a normal Linux
//! interface. Address, route and link changes the daemon makes in the host
//! namespace are mirrored back into the dataplane.
//!
//! # Architecture
//!
//! ```text
//! dataplane rx --> input hooks --> tap-inject-{arp,icmp,classified}
//!                                        |
//!                                        +--> paired TAP (cross-connect) --> host stack
//!                                        +--> regular ARP / ICMP path (unmapped)
//!
//! host namespace --> rtnetlink --> SyncBridge --> dataplane tables
//!                                      |
//!                                      +--> main context --> worker (link state)
//! ```

pub mod arp;
pub mod config;
pub mod dataplane;
pub mod directory;
pub mod error;
pub mod hooks;
pub mod inject;
pub mod interface;
pub mod main_context;
pub mod netns;
pub mod packet;
pub mod protocol;
pub mod provision;
pub mod router;
pub mod sync;
pub mod worker;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

// Re-export commonly used types
pub use config::RouterConfig;
pub use dataplane::{Dataplane, DataplaneState};
pub use directory::{InterfaceBinding, MappingDirectory};
pub use error::{ConfigError, DataplaneError, Error, ProvisionError, Result};
pub use inject::{InjectCounters, InjectMode, InjectNode, NextNode};
pub use interface::{InterfaceFlags, InterfaceId, TapId};
pub use netns::{DisabledSource, NamespaceSource, NetlinkSource};
pub use packet::PacketBuffer;
pub use protocol::{Protocol, ProtocolSet};
pub use provision::{HostTapProvisioner, TapProvisioner};
pub use router::{InjectRequest, TapInject};
pub use sync::{NamespaceEvent, SyncBridge};
pub use worker::{Worker, WorkerConfig, spawn_worker};
