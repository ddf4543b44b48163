//! Test utilities for mvirt-router unit and integration tests.
//!
//! Provides frame builders and fakes for the host-facing seams so the
//! control flow can be exercised without CAP_NET_ADMIN.

pub mod fakes;
pub mod frames;

pub use fakes::{FIRST_HOST_INDEX, RecordingNamespace, RecordingProvisioner};
pub use frames::*;

use std::sync::Arc;

use crate::dataplane::{Dataplane, DataplaneState};
use crate::interface::{InterfaceFlags, InterfaceId};

/// MAC of the router's first test interface.
pub const ROUTER_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

/// MAC of a peer on the first test interface's link.
pub const PEER_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x05];

/// Dataplane with `eth0` (id 1, 10.0.0.1/24, admin up) and `eth1` (id 2,
/// 192.168.1.1/24, admin down).
pub fn test_dataplane() -> Arc<DataplaneState> {
    let dp = DataplaneState::new();
    dp.add_interface(InterfaceId(1), "eth0", ROUTER_MAC, InterfaceFlags::ADMIN_UP)
        .expect("add eth0");
    dp.add_interface(
        InterfaceId(2),
        "eth1",
        [0x02, 0x00, 0x00, 0x00, 0x00, 0x02],
        InterfaceFlags::empty(),
    )
    .expect("add eth1");
    dp.add_address(InterfaceId(1), "10.0.0.1/24".parse().expect("cidr"))
        .expect("address eth0");
    dp.add_address(InterfaceId(2), "192.168.1.1/24".parse().expect("cidr"))
        .expect("address eth1");
    Arc::new(dp)
}
