//! Host namespace watcher.
//!
//! Subscribes to rtnetlink link, IPv4 address and IPv4 route notifications
//! and feeds them, in delivery order, to a [`SyncBridge`].

use std::net::IpAddr;
use std::sync::Arc;

use futures::StreamExt;
use ipnet::Ipv4Net;
use netlink_packet_core::NetlinkPayload;
use netlink_packet_route::address::{AddressAttribute, AddressMessage};
use netlink_packet_route::link::{LinkFlag, LinkMessage};
use netlink_packet_route::route::{RouteAddress, RouteAttribute, RouteMessage};
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
use netlink_sys::{AsyncSocket, SocketAddr};
use rtnetlink::constants::{RTMGRP_IPV4_IFADDR, RTMGRP_IPV4_ROUTE, RTMGRP_LINK};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::dataplane::Dataplane;
use crate::error::{Error, Result};
use crate::sync::{AddressEvent, Change, LinkEvent, NamespaceEvent, RouteEvent, SyncBridge};

/// A source of host namespace events, opened on demand.
pub trait NamespaceSource: Send + Sync {
    /// Start delivering events. Called at most once per source.
    fn open(&self) -> Result<()>;
}

/// rtnetlink multicast subscription driven on a tokio runtime.
pub struct NetlinkSource<D> {
    runtime: Handle,
    bridge: Arc<SyncBridge<D>>,
}

impl<D: Dataplane + 'static> NetlinkSource<D> {
    pub fn new(runtime: Handle, bridge: Arc<SyncBridge<D>>) -> Self {
        Self { runtime, bridge }
    }
}

impl<D: Dataplane + 'static> NamespaceSource for NetlinkSource<D> {
    fn open(&self) -> Result<()> {
        let _guard = self.runtime.enter();

        let (mut connection, _handle, mut messages) =
            rtnetlink::new_connection().map_err(|e| Error::Netlink(e.to_string()))?;

        let groups = RTMGRP_LINK | RTMGRP_IPV4_IFADDR | RTMGRP_IPV4_ROUTE;
        connection
            .socket_mut()
            .socket_mut()
            .bind(&SocketAddr::new(0, groups))
            .map_err(|e| Error::Netlink(format!("bind multicast groups: {e}")))?;

        self.runtime.spawn(connection);

        let bridge = Arc::clone(&self.bridge);
        self.runtime.spawn(async move {
            while let Some((message, _)) = messages.next().await {
                if let Some(event) = translate(message.payload) {
                    let disposition = bridge.handle(&event);
                    debug!(?event, ?disposition, "Namespace event");
                }
            }
            warn!("Namespace event stream closed");
        });

        info!("Watching host namespace");
        Ok(())
    }
}

/// Source that never delivers events, for running without host sync.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSource;

impl NamespaceSource for DisabledSource {
    fn open(&self) -> Result<()> {
        info!("Host namespace sync disabled");
        Ok(())
    }
}

/// Convert a netlink notification into a [`NamespaceEvent`].
pub fn translate(payload: NetlinkPayload<RouteNetlinkMessage>) -> Option<NamespaceEvent> {
    let NetlinkPayload::InnerMessage(message) = payload else {
        return None;
    };
    match message {
        RouteNetlinkMessage::NewAddress(m) => {
            address_event(&m).map(|e| NamespaceEvent::Address(Change::Add, e))
        }
        RouteNetlinkMessage::DelAddress(m) => {
            address_event(&m).map(|e| NamespaceEvent::Address(Change::Delete, e))
        }
        RouteNetlinkMessage::NewRoute(m) => {
            route_event(&m).map(|e| NamespaceEvent::Route(Change::Add, e))
        }
        RouteNetlinkMessage::DelRoute(m) => {
            route_event(&m).map(|e| NamespaceEvent::Route(Change::Delete, e))
        }
        RouteNetlinkMessage::NewLink(m) => Some(NamespaceEvent::Link(Change::Add, link_event(&m))),
        RouteNetlinkMessage::DelLink(m) => {
            Some(NamespaceEvent::Link(Change::Delete, link_event(&m)))
        }
        _ => None,
    }
}

fn address_event(message: &AddressMessage) -> Option<AddressEvent> {
    let v4 = |attr: &AddressAttribute| match attr {
        AddressAttribute::Local(IpAddr::V4(ip)) => Some(*ip),
        _ => None,
    };
    // Point-to-point links carry the peer in IFA_ADDRESS; IFA_LOCAL is ours
    let local = message.attributes.iter().find_map(v4).or_else(|| {
        message.attributes.iter().find_map(|attr| match attr {
            AddressAttribute::Address(IpAddr::V4(ip)) => Some(*ip),
            _ => None,
        })
    })?;
    let address = Ipv4Net::new(local, message.header.prefix_len).ok()?;
    Some(AddressEvent {
        host_index: message.header.index,
        address,
    })
}

fn route_event(message: &RouteMessage) -> Option<RouteEvent> {
    if message.header.address_family != AddressFamily::Inet {
        return None;
    }

    let mut destination = std::net::Ipv4Addr::UNSPECIFIED;
    let mut gateway = None;
    let mut output = None;
    let mut table = u32::from(message.header.table);

    for attr in &message.attributes {
        match attr {
            RouteAttribute::Destination(RouteAddress::Inet(ip)) => destination = *ip,
            RouteAttribute::Gateway(RouteAddress::Inet(ip)) => gateway = Some(*ip),
            RouteAttribute::Oif(index) => output = Some(*index),
            RouteAttribute::Table(t) => table = *t,
            _ => {}
        }
    }

    Some(RouteEvent {
        destination: Ipv4Net::new(destination, message.header.destination_prefix_length).ok()?,
        gateway,
        output: output?,
        table,
    })
}

fn link_event(message: &LinkMessage) -> LinkEvent {
    let mut flags = 0u32;
    for flag in &message.header.flags {
        match flag {
            LinkFlag::Up => flags |= nix::libc::IFF_UP as u32,
            LinkFlag::Running => flags |= nix::libc::IFF_RUNNING as u32,
            _ => {}
        }
    }
    LinkEvent {
        host_index: message.header.index,
        flags,
    }
}
