//! Packet buffers as seen by the injection nodes.
//!
//! A buffer carries the frame bytes plus a cursor (`start`, `len`) over the
//! current header. Frames arrive with the cursor already advanced past the
//! Ethernet header, so the L2 header sits in the headroom and can be
//! reclaimed by [`PacketBuffer::retreat`] without copying.

use smoltcp::wire::{EthernetAddress, EthernetFrame, EthernetProtocol};

use crate::interface::InterfaceId;

/// Ethernet header size.
pub const ETH_HEADER_LEN: usize = 14;

/// A frame travelling through the dataplane.
#[derive(Debug, Clone)]
pub struct PacketBuffer {
    data: Vec<u8>,
    /// Offset of the Ethernet header within `data`.
    l2_offset: usize,
    /// Start offset of the current header.
    pub start: usize,
    /// Length of valid data from `start`.
    pub len: usize,
    /// Interface the frame was received on.
    pub rx: InterfaceId,
    /// Egress interface, set when the frame is handed to interface-output.
    pub tx: Option<InterfaceId>,
}

impl PacketBuffer {
    /// Wrap a received frame with the cursor at the Ethernet header.
    pub fn from_frame(rx: InterfaceId, frame: &[u8]) -> Self {
        Self {
            data: frame.to_vec(),
            l2_offset: 0,
            start: 0,
            len: frame.len(),
            rx,
            tx: None,
        }
    }

    /// Wrap a received frame with the cursor past its Ethernet header, the
    /// way it looks after ethernet input.
    pub fn after_ethernet(rx: InterfaceId, frame: &[u8]) -> Self {
        let mut packet = Self::from_frame(rx, frame);
        packet.advance(ETH_HEADER_LEN);
        packet
    }

    /// The bytes from the current header on.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data[self.start..self.start + self.len]
    }

    /// Bytes available in front of the cursor.
    #[inline]
    pub fn headroom(&self) -> usize {
        self.start
    }

    /// Move the cursor forward past a header. Returns false if fewer than
    /// `n` bytes remain.
    pub fn advance(&mut self, n: usize) -> bool {
        if n > self.len {
            return false;
        }
        self.start += n;
        self.len -= n;
        true
    }

    /// Move the cursor backward to re-expose `n` bytes of headroom.
    pub fn retreat(&mut self, n: usize) -> bool {
        if n > self.start {
            return false;
        }
        self.start -= n;
        self.len += n;
        true
    }

    /// The Ethernet header recorded at receive time.
    pub fn ethernet(&self) -> Option<EthernetFrame<&[u8]>> {
        EthernetFrame::new_checked(&self.data[self.l2_offset..]).ok()
    }

    pub fn l2_source(&self) -> Option<EthernetAddress> {
        self.ethernet().map(|frame| frame.src_addr())
    }

    pub fn l2_destination(&self) -> Option<EthernetAddress> {
        self.ethernet().map(|frame| frame.dst_addr())
    }

    pub fn ethertype(&self) -> Option<EthernetProtocol> {
        self.ethernet().map(|frame| frame.ethertype())
    }
}
