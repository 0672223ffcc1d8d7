use bytes::BytesMut;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Instant;

/// Transport Context with local address, peer address and the index of the
/// network interface the datagram travelled through.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportContext {
    /// Local socket address.
    ///
    /// For outbound answers this carries the address being advertised, which
    /// is what the loopback guard inspects.
    pub local_addr: SocketAddr,
    /// Peer socket address, the sender of an inbound datagram or the
    /// multicast group for an outbound one
    pub peer_addr: SocketAddr,
    /// Index of the network interface, `0` when unknown
    pub interface_index: u32,
}

impl Default for TransportContext {
    fn default() -> Self {
        Self {
            local_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            peer_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            interface_index: 0,
        }
    }
}

impl TransportContext {
    /// Whether the datagram carries a usable interface index.
    pub fn has_interface(&self) -> bool {
        self.interface_index != 0
    }
}

/// A generic transmit with [TransportContext]
#[derive(Debug, Clone)]
pub struct TransportMessage<T> {
    /// Received/Sent time
    pub now: Instant,
    /// A transport context with [local_addr](TransportContext::local_addr),
    /// [peer_addr](TransportContext::peer_addr) and
    /// [interface_index](TransportContext::interface_index)
    pub transport: TransportContext,
    /// Message body with generic type
    pub message: T,
}

/// BytesMut type transmit with [TransportContext]
pub type TaggedBytesMut = TransportMessage<BytesMut>;
