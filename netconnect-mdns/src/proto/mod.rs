//! Sans-I/O mDNS responder.
//!
//! [`Responder`] turns inbound query datagrams into answer datagrams without
//! touching a socket. It implements [`sansio::Protocol`]: feed packets to
//! [`handle_read()`](sansio::Protocol::handle_read) and drain answers from
//! [`poll_write()`](sansio::Protocol::poll_write).
//!
//! Every answer carries the address being advertised in
//! `transport.local_addr` and the inbound interface index in
//! `transport.interface_index`, which is all a transmitter needs to route it.
//!
//! ```rust
//! use netconnect_mdns::{MDNS_DEST_ADDR, MdnsConfig, Responder};
//! use sansio::Protocol;
//! use std::net::{IpAddr, Ipv4Addr};
//!
//! let config = MdnsConfig::default()
//!     .with_local_name("myhost.local", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
//! let mut responder = Responder::new(config);
//!
//! // Queries arrive via handle_read(); nothing has been asked yet.
//! assert!(responder.poll_write().is_none());
//! assert_eq!(MDNS_DEST_ADDR.to_string(), "224.0.0.251:5353");
//! ```


use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Instant;

use bytes::BytesMut;
use hickory_proto::error::ProtoResult;
use hickory_proto::op::{Header, Message, MessageType, Query};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{Name, RData, Record};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder};
use shared::{TaggedBytesMut, TransportContext, TransportMessage};

use crate::config::{MAX_MESSAGE_RECORDS, MdnsConfig, RESPONSE_TTL, fully_qualified};
use shared::error::{Error, Result};

/// The mDNS multicast group address (224.0.0.251).
pub const MDNS_MULTICAST_IPV4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// The standard mDNS port (5353).
pub const MDNS_PORT: u16 = 5353;

/// mDNS multicast destination address (224.0.0.251:5353).
///
/// Every answer is written to this address.
pub const MDNS_DEST_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(MDNS_MULTICAST_IPV4), MDNS_PORT);

/// Sans-I/O authoritative responder for a fixed name table.
///
/// For each inbound message the responder reads at most
/// `MAX_MESSAGE_RECORDS + 1` questions and queues one A answer per question
/// whose name is a key of [`MdnsConfig::local_names_to_ips`]. Names are
/// compared exactly, including case.
pub struct Responder {
    local_names_to_ips: HashMap<String, IpAddr>,
    log_target: String,

    write_outs: VecDeque<TaggedBytesMut>,

    closed: bool,
}

impl Responder {
    /// Create a responder answering for the names in `config`.
    pub fn new(config: MdnsConfig) -> Self {
        let local_names_to_ips = config
            .local_names_to_ips
            .into_iter()
            .map(|(name, ip)| (fully_qualified(name), ip))
            .collect();

        Self {
            local_names_to_ips,
            log_target: config.log_target,
            write_outs: VecDeque::new(),
            closed: false,
        }
    }

    /// Names this responder is authoritative for, with trailing dots.
    pub fn local_names(&self) -> impl Iterator<Item = &str> {
        self.local_names_to_ips.keys().map(String::as_str)
    }

    /// Whether [`close()`](sansio::Protocol::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn process_message(&mut self, msg: &TaggedBytesMut) {
        let mut decoder = BinDecoder::new(&msg.message[..]);
        let header = match Header::read(&mut decoder) {
            Ok(header) => header,
            Err(err) => {
                log::error!(
                    target: self.log_target.as_str(),
                    "Failed to parse mDNS packet from {}: {err}",
                    msg.transport.peer_addr
                );
                return;
            }
        };

        // Questions are decoded one at a time so a malformed one only drops
        // itself and those after it. The bound is inclusive.
        let questions = usize::from(header.query_count()).min(MAX_MESSAGE_RECORDS + 1);
        for _ in 0..questions {
            let q = match Query::read(&mut decoder) {
                Ok(q) => q,
                Err(err) => {
                    log::error!(target: self.log_target.as_str(), "Failed to parse mDNS question: {err}");
                    return;
                }
            };

            // Non-UTF-8 labels come out escaped and simply fail to match.
            let name = q.name().to_ascii();
            let Some(ip) = self.local_names_to_ips.get(&name).copied() else {
                continue;
            };

            log::trace!(
                target: self.log_target.as_str(),
                "Found question for local name {name}, answering with {ip}"
            );
            self.send_answer(q.name(), ip, msg.transport.interface_index, msg.now);
        }
    }

    fn send_answer(&mut self, name: &Name, ip: IpAddr, interface_index: u32, now: Instant) {
        let a = match ip {
            IpAddr::V4(ip) => A(ip),
            IpAddr::V6(_) => {
                log::warn!(
                    target: self.log_target.as_str(),
                    "Cannot answer {name} with IPv6 address {ip} in an A record"
                );
                return;
            }
        };

        let raw_answer = match pack_answer(name, a) {
            Ok(v) => v,
            Err(err) => {
                log::error!(target: self.log_target.as_str(), "Failed to pack answer for {name}: {err}");
                return;
            }
        };

        self.write_outs.push_back(TransportMessage {
            now,
            transport: TransportContext {
                local_addr: SocketAddr::new(ip, MDNS_PORT),
                peer_addr: MDNS_DEST_ADDR,
                interface_index,
            },
            message: BytesMut::from(&raw_answer[..]),
        });
    }
}

/// Authoritative response with a single A record for `name`, no questions.
fn pack_answer(name: &Name, a: A) -> ProtoResult<Vec<u8>> {
    let mut msg = Message::new();
    msg.set_message_type(MessageType::Response)
        .set_authoritative(true)
        .add_answer(Record::from_rdata(name.clone(), RESPONSE_TTL, RData::A(a)));
    msg.to_vec()
}

impl sansio::Protocol<TaggedBytesMut, (), ()> for Responder {
    type Rout = ();
    type Wout = TaggedBytesMut;
    type Eout = ();
    type Error = Error;
    type Time = Instant;

    /// Process one inbound datagram.
    ///
    /// Malformed messages are logged and dropped; the only error is
    /// [`Error::ErrConnectionClosed`] once the responder is closed.
    fn handle_read(&mut self, msg: TaggedBytesMut) -> Result<()> {
        if self.closed {
            return Err(Error::ErrConnectionClosed);
        }
        self.process_message(&msg);
        Ok(())
    }

    fn poll_read(&mut self) -> Option<Self::Rout> {
        None
    }

    fn handle_write(&mut self, _msg: ()) -> Result<()> {
        Ok(())
    }

    /// Next queued answer, in the order the questions were read.
    fn poll_write(&mut self) -> Option<Self::Wout> {
        self.write_outs.pop_front()
    }

    fn handle_event(&mut self, _evt: ()) -> Result<()> {
        Ok(())
    }

    fn poll_event(&mut self) -> Option<Self::Eout> {
        None
    }

    fn handle_timeout(&mut self, _now: Self::Time) -> Result<()> {
        if self.closed {
            return Err(Error::ErrConnectionClosed);
        }
        Ok(())
    }

    /// The responder never schedules timers.
    fn poll_timeout(&mut self) -> Option<Self::Time> {
        None
    }

    /// Drop queued answers and refuse further input. Closing twice is fine.
    fn close(&mut self) -> Result<()> {
        if !self.closed {
            log::debug!(target: self.log_target.as_str(), "Closing mDNS responder");
        }
        self.closed = true;
        self.write_outs.clear();
        Ok(())
    }
}
