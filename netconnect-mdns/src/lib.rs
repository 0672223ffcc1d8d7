//! # netconnect-mdns
//!
//! A minimal authoritative mDNS responder for a fixed table of host names.
//!
//! The responder joins the mDNS group (`224.0.0.251:5353`) on every host
//! interface and answers A queries for the names it was configured with.
//! It never queries, probes or announces, and it answers nothing else.
//!
//! ## Layout
//!
//! - [`Responder`] is the sans-I/O protocol core. It implements
//!   [`sansio::Protocol`]: inbound datagrams go into `handle_read()`, answer
//!   datagrams come out of `poll_write()`.
//! - [`Server`] drives a [`Responder`] on a worker thread over a
//!   [`MulticastConn`], and decides which interface each answer leaves on.
//! - [`MulticastUdpConn`] is the real connection, built with
//!   [`MulticastSocket`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netconnect_mdns::{MdnsConfig, Server};
//! use std::net::{IpAddr, Ipv4Addr};
//!
//! let config = MdnsConfig::default()
//!     .with_local_name("myhost.local", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
//!
//! let server = Server::bind(config)?;
//! println!("answering on {} interfaces", server.interfaces().len());
//!
//! server.close()?;
//! # Ok::<(), netconnect_mdns::Error>(())
//! ```
//!
//! ## Sans-I/O Usage
//!
//! ```rust
//! use bytes::BytesMut;
//! use netconnect_mdns::{MDNS_DEST_ADDR, MdnsConfig, Responder, TaggedBytesMut, TransportContext};
//! use sansio::Protocol;
//! use std::net::{IpAddr, Ipv4Addr};
//! use std::time::Instant;
//!
//! let mut responder = Responder::new(
//!     MdnsConfig::default()
//!         .with_local_name("myhost.local", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))),
//! );
//!
//! // A bare query for "myhost.local." as a client would send it.
//! let mut query = vec![0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
//! query.extend_from_slice(b"\x06myhost\x05local\x00\x00\x01\x00\x01");
//!
//! responder.handle_read(TaggedBytesMut {
//!     now: Instant::now(),
//!     transport: TransportContext {
//!         interface_index: 2,
//!         ..Default::default()
//!     },
//!     message: BytesMut::from(&query[..]),
//! })?;
//!
//! let answer = responder.poll_write().expect("one answer");
//! assert_eq!(answer.transport.peer_addr, MDNS_DEST_ADDR);
//! assert_eq!(answer.transport.interface_index, 2);
//! # Ok::<(), netconnect_mdns::Error>(())
//! ```
//!
//! ## Protocol Details
//!
//! - **Multicast Address**: 224.0.0.251:5353 (IPv4)
//! - **Record Types**: answers A (IPv4) records only
//! - **TTL**: answers use a TTL of 2 seconds
//! - **Questions**: at most four questions are read per message
//! - **Matching**: exact, case-sensitive, fully-qualified names

#![warn(rust_2018_idioms)]

pub(crate) mod config;
pub(crate) mod proto;
pub(crate) mod server;
pub(crate) mod socket;

pub use config::{DEFAULT_LOG_TARGET, MdnsConfig};
pub use proto::{MDNS_DEST_ADDR, MDNS_MULTICAST_IPV4, MDNS_PORT, Responder};
pub use server::{Server, ServerState};
pub use shared::error::{Error, Result};
pub use shared::{TaggedBytesMut, TransportContext, TransportMessage};
pub use socket::{MulticastConn, MulticastSocket, MulticastUdpConn};

// Re-export interface discovery for MulticastConn implementors
pub use shared::ifaces;
