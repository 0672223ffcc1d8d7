//! Threaded mDNS responder.
//!
//! [`Server`] joins the mDNS group on every host interface, then hands the
//! connection to a worker thread that feeds datagrams through a
//! [`Responder`] and writes the answers back out. The worker runs until
//! [`Server::close`] is called or the server is dropped.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use bytes::BytesMut;
use sansio::Protocol;
use shared::error::{Error, Result};
use shared::ifaces::Interface;
use shared::{TaggedBytesMut, TransportContext, TransportMessage};

use crate::config::MdnsConfig;
use crate::proto::{MDNS_DEST_ADDR, MDNS_MULTICAST_IPV4, Responder};
use crate::socket::{MulticastConn, MulticastSocket, MulticastUdpConn};

// IPv4 header plus UDP header.
const IPV4_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;

const WORKER_NAME: &str = "mdns-responder";

/// Lifecycle of a [`Server`]. It only ever moves forward.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServerState {
    Running,
    Closing,
    Closed,
}

/// An mDNS responder running on its own thread.
///
/// # Example
///
/// ```rust,no_run
/// use netconnect_mdns::{MdnsConfig, Server};
/// use std::net::{IpAddr, Ipv4Addr};
///
/// let config = MdnsConfig::default()
///     .with_local_name("myhost.local", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
///
/// let server = Server::bind(config)?;
/// // ... answer queries until shutdown ...
/// server.close()?;
/// # Ok::<(), netconnect_mdns::Error>(())
/// ```
pub struct Server<C: MulticastConn> {
    conn: Arc<C>,
    interfaces: Arc<Vec<Interface>>,
    inbound_buffer_size: usize,
    log_target: String,

    state: Mutex<ServerState>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Server<MulticastUdpConn> {
    /// Bind the default mDNS connection and start answering for `config`.
    pub fn bind(config: MdnsConfig) -> Result<Self> {
        let conn = MulticastSocket::new().into_conn()?;
        Server::new(conn, Some(config))
    }
}

impl<C: MulticastConn> Server<C> {
    /// Join the mDNS group on every host interface and start the worker.
    ///
    /// # Errors
    ///
    /// - [`Error::ErrNilConfig`] when `config` is `None`
    /// - [`Error::ErrJoiningMulticastGroup`] when no interface could join
    /// - [`Error::ErrNoPositiveMtuFound`] when no joined interface reports a
    ///   positive MTU
    /// - [`Error::Io`] when the interfaces cannot be listed or the worker
    ///   thread cannot be spawned
    ///
    /// The connection is closed again on every error.
    pub fn new(conn: C, config: Option<MdnsConfig>) -> Result<Self> {
        let config = config.ok_or(Error::ErrNilConfig)?;
        let log_target = config.log_target.clone();

        match Self::join_interfaces(&conn, &log_target) {
            Ok((interfaces, inbound_buffer_size)) => {
                Self::start(conn, config, interfaces, inbound_buffer_size)
            }
            Err(err) => {
                if let Err(close_err) = conn.close() {
                    log::error!(target: log_target.as_str(), "Failed to close connection: {close_err}");
                }
                Err(err)
            }
        }
    }

    fn join_interfaces(conn: &C, log_target: &str) -> Result<(Vec<Interface>, usize)> {
        let mut joined = vec![];
        let mut join_failures = 0;
        let mut max_mtu = 0;

        for iface in conn.interfaces()? {
            if let Err(err) = conn.join_group(&iface, MDNS_MULTICAST_IPV4) {
                log::debug!(target: log_target, "Failed to join {MDNS_MULTICAST_IPV4} on {iface}: {err}");
                join_failures += 1;
                continue;
            }
            log::debug!(target: log_target, "Joined {MDNS_MULTICAST_IPV4} on {iface}");
            max_mtu = max_mtu.max(iface.mtu);
            joined.push(iface);
        }

        if joined.is_empty() {
            log::error!(
                target: log_target,
                "Failed to join {MDNS_MULTICAST_IPV4} on any of {join_failures} interfaces"
            );
            return Err(Error::ErrJoiningMulticastGroup);
        }
        if max_mtu <= 0 {
            return Err(Error::ErrNoPositiveMtuFound);
        }

        if let Err(err) = conn.set_control_message(true) {
            log::error!(target: log_target, "Failed to enable interface index reporting: {err}");
        }

        let inbound_buffer_size = (max_mtu as usize).saturating_sub(IPV4_HEADER_LEN + UDP_HEADER_LEN);
        Ok((joined, inbound_buffer_size))
    }

    fn start(
        conn: C,
        config: MdnsConfig,
        interfaces: Vec<Interface>,
        inbound_buffer_size: usize,
    ) -> Result<Self> {
        let conn = Arc::new(conn);
        let interfaces = Arc::new(interfaces);
        let log_target = config.log_target.clone();

        let worker = Worker {
            conn: Arc::clone(&conn),
            interfaces: Arc::clone(&interfaces),
            responder: Responder::new(config),
            log_target: log_target.clone(),
        };

        let handle = match thread::Builder::new()
            .name(WORKER_NAME.to_owned())
            .spawn(move || worker.run(inbound_buffer_size))
        {
            Ok(handle) => handle,
            Err(err) => {
                let _ = conn.close();
                return Err(err.into());
            }
        };

        log::debug!(
            target: log_target.as_str(),
            "mDNS responder started on {} interfaces, buffer {inbound_buffer_size} bytes",
            interfaces.len()
        );

        Ok(Self {
            conn,
            interfaces,
            inbound_buffer_size,
            log_target,
            state: Mutex::new(ServerState::Running),
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Stop answering, close the connection and wait for the worker to exit.
    ///
    /// Closing an already closed server returns `Ok(())` at once. When the
    /// connection fails to close the error is returned and the worker is left
    /// running, so `close` can be tried again.
    pub fn close(&self) -> Result<()> {
        let mut worker = self.worker.lock()?;
        let Some(handle) = worker.take() else {
            return Ok(());
        };

        self.set_state(ServerState::Closing)?;
        if let Err(err) = self.conn.close() {
            *worker = Some(handle);
            return Err(err);
        }

        if handle.join().is_err() {
            log::error!(target: self.log_target.as_str(), "mDNS responder worker panicked");
        }
        self.set_state(ServerState::Closed)?;
        log::debug!(target: self.log_target.as_str(), "mDNS responder closed");
        Ok(())
    }

    pub fn state(&self) -> ServerState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ServerState::Closed
    }

    /// Interfaces that joined the mDNS group at startup.
    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    /// Size of the receive buffer, the largest joined MTU minus the IPv4 and
    /// UDP headers.
    pub fn inbound_buffer_size(&self) -> usize {
        self.inbound_buffer_size
    }

    fn set_state(&self, next: ServerState) -> Result<()> {
        let mut state = self.state.lock()?;
        if next > *state {
            *state = next;
        }
        Ok(())
    }
}

impl<C: MulticastConn> Drop for Server<C> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::error!(target: self.log_target.as_str(), "Failed to close mDNS responder: {err}");
        }
    }
}

struct Worker<C: MulticastConn> {
    conn: Arc<C>,
    interfaces: Arc<Vec<Interface>>,
    responder: Responder,
    log_target: String,
}

impl<C: MulticastConn> Worker<C> {
    fn run(mut self, inbound_buffer_size: usize) {
        let mut buf = vec![0u8; inbound_buffer_size];

        loop {
            let (n, interface_index, src) = match self.conn.recv_from(&mut buf) {
                Ok(received) => received,
                Err(err) if err.is_closed() => break,
                Err(err) => {
                    log::error!(target: self.log_target.as_str(), "Failed to read mDNS packet: {err}");
                    continue;
                }
            };

            let msg: TaggedBytesMut = TransportMessage {
                now: Instant::now(),
                transport: TransportContext {
                    local_addr: MDNS_DEST_ADDR,
                    peer_addr: src,
                    interface_index,
                },
                message: BytesMut::from(&buf[..n]),
            };
            if self.responder.handle_read(msg).is_err() {
                break;
            }

            while let Some(answer) = self.responder.poll_write() {
                self.transmit(&answer);
            }
        }

        let _ = self.responder.close();
        log::debug!(target: self.log_target.as_str(), "mDNS responder worker exiting");
    }

    fn transmit(&self, answer: &TaggedBytesMut) {
        let ip = answer.transport.local_addr.ip();

        if answer.transport.has_interface() {
            let index = answer.transport.interface_index;
            match self.conn.interface_by_index(index) {
                Ok(iface) => self.write_on(&iface, ip, &answer.message),
                Err(err) => {
                    log::error!(target: self.log_target.as_str(), "Failed to get interface {index}: {err}");
                }
            }
        } else {
            for iface in self.interfaces.iter() {
                self.write_on(iface, ip, &answer.message);
            }
        }
    }

    // Loopback addresses are only announced on loopback interfaces.
    fn write_on(&self, iface: &Interface, ip: IpAddr, payload: &[u8]) {
        if ip.is_loopback() && !iface.is_loopback() {
            log::error!(
                target: self.log_target.as_str(),
                "Not announcing loopback address {ip} on non-loopback interface {iface}"
            );
            return;
        }

        if let Err(err) = self.conn.set_multicast_interface(iface) {
            log::error!(
                target: self.log_target.as_str(),
                "Failed to set multicast interface {iface}: {err}"
            );
            return;
        }

        match self.conn.send_to(payload, MDNS_DEST_ADDR) {
            Ok(_) => log::trace!(target: self.log_target.as_str(), "Sent mDNS answer for {ip} on {iface}"),
            Err(err) => log::error!(
                target: self.log_target.as_str(),
                "Failed to send mDNS answer on {iface}: {err}"
            ),
        }
    }
}
