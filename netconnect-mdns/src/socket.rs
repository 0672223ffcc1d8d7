//! Multicast UDP connection for the responder.
//!
//! [`MulticastConn`] is the seam between [`Server`](crate::Server) and the
//! network: the server only ever joins groups, picks outbound interfaces and
//! moves datagrams through it. [`MulticastUdpConn`] is the real
//! implementation, created with the [`MulticastSocket`] builder:
//!
//! ```rust,no_run
//! use netconnect_mdns::{MdnsConfig, MulticastSocket, Server};
//!
//! let conn = MulticastSocket::new().into_conn()?;
//! let server = Server::new(conn, Some(MdnsConfig::default()))?;
//! server.close()?;
//! # Ok::<(), netconnect_mdns::Error>(())
//! ```

use std::io;
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use socket2::{Domain, InterfaceIndexOrAddress, Protocol, SockRef, Socket, Type};

use crate::proto::{MDNS_MULTICAST_IPV4, MDNS_PORT};
use shared::error::{Error, Result};
use shared::ifaces::{self, Interface};

/// How long a blocked read waits before checking whether the connection was
/// closed.
pub(crate) const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// A UDP connection joined to a multicast group on individual interfaces.
///
/// Every method takes `&self`: the server's worker reads and writes while the
/// owner may call [`close`](MulticastConn::close) from another thread. After
/// `close` every other method must fail with [`Error::ErrConnectionClosed`],
/// and a blocked [`recv_from`](MulticastConn::recv_from) must return with it.
pub trait MulticastConn: Send + Sync + 'static {
    /// Join `group` on `iface`.
    fn join_group(&self, iface: &Interface, group: Ipv4Addr) -> Result<()>;

    /// Ask the kernel to report the inbound interface of every datagram.
    fn set_control_message(&self, on: bool) -> Result<()>;

    /// Route the following multicast writes out of `iface`.
    fn set_multicast_interface(&self, iface: &Interface) -> Result<()>;

    /// Block until a datagram arrives.
    ///
    /// Returns the payload length, the index of the interface it arrived on
    /// (`0` when unknown) and the sender.
    fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, u32, SocketAddr)>;

    fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize>;

    /// Close the connection, waking a blocked `recv_from`.
    fn close(&self) -> Result<()>;

    /// Interfaces of the host.
    fn interfaces(&self) -> Result<Vec<Interface>> {
        ifaces::ifaces()
    }

    /// Look up one host interface by kernel index.
    fn interface_by_index(&self, index: u32) -> Result<Interface> {
        ifaces::interface_by_index(index)
    }
}

/// A builder for the multicast UDP connection used by the responder.
///
/// The resulting connection is:
///
/// - Bound to `224.0.0.251:5353` on Linux and `0.0.0.0:5353` elsewhere,
///   unless overridden
/// - Configured with `SO_REUSEADDR`, and `SO_REUSEPORT` on supported platforms
/// - Blocking, with a short read timeout so a closed connection is noticed
/// - Not yet joined to any group; the server joins per interface
#[derive(Debug, Clone, Default)]
pub struct MulticastSocket {
    multicast_local_ipv4: Option<Ipv4Addr>,
    multicast_local_port: Option<u16>,
}

impl MulticastSocket {
    /// Creates a builder bound to the default mDNS address.
    ///
    /// # Example
    ///
    /// ```rust
    /// use netconnect_mdns::MulticastSocket;
    /// use std::net::Ipv4Addr;
    ///
    /// let builder = MulticastSocket::new()
    ///     .with_multicast_local_ipv4(Ipv4Addr::UNSPECIFIED)
    ///     .with_multicast_local_port(15353);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_multicast_local_ipv4(mut self, multicast_local_ipv4: Ipv4Addr) -> Self {
        self.multicast_local_ipv4 = Some(multicast_local_ipv4);
        self
    }

    pub fn with_multicast_local_port(mut self, multicast_local_port: u16) -> Self {
        self.multicast_local_port = Some(multicast_local_port);
        self
    }

    /// The address the connection will be bound to.
    pub fn local_addr(&self) -> SocketAddr {
        let ip = if let Some(multicast_local_ipv4) = self.multicast_local_ipv4 {
            multicast_local_ipv4
        } else if cfg!(target_os = "linux") {
            MDNS_MULTICAST_IPV4
        } else {
            // Binding to the group address only works on Linux.
            Ipv4Addr::UNSPECIFIED
        };
        SocketAddr::new(IpAddr::V4(ip), self.multicast_local_port.unwrap_or(MDNS_PORT))
    }

    /// Creates, configures and binds the connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if socket creation, an option or the bind fails.
    pub fn into_conn(self) -> Result<MulticastUdpConn> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

        socket.set_reuse_address(true)?;

        #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
        socket.set_reuse_port(true)?;

        socket.set_nonblocking(false)?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;

        socket.bind(&self.local_addr().into())?;

        Ok(MulticastUdpConn {
            socket: socket.into(),
            closed: AtomicBool::new(false),
        })
    }
}

/// [`MulticastConn`] over a real UDP socket.
#[derive(Debug)]
pub struct MulticastUdpConn {
    socket: UdpSocket,
    closed: AtomicBool,
}

impl MulticastUdpConn {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.check_open()?;
        Ok(self.socket.local_addr()?)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::ErrConnectionClosed)
        } else {
            Ok(())
        }
    }

    fn is_retryable(err: &io::Error) -> bool {
        matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
        )
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn recv_once(&self, buf: &mut [u8]) -> io::Result<(usize, u32, SocketAddr)> {
        use nix::sys::socket::{ControlMessageOwned, MsgFlags, SockaddrIn, recvmsg};
        use std::io::IoSliceMut;
        use std::net::SocketAddrV4;
        use std::os::fd::AsRawFd;

        let mut cmsg_buf = nix::cmsg_space!(nix::libc::in_pktinfo);
        let mut iov = [IoSliceMut::new(buf)];
        let msg = recvmsg::<SockaddrIn>(
            self.socket.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buf),
            MsgFlags::empty(),
        )?;

        let mut if_index = 0;
        for cmsg in msg.cmsgs() {
            if let ControlMessageOwned::Ipv4PacketInfo(info) = cmsg {
                if_index = info.ipi_ifindex as u32;
            }
        }
        let src = msg
            .address
            .map(|sin| SocketAddr::V4(SocketAddrV4::from(sin)))
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));

        Ok((msg.bytes, if_index, src))
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn recv_once(&self, buf: &mut [u8]) -> io::Result<(usize, u32, SocketAddr)> {
        let (n, src) = self.socket.recv_from(buf)?;
        Ok((n, 0, src))
    }
}

impl MulticastConn for MulticastUdpConn {
    fn join_group(&self, iface: &Interface, group: Ipv4Addr) -> Result<()> {
        self.check_open()?;
        SockRef::from(&self.socket)
            .join_multicast_v4_n(&group, &InterfaceIndexOrAddress::Index(iface.index))?;
        Ok(())
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn set_control_message(&self, on: bool) -> Result<()> {
        use nix::sys::socket::{setsockopt, sockopt};
        use std::os::fd::AsRawFd;

        self.check_open()?;
        setsockopt(self.socket.as_raw_fd(), sockopt::Ipv4PacketInfo, &on)?;
        Ok(())
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn set_control_message(&self, _on: bool) -> Result<()> {
        self.check_open()?;
        Err(Error::ErrNotImplemented)
    }

    fn set_multicast_interface(&self, iface: &Interface) -> Result<()> {
        self.check_open()?;
        let addr = iface.ipv4().ok_or(Error::ErrInterfaceNoIpv4Address)?;
        SockRef::from(&self.socket).set_multicast_if_v4(&addr)?;
        Ok(())
    }

    fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, u32, SocketAddr)> {
        loop {
            self.check_open()?;
            match self.recv_once(buf) {
                Ok(received) => {
                    // shutdown() wakes the read with an empty datagram.
                    self.check_open()?;
                    return Ok(received);
                }
                Err(err) if Self::is_retryable(&err) => continue,
                Err(err) => {
                    self.check_open()?;
                    return Err(err.into());
                }
            }
        }
    }

    fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize> {
        self.check_open()?;
        Ok(self.socket.send_to(buf, target)?)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match SockRef::from(&self.socket).shutdown(Shutdown::Both) {
            // Unconnected datagram sockets report ENOTCONN but still wake
            // blocked readers.
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err.into()),
            _ => Ok(()),
        }
    }
}
