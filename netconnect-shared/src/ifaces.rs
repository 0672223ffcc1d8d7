//! Host network interface discovery.
//!
//! [`ifaces`] lists every interface of the host together with the details a
//! multicast responder needs: kernel index, flags, MTU and IPv4 addresses.

use std::fmt;
use std::net::Ipv4Addr;
use std::ops::BitOr;

use crate::error::{Error, Result};

/// Subset of interface flags this crate cares about.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct InterfaceFlags(u32);

impl InterfaceFlags {
    pub const UP: InterfaceFlags = InterfaceFlags(1 << 0);
    pub const LOOPBACK: InterfaceFlags = InterfaceFlags(1 << 1);
    pub const MULTICAST: InterfaceFlags = InterfaceFlags(1 << 2);

    pub const fn empty() -> Self {
        InterfaceFlags(0)
    }

    pub const fn contains(self, other: InterfaceFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: InterfaceFlags) {
        self.0 |= other.0;
    }
}

impl BitOr for InterfaceFlags {
    type Output = InterfaceFlags;

    fn bitor(self, rhs: InterfaceFlags) -> InterfaceFlags {
        InterfaceFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for InterfaceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = vec![];
        if self.contains(InterfaceFlags::UP) {
            names.push("up");
        }
        if self.contains(InterfaceFlags::LOOPBACK) {
            names.push("loopback");
        }
        if self.contains(InterfaceFlags::MULTICAST) {
            names.push("multicast");
        }
        write!(f, "{}", names.join("|"))
    }
}

/// A network interface of the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    /// Kernel interface index, never `0` for a real interface
    pub index: u32,
    /// Interface name, e.g. `eth0`
    pub name: String,
    /// Maximum transmission unit, `0` when it could not be determined
    pub mtu: i32,
    pub flags: InterfaceFlags,
    /// IPv4 addresses assigned to the interface, in discovery order
    pub addrs: Vec<Ipv4Addr>,
}

impl Interface {
    pub fn is_loopback(&self) -> bool {
        self.flags.contains(InterfaceFlags::LOOPBACK)
    }

    pub fn is_up(&self) -> bool {
        self.flags.contains(InterfaceFlags::UP)
    }

    /// First IPv4 address of the interface.
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        self.addrs.first().copied()
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(index={}, mtu={}, flags={})",
            self.name, self.index, self.mtu, self.flags
        )
    }
}

/// Lists the interfaces of the host, ordered by index.
///
/// An interface shows up once even when it carries several addresses; the
/// IPv4 ones are collected into [`Interface::addrs`]. An interface whose index
/// cannot be resolved, e.g. because it vanished mid-enumeration, is left out.
#[cfg(unix)]
pub fn ifaces() -> Result<Vec<Interface>> {
    use nix::ifaddrs::getifaddrs;
    use nix::net::if_::if_nametoindex;

    Ok(collect_interfaces(getifaddrs()?, |name: &str| -> Result<u32> {
        Ok(if_nametoindex(name)?)
    }))
}

#[cfg(unix)]
fn collect_interfaces<I, F>(ifaddrs: I, index_of: F) -> Vec<Interface>
where
    I: IntoIterator<Item = nix::ifaddrs::InterfaceAddress>,
    F: Fn(&str) -> Result<u32>,
{
    use nix::net::if_::InterfaceFlags as IfFlags;
    use std::net::SocketAddrV4;

    let mut interfaces: Vec<Interface> = vec![];
    for ifaddr in ifaddrs {
        let pos = match interfaces
            .iter()
            .position(|i| i.name == ifaddr.interface_name)
        {
            Some(pos) => pos,
            None => {
                let index = match index_of(&ifaddr.interface_name) {
                    Ok(index) => index,
                    Err(err) => {
                        log::debug!(
                            "Skipping interface {}: no index: {err}",
                            ifaddr.interface_name
                        );
                        continue;
                    }
                };

                let mut flags = InterfaceFlags::empty();
                if ifaddr.flags.contains(IfFlags::IFF_UP) {
                    flags.insert(InterfaceFlags::UP);
                }
                if ifaddr.flags.contains(IfFlags::IFF_LOOPBACK) {
                    flags.insert(InterfaceFlags::LOOPBACK);
                }
                if ifaddr.flags.contains(IfFlags::IFF_MULTICAST) {
                    flags.insert(InterfaceFlags::MULTICAST);
                }

                interfaces.push(Interface {
                    index,
                    mtu: interface_mtu(&ifaddr.interface_name).unwrap_or(0),
                    name: ifaddr.interface_name.clone(),
                    flags,
                    addrs: vec![],
                });
                interfaces.len() - 1
            }
        };

        if let Some(sin) = ifaddr.address.as_ref().and_then(|a| a.as_sockaddr_in()) {
            interfaces[pos].addrs.push(*SocketAddrV4::from(*sin).ip());
        }
    }

    interfaces.sort_by_key(|i| i.index);
    interfaces
}

#[cfg(not(unix))]
pub fn ifaces() -> Result<Vec<Interface>> {
    Err(Error::ErrNoInterface)
}

/// Looks up a single interface by its kernel index.
pub fn interface_by_index(index: u32) -> Result<Interface> {
    ifaces()?
        .into_iter()
        .find(|i| i.index == index)
        .ok_or(Error::ErrInterfaceNotFound)
}

// SIOCGIFMTU on a throwaway datagram socket.
#[cfg(target_os = "linux")]
fn interface_mtu(name: &str) -> Result<i32> {
    use nix::errno::Errno;
    use nix::libc;
    use nix::sys::socket::{AddressFamily, SockFlag, SockType, socket};
    use nix::unistd::close;

    // SAFETY: ifreq is plain old data, all-zero is a valid value.
    let mut req: libc::ifreq = unsafe { std::mem::zeroed() };
    if name.len() >= req.ifr_name.len() {
        return Err(Error::ErrNameTooLong);
    }
    for (dst, src) in req.ifr_name.iter_mut().zip(name.as_bytes()) {
        *dst = *src as libc::c_char;
    }

    let fd = socket(
        AddressFamily::Inet,
        SockType::Datagram,
        SockFlag::SOCK_CLOEXEC,
        None,
    )?;
    // SAFETY: fd is a valid socket and req outlives the call.
    let rc = unsafe { libc::ioctl(fd, libc::SIOCGIFMTU, &mut req) };
    let result = if rc < 0 {
        Err(Errno::last().into())
    } else {
        // SAFETY: SIOCGIFMTU fills the mtu member of the union.
        Ok(unsafe { req.ifr_ifru.ifru_mtu })
    };
    let _ = close(fd);

    result
}

#[cfg(not(target_os = "linux"))]
fn interface_mtu(_name: &str) -> Result<i32> {
    Err(Error::ErrNotImplemented)
}
