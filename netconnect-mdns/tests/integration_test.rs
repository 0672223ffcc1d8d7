//! Integration tests for netconnect-mdns
//!
//! These tests run the threaded [`Server`] over a scripted in-memory
//! connection: inbound datagrams are fed through a channel and every write is
//! recorded together with the interface it left on.

use hickory_proto::op::{Message, MessageType, Query};
use hickory_proto::rr::{Name, RData, RecordType};
use netconnect_mdns::ifaces::{Interface, InterfaceFlags};
use netconnect_mdns::{Error, MDNS_DEST_ADDR, MdnsConfig, MulticastConn, Result, Server};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT: Duration = Duration::from_millis(500);
const QUIET: Duration = Duration::from_millis(200);

type Inbound = Result<(Vec<u8>, u32)>;

#[derive(Debug, Clone, PartialEq)]
struct Sent {
    interface: Option<u32>,
    target: SocketAddr,
    payload: Vec<u8>,
}

/// Knobs for the fake connection.
#[derive(Default)]
struct FakeOptions {
    failing_joins: Vec<u32>,
    fail_control_message: bool,
    close_failures: usize,
}

struct FakeConn {
    interfaces: Vec<Interface>,
    options: FakeOptions,
    inbound: Mutex<Receiver<Inbound>>,
    sent: Mutex<Sender<Sent>>,
    current_interface: Mutex<Option<u32>>,
    close_attempts: AtomicUsize,
    closed: Arc<AtomicBool>,
}

impl MulticastConn for FakeConn {
    fn join_group(&self, iface: &Interface, group: Ipv4Addr) -> Result<()> {
        assert_eq!(group, Ipv4Addr::new(224, 0, 0, 251));
        if self.options.failing_joins.contains(&iface.index) {
            Err(Error::Other(format!("join refused on {}", iface.name)))
        } else {
            Ok(())
        }
    }

    fn set_control_message(&self, _on: bool) -> Result<()> {
        if self.options.fail_control_message {
            Err(Error::ErrNotImplemented)
        } else {
            Ok(())
        }
    }

    fn set_multicast_interface(&self, iface: &Interface) -> Result<()> {
        *self.current_interface.lock()? = Some(iface.index);
        Ok(())
    }

    fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, u32, SocketAddr)> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::ErrConnectionClosed);
            }
            match self.inbound.lock()?.recv_timeout(Duration::from_millis(10)) {
                Ok(Ok((payload, index))) => {
                    buf[..payload.len()].copy_from_slice(&payload);
                    let src = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 99)), 5353);
                    return Ok((payload.len(), index, src));
                }
                Ok(Err(err)) => return Err(err),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }
    }

    fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrConnectionClosed);
        }
        let sent = Sent {
            interface: *self.current_interface.lock()?,
            target,
            payload: buf.to_vec(),
        };
        let _ = self.sent.lock()?.send(sent);
        Ok(buf.len())
    }

    fn close(&self) -> Result<()> {
        let attempt = self.close_attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.options.close_failures {
            return Err(Error::Other("close refused".to_owned()));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn interfaces(&self) -> Result<Vec<Interface>> {
        Ok(self.interfaces.clone())
    }

    fn interface_by_index(&self, index: u32) -> Result<Interface> {
        self.interfaces
            .iter()
            .find(|i| i.index == index)
            .cloned()
            .ok_or(Error::ErrInterfaceNotFound)
    }
}

struct Harness {
    inbound: Sender<Inbound>,
    sent: Receiver<Sent>,
    closed: Arc<AtomicBool>,
}

impl Harness {
    fn query(&self, names: &[&str], interface_index: u32) {
        self.inbound
            .send(Ok((query_packet(names), interface_index)))
            .unwrap();
    }

    fn next_sent(&self) -> Sent {
        self.sent.recv_timeout(WAIT).expect("an answer to be sent")
    }

    fn assert_quiet(&self) {
        assert_eq!(self.sent.recv_timeout(QUIET), Err(RecvTimeoutError::Timeout));
    }
}

fn fake_conn(interfaces: Vec<Interface>, options: FakeOptions) -> (FakeConn, Harness) {
    let _ = env_logger::builder().is_test(true).try_init();

    let (inbound_tx, inbound_rx) = mpsc::channel();
    let (sent_tx, sent_rx) = mpsc::channel();
    let closed = Arc::new(AtomicBool::new(false));

    let conn = FakeConn {
        interfaces,
        options,
        inbound: Mutex::new(inbound_rx),
        sent: Mutex::new(sent_tx),
        current_interface: Mutex::new(None),
        close_attempts: AtomicUsize::new(0),
        closed: Arc::clone(&closed),
    };
    let harness = Harness {
        inbound: inbound_tx,
        sent: sent_rx,
        closed,
    };
    (conn, harness)
}

fn interface(index: u32, name: &str, mtu: i32, addr: Ipv4Addr) -> Interface {
    let mut flags = InterfaceFlags::UP | InterfaceFlags::MULTICAST;
    if addr.is_loopback() {
        flags.insert(InterfaceFlags::LOOPBACK);
    }
    Interface {
        index,
        name: name.to_owned(),
        mtu,
        flags,
        addrs: vec![addr],
    }
}

fn lo() -> Interface {
    interface(1, "lo", 65536, Ipv4Addr::LOCALHOST)
}

fn eth0() -> Interface {
    interface(2, "eth0", 1500, Ipv4Addr::new(192, 168, 1, 2))
}

fn eth1() -> Interface {
    interface(3, "eth1", 1500, Ipv4Addr::new(10, 0, 0, 2))
}

fn config() -> MdnsConfig {
    MdnsConfig::default().with_local_name("myhost.local.", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)))
}

/// A plain DNS query with one A/IN question per name.
fn query_packet(names: &[&str]) -> Vec<u8> {
    let mut msg = Message::new();
    for name in names {
        msg.add_query(Query::query(Name::from_ascii(name).unwrap(), RecordType::A));
    }
    msg.to_vec().unwrap()
}

/// Decodes the single A record of an answer packet into (name, ttl, address).
fn decode_answer(packet: &[u8]) -> (String, u32, Ipv4Addr) {
    let msg = Message::from_vec(packet).unwrap();
    assert_eq!(msg.message_type(), MessageType::Response);
    assert!(msg.authoritative());
    assert!(msg.queries().is_empty());
    assert_eq!(msg.answers().len(), 1);

    let answer = &msg.answers()[0];
    let ip = match answer.data() {
        Some(RData::A(a)) => a.0,
        other => panic!("expected an A record, got {other:?}"),
    };
    (answer.name().to_ascii(), answer.ttl(), ip)
}

#[test]
fn test_missing_config_is_rejected() {
    let (conn, _harness) = fake_conn(vec![eth0()], FakeOptions::default());
    assert_eq!(Server::new(conn, None).err(), Some(Error::ErrNilConfig));
}

#[test]
fn test_no_joined_interface_is_fatal() {
    let (conn, harness) = fake_conn(
        vec![eth0(), eth1()],
        FakeOptions {
            failing_joins: vec![2, 3],
            ..Default::default()
        },
    );
    assert_eq!(
        Server::new(conn, Some(config())).err(),
        Some(Error::ErrJoiningMulticastGroup)
    );
    assert!(harness.closed.load(Ordering::SeqCst));

    let (conn, _harness) = fake_conn(vec![], FakeOptions::default());
    assert_eq!(
        Server::new(conn, Some(config())).err(),
        Some(Error::ErrJoiningMulticastGroup)
    );
}

#[test]
fn test_no_positive_mtu_is_fatal() {
    let mut a = eth0();
    a.mtu = 0;
    let mut b = eth1();
    b.mtu = -1;
    let (conn, _harness) = fake_conn(vec![a, b], FakeOptions::default());
    assert_eq!(
        Server::new(conn, Some(config())).err(),
        Some(Error::ErrNoPositiveMtuFound)
    );
}

#[test]
fn test_failed_joins_are_left_out() {
    let (conn, _harness) = fake_conn(
        vec![eth0(), eth1()],
        FakeOptions {
            failing_joins: vec![2],
            ..Default::default()
        },
    );
    let server = Server::new(conn, Some(config())).unwrap();
    assert_eq!(server.interfaces(), &[eth1()]);
    server.close().unwrap();
}

#[test]
fn test_inbound_buffer_size() {
    let (conn, _harness) = fake_conn(vec![eth0(), eth1()], FakeOptions::default());
    let server = Server::new(conn, Some(config())).unwrap();
    assert_eq!(server.inbound_buffer_size(), 1500 - 20 - 8);
    server.close().unwrap();

    let (conn, _harness) = fake_conn(vec![eth0(), lo()], FakeOptions::default());
    let server = Server::new(conn, Some(config())).unwrap();
    assert_eq!(server.inbound_buffer_size(), 65536 - 28);
    server.close().unwrap();
}

#[test]
fn test_answer_leaves_on_inbound_interface_only() {
    let (conn, harness) = fake_conn(vec![lo(), eth0(), eth1()], FakeOptions::default());
    let server = Server::new(conn, Some(config())).unwrap();

    harness.query(&["other.local."], 3);
    harness.query(&["myhost.local."], 3);

    let sent = harness.next_sent();
    assert_eq!(sent.interface, Some(3));
    assert_eq!(sent.target, MDNS_DEST_ADDR);
    assert_eq!(
        decode_answer(&sent.payload),
        ("myhost.local.".to_owned(), 2, Ipv4Addr::new(10, 0, 0, 5))
    );
    harness.assert_quiet();

    server.close().unwrap();
}

#[test]
fn test_unknown_inbound_interface_broadcasts() {
    let (conn, harness) = fake_conn(vec![lo(), eth0(), eth1()], FakeOptions::default());
    let server = Server::new(conn, Some(config())).unwrap();

    harness.query(&["myhost.local."], 0);

    let interfaces: Vec<Option<u32>> = (0..3).map(|_| harness.next_sent().interface).collect();
    assert_eq!(interfaces, vec![Some(1), Some(2), Some(3)]);
    harness.assert_quiet();

    server.close().unwrap();
}

#[test]
fn test_loopback_address_stays_on_loopback() {
    let config = MdnsConfig::default().with_local_name("me.local.", IpAddr::V4(Ipv4Addr::LOCALHOST));
    let (conn, harness) = fake_conn(vec![lo(), eth0()], FakeOptions::default());
    let server = Server::new(conn, Some(config)).unwrap();

    harness.query(&["me.local."], 2);
    harness.assert_quiet();

    harness.query(&["me.local."], 1);
    assert_eq!(harness.next_sent().interface, Some(1));

    harness.query(&["me.local."], 0);
    assert_eq!(harness.next_sent().interface, Some(1));
    harness.assert_quiet();

    server.close().unwrap();
}

#[test]
fn test_four_questions_per_message() {
    let (conn, harness) = fake_conn(vec![eth0()], FakeOptions::default());
    let server = Server::new(conn, Some(config())).unwrap();

    harness.query(&["myhost.local."; 5], 2);
    for _ in 0..4 {
        assert_eq!(harness.next_sent().interface, Some(2));
    }
    harness.assert_quiet();

    server.close().unwrap();
}

#[test]
fn test_worker_survives_bad_input() {
    let (conn, harness) = fake_conn(
        vec![eth0()],
        FakeOptions {
            fail_control_message: true,
            ..Default::default()
        },
    );
    let server = Server::new(conn, Some(config())).unwrap();

    harness
        .inbound
        .send(Err(Error::Other("read failed".to_owned())))
        .unwrap();
    harness.inbound.send(Ok((vec![0xde, 0xad], 2))).unwrap();
    // Interface 9 does not exist.
    harness.query(&["myhost.local."], 9);
    harness.query(&["myhost.local."], 2);

    assert_eq!(harness.next_sent().interface, Some(2));
    harness.assert_quiet();

    server.close().unwrap();
}

#[test]
fn test_close_is_idempotent() {
    let (conn, harness) = fake_conn(vec![eth0()], FakeOptions::default());
    let server = Server::new(conn, Some(config())).unwrap();
    assert!(!server.is_closed());

    server.close().unwrap();
    assert!(server.is_closed());
    assert!(harness.closed.load(Ordering::SeqCst));
    server.close().unwrap();
    assert!(server.is_closed());

    // The worker is gone, nothing is read or answered any more.
    harness.query(&["myhost.local."], 2);
    harness.assert_quiet();
}

#[test]
fn test_failed_close_can_be_retried() {
    let (conn, harness) = fake_conn(
        vec![eth0()],
        FakeOptions {
            close_failures: 1,
            ..Default::default()
        },
    );
    let server = Server::new(conn, Some(config())).unwrap();

    assert_eq!(server.close(), Err(Error::Other("close refused".to_owned())));
    assert!(!server.is_closed());

    // Still answering.
    harness.query(&["myhost.local."], 2);
    assert_eq!(harness.next_sent().interface, Some(2));

    server.close().unwrap();
    assert!(server.is_closed());
}

#[test]
fn test_drop_closes_server() {
    let (conn, harness) = fake_conn(vec![eth0()], FakeOptions::default());
    let server = Server::new(conn, Some(config())).unwrap();
    drop(server);

    assert!(harness.closed.load(Ordering::SeqCst));
    // The worker and the connection are gone with the server.
    assert_eq!(
        harness.sent.recv_timeout(QUIET),
        Err(RecvTimeoutError::Disconnected)
    );
}
