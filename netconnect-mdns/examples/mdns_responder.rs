//! mDNS Responder Example
//!
//! Answers A queries for the given names until Ctrl-C is pressed.
//!
//! # Usage
//!
//! ```text
//! cargo run --package netconnect-mdns --example mdns_responder -- \
//!     --local-name myhost.local=10.0.0.5 --local-name db.local=10.0.0.6
//! ```
//!
//! Then, from another shell: `avahi-resolve -4 -n myhost.local`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::mpsc;

use clap::Parser;
use netconnect_mdns::{MdnsConfig, MulticastSocket, Server};

#[derive(Parser, Debug)]
#[command(name = "mDNS Responder")]
#[command(version = "0.1.0")]
#[command(about = "An example of the netconnect mDNS responder")]
struct Args {
    /// Name to answer for and its address, as `name=ip`. Repeatable.
    #[arg(long = "local-name", value_parser = parse_local_name, required = true)]
    local_names: Vec<(String, IpAddr)>,

    /// Address to bind, defaults to 224.0.0.251:5353 on Linux and 0.0.0.0:5353 elsewhere
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Log target for responder messages
    #[arg(long, default_value = "netconnect_mdns")]
    log_target: String,
}

fn parse_local_name(s: &str) -> Result<(String, IpAddr), String> {
    let (name, ip) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=ip, got {s:?}"))?;
    let ip = ip
        .parse::<IpAddr>()
        .map_err(|err| format!("invalid address {ip:?}: {err}"))?;
    Ok((name.to_owned(), ip))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = MdnsConfig::default().with_log_target(args.log_target);
    for (name, ip) in args.local_names {
        log::info!("answering {name} with {ip}");
        config = config.with_local_name(name, ip);
    }

    let server = match args.bind {
        Some(SocketAddr::V4(addr)) => {
            let conn = MulticastSocket::new()
                .with_multicast_local_ipv4(*addr.ip())
                .with_multicast_local_port(addr.port())
                .into_conn()?;
            Server::new(conn, Some(config))?
        }
        Some(SocketAddr::V6(addr)) => {
            return Err(format!("IPv6 bind address {addr} is not supported").into());
        }
        None => Server::bind(config)?,
    };

    for iface in server.interfaces() {
        let ip = iface.ipv4().unwrap_or(Ipv4Addr::UNSPECIFIED);
        log::info!("listening on {iface} ({ip})");
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    println!("Press Ctrl-C to stop");
    let _ = rx.recv();

    server.close()?;
    println!("mDNS responder stopped");

    Ok(())
}
