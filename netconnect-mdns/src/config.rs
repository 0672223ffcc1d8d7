//! Configuration for the mDNS responder.
//!
//! [`MdnsConfig`] carries the name table the responder is authoritative for
//! and the `log` target its messages are emitted under.
//!
//! # Example
//!
//! ```rust
//! use netconnect_mdns::MdnsConfig;
//! use std::net::{IpAddr, Ipv4Addr};
//!
//! let config = MdnsConfig::default()
//!     .with_local_name("myhost.local", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)))
//!     .with_local_name("db.local.", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 6)))
//!     .with_log_target("netconnect::mdns");
//!
//! assert_eq!(config.local_names_to_ips.len(), 2);
//! assert!(config.local_names_to_ips.contains_key("myhost.local."));
//! ```

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

/// Default interval between query retries (1 second)
pub(crate) const DEFAULT_QUERY_INTERVAL: Duration = Duration::from_secs(1);

/// Highest question index read from one message.
///
/// Questions are read for indices `0..=MAX_MESSAGE_RECORDS`, so a message
/// gets up to four questions answered.
pub(crate) const MAX_MESSAGE_RECORDS: usize = 3;

/// TTL in seconds advertised in every answer.
///
/// Kept short so clients re-query soon after the name table changes.
pub(crate) const RESPONSE_TTL: u32 = 2;

/// Default `log` target for responder messages.
pub const DEFAULT_LOG_TARGET: &str = "netconnect_mdns";

const LOCAL_SUFFIX: &str = ".local.";

/// Configuration for an mDNS responder.
///
/// The configuration is fixed once handed to
/// [`Server::new`](crate::Server::new).
///
/// # Fields
///
/// - `query_interval`: retry interval hint, not used by the responder (default: 1 second)
/// - `local_names_to_ips`: fully-qualified names answered and their addresses
/// - `log_target`: target of every log record the responder emits
#[derive(Clone, Debug)]
pub struct MdnsConfig {
    /// Query retry interval.
    ///
    /// Kept for callers that also run a querier; the responder never sends
    /// queries.
    ///
    /// Default: 1 second
    pub query_interval: Duration,

    /// Fully-qualified local names mapped to the address answered for them.
    ///
    /// Keys end with a dot, e.g. `"myhost.local."`, and are compared exactly
    /// with the name in each question. Only IPv4 addresses can be answered;
    /// IPv6 values are skipped with a warning.
    ///
    /// Default: empty
    pub local_names_to_ips: HashMap<String, IpAddr>,

    /// `log` target every message of the responder is emitted under.
    ///
    /// Default: [`DEFAULT_LOG_TARGET`]
    pub log_target: String,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            query_interval: DEFAULT_QUERY_INTERVAL,
            local_names_to_ips: HashMap::new(),
            log_target: DEFAULT_LOG_TARGET.to_owned(),
        }
    }
}

impl MdnsConfig {
    /// Create a new configuration with default values.
    ///
    /// Equivalent to [`MdnsConfig::default()`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the query retry interval.
    ///
    /// A value of zero will use the default interval (1 second).
    pub fn with_query_interval(mut self, interval: Duration) -> Self {
        self.query_interval = if interval.is_zero() {
            DEFAULT_QUERY_INTERVAL
        } else {
            interval
        };
        self
    }

    /// Answer `name` with `ip`.
    ///
    /// A missing trailing dot is appended, so `"myhost.local"` and
    /// `"myhost.local."` name the same entry. Names outside the `.local.`
    /// domain are accepted but logged, since mDNS clients rarely ask for
    /// them.
    ///
    /// # Example
    ///
    /// ```rust
    /// use netconnect_mdns::MdnsConfig;
    /// use std::net::{IpAddr, Ipv4Addr};
    ///
    /// let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10));
    /// let config = MdnsConfig::default().with_local_name("printer.local", ip);
    ///
    /// assert_eq!(config.local_names_to_ips.get("printer.local."), Some(&ip));
    /// ```
    pub fn with_local_name(mut self, name: impl Into<String>, ip: IpAddr) -> Self {
        let name = fully_qualified(name.into());
        if !name.ends_with(LOCAL_SUFFIX) {
            log::warn!(
                target: self.log_target.as_str(),
                "local name {name} is outside the {LOCAL_SUFFIX} domain"
            );
        }
        self.local_names_to_ips.insert(name, ip);
        self
    }

    /// Replace the whole name table.
    ///
    /// Names are normalized the same way as [`MdnsConfig::with_local_name`].
    pub fn with_local_names_to_ips(mut self, names: HashMap<String, IpAddr>) -> Self {
        self.local_names_to_ips.clear();
        for (name, ip) in names {
            self = self.with_local_name(name, ip);
        }
        self
    }

    /// Set the `log` target. An empty target falls back to
    /// [`DEFAULT_LOG_TARGET`].
    pub fn with_log_target(mut self, target: impl Into<String>) -> Self {
        let target = target.into();
        self.log_target = if target.is_empty() {
            DEFAULT_LOG_TARGET.to_owned()
        } else {
            target
        };
        self
    }
}

pub(crate) fn fully_qualified(name: String) -> String {
    if name.ends_with('.') {
        name
    } else {
        format!("{name}.")
    }
}
