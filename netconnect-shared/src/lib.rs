#![warn(rust_2018_idioms)]

#[cfg(feature = "ifaces")]
pub mod ifaces;

pub mod error;
pub(crate) mod transport;

pub use transport::{TaggedBytesMut, TransportContext, TransportMessage};
