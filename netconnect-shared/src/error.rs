use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    //Interfaces
    #[error("no interface is available")]
    ErrNoInterface,
    #[error("interface not found")]
    ErrInterfaceNotFound,
    #[error("interface has no IPv4 address")]
    ErrInterfaceNoIpv4Address,

    //mDNS
    #[error("mDNS: failed to join multicast group on all interfaces")]
    ErrJoiningMulticastGroup,
    #[error("mDNS: no positive MTU found")]
    ErrNoPositiveMtuFound,
    #[error("mDNS: config must not be nil")]
    ErrNilConfig,
    /// ErrConnectionClosed indicates an operation executed after the
    /// connection has already been closed. A worker reading from the
    /// connection treats it as the signal to stop.
    #[error("connection closed")]
    ErrConnectionClosed,

    //Platform
    #[error("operation is not supported on this platform")]
    ErrNotImplemented,
    #[error("interface name too long")]
    ErrNameTooLong,

    //Third Party Error
    #[error("{0}")]
    Io(#[source] IoError),
    #[error("mutex poison: {0}")]
    PoisonError(String),

    //Other Errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error means the underlying connection is gone for good.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ErrConnectionClosed)
    }
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::PoisonError(e.to_string())
    }
}

#[cfg(unix)]
impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::Io(IoError(io::Error::from(e)))
    }
}
