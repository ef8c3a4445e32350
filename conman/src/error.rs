use core::fmt;

use crate::stack;

/// A convenience wrapper around `Result` for `conman::Error`.
pub type Result<T> = core::result::Result<T, Error>;

/// The failures reported by the public interface.
///
/// Failures detected while processing a call are returned to the caller directly. Failures which
/// surface later, through a callback of the stack, are classified and handed to the reconnect
/// callback of the session instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// An argument was invalid.
    ///
    /// Also returned when the key does not refer to a live session or the session has the wrong
    /// type for the operation, e.g. `sendto` on a TCP session.
    Arg,

    /// The stack could not allocate the resources for the operation.
    Mem,

    /// The local port is already bound, or the session is already connected.
    IsConn,

    /// A limit on the number of sessions or queued buffers has been reached.
    MaxNum,

    /// There is no route towards the destination, the interface has no address yet.
    Rte,

    /// The retry budget was exhausted while the connection was established.
    Timeout,

    /// The retry budget was exhausted while the connection was closing.
    Clsd,

    /// The handshake never completed.
    Conn,

    /// A disconnect for this session is already in progress.
    InProgress,

    /// Less data is buffered than was requested.
    NoData,

    /// An error of the raw stack that has no more specific classification.
    Stack(stack::Error),
}

impl From<stack::Error> for Error {
    fn from(err: stack::Error) -> Self {
        match err {
            stack::Error::Mem => Error::Mem,
            stack::Error::Rte => Error::Rte,
            stack::Error::IsConn => Error::IsConn,
            stack::Error::Arg => Error::Arg,
            other => Error::Stack(other),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Arg => write!(f, "illegal argument"),
            Error::Mem => write!(f, "out of memory"),
            Error::IsConn => write!(f, "already connected"),
            Error::MaxNum => write!(f, "total number exceeds the set maximum"),
            Error::Rte => write!(f, "routing problem"),
            Error::Timeout => write!(f, "retransmissions exhausted on an established connection"),
            Error::Clsd => write!(f, "retransmissions exhausted while closing"),
            Error::Conn => write!(f, "connection was never established"),
            Error::InProgress => write!(f, "operation in progress"),
            Error::NoData => write!(f, "not enough buffered data"),
            Error::Stack(ref err) => write!(f, "stack error: {}", err),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
