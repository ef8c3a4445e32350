//! The boundary towards the raw IP stack.
//!
//! The raw stack owns packetization, retransmission and windowing. It exposes protocol control
//! blocks behind opaque [`Handle`]s and reports progress through callbacks. Instead of invoking
//! function pointers, this boundary models the callbacks as [`Event`]s that the stack queues and
//! the engine pulls. Whether an event is delivered at all depends on the [`Subscriptions`] of its
//! handle, exactly one callback of each kind per handle, and clearing them is required before a
//! handle is given up.
//!
//! The [`Loopback`] is a software implementation connecting local endpoints to each other. It is
//! deterministic: nothing is acknowledged, polled or timed out unless explicitly asked for.
//!
//! [`Handle`]: struct.Handle.html
//! [`Event`]: enum.Event.html
//! [`Subscriptions`]: struct.Subscriptions.html
//! [`Loopback`]: loopback/struct.Loopback.html
use core::fmt;
use core::net::{Ipv4Addr, SocketAddrV4};

use alloc::vec::Vec;

pub mod loopback;
pub mod wire;

pub use self::loopback::Loopback;

/// Opaque reference to a protocol control block of the stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub u32);

/// Error codes of the raw stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// Out of memory, possibly temporarily.
    Mem,
    /// Buffer error.
    Buf,
    /// No route to the destination.
    Rte,
    /// Address already in use.
    Use,
    /// Already connected.
    IsConn,
    /// Not connected.
    Conn,
    /// The connection was aborted locally.
    Abrt,
    /// The connection was reset by the peer.
    Rst,
    /// The connection was closed.
    Clsd,
    /// Illegal argument.
    Arg,
    /// Low level interface error.
    If,
    /// Timeout.
    Timeout,
}

/// The state of a TCP control block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TcpState {
    #[allow(missing_docs)]
    Closed,
    #[allow(missing_docs)]
    Listen,
    #[allow(missing_docs)]
    SynSent,
    #[allow(missing_docs)]
    SynRcvd,
    #[allow(missing_docs)]
    Established,
    #[allow(missing_docs)]
    FinWait1,
    #[allow(missing_docs)]
    FinWait2,
    #[allow(missing_docs)]
    CloseWait,
    #[allow(missing_docs)]
    Closing,
    #[allow(missing_docs)]
    LastAck,
    #[allow(missing_docs)]
    TimeWait,
}

/// A snapshot of the internals of a TCP control block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpInfo {
    /// The connection state.
    pub state: TcpState,
    /// Retransmissions of the current segment.
    pub nrtx: u8,
    /// Free space in the send buffer, in bytes.
    pub snd_buf: usize,
    /// The maximum segment size towards the peer.
    pub mss: u16,
    /// Number of segments queued for sending or retransmission.
    pub snd_queuelen: usize,
    /// Next sequence number to send.
    pub snd_nxt: u32,
    /// Next sequence number expected from the peer.
    pub rcv_nxt: u32,
    /// The local endpoint.
    pub local: SocketAddrV4,
    /// The remote endpoint.
    pub remote: SocketAddrV4,
}

/// The network interfaces of the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Interface {
    /// Associated as a client to some access point.
    Station,
    /// Operating as an access point itself.
    SoftAp,
}

/// Configuration of a network interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Netif {
    /// The assigned address, unspecified while there is none.
    pub addr: Ipv4Addr,
    /// The network mask of the attached subnet.
    pub netmask: Ipv4Addr,
    /// Whether the interface is enabled.
    pub up: bool,
}

/// Association progress of the station interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StationStatus {
    #[allow(missing_docs)]
    Idle,
    #[allow(missing_docs)]
    Connecting,
    #[allow(missing_docs)]
    WrongPassword,
    #[allow(missing_docs)]
    NoApFound,
    #[allow(missing_docs)]
    ConnectFail,
    /// Associated and an address has been assigned.
    GotIp,
}

bitflags::bitflags! {
    /// The callbacks registered for a handle.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Subscriptions: u8 {
        /// The handshake of an outgoing connection completed.
        const CONNECTED = 0x01;
        /// A listener accepted a new connection.
        const ACCEPT = 0x02;
        /// Sent data was acknowledged.
        const SENT = 0x04;
        /// Data or a close from the peer was received.
        const RECV = 0x08;
        /// The connection failed fatally.
        const ERR = 0x10;
        /// The periodic poll.
        const POLL = 0x20;
        /// A datagram was received.
        const DATAGRAM = 0x40;
    }
}

/// TCP keepalive parameters, in stack units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Keepalive {
    /// Idle time before the first probe, in milliseconds.
    pub idle_ms: u32,
    /// Time between unanswered probes, in milliseconds.
    pub interval_ms: u32,
    /// Number of unanswered probes before the connection is dropped.
    pub count: u32,
}

/// The retransmission budget of the stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryLimits {
    /// Retransmissions of data before giving up.
    pub max_rtx: u8,
    /// Retransmissions of a SYN before giving up.
    pub syn_max_rtx: u8,
}

/// A callback of the stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// An outgoing connection is established.
    Connected {
        /// The connecting handle.
        handle: Handle,
    },
    /// A listener has a new, established connection.
    Accepted {
        /// The listening handle.
        listener: Handle,
        /// The handle of the new connection.
        handle: Handle,
    },
    /// Bytes previously written have been acknowledged.
    Sent {
        #[allow(missing_docs)]
        handle: Handle,
        /// The number of newly acknowledged bytes.
        len: usize,
    },
    /// Data arrived, or the peer closed its direction when `data` is `None`.
    Received {
        #[allow(missing_docs)]
        handle: Handle,
        #[allow(missing_docs)]
        data: Option<Vec<u8>>,
    },
    /// The connection failed and its control block has already been freed.
    Error {
        #[allow(missing_docs)]
        handle: Handle,
        #[allow(missing_docs)]
        error: Error,
        /// The state of the control block at the time of failure.
        state: TcpState,
        /// Its retransmission count at the time of failure.
        retries: u8,
    },
    /// The periodic poll of a connection.
    Poll {
        #[allow(missing_docs)]
        handle: Handle,
    },
    /// A UDP datagram arrived.
    Datagram {
        #[allow(missing_docs)]
        handle: Handle,
        /// The sender.
        from: SocketAddrV4,
        #[allow(missing_docs)]
        data: Vec<u8>,
    },
}

/// A convenience wrapper around `Result` for stack errors.
pub type Result<T> = core::result::Result<T, Error>;

/// The interface of a raw, callback driven IP stack.
pub trait Stack {
    /// Allocate a new TCP control block.
    fn tcp_new(&mut self) -> Result<Handle>;

    /// Bind a control block to a local endpoint.
    fn tcp_bind(&mut self, handle: Handle, local: SocketAddrV4) -> Result<()>;

    /// Start the handshake towards the remote.
    fn tcp_connect(&mut self, handle: Handle, remote: SocketAddrV4) -> Result<()>;

    /// Turn a bound control block into a listener.
    fn tcp_listen(&mut self, handle: Handle) -> Result<()>;

    /// Enqueue data for sending.
    ///
    /// Fails with `Mem` if the data does not fit into the send buffer or queue. With `copy` the
    /// stack keeps its own copy of the data.
    fn tcp_write(&mut self, handle: Handle, data: &[u8], copy: bool) -> Result<()>;

    /// Transmit enqueued data.
    fn tcp_output(&mut self, handle: Handle) -> Result<()>;

    /// Reopen the receive window by `len` bytes consumed by the application.
    fn tcp_recved(&mut self, handle: Handle, len: usize);

    /// Orderly close, may fail temporarily.
    fn tcp_close(&mut self, handle: Handle) -> Result<()>;

    /// Abort the connection and free the control block.
    fn tcp_abort(&mut self, handle: Handle);

    /// Query the control block.
    fn tcp_info(&self, handle: Handle) -> Option<TcpInfo>;

    /// Enable or disable the Nagle algorithm.
    fn set_nagle(&mut self, handle: Handle, enabled: bool);

    /// Configure keepalive probes, or disable them with `None`.
    fn set_keepalive(&mut self, handle: Handle, keepalive: Option<Keepalive>);

    /// The keepalive configuration, if probes are enabled.
    fn keepalive(&self, handle: Handle) -> Option<Keepalive>;

    /// Poll the control block every `interval` timer ticks.
    fn set_poll_interval(&mut self, handle: Handle, interval: u8);

    /// Drop time-wait state of connections bound to the local port.
    fn purge_time_wait(&mut self, port: u16);

    /// The maximum number of segments queued by a control block.
    fn send_queue_limit(&self) -> usize;

    /// Allocate a new UDP control block.
    fn udp_new(&mut self) -> Result<Handle>;

    /// Bind a UDP control block to a local endpoint.
    fn udp_bind(&mut self, handle: Handle, local: SocketAddrV4) -> Result<()>;

    /// Send a single datagram through a specific interface.
    fn udp_sendto(&mut self, handle: Handle, data: &[u8], dst: SocketAddrV4, iface: Interface)
        -> Result<()>;

    /// Free a UDP control block.
    fn udp_remove(&mut self, handle: Handle);

    /// The largest payload of a single datagram.
    fn max_udp_payload(&self) -> usize;

    /// Replace the callbacks registered for a handle.
    fn subscribe(&mut self, handle: Handle, subscriptions: Subscriptions);

    /// The callbacks currently registered for a handle.
    fn subscriptions(&self, handle: Handle) -> Subscriptions;

    /// Configuration of an interface.
    fn netif(&self, iface: Interface) -> Netif;

    /// Association status of the station interface.
    fn station_status(&self) -> StationStatus;

    /// The receive window of new connections, in bytes.
    fn receive_window(&self) -> usize;

    /// Change the receive window of new connections.
    fn set_receive_window(&mut self, bytes: usize);

    /// The default maximum segment size.
    fn mss(&self) -> u16;

    /// The current retransmission budget.
    fn retry_limits(&self) -> RetryLimits;

    /// Change the retransmission budget.
    fn set_retry_limits(&mut self, limits: RetryLimits);

    /// Take the next queued callback.
    fn next_event(&mut self) -> Option<Event>;
}

impl Subscriptions {
    /// The callback kind that delivers an event.
    pub fn of(event: &Event) -> Self {
        match event {
            Event::Connected { .. } => Subscriptions::CONNECTED,
            Event::Accepted { .. } => Subscriptions::ACCEPT,
            Event::Sent { .. } => Subscriptions::SENT,
            Event::Received { .. } => Subscriptions::RECV,
            Event::Error { .. } => Subscriptions::ERR,
            Event::Poll { .. } => Subscriptions::POLL,
            Event::Datagram { .. } => Subscriptions::DATAGRAM,
        }
    }
}

impl Event {
    /// The handle whose callback is invoked.
    pub fn handle(&self) -> Handle {
        match *self {
            Event::Connected { handle }
            | Event::Sent { handle, .. }
            | Event::Received { handle, .. }
            | Event::Error { handle, .. }
            | Event::Poll { handle }
            | Event::Datagram { handle, .. } => handle,
            Event::Accepted { listener, .. } => listener,
        }
    }
}

impl Netif {
    /// An interface that is down and has no address.
    pub const DOWN: Self = Netif {
        addr: Ipv4Addr::UNSPECIFIED,
        netmask: Ipv4Addr::UNSPECIFIED,
        up: false,
    };

    /// An enabled interface with an address.
    pub fn new(addr: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        Netif { addr, netmask, up: true }
    }

    /// Check if the interface is up and has an address.
    pub fn is_configured(&self) -> bool {
        self.up && !self.addr.is_unspecified()
    }

    /// Check if an address is within the attached subnet.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        u32::from(self.addr) & mask == u32::from(addr) & mask
    }

    /// The directed broadcast address of the subnet.
    pub fn broadcast(&self) -> Ipv4Addr {
        let mask = u32::from(self.netmask);
        Ipv4Addr::from(u32::from(self.addr) | !mask)
    }
}

impl TcpState {
    /// Whether the handshake is still in progress.
    pub fn is_handshake(self) -> bool {
        matches!(self, TcpState::SynSent | TcpState::SynRcvd)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Error::Mem => "out of memory",
            Error::Buf => "buffer error",
            Error::Rte => "routing problem",
            Error::Use => "address in use",
            Error::IsConn => "already connected",
            Error::Conn => "not connected",
            Error::Abrt => "connection aborted",
            Error::Rst => "connection reset",
            Error::Clsd => "connection closed",
            Error::Arg => "illegal argument",
            Error::If => "low-level netif error",
            Error::Timeout => "timeout",
        })
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
