use core::cell::RefCell;
use core::net::{Ipv4Addr, SocketAddrV4};

use alloc::boxed::Box;
use alloc::rc::Rc;

use crate::managed::Key;
use crate::stack::{Handle, Keepalive};
use crate::storage::{RingBuffer, SendQueue};

use super::{Api, SessionKey};

/// The lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// Waiting for the handshake, or a UDP session.
    Wait,
    /// A listener waiting for connections.
    Listen,
    /// Established and idle.
    Connect,
    /// Data has been queued and is not yet acknowledged.
    Write,
    /// The receive callback is running.
    Read,
    /// Teardown has started.
    Close,
}

/// The kind of a session, visible in its detached snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// An outgoing TCP connection.
    Client,
    /// A listening TCP endpoint.
    Listener,
    /// A TCP connection accepted by a listener.
    Accepted,
    /// A UDP endpoint.
    Udp,
}

bitflags::bitflags! {
    /// Per session options.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Options: u8 {
        /// Purge time-wait state of the local port after a close.
        const REUSE_ADDR = 0x01;
        /// Disable the Nagle algorithm.
        const NO_DELAY = 0x02;
        /// Hand data to the stack by copy, one buffer at a time.
        const COPY = 0x04;
        /// Probe idle connections.
        const KEEPALIVE = 0x08;
    }
}

/// Keepalive parameters of a session, in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Idle time before the first probe.
    pub idle: u32,
    /// Time between unanswered probes.
    pub interval: u32,
    /// Unanswered probes before the connection is dropped.
    pub count: u32,
}

/// Transfer statistics of a TCP session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketInfo {
    /// Free space in the send buffer of the stack.
    pub snd_buf_size: usize,
    /// Segments queued in the stack.
    pub snd_queuelen: usize,
    /// The maximum number of segments the stack queues.
    pub total_queuelen: usize,
    /// Next sequence number to send.
    pub packseqno: u32,
    /// Next sequence number expected from the peer.
    pub packseq_nxt: u32,
    /// Bytes acknowledged by the latest sent event.
    pub sent_length: usize,
    /// Bytes received in total.
    pub recv_length: usize,
    /// Buffers retired after full acknowledgment.
    pub packnum: u32,
}

/// State of a remote peer of a listener or a UDP session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteInfo {
    /// The state of the connection to the peer.
    pub state: State,
    /// The address of the peer.
    pub remote: SocketAddrV4,
}

/// The data of a torn down session, handed to its final callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Detached {
    /// The key the session had, no longer valid.
    pub key: SessionKey,
    /// The listener of an accepted session.
    pub parent: Option<SessionKey>,
    #[allow(missing_docs)]
    pub kind: SessionKind,
    #[allow(missing_docs)]
    pub local: SocketAddrV4,
    #[allow(missing_docs)]
    pub remote: SocketAddrV4,
    /// Statistics at the time of teardown.
    pub packet: PacketInfo,
}

/// Called when a connection is established or accepted.
pub type ConnectCallback = Box<dyn FnMut(&mut dyn Api, SessionKey)>;
/// Called after a connection failed, with the classified error.
pub type ReconnectCallback = Box<dyn FnMut(&mut dyn Api, &Detached, crate::Error)>;
/// Called after a connection was closed.
pub type DisconnectCallback = Box<dyn FnMut(&mut dyn Api, &Detached)>;
/// Called once for every buffer that has been fully acknowledged.
pub type SentCallback = Box<dyn FnMut(&mut dyn Api, SessionKey)>;
/// Called with received data.
pub type RecvCallback = Box<dyn FnMut(&mut dyn Api, SessionKey, &[u8])>;
/// Called when a copied buffer has been completely handed to the stack.
pub type WriteFinishCallback = Box<dyn FnMut(&mut dyn Api, SessionKey)>;

pub(crate) type Shared<T> = Rc<RefCell<T>>;

/// The callbacks registered on a session.
///
/// Sessions accepted by a listener use the callbacks of the listener for every slot they did not
/// register themselves.
#[derive(Clone, Default)]
pub(crate) struct Callbacks {
    pub(crate) connect: Option<Shared<ConnectCallback>>,
    pub(crate) reconnect: Option<Shared<ReconnectCallback>>,
    pub(crate) disconnect: Option<Shared<DisconnectCallback>>,
    pub(crate) sent: Option<Shared<SentCallback>>,
    pub(crate) recv: Option<Shared<RecvCallback>>,
    pub(crate) write_finish: Option<Shared<WriteFinishCallback>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Kind {
    Client,
    Listener {
        max_accept: usize,
        /// Idle timeout of accepted connections, in poll ticks.
        timeout: u32,
        /// The remote of the most recently accepted connection.
        last_peer: Option<SocketAddrV4>,
    },
    Accepted {
        parent: Key,
    },
    Udp,
}

/// One TCP or UDP endpoint with its buffers and callbacks.
pub(crate) struct Session {
    pub(crate) kind: Kind,
    pub(crate) state: State,
    pub(crate) handle: Handle,
    pub(crate) local: SocketAddrV4,
    pub(crate) remote: SocketAddrV4,
    pub(crate) options: Options,
    pub(crate) keepalive: KeepaliveConfig,
    /// Poll ticks without traffic.
    pub(crate) idle: u32,
    /// Own idle timeout, zero falls back to the listener.
    pub(crate) timeout: u32,
    pub(crate) queue: SendQueue,
    /// Pull mode receive buffer, only without receive callback.
    pub(crate) ring: Option<RingBuffer>,
    /// Whether another copied buffer may be queued.
    pub(crate) write_ready: bool,
    /// Received length not yet handed back to the window while on hold.
    pub(crate) hold: Option<usize>,
    pub(crate) packet: PacketInfo,
    pub(crate) callbacks: Callbacks,
}

impl Session {
    pub(crate) fn new(kind: Kind, handle: Handle, local: SocketAddrV4, remote: SocketAddrV4) -> Self {
        Session {
            kind,
            state: State::Wait,
            handle,
            local,
            remote,
            options: Options::empty(),
            keepalive: KeepaliveConfig::default(),
            idle: 0,
            timeout: 0,
            queue: SendQueue::new(0),
            ring: None,
            write_ready: false,
            hold: None,
            packet: PacketInfo::default(),
            callbacks: Callbacks::default(),
        }
    }

    pub(crate) fn session_kind(&self) -> SessionKind {
        match self.kind {
            Kind::Client => SessionKind::Client,
            Kind::Listener { .. } => SessionKind::Listener,
            Kind::Accepted { .. } => SessionKind::Accepted,
            Kind::Udp => SessionKind::Udp,
        }
    }

    pub(crate) fn is_tcp(&self) -> bool {
        matches!(self.kind, Kind::Client | Kind::Accepted { .. })
    }

    pub(crate) fn is_listener(&self) -> bool {
        matches!(self.kind, Kind::Listener { .. })
    }

    pub(crate) fn parent(&self) -> Option<Key> {
        match self.kind {
            Kind::Accepted { parent } => Some(parent),
            _ => None,
        }
    }

    pub(crate) fn detach(&self, key: Key) -> Detached {
        Detached {
            key: SessionKey { key },
            parent: self.parent().map(|key| SessionKey { key }),
            kind: self.session_kind(),
            local: self.local,
            remote: self.remote,
            packet: self.packet,
        }
    }
}

impl KeepaliveConfig {
    pub(crate) fn to_stack(self) -> Keepalive {
        Keepalive {
            idle_ms: self.idle.saturating_mul(1000),
            interval_ms: self.interval.saturating_mul(1000),
            count: self.count,
        }
    }

    pub(crate) fn from_stack(keepalive: Keepalive) -> Self {
        KeepaliveConfig {
            idle: keepalive.idle_ms / 1000,
            interval: keepalive.interval_ms / 1000,
            count: keepalive.count,
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        KeepaliveConfig {
            idle: 7200,
            interval: 75,
            count: 9,
        }
    }
}

pub(crate) fn unspecified() -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)
}
