//! The session engine.
//!
//! An [`Engine`] owns a raw [`Stack`], the registry of all sessions and the queue of deferred
//! notifications. It is driven by calling [`Engine::poll`] which takes every queued event of the
//! stack, updates the affected session and runs user callbacks. Callbacks receive the engine
//! again, as a `&mut dyn Api`, so they can send, close or open further sessions.
//!
//! Teardown is never reported from within the event that caused it. Errors and completed closes
//! are posted to the dispatcher and delivered afterwards, after the session has been removed from
//! the registry, through its reconnect or disconnect callback respectively. At most one of the
//! two is delivered for each session.
//!
//! [`Engine`]: struct.Engine.html
//! [`Engine::poll`]: struct.Engine.html#method.poll
//! [`Stack`]: ../stack/trait.Stack.html
use core::cell::RefCell;
use core::net::{Ipv4Addr, SocketAddrV4};
use core::ops::Range;

use alloc::rc::Rc;
use alloc::vec::Vec;

use crate::managed::Key;
use crate::stack::{Event, Interface, Stack, StationStatus};
use crate::{Error, Result};

mod dispatch;
mod registry;
mod session;
mod tcp;
mod udp;

#[cfg(test)]
mod tests;

use self::dispatch::{Dispatcher, Signal};
use self::registry::Registry;
use self::session::{Callbacks, Kind, Session, Shared};

pub use self::session::{
    ConnectCallback,
    Detached,
    DisconnectCallback,
    KeepaliveConfig,
    Options,
    PacketInfo,
    ReconnectCallback,
    RecvCallback,
    RemoteInfo,
    SentCallback,
    SessionKind,
    State,
    WriteFinishCallback};

/// Upper bound of simultaneous TCP connections.
pub const MAX_CONNECTIONS: usize = 15;

/// Upper bound of the retransmission budget.
pub const MAX_RETRANSMISSIONS: u8 = 12;

/// Upper bound of the receive window, in segments.
pub const MAX_WINDOW: usize = 15;

/// Upper bound of an idle timeout, in poll ticks.
pub const MAX_TIMEOUT: u32 = 7200;

/// Refers to a session of an engine.
///
/// Keys behave like file descriptors. A key is invalidated when its session is torn down and is
/// never valid again, even when the storage of the session is reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionKey {
    key: Key,
}

/// The sessions affected by an idle timeout set with `regist_time`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Only the given accepted connection.
    Connection,
    /// All connections of the listener, or of the listener of the given connection.
    Listener,
}

/// Static configuration of an engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Simultaneous TCP connections, in `1..=15`.
    pub max_connections: usize,
    /// Deferred notifications queued before a backlog is logged.
    pub dispatch_depth: usize,
    /// Largest single write to the stack, in multiples of its segment size.
    pub chunk_mss: usize,
    /// Idle timeout of new listeners, in poll ticks.
    pub listener_timeout: u32,
    /// Buffers a connection may queue unless changed with `set_buffer_count`.
    pub buffer_count: usize,
    /// Largest value accepted by `set_buffer_count`.
    pub max_buffer_count: usize,
    /// Stack timer ticks between two polls of an accepted connection.
    pub poll_interval: u8,
    /// Local ports chosen for connections that do not bind one.
    pub ephemeral_ports: Range<u16>,
}

/// The operations available to applications and callbacks.
///
/// Implemented by the [`Engine`]. Callbacks receive a `&mut dyn Api` referring to the engine that
/// runs them.
///
/// [`Engine`]: struct.Engine.html
pub trait Api {
    /// Open a TCP connection from `local_port`, or from an ephemeral port if it is zero.
    fn connect(&mut self, local_port: u16, remote: SocketAddrV4) -> Result<SessionKey>;

    /// Listen for TCP connections on a local port.
    fn listen(&mut self, local_port: u16) -> Result<SessionKey>;

    /// Accept TCP connections on a local port, same as `listen`.
    fn accept(&mut self, local_port: u16) -> Result<SessionKey> {
        self.listen(local_port)
    }

    /// Create a UDP endpoint with a default remote.
    fn create(&mut self, local_port: u16, remote: SocketAddrV4) -> Result<SessionKey>;

    /// Send data on a connection, or to the remote of a UDP endpoint.
    ///
    /// TCP data is queued and the sent callback fires once it has been acknowledged completely.
    /// An error from writing to the stack is returned but leaves the data queued, it is retried
    /// with the next acknowledgment.
    fn send(&mut self, key: SessionKey, data: &[u8]) -> Result<()>;

    /// Send a datagram from a UDP endpoint.
    fn sendto(&mut self, key: SessionKey, dst: SocketAddrV4, data: &[u8]) -> Result<()>;

    /// Orderly close of a connection.
    fn disconnect(&mut self, key: SessionKey) -> Result<()>;

    /// Abort a connection, dropping unsent data.
    fn abort(&mut self, key: SessionKey) -> Result<()>;

    /// Remove a listener without connections or a UDP endpoint.
    fn delete(&mut self, key: SessionKey) -> Result<()>;

    /// Enable options of a session.
    fn set_opt(&mut self, key: SessionKey, options: Options) -> Result<()>;

    /// Disable options of a session.
    fn clear_opt(&mut self, key: SessionKey, options: Options) -> Result<()>;

    /// Configure keepalive probes, requires the keepalive option.
    fn set_keepalive(&mut self, key: SessionKey, keepalive: KeepaliveConfig) -> Result<()>;

    /// Query keepalive probes, requires the keepalive option.
    fn get_keepalive(&self, key: SessionKey) -> Result<KeepaliveConfig>;

    /// Called when a connection is established, or accepted on a listener.
    fn regist_connect_callback(&mut self, key: SessionKey, callback: ConnectCallback) -> Result<()>;
    /// Called once when a connection fails, after it has been removed.
    fn regist_reconnect_callback(&mut self, key: SessionKey, callback: ReconnectCallback) -> Result<()>;
    /// Called once when a connection has been closed, after it has been removed.
    fn regist_disconnect_callback(&mut self, key: SessionKey, callback: DisconnectCallback) -> Result<()>;
    /// Called for each sent buffer once the peer acknowledged all of it.
    fn regist_sent_callback(&mut self, key: SessionKey, callback: SentCallback) -> Result<()>;
    /// Called with received data, replacing the buffer read with `read`.
    fn regist_recv_callback(&mut self, key: SessionKey, callback: RecvCallback) -> Result<()>;
    /// Called when a copied buffer has been handed to the stack completely.
    fn regist_write_finish_callback(&mut self, key: SessionKey, callback: WriteFinishCallback)
        -> Result<()>;

    /// The peers of a listener, or the remote of a connection or UDP endpoint.
    fn get_connection_info(&self, key: SessionKey) -> Result<Vec<RemoteInfo>>;

    /// Transfer statistics of a connection.
    ///
    /// After teardown, the statistics of the most recently closed or failed connection remain
    /// available under its key.
    fn get_packet_info(&self, key: SessionKey) -> Result<PacketInfo>;

    /// Set the idle timeout, in poll ticks, of accepted connections.
    fn regist_time(&mut self, key: SessionKey, interval: u32, scope: Scope) -> Result<()>;

    /// Limit the connections a listener accepts simultaneously.
    fn set_max_accept(&mut self, key: SessionKey, max: usize) -> Result<()>;

    /// The connections a listener accepts simultaneously.
    fn max_accept(&self, key: SessionKey) -> Result<usize>;

    /// Limit the buffers a connection may queue.
    fn set_buffer_count(&mut self, key: SessionKey, count: usize) -> Result<()>;

    /// Stop reopening the receive window for received data.
    fn recv_hold(&mut self, key: SessionKey) -> Result<()>;

    /// Reopen the receive window for everything received while on hold.
    fn recv_unhold(&mut self, key: SessionKey) -> Result<()>;

    /// Read buffered data of a connection without receive callback.
    ///
    /// Fills `buf` completely or fails with `NoData` when fewer bytes are buffered.
    fn read(&mut self, key: SessionKey, buf: &mut [u8]) -> Result<usize>;

    /// The current state of a session.
    fn state(&self, key: SessionKey) -> Result<State>;
    /// The local address. The address part is unspecified until a connection is established.
    fn local_addr(&self, key: SessionKey) -> Result<SocketAddrV4>;
    /// The peer of a connection, or the last sender to a UDP endpoint.
    fn remote_addr(&self, key: SessionKey) -> Result<SocketAddrV4>;

    /// Change the number of simultaneous TCP connections.
    fn set_max_connections(&mut self, max: usize) -> Result<()>;

    /// The number of simultaneous TCP connections.
    fn max_connections(&self) -> usize;

    /// Change the retransmission budget of established connections.
    fn set_max_retransmissions(&mut self, max: u8) -> Result<()>;

    /// Change the retransmission budget of the handshake.
    fn set_max_syn_retransmissions(&mut self, max: u8) -> Result<()>;

    /// Change the receive window, in segments.
    fn set_window(&mut self, segments: usize) -> Result<()>;

    /// The receive window, in segments.
    fn window(&self) -> usize;

    /// The maximum segment size of the stack.
    fn mss(&self) -> u16;
}

/// Sessions on top of a raw stack.
pub struct Engine<S> {
    stack: S,
    config: Config,
    registry: Registry,
    dispatcher: Dispatcher,
    last_closed: Option<(Key, PacketInfo)>,
    last_failed: Option<(Key, PacketInfo)>,
    next_port: u16,
}

impl<S: Stack> Engine<S> {
    /// Create an engine on a stack.
    ///
    /// Fails with `Arg` if the configuration is not consistent.
    pub fn new(stack: S, config: Config) -> Result<Self> {
        config.validate()?;
        net_debug!("engine: {:?}", config);

        Ok(Engine {
            stack,
            dispatcher: Dispatcher::new(config.dispatch_depth),
            registry: Registry::new(),
            last_closed: None,
            last_failed: None,
            next_port: config.ephemeral_ports.start,
            config,
        })
    }

    /// Process all pending events of the stack and all deferred notifications.
    ///
    /// Returns the number of events and notifications processed.
    pub fn poll(&mut self) -> usize {
        let mut processed = 0;

        loop {
            let before = processed;

            while let Some(event) = self.stack.next_event() {
                self.handle_event(event);
                processed += 1;
            }

            while let Some((key, signal)) = self.dispatcher.next() {
                self.run_task(key, signal);
                processed += 1;
            }

            if processed == before {
                return processed;
            }
        }
    }

    /// The raw stack.
    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// The raw stack, for driving it from outside the engine.
    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    /// The configuration, including changes made through the tunables.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The stack handle of a session.
    pub fn handle(&self, key: SessionKey) -> Option<crate::stack::Handle> {
        self.registry.get(key.key).map(|session| session.handle)
    }

    /// Number of connections and UDP endpoints.
    pub fn active_count(&self) -> usize {
        self.registry.active().len()
    }

    /// Number of listeners.
    pub fn listening_count(&self) -> usize {
        self.registry.listening().len()
    }

    /// Number of deferred notifications not yet delivered.
    pub fn pending_tasks(&self) -> usize {
        self.dispatcher.len()
    }

    fn handle_event(&mut self, event: Event) {
        net_trace!("engine: {:?}", event);
        match event {
            Event::Connected { handle } => self.on_connected(handle),
            Event::Accepted { listener, handle } => self.on_accepted(listener, handle),
            Event::Sent { handle, len } => self.on_sent(handle, len),
            Event::Received { handle, data } => self.on_received(handle, data),
            Event::Error { handle, error, state, retries } => self.on_error(handle, error, state, retries),
            Event::Poll { handle } => self.on_poll(handle),
            Event::Datagram { handle, from, data } => self.on_datagram(handle, from, data),
        }
    }

    fn post(&mut self, key: Key, signal: Signal) {
        if self.dispatcher.post(key, signal) {
            net_warn!("engine: {} notifications pending", self.dispatcher.len());
        }
    }

    fn run_task(&mut self, key: Key, signal: Signal) {
        if !self.registry.contains(key) {
            net_debug!("engine: dropping {:?} for removed session", signal);
            return;
        }

        match signal {
            Signal::Error(error) => {
                let session = match self.registry.unregister(key) {
                    Some(session) => session,
                    None => return,
                };
                let detached = session.detach(key);
                self.last_failed = Some((key, detached.packet));
                net_debug!("engine: session {:?} failed: {}", key, error);

                let callback = self.pick(&session.callbacks, session.parent(), |cb| cb.reconnect.clone());
                drop(session);
                if let Some(callback) = callback {
                    self.invoke(callback, |cb, api| cb(api, &detached, error));
                }
            },
            Signal::Close => {
                let session = match self.registry.unregister(key) {
                    Some(session) => session,
                    None => return,
                };
                if session.options.contains(Options::REUSE_ADDR) {
                    self.stack.purge_time_wait(session.local.port());
                }
                let detached = session.detach(key);
                self.last_closed = Some((key, detached.packet));
                net_debug!("engine: session {:?} closed", key);

                let callback = self.pick(&session.callbacks, session.parent(), |cb| cb.disconnect.clone());
                drop(session);
                if let Some(callback) = callback {
                    self.invoke(callback, |cb, api| cb(api, &detached));
                }
            },
            Signal::WriteFinished => {
                if let Some(callback) = self.callback(key, |cb| cb.write_finish.clone()) {
                    self.invoke(callback, |cb, api| cb(api, SessionKey { key }));
                }
            },
        }
    }

    /// Select a callback of a session, falling back to the listener of an accepted connection.
    fn pick<T>(&self, own: &Callbacks, parent: Option<Key>, slot: impl Fn(&Callbacks) -> Option<T>)
        -> Option<T>
    {
        slot(own).or_else(|| {
            let parent = self.registry.get(parent?)?;
            slot(&parent.callbacks)
        })
    }

    fn callback<T>(&self, key: Key, slot: impl Fn(&Callbacks) -> Option<T>) -> Option<T> {
        let session = self.registry.get(key)?;
        self.pick(&session.callbacks, session.parent(), slot)
    }

    fn invoke<C>(&mut self, callback: Shared<C>, call: impl FnOnce(&mut C, &mut dyn Api)) {
        let mut callback = match callback.try_borrow_mut() {
            Ok(callback) => callback,
            Err(_) => {
                net_warn!("engine: callback re-entered, skipping");
                return;
            },
        };
        call(&mut *callback, self);
    }

    fn fire_connect(&mut self, key: Key) {
        if let Some(callback) = self.callback(key, |cb| cb.connect.clone()) {
            self.invoke(callback, |cb, api| cb(api, SessionKey { key }));
        }
    }

    fn session(&self, key: SessionKey) -> Result<&Session> {
        self.registry.get(key.key).ok_or(Error::Arg)
    }

    fn session_mut(&mut self, key: SessionKey) -> Result<&mut Session> {
        self.registry.get_mut(key.key).ok_or(Error::Arg)
    }

    fn register_callback(&mut self, key: SessionKey, set: impl FnOnce(&mut Callbacks)) -> Result<()> {
        let session = self.session_mut(key)?;
        set(&mut session.callbacks);
        Ok(())
    }

    /// Check that the interface towards `remote` has an address.
    fn check_route(&self, remote: Ipv4Addr) -> Result<()> {
        let station = self.stack.netif(Interface::Station);
        let softap = self.stack.netif(Interface::SoftAp);

        let routable = match (station.up, softap.up) {
            (true, false) => !station.addr.is_unspecified(),
            (false, true) => !softap.addr.is_unspecified(),
            (true, true) if !softap.addr.is_unspecified() && softap.contains(remote) => true,
            (true, true) => {
                self.stack.station_status() == StationStatus::GotIp
                    && !station.addr.is_unspecified()
            },
            (false, false) => false,
        };

        if routable {
            Ok(())
        } else {
            Err(Error::Rte)
        }
    }

    /// Choose an unused local port for a connection.
    fn ephemeral_port(&mut self) -> Result<u16> {
        let range = self.config.ephemeral_ports.clone();
        let span = usize::from(range.end - range.start);

        for _ in 0..span {
            let port = self.next_port;
            self.next_port = if port + 1 >= range.end { range.start } else { port + 1 };
            if !self.tcp_port_in_use(port) {
                return Ok(port);
            }
        }

        Err(Error::MaxNum)
    }

    fn tcp_port_in_use(&self, port: u16) -> bool {
        self.registry.sessions().any(|(_, session)| match session.kind {
            Kind::Client | Kind::Listener { .. } => session.local.port() == port,
            _ => false,
        })
    }
}

impl<S: Stack> Api for Engine<S> {
    fn connect(&mut self, local_port: u16, remote: SocketAddrV4) -> Result<SessionKey> {
        self.tcp_connect(local_port, remote)
    }

    fn listen(&mut self, local_port: u16) -> Result<SessionKey> {
        self.tcp_listen(local_port)
    }

    fn create(&mut self, local_port: u16, remote: SocketAddrV4) -> Result<SessionKey> {
        self.udp_create(local_port, remote)
    }

    fn send(&mut self, key: SessionKey, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::Arg);
        }

        match self.session(key)?.kind {
            Kind::Client | Kind::Accepted { .. } => self.tcp_send(key.key, data),
            Kind::Udp => {
                let remote = self.session(key)?.remote;
                self.udp_sendto(key.key, remote, data)
            },
            Kind::Listener { .. } => Err(Error::Arg),
        }
    }

    fn sendto(&mut self, key: SessionKey, dst: SocketAddrV4, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::Arg);
        }

        match self.session(key)?.kind {
            Kind::Udp => self.udp_sendto(key.key, dst, data),
            _ => Err(Error::Arg),
        }
    }

    fn disconnect(&mut self, key: SessionKey) -> Result<()> {
        self.tcp_disconnect(key.key, false)
    }

    fn abort(&mut self, key: SessionKey) -> Result<()> {
        self.tcp_disconnect(key.key, true)
    }

    fn delete(&mut self, key: SessionKey) -> Result<()> {
        match self.session(key)?.kind {
            Kind::Udp => self.udp_delete(key.key),
            Kind::Listener { .. } => self.tcp_delete(key.key),
            _ => Err(Error::Arg),
        }
    }

    fn set_opt(&mut self, key: SessionKey, options: Options) -> Result<()> {
        let session = self.session_mut(key)?;
        session.options |= options;

        let (handle, keepalive) = (session.handle, session.keepalive);
        if session.is_tcp() && session.state != State::Wait {
            if options.contains(Options::NO_DELAY) {
                self.stack.set_nagle(handle, false);
            }
            if options.contains(Options::KEEPALIVE) {
                self.stack.set_keepalive(handle, Some(keepalive.to_stack()));
            }
        }

        Ok(())
    }

    fn clear_opt(&mut self, key: SessionKey, options: Options) -> Result<()> {
        let session = self.session_mut(key)?;
        session.options.remove(options);

        let handle = session.handle;
        if session.is_tcp() && session.state != State::Wait {
            if options.contains(Options::NO_DELAY) {
                self.stack.set_nagle(handle, true);
            }
            if options.contains(Options::KEEPALIVE) {
                self.stack.set_keepalive(handle, None);
            }
        }

        Ok(())
    }

    fn set_keepalive(&mut self, key: SessionKey, keepalive: KeepaliveConfig) -> Result<()> {
        let session = self.session_mut(key)?;
        if !session.options.contains(Options::KEEPALIVE) {
            return Err(Error::Arg);
        }

        session.keepalive = keepalive;
        let handle = session.handle;
        if session.is_tcp() && session.state != State::Wait {
            self.stack.set_keepalive(handle, Some(keepalive.to_stack()));
        }

        Ok(())
    }

    fn get_keepalive(&self, key: SessionKey) -> Result<KeepaliveConfig> {
        let session = self.session(key)?;
        if !session.options.contains(Options::KEEPALIVE) {
            return Err(Error::Arg);
        }

        Ok(self.stack.keepalive(session.handle)
            .map(KeepaliveConfig::from_stack)
            .unwrap_or(session.keepalive))
    }

    fn regist_connect_callback(&mut self, key: SessionKey, callback: ConnectCallback) -> Result<()> {
        self.register_callback(key, |cb| cb.connect = Some(Rc::new(RefCell::new(callback))))
    }

    fn regist_reconnect_callback(&mut self, key: SessionKey, callback: ReconnectCallback) -> Result<()> {
        self.register_callback(key, |cb| cb.reconnect = Some(Rc::new(RefCell::new(callback))))
    }

    fn regist_disconnect_callback(&mut self, key: SessionKey, callback: DisconnectCallback) -> Result<()> {
        self.register_callback(key, |cb| cb.disconnect = Some(Rc::new(RefCell::new(callback))))
    }

    fn regist_sent_callback(&mut self, key: SessionKey, callback: SentCallback) -> Result<()> {
        self.register_callback(key, |cb| cb.sent = Some(Rc::new(RefCell::new(callback))))
    }

    fn regist_recv_callback(&mut self, key: SessionKey, callback: RecvCallback) -> Result<()> {
        self.register_callback(key, |cb| cb.recv = Some(Rc::new(RefCell::new(callback))))
    }

    fn regist_write_finish_callback(&mut self, key: SessionKey, callback: WriteFinishCallback)
        -> Result<()>
    {
        self.register_callback(key, |cb| cb.write_finish = Some(Rc::new(RefCell::new(callback))))
    }

    fn get_connection_info(&self, key: SessionKey) -> Result<Vec<RemoteInfo>> {
        let session = self.session(key)?;
        let peers: Vec<RemoteInfo> = match session.kind {
            Kind::Listener { .. } => self.registry.children(key.key)
                .filter_map(|child| self.registry.get(child))
                .map(|child| RemoteInfo { state: child.state, remote: child.remote })
                .collect(),
            _ => alloc::vec![RemoteInfo { state: session.state, remote: session.remote }],
        };

        if peers.is_empty() {
            return Err(Error::Arg);
        }

        Ok(peers)
    }

    fn get_packet_info(&self, key: SessionKey) -> Result<PacketInfo> {
        if let Some(session) = self.registry.get(key.key) {
            if !session.is_tcp() {
                return Err(Error::Arg);
            }
            return Ok(self.live_packet_info(session));
        }

        [self.last_closed, self.last_failed].iter()
            .flatten()
            .find(|(closed, _)| *closed == key.key)
            .map(|&(_, packet)| packet)
            .ok_or(Error::Arg)
    }

    fn regist_time(&mut self, key: SessionKey, interval: u32, scope: Scope) -> Result<()> {
        if interval > MAX_TIMEOUT {
            return Err(Error::Arg);
        }

        let session = self.session(key)?;
        let target = match (scope, session.kind) {
            (Scope::Connection, Kind::Accepted { .. }) => key.key,
            (Scope::Listener, Kind::Listener { .. }) => key.key,
            (Scope::Listener, Kind::Accepted { parent }) => parent,
            _ => return Err(Error::Arg),
        };

        let session = self.registry.get_mut(target).ok_or(Error::Arg)?;
        match &mut session.kind {
            Kind::Listener { timeout, .. } => *timeout = interval,
            _ => session.timeout = interval,
        }

        Ok(())
    }

    fn set_max_accept(&mut self, key: SessionKey, max: usize) -> Result<()> {
        if max == 0 || max > self.config.max_connections {
            return Err(Error::Arg);
        }

        match &mut self.session_mut(key)?.kind {
            Kind::Listener { max_accept, .. } => {
                *max_accept = max;
                Ok(())
            },
            _ => Err(Error::Arg),
        }
    }

    fn max_accept(&self, key: SessionKey) -> Result<usize> {
        match self.session(key)?.kind {
            Kind::Listener { max_accept, .. } => Ok(max_accept),
            _ => Err(Error::Arg),
        }
    }

    fn set_buffer_count(&mut self, key: SessionKey, count: usize) -> Result<()> {
        if count == 0 || count > self.config.max_buffer_count {
            return Err(Error::Arg);
        }

        let session = self.session_mut(key)?;
        if !session.is_tcp() {
            return Err(Error::Arg);
        }

        session.queue.set_cap(count);
        Ok(())
    }

    fn recv_hold(&mut self, key: SessionKey) -> Result<()> {
        let session = self.session_mut(key)?;
        if !session.is_tcp() {
            return Err(Error::Arg);
        }

        session.hold.get_or_insert(0);
        Ok(())
    }

    fn recv_unhold(&mut self, key: SessionKey) -> Result<()> {
        let session = self.session_mut(key)?;
        if !session.is_tcp() {
            return Err(Error::Arg);
        }

        let handle = session.handle;
        if let Some(held) = session.hold.take() {
            if held > 0 {
                self.stack.tcp_recved(handle, held);
            }
        }

        Ok(())
    }

    fn read(&mut self, key: SessionKey, buf: &mut [u8]) -> Result<usize> {
        self.tcp_read(key.key, buf)
    }

    fn state(&self, key: SessionKey) -> Result<State> {
        Ok(self.session(key)?.state)
    }

    fn local_addr(&self, key: SessionKey) -> Result<SocketAddrV4> {
        Ok(self.session(key)?.local)
    }

    fn remote_addr(&self, key: SessionKey) -> Result<SocketAddrV4> {
        Ok(self.session(key)?.remote)
    }

    fn set_max_connections(&mut self, max: usize) -> Result<()> {
        if max == 0 || max > MAX_CONNECTIONS {
            return Err(Error::Arg);
        }

        self.config.max_connections = max;
        Ok(())
    }

    fn max_connections(&self) -> usize {
        self.config.max_connections
    }

    fn set_max_retransmissions(&mut self, max: u8) -> Result<()> {
        if max == 0 || max > MAX_RETRANSMISSIONS {
            return Err(Error::Arg);
        }

        let mut limits = self.stack.retry_limits();
        limits.max_rtx = max;
        self.stack.set_retry_limits(limits);
        Ok(())
    }

    fn set_max_syn_retransmissions(&mut self, max: u8) -> Result<()> {
        if max == 0 || max > MAX_RETRANSMISSIONS {
            return Err(Error::Arg);
        }

        let mut limits = self.stack.retry_limits();
        limits.syn_max_rtx = max;
        self.stack.set_retry_limits(limits);
        Ok(())
    }

    fn set_window(&mut self, segments: usize) -> Result<()> {
        if segments == 0 || segments > MAX_WINDOW {
            return Err(Error::Arg);
        }

        let mss = usize::from(self.stack.mss());
        self.stack.set_receive_window(segments * mss);
        Ok(())
    }

    fn window(&self) -> usize {
        match usize::from(self.stack.mss()) {
            0 => 0,
            mss => self.stack.receive_window() / mss,
        }
    }

    fn mss(&self) -> u16 {
        self.stack.mss()
    }
}

impl Config {
    /// Choose the simultaneous TCP connections.
    pub fn with_max_connections(self, max_connections: usize) -> Self {
        Config { max_connections, ..self }
    }

    /// Choose the depth of the dispatcher queue.
    pub fn with_dispatch_depth(self, dispatch_depth: usize) -> Self {
        Config { dispatch_depth, ..self }
    }

    /// Choose the largest write, in segments.
    pub fn with_chunk_mss(self, chunk_mss: usize) -> Self {
        Config { chunk_mss, ..self }
    }

    /// Choose the idle timeout of new listeners.
    pub fn with_listener_timeout(self, listener_timeout: u32) -> Self {
        Config { listener_timeout, ..self }
    }

    /// Choose the default buffer count of connections.
    pub fn with_buffer_count(self, buffer_count: usize) -> Self {
        Config { buffer_count, ..self }
    }

    /// Choose the poll interval of accepted connections.
    pub fn with_poll_interval(self, poll_interval: u8) -> Self {
        Config { poll_interval, ..self }
    }

    /// Choose the ports of unbound connections.
    pub fn with_ephemeral_ports(self, ephemeral_ports: Range<u16>) -> Self {
        Config { ephemeral_ports, ..self }
    }

    fn validate(&self) -> Result<()> {
        let valid = (1..=MAX_CONNECTIONS).contains(&self.max_connections)
            && self.dispatch_depth > 0
            && self.chunk_mss > 0
            && self.listener_timeout <= MAX_TIMEOUT
            && (1..=self.max_buffer_count).contains(&self.buffer_count)
            && self.poll_interval > 0
            && !self.ephemeral_ports.is_empty()
            && self.ephemeral_ports.start > 0;

        if valid {
            Ok(())
        } else {
            Err(Error::Arg)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_connections: 5,
            dispatch_depth: 15,
            chunk_mss: 2,
            listener_timeout: 10,
            buffer_count: 1,
            max_buffer_count: 8,
            poll_interval: 4,
            ephemeral_ports: 1024..50000,
        }
    }
}
