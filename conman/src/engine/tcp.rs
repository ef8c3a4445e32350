//! TCP sessions: connecting, accepting, transfer and teardown.
use core::net::{Ipv4Addr, SocketAddrV4};

use crate::managed::Key;
use crate::stack::{self, Handle, RetryLimits, Stack, Subscriptions, TcpState};
use crate::storage::RingBuffer;
use crate::{Error, Result};

use super::dispatch::Signal;
use super::session::{Kind, Options, PacketInfo, Session, State};
use super::{Engine, SessionKey};

impl<S: Stack> Engine<S> {
    pub(super) fn tcp_connect(&mut self, local_port: u16, remote: SocketAddrV4) -> Result<SessionKey> {
        if self.registry.count_active_tcp() >= self.config.max_connections {
            return Err(Error::MaxNum);
        }

        self.check_route(*remote.ip())?;

        if local_port != 0 && self.tcp_port_in_use(local_port) {
            return Err(Error::IsConn);
        }

        let port = match local_port {
            0 => self.ephemeral_port()?,
            port => port,
        };
        let local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);

        let handle = self.stack.tcp_new()?;
        let mut session = Session::new(Kind::Client, handle, local, remote);
        session.queue.set_cap(self.config.buffer_count);

        let key = match self.registry.register(session) {
            Some(key) => key,
            None => {
                self.stack.tcp_abort(handle);
                return Err(Error::Mem);
            },
        };

        self.stack.subscribe(handle, Subscriptions::ERR | Subscriptions::CONNECTED);

        let started = match self.stack.tcp_bind(handle, local) {
            Ok(()) => self.stack.tcp_connect(handle, remote),
            Err(err) => Err(err),
        };

        if let Err(err) = started {
            net_debug!("engine: connect to {} failed: {}", remote, err);
            self.stack.subscribe(handle, Subscriptions::empty());
            self.stack.tcp_abort(handle);
            self.registry.unregister(key);
            return Err(err.into());
        }

        net_debug!("engine: {:?} connecting {} -> {}", key, local, remote);
        Ok(SessionKey { key })
    }

    pub(super) fn tcp_listen(&mut self, local_port: u16) -> Result<SessionKey> {
        if local_port == 0 {
            return Err(Error::Arg);
        }

        if self.tcp_port_in_use(local_port) {
            return Err(Error::IsConn);
        }

        let local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, local_port);
        let handle = self.stack.tcp_new()?;

        let listening = match self.stack.tcp_bind(handle, local) {
            Ok(()) => self.stack.tcp_listen(handle),
            Err(err) => Err(err),
        };

        if let Err(err) = listening {
            self.stack.tcp_abort(handle);
            return Err(err.into());
        }

        let kind = Kind::Listener {
            max_accept: self.config.max_connections,
            timeout: self.config.listener_timeout,
            last_peer: None,
        };
        let mut session = Session::new(kind, handle, local, super::session::unspecified());
        session.state = State::Listen;

        let key = match self.registry.register(session) {
            Some(key) => key,
            None => {
                // Never subscribed, nothing can refer to the handle.
                let _ = self.stack.tcp_close(handle);
                return Err(Error::Mem);
            },
        };

        self.stack.subscribe(handle, Subscriptions::ACCEPT);
        net_debug!("engine: {:?} listening on {}", key, local);
        Ok(SessionKey { key })
    }

    pub(super) fn on_connected(&mut self, handle: Handle) {
        let key = match self.registry.find_by_handle(handle) {
            Some(key) => key,
            None => {
                net_debug!("engine: connected {:?} has no session", handle);
                return;
            },
        };

        let info = self.stack.tcp_info(handle);
        let subscriptions = self.stack.subscriptions(handle);
        self.stack.subscribe(handle, subscriptions | Subscriptions::SENT | Subscriptions::RECV);
        self.stack.set_nagle(handle, false);

        let session = match self.registry.get_mut(key) {
            Some(session) => session,
            None => return,
        };

        session.state = State::Connect;
        session.write_ready = true;
        session.idle = 0;
        if let Some(info) = info {
            session.local = info.local;
            session.remote = info.remote;
        }

        if session.options.contains(Options::KEEPALIVE) {
            let keepalive = session.keepalive.to_stack();
            self.stack.set_keepalive(handle, Some(keepalive));
        }

        net_debug!("engine: {:?} connected", key);
        self.fire_connect(key);
    }

    pub(super) fn on_accepted(&mut self, listener: Handle, handle: Handle) {
        let parent = match self.registry.find_listener(listener) {
            Some(parent) => parent,
            None => return self.reject(handle),
        };

        let (max_accept, options, keepalive) = match self.registry.get(parent) {
            Some(Session { kind: Kind::Listener { max_accept, .. }, options, keepalive, .. }) => {
                (*max_accept, *options, *keepalive)
            },
            _ => return self.reject(handle),
        };

        if self.registry.children(parent).count() >= max_accept
            || self.registry.count_active_tcp() >= self.config.max_connections
        {
            net_debug!("engine: listener {:?} is at capacity", parent);
            return self.reject(handle);
        }

        let info = match self.stack.tcp_info(handle) {
            Some(info) => info,
            None => return self.reject(handle),
        };

        let mut session = Session::new(Kind::Accepted { parent }, handle, info.local, info.remote);
        session.state = State::Connect;
        session.options = options;
        session.keepalive = keepalive;
        session.write_ready = true;
        session.queue.set_cap(self.config.buffer_count);

        let key = match self.registry.register(session) {
            Some(key) => key,
            None => return self.reject(handle),
        };

        self.stack.subscribe(handle, Subscriptions::SENT
            | Subscriptions::RECV
            | Subscriptions::POLL
            | Subscriptions::ERR);
        self.stack.set_poll_interval(handle, self.config.poll_interval);
        self.stack.set_nagle(handle, false);
        if options.contains(Options::KEEPALIVE) {
            self.stack.set_keepalive(handle, Some(keepalive.to_stack()));
        }

        if let Some(Session { kind: Kind::Listener { last_peer, .. }, .. }) = self.registry.get_mut(parent) {
            *last_peer = Some(info.remote);
        }

        net_debug!("engine: {:?} accepted {} on {:?}", key, info.remote, parent);
        self.fire_connect(key);
    }

    fn reject(&mut self, handle: Handle) {
        self.stack.subscribe(handle, Subscriptions::empty());
        self.stack.tcp_abort(handle);
    }

    pub(super) fn tcp_send(&mut self, key: Key, data: &[u8]) -> Result<()> {
        let limit = self.stack.send_queue_limit();
        let session = self.registry.get_mut(key).ok_or(Error::Arg)?;

        match session.state {
            State::Wait | State::Close => return Err(Error::Conn),
            _ => (),
        }

        let queued = self.stack.tcp_info(session.handle).map_or(0, |info| info.snd_queuelen);

        if session.options.contains(Options::COPY) {
            if !session.write_ready {
                return Err(Error::Arg);
            }
            if queued >= limit {
                return Err(Error::MaxNum);
            }
            session.queue.push_back(data.to_vec());
            session.write_ready = false;
        } else {
            if queued >= limit {
                return Err(Error::MaxNum);
            }
            session.queue.enqueue(data.to_vec())?;
        }

        session.state = State::Write;
        session.idle = 0;
        net_trace!("engine: {:?} queued {} bytes", key, data.len());

        self.write_pending(key)
    }

    /// Hand queued data to the stack while it has room.
    ///
    /// Each write is capped by the free send buffer and the chunk size. A write failing for lack
    /// of memory is retried with half the length until it succeeds or reaches zero.
    fn write_pending(&mut self, key: Key) -> Result<()> {
        let max_chunk = self.config.chunk_mss;

        loop {
            let session = self.registry.get_mut(key).ok_or(Error::Arg)?;
            let handle = session.handle;
            let copy = session.options.contains(Options::COPY);

            let info = self.stack.tcp_info(handle).ok_or(Error::Conn)?;
            if info.snd_buf == 0 {
                return Ok(());
            }

            let unsent = match session.queue.unsent() {
                Some(unsent) => unsent,
                None => return Ok(()),
            };

            let mut len = unsent.len()
                .min(info.snd_buf)
                .min(max_chunk * usize::from(info.mss));
            if len == 0 {
                return Ok(());
            }

            loop {
                match self.stack.tcp_write(handle, &unsent[..len], copy) {
                    Ok(()) => break,
                    Err(stack::Error::Mem) => {
                        len = if len < 3 { len - 1 } else { len / 2 };
                        if len == 0 {
                            net_debug!("engine: {:?} out of send memory", key);
                            return Err(Error::Mem);
                        }
                    },
                    Err(err) => return Err(err.into()),
                }
            }

            let finished = session.queue.mark_written(len);
            self.stack.tcp_output(handle)?;

            if finished && copy {
                session.write_ready = true;
                self.post(key, Signal::WriteFinished);
            }
        }
    }

    pub(super) fn on_sent(&mut self, handle: Handle, len: usize) {
        let key = match self.registry.find_by_handle(handle) {
            Some(key) => key,
            None => return,
        };

        self.refresh_packet(key);
        let session = match self.registry.get_mut(key) {
            Some(session) => session,
            None => return,
        };

        session.idle = 0;
        session.packet.sent_length = len;
        let retired = session.queue.acknowledge(len);
        session.packet.packnum = session.packet.packnum.wrapping_add(retired as u32);
        if retired > 0 && session.state == State::Write {
            session.state = State::Connect;
        }

        for _ in 0..retired {
            if let Some(callback) = self.callback(key, |cb| cb.sent.clone()) {
                self.invoke(callback, |cb, api| cb(api, SessionKey { key }));
            }
        }

        match self.registry.get(key) {
            Some(session) if session.state != State::Close => (),
            _ => return,
        }

        if let Err(err) = self.write_pending(key) {
            net_debug!("engine: {:?} keeps data queued: {}", key, err);
        }
    }

    pub(super) fn on_received(&mut self, handle: Handle, data: Option<alloc::vec::Vec<u8>>) {
        let key = match self.registry.find_by_handle(handle) {
            Some(key) => key,
            None => {
                net_debug!("engine: received on {:?} without session", handle);
                return;
            },
        };

        let data = match data {
            Some(data) => data,
            None => {
                net_debug!("engine: {:?} closed by peer", key);
                if let Err(err) = self.shutdown(key, false) {
                    net_debug!("engine: {:?} close deferred: {}", key, err);
                }
                return;
            },
        };

        let callback = self.callback(key, |cb| cb.recv.clone());
        let window = self.stack.receive_window();
        let session = match self.registry.get_mut(key) {
            Some(session) => session,
            None => return,
        };

        if callback.is_none() && session.ring.is_none() {
            session.ring = Some(RingBuffer::new(window));
            session.hold.get_or_insert(0);
        }

        session.packet.recv_length += data.len();
        match session.hold.as_mut() {
            Some(held) => *held += data.len(),
            None => self.stack.tcp_recved(handle, data.len()),
        }

        let callback = match callback {
            Some(callback) => callback,
            None => {
                if let Some(ring) = session.ring.as_mut() {
                    ring.write(&data);
                }
                return;
            },
        };

        session.idle = 0;
        session.state = State::Read;
        self.invoke(callback, |cb, api| cb(api, SessionKey { key }, &data[..]));

        let established = self.stack.tcp_info(handle)
            .map_or(false, |info| info.state == TcpState::Established);
        if let Some(session) = self.registry.get_mut(key) {
            if session.state == State::Read && established {
                session.state = State::Connect;
            }
        }
    }

    pub(super) fn tcp_read(&mut self, key: Key, buf: &mut [u8]) -> Result<usize> {
        let session = self.registry.get_mut(key).ok_or(Error::Arg)?;
        if !session.is_tcp() {
            return Err(Error::Arg);
        }

        let ring = session.ring.as_mut().ok_or(Error::NoData)?;
        let read = ring.read(buf)?;

        if let Some(held) = session.hold.as_mut() {
            let released = read.min(*held);
            *held -= released;
            self.stack.tcp_recved(session.handle, released);
        }

        Ok(read)
    }

    /// Start the teardown of a connection.
    ///
    /// An orderly close that the stack refuses leaves the connection receiving, so that it is
    /// attempted again when the peer closes.
    fn shutdown(&mut self, key: Key, force: bool) -> Result<()> {
        self.refresh_packet(key);
        let session = self.registry.get_mut(key).ok_or(Error::Arg)?;
        let handle = session.handle;
        let subscriptions = self.stack.subscriptions(handle);

        if force {
            self.stack.subscribe(handle, Subscriptions::empty());
            session.queue.clear();
            self.stack.tcp_abort(handle);
        } else {
            self.stack.subscribe(handle, subscriptions - Subscriptions::RECV);
            if let Err(err) = self.stack.tcp_close(handle) {
                self.stack.subscribe(handle, subscriptions);
                return Err(err.into());
            }
            self.stack.subscribe(handle, Subscriptions::empty());
        }

        session.state = State::Close;
        self.post(key, Signal::Close);
        Ok(())
    }

    pub(super) fn tcp_disconnect(&mut self, key: Key, force: bool) -> Result<()> {
        let session = self.registry.get(key).ok_or(Error::Arg)?;
        if !session.is_tcp() {
            return Err(Error::Arg);
        }

        if session.state == State::Close {
            return Err(Error::InProgress);
        }

        if let Err(err) = self.shutdown(key, force) {
            net_debug!("engine: {:?} close deferred: {}", key, err);
        }

        Ok(())
    }

    pub(super) fn tcp_delete(&mut self, key: Key) -> Result<()> {
        if self.registry.children(key).next().is_some() {
            return Err(Error::InProgress);
        }

        let session = self.registry.unregister(key).ok_or(Error::Arg)?;
        self.stack.subscribe(session.handle, Subscriptions::empty());
        if self.stack.tcp_close(session.handle).is_err() {
            self.stack.tcp_abort(session.handle);
        }

        net_debug!("engine: listener {:?} deleted", key);
        Ok(())
    }

    pub(super) fn on_error(&mut self, handle: Handle, error: stack::Error, state: TcpState, retries: u8) {
        let key = match self.registry.find_by_handle(handle) {
            Some(key) => key,
            None => {
                net_debug!("engine: error on {:?} without session", handle);
                return;
            },
        };

        let error = classify(error, state, retries, self.stack.retry_limits());
        if let Some(session) = self.registry.get_mut(key) {
            session.state = State::Close;
        }

        net_debug!("engine: {:?} failed in {:?} after {} retries: {}", key, state, retries, error);
        self.post(key, Signal::Error(error));
    }

    pub(super) fn on_poll(&mut self, handle: Handle) {
        let key = match self.registry.find_by_handle(handle) {
            Some(key) => key,
            None => return,
        };

        let (parent, state) = match self.registry.get(key) {
            Some(session) => (session.parent(), session.state),
            None => return,
        };

        if state == State::Close {
            return;
        }

        let established = self.stack.tcp_info(handle)
            .map_or(false, |info| info.state == TcpState::Established);

        if established {
            let listener_timeout = parent
                .and_then(|parent| self.registry.get(parent))
                .and_then(|listener| match listener.kind {
                    Kind::Listener { timeout, .. } => Some(timeout),
                    _ => None,
                })
                .unwrap_or(self.config.listener_timeout);

            let session = match self.registry.get_mut(key) {
                Some(session) => session,
                None => return,
            };

            let timeout = match session.timeout {
                0 => listener_timeout,
                own => own,
            };

            if timeout == 0 {
                session.idle = 0;
                return;
            }

            session.idle += 1;
            if session.idle < timeout {
                return;
            }

            net_debug!("engine: {:?} idle for {} polls", key, session.idle);
        }

        if let Err(err) = self.shutdown(key, false) {
            net_debug!("engine: {:?} close deferred: {}", key, err);
        }
    }

    fn refresh_packet(&mut self, key: Key) {
        let packet = match self.registry.get(key) {
            Some(session) if session.is_tcp() => self.live_packet_info(session),
            _ => return,
        };

        if let Some(session) = self.registry.get_mut(key) {
            session.packet = packet;
        }
    }

    pub(super) fn live_packet_info(&self, session: &Session) -> PacketInfo {
        let mut packet = session.packet;
        if let Some(info) = self.stack.tcp_info(session.handle) {
            packet.snd_buf_size = info.snd_buf;
            packet.snd_queuelen = info.snd_queuelen;
            packet.packseqno = info.snd_nxt;
            packet.packseq_nxt = info.rcv_nxt;
        }
        packet.total_queuelen = self.stack.send_queue_limit();
        packet
    }
}

/// Classify a connection failure by the state it happened in.
///
/// Only aborts are classified. An abort after the retransmissions were used up becomes `Conn`
/// during the handshake, `Timeout` when established and `Clsd` while closing.
pub(crate) fn classify(error: stack::Error, state: TcpState, retries: u8, limits: RetryLimits) -> Error {
    if error != stack::Error::Abrt {
        return error.into();
    }

    match state {
        TcpState::SynSent | TcpState::SynRcvd if retries >= limits.syn_max_rtx => Error::Conn,
        TcpState::Established if retries >= limits.max_rtx => Error::Timeout,
        TcpState::FinWait1 | TcpState::CloseWait if retries >= limits.max_rtx => Error::Clsd,
        TcpState::FinWait2 | TcpState::LastAck => Error::Clsd,
        TcpState::Closed => Error::Conn,
        _ => error.into(),
    }
}
