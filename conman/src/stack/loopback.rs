//! Implementation of a software loop-back stack.
//!
//! All connections are between endpoints of the same stack instance. A connection attempt towards
//! a local listener completes immediately, one towards a local address without listener is reset
//! and one towards any other address stays in the handshake until its retransmissions run out.
//! Written data is delivered to the peer on output but only acknowledged explicitly with `ack`,
//! and timers advance only with `tick`. This makes every interleaving reproducible.
use core::net::{Ipv4Addr, SocketAddrV4};

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use super::wire::{Protocol, Repr};
use super::{
    Error, Event, Handle, Interface, Keepalive, Netif, Result, RetryLimits, Stack, StationStatus,
    Subscriptions, TcpInfo, TcpState};

/// Default maximum segment size.
pub const MSS: u16 = 1460;

/// Default number of segments a connection may queue.
pub const SEND_QUEUE_LIMIT: usize = 8;

/// First port handed out to unbound connections.
const EPHEMERAL_BASE: u16 = 49152;

/// A software loop-back stack.
///
/// Besides the [`Stack`] interface it offers control over the simulated network: acknowledging
/// data, advancing timers, failing connections and inspecting transmitted frames.
///
/// [`Stack`]: ../trait.Stack.html
#[derive(Debug)]
pub struct Loopback {
    next_handle: u32,
    next_ephemeral: u16,
    pcbs: BTreeMap<Handle, Pcb>,
    subscriptions: BTreeMap<Handle, Subscriptions>,
    events: VecDeque<Event>,
    suppressed: usize,
    station: Netif,
    softap: Netif,
    station_status: StationStatus,
    receive_window: usize,
    send_buffer: usize,
    mss: u16,
    limits: RetryLimits,
    max_udp_payload: usize,
    fail_writes: usize,
    time_wait: Vec<u16>,
    frames: Vec<Vec<u8>>,
}

#[derive(Debug)]
enum Pcb {
    Tcp(Tcp),
    Udp(Udp),
}

#[derive(Debug)]
struct Tcp {
    state: TcpState,
    bound: bool,
    local: SocketAddrV4,
    remote: SocketAddrV4,
    iface: Interface,
    peer: Option<Handle>,
    snd_buf: usize,
    /// Written segments waiting for output.
    unsent: VecDeque<Vec<u8>>,
    /// Lengths of segments waiting for an acknowledgment.
    unacked: VecDeque<usize>,
    snd_nxt: u32,
    rcv_nxt: u32,
    /// Received bytes not yet consumed by the application.
    rcv_pending: usize,
    nrtx: u8,
    nagle: bool,
    keepalive: Option<Keepalive>,
    poll_interval: u8,
    poll_ticks: u8,
    refuse_close: usize,
}

#[derive(Debug)]
struct Udp {
    local: Option<SocketAddrV4>,
}

impl Loopback {
    /// Create a stack with both interfaces down.
    pub fn new() -> Self {
        Loopback {
            next_handle: 1,
            next_ephemeral: EPHEMERAL_BASE,
            pcbs: BTreeMap::new(),
            subscriptions: BTreeMap::new(),
            events: VecDeque::new(),
            suppressed: 0,
            station: Netif::DOWN,
            softap: Netif::DOWN,
            station_status: StationStatus::Idle,
            receive_window: 4*usize::from(MSS),
            send_buffer: 2*usize::from(MSS),
            mss: MSS,
            limits: RetryLimits { max_rtx: 12, syn_max_rtx: 6 },
            max_udp_payload: 1472,
            fail_writes: 0,
            time_wait: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// Configure an interface.
    pub fn set_netif(&mut self, iface: Interface, netif: Netif) {
        match iface {
            Interface::Station => self.station = netif,
            Interface::SoftAp => self.softap = netif,
        }
    }

    /// Change the association status of the station interface.
    pub fn set_station_status(&mut self, status: StationStatus) {
        self.station_status = status;
    }

    /// Change the send buffer of new connections.
    pub fn set_default_send_buffer(&mut self, bytes: usize) {
        self.send_buffer = bytes;
    }

    /// Set the free send buffer of an existing connection.
    pub fn set_send_buffer(&mut self, handle: Handle, bytes: usize) {
        if let Some(tcp) = self.tcp_mut(handle) {
            tcp.snd_buf = bytes;
        }
    }

    /// Change the largest datagram payload.
    pub fn set_max_udp_payload(&mut self, bytes: usize) {
        self.max_udp_payload = bytes;
    }

    /// Let the next `count` writes fail for lack of memory.
    pub fn fail_writes(&mut self, count: usize) {
        self.fail_writes = count;
    }

    /// Let the next `count` orderly closes of a connection fail.
    pub fn refuse_close(&mut self, handle: Handle, count: usize) {
        if let Some(tcp) = self.tcp_mut(handle) {
            tcp.refuse_close = count;
        }
    }

    /// Acknowledge all data in flight on a connection.
    ///
    /// Returns the number of acknowledged bytes.
    pub fn ack(&mut self, handle: Handle) -> usize {
        let in_flight = match self.tcp(handle) {
            Some(tcp) => tcp.unacked.iter().sum(),
            None => 0,
        };
        self.ack_bytes(handle, in_flight)
    }

    /// Acknowledge up to `len` bytes in flight on a connection.
    pub fn ack_bytes(&mut self, handle: Handle, len: usize) -> usize {
        let tcp = match self.tcp_mut(handle) {
            Some(tcp) => tcp,
            None => return 0,
        };

        let mut acked = 0;
        while acked < len {
            let front = match tcp.unacked.front_mut() {
                Some(front) => front,
                None => break,
            };
            let take = (*front).min(len - acked);
            *front -= take;
            acked += take;
            if *front == 0 {
                tcp.unacked.pop_front();
            }
        }

        if acked > 0 {
            tcp.snd_buf += acked;
            tcp.nrtx = 0;
            self.events.push_back(Event::Sent { handle, len: acked });
        }

        acked
    }

    /// Advance the slow timer by one tick.
    ///
    /// Connections still in the handshake retransmit their SYN and fail once the budget is
    /// exhausted. Every other connection is polled at its configured interval.
    pub fn tick(&mut self) {
        let syn_max_rtx = self.limits.syn_max_rtx;
        let handles: Vec<Handle> = self.pcbs.keys().copied().collect();
        for handle in handles {
            let tcp = match self.tcp_mut(handle) {
                Some(tcp) => tcp,
                None => continue,
            };

            match tcp.state {
                TcpState::SynSent => {
                    tcp.nrtx = tcp.nrtx.saturating_add(1);
                    if tcp.nrtx >= syn_max_rtx {
                        self.fail(handle, Error::Abrt);
                    }
                },
                TcpState::Listen | TcpState::Closed => (),
                _ if tcp.poll_interval > 0 => {
                    tcp.poll_ticks += 1;
                    if tcp.poll_ticks >= tcp.poll_interval {
                        tcp.poll_ticks = 0;
                        self.events.push_back(Event::Poll { handle });
                    }
                },
                _ => (),
            }
        }
    }

    /// Fail a connection with an error, freeing its control block.
    ///
    /// The peer of the connection, if any, is reset.
    pub fn fail(&mut self, handle: Handle, error: Error) {
        let tcp = match self.pcbs.remove(&handle) {
            Some(Pcb::Tcp(tcp)) => tcp,
            Some(other) => {
                self.pcbs.insert(handle, other);
                return;
            },
            None => return,
        };

        net_trace!("loopback: {:?} failed with {:?} in {:?}", handle, error, tcp.state);
        self.events.push_back(Event::Error {
            handle,
            error,
            state: tcp.state,
            retries: tcp.nrtx,
        });

        if let Some(peer) = tcp.peer {
            self.fail(peer, Error::Rst);
        }
    }

    /// Fail a connection as if it exhausted its retransmissions.
    pub fn exhaust(&mut self, handle: Handle) {
        let limits = self.limits;
        if let Some(tcp) = self.tcp_mut(handle) {
            tcp.nrtx = if tcp.state.is_handshake() {
                limits.syn_max_rtx
            } else {
                limits.max_rtx
            };
        }
        self.fail(handle, Error::Abrt);
    }

    /// Queue a datagram from a remote host for a UDP control block.
    pub fn receive_datagram(&mut self, handle: Handle, from: SocketAddrV4, data: &[u8]) {
        self.events.push_back(Event::Datagram { handle, from, data: data.to_vec() });
    }

    /// Check whether a control block is allocated.
    pub fn contains(&self, handle: Handle) -> bool {
        self.pcbs.contains_key(&handle)
    }

    /// Received bytes the application has not yet consumed.
    pub fn unconsumed(&self, handle: Handle) -> usize {
        self.tcp(handle).map_or(0, |tcp| tcp.rcv_pending)
    }

    /// Whether the Nagle algorithm is enabled on a connection.
    pub fn nagle(&self, handle: Handle) -> Option<bool> {
        self.tcp(handle).map(|tcp| tcp.nagle)
    }

    /// The poll interval of a connection.
    pub fn poll_interval(&self, handle: Handle) -> Option<u8> {
        self.tcp(handle).map(|tcp| tcp.poll_interval)
    }

    /// Local ports currently in time-wait.
    pub fn time_wait(&self) -> &[u16] {
        &self.time_wait
    }

    /// Number of events dropped because their callback was not registered.
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    /// Number of events not yet taken.
    pub fn pending(&self) -> usize {
        self.events.len()
    }

    /// All frames transmitted so far.
    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    /// Take all frames transmitted so far.
    pub fn take_frames(&mut self) -> Vec<Vec<u8>> {
        core::mem::take(&mut self.frames)
    }

    fn tcp(&self, handle: Handle) -> Option<&Tcp> {
        match self.pcbs.get(&handle)? {
            Pcb::Tcp(tcp) => Some(tcp),
            Pcb::Udp(_) => None,
        }
    }

    fn tcp_mut(&mut self, handle: Handle) -> Option<&mut Tcp> {
        match self.pcbs.get_mut(&handle)? {
            Pcb::Tcp(tcp) => Some(tcp),
            Pcb::Udp(_) => None,
        }
    }

    fn udp_mut(&mut self, handle: Handle) -> Option<&mut Udp> {
        match self.pcbs.get_mut(&handle)? {
            Pcb::Udp(udp) => Some(udp),
            Pcb::Tcp(_) => None,
        }
    }

    fn allocate(&mut self, pcb: Pcb) -> Handle {
        let handle = Handle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        self.pcbs.insert(handle, pcb);
        handle
    }

    fn release(&mut self, handle: Handle) {
        self.pcbs.remove(&handle);
        self.subscriptions.remove(&handle);
    }

    fn new_tcp(&self) -> Tcp {
        Tcp {
            state: TcpState::Closed,
            bound: false,
            local: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
            remote: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
            iface: Interface::Station,
            peer: None,
            snd_buf: self.send_buffer,
            unsent: VecDeque::new(),
            unacked: VecDeque::new(),
            snd_nxt: 0,
            rcv_nxt: 0,
            rcv_pending: 0,
            nrtx: 0,
            nagle: true,
            keepalive: None,
            poll_interval: 0,
            poll_ticks: 0,
            refuse_close: 0,
        }
    }

    fn port_in_use(&self, port: u16) -> bool {
        self.time_wait.contains(&port) || self.pcbs.values().any(|pcb| match pcb {
            Pcb::Tcp(tcp) => tcp.bound && tcp.local.port() == port,
            Pcb::Udp(_) => false,
        })
    }

    fn ephemeral_port(&mut self) -> u16 {
        loop {
            let port = self.next_ephemeral;
            self.next_ephemeral = self.next_ephemeral.checked_add(1).unwrap_or(EPHEMERAL_BASE);
            if !self.port_in_use(port) {
                return port;
            }
        }
    }

    /// The interface through which an address is reached.
    fn route(&self, dst: Ipv4Addr) -> Option<(Interface, Netif)> {
        if self.softap.is_configured() && self.softap.contains(dst) {
            return Some((Interface::SoftAp, self.softap));
        }
        if self.station.is_configured() {
            return Some((Interface::Station, self.station));
        }
        if self.softap.is_configured() {
            return Some((Interface::SoftAp, self.softap));
        }
        None
    }

    fn is_local(&self, addr: Ipv4Addr) -> bool {
        addr.is_loopback()
            || (self.station.is_configured() && self.station.addr == addr)
            || (self.softap.is_configured() && self.softap.addr == addr)
    }

    fn find_listener(&self, remote: SocketAddrV4) -> Option<Handle> {
        self.pcbs.iter().find_map(|(&handle, pcb)| match pcb {
            Pcb::Tcp(tcp) if tcp.state == TcpState::Listen
                && tcp.local.port() == remote.port()
                && (tcp.local.ip().is_unspecified() || tcp.local.ip() == remote.ip()) => Some(handle),
            _ => None,
        })
    }

    fn record(&mut self, repr: Repr, payload: &[u8]) {
        self.frames.push(repr.encode(payload));
    }
}

impl Default for Loopback {
    fn default() -> Self {
        Loopback::new()
    }
}

impl Stack for Loopback {
    fn tcp_new(&mut self) -> Result<Handle> {
        let tcp = self.new_tcp();
        Ok(self.allocate(Pcb::Tcp(tcp)))
    }

    fn tcp_bind(&mut self, handle: Handle, local: SocketAddrV4) -> Result<()> {
        if self.tcp(handle).is_none() {
            return Err(Error::Arg);
        }

        if local.port() != 0 && self.port_in_use(local.port()) {
            return Err(Error::Use);
        }

        let port = match local.port() {
            0 => self.ephemeral_port(),
            port => port,
        };

        let tcp = self.tcp_mut(handle).ok_or(Error::Arg)?;
        tcp.local = SocketAddrV4::new(*local.ip(), port);
        tcp.bound = true;
        Ok(())
    }

    fn tcp_connect(&mut self, handle: Handle, remote: SocketAddrV4) -> Result<()> {
        match self.tcp(handle) {
            Some(tcp) if tcp.state == TcpState::Closed => (),
            Some(_) => return Err(Error::IsConn),
            None => return Err(Error::Arg),
        }

        let (iface, netif) = self.route(*remote.ip()).ok_or(Error::Rte)?;
        let bound = self.tcp(handle).map_or(false, |tcp| tcp.bound);
        let port = if bound {
            self.tcp(handle).map_or(0, |tcp| tcp.local.port())
        } else {
            self.ephemeral_port()
        };
        let local = SocketAddrV4::new(netif.addr, port);

        let tcp = self.tcp_mut(handle).ok_or(Error::Arg)?;
        tcp.local = local;
        tcp.bound = true;
        tcp.remote = remote;
        tcp.iface = iface;
        tcp.state = TcpState::SynSent;

        if !self.is_local(*remote.ip()) {
            return Ok(());
        }

        let listener = match self.find_listener(remote) {
            Some(listener) => listener,
            None => {
                self.fail(handle, Error::Rst);
                return Ok(());
            },
        };

        let mut child = self.new_tcp();
        child.state = TcpState::Established;
        child.local = remote;
        child.remote = local;
        child.iface = iface;
        child.peer = Some(handle);
        let child = self.allocate(Pcb::Tcp(child));

        if let Some(tcp) = self.tcp_mut(handle) {
            tcp.state = TcpState::Established;
            tcp.peer = Some(child);
        }

        net_trace!("loopback: {:?} connected to {:?} via {:?}", handle, child, listener);
        self.events.push_back(Event::Connected { handle });
        self.events.push_back(Event::Accepted { listener, handle: child });
        Ok(())
    }

    fn tcp_listen(&mut self, handle: Handle) -> Result<()> {
        let tcp = self.tcp_mut(handle).ok_or(Error::Arg)?;
        if !tcp.bound || tcp.state != TcpState::Closed {
            return Err(Error::Conn);
        }
        tcp.state = TcpState::Listen;
        Ok(())
    }

    fn tcp_write(&mut self, handle: Handle, data: &[u8], _copy: bool) -> Result<()> {
        match self.tcp(handle).map(|tcp| tcp.state) {
            Some(TcpState::Established) | Some(TcpState::CloseWait) => (),
            Some(_) => return Err(Error::Conn),
            None => return Err(Error::Arg),
        }

        if self.fail_writes > 0 {
            self.fail_writes -= 1;
            return Err(Error::Mem);
        }

        let tcp = self.tcp_mut(handle).ok_or(Error::Arg)?;

        let queuelen = tcp.unsent.len() + tcp.unacked.len();
        if data.len() > tcp.snd_buf || queuelen >= SEND_QUEUE_LIMIT {
            return Err(Error::Mem);
        }

        if !data.is_empty() {
            tcp.snd_buf -= data.len();
            tcp.unsent.push_back(data.to_vec());
        }
        Ok(())
    }

    fn tcp_output(&mut self, handle: Handle) -> Result<()> {
        let tcp = self.tcp_mut(handle).ok_or(Error::Arg)?;
        let segments: Vec<Vec<u8>> = tcp.unsent.drain(..).collect();
        let (iface, local, remote, peer) = (tcp.iface, tcp.local, tcp.remote, tcp.peer);

        for segment in segments {
            if let Some(tcp) = self.tcp_mut(handle) {
                tcp.unacked.push_back(segment.len());
                tcp.snd_nxt = tcp.snd_nxt.wrapping_add(segment.len() as u32);
            }

            self.record(Repr {
                iface,
                protocol: Protocol::Tcp,
                src: local,
                dst: remote,
                payload_len: segment.len(),
            }, &segment);

            let peer = match peer {
                Some(peer) => peer,
                None => continue,
            };

            if let Some(remote) = self.tcp_mut(peer) {
                remote.rcv_nxt = remote.rcv_nxt.wrapping_add(segment.len() as u32);
                remote.rcv_pending += segment.len();
                self.events.push_back(Event::Received { handle: peer, data: Some(segment) });
            }
        }

        Ok(())
    }

    fn tcp_recved(&mut self, handle: Handle, len: usize) {
        if let Some(tcp) = self.tcp_mut(handle) {
            tcp.rcv_pending = tcp.rcv_pending.saturating_sub(len);
        }
    }

    fn tcp_close(&mut self, handle: Handle) -> Result<()> {
        let tcp = self.tcp_mut(handle).ok_or(Error::Arg)?;
        if tcp.refuse_close > 0 {
            tcp.refuse_close -= 1;
            return Err(Error::Mem);
        }

        let (state, peer, port) = (tcp.state, tcp.peer, tcp.local.port());
        match state {
            TcpState::Established => {
                tcp.state = TcpState::FinWait2;
                match peer {
                    Some(peer) => {
                        if let Some(remote) = self.tcp_mut(peer) {
                            remote.state = TcpState::CloseWait;
                        }
                        self.events.push_back(Event::Received { handle: peer, data: None });
                    },
                    None => {
                        self.release(handle);
                        self.time_wait.push(port);
                    },
                }
            },
            TcpState::CloseWait => {
                self.release(handle);
                if let Some(peer) = peer {
                    // The peer closed first and is done now as well.
                    if let Some(remote) = self.tcp(peer) {
                        let remote_port = remote.local.port();
                        self.release(peer);
                        self.time_wait.push(remote_port);
                    }
                }
            },
            TcpState::FinWait1 | TcpState::FinWait2 | TcpState::Closing
                | TcpState::LastAck | TcpState::TimeWait => (),
            TcpState::Closed | TcpState::Listen | TcpState::SynSent | TcpState::SynRcvd => {
                self.release(handle);
            },
        }

        Ok(())
    }

    fn tcp_abort(&mut self, handle: Handle) {
        self.fail(handle, Error::Abrt);
    }

    fn tcp_info(&self, handle: Handle) -> Option<TcpInfo> {
        let tcp = self.tcp(handle)?;
        Some(TcpInfo {
            state: tcp.state,
            nrtx: tcp.nrtx,
            snd_buf: tcp.snd_buf,
            mss: self.mss,
            snd_queuelen: tcp.unsent.len() + tcp.unacked.len(),
            snd_nxt: tcp.snd_nxt,
            rcv_nxt: tcp.rcv_nxt,
            local: tcp.local,
            remote: tcp.remote,
        })
    }

    fn set_nagle(&mut self, handle: Handle, enabled: bool) {
        if let Some(tcp) = self.tcp_mut(handle) {
            tcp.nagle = enabled;
        }
    }

    fn set_keepalive(&mut self, handle: Handle, keepalive: Option<Keepalive>) {
        if let Some(tcp) = self.tcp_mut(handle) {
            tcp.keepalive = keepalive;
        }
    }

    fn keepalive(&self, handle: Handle) -> Option<Keepalive> {
        self.tcp(handle)?.keepalive
    }

    fn set_poll_interval(&mut self, handle: Handle, interval: u8) {
        if let Some(tcp) = self.tcp_mut(handle) {
            tcp.poll_interval = interval;
            tcp.poll_ticks = 0;
        }
    }

    fn purge_time_wait(&mut self, port: u16) {
        self.time_wait.retain(|&waiting| waiting != port);
    }

    fn send_queue_limit(&self) -> usize {
        SEND_QUEUE_LIMIT
    }

    fn udp_new(&mut self) -> Result<Handle> {
        Ok(self.allocate(Pcb::Udp(Udp { local: None })))
    }

    fn udp_bind(&mut self, handle: Handle, local: SocketAddrV4) -> Result<()> {
        let taken = self.pcbs.iter().any(|(&other, pcb)| match pcb {
            Pcb::Udp(Udp { local: Some(bound) }) => other != handle && bound.port() == local.port(),
            _ => false,
        });

        if taken {
            return Err(Error::Use);
        }

        let udp = self.udp_mut(handle).ok_or(Error::Arg)?;
        udp.local = Some(local);
        Ok(())
    }

    fn udp_sendto(&mut self, handle: Handle, data: &[u8], dst: SocketAddrV4, iface: Interface)
        -> Result<()>
    {
        let bound = self.udp_mut(handle).ok_or(Error::Arg)?.local;
        let local = match bound {
            Some(local) => local.port(),
            None => {
                let port = self.ephemeral_port();
                if let Some(udp) = self.udp_mut(handle) {
                    udp.local = Some(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
                }
                port
            },
        };

        if data.len() > self.max_udp_payload {
            return Err(Error::Mem);
        }

        let netif = self.netif(iface);
        if !netif.is_configured() {
            return Err(Error::Rte);
        }

        let src = SocketAddrV4::new(netif.addr, local);
        self.record(Repr {
            iface,
            protocol: Protocol::Udp,
            src,
            dst,
            payload_len: data.len(),
        }, data);

        if !self.is_local(*dst.ip()) {
            return Ok(());
        }

        let receiver = self.pcbs.iter().find_map(|(&other, pcb)| match pcb {
            Pcb::Udp(Udp { local: Some(bound) }) if bound.port() == dst.port() => Some(other),
            _ => None,
        });

        if let Some(receiver) = receiver {
            self.events.push_back(Event::Datagram { handle: receiver, from: src, data: data.to_vec() });
        }

        Ok(())
    }

    fn udp_remove(&mut self, handle: Handle) {
        if self.udp_mut(handle).is_some() {
            self.release(handle);
        }
    }

    fn max_udp_payload(&self) -> usize {
        self.max_udp_payload
    }

    fn subscribe(&mut self, handle: Handle, subscriptions: Subscriptions) {
        if subscriptions.is_empty() {
            self.subscriptions.remove(&handle);
        } else {
            self.subscriptions.insert(handle, subscriptions);
        }
    }

    fn subscriptions(&self, handle: Handle) -> Subscriptions {
        self.subscriptions.get(&handle).copied().unwrap_or(Subscriptions::empty())
    }

    fn netif(&self, iface: Interface) -> Netif {
        match iface {
            Interface::Station => self.station,
            Interface::SoftAp => self.softap,
        }
    }

    fn station_status(&self) -> StationStatus {
        self.station_status
    }

    fn receive_window(&self) -> usize {
        self.receive_window
    }

    fn set_receive_window(&mut self, bytes: usize) {
        self.receive_window = bytes;
    }

    fn mss(&self) -> u16 {
        self.mss
    }

    fn retry_limits(&self) -> RetryLimits {
        self.limits
    }

    fn set_retry_limits(&mut self, limits: RetryLimits) {
        self.limits = limits;
    }

    fn next_event(&mut self) -> Option<Event> {
        while let Some(event) = self.events.pop_front() {
            let handle = event.handle();
            let kind = Subscriptions::of(&event);
            let registered = self.subscriptions(handle).contains(kind);

            let deliver = match event {
                // The control block is already gone for these.
                Event::Error { .. } => {
                    if !self.pcbs.contains_key(&handle) {
                        self.subscriptions.remove(&handle);
                    }
                    registered
                },
                Event::Datagram { .. } => registered,
                _ => registered && self.pcbs.contains_key(&handle),
            };

            if deliver {
                return Some(event);
            }

            net_trace!("loopback: suppressed {:?}", kind);
            self.suppressed += 1;
        }

        None
    }
}
