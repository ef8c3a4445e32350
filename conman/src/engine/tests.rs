use core::cell::{Cell, RefCell};
use core::net::{Ipv4Addr, SocketAddrV4};

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;

use proptest::prelude::*;

use crate::stack::wire::{frame, IfaceId, Protocol};
use crate::stack::{self, Interface, Loopback, Netif, Stack, StationStatus};
use super::*;

const HOST: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
const MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

fn station() -> Loopback {
    let mut stack = Loopback::new();
    stack.set_netif(Interface::Station, Netif::new(HOST, MASK));
    stack.set_station_status(StationStatus::GotIp);
    stack
}

fn engine() -> Engine<Loopback> {
    Engine::new(station(), Config::default()).unwrap()
}

fn host(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(HOST, port)
}

/// A listener on port 1000 with one connected client.
fn pair(engine: &mut Engine<Loopback>) -> (SessionKey, SessionKey, SessionKey) {
    let server = engine.listen(1000).unwrap();
    let accepted = Rc::new(Cell::new(None));
    let slot = accepted.clone();
    engine.regist_connect_callback(server, Box::new(move |_: &mut dyn Api, key: SessionKey| {
        slot.set(Some(key));
    })).unwrap();

    let client = engine.connect(0, host(1000)).unwrap();
    engine.poll();

    let child = accepted.get().expect("No connection accepted");
    (server, client, child)
}

fn count_disconnects(engine: &mut Engine<Loopback>, key: SessionKey) -> Rc<Cell<usize>> {
    let count = Rc::new(Cell::new(0));
    let inner = count.clone();
    engine.regist_disconnect_callback(key, Box::new(move |_: &mut dyn Api, _: &Detached| {
        inner.set(inner.get() + 1);
    })).unwrap();
    count
}

fn collect_errors(engine: &mut Engine<Loopback>, key: SessionKey) -> Rc<RefCell<Vec<(SessionKind, Error)>>> {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let inner = errors.clone();
    engine.regist_reconnect_callback(key, Box::new(move |_: &mut dyn Api, detached: &Detached, err: Error| {
        inner.borrow_mut().push((detached.kind, err));
    })).unwrap();
    errors
}

fn collect_data(engine: &mut Engine<Loopback>, key: SessionKey) -> Rc<RefCell<Vec<u8>>> {
    let data = Rc::new(RefCell::new(Vec::new()));
    let inner = data.clone();
    engine.regist_recv_callback(key, Box::new(move |_: &mut dyn Api, _: SessionKey, bytes: &[u8]| {
        inner.borrow_mut().extend_from_slice(bytes);
    })).unwrap();
    data
}

fn count_sent(engine: &mut Engine<Loopback>, key: SessionKey) -> Rc<Cell<usize>> {
    let count = Rc::new(Cell::new(0));
    let inner = count.clone();
    engine.regist_sent_callback(key, Box::new(move |_: &mut dyn Api, _: SessionKey| {
        inner.set(inner.get() + 1);
    })).unwrap();
    count
}

fn tcp_frames(engine: &Engine<Loopback>) -> usize {
    engine.stack().frames().iter()
        .filter(|bytes| frame::new_checked(bytes).unwrap().protocol() == Protocol::Tcp)
        .count()
}

#[test]
fn connect_and_accept() {
    let mut engine = engine();
    let (server, client, child) = pair(&mut engine);

    assert_eq!(engine.active_count(), 2);
    assert_eq!(engine.listening_count(), 1);
    assert_eq!(engine.state(client), Ok(State::Connect));
    assert_eq!(engine.state(child), Ok(State::Connect));

    let client_addr = engine.local_addr(client).unwrap();
    assert_eq!(client_addr.ip(), &HOST);
    assert_eq!(engine.remote_addr(child), Ok(client_addr));

    let peers = engine.get_connection_info(server).unwrap();
    assert_eq!(peers, [RemoteInfo { state: State::Connect, remote: client_addr }]);

    let handle = engine.handle(client).unwrap();
    assert_eq!(engine.stack().nagle(handle), Some(false));
    let child_handle = engine.handle(child).unwrap();
    assert_eq!(engine.stack().poll_interval(child_handle), Some(4));
}

#[test]
fn large_send_is_split() {
    let mut engine = engine();
    let (_, client, child) = pair(&mut engine);
    let sent = count_sent(&mut engine, client);
    let received = collect_data(&mut engine, child);

    let data: Vec<u8> = (0..4000).map(|i| i as u8).collect();
    engine.send(client, &data).unwrap();
    assert_eq!(engine.state(client), Ok(State::Write));
    engine.poll();

    let handle = engine.handle(client).unwrap();
    assert_eq!(engine.stack_mut().ack(handle), 2920);
    engine.poll();
    assert_eq!(sent.get(), 0);

    assert_eq!(engine.stack_mut().ack(handle), 1080);
    engine.poll();
    assert_eq!(sent.get(), 1);

    assert_eq!(*received.borrow(), data);
    assert_eq!(tcp_frames(&engine), 2);
    assert_eq!(engine.state(client), Ok(State::Connect));

    let packet = engine.get_packet_info(client).unwrap();
    assert_eq!(packet.packnum, 1);
    assert_eq!(packet.sent_length, 1080);
    assert_eq!(engine.get_packet_info(child).unwrap().recv_length, 4000);
}

#[test]
fn duplicate_listener() {
    let mut engine = engine();
    let server = engine.listen(1000).unwrap();

    assert_eq!(engine.listen(1000), Err(Error::IsConn));
    assert_eq!(engine.accept(1000), Err(Error::IsConn));
    assert_eq!(engine.listening_count(), 1);
    assert_eq!(engine.active_count(), 0);
    assert_eq!(engine.state(server), Ok(State::Listen));
}

#[test]
fn idle_connection_times_out() {
    let mut engine = engine();
    let (server, client, child) = pair(&mut engine);
    engine.regist_time(child, 5, Scope::Connection).unwrap();

    let server_closes = count_disconnects(&mut engine, server);
    let client_closes = count_disconnects(&mut engine, client);

    let poll_ticks = |engine: &mut Engine<Loopback>, count: usize| {
        for _ in 0..count {
            for _ in 0..4 {
                engine.stack_mut().tick();
            }
            engine.poll();
        }
    };

    poll_ticks(&mut engine, 4);
    assert_eq!(server_closes.get(), 0);
    assert_eq!(engine.active_count(), 2);

    poll_ticks(&mut engine, 2);
    assert_eq!(server_closes.get(), 1);
    assert_eq!(client_closes.get(), 1);
    assert_eq!(engine.active_count(), 0);
    assert_eq!(engine.state(child), Err(Error::Arg));
}

#[test]
fn zero_timeout_never_closes() {
    let mut engine = engine();
    let (server, _, child) = pair(&mut engine);
    engine.regist_time(server, 0, Scope::Listener).unwrap();

    for _ in 0..100 {
        engine.stack_mut().tick();
        engine.poll();
    }

    assert_eq!(engine.state(child), Ok(State::Connect));
    assert_eq!(engine.regist_time(child, MAX_TIMEOUT + 1, Scope::Connection), Err(Error::Arg));
}

#[test]
fn broadcast_on_both_interfaces() {
    let mut stack = station();
    stack.set_netif(Interface::SoftAp, Netif::new(Ipv4Addr::new(192, 168, 4, 1), MASK));
    let mut engine = Engine::new(stack, Config::default()).unwrap();

    let udp = engine.create(5000, SocketAddrV4::new(Ipv4Addr::BROADCAST, 5000)).unwrap();
    engine.send(udp, b"announce").unwrap();

    let frames = engine.stack_mut().take_frames();
    assert_eq!(frames.len(), 2);
    let ifaces: Vec<IfaceId> = frames.iter()
        .map(|bytes| frame::new_checked(bytes).unwrap().iface())
        .collect();
    assert_eq!(ifaces, [IfaceId::Station, IfaceId::SoftAp]);

    // A directed broadcast only leaves through its own subnet.
    engine.sendto(udp, SocketAddrV4::new(Ipv4Addr::new(192, 168, 4, 255), 5000), b"ap").unwrap();
    let frames = engine.stack_mut().take_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frame::new_checked(&frames[0]).unwrap().iface(), IfaceId::SoftAp);
}

#[test]
fn datagrams_are_split_and_delivered() {
    let mut engine = engine();
    let receiver = engine.create(6000, host(0)).unwrap();
    let sender = engine.create(6001, host(6000)).unwrap();
    let data = collect_data(&mut engine, receiver);

    engine.stack_mut().set_max_udp_payload(4);
    engine.send(sender, b"0123456789").unwrap();
    engine.poll();

    assert_eq!(engine.stack().frames().len(), 3);
    assert_eq!(*data.borrow(), b"0123456789");
    assert_eq!(engine.remote_addr(receiver), Ok(host(6001)));
    assert_eq!(engine.get_connection_info(receiver).unwrap()[0].remote, host(6001));

    assert_eq!(engine.delete(sender), Ok(()));
    assert_eq!(engine.send(sender, b"x"), Err(Error::Arg));
}

#[test]
fn duplicate_udp_port() {
    let mut engine = engine();
    let remote = host(7000);
    let first = engine.create(5000, remote).unwrap();

    assert_eq!(engine.create(5000, host(7001)), Err(Error::IsConn));
    assert_eq!(engine.active_count(), 1);
    assert_eq!(engine.remote_addr(first), Ok(remote));
    assert_eq!(engine.state(first), Ok(State::Wait));
}

#[test]
fn double_disconnect() {
    let mut engine = engine();
    let (_, client, _) = pair(&mut engine);
    let closes = count_disconnects(&mut engine, client);
    let errors = collect_errors(&mut engine, client);

    assert_eq!(engine.disconnect(client), Ok(()));
    assert_eq!(engine.disconnect(client), Err(Error::InProgress));
    assert_eq!(engine.abort(client), Err(Error::InProgress));
    engine.poll();

    assert_eq!(closes.get() + errors.borrow().len(), 1);
    assert_eq!(engine.disconnect(client), Err(Error::Arg));
}

#[test]
fn refused_close_is_retried() {
    let mut engine = engine();
    let (_, client, _) = pair(&mut engine);
    let closes = count_disconnects(&mut engine, client);
    let handle = engine.handle(client).unwrap();

    engine.stack_mut().refuse_close(handle, 1);
    assert_eq!(engine.disconnect(client), Ok(()));
    assert_eq!(engine.state(client), Ok(State::Connect));

    assert_eq!(engine.disconnect(client), Ok(()));
    engine.poll();
    assert_eq!(closes.get(), 1);
}

#[test]
fn no_route() {
    let mut engine = Engine::new(Loopback::new(), Config::default()).unwrap();
    assert_eq!(engine.connect(0, host(80)), Err(Error::Rte));

    // With both interfaces up the station needs an address lease.
    let mut stack = station();
    stack.set_netif(Interface::SoftAp, Netif::new(Ipv4Addr::new(192, 168, 4, 1), MASK));
    stack.set_station_status(StationStatus::Connecting);
    let mut engine = Engine::new(stack, Config::default()).unwrap();
    assert_eq!(engine.connect(0, SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 80)), Err(Error::Rte));
    assert!(engine.connect(0, SocketAddrV4::new(Ipv4Addr::new(192, 168, 4, 2), 80)).is_ok());
}

#[test]
fn connection_ceiling() {
    let mut engine = engine();
    engine.set_max_connections(1).unwrap();
    let remote = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 80);

    let first = engine.connect(0, remote).unwrap();
    assert_eq!(engine.state(first), Ok(State::Wait));
    assert_eq!(engine.connect(0, remote), Err(Error::MaxNum));
    assert_eq!(engine.connect(4000, remote), Err(Error::MaxNum));

    assert_eq!(engine.set_max_connections(0), Err(Error::Arg));
    assert_eq!(engine.set_max_connections(MAX_CONNECTIONS + 1), Err(Error::Arg));
}

#[test]
fn handshake_timeout() {
    let mut engine = engine();
    let client = engine.connect(0, SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 80)).unwrap();
    let errors = collect_errors(&mut engine, client);

    for _ in 0..6 {
        engine.stack_mut().tick();
        engine.poll();
    }

    assert_eq!(*errors.borrow(), [(SessionKind::Client, Error::Conn)]);
    assert_eq!(engine.active_count(), 0);
}

#[test]
fn retransmission_timeout() {
    let mut engine = engine();
    let (server, client, _) = pair(&mut engine);
    let client_errors = collect_errors(&mut engine, client);
    let server_errors = collect_errors(&mut engine, server);

    let handle = engine.handle(client).unwrap();
    engine.stack_mut().exhaust(handle);
    engine.poll();

    assert_eq!(*client_errors.borrow(), [(SessionKind::Client, Error::Timeout)]);
    assert_eq!(*server_errors.borrow(), [(SessionKind::Accepted, Error::Stack(stack::Error::Rst))]);
    assert_eq!(engine.active_count(), 0);
}

#[test]
fn queue_depth_cap() {
    let mut engine = engine();
    let (_, client, child) = pair(&mut engine);
    let received = collect_data(&mut engine, child);
    let handle = engine.handle(client).unwrap();

    engine.stack_mut().set_send_buffer(handle, 0);
    assert_eq!(engine.send(client, b"first"), Ok(()));
    assert_eq!(engine.send(client, b"second"), Err(Error::MaxNum));
    assert_eq!(engine.send(client, b""), Err(Error::Arg));

    assert_eq!(engine.set_buffer_count(client, 9), Err(Error::Arg));
    engine.set_buffer_count(client, 2).unwrap();
    assert_eq!(engine.send(client, b"second"), Ok(()));
    engine.poll();
    assert!(received.borrow().is_empty());
}

#[test]
fn failed_write_stays_queued() {
    let mut engine = engine();
    let (_, client, child) = pair(&mut engine);
    let received = collect_data(&mut engine, child);
    let sent = count_sent(&mut engine, client);
    engine.set_buffer_count(client, 2).unwrap();

    engine.send(client, b"abc").unwrap();
    engine.stack_mut().fail_writes(2);
    assert_eq!(engine.send(client, b"def"), Err(Error::Mem));
    engine.poll();
    assert_eq!(*received.borrow(), b"abc");

    let handle = engine.handle(client).unwrap();
    engine.stack_mut().ack(handle);
    engine.poll();
    assert_eq!(sent.get(), 1);
    assert_eq!(*received.borrow(), b"abcdef");

    engine.stack_mut().ack(handle);
    engine.poll();
    assert_eq!(sent.get(), 2);
}

#[test]
fn copied_writes() {
    let mut engine = engine();
    let (_, client, _) = pair(&mut engine);
    engine.set_opt(client, Options::COPY).unwrap();

    let finished = Rc::new(Cell::new(0));
    let inner = finished.clone();
    engine.regist_write_finish_callback(client, Box::new(move |_: &mut dyn Api, _: SessionKey| {
        inner.set(inner.get() + 1);
    })).unwrap();

    engine.send(client, b"abc").unwrap();
    assert_eq!(engine.pending_tasks(), 1);
    engine.poll();
    assert_eq!(finished.get(), 1);

    let handle = engine.handle(client).unwrap();
    engine.stack_mut().set_send_buffer(handle, 0);
    engine.send(client, b"def").unwrap();
    assert_eq!(engine.send(client, b"ghi"), Err(Error::Arg));
    engine.poll();
    assert_eq!(finished.get(), 1);
}

#[test]
fn pull_mode_receive() {
    let mut engine = engine();
    let (_, client, child) = pair(&mut engine);
    let child_handle = engine.handle(child).unwrap();

    engine.send(client, b"hello").unwrap();
    engine.poll();
    assert_eq!(engine.stack().unconsumed(child_handle), 5);

    let mut buf = [0; 3];
    assert_eq!(engine.read(child, &mut buf), Ok(3));
    assert_eq!(&buf, b"hel");
    assert_eq!(engine.stack().unconsumed(child_handle), 2);

    // More than buffered fails and leaves the data in place.
    let mut buf = [0; 8];
    assert_eq!(engine.read(child, &mut buf), Err(Error::NoData));
    assert_eq!(engine.stack().unconsumed(child_handle), 2);

    let mut buf = [0; 2];
    assert_eq!(engine.read(child, &mut buf), Ok(2));
    assert_eq!(&buf, b"lo");
    assert_eq!(engine.read(child, &mut buf), Err(Error::NoData));
    assert_eq!(engine.stack().unconsumed(child_handle), 0);
}

#[test]
fn held_receive_window() {
    let mut engine = engine();
    let (_, client, child) = pair(&mut engine);
    let received = collect_data(&mut engine, child);
    let child_handle = engine.handle(child).unwrap();

    engine.recv_hold(child).unwrap();
    engine.send(client, b"hello").unwrap();
    engine.poll();
    assert_eq!(*received.borrow(), b"hello");
    assert_eq!(engine.stack().unconsumed(child_handle), 5);

    engine.recv_unhold(child).unwrap();
    assert_eq!(engine.stack().unconsumed(child_handle), 0);
}

#[test]
fn echo_from_callback() {
    let mut engine = engine();
    let (server, client, _) = pair(&mut engine);

    engine.regist_recv_callback(server, Box::new(|api: &mut dyn Api, key: SessionKey, data: &[u8]| {
        api.send(key, data).unwrap();
    })).unwrap();
    let echoed = collect_data(&mut engine, client);

    engine.send(client, b"ping").unwrap();
    engine.poll();
    assert_eq!(*echoed.borrow(), b"ping");
}

#[test]
fn close_from_callback() {
    let mut engine = engine();
    let (server, client, child) = pair(&mut engine);
    let closes = count_disconnects(&mut engine, server);

    engine.regist_recv_callback(child, Box::new(|api: &mut dyn Api, key: SessionKey, _: &[u8]| {
        api.disconnect(key).unwrap();
    })).unwrap();

    engine.send(client, b"bye").unwrap();
    engine.poll();
    assert_eq!(closes.get(), 1);
    assert_eq!(engine.active_count(), 0);
}

#[test]
fn options_and_keepalive() {
    let mut engine = engine();
    let (_, client, _) = pair(&mut engine);
    let handle = engine.handle(client).unwrap();

    assert_eq!(engine.get_keepalive(client), Err(Error::Arg));
    let keepalive = KeepaliveConfig { idle: 30, interval: 5, count: 3 };
    assert_eq!(engine.set_keepalive(client, keepalive), Err(Error::Arg));

    engine.set_opt(client, Options::KEEPALIVE).unwrap();
    engine.set_keepalive(client, keepalive).unwrap();
    assert_eq!(engine.get_keepalive(client), Ok(keepalive));
    assert_eq!(engine.stack().keepalive(handle).map(|k| k.idle_ms), Some(30_000));

    engine.clear_opt(client, Options::KEEPALIVE | Options::NO_DELAY).unwrap();
    assert_eq!(engine.stack().keepalive(handle), None);
    assert_eq!(engine.stack().nagle(handle), Some(true));
}

#[test]
fn reuse_address_after_close() {
    let mut engine = engine();
    engine.listen(1000).unwrap();

    let client = engine.connect(4000, host(1000)).unwrap();
    engine.poll();
    engine.disconnect(client).unwrap();
    engine.poll();
    assert_eq!(engine.stack().time_wait(), &[4000]);
    assert_eq!(engine.connect(4000, host(1000)), Err(Error::Stack(stack::Error::Use)));

    engine.stack_mut().purge_time_wait(4000);
    let client = engine.connect(4000, host(1000)).unwrap();
    engine.set_opt(client, Options::REUSE_ADDR).unwrap();
    engine.poll();
    engine.disconnect(client).unwrap();
    engine.poll();
    assert!(engine.stack().time_wait().is_empty());
    assert!(engine.connect(4000, host(1000)).is_ok());
}

#[test]
fn listener_lifecycle() {
    let mut engine = engine();
    let (server, client, _) = pair(&mut engine);

    assert_eq!(engine.delete(client), Err(Error::Arg));
    assert_eq!(engine.delete(server), Err(Error::InProgress));

    engine.disconnect(client).unwrap();
    engine.poll();
    assert_eq!(engine.get_connection_info(server), Err(Error::Arg));
    assert_eq!(engine.delete(server), Ok(()));
    assert_eq!(engine.listening_count(), 0);
    assert!(engine.listen(1000).is_ok());
}

#[test]
fn accept_limit() {
    let mut engine = engine();
    let (server, _, _) = pair(&mut engine);
    assert_eq!(engine.set_max_accept(server, 6), Err(Error::Arg));
    engine.set_max_accept(server, 1).unwrap();
    assert_eq!(engine.max_accept(server), Ok(1));

    let second = engine.connect(0, host(1000)).unwrap();
    let errors = collect_errors(&mut engine, second);
    engine.poll();

    assert_eq!(*errors.borrow(), [(SessionKind::Client, Error::Stack(stack::Error::Rst))]);
    assert_eq!(engine.get_connection_info(server).unwrap().len(), 1);
}

#[test]
fn statistics_survive_close() {
    let mut engine = engine();
    let (_, client, _) = pair(&mut engine);

    engine.send(client, b"hello").unwrap();
    let handle = engine.handle(client).unwrap();
    engine.stack_mut().ack(handle);
    engine.poll();
    engine.abort(client).unwrap();
    engine.poll();

    assert_eq!(engine.state(client), Err(Error::Arg));
    let packet = engine.get_packet_info(client).unwrap();
    assert_eq!(packet.packnum, 1);
    assert_eq!(packet.packseqno, 5);
}

#[test]
fn tunables() {
    let mut engine = engine();

    assert_eq!(engine.mss(), 1460);
    assert_eq!(engine.window(), 4);
    assert_eq!(engine.set_window(0), Err(Error::Arg));
    assert_eq!(engine.set_window(MAX_WINDOW + 1), Err(Error::Arg));
    engine.set_window(8).unwrap();
    assert_eq!(engine.window(), 8);

    assert_eq!(engine.set_max_retransmissions(MAX_RETRANSMISSIONS + 1), Err(Error::Arg));
    engine.set_max_retransmissions(5).unwrap();
    engine.set_max_syn_retransmissions(3).unwrap();
    let limits = engine.stack().retry_limits();
    assert_eq!((limits.max_rtx, limits.syn_max_rtx), (5, 3));

    let invalid = Config::default().with_max_connections(0);
    assert_eq!(Engine::new(Loopback::new(), invalid).err(), Some(Error::Arg));
    let invalid = Config::default().with_buffer_count(9);
    assert_eq!(Engine::new(Loopback::new(), invalid).err(), Some(Error::Arg));
}

#[test]
fn backlog_is_delivered_in_order() {
    let mut engine = Engine::new(station(), Config::default().with_dispatch_depth(1)).unwrap();
    let server = engine.listen(1000).unwrap();

    let accepted = Rc::new(RefCell::new(Vec::new()));
    let slot = accepted.clone();
    engine.regist_connect_callback(server, Box::new(move |_: &mut dyn Api, key: SessionKey| {
        slot.borrow_mut().push(key);
    })).unwrap();

    for _ in 0..3 {
        engine.connect(0, host(1000)).unwrap();
    }
    engine.poll();
    let children = accepted.borrow().clone();
    assert_eq!(children.len(), 3);

    // Children report through the listener. The first report tears down the others, which must
    // neither run nested nor get lost.
    let closed = Rc::new(RefCell::new(Vec::new()));
    let nested = Rc::new(Cell::new(false));
    let (log, inner, rest) = (closed.clone(), nested.clone(), children.clone());
    engine.regist_disconnect_callback(server, Box::new(move |api: &mut dyn Api, detached: &Detached| {
        log.borrow_mut().push(detached.key);
        if log.borrow().len() == 1 {
            api.abort(rest[1]).unwrap();
            api.abort(rest[2]).unwrap();
            inner.set(log.borrow().len() != 1);
        }
    })).unwrap();

    engine.abort(children[0]).unwrap();
    assert!(closed.borrow().is_empty());
    assert_eq!(engine.pending_tasks(), 1);

    engine.poll();
    assert!(!nested.get());
    assert_eq!(*closed.borrow(), children);
    assert_eq!(engine.pending_tasks(), 0);
}

#[derive(Clone, Copy, Debug)]
enum Op {
    Connect,
    Disconnect(usize),
    Abort(usize),
    Tick,
}

fn op() -> impl Strategy<Value=Op> {
    prop_oneof![
        Just(Op::Connect),
        (0..8usize).prop_map(Op::Disconnect),
        (0..8usize).prop_map(Op::Abort),
        Just(Op::Tick),
    ]
}

proptest! {
    #[test]
    fn active_sessions_balance(ops in proptest::collection::vec(op(), 1..40)) {
        let mut engine = engine();
        let server = engine.listen(1000).unwrap();

        let accepted = Rc::new(Cell::new(0usize));
        let finished = Rc::new(Cell::new(0usize));

        let inner = accepted.clone();
        engine.regist_connect_callback(server, Box::new(move |_: &mut dyn Api, _: SessionKey| {
            inner.set(inner.get() + 1);
        })).unwrap();

        let register_terminal = |engine: &mut Engine<Loopback>, key: SessionKey| {
            let inner = finished.clone();
            engine.regist_disconnect_callback(key, Box::new(move |_: &mut dyn Api, _: &Detached| {
                inner.set(inner.get() + 1);
            })).unwrap();
            let inner = finished.clone();
            engine.regist_reconnect_callback(key, Box::new(move |_: &mut dyn Api, _: &Detached, _: Error| {
                inner.set(inner.get() + 1);
            })).unwrap();
        };
        register_terminal(&mut engine, server);

        let mut clients = Vec::new();
        let mut connected = 0;

        for op in ops {
            match op {
                Op::Connect => if let Ok(key) = engine.connect(0, host(1000)) {
                    register_terminal(&mut engine, key);
                    clients.push(key);
                    connected += 1;
                },
                Op::Disconnect(idx) => if let Some(&key) = clients.get(idx) {
                    let _ = engine.disconnect(key);
                },
                Op::Abort(idx) => if let Some(&key) = clients.get(idx) {
                    let _ = engine.abort(key);
                },
                Op::Tick => engine.stack_mut().tick(),
            }

            engine.poll();
            prop_assert!(engine.active_count() <= MAX_CONNECTIONS);
            prop_assert_eq!(engine.active_count() + finished.get(), connected + accepted.get());
        }
    }
}
