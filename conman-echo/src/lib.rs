//! Drivers running the session engine against its loopback stack.
//!
//! `echo` connects a client to a local listener that sends everything back, `announce` sends
//! datagrams to the limited broadcast address. Both drive the engine the way an application on
//! a device would: register callbacks, then poll until the work is done. The loopback never
//! acknowledges on its own, the drivers acknowledge everything in flight after each poll.
mod score;

pub mod config;
pub use score::Score;

use std::cell::{Cell, RefCell};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;

use conman::engine::{Detached, Options};
use conman::stack::{Interface, Loopback, Netif, StationStatus};
use conman::{Api, Engine, Error, SessionKey};

/// Shared state of the echo callbacks.
struct Progress {
    pattern: Vec<u8>,
    /// Bytes handed to `send` so far.
    offset: Cell<usize>,
    echoed: RefCell<Vec<u8>>,
    sends: Cell<u32>,
    peers: RefCell<Vec<SessionKey>>,
    outcome: Cell<Option<Result<(), Error>>>,
}

impl Progress {
    fn new(total: usize) -> Self {
        Progress {
            pattern: (0..total).map(|i| i as u8).collect(),
            offset: Cell::new(0),
            echoed: RefCell::new(Vec::with_capacity(total)),
            sends: Cell::new(0),
            peers: RefCell::new(Vec::new()),
            outcome: Cell::new(None),
        }
    }

    fn finish(&self, outcome: Result<(), Error>) {
        if self.outcome.get().is_none() {
            self.outcome.set(Some(outcome));
        }
    }

    fn send_next(&self, api: &mut dyn Api, key: SessionKey, chunk: usize) {
        let offset = self.offset.get();
        if offset >= self.pattern.len() {
            return;
        }

        let end = (offset + chunk).min(self.pattern.len());
        match api.send(key, &self.pattern[offset..end]) {
            Ok(()) => {
                self.offset.set(end);
                self.sends.set(self.sends.get() + 1);
            },
            Err(err) => {
                log::warn!("[-] send of {} bytes failed: {}", end - offset, err);
                self.finish(Err(err));
            },
        }
    }
}

/// Create an engine on a loopback with the configured interfaces.
pub fn engine(config: &config::Config) -> Result<Engine<Loopback>, Error> {
    let mut stack = Loopback::new();
    stack.set_netif(Interface::Station, Netif::new(config.station, config.netmask));
    stack.set_station_status(StationStatus::GotIp);
    if let Some(softap) = config.softap {
        stack.set_netif(Interface::SoftAp, Netif::new(softap, config.netmask));
    }

    let engine_config = conman::Config::default()
        .with_max_connections(config.max_connections);
    Engine::new(stack, engine_config)
}

pub fn echo(config: &config::Config, echo: &config::Echo) -> Result<Score, Error> {
    let mut engine = engine(config)?;
    let progress = Rc::new(Progress::new(echo.total_bytes));
    let chunk = echo.buffer_bytes.max(1);

    let server = engine.listen(echo.port)?;
    let peers = progress.clone();
    engine.regist_connect_callback(server, Box::new(move |api: &mut dyn Api, key: SessionKey| {
        peers.peers.borrow_mut().push(key);
        if let Err(err) = api.set_buffer_count(key, 8) {
            log::warn!("[-] could not grow the send queue: {}", err);
        }
    }))?;
    engine.regist_recv_callback(server, Box::new(|api: &mut dyn Api, key: SessionKey, data: &[u8]| {
        if let Err(err) = api.send(key, data) {
            log::warn!("[-] echo of {} bytes failed: {}", data.len(), err);
        }
    }))?;

    let client = engine.connect(0, SocketAddrV4::new(config.station, echo.port))?;
    if echo.copy {
        engine.set_opt(client, Options::COPY)?;
    }

    let start = progress.clone();
    engine.regist_connect_callback(client, Box::new(move |api: &mut dyn Api, key: SessionKey| {
        log::info!("[+] connected, echoing {} bytes", start.pattern.len());
        start.send_next(api, key, chunk);
    }))?;
    let next = progress.clone();
    engine.regist_sent_callback(client, Box::new(move |api: &mut dyn Api, key: SessionKey| {
        next.send_next(api, key, chunk);
    }))?;
    let echoed = progress.clone();
    engine.regist_recv_callback(client, Box::new(move |api: &mut dyn Api, key: SessionKey, data: &[u8]| {
        echoed.echoed.borrow_mut().extend_from_slice(data);
        if echoed.echoed.borrow().len() >= echoed.pattern.len() {
            if let Err(err) = api.disconnect(key) {
                log::warn!("[-] disconnect failed: {}", err);
            }
        }
    }))?;
    let closed = progress.clone();
    engine.regist_disconnect_callback(client, Box::new(move |_: &mut dyn Api, detached: &Detached| {
        log::info!("[+] closed after {} buffers", detached.packet.packnum);
        closed.finish(Ok(()));
    }))?;
    let failed = progress.clone();
    engine.regist_reconnect_callback(client, Box::new(move |_: &mut dyn Api, _: &Detached, err: Error| {
        failed.finish(Err(err));
    }))?;

    let limit = (echo.total_bytes / chunk + 1) * 4 + 16;
    let mut rounds = 0;
    while progress.outcome.get().is_none() {
        if rounds >= limit {
            return Err(Error::Timeout);
        }

        engine.poll();

        let keys: Vec<SessionKey> = Some(client).into_iter()
            .chain(progress.peers.borrow().iter().copied())
            .collect();
        for key in keys {
            if let Some(handle) = engine.handle(key) {
                engine.stack_mut().ack(handle);
            }
        }

        rounds += 1;
    }

    if let Some(Err(err)) = progress.outcome.get() {
        return Err(err);
    }

    let echoed = progress.echoed.borrow();
    if *echoed != progress.pattern {
        log::warn!("[-] echoed data differs from the pattern");
    }

    Ok(Score {
        data_len: echoed.len() as u64,
        frame_count: engine.stack().frames().len() as u32,
        send_count: progress.sends.get(),
        rounds: rounds as u32,
    })
}

pub fn announce(config: &config::Config, announce: &config::Announce) -> Result<Score, Error> {
    let mut engine = engine(config)?;
    let broadcast = SocketAddrV4::new(Ipv4Addr::BROADCAST, announce.port);
    let udp = engine.create(announce.port, broadcast)?;

    let mut rounds = 0;
    for _ in 0..announce.count {
        engine.send(udp, announce.message.as_bytes())?;
        engine.poll();
        rounds += 1;
    }

    engine.delete(udp)?;

    Ok(Score {
        data_len: (announce.count * announce.message.len()) as u64,
        frame_count: engine.stack().frames().len() as u32,
        send_count: announce.count as u32,
        rounds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::config::{Announce, Config, Echo, Mode};

    fn config(mode: Mode) -> Config {
        Config {
            station: Ipv4Addr::new(192, 168, 1, 10),
            softap: None,
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            max_connections: 5,
            mode,
        }
    }

    fn echo_options(copy: bool) -> Echo {
        Echo { port: 7, buffer_bytes: 1000, total_bytes: 10_000, copy }
    }

    #[test]
    fn echo_round_trip() {
        let options = echo_options(false);
        let score = echo(&config(Mode::Echo(options.clone())), &options).unwrap();
        assert_eq!(score.data_len(), 10_000);
        assert_eq!(score.send_count(), 10);
        assert!(score.frame_count() >= 20);
    }

    #[test]
    fn echo_copied() {
        let options = echo_options(true);
        let score = echo(&config(Mode::Echo(options.clone())), &options).unwrap();
        assert_eq!(score.data_len(), 10_000);
    }

    #[test]
    fn announce_on_both_interfaces() {
        let options = Announce { port: 5000, count: 3, message: "hello".into() };
        let mut config = config(Mode::Announce(options.clone()));
        config.softap = Some(Ipv4Addr::new(192, 168, 4, 1));

        let score = announce(&config, &options).unwrap();
        assert_eq!(score.frame_count(), 6);
        assert_eq!(score.data_len(), 15);
    }
}
