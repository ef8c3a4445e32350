//! UDP endpoints.
use core::net::{Ipv4Addr, SocketAddrV4};

use alloc::vec::Vec;

use crate::managed::Key;
use crate::stack::{Handle, Interface, Stack, Subscriptions};
use crate::{Error, Result};

use super::session::{Kind, Session};
use super::{Engine, SessionKey};

const BOTH: &[Interface] = &[Interface::Station, Interface::SoftAp];
const STATION: &[Interface] = &[Interface::Station];
const SOFTAP: &[Interface] = &[Interface::SoftAp];

impl<S: Stack> Engine<S> {
    pub(super) fn udp_create(&mut self, local_port: u16, remote: SocketAddrV4) -> Result<SessionKey> {
        let taken = local_port != 0 && self.registry.sessions().any(|(_, session)| {
            session.kind == Kind::Udp && session.local.port() == local_port
        });

        if taken {
            return Err(Error::IsConn);
        }

        let local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, local_port);
        let handle = self.stack.udp_new()?;

        // Unbound endpoints get a port on their first datagram.
        if local_port != 0 {
            if let Err(err) = self.stack.udp_bind(handle, local) {
                self.stack.udp_remove(handle);
                return Err(err.into());
            }
        }

        let key = match self.registry.register(Session::new(Kind::Udp, handle, local, remote)) {
            Some(key) => key,
            None => {
                self.stack.udp_remove(handle);
                return Err(Error::Mem);
            },
        };

        self.stack.subscribe(handle, Subscriptions::DATAGRAM);
        net_debug!("engine: {:?} bound udp {}", key, local);
        Ok(SessionKey { key })
    }

    /// Send a datagram, split by the largest payload of the stack.
    pub(super) fn udp_sendto(&mut self, key: Key, dst: SocketAddrV4, data: &[u8]) -> Result<()> {
        let handle = self.registry.get(key).ok_or(Error::Arg)?.handle;
        let ifaces = self.udp_interfaces(*dst.ip())?;

        let max = self.stack.max_udp_payload();
        if max == 0 {
            return Err(Error::Mem);
        }

        for chunk in data.chunks(max) {
            for &iface in ifaces {
                self.stack.udp_sendto(handle, chunk, dst, iface)?;
            }
        }

        net_trace!("engine: {:?} sent {} bytes to {} via {:?}", key, data.len(), dst, ifaces);
        Ok(())
    }

    /// The interfaces a datagram to `dst` leaves through.
    ///
    /// The limited broadcast goes out of every configured interface. A directed broadcast or a
    /// unicast in the subnet of the access point goes out there, anything else through the
    /// station if it has an address.
    fn udp_interfaces(&self, dst: Ipv4Addr) -> Result<&'static [Interface]> {
        let station = self.stack.netif(Interface::Station);
        let softap = self.stack.netif(Interface::SoftAp);

        if dst.is_broadcast() && station.is_configured() && softap.is_configured() {
            return Ok(BOTH);
        }

        if softap.is_configured() && (softap.contains(dst) || softap.broadcast() == dst) {
            return Ok(SOFTAP);
        }

        if station.is_configured() {
            Ok(STATION)
        } else if softap.is_configured() {
            Ok(SOFTAP)
        } else {
            Err(Error::Rte)
        }
    }

    pub(super) fn udp_delete(&mut self, key: Key) -> Result<()> {
        let session = self.registry.unregister(key).ok_or(Error::Arg)?;
        self.stack.subscribe(session.handle, Subscriptions::empty());
        self.stack.udp_remove(session.handle);
        net_debug!("engine: udp {:?} deleted", key);
        Ok(())
    }

    pub(super) fn on_datagram(&mut self, handle: Handle, from: SocketAddrV4, data: Vec<u8>) {
        let key = match self.registry.find_by_handle(handle) {
            Some(key) => key,
            None => {
                net_debug!("engine: datagram for {:?} without session", handle);
                return;
            },
        };

        if let Some(session) = self.registry.get_mut(key) {
            session.remote = from;
            session.packet.recv_length += data.len();
        }

        match self.callback(key, |cb| cb.recv.clone()) {
            Some(callback) => self.invoke(callback, |cb, api| cb(api, SessionKey { key }, &data[..])),
            None => {
                net_trace!("engine: {:?} dropped datagram from {}", key, from);
            },
        }
    }
}
