use alloc::vec::Vec;

use crate::managed::{Key, SlotMap};
use crate::stack::Handle;

use super::session::{Kind, Session};

/// Owner of all sessions.
///
/// Sessions are partitioned into the active ones, connections and UDP endpoints, and the
/// listening ones. A session is in exactly one of the partitions from `register` to `unregister`.
pub(crate) struct Registry {
    sessions: SlotMap<Entry>,
    active: Vec<Key>,
    listening: Vec<Key>,
}

struct Entry {
    session: Session,
    /// Index of the key in its partition.
    slot: usize,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Registry {
            sessions: SlotMap::new(),
            active: Vec::new(),
            listening: Vec::new(),
        }
    }

    pub(crate) fn register(&mut self, session: Session) -> Option<Key> {
        let list = if session.is_listener() {
            &mut self.listening
        } else {
            &mut self.active
        };

        let key = self.sessions.insert(Entry { session, slot: list.len() })?;
        list.push(key);
        Some(key)
    }

    /// Remove a session, handing back ownership.
    pub(crate) fn unregister(&mut self, key: Key) -> Option<Session> {
        let Entry { session, slot } = self.sessions.remove(key)?;
        let list = if session.is_listener() {
            &mut self.listening
        } else {
            &mut self.active
        };

        list.swap_remove(slot);
        if let Some(&moved) = list.get(slot) {
            if let Some(entry) = self.sessions.get_mut(moved) {
                entry.slot = slot;
            }
        }

        Some(session)
    }

    pub(crate) fn contains(&self, key: Key) -> bool {
        self.sessions.contains_key(key)
    }

    pub(crate) fn get(&self, key: Key) -> Option<&Session> {
        self.sessions.get(key).map(|entry| &entry.session)
    }

    pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut Session> {
        self.sessions.get_mut(key).map(|entry| &mut entry.session)
    }

    /// Find the session responsible for a stack handle.
    ///
    /// Active sessions match on their own handle. A listener matching the handle stands in for
    /// its accepted connection with the most recent peer, if that connection is still alive.
    pub(crate) fn find_by_handle(&self, handle: Handle) -> Option<Key> {
        let active = self.active.iter()
            .copied()
            .find(|&key| self.get(key).map_or(false, |session| session.handle == handle));
        if active.is_some() {
            return active;
        }

        let listener = self.find_listener(handle)?;
        let last_peer = match self.get(listener)?.kind {
            Kind::Listener { last_peer, .. } => last_peer?,
            _ => return None,
        };

        self.children(listener).find(|&key| {
            self.get(key).map_or(false, |session| session.remote == last_peer)
        })
    }

    pub(crate) fn find_listener(&self, handle: Handle) -> Option<Key> {
        self.listening.iter()
            .copied()
            .find(|&key| self.get(key).map_or(false, |session| session.handle == handle))
    }

    /// The accepted sessions of a listener.
    pub(crate) fn children(&self, listener: Key) -> impl Iterator<Item=Key> + '_ {
        self.active.iter()
            .copied()
            .filter(move |&key| match self.get(key) {
                Some(session) => session.parent() == Some(listener),
                None => false,
            })
    }

    /// Number of active sessions matching a predicate on their kind.
    pub(crate) fn count_active(&self, mut kind: impl FnMut(&Kind) -> bool) -> usize {
        self.active.iter()
            .filter_map(|&key| self.get(key))
            .filter(|session| kind(&session.kind))
            .count()
    }

    /// Number of active TCP connections, outgoing and accepted.
    pub(crate) fn count_active_tcp(&self) -> usize {
        self.count_active(|kind| matches!(kind, Kind::Client | Kind::Accepted { .. }))
    }

    pub(crate) fn active(&self) -> &[Key] {
        &self.active
    }

    pub(crate) fn listening(&self) -> &[Key] {
        &self.listening
    }

    pub(crate) fn sessions(&self) -> impl Iterator<Item=(Key, &Session)> + '_ {
        self.sessions.iter().map(|(key, entry)| (key, &entry.session))
    }
}

#[cfg(test)]
mod tests {
    use core::net::{Ipv4Addr, SocketAddrV4};

    use super::*;
    use crate::engine::session::unspecified;

    fn addr(port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), port)
    }

    fn listener(registry: &mut Registry, handle: u32) -> Key {
        let kind = Kind::Listener { max_accept: 5, timeout: 10, last_peer: None };
        registry.register(Session::new(kind, Handle(handle), unspecified(), unspecified())).unwrap()
    }

    fn child(registry: &mut Registry, parent: Key, handle: u32, remote: SocketAddrV4) -> Key {
        let kind = Kind::Accepted { parent };
        registry.register(Session::new(kind, Handle(handle), addr(80), remote)).unwrap()
    }

    #[test]
    fn partitions() {
        let mut registry = Registry::new();
        let server = listener(&mut registry, 1);
        let client = registry.register(
            Session::new(Kind::Client, Handle(2), unspecified(), addr(80))).unwrap();

        assert_eq!(registry.listening(), &[server]);
        assert_eq!(registry.active(), &[client]);
        assert_eq!(registry.count_active_tcp(), 1);

        assert!(registry.unregister(client).is_some());
        assert!(registry.unregister(client).is_none());
        assert!(registry.active().is_empty());
        assert!(!registry.contains(client));
    }

    #[test]
    fn resolve_through_listener() {
        let mut registry = Registry::new();
        let server = listener(&mut registry, 1);
        let first = child(&mut registry, server, 2, addr(5000));
        let second = child(&mut registry, server, 3, addr(5001));

        assert_eq!(registry.find_by_handle(Handle(3)), Some(second));
        assert_eq!(registry.find_by_handle(Handle(1)), None);

        if let Some(session) = registry.get_mut(server) {
            session.kind = Kind::Listener { max_accept: 5, timeout: 10, last_peer: Some(addr(5000)) };
        }
        assert_eq!(registry.find_by_handle(Handle(1)), Some(first));
        assert_eq!(registry.children(server).count(), 2);

        registry.unregister(first);
        assert_eq!(registry.find_by_handle(Handle(1)), None);
        assert_eq!(registry.find_listener(Handle(1)), Some(server));
    }

    #[test]
    fn removal_keeps_partitions_consistent() {
        let mut registry = Registry::new();
        let server = listener(&mut registry, 1);
        let keys: Vec<Key> = (0..5)
            .map(|i| child(&mut registry, server, 10 + i, addr(5000 + i as u16)))
            .collect();

        // The last key moves into the freed slot and must still be removable afterwards.
        registry.unregister(keys[1]);
        assert_eq!(registry.active(), &[keys[0], keys[4], keys[2], keys[3]]);
        registry.unregister(keys[4]);
        assert_eq!(registry.active(), &[keys[0], keys[3], keys[2]]);
        registry.unregister(keys[0]);
        registry.unregister(keys[2]);
        assert_eq!(registry.active(), &[keys[3]]);
        assert_eq!(registry.find_by_handle(Handle(13)), Some(keys[3]));

        registry.unregister(server);
        assert!(registry.listening().is_empty());
        registry.unregister(keys[3]);
        assert!(registry.active().is_empty());
        assert_eq!(registry.sessions().count(), 0);
    }
}
