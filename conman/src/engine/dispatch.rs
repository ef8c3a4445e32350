use alloc::collections::VecDeque;

use crate::managed::Key;
use crate::Error;

/// A deferred notification for a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Signal {
    /// The connection failed, deliver the reconnect callback.
    Error(Error),
    /// The connection was closed, deliver the disconnect callback.
    Close,
    /// A copied buffer has been handed to the stack completely.
    WriteFinished,
}

/// The queue of deferred notifications.
///
/// Tasks are run strictly in the order they were posted, and only by the engine draining the
/// queue. A task whose session has been removed in the meantime is dropped when it comes up.
pub(crate) struct Dispatcher {
    queue: VecDeque<(Key, Signal)>,
    /// Queue length above which posting reports a backlog.
    depth: usize,
}

impl Dispatcher {
    pub(crate) fn new(depth: usize) -> Self {
        Dispatcher {
            queue: VecDeque::with_capacity(depth),
            depth,
        }
    }

    /// Post a task behind all others.
    ///
    /// Returns `true` if the queue now holds more tasks than its depth.
    pub(crate) fn post(&mut self, key: Key, signal: Signal) -> bool {
        self.queue.push_back((key, signal));
        self.queue.len() > self.depth
    }

    pub(crate) fn next(&mut self) -> Option<(Key, Signal)> {
        self.queue.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::SlotMap;

    #[test]
    fn fifo_beyond_depth() {
        let mut keys = SlotMap::new();
        let a = keys.insert(()).unwrap();
        let b = keys.insert(()).unwrap();

        let mut dispatcher = Dispatcher::new(2);
        assert!(!dispatcher.post(a, Signal::WriteFinished));
        assert!(!dispatcher.post(b, Signal::Close));
        assert!(dispatcher.post(a, Signal::Error(Error::Timeout)));
        assert_eq!(dispatcher.len(), 3);

        assert_eq!(dispatcher.next(), Some((a, Signal::WriteFinished)));
        assert_eq!(dispatcher.next(), Some((b, Signal::Close)));
        assert_eq!(dispatcher.next(), Some((a, Signal::Error(Error::Timeout))));
        assert_eq!(dispatcher.next(), None);
    }
}
