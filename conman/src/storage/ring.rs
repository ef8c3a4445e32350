use alloc::vec::Vec;

use crate::{Error, Result};

/// A fixed capacity byte ring for received data that has not been read yet.
///
/// Writing never fails. When more is written than there is free space, the oldest unread bytes
/// are overwritten so that the most recent `capacity` bytes remain available.
#[derive(Clone, Debug)]
pub struct RingBuffer {
    storage: Vec<u8>,
    /// Index of the oldest unread byte.
    read_at: usize,
    len: usize,
}

impl RingBuffer {
    /// Create an empty ring holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            storage: alloc::vec![0; capacity],
            read_at: 0,
            len: 0,
        }
    }

    /// The fixed number of bytes the ring can hold.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether there is no unread data.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append data, dropping the oldest bytes on overflow.
    ///
    /// Returns the number of bytes accepted which is always the length of `data`, even when only
    /// its tail could be retained.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let capacity = self.capacity();
        if capacity == 0 {
            return data.len();
        }

        // Only the tail can survive anyways.
        let skip = data.len().saturating_sub(capacity);
        let tail = &data[skip..];

        let overflow = (self.len + tail.len()).saturating_sub(capacity);
        self.read_at = (self.read_at + overflow) % capacity;
        self.len -= overflow;

        let write_at = (self.read_at + self.len) % capacity;
        let first = tail.len().min(capacity - write_at);
        self.storage[write_at..write_at + first].copy_from_slice(&tail[..first]);
        self.storage[..tail.len() - first].copy_from_slice(&tail[first..]);
        self.len += tail.len();

        data.len()
    }

    /// Fill `buf` completely with the oldest unread bytes.
    ///
    /// Fails with `NoData` and leaves the ring untouched if fewer bytes are buffered than `buf`
    /// can hold.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() > self.len {
            return Err(Error::NoData);
        }

        let capacity = self.capacity();
        if capacity == 0 {
            return Ok(0);
        }

        let first = buf.len().min(capacity - self.read_at);
        buf[..first].copy_from_slice(&self.storage[self.read_at..self.read_at + first]);
        let rest = buf.len() - first;
        buf[first..].copy_from_slice(&self.storage[..rest]);

        self.read_at = (self.read_at + buf.len()) % capacity;
        self.len -= buf.len();
        Ok(buf.len())
    }

    /// Drop all unread data.
    pub fn clear(&mut self) {
        self.read_at = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn wrap_around() {
        let mut ring = RingBuffer::new(8);
        assert_eq!(ring.write(b"abcdef"), 6);

        let mut buf = [0; 4];
        assert_eq!(ring.read(&mut buf), Ok(4));
        assert_eq!(&buf, b"abcd");

        assert_eq!(ring.write(b"ghijkl"), 6);
        assert_eq!(ring.len(), 8);

        let mut buf = [0; 8];
        assert_eq!(ring.read(&mut buf), Ok(8));
        assert_eq!(&buf, b"efghijkl");
        assert!(ring.is_empty());
    }

    #[test]
    fn underflow() {
        let mut ring = RingBuffer::new(4);
        ring.write(b"ab");

        let mut buf = [0; 3];
        assert_eq!(ring.read(&mut buf), Err(Error::NoData));
        assert_eq!(ring.len(), 2);

        let mut buf = [0; 2];
        assert_eq!(ring.read(&mut buf), Ok(2));
        assert_eq!(&buf, b"ab");
    }

    #[test]
    fn overwrite_oldest() {
        let mut ring = RingBuffer::new(4);
        ring.write(b"abc");
        ring.write(b"de");

        let mut buf = [0; 4];
        assert_eq!(ring.read(&mut buf), Ok(4));
        assert_eq!(&buf, b"bcde");
    }

    proptest! {
        #[test]
        fn round_trip(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut ring = RingBuffer::new(64);
            prop_assert_eq!(ring.write(&data), data.len());

            let mut buf = alloc::vec![0; data.len()];
            prop_assert_eq!(ring.read(&mut buf), Ok(data.len()));
            prop_assert_eq!(buf, data);
        }

        #[test]
        fn keeps_latest(
            prefix in proptest::collection::vec(any::<u8>(), 0..32),
            data in proptest::collection::vec(any::<u8>(), 33..200),
        ) {
            let mut ring = RingBuffer::new(32);
            ring.write(&prefix);
            prop_assert_eq!(ring.write(&data), data.len());
            prop_assert_eq!(ring.len(), 32);

            let mut buf = [0; 32];
            prop_assert_eq!(ring.read(&mut buf), Ok(32));
            prop_assert_eq!(&buf[..], &data[data.len() - 32..]);
        }
    }
}
