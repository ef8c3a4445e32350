use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::{Error, Result};

/// One buffer handed to `send`, owned by the queue until fully acknowledged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendNode {
    payload: Vec<u8>,
    /// Bytes handed to the stack so far.
    written: usize,
    /// Bytes acknowledged by the peer so far.
    acked: usize,
}

/// The ordered buffers of a session that are not yet fully acknowledged.
///
/// Buffers are written strictly in order and each one is retired exactly once, when its last
/// byte has been acknowledged. A retired buffer is dropped immediately, the stack never refers
/// to it again.
#[derive(Clone, Debug)]
pub struct SendQueue {
    nodes: VecDeque<SendNode>,
    cap: usize,
}

impl SendNode {
    fn new(payload: Vec<u8>) -> Self {
        SendNode { payload, written: 0, acked: 0 }
    }

    /// The complete payload of the buffer.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The bytes not yet handed to the stack.
    pub fn unsent(&self) -> &[u8] {
        &self.payload[self.written..]
    }

    /// Number of bytes still waiting for an acknowledgment.
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.acked
    }

    fn is_written(&self) -> bool {
        self.written == self.payload.len()
    }
}

impl SendQueue {
    /// Create an empty queue admitting at most `cap` buffers.
    pub fn new(cap: usize) -> Self {
        SendQueue {
            nodes: VecDeque::new(),
            cap,
        }
    }

    /// The maximum number of buffers admitted by `enqueue`.
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Change the number of admitted buffers.
    ///
    /// Buffers already queued are kept even if they exceed the new cap.
    pub fn set_cap(&mut self, cap: usize) {
        self.cap = cap;
    }

    /// Number of buffers that are not fully acknowledged.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if all buffers have been retired.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check if `enqueue` would be rejected.
    pub fn is_full(&self) -> bool {
        self.nodes.len() >= self.cap
    }

    /// Append a buffer if the cap permits.
    ///
    /// On failure the queue is left exactly as it was.
    pub fn enqueue(&mut self, payload: Vec<u8>) -> Result<()> {
        if self.is_full() {
            return Err(Error::MaxNum);
        }

        self.push_back(payload);
        Ok(())
    }

    /// Append a buffer regardless of the cap.
    ///
    /// Used when admission has been decided by other means, for example the stack copying data
    /// into its own buffers where its queue length is the relevant limit.
    pub fn push_back(&mut self, payload: Vec<u8>) {
        self.nodes.push_back(SendNode::new(payload));
    }

    /// The buffers in queue order.
    pub fn iter(&self) -> impl Iterator<Item=&SendNode> + '_ {
        self.nodes.iter()
    }

    /// The unsent part of the first buffer that has not been completely written.
    pub fn unsent(&self) -> Option<&[u8]> {
        self.nodes.iter()
            .find(|node| !node.is_written())
            .map(SendNode::unsent)
    }

    /// Record that `len` bytes of the current unsent data have been handed to the stack.
    ///
    /// Returns `true` if this finished writing a buffer.
    pub fn mark_written(&mut self, len: usize) -> bool {
        let node = match self.nodes.iter_mut().find(|node| !node.is_written()) {
            Some(node) => node,
            None => return false,
        };

        node.written = (node.written + len).min(node.payload.len());
        node.is_written()
    }

    /// Number of bytes handed to the stack and not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.nodes.iter()
            .map(|node| node.written - node.acked)
            .sum()
    }

    /// Apply an acknowledgment of `len` bytes to the queue head.
    ///
    /// An acknowledgment larger than the head carries over to the following buffers. Returns the
    /// number of buffers that have been retired by it.
    pub fn acknowledge(&mut self, mut len: usize) -> usize {
        let mut retired = 0;

        while len > 0 {
            let head = match self.nodes.front_mut() {
                Some(head) => head,
                None => break,
            };

            let take = len.min(head.written - head.acked);
            if take == 0 {
                break;
            }

            head.acked += take;
            len -= take;

            if head.remaining() == 0 {
                self.nodes.pop_front();
                retired += 1;
            }
        }

        if len > 0 {
            net_debug!("acknowledgment of {} bytes beyond written data", len);
        }

        retired
    }

    /// Drop all buffers, written or not.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}
