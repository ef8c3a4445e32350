//! Byte storage owned by a session.
//!
//! Both containers have a fixed upper bound chosen when the session is set up. The ring buffer
//! never grows beyond the receive window of the stack, the send queue never holds more buffers
//! than the configured count for its session.
mod ring;
mod send_queue;

pub use self::ring::RingBuffer;
pub use self::send_queue::{SendNode, SendQueue};
