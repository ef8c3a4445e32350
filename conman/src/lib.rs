//! Connection management for applications sitting on top of a raw, callback driven IP stack.
//!
//! ## Table of contents
//!
//! 1. [Design](#design-and-relevant-core-concepts)
//! 2. [The raw stack boundary](stack/index.html)
//!    1. [The loopback stack](stack/loopback/index.html)
//! 3. [The engine](engine/index.html)
//!    1. [Session keys](engine/struct.SessionKey.html)
//!    1. [The operations](engine/trait.Api.html)
//! 4. Internals
//!    1. [The managed module](managed/index.html)
//!    2. [The storage module](storage/index.html)
//!
//! ## Design and relevant core concepts
//!
//! A raw IP stack offers little more than protocol control blocks and a set of callbacks per
//! block: connected, accepted, sent, received, error and a periodic poll. The stack takes care of
//! packetization, retransmission and windowing but nothing else. This library turns these
//! primitives into sessions with a lifecycle, send queues that respect the window of the stack,
//! an optional receive buffer for applications that prefer pulling data, and a single, ordered
//! place where errors and closes are reported.
//!
//! Everything runs on one cooperative task. The stack never calls into this library directly,
//! instead the [`Engine`] pulls [`stack::Event`]s and processes them in order. User callbacks
//! that could tear down the very session they are called for are never run from inside such an
//! event, they are posted to a dispatcher queue and run afterwards. Sessions are referred to by a
//! [`SessionKey`] which behaves similar to a file descriptor. It is invalidated when the session
//! is destroyed and never becomes valid again, even if the memory is reused, which is how late
//! events for an already torn down session are detected and dropped.
//!
//! [`Engine`]: engine/struct.Engine.html
//! [`SessionKey`]: engine/struct.SessionKey.html
//! [`stack::Event`]: stack/enum.Event.html
#![warn(missing_docs)]
#![warn(unreachable_pub)]

// tests should be able to use `std`
#![cfg_attr(all(
    not(feature = "std"),
    not(test)),
no_std)]

extern crate alloc;

#[macro_use] mod macros;
pub mod engine;
mod error;
pub mod managed;
pub mod stack;
pub mod storage;

pub use error::{Error, Result};

pub use engine::{
    Api,
    Config,
    Engine,
    SessionKey};
