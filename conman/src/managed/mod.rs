//! Containers managing the lifetime of elements behind stable keys.
//!
//! Sessions are referenced from many places that must not hold a borrow: the deferred task
//! queue, the handle lookup of the stack events, the back-reference of an accepted connection to
//! its listener. All of these store a `Key` instead and detect removal of the element on lookup.
pub mod slotmap;

pub use self::slotmap::{Key, SlotMap};
