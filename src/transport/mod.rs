//! Message transport between the dispatcher and workers.
//!
//! Two channels with different jobs:
//! - [`BroadcastQueue`]: small announcements, pushed once, pulled by one worker
//! - [`RendezvousListener`] / [`RendezvousStream`]: a private loopback TCP
//!   connection per announcement for the call payload and its outcome
//!
//! Keeping payloads off the broadcast queue means a large call never delays
//! other announcements.

pub mod broadcast;
pub mod rendezvous;

pub use broadcast::BroadcastQueue;
pub use rendezvous::{RendezvousListener, RendezvousStream};
