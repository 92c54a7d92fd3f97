//! Wire types shared by the dispatcher and workers.
//!
//! - [`Call`]: the unit of work, identified by its content hash ([`hash_id`])
//! - [`Announcement`]: what goes on the broadcast queue
//! - [`Frame`]: what goes over a rendezvous channel
//! - [`Outcome`]: what a worker reports back
//!
//! All encodings are JSON. Decoding never coerces: malformed input is a
//! [`SwarmError::Protocol`](crate::error::SwarmError::Protocol) carrying the
//! offending bytes.

pub mod call;
pub mod codec;
pub mod message;

pub use call::{hash_id, Call};
pub use message::{Announcement, AnnouncementKind, ControlSignal, Frame, Outcome};
