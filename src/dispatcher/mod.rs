//! The dispatcher turns engine requests into broadcast announcements and
//! serves the dispatcher side of every rendezvous.
//!
//! It never decides which worker runs a job: the broadcast queue hands each
//! announcement to whichever worker pulls it, and the dispatcher only
//! re-broadcasts when that worker declines.

pub mod service;
pub mod submission;

pub use service::{Dispatcher, DispatcherMessage};
pub use submission::{SubmissionStatus, SubmissionTracker};
