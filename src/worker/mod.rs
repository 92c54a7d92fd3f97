//! Worker side of the engine.
//!
//! A worker pulls announcements from the shared broadcast queue and acts on
//! each one:
//! - **RUN, matching tags**: connect to the rendezvous, send `HELLO`, fetch
//!   the call, execute it, cache the outcome, send it back
//! - **RUN, no matching tags**: connect, send `NOT_MATCHED`, disconnect
//! - **RESULT**: answer from the local cache, or `NOT_FOUND`
//!
//! # Components
//!
//! - [`Worker`]: the poll loop and per-announcement state machine
//! - [`CallExecutor`]: runs a call against the [`FunctionRegistry`], handing
//!   the handler a [`CallContext`] that is cancelled when the worker stops
//! - [`ResultCache`]: the worker's private TTL cache of outcomes
//!
//! Outcomes are never shared between workers.

pub mod cache;
pub mod executor;
pub mod registry;
pub mod runner;

pub use cache::{CacheEntry, ResultCache};
pub use executor::CallExecutor;
pub use registry::{CallContext, FunctionRegistry, Handler};
pub use runner::Worker;
