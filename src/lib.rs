pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod transport;
pub mod worker;

pub use config::EngineConfig;
pub use engine::{Engine, StopReport};
pub use error::{Result, SwarmError};
pub use protocol::{Call, Outcome};
pub use worker::{CallContext, FunctionRegistry, Handler};
