//! Background event-log consumers for relic.
//!
//! An [`Agent`] replays a repository's event log on its own thread, keeping
//! a durable cursor so that several agents can consume the same log
//! independently. What an agent does with each event is supplied through
//! three small capability traits:
//!
//! - [`EventSource`]: where events come from
//! - [`CursorStore`]: where the cursor is persisted
//! - [`EventHandler`]: the side effect applied per event
//!
//! Progress is published as an [`AgentInfo`] snapshot that any thread can
//! read without blocking.

pub mod agent;
pub mod error;
pub mod info;
pub mod traits;

pub use agent::{Agent, DEFAULT_BATCH_SIZE};
pub use error::{AgentError, AgentResult};
pub use info::{AgentInfo, AgentState};
pub use traits::{CursorStore, EventHandler, EventSource};
