//! The Recursive Loop Model (RLM) runtime core: the coordinator/sub-agent
//! execution engine that drives plan execution.
//!
//! Five subsystems, leaves first: [`breaker`] → [`router`] →
//! [`scratchpad`] → [`subagent`] → [`dispatcher`] → [`coordinator`].
//! Everything the core consumes from its host (tool registry, model
//! transport, durable storage, event bus, plan source) lives behind the
//! traits in [`collab`].

#![deny(unsafe_code)]

pub mod breaker;
pub mod collab;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod router;
pub mod scratchpad;
pub mod scratchpad_view;
pub mod subagent;
pub mod types;

pub use breaker::{CircuitBreaker, CircuitState};
pub use config::RuntimeConfig;
pub use coordinator::{Coordinator, CoordinatorStatus};
pub use dispatcher::Dispatcher;
pub use error::RlmError;
pub use router::{ExecutionModelSelector, ModelRouter};
pub use scratchpad::Scratchpad;
pub use scratchpad_view::ScratchpadView;
pub use subagent::SubAgent;
