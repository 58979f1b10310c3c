//! A browser task agent: an LLM picks one action per step, an external
//! worker process applies it to a live page, and a pair of guards keeps
//! the loop from spinning in place.

pub mod agent;
pub mod brain;
pub mod config;
pub mod error;
pub mod extract;
pub mod face;
pub mod guard;
pub mod hands;
pub mod logging;
pub mod normalize;
pub mod types;

pub use agent::{Agent, AgentConfig, HaltReason, Outcome, RunContext};
pub use error::{AgentError, DecisionError, NormalizeError, WorkerError};
pub use types::{Action, Observation, Record, Tool};
