//! The chat session core: one in-memory session per ongoing conversation,
//! a concurrency-safe registry indexing them, and the idle sweep that
//! evicts abandoned sessions.

mod chatbot;
mod registry;

pub use chatbot::{ChatSession, Reply, ENDED_REPLY};
pub use registry::{run_idle_sweeper, SessionRegistry};
