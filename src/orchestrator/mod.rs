//! Session orchestration modules.
//!
//! Covers the session registry, the lifecycle controller, the per-session
//! test loop, between-iteration isolation, and terminal result recording.

pub mod isolation;
pub mod lifecycle;
pub mod recording;
pub mod registry;
pub(crate) mod test_loop;

pub use lifecycle::Orchestrator;
pub use recording::TerminalOutcome;
pub use registry::{SessionEntry, SessionRegistry};
