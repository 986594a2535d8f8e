//! Scene construction, lifecycle and teardown orchestration.
//!
//! The [`Orchestrator`] is the library's entry point: it validates a
//! topology, persists the scene structure, provisions cloud resources in
//! dependency order, fans per-terminal creation out to concurrent tasks,
//! aggregates their status reports into scene-level completion, and tears
//! everything down again, on user deletion or on provisioning failure.

mod down;
mod orchestrator;
mod rollback;
mod status;
mod terminal;
mod up;
mod utils;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use orchestrator::*;
pub use rollback::*;
pub use utils::*;
