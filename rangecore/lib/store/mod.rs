//! SQLite-backed scene state store.

mod db;
mod scene;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use db::*;
pub use scene::*;
