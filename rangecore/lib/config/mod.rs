//! Topology configuration types, validation and orchestrator settings.

mod defaults;
mod settings;
mod topology;
mod validate;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use settings::*;
pub use topology::*;
