//! External collaborator interfaces.
//!
//! The orchestrator core never talks to a cloud vendor API directly. It
//! consumes the [`CloudProvider`] trait for resource creation/deletion, the
//! [`ProxyRegistrar`] trait for host-level port proxying, and emits
//! [`StatusEvent`]s through the [`StatusSink`] trait. All resource handles
//! crossing these seams are opaque strings: the core stores them and passes
//! them back for deletion, never interpreting their format.

mod mock;
mod traits;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use mock::*;
pub use traits::*;
