//! `rangecore` is a cyber-range scene construction and lifecycle
//! orchestration library.
//!
//! # Overview
//!
//! rangecore takes a declarative topology (networks, gateways, terminals
//! and their interconnections) and turns it into running cloud resources.
//! It handles:
//! - Topology validation with full violation reporting
//! - Preallocation of scarce shared addressing resources
//! - Dependency-ordered provisioning with concurrent terminal creation
//! - Race-safe per-entity status aggregation
//! - Idempotent, best-effort teardown and rollback on partial failure
//!
//! # Architecture
//!
//! rangecore consists of several key components:
//!
//! - **Config**: Topology types, validation and orchestrator settings
//! - **Provider**: Traits the cloud backend, proxy and status sink implement
//! - **Store**: SQLite-backed scene state with race-free status updates
//! - **Alloc**: Named locks, CIDR assignment, shared-pool reservation
//! - **Orchestration**: The provisioning pipeline, state machine and
//!   teardown coordinator
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rangecore::{
//!     config::{OrchestratorSettings, Topology},
//!     orchestration::Orchestrator,
//!     provider::{MockCloud, MockProxy, MockSink},
//!     store,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = OrchestratorSettings::builder()
//!         .external_cloud_net_id("ext-net-1")
//!         .platform_ip("10.0.0.1".parse()?)
//!         .build();
//!
//!     let pool = store::init_db("/var/lib/rangecore/scene.db", &store::SCENE_DB_MIGRATOR)
//!         .await?;
//!     let orchestrator = Orchestrator::new(
//!         settings,
//!         Arc::new(MockCloud::new()),
//!         Arc::new(MockProxy::new()),
//!         Arc::new(MockSink::new()),
//!         pool,
//!     );
//!
//!     let topology = Topology::from_yaml(&std::fs::read_to_string("scene.yaml")?)?;
//!     let scene_id = orchestrator.create_scene(topology, None).await?;
//!     orchestrator.wait_idle().await;
//!
//!     let overview = orchestrator.scene_overview(&scene_id).await?;
//!     println!("scene {} is {}", overview.scene.name, overview.scene.status);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`alloc`] - Resource preallocation and named locks
//! - [`config`] - Topology configuration and validation
//! - [`models`] - Persisted scene/entity rows and status enums
//! - [`orchestration`] - Scene lifecycle management
//! - [`provider`] - External collaborator interfaces
//! - [`store`] - Scene state persistence

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod alloc;
pub mod config;
pub mod models;
pub mod orchestration;
pub mod provider;
pub mod store;

pub use error::*;
