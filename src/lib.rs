//! Armada - Cluster Provisioning Core
//!
//! An orchestration core for provisioning and managing the lifecycle of
//! compute nodes in an HPC cluster: node creation, deletion, idling,
//! activation, software-profile transfer, power control, and SAN block
//! storage attachment, delegating infrastructure specifics to pluggable
//! resource and storage adapters.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       Node Lifecycle Manager                      │
//! │   create / delete / idle / activate / transfer / power control    │
//! ├──────────────┬──────────────────┬────────────────────────────────┤
//! │   Profile    │    SAN Volume    │        Add-Host Sessions       │
//! │   Managers   │      Store       │      + Hostname Generation     │
//! ├──────────────┴──────────────────┴────────────────────────────────┤
//! │            Datastore (transactional entity snapshots)             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Resource Adapters │ Storage Adapters │ Kit Actions │ Boot/Sync  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`lifecycle`]: node lifecycle orchestration and batch results
//! - [`profile`]: software/hardware profile and component management
//! - [`san`]: SAN volume store and storage change planning
//! - [`store`]: transactional entity datastore
//! - [`adapters`]: adapter registry, built-in and test adapters
//! - [`domain`]: core domain types and boundary traits
//! - [`events`]: node lifecycle event fanout
//! - [`error`]: error types and handling

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod profile;
pub mod san;
pub mod store;

pub use adapters::{AdapterRegistry, AdapterRegistryBuilder, DEFAULT_STORAGE_ADAPTER};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use events::{Event, EventBus};
pub use lifecycle::{
    AddHostSessionRegistry, BatchReport, Collaborators, CreateNodeRequest, NodeManager,
    NodeOutcome, NodeSpec,
};
pub use profile::{
    CreateSoftwareProfileRequest, HardwareProfileManager, SoftwareProfileManager,
};
pub use san::{SanStore, StorageChanges, Volume};
pub use store::Datastore;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
