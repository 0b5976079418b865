//! Error types for the Armada orchestrator
//!
//! Provides structured error types for all orchestrator components including
//! the node lifecycle manager, profile managers, and the SAN volume store.
//!
//! Domain errors are split along the taxonomy callers rely on: lookup misses
//! (never retried), conflict/precondition errors (collected into batch result
//! buckets), policy violations (abort the node or the whole request), and
//! infrastructure errors (rolled back, logged, re-raised).

use thiserror::Error;
use uuid::Uuid;

/// Unified error type for the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // =========================================================================
    // Lookup Errors
    // =========================================================================
    #[error("Node not found: {node}")]
    NodeNotFound { node: String },

    #[error("Hardware profile not found: {name}")]
    HardwareProfileNotFound { name: String },

    #[error("Software profile not found: {name}")]
    SoftwareProfileNotFound { name: String },

    #[error("Resource adapter not found: {name}")]
    ResourceAdapterNotFound { name: String },

    #[error("Storage adapter not found: {name}")]
    StorageAdapterNotFound { name: String },

    #[error("NIC not found on node {node}")]
    NicNotFound { node: String },

    #[error("Component not found: {name}")]
    ComponentNotFound { name: String },

    #[error("Kit not found: {0}")]
    KitNotFound(String),

    #[error("Volume {volume} does not exist")]
    VolumeDoesNotExist { volume: Uuid },

    #[error("Volume {volume} is not mapped to node {node}")]
    VolumeNotMapped { volume: Uuid, node: String },

    #[error("Drive {drive} not found on node {node}")]
    DriveNotFound { node: String, drive: u32 },

    #[error("Tag not found: {name}")]
    TagNotFound { name: String },

    // =========================================================================
    // Conflict / Precondition Errors
    // =========================================================================
    #[error("Node already exists: {node}")]
    NodeAlreadyExists { node: String },

    #[error("Profile already exists: {name}")]
    ProfileAlreadyExists { name: String },

    #[error("Component [{component}] already enabled on software profile [{profile}]")]
    ComponentAlreadyEnabled { profile: String, component: String },

    #[error("Volume {volume} is already mapped to node {node}")]
    VolumeAlreadyMapped { volume: Uuid, node: String },

    #[error("Volume {volume} is still attached to {host_count} host(s)")]
    VolumeStillAttached { volume: Uuid, host_count: usize },

    #[error("Force option is required to delete a persistent volume")]
    DeletePersistentVolumeFailed,

    // =========================================================================
    // Policy Violation Errors
    // =========================================================================
    #[error("Node [{node}] cannot be modified while locked")]
    NodeSoftwareProfileLocked { node: String },

    #[error("Node transfer not valid: {0}")]
    NodeTransferNotValid(String),

    #[error(
        "Node [{node}] belongs to hardware profile [{hardware_profile}] which is \
         not allowed to use software profile [{software_profile}]"
    )]
    ProfileMappingNotAllowed {
        node: String,
        hardware_profile: String,
        software_profile: String,
    },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    #[error("Resource adapter [{adapter}] failed during {operation}: {reason}")]
    AdapterOperationFailed {
        adapter: String,
        operation: String,
        reason: String,
    },

    #[error("Kit action [{action}] failed: {reason}")]
    KitActionFailed { action: String, reason: String },

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error is a deterministic lookup miss. The web layer maps
    /// these to 404; they are never retried.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NodeNotFound { .. }
                | Error::HardwareProfileNotFound { .. }
                | Error::SoftwareProfileNotFound { .. }
                | Error::ResourceAdapterNotFound { .. }
                | Error::StorageAdapterNotFound { .. }
                | Error::NicNotFound { .. }
                | Error::ComponentNotFound { .. }
                | Error::KitNotFound(_)
                | Error::VolumeDoesNotExist { .. }
                | Error::VolumeNotMapped { .. }
                | Error::DriveNotFound { .. }
                | Error::TagNotFound { .. }
        )
    }

    /// Whether this error is a business-rule violation rather than an
    /// infrastructure failure.
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            Error::NodeSoftwareProfileLocked { .. }
                | Error::NodeTransferNotValid(_)
                | Error::ProfileMappingNotAllowed { .. }
                | Error::UnsupportedOperation(_)
                | Error::OperationFailed(_)
        )
    }
}

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, Error>;
