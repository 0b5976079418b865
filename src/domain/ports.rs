//! Boundary traits between the orchestration core and external systems
//!
//! Resource adapters, storage adapters, kit actions, and boot/host management
//! are collaborators the orchestrator drives but does not implement. Every
//! method here is a blocking I/O boundary (cloud APIs, subprocess runs) and
//! is therefore async.

use crate::domain::model::{Kit, Node, NodeState};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// =============================================================================
// Resource Adapter Port
// =============================================================================

/// Patch applied to a node through `update_node`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateNodeRequest {
    pub state: Option<NodeState>,
    /// Replacement IP for the boot NIC
    pub boot_ip: Option<String>,
}

/// One node's profile move within a transfer batch
#[derive(Debug, Clone)]
pub struct NodeTransfer {
    pub node: Node,
    pub src_software_profile: Option<String>,
    pub dst_software_profile: String,
}

/// Per-hardware-profile pluggable backend implementing node provisioning
/// primitives against a specific infrastructure.
#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    /// Adapter name as referenced by hardware profiles
    fn name(&self) -> &str;

    /// Power on nodes, optionally overriding the boot method for this boot
    async fn start_up_node(
        &self,
        nodes: &[Node],
        remaining_nodes: &[String],
        boot_method: &str,
    ) -> Result<()>;

    /// Power off nodes; `soft` requests an orderly OS shutdown
    async fn shutdown_node(&self, nodes: &[Node], soft: bool) -> Result<()>;

    async fn reboot_node(&self, nodes: &[Node], soft_reset: bool) -> Result<()>;

    /// Attempt to suspend a node in place. Returns false when the backend
    /// cannot suspend and the node must be idled via profile reassignment.
    async fn suspend_active_node(&self, node: &Node) -> Result<bool>;

    /// Idle nodes whose suspend attempt was refused. Returns the state the
    /// backend leaves the nodes in.
    async fn idle_active_node(&self, nodes: &[Node]) -> Result<NodeState>;

    async fn activate_idle_node(
        &self,
        node: &Node,
        software_profile: &str,
        profile_changed: bool,
    ) -> Result<()>;

    async fn transfer_node(&self, transfers: &[NodeTransfer]) -> Result<()>;

    async fn delete_node(&self, nodes: &[Node]) -> Result<()>;

    async fn update_node(&self, node: &Node, request: &UpdateNodeRequest) -> Result<()>;

    async fn add_volume_to_node(&self, node: &Node, volume: Uuid) -> Result<()>;

    async fn remove_volume_from_node(&self, node: &Node, volume: Uuid) -> Result<()>;

    async fn get_node_vcpus(&self, name: &str) -> Result<u32>;
}

impl std::fmt::Debug for dyn ResourceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceAdapter").field("name", &self.name()).finish()
    }
}

// =============================================================================
// Storage Adapter Port
// =============================================================================

/// Backend-side block storage primitives consumed by the SAN volume store.
///
/// `multi_mount` carries the node name when a volume is attached through a
/// target host other than the node itself (a hypervisor attach).
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Allocate backing storage; returns the adapter-specific volume id
    async fn allocate_volume(&self, size_mb: u64, name_format: &str) -> Result<String>;

    async fn delete_volume(&self, adapter_volume: &str) -> Result<()>;

    /// Attach a volume to a target host; returns the device path
    async fn connect_volume(
        &self,
        adapter_volume: &str,
        target_host: &str,
        multi_mount: Option<&str>,
    ) -> Result<String>;

    async fn disconnect_volume(
        &self,
        adapter_volume: &str,
        target_host: &str,
        device: &str,
        multi_mount: Option<&str>,
    ) -> Result<()>;
}

// =============================================================================
// Kit Action Dispatcher Port
// =============================================================================

/// Component-level lifecycle hook stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentHook {
    PreEnable,
    Enable,
    PostEnable,
    PreDisable,
    Disable,
    PostDisable,
}

impl std::fmt::Display for ComponentHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComponentHook::PreEnable => "pre_enable",
            ComponentHook::Enable => "enable",
            ComponentHook::PostEnable => "post_enable",
            ComponentHook::PreDisable => "pre_disable",
            ComponentHook::Disable => "disable",
            ComponentHook::PostDisable => "post_disable",
        };
        f.write_str(s)
    }
}

/// Node membership changes for one software profile, passed to `refresh`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Extension points invoked by the orchestrator at defined lifecycle moments
#[async_trait]
pub trait KitActions: Send + Sync {
    async fn pre_add_host(
        &self,
        hardware_profile: &str,
        software_profile: Option<&str>,
        nodes: &[String],
    ) -> Result<()>;

    async fn pre_delete_host(
        &self,
        hardware_profile: &str,
        software_profile: Option<&str>,
        nodes: &[String],
    ) -> Result<()>;

    async fn post_delete_host(
        &self,
        hardware_profile: &str,
        software_profile: Option<&str>,
        nodes: &[String],
    ) -> Result<()>;

    /// Notify kits of node membership changes, keyed by software profile name
    async fn refresh(&self, deltas: &BTreeMap<String, RefreshDelta>) -> Result<()>;

    async fn component_hook(
        &self,
        kit: &Kit,
        component: &str,
        hook: ComponentHook,
        software_profile: &str,
    ) -> Result<()>;
}

// =============================================================================
// Boot / Host Management Port
// =============================================================================

/// OS-level provisioning collaborator (PXE, DHCP, Puppet certs)
#[async_trait]
pub trait BootConfigManager: Send + Sync {
    /// Rewrite the node's local boot configuration
    async fn write_pxe_file(&self, node: &Node) -> Result<()>;

    /// Reset a node to boot from the network on its next boot
    async fn set_node_for_network_boot(&self, node: &Node) -> Result<()>;

    async fn delete_puppet_node_cert(&self, node_name: &str) -> Result<()>;

    async fn remove_dhcp_lease(&self, node: &Node) -> Result<()>;

    /// Remove remaining per-node state files after deletion
    async fn node_cleanup(&self, node_name: &str) -> Result<()>;
}

// =============================================================================
// Cluster Sync Port
// =============================================================================

/// Configuration-push collaborator (Puppet)
#[async_trait]
pub trait ClusterSync: Send + Sync {
    /// Queue a cluster-wide configuration update
    async fn schedule_cluster_update(&self) -> Result<()>;

    /// Run a synchronous configuration push for one software profile
    async fn sync_software_profile(&self, software_profile: &str) -> Result<()>;
}
