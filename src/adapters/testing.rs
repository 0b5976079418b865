//! Recording fakes for the orchestration ports
//!
//! Each fake logs the calls it receives as readable strings so tests can
//! assert on ordering and batching, and exposes a handful of knobs to script
//! responses (suspend results, idle states, per-operation failures).

use crate::domain::model::{Kit, Node, NodeState};
use crate::domain::ports::{
    BootConfigManager, ClusterSync, ComponentHook, KitActions, NodeTransfer, RefreshDelta,
    ResourceAdapter, StorageAdapter, UpdateNodeRequest,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

fn join_names(nodes: &[Node]) -> String {
    nodes.iter().map(|n| n.name.as_str()).collect::<Vec<_>>().join(",")
}

/// Scripted in-memory [`ResourceAdapter`]
pub struct FakeResourceAdapter {
    name: String,
    calls: Mutex<Vec<String>>,
    /// Per-node answer for `suspend_active_node`; unlisted nodes get `false`
    suspendable: Mutex<BTreeSet<String>>,
    idle_state: Mutex<NodeState>,
    /// Operations scripted to fail
    failing: Mutex<BTreeSet<String>>,
    vcpus: Mutex<u32>,
}

impl FakeResourceAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: Mutex::new(Vec::new()),
            suspendable: Mutex::new(BTreeSet::new()),
            idle_state: Mutex::new(NodeState::Installed),
            failing: Mutex::new(BTreeSet::new()),
            vcpus: Mutex::new(1),
        }
    }

    /// Script `suspend_active_node` to return true for a node
    pub fn allow_suspend(&self, node: &str) {
        self.suspendable.lock().insert(node.to_string());
    }

    /// State `idle_active_node` reports nodes left in
    pub fn set_idle_state(&self, state: NodeState) {
        *self.idle_state.lock() = state;
    }

    /// Script an operation to fail with `AdapterOperationFailed`
    pub fn fail_on(&self, operation: &str) {
        self.failing.lock().insert(operation.to_string());
    }

    pub fn set_vcpus(&self, vcpus: u32) {
        *self.vcpus.lock() = vcpus;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, operation: &str, detail: String) -> Result<()> {
        self.calls.lock().push(format!("{operation}({detail})"));
        if self.failing.lock().contains(operation) {
            return Err(Error::AdapterOperationFailed {
                adapter: self.name.clone(),
                operation: operation.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceAdapter for FakeResourceAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start_up_node(
        &self,
        nodes: &[Node],
        _remaining_nodes: &[String],
        boot_method: &str,
    ) -> Result<()> {
        self.record("start_up_node", format!("{}; boot={boot_method}", join_names(nodes)))
    }

    async fn shutdown_node(&self, nodes: &[Node], soft: bool) -> Result<()> {
        self.record("shutdown_node", format!("{}; soft={soft}", join_names(nodes)))
    }

    async fn reboot_node(&self, nodes: &[Node], soft_reset: bool) -> Result<()> {
        self.record("reboot_node", format!("{}; soft={soft_reset}", join_names(nodes)))
    }

    async fn suspend_active_node(&self, node: &Node) -> Result<bool> {
        self.record("suspend_active_node", node.name.clone())?;
        Ok(self.suspendable.lock().contains(&node.name))
    }

    async fn idle_active_node(&self, nodes: &[Node]) -> Result<NodeState> {
        self.record("idle_active_node", join_names(nodes))?;
        Ok(*self.idle_state.lock())
    }

    async fn activate_idle_node(
        &self,
        node: &Node,
        software_profile: &str,
        profile_changed: bool,
    ) -> Result<()> {
        self.record(
            "activate_idle_node",
            format!("{}; profile={software_profile}; changed={profile_changed}", node.name),
        )
    }

    async fn transfer_node(&self, transfers: &[NodeTransfer]) -> Result<()> {
        let detail = transfers
            .iter()
            .map(|t| format!("{}->{}", t.node.name, t.dst_software_profile))
            .collect::<Vec<_>>()
            .join(",");
        self.record("transfer_node", detail)
    }

    async fn delete_node(&self, nodes: &[Node]) -> Result<()> {
        self.record("delete_node", join_names(nodes))
    }

    async fn update_node(&self, node: &Node, request: &UpdateNodeRequest) -> Result<()> {
        self.record("update_node", format!("{}; state={:?}", node.name, request.state))
    }

    async fn add_volume_to_node(&self, node: &Node, volume: Uuid) -> Result<()> {
        self.record("add_volume_to_node", format!("{}; {volume}", node.name))
    }

    async fn remove_volume_from_node(&self, node: &Node, volume: Uuid) -> Result<()> {
        self.record("remove_volume_from_node", format!("{}; {volume}", node.name))
    }

    async fn get_node_vcpus(&self, name: &str) -> Result<u32> {
        self.record("get_node_vcpus", name.to_string())?;
        Ok(*self.vcpus.lock())
    }
}

/// Recording [`StorageAdapter`] that fabricates device paths
pub struct FakeStorageAdapter {
    name: String,
    calls: Mutex<Vec<String>>,
    allocations: Mutex<u32>,
}

impl FakeStorageAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: Mutex::new(Vec::new()),
            allocations: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl StorageAdapter for FakeStorageAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn allocate_volume(&self, size_mb: u64, name_format: &str) -> Result<String> {
        let mut n = self.allocations.lock();
        *n += 1;
        let id = format!("{}-{:03}", name_format.trim_end_matches('*'), *n);
        self.calls.lock().push(format!("allocate_volume({id}; {size_mb}MB)"));
        Ok(id)
    }

    async fn delete_volume(&self, adapter_volume: &str) -> Result<()> {
        self.calls.lock().push(format!("delete_volume({adapter_volume})"));
        Ok(())
    }

    async fn connect_volume(
        &self,
        adapter_volume: &str,
        target_host: &str,
        multi_mount: Option<&str>,
    ) -> Result<String> {
        self.calls.lock().push(format!(
            "connect_volume({adapter_volume}; {target_host}; multi={multi_mount:?})"
        ));
        Ok(format!("/dev/sd-{adapter_volume}"))
    }

    async fn disconnect_volume(
        &self,
        adapter_volume: &str,
        target_host: &str,
        _device: &str,
        multi_mount: Option<&str>,
    ) -> Result<()> {
        self.calls.lock().push(format!(
            "disconnect_volume({adapter_volume}; {target_host}; multi={multi_mount:?})"
        ));
        Ok(())
    }
}

/// Recording [`KitActions`] dispatcher
#[derive(Default)]
pub struct RecordingKitActions {
    calls: Mutex<Vec<String>>,
}

impl RecordingKitActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl KitActions for RecordingKitActions {
    async fn pre_add_host(
        &self,
        hardware_profile: &str,
        software_profile: Option<&str>,
        nodes: &[String],
    ) -> Result<()> {
        self.calls.lock().push(format!(
            "pre_add_host({hardware_profile}; {software_profile:?}; {})",
            nodes.join(",")
        ));
        Ok(())
    }

    async fn pre_delete_host(
        &self,
        hardware_profile: &str,
        software_profile: Option<&str>,
        nodes: &[String],
    ) -> Result<()> {
        self.calls.lock().push(format!(
            "pre_delete_host({hardware_profile}; {software_profile:?}; {})",
            nodes.join(",")
        ));
        Ok(())
    }

    async fn post_delete_host(
        &self,
        hardware_profile: &str,
        software_profile: Option<&str>,
        nodes: &[String],
    ) -> Result<()> {
        self.calls.lock().push(format!(
            "post_delete_host({hardware_profile}; {software_profile:?}; {})",
            nodes.join(",")
        ));
        Ok(())
    }

    async fn refresh(&self, deltas: &BTreeMap<String, RefreshDelta>) -> Result<()> {
        let detail = deltas
            .iter()
            .map(|(profile, delta)| {
                format!(
                    "{profile}:+[{}]-[{}]",
                    delta.added.join(","),
                    delta.removed.join(",")
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        self.calls.lock().push(format!("refresh({detail})"));
        Ok(())
    }

    async fn component_hook(
        &self,
        kit: &Kit,
        component: &str,
        hook: ComponentHook,
        software_profile: &str,
    ) -> Result<()> {
        self.calls
            .lock()
            .push(format!("{hook}({kit}; {component}; {software_profile})"));
        Ok(())
    }
}

/// Recording [`BootConfigManager`]
#[derive(Default)]
pub struct RecordingBootConfig {
    calls: Mutex<Vec<String>>,
    /// Operations scripted to fail for a specific node
    failing: Mutex<BTreeSet<(String, String)>>,
}

impl RecordingBootConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Calls matching one operation name
    pub fn calls_for(&self, operation: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(operation))
            .cloned()
            .collect()
    }

    /// Script an operation to fail when invoked for `node`
    pub fn fail_on(&self, operation: &str, node: &str) {
        self.failing
            .lock()
            .insert((operation.to_string(), node.to_string()));
    }

    fn record(&self, operation: &str, node: &str) -> Result<()> {
        self.calls.lock().push(format!("{operation}({node})"));
        if self
            .failing
            .lock()
            .contains(&(operation.to_string(), node.to_string()))
        {
            return Err(Error::OperationFailed(format!(
                "{operation} failed for [{node}]"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BootConfigManager for RecordingBootConfig {
    async fn write_pxe_file(&self, node: &Node) -> Result<()> {
        self.record("write_pxe_file", &node.name)
    }

    async fn set_node_for_network_boot(&self, node: &Node) -> Result<()> {
        self.record("set_node_for_network_boot", &node.name)
    }

    async fn delete_puppet_node_cert(&self, node_name: &str) -> Result<()> {
        self.record("delete_puppet_node_cert", node_name)
    }

    async fn remove_dhcp_lease(&self, node: &Node) -> Result<()> {
        self.record("remove_dhcp_lease", &node.name)
    }

    async fn node_cleanup(&self, node_name: &str) -> Result<()> {
        self.record("node_cleanup", node_name)
    }
}

/// Recording [`ClusterSync`] that counts scheduled updates
#[derive(Default)]
pub struct RecordingClusterSync {
    scheduled: Mutex<u32>,
    synced_profiles: Mutex<Vec<String>>,
}

impl RecordingClusterSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled_updates(&self) -> u32 {
        *self.scheduled.lock()
    }

    pub fn synced_profiles(&self) -> Vec<String> {
        self.synced_profiles.lock().clone()
    }
}

#[async_trait]
impl ClusterSync for RecordingClusterSync {
    async fn schedule_cluster_update(&self) -> Result<()> {
        *self.scheduled.lock() += 1;
        Ok(())
    }

    async fn sync_software_profile(&self, software_profile: &str) -> Result<()> {
        self.synced_profiles.lock().push(software_profile.to_string());
        Ok(())
    }
}
