//! Node lifecycle orchestration
//!
//! `NodeManager` owns every node-facing operation: creation, status updates,
//! deletion, idle/activate, profile transfer, power control, and storage
//! volume attachment. It drives the datastore, the resource adapters, the kit
//! action dispatcher, the boot configuration manager, and the SAN store, and
//! publishes node state transitions on the event bus.
//!
//! Batch operations validate per node and report typed per-node outcomes;
//! only whole-request preconditions (locking, minimum node counts) abort
//! before any mutation.

use crate::adapters::AdapterRegistry;
use crate::domain::model::{
    BootFrom, HardwareProfile, LockedState, Nic, Node, NodeState, ProfileLocation, ProfileType,
    SoftwareProfile, SoftwareProfileId,
};
use crate::domain::ports::{
    BootConfigManager, ClusterSync, KitActions, NodeTransfer, RefreshDelta, ResourceAdapter,
    UpdateNodeRequest,
};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::lifecycle::addhost::{self, AddHostSessionRegistry};
use crate::lifecycle::nodespec::NodeSpec;
use crate::lifecycle::results::{BatchReport, NodeOutcome};
use crate::san::SanStore;
use crate::store::Datastore;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// External collaborators the node manager drives
pub struct Collaborators {
    pub adapters: Arc<AdapterRegistry>,
    pub kit_actions: Arc<dyn KitActions>,
    pub boot_config: Arc<dyn BootConfigManager>,
    pub cluster_sync: Arc<dyn ClusterSync>,
}

/// Request payload for [`NodeManager::create_new_node`]
#[derive(Debug, Clone, Default)]
pub struct CreateNodeRequest {
    /// Required unless the hardware profile generates host names
    pub hostname: Option<String>,
    pub hardware_profile: String,
    /// Falls back to the hardware profile's idle software profile
    pub software_profile: Option<String>,
    pub boot_ip: Option<String>,
    pub boot_mac: Option<String>,
    pub rack: Option<String>,
}

pub struct NodeManager {
    store: Arc<Datastore>,
    san: Arc<SanStore>,
    adapters: Arc<AdapterRegistry>,
    kit_actions: Arc<dyn KitActions>,
    boot_config: Arc<dyn BootConfigManager>,
    cluster_sync: Arc<dyn ClusterSync>,
    sessions: Arc<AddHostSessionRegistry>,
    events: Arc<EventBus>,
    dns_zone: Option<String>,
}

impl NodeManager {
    pub fn new(
        store: Arc<Datastore>,
        san: Arc<SanStore>,
        collaborators: Collaborators,
        sessions: Arc<AddHostSessionRegistry>,
        events: Arc<EventBus>,
        dns_zone: Option<String>,
    ) -> Self {
        Self {
            store,
            san,
            adapters: collaborators.adapters,
            kit_actions: collaborators.kit_actions,
            boot_config: collaborators.boot_config,
            cluster_sync: collaborators.cluster_sync,
            sessions,
            events,
            dns_zone,
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn resource_adapter_for(
        &self,
        profile: &HardwareProfile,
    ) -> Result<Arc<dyn ResourceAdapter>> {
        let name = profile.resource_adapter.as_deref().ok_or_else(|| {
            Error::OperationFailed(format!(
                "Hardware profile [{}] has no resource adapter",
                profile.name
            ))
        })?;
        self.adapters.resource_adapter(name)
    }

    /// Expand a nodespec to concrete nodes, excluding installer nodes
    fn expand_nodespec(&self, spec: &str) -> Result<Vec<Node>> {
        let nodespec = NodeSpec::parse(spec)?;

        let nodes: Vec<Node> = self.store.read(|state| {
            state
                .node_list(&[])
                .into_iter()
                .filter(|node| nodespec.matches(&node.name))
                .filter(|node| {
                    let installer = node
                        .software_profile
                        .and_then(|id| state.get_software_profile_by_id(id).ok())
                        .map(|sp| sp.profile_type == ProfileType::Installer)
                        .unwrap_or(false);
                    !installer
                })
                .collect()
        });

        if nodes.is_empty() {
            return Err(Error::NodeNotFound { node: spec.to_string() });
        }
        Ok(nodes)
    }

    fn hardware_profile_of(&self, node: &Node) -> Result<HardwareProfile> {
        self.store
            .read(|state| state.get_hardware_profile_by_id(node.hardware_profile))
    }

    fn software_profile_name(&self, id: Option<SoftwareProfileId>) -> Option<String> {
        id.and_then(|id| {
            self.store
                .read(|state| state.get_software_profile_by_id(id).ok())
                .map(|sp| sp.name)
        })
    }

    /// Publish a state-change event carrying the node as it now stands
    fn fire_state_change(&self, node: &Node, previous: NodeState) {
        if previous != node.state {
            self.events.publish(Event::NodeStateChanged {
                node: Box::new(node.clone()),
                previous_state: previous,
            });
        }
    }

    /// Group nodes by hardware profile id, preserving input order per group
    fn group_by_hardware_profile(nodes: Vec<Node>) -> BTreeMap<u32, Vec<Node>> {
        let mut groups: BTreeMap<u32, Vec<Node>> = BTreeMap::new();
        for node in nodes {
            groups.entry(node.hardware_profile).or_default().push(node);
        }
        groups
    }

    // -------------------------------------------------------------------------
    // Creation
    // -------------------------------------------------------------------------

    /// Create one node under an add-host session.
    ///
    /// The software profile falls back to the hardware profile's idle
    /// software profile when none is requested, marking the node idle.
    pub async fn create_new_node(&self, request: CreateNodeRequest) -> Result<Node> {
        let hw = self
            .store
            .read(|state| state.get_hardware_profile(&request.hardware_profile))?;

        addhost::check_hostname_request(&hw, request.hostname.as_deref())?;

        let name = match &request.hostname {
            Some(name) => name.clone(),
            None => self.store.read(|state| {
                addhost::next_hostname(&hw, self.dns_zone.as_deref(), |candidate| {
                    state.node_name_exists(candidate)
                })
            })?,
        };

        let (software_profile, is_idle) = match &request.software_profile {
            Some(profile_name) => {
                let profile = self
                    .store
                    .read(|state| state.get_software_profile(profile_name))?;
                (Some(profile.id), profile.is_idle)
            }
            None => (hw.idle_software_profile, hw.idle_software_profile.is_some()),
        };

        let session = self.sessions.create_session(
            &hw.name,
            self.software_profile_name(software_profile).as_deref(),
            1,
        );

        let mut nics = Vec::new();
        if request.boot_ip.is_some() || request.boot_mac.is_some() {
            nics.push(Nic {
                ip: request.boot_ip.clone(),
                mac: request.boot_mac.clone(),
                boot: true,
            });
        }

        let node = Node {
            id: 0,
            name: name.clone(),
            state: NodeState::Created,
            locked: LockedState::Unlocked,
            is_idle,
            boot_from: BootFrom::Network,
            add_host_session: Some(session),
            rack: request.rack.clone(),
            rank: None,
            vcpus: None,
            hardware_profile: hw.id,
            software_profile,
            nics,
            tags: Vec::new(),
            instance: None,
            last_update: Utc::now(),
        };

        self.kit_actions
            .pre_add_host(
                &hw.name,
                self.software_profile_name(software_profile).as_deref(),
                &[name.clone()],
            )
            .await?;

        let node = {
            let mut txn = self.store.begin();
            let node = txn.insert_node(node)?;
            txn.commit();
            node
        };

        // vcpus come from the backend when it knows the node
        let mut node = node;
        if let Ok(adapter) = self.resource_adapter_for(&hw) {
            match adapter.get_node_vcpus(&node.name).await {
                Ok(vcpus) => {
                    node.vcpus = Some(vcpus);
                    let mut txn = self.store.begin();
                    txn.update_node(&node)?;
                    txn.commit();
                }
                Err(err) => {
                    debug!(node = %node.name, %err, "Backend reported no vcpu count");
                }
            }
        }

        self.sessions
            .update_status(session, &format!("Node [{name}] created"), false);
        info!(node = %node.name, hardware_profile = %hw.name, "Node created");

        Ok(node)
    }

    // -------------------------------------------------------------------------
    // Status and updates
    // -------------------------------------------------------------------------

    /// Apply state/boot-source changes reported by the node itself.
    /// Returns whether anything changed.
    pub async fn update_node_status(
        &self,
        name: &str,
        state: Option<NodeState>,
        boot_from: Option<BootFrom>,
    ) -> Result<bool> {
        const CHANGED_STATE: u8 = 1;
        const CHANGED_BOOT: u8 = 2;

        let mut node = self.store.read(|s| s.get_node(name))?;
        let previous_state = node.state;
        let mut changed = 0u8;

        if let Some(new_state) = state {
            if new_state != node.state {
                node.state = new_state;
                changed |= CHANGED_STATE;
            }
        }
        if let Some(new_boot) = boot_from {
            if new_boot != node.boot_from {
                node.boot_from = new_boot;
                changed |= CHANGED_BOOT;
            }
        }

        node.last_update = Utc::now();
        {
            let mut txn = self.store.begin();
            txn.update_node(&node)?;
            txn.commit();
        }

        let (installer, location) = self.store.read(|s| {
            let installer = node
                .software_profile
                .and_then(|id| s.get_software_profile_by_id(id).ok())
                .map(|sp| sp.profile_type == ProfileType::Installer)
                .unwrap_or(false);
            let location = s
                .get_hardware_profile_by_id(node.hardware_profile)
                .map(|hw| hw.location)
                .unwrap_or(ProfileLocation::Local);
            (installer, location)
        });

        if !installer && location != ProfileLocation::Remote {
            self.boot_config.write_pxe_file(&node).await?;
        }

        if changed & CHANGED_STATE != 0 {
            self.fire_state_change(&node, previous_state);
        }

        debug!(node = %node.name, changed, "Node status update");
        Ok(changed != 0)
    }

    /// Apply an external patch to a node and push it to the backend
    pub async fn update_node(&self, name: &str, request: &UpdateNodeRequest) -> Result<()> {
        let mut node = self.store.read(|s| s.get_node(name))?;
        let previous_state = node.state;

        if let Some(ip) = &request.boot_ip {
            let nic = node
                .nics
                .iter_mut()
                .find(|n| n.boot)
                .ok_or_else(|| Error::NicNotFound { node: node.name.clone() })?;
            nic.ip = Some(ip.clone());
        }

        if let Some(state) = request.state {
            node.state = state;
        }
        node.last_update = Utc::now();

        {
            let mut txn = self.store.begin();
            txn.update_node(&node)?;
            txn.commit();
        }

        let hw = self.hardware_profile_of(&node)?;
        let adapter = self.resource_adapter_for(&hw)?;
        adapter.update_node(&node, request).await?;

        if previous_state == NodeState::Allocated && node.state == NodeState::Provisioned {
            self.cluster_sync.schedule_cluster_update().await?;
        }
        self.fire_state_change(&node, previous_state);

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Deletion
    // -------------------------------------------------------------------------

    /// Delete every node matched by the nodespec.
    ///
    /// Whole-request validation happens before any mutation: hard-locked
    /// profiles always refuse, soft-locked profiles refuse without `force`,
    /// and a profile may not drop below its minimum node count unless it is
    /// soft-locked and the operation is forced. Node rows are marked deleted
    /// and committed before any backend call so state survives adapter
    /// failures; each hardware-profile batch fails independently.
    pub async fn delete_node(&self, nodespec: &str, force: bool) -> Result<BatchReport> {
        let nodes = self.expand_nodespec(nodespec)?;

        let violations = self.store.read(|state| {
            let mut violations = Vec::new();
            let mut by_profile: BTreeMap<SoftwareProfileId, usize> = BTreeMap::new();
            for node in &nodes {
                if let Some(id) = node.software_profile {
                    *by_profile.entry(id).or_default() += 1;
                }
            }

            for (profile_id, deleting) in &by_profile {
                let Ok(profile) = state.get_software_profile_by_id(*profile_id) else {
                    continue;
                };

                match profile.locked {
                    LockedState::HardLocked => {
                        violations.push(format!(
                            "Nodes in software profile [{}] are hard locked and cannot be deleted",
                            profile.name
                        ));
                        continue;
                    }
                    LockedState::SoftLocked if !force => {
                        violations.push(format!(
                            "Nodes in software profile [{}] are soft locked",
                            profile.name
                        ));
                        continue;
                    }
                    _ => {}
                }

                let total = state.nodes_in_software_profile(*profile_id).len();
                let remaining = total.saturating_sub(*deleting);
                let min_waived = force && profile.locked == LockedState::SoftLocked;
                if (remaining as u32) < profile.min_nodes && !min_waived {
                    violations.push(format!(
                        "Software profile [{}] requires at least {} node(s); \
                         deletion would leave {}",
                        profile.name, profile.min_nodes, remaining
                    ));
                }
            }
            violations
        });

        if !violations.is_empty() {
            return Err(Error::OperationFailed(violations.join("\n")));
        }

        // (hardware profile name, software profile name) -> node names
        let mut hook_groups: BTreeMap<(String, Option<String>), Vec<String>> = BTreeMap::new();
        for node in &nodes {
            let hw_name = self.hardware_profile_of(node)?.name;
            let sw_name = self.software_profile_name(node.software_profile);
            hook_groups
                .entry((hw_name, sw_name))
                .or_default()
                .push(node.name.clone());
        }

        for ((hw_name, sw_name), names) in &hook_groups {
            self.kit_actions
                .pre_delete_host(hw_name, sw_name.as_deref(), names)
                .await?;
        }

        // Durable intent first: mark deleted and commit before backend calls
        let mut previous_states: BTreeMap<String, NodeState> = BTreeMap::new();
        let mut marked = Vec::with_capacity(nodes.len());
        {
            let mut txn = self.store.begin();
            for node in nodes {
                previous_states.insert(node.name.clone(), node.state);
                let mut node = node;
                node.state = NodeState::Deleted;
                node.last_update = Utc::now();
                txn.update_node(&node)?;
                marked.push(node);
            }
            txn.commit();
        }

        let mut report = BatchReport::default();
        let mut deleted: Vec<Node> = Vec::new();

        for (hw_id, batch) in Self::group_by_hardware_profile(marked) {
            let hw = self
                .store
                .read(|state| state.get_hardware_profile_by_id(hw_id))?;

            let result = match self.resource_adapter_for(&hw) {
                Ok(adapter) => adapter.delete_node(&batch).await,
                Err(err) => Err(err),
            };

            match result {
                Ok(()) => deleted.extend(batch),
                Err(err) => {
                    error!(
                        hardware_profile = %hw.name, %err,
                        "Backend node deletion failed; batch skipped"
                    );
                    for node in batch {
                        report.push(node.name, NodeOutcome::Failed { reason: err.to_string() });
                    }
                }
            }
        }

        {
            let mut txn = self.store.begin();
            for node in &deleted {
                txn.remove_node(node.id)?;
                for tag in &node.tags {
                    // Reap tags the deleted node was the last referent of
                    if txn.state().tag_reference_count(tag) == 0 {
                        let _ = txn.remove_tag(tag);
                    }
                }
            }
            txn.commit();
        }

        for node in &deleted {
            let previous = previous_states
                .get(&node.name)
                .copied()
                .unwrap_or(node.state);
            self.fire_state_change(node, previous);
            self.events.publish(Event::NodeDeleted { node: node.name.clone() });

            // The node row is already gone; a cleanup failure must not
            // block the remaining nodes, the hooks, or the report
            let cleanup = async {
                self.san.delete_node_storage(&node.name).await?;
                self.boot_config.remove_dhcp_lease(node).await?;
                self.boot_config.delete_puppet_node_cert(&node.name).await?;
                self.boot_config.node_cleanup(&node.name).await
            }
            .await;

            match cleanup {
                Ok(()) => report.push(node.name.clone(), NodeOutcome::Success),
                Err(err) => {
                    error!(node = %node.name, %err, "Post-delete cleanup failed");
                    report.push(node.name.clone(), NodeOutcome::Failed {
                        reason: err.to_string(),
                    });
                }
            }
        }

        let deleted_names: Vec<String> = deleted.iter().map(|n| n.name.clone()).collect();
        for ((hw_name, sw_name), names) in &hook_groups {
            let remaining: Vec<String> = names
                .iter()
                .filter(|n| deleted_names.contains(n))
                .cloned()
                .collect();
            if !remaining.is_empty() {
                if let Err(err) = self
                    .kit_actions
                    .post_delete_host(hw_name, sw_name.as_deref(), &remaining)
                    .await
                {
                    warn!(hardware_profile = %hw_name, %err, "Post-delete hook failed");
                }
            }
        }

        self.reclaim_sessions(&deleted);
        if let Err(err) = self.cluster_sync.schedule_cluster_update().await {
            warn!(%err, "Cluster update scheduling failed after deletion");
        }

        info!(deleted = deleted.len(), "Node deletion complete");
        Ok(report)
    }

    /// Drop add-host sessions no remaining node references
    fn reclaim_sessions(&self, deleted: &[Node]) {
        let mut sessions: Vec<Uuid> = deleted
            .iter()
            .filter_map(|n| n.add_host_session)
            .collect();
        sessions.sort_unstable();
        sessions.dedup();

        for session in sessions {
            let still_referenced = self
                .store
                .read(|state| !state.nodes_by_add_host_session(session).is_empty());
            if !still_referenced {
                self.sessions.delete_session(session);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Idle / activate
    // -------------------------------------------------------------------------

    /// Idle every node matched by the nodespec.
    ///
    /// A node whose backend accepts `suspend_active_node` is marked idle in
    /// place with its software profile untouched. Otherwise the node is
    /// reassigned to its hardware profile's idle software profile and idled
    /// through the backend, one batch per hardware profile. A node whose
    /// hardware profile names no idle profile is still marked idle, reported
    /// under a distinct outcome.
    pub async fn idle_node(&self, nodespec: &str) -> Result<BatchReport> {
        let nodes = self.expand_nodespec(nodespec)?;
        let mut report = BatchReport::default();

        let mut suspended: Vec<Node> = Vec::new();
        let mut no_idle_profile: Vec<Node> = Vec::new();
        let mut to_idle: Vec<(Node, SoftwareProfileId)> = Vec::new();

        for node in nodes {
            if node.is_idle {
                report.push(node.name, NodeOutcome::AlreadyIdle);
                continue;
            }
            if node.locked.is_locked() {
                report.push(node.name, NodeOutcome::Locked);
                continue;
            }

            let hw = self.hardware_profile_of(&node)?;
            let adapter = self.resource_adapter_for(&hw)?;

            if adapter.suspend_active_node(&node).await? {
                suspended.push(node);
                continue;
            }

            match hw.idle_software_profile {
                Some(idle_profile) => to_idle.push((node, idle_profile)),
                None => {
                    warn!(
                        node = %node.name, hardware_profile = %hw.name,
                        "No idle software profile; marking node idle in place"
                    );
                    no_idle_profile.push(node);
                }
            }
        }

        // Idle batches run once per hardware profile
        let mut idle_groups: BTreeMap<u32, Vec<(Node, SoftwareProfileId)>> = BTreeMap::new();
        for entry in to_idle {
            idle_groups.entry(entry.0.hardware_profile).or_default().push(entry);
        }

        // (node, idle profile, previous state, backend-reported state)
        let mut idled: Vec<(Node, SoftwareProfileId, NodeState, NodeState)> = Vec::new();
        for (hw_id, group) in idle_groups {
            let hw = self
                .store
                .read(|state| state.get_hardware_profile_by_id(hw_id))?;
            let adapter = self.resource_adapter_for(&hw)?;

            let batch: Vec<Node> = group.iter().map(|(n, _)| n.clone()).collect();
            match adapter.idle_active_node(&batch).await {
                Ok(state) => {
                    for (node, idle_profile) in group {
                        let previous = node.state;
                        idled.push((node, idle_profile, previous, state));
                    }
                }
                Err(err) => {
                    for (node, _) in group {
                        report.push(node.name, NodeOutcome::Failed { reason: err.to_string() });
                    }
                }
            }
        }

        let mut certs_to_remove: Vec<String> = Vec::new();
        {
            let mut txn = self.store.begin();

            for node in &mut suspended {
                node.is_idle = true;
                node.last_update = Utc::now();
                txn.update_node(node)?;
            }
            for node in &mut no_idle_profile {
                node.is_idle = true;
                node.last_update = Utc::now();
                txn.update_node(node)?;
            }
            for (node, idle_profile, _, state) in &mut idled {
                node.software_profile = Some(*idle_profile);
                node.state = *state;
                node.is_idle = true;
                node.last_update = Utc::now();
                txn.update_node(node)?;
            }
            txn.commit();
        }

        for node in suspended {
            certs_to_remove.push(node.name.clone());
            report.push(node.name, NodeOutcome::Success);
        }
        for node in no_idle_profile {
            certs_to_remove.push(node.name.clone());
            report.push(node.name, NodeOutcome::IdledWithoutProfile);
        }
        for (node, _, previous, _) in idled {
            certs_to_remove.push(node.name.clone());
            self.fire_state_change(&node, previous);
            report.push(node.name, NodeOutcome::Success);
        }

        // Cert removal is best effort; the nodes are already idle
        let removals = futures::future::join_all(
            certs_to_remove
                .iter()
                .map(|name| self.boot_config.delete_puppet_node_cert(name)),
        )
        .await;
        for (name, result) in certs_to_remove.iter().zip(removals) {
            if let Err(err) = result {
                warn!(node = %name, %err, "Puppet certificate removal failed");
            }
        }
        if let Err(err) = self.cluster_sync.schedule_cluster_update().await {
            warn!(%err, "Cluster update scheduling failed after idle");
        }

        Ok(report)
    }

    /// Activate idle nodes into a software profile.
    ///
    /// With no destination named, each node returns to its current software
    /// profile. Profile assignment is committed before the backend
    /// `activate_idle_node` call.
    pub async fn activate_node(
        &self,
        nodespec: &str,
        software_profile: Option<&str>,
    ) -> Result<BatchReport> {
        let nodes = self.expand_nodespec(nodespec)?;
        let mut report = BatchReport::default();

        let destination = match software_profile {
            Some(name) => Some(self.store.read(|state| state.get_software_profile(name))?),
            None => None,
        };

        let mut to_activate: Vec<(Node, SoftwareProfile, bool)> = Vec::new();

        for node in nodes {
            if !node.is_idle {
                report.push(node.name, NodeOutcome::AlreadyActive);
                continue;
            }

            let target = match &destination {
                Some(profile) => profile.clone(),
                None => match node.software_profile {
                    Some(id) => self
                        .store
                        .read(|state| state.get_software_profile_by_id(id))?,
                    None => {
                        report.push(node.name, NodeOutcome::SoftwareProfileNotFound);
                        continue;
                    }
                },
            };

            if target.is_idle {
                report.push(node.name, NodeOutcome::InvalidDestination {
                    software_profile: target.name.clone(),
                });
                continue;
            }
            if node.locked.is_locked() {
                report.push(node.name, NodeOutcome::Locked);
                continue;
            }

            let hw = self.hardware_profile_of(&node)?;
            if !target.allows_hardware_profile(hw.id) {
                report.push(node.name, NodeOutcome::ProfileMappingNotAllowed {
                    hardware_profile: hw.name,
                    software_profile: target.name.clone(),
                });
                continue;
            }

            let profile_changed = node.software_profile != Some(target.id);
            to_activate.push((node, target, profile_changed));
        }

        // Commit the profile assignment before asking the backend to activate
        {
            let mut txn = self.store.begin();
            for (node, target, _) in &mut to_activate {
                node.software_profile = Some(target.id);
                node.last_update = Utc::now();
                txn.update_node(node)?;
            }
            txn.commit();
        }

        let mut activated_sessions: Vec<Uuid> = Vec::new();
        for (mut node, target, profile_changed) in to_activate {
            let hw = self.hardware_profile_of(&node)?;
            let adapter = self.resource_adapter_for(&hw)?;

            match adapter
                .activate_idle_node(&node, &target.name, profile_changed)
                .await
            {
                Ok(()) => {
                    node.is_idle = false;
                    node.last_update = Utc::now();
                    let mut txn = self.store.begin();
                    txn.update_node(&node)?;
                    txn.commit();

                    self.events.publish(Event::NodeProfileChanged {
                        node: node.name.clone(),
                        software_profile: Some(target.name.clone()),
                    });
                    if let Some(session) = node.add_host_session {
                        activated_sessions.push(session);
                    }
                    report.push(node.name, NodeOutcome::Success);
                }
                Err(err) => {
                    report.push(node.name, NodeOutcome::Failed { reason: err.to_string() });
                }
            }
        }

        activated_sessions.sort_unstable();
        activated_sessions.dedup();
        for session in activated_sessions {
            self.sessions
                .update_status(session, "Node(s) activated", false);
        }

        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Transfer
    // -------------------------------------------------------------------------

    /// Move nodes matched by a nodespec into another software profile
    pub async fn transfer_node(
        &self,
        nodespec: &str,
        dst_software_profile: &str,
        force: bool,
    ) -> Result<BatchReport> {
        let destination = self
            .store
            .read(|state| state.get_software_profile(dst_software_profile))?;
        let nodes = self.expand_nodespec(nodespec)?;
        self.transfer(nodes, &destination, force).await
    }

    /// Move `count` nodes from one software profile to another.
    ///
    /// Unlocked candidates in `Installed` state are taken first; soft-locked
    /// nodes cover a shortfall only when the operation is forced.
    pub async fn transfer_nodes(
        &self,
        src_software_profile: &str,
        dst_software_profile: &str,
        count: usize,
        force: bool,
    ) -> Result<BatchReport> {
        let (source, destination) = self.store.read(|state| {
            let src = state.get_software_profile(src_software_profile)?;
            let dst = state.get_software_profile(dst_software_profile)?;
            Ok::<_, Error>((src, dst))
        })?;

        let candidates: Vec<Node> = self.store.read(|state| {
            state
                .nodes_in_software_profile(source.id)
                .into_iter()
                .filter(|node| node.state == NodeState::Installed)
                .filter(|node| destination.allows_hardware_profile(node.hardware_profile))
                .collect()
        });

        let mut selected: Vec<Node> = candidates
            .iter()
            .filter(|node| node.locked == LockedState::Unlocked)
            .take(count)
            .cloned()
            .collect();

        if selected.len() < count && force {
            let shortfall = count - selected.len();
            selected.extend(
                candidates
                    .iter()
                    .filter(|node| node.locked == LockedState::SoftLocked)
                    .take(shortfall)
                    .cloned(),
            );
        }

        if selected.is_empty() {
            return Err(Error::NodeTransferNotValid(
                "No nodes available to transfer".to_string(),
            ));
        }
        if selected.len() < count {
            return Err(Error::NodeTransferNotValid(format!(
                "Insufficient nodes available to transfer; {} available, {} requested",
                selected.len(),
                count
            )));
        }

        self.transfer(selected, &destination, force).await
    }

    async fn transfer(
        &self,
        nodes: Vec<Node>,
        destination: &SoftwareProfile,
        force: bool,
    ) -> Result<BatchReport> {
        // Source profiles may not drop below their minimum node count.
        // Whole-request precondition, checked before any reassignment.
        let violations = self.store.read(|state| {
            let mut violations = Vec::new();
            let mut by_profile: BTreeMap<SoftwareProfileId, usize> = BTreeMap::new();
            for node in &nodes {
                if let Some(id) = node.software_profile {
                    if id != destination.id {
                        *by_profile.entry(id).or_default() += 1;
                    }
                }
            }

            for (profile_id, leaving) in &by_profile {
                let Ok(profile) = state.get_software_profile_by_id(*profile_id) else {
                    continue;
                };

                let total = state.nodes_in_software_profile(*profile_id).len();
                let remaining = total.saturating_sub(*leaving);
                let min_waived = force && profile.locked == LockedState::SoftLocked;
                if (remaining as u32) < profile.min_nodes && !min_waived {
                    violations.push(format!(
                        "Software profile [{}] requires at least {} node(s); \
                         transfer would leave {}",
                        profile.name, profile.min_nodes, remaining
                    ));
                }
            }
            violations
        });

        if !violations.is_empty() {
            return Err(Error::OperationFailed(violations.join("\n")));
        }

        let mut report = BatchReport::default();
        let mut accepted: Vec<(Node, Option<String>)> = Vec::new();

        for node in nodes {
            let hw = self.hardware_profile_of(&node)?;

            if !destination.allows_hardware_profile(hw.id) {
                report.push(node.name, NodeOutcome::ProfileMappingNotAllowed {
                    hardware_profile: hw.name,
                    software_profile: destination.name.clone(),
                });
                continue;
            }
            if node.state != NodeState::Installed && !force {
                report.push(node.name.clone(), NodeOutcome::TransferNotValid {
                    reason: format!("Node [{}] is not in Installed state", node.name),
                });
                continue;
            }
            if node.software_profile == Some(destination.id) {
                report.push(node.name.clone(), NodeOutcome::TransferNotValid {
                    reason: format!(
                        "Node [{}] is already in software profile [{}]",
                        node.name, destination.name
                    ),
                });
                continue;
            }
            if node.locked.is_locked() && !(force && node.locked == LockedState::SoftLocked) {
                report.push(node.name, NodeOutcome::Locked);
                continue;
            }

            let src_name = self.software_profile_name(node.software_profile);
            accepted.push((node, src_name));
        }

        {
            let mut txn = self.store.begin();
            for (node, _) in &mut accepted {
                node.software_profile = Some(destination.id);
                node.last_update = Utc::now();
                txn.update_node(node)?;
            }
            txn.commit();
        }

        let transfers: Vec<(Node, NodeTransfer)> = accepted
            .iter()
            .map(|(node, src)| {
                (
                    node.clone(),
                    NodeTransfer {
                        node: node.clone(),
                        src_software_profile: src.clone(),
                        dst_software_profile: destination.name.clone(),
                    },
                )
            })
            .collect();

        let mut by_hw: BTreeMap<u32, Vec<(Node, NodeTransfer)>> = BTreeMap::new();
        for entry in transfers {
            by_hw.entry(entry.0.hardware_profile).or_default().push(entry);
        }

        let mut moved: Vec<(Node, Option<String>)> = Vec::new();
        for (hw_id, group) in by_hw {
            let hw = self
                .store
                .read(|state| state.get_hardware_profile_by_id(hw_id))?;
            let adapter = self.resource_adapter_for(&hw)?;

            let batch: Vec<NodeTransfer> = group.iter().map(|(_, t)| t.clone()).collect();
            match adapter.transfer_node(&batch).await {
                Ok(()) => {
                    for (node, transfer) in group {
                        moved.push((node, transfer.src_software_profile));
                    }
                }
                Err(err) => {
                    for (node, _) in group {
                        report.push(node.name, NodeOutcome::Failed { reason: err.to_string() });
                    }
                }
            }
        }

        // Membership deltas, keyed by software profile name
        let mut deltas: BTreeMap<String, RefreshDelta> = BTreeMap::new();
        for (node, src_name) in &moved {
            deltas
                .entry(destination.name.clone())
                .or_default()
                .added
                .push(node.name.clone());
            if let Some(src) = src_name {
                deltas
                    .entry(src.clone())
                    .or_default()
                    .removed
                    .push(node.name.clone());
            }
        }

        if !deltas.is_empty() {
            self.kit_actions.refresh(&deltas).await?;
        }

        for (node, _) in moved {
            self.events.publish(Event::NodeProfileChanged {
                node: node.name.clone(),
                software_profile: Some(destination.name.clone()),
            });
            report.push(node.name, NodeOutcome::Success);
        }

        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Power control
    // -------------------------------------------------------------------------

    pub async fn startup_node(
        &self,
        nodespec: &str,
        remaining_nodes: Vec<String>,
        boot_method: &str,
    ) -> Result<()> {
        let nodes = self.expand_nodespec(nodespec)?;
        for (hw_id, batch) in Self::group_by_hardware_profile(nodes) {
            let hw = self
                .store
                .read(|state| state.get_hardware_profile_by_id(hw_id))?;
            let adapter = self.resource_adapter_for(&hw)?;
            adapter
                .start_up_node(&batch, &remaining_nodes, boot_method)
                .await?;
        }
        Ok(())
    }

    pub async fn shutdown_node(&self, nodespec: &str, soft: bool) -> Result<()> {
        let nodes = self.expand_nodespec(nodespec)?;
        for (hw_id, batch) in Self::group_by_hardware_profile(nodes) {
            let hw = self
                .store
                .read(|state| state.get_hardware_profile_by_id(hw_id))?;
            let adapter = self.resource_adapter_for(&hw)?;
            adapter.shutdown_node(&batch, soft).await?;
        }
        Ok(())
    }

    /// Reboot nodes; `reinstall` resets each node to network boot first
    pub async fn reboot_node(
        &self,
        nodespec: &str,
        soft_reset: bool,
        reinstall: bool,
    ) -> Result<()> {
        let nodes = self.expand_nodespec(nodespec)?;

        if reinstall {
            for node in &nodes {
                self.boot_config.set_node_for_network_boot(node).await?;
            }
        }

        for (hw_id, batch) in Self::group_by_hardware_profile(nodes) {
            let hw = self
                .store
                .read(|state| state.get_hardware_profile_by_id(hw_id))?;
            let adapter = self.resource_adapter_for(&hw)?;
            adapter.reboot_node(&batch, soft_reset).await?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Storage volumes
    // -------------------------------------------------------------------------

    /// Map a persistent volume to a node and attach it through the backend
    pub async fn add_storage_volume(&self, node_name: &str, volume: Uuid) -> Result<()> {
        let node = self.store.read(|s| s.get_node(node_name))?;
        let hw = self.hardware_profile_of(&node)?;
        let adapter = self.resource_adapter_for(&hw)?;

        if !self.san.get_volume(volume).await?.persistent {
            return Err(Error::UnsupportedOperation(
                "Only persistent volumes can be attached to a node".to_string(),
            ));
        }

        self.san.map_drive(&node.name, volume).await?;

        if let Err(err) = adapter.add_volume_to_node(&node, volume).await {
            // Roll the mapping back so store and backend agree
            let _ = self.san.unmap_volume(&node.name, volume).await;
            return Err(err);
        }
        Ok(())
    }

    /// Detach a persistent volume from a node's backend and drop the mapping
    pub async fn remove_storage_volume(&self, node_name: &str, volume: Uuid) -> Result<()> {
        let node = self.store.read(|s| s.get_node(node_name))?;
        let hw = self.hardware_profile_of(&node)?;
        let adapter = self.resource_adapter_for(&hw)?;

        if !self.san.get_volume(volume).await?.persistent {
            return Err(Error::UnsupportedOperation(
                "Only persistent volumes can be detached from a node".to_string(),
            ));
        }

        adapter.remove_volume_from_node(&node, volume).await?;
        self.san.unmap_volume(&node.name, volume).await
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn get_node(&self, name: &str) -> Result<Node> {
        self.store.read(|state| state.get_node(name))
    }

    pub fn get_node_by_ip(&self, ip: &str) -> Result<Node> {
        self.store.read(|state| state.get_node_by_ip(ip))
    }

    /// Nodes filtered by tag names; an empty filter returns all nodes
    pub fn node_list(&self, tags: &[String]) -> Vec<Node> {
        self.store.read(|state| state.node_list(tags))
    }

    pub fn get_nodes_by_state(&self, state: NodeState) -> Vec<Node> {
        self.store.read(|s| s.nodes_by_state(state))
    }

    pub fn get_nodes_by_add_host_session(&self, session: Uuid) -> Vec<Node> {
        self.store.read(|state| state.nodes_by_add_host_session(session))
    }

    /// Nodes matching a nodespec filter, installer nodes included
    pub fn get_nodes_by_name_filter(&self, nodespec: &str) -> Result<Vec<Node>> {
        let spec = NodeSpec::parse(nodespec)?;
        Ok(self.store.read(|state| {
            state
                .node_list(&[])
                .into_iter()
                .filter(|node| spec.matches(&node.name))
                .collect()
        }))
    }

    /// The installer node, when one exists
    pub fn get_installer_node(&self) -> Option<Node> {
        self.store.read(|state| {
            state.node_list(&[]).into_iter().find(|node| {
                node.software_profile
                    .and_then(|id| state.get_software_profile_by_id(id).ok())
                    .map(|sp| sp.profile_type == ProfileType::Installer)
                    .unwrap_or(false)
            })
        })
    }
}
