//! Persistence gateway
//!
//! An in-process transactional store for cluster entities. Orchestrator
//! operations run inside one transaction: a working copy of the entity state
//! is mutated and swapped in on commit, so a dropped (rolled-back)
//! transaction leaves the shared state untouched. Committing mid-operation is
//! allowed and is how destructive operations make intent durable before
//! resource-adapter calls run.

use crate::domain::model::{
    HardwareProfile, HardwareProfileId, Kit, Node, NodeId, NodeState, SoftwareProfile,
    SoftwareProfileId, Tag,
};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

// =============================================================================
// Entity State
// =============================================================================

/// The full entity state. Cloned to open a transaction, swapped on commit.
#[derive(Debug, Clone, Default)]
pub struct EntityState {
    nodes: BTreeMap<NodeId, Node>,
    hardware_profiles: BTreeMap<HardwareProfileId, HardwareProfile>,
    software_profiles: BTreeMap<SoftwareProfileId, SoftwareProfile>,
    kits: Vec<Kit>,
    tags: BTreeMap<String, Tag>,
    next_node_id: NodeId,
    next_hardware_profile_id: HardwareProfileId,
    next_software_profile_id: SoftwareProfileId,
}

impl EntityState {
    // -------------------------------------------------------------------------
    // Node queries
    // -------------------------------------------------------------------------

    /// Look up a node by name. A name containing a dot must match exactly;
    /// a short name matches either the short name or any FQDN prefixed by it.
    pub fn get_node(&self, name: &str) -> Result<Node> {
        let lowered = name.to_lowercase();

        let found = self.nodes.values().find(|n| {
            let node_name = n.name.to_lowercase();
            if lowered.contains('.') {
                node_name == lowered
            } else {
                node_name == lowered || node_name.starts_with(&format!("{lowered}."))
            }
        });

        found.cloned().ok_or_else(|| Error::NodeNotFound {
            node: name.to_string(),
        })
    }

    pub fn get_node_by_id(&self, id: NodeId) -> Result<Node> {
        self.nodes.get(&id).cloned().ok_or_else(|| Error::NodeNotFound {
            node: format!("id {id}"),
        })
    }

    pub fn get_node_by_ip(&self, ip: &str) -> Result<Node> {
        self.nodes
            .values()
            .find(|n| n.nics.iter().any(|nic| nic.ip.as_deref() == Some(ip)))
            .cloned()
            .ok_or_else(|| Error::NodeNotFound { node: ip.to_string() })
    }

    /// All nodes, optionally restricted to those carrying every given tag
    pub fn node_list(&self, tags: &[String]) -> Vec<Node> {
        self.nodes
            .values()
            .filter(|n| tags.iter().all(|t| n.tags.contains(t)))
            .cloned()
            .collect()
    }

    pub fn nodes_by_state(&self, state: NodeState) -> Vec<Node> {
        self.nodes.values().filter(|n| n.state == state).cloned().collect()
    }

    pub fn nodes_by_add_host_session(&self, session: Uuid) -> Vec<Node> {
        self.nodes
            .values()
            .filter(|n| n.add_host_session == Some(session))
            .cloned()
            .collect()
    }

    pub fn nodes_in_software_profile(&self, profile: SoftwareProfileId) -> Vec<Node> {
        self.nodes
            .values()
            .filter(|n| n.software_profile == Some(profile))
            .cloned()
            .collect()
    }

    pub fn nodes_in_hardware_profile(&self, profile: HardwareProfileId) -> Vec<Node> {
        self.nodes
            .values()
            .filter(|n| n.hardware_profile == profile)
            .cloned()
            .collect()
    }

    pub fn node_name_exists(&self, name: &str) -> bool {
        let lowered = name.to_lowercase();
        self.nodes.values().any(|n| n.name.to_lowercase() == lowered)
    }

    // -------------------------------------------------------------------------
    // Profile queries
    // -------------------------------------------------------------------------

    pub fn get_hardware_profile(&self, name: &str) -> Result<HardwareProfile> {
        self.hardware_profiles
            .values()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| Error::HardwareProfileNotFound { name: name.to_string() })
    }

    pub fn get_hardware_profile_by_id(&self, id: HardwareProfileId) -> Result<HardwareProfile> {
        self.hardware_profiles
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::HardwareProfileNotFound { name: format!("id {id}") })
    }

    pub fn hardware_profile_list(&self) -> Vec<HardwareProfile> {
        self.hardware_profiles.values().cloned().collect()
    }

    pub fn get_software_profile(&self, name: &str) -> Result<SoftwareProfile> {
        self.software_profiles
            .values()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| Error::SoftwareProfileNotFound { name: name.to_string() })
    }

    pub fn get_software_profile_by_id(&self, id: SoftwareProfileId) -> Result<SoftwareProfile> {
        self.software_profiles
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::SoftwareProfileNotFound { name: format!("id {id}") })
    }

    pub fn software_profile_list(&self) -> Vec<SoftwareProfile> {
        self.software_profiles.values().cloned().collect()
    }

    // -------------------------------------------------------------------------
    // Kits and tags
    // -------------------------------------------------------------------------

    pub fn kit_list(&self) -> &[Kit] {
        &self.kits
    }

    pub fn get_tag(&self, name: &str) -> Option<&Tag> {
        self.tags.get(name)
    }

    /// Nodes and profiles still referencing a tag
    pub fn tag_reference_count(&self, name: &str) -> usize {
        let node_refs = self
            .nodes
            .values()
            .filter(|n| n.tags.iter().any(|t| t == name))
            .count();
        let hw_refs = self
            .hardware_profiles
            .values()
            .filter(|p| p.tags.iter().any(|t| t == name))
            .count();
        let sw_refs = self
            .software_profiles
            .values()
            .filter(|p| p.tags.iter().any(|t| t == name))
            .count();
        node_refs + hw_refs + sw_refs
    }
}

// =============================================================================
// Datastore
// =============================================================================

/// Shared handle over the entity state
#[derive(Default)]
pub struct Datastore {
    state: RwLock<EntityState>,
}

impl Datastore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a transaction over a working copy of the current state
    pub fn begin(&self) -> Transaction<'_> {
        Transaction {
            store: self,
            working: self.state.read().clone(),
        }
    }

    /// Run read-only queries against the committed state
    pub fn read<R>(&self, f: impl FnOnce(&EntityState) -> R) -> R {
        f(&self.state.read())
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// Unit of work over a working copy of the entity state.
///
/// Dropping the transaction without `commit` discards every change since the
/// last commit.
pub struct Transaction<'a> {
    store: &'a Datastore,
    working: EntityState,
}

impl Transaction<'_> {
    /// Publish the working state. The transaction stays usable; later
    /// mutations require another commit.
    pub fn commit(&mut self) {
        *self.store.state.write() = self.working.clone();
    }

    /// Discard uncommitted changes, restoring the committed state
    pub fn rollback(&mut self) {
        self.working = self.store.state.read().clone();
    }

    /// Read access to the working state
    pub fn state(&self) -> &EntityState {
        &self.working
    }

    // -------------------------------------------------------------------------
    // Node mutations
    // -------------------------------------------------------------------------

    /// Insert a node, assigning its id. Fails on duplicate hostname.
    pub fn insert_node(&mut self, mut node: Node) -> Result<Node> {
        if self.working.node_name_exists(&node.name) {
            return Err(Error::NodeAlreadyExists { node: node.name });
        }

        self.working.next_node_id += 1;
        node.id = self.working.next_node_id;
        self.working.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    pub fn update_node(&mut self, node: &Node) -> Result<()> {
        if !self.working.nodes.contains_key(&node.id) {
            return Err(Error::NodeNotFound { node: node.name.clone() });
        }
        self.working.nodes.insert(node.id, node.clone());
        Ok(())
    }

    pub fn remove_node(&mut self, id: NodeId) -> Result<Node> {
        self.working.nodes.remove(&id).ok_or_else(|| Error::NodeNotFound {
            node: format!("id {id}"),
        })
    }

    // -------------------------------------------------------------------------
    // Profile mutations
    // -------------------------------------------------------------------------

    pub fn insert_hardware_profile(&mut self, mut profile: HardwareProfile) -> Result<HardwareProfile> {
        if self.working.get_hardware_profile(&profile.name).is_ok() {
            return Err(Error::ProfileAlreadyExists { name: profile.name });
        }

        self.working.next_hardware_profile_id += 1;
        profile.id = self.working.next_hardware_profile_id;
        self.working.hardware_profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    pub fn update_hardware_profile(&mut self, profile: &HardwareProfile) -> Result<()> {
        if !self.working.hardware_profiles.contains_key(&profile.id) {
            return Err(Error::HardwareProfileNotFound { name: profile.name.clone() });
        }
        self.working.hardware_profiles.insert(profile.id, profile.clone());
        Ok(())
    }

    pub fn remove_hardware_profile(&mut self, id: HardwareProfileId) -> Result<HardwareProfile> {
        self.working
            .hardware_profiles
            .remove(&id)
            .ok_or_else(|| Error::HardwareProfileNotFound { name: format!("id {id}") })
    }

    pub fn insert_software_profile(&mut self, mut profile: SoftwareProfile) -> Result<SoftwareProfile> {
        if self.working.get_software_profile(&profile.name).is_ok() {
            return Err(Error::ProfileAlreadyExists { name: profile.name });
        }

        self.working.next_software_profile_id += 1;
        profile.id = self.working.next_software_profile_id;
        self.working.software_profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    pub fn update_software_profile(&mut self, profile: &SoftwareProfile) -> Result<()> {
        if !self.working.software_profiles.contains_key(&profile.id) {
            return Err(Error::SoftwareProfileNotFound { name: profile.name.clone() });
        }
        self.working.software_profiles.insert(profile.id, profile.clone());
        Ok(())
    }

    pub fn remove_software_profile(&mut self, id: SoftwareProfileId) -> Result<SoftwareProfile> {
        self.working
            .software_profiles
            .remove(&id)
            .ok_or_else(|| Error::SoftwareProfileNotFound { name: format!("id {id}") })
    }

    // -------------------------------------------------------------------------
    // Kit and tag mutations
    // -------------------------------------------------------------------------

    pub fn add_kit(&mut self, kit: Kit) {
        self.working.kits.push(kit);
    }

    pub fn upsert_tag(&mut self, tag: Tag) {
        self.working.tags.insert(tag.name.clone(), tag);
    }

    pub fn remove_tag(&mut self, name: &str) -> Result<Tag> {
        self.working
            .tags
            .remove(name)
            .ok_or_else(|| Error::TagNotFound { name: name.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{BootFrom, LockedState, ProfileLocation};
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn sample_node(name: &str, hw: HardwareProfileId) -> Node {
        Node {
            id: 0,
            name: name.to_string(),
            state: NodeState::Created,
            locked: LockedState::Unlocked,
            is_idle: false,
            boot_from: BootFrom::Network,
            add_host_session: None,
            rack: None,
            rank: None,
            vcpus: None,
            hardware_profile: hw,
            software_profile: None,
            nics: vec![],
            tags: vec![],
            instance: None,
            last_update: Utc::now(),
        }
    }

    fn sample_hw_profile(name: &str) -> HardwareProfile {
        HardwareProfile {
            id: 0,
            name: name.to_string(),
            name_format: "*".to_string(),
            location: ProfileLocation::Local,
            resource_adapter: None,
            idle_software_profile: None,
            kernel: None,
            initrd: None,
            cost: 0,
            tags: vec![],
        }
    }

    #[test]
    fn test_insert_and_lookup_node() {
        let store = Datastore::new();
        let mut txn = store.begin();
        let hw = txn.insert_hardware_profile(sample_hw_profile("hw1")).unwrap();
        let node = txn.insert_node(sample_node("compute-01.cluster", hw.id)).unwrap();
        txn.commit();

        assert!(node.id > 0);

        // FQDN and short-name lookup both resolve
        store.read(|s| {
            assert_eq!(s.get_node("compute-01.cluster").unwrap().id, node.id);
            assert_eq!(s.get_node("compute-01").unwrap().id, node.id);
            assert_matches!(s.get_node("compute-02"), Err(Error::NodeNotFound { .. }));
        });
    }

    #[test]
    fn test_duplicate_hostname_rejected() {
        let store = Datastore::new();
        let mut txn = store.begin();
        let hw = txn.insert_hardware_profile(sample_hw_profile("hw1")).unwrap();
        txn.insert_node(sample_node("n1", hw.id)).unwrap();
        let err = txn.insert_node(sample_node("N1", hw.id)).unwrap_err();
        assert_matches!(err, Error::NodeAlreadyExists { .. });
    }

    #[test]
    fn test_rollback_discards_uncommitted_changes() {
        let store = Datastore::new();
        let mut txn = store.begin();
        let hw = txn.insert_hardware_profile(sample_hw_profile("hw1")).unwrap();
        txn.commit();

        txn.insert_node(sample_node("n1", hw.id)).unwrap();
        txn.rollback();
        txn.commit();

        store.read(|s| {
            assert_matches!(s.get_node("n1"), Err(Error::NodeNotFound { .. }));
            assert!(s.get_hardware_profile("hw1").is_ok());
        });
    }

    #[test]
    fn test_drop_without_commit_is_rollback() {
        let store = Datastore::new();
        {
            let mut txn = store.begin();
            txn.insert_hardware_profile(sample_hw_profile("hw1")).unwrap();
            // dropped without commit
        }
        store.read(|s| {
            assert_matches!(
                s.get_hardware_profile("hw1"),
                Err(Error::HardwareProfileNotFound { .. })
            );
        });
    }

    #[test]
    fn test_tag_reference_count() {
        let store = Datastore::new();
        let mut txn = store.begin();
        let hw = txn.insert_hardware_profile(sample_hw_profile("hw1")).unwrap();
        let mut node = sample_node("n1", hw.id);
        node.tags.push("env".to_string());
        txn.insert_node(node).unwrap();
        txn.upsert_tag(Tag { name: "env".to_string(), value: Some("prod".to_string()) });
        txn.commit();

        store.read(|s| {
            assert_eq!(s.tag_reference_count("env"), 1);
            assert_eq!(s.tag_reference_count("missing"), 0);
        });
    }

    #[test]
    fn test_node_queries_by_session_and_state() {
        let store = Datastore::new();
        let mut txn = store.begin();
        let hw = txn.insert_hardware_profile(sample_hw_profile("hw1")).unwrap();
        let session = Uuid::new_v4();

        let mut a = sample_node("a", hw.id);
        a.add_host_session = Some(session);
        a.state = NodeState::Provisioned;
        txn.insert_node(a).unwrap();

        let b = sample_node("b", hw.id);
        txn.insert_node(b).unwrap();
        txn.commit();

        store.read(|s| {
            assert_eq!(s.nodes_by_add_host_session(session).len(), 1);
            assert_eq!(s.nodes_by_state(NodeState::Provisioned).len(), 1);
            assert_eq!(s.nodes_by_state(NodeState::Created).len(), 1);
            assert_eq!(s.node_list(&[]).len(), 2);
        });
    }
}
