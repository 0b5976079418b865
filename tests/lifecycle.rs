//! End-to-end lifecycle tests: node creation through deletion, idling,
//! activation, transfer, and storage exclusivity, exercised against
//! recording fakes for every external collaborator.

use armada::adapters::testing::{
    FakeResourceAdapter, RecordingBootConfig, RecordingClusterSync, RecordingKitActions,
};
use armada::adapters::AdapterRegistry;
use armada::domain::model::{
    HardwareProfile, HardwareProfileId, LockedState, NodeState, ProfileLocation,
    SoftwareProfile, SoftwareProfileId,
};
use armada::lifecycle::{Collaborators, CreateNodeRequest, NodeManager, NodeOutcome};
use armada::{
    AddHostSessionRegistry, Datastore, Error, Event, EventBus, SanStore, DEFAULT_STORAGE_ADAPTER,
};
use assert_matches::assert_matches;
use std::sync::Arc;

struct Harness {
    store: Arc<Datastore>,
    san: Arc<SanStore>,
    manager: NodeManager,
    adapter: Arc<FakeResourceAdapter>,
    kit_actions: Arc<RecordingKitActions>,
    boot_config: Arc<RecordingBootConfig>,
    cluster_sync: Arc<RecordingClusterSync>,
    sessions: Arc<AddHostSessionRegistry>,
    events: Arc<EventBus>,
}

fn harness() -> Harness {
    let store = Datastore::new();
    let adapter = Arc::new(FakeResourceAdapter::new("fake"));
    let adapters = AdapterRegistry::builder()
        .register_resource(adapter.clone())
        .build();
    let san = Arc::new(SanStore::in_memory(Arc::clone(&adapters)));
    let kit_actions = Arc::new(RecordingKitActions::new());
    let boot_config = Arc::new(RecordingBootConfig::new());
    let cluster_sync = Arc::new(RecordingClusterSync::new());
    let sessions = Arc::new(AddHostSessionRegistry::new());
    let events = Arc::new(EventBus::new());

    let manager = NodeManager::new(
        Arc::clone(&store),
        Arc::clone(&san),
        Collaborators {
            adapters,
            kit_actions: kit_actions.clone(),
            boot_config: boot_config.clone(),
            cluster_sync: cluster_sync.clone(),
        },
        Arc::clone(&sessions),
        Arc::clone(&events),
        None,
    );

    Harness {
        store,
        san,
        manager,
        adapter,
        kit_actions,
        boot_config,
        cluster_sync,
        sessions,
        events,
    }
}

impl Harness {
    fn seed_hardware_profile(
        &self,
        name: &str,
        name_format: &str,
        idle_profile: Option<SoftwareProfileId>,
    ) -> HardwareProfile {
        let mut txn = self.store.begin();
        let profile = txn
            .insert_hardware_profile(HardwareProfile {
                id: 0,
                name: name.to_string(),
                name_format: name_format.to_string(),
                location: ProfileLocation::Local,
                resource_adapter: Some("fake".to_string()),
                idle_software_profile: idle_profile,
                kernel: None,
                initrd: None,
                cost: 0,
                tags: Vec::new(),
            })
            .unwrap();
        txn.commit();
        profile
    }

    fn seed_software_profile(
        &self,
        name: &str,
        min_nodes: u32,
        is_idle: bool,
        hardware_profiles: Vec<HardwareProfileId>,
    ) -> SoftwareProfile {
        let mut txn = self.store.begin();
        let profile = txn
            .insert_software_profile(SoftwareProfile {
                name: name.to_string(),
                min_nodes,
                is_idle,
                hardware_profiles,
                ..Default::default()
            })
            .unwrap();
        txn.commit();
        profile
    }

    fn set_profile_lock(&self, name: &str, locked: LockedState) {
        let mut txn = self.store.begin();
        let mut profile = txn.state().get_software_profile(name).unwrap();
        profile.locked = locked;
        txn.update_software_profile(&profile).unwrap();
        txn.commit();
    }

    async fn create_named_node(&self, name: &str, hw: &str, sw: &str) {
        self.manager
            .create_new_node(CreateNodeRequest {
                hostname: Some(name.to_string()),
                hardware_profile: hw.to_string(),
                software_profile: Some(sw.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
    }
}

// =============================================================================
// Creation
// =============================================================================

#[tokio::test]
async fn test_create_node_on_generating_profile() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "*", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);

    let node = h
        .manager
        .create_new_node(CreateNodeRequest {
            hostname: None,
            hardware_profile: "hw1".to_string(),
            software_profile: Some("sp1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(node.state, NodeState::Created);
    assert!(!node.is_idle);
    assert_eq!(node.hardware_profile, hw.id);
    assert_eq!(node.software_profile, Some(1));
    assert_eq!(node.name, "hw1-0001");

    // The request ran under a tracked add-host session
    let session = node.add_host_session.unwrap();
    let record = h.sessions.get_session(session).unwrap();
    assert_eq!(record.hardware_profile, "hw1");
    assert!(!record.running);

    // Pre-add-host kit hook saw the node
    assert!(h
        .kit_actions
        .calls()
        .iter()
        .any(|c| c.starts_with("pre_add_host") && c.contains("hw1-0001")));
}

#[tokio::test]
async fn test_create_node_hostname_validation() {
    let h = harness();
    h.seed_hardware_profile("hw1", "*", None);
    h.seed_hardware_profile("hw2", "rack1-head", None);
    h.seed_software_profile("sp1", 0, false, Vec::new());

    // Generating profile rejects an explicit hostname
    let err = h
        .manager
        .create_new_node(CreateNodeRequest {
            hostname: Some("n1".to_string()),
            hardware_profile: "hw1".to_string(),
            software_profile: Some("sp1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_matches!(err, Error::Configuration(_));

    // Non-generating profile requires one
    let err = h
        .manager
        .create_new_node(CreateNodeRequest {
            hostname: None,
            hardware_profile: "hw2".to_string(),
            software_profile: Some("sp1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_matches!(err, Error::Configuration(_));
}

#[tokio::test]
async fn test_create_node_falls_back_to_idle_profile() {
    let h = harness();
    let idle = h.seed_software_profile("idle", 0, true, Vec::new());
    h.seed_hardware_profile("hw1", "*", Some(idle.id));

    let node = h
        .manager
        .create_new_node(CreateNodeRequest {
            hardware_profile: "hw1".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(node.software_profile, Some(idle.id));
    assert!(node.is_idle);
}

// =============================================================================
// Status updates
// =============================================================================

#[tokio::test]
async fn test_update_node_status_reports_changes() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;

    let mut events = h.events.subscribe();

    let changed = h
        .manager
        .update_node_status("n1", Some(NodeState::Installed), None)
        .await
        .unwrap();
    assert!(changed);

    // Same state again changes nothing
    let changed = h
        .manager
        .update_node_status("n1", Some(NodeState::Installed), None)
        .await
        .unwrap();
    assert!(!changed);

    // Local compute node gets its boot configuration rewritten on each report
    assert_eq!(h.boot_config.calls_for("write_pxe_file").len(), 2);

    // The event carries the node as it now stands plus the prior state
    let event = events.try_recv().unwrap();
    assert_matches!(event, Event::NodeStateChanged { node, previous_state } => {
        assert_eq!(node.name, "n1");
        assert_eq!(node.state, NodeState::Installed);
        assert_eq!(previous_state, NodeState::Created);
    });
    assert!(events.try_recv().is_err());
}

// =============================================================================
// Deletion
// =============================================================================

#[tokio::test]
async fn test_delete_respects_min_nodes_until_forced() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 1, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;

    let err = h.manager.delete_node("n1", false).await.unwrap_err();
    assert_matches!(err, Error::OperationFailed(msg) if msg.contains("sp1"));
    assert!(h.manager.get_node("n1").is_ok());

    // Soft-locked plus force waives the minimum
    h.set_profile_lock("sp1", LockedState::SoftLocked);
    let report = h.manager.delete_node("n1", true).await.unwrap();
    assert!(report.all_succeeded());
    assert_matches!(h.manager.get_node("n1"), Err(Error::NodeNotFound { .. }));

    // Cleanup ran for the deleted node
    assert_eq!(h.boot_config.calls_for("remove_dhcp_lease").len(), 1);
    assert_eq!(h.boot_config.calls_for("delete_puppet_node_cert").len(), 1);
    assert!(h.kit_actions.calls().iter().any(|c| c.starts_with("post_delete_host")));
    assert_eq!(h.cluster_sync.scheduled_updates(), 1);
}

#[tokio::test]
async fn test_hard_locked_profile_blocks_deletion_even_forced() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;
    h.set_profile_lock("sp1", LockedState::HardLocked);

    assert_matches!(
        h.manager.delete_node("n1", true).await,
        Err(Error::OperationFailed(msg)) if msg.contains("hard locked")
    );
}

#[tokio::test]
async fn test_delete_commits_intent_before_backend() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;

    h.adapter.fail_on("delete_node");
    let report = h.manager.delete_node("n1", false).await.unwrap();
    assert!(!report.all_succeeded());

    // The row survives the backend failure, already marked deleted
    let node = h.store.read(|s| s.get_node("n1")).unwrap();
    assert_eq!(node.state, NodeState::Deleted);
}

#[tokio::test]
async fn test_delete_cleanup_failure_does_not_block_other_nodes() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;
    h.create_named_node("n2", "hw1", "sp1").await;

    h.boot_config.fail_on("node_cleanup", "n1");
    let report = h.manager.delete_node("n*", false).await.unwrap();

    assert_matches!(report.outcome_of("n1"), Some(NodeOutcome::Failed { .. }));
    assert_eq!(report.outcome_of("n2"), Some(&NodeOutcome::Success));

    // Both rows are gone either way
    assert_matches!(h.manager.get_node("n1"), Err(Error::NodeNotFound { .. }));
    assert_matches!(h.manager.get_node("n2"), Err(Error::NodeNotFound { .. }));

    // The second node's cleanup, the hooks, and the sync all still ran
    assert_eq!(h.boot_config.calls_for("node_cleanup").len(), 2);
    assert!(h.kit_actions.calls().iter().any(|c| c.starts_with("post_delete_host")));
    assert_eq!(h.cluster_sync.scheduled_updates(), 1);
}

#[tokio::test]
async fn test_delete_reclaims_add_host_session() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;

    let session = h.manager.get_node("n1").unwrap().add_host_session.unwrap();
    assert!(h.sessions.get_session(session).is_some());

    h.manager.delete_node("n1", false).await.unwrap();
    assert!(h.sessions.get_session(session).is_none());
}

// =============================================================================
// Idle / activate
// =============================================================================

#[tokio::test]
async fn test_suspend_idles_in_place() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    let sp1 = h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;

    h.adapter.allow_suspend("n1");
    let before = h.manager.get_node("n1").unwrap();

    let report = h.manager.idle_node("n1").await.unwrap();
    assert_eq!(report.outcome_of("n1"), Some(&NodeOutcome::Success));

    let node = h.manager.get_node("n1").unwrap();
    assert!(node.is_idle);
    assert_eq!(node.software_profile, Some(sp1.id));
    assert_eq!(node.state, before.state);

    // Suspended nodes never go through the batch idle path
    assert!(!h.adapter.calls().iter().any(|c| c.starts_with("idle_active_node")));
    assert_eq!(h.boot_config.calls_for("delete_puppet_node_cert").len(), 1);
}

#[tokio::test]
async fn test_idle_survives_cert_removal_failure() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;

    h.adapter.allow_suspend("n1");
    h.boot_config.fail_on("delete_puppet_node_cert", "n1");

    let report = h.manager.idle_node("n1").await.unwrap();
    assert_eq!(report.outcome_of("n1"), Some(&NodeOutcome::Success));
    assert!(h.manager.get_node("n1").unwrap().is_idle);
    assert_eq!(h.cluster_sync.scheduled_updates(), 1);
}

#[tokio::test]
async fn test_idle_reassigns_to_idle_profile_when_suspend_refused() {
    let h = harness();
    let idle = h.seed_software_profile("idle", 0, true, Vec::new());
    let hw = h.seed_hardware_profile("hw1", "names", Some(idle.id));
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;

    h.adapter.set_idle_state(NodeState::Unresponsive);
    let report = h.manager.idle_node("n1").await.unwrap();
    assert_eq!(report.outcome_of("n1"), Some(&NodeOutcome::Success));

    let node = h.manager.get_node("n1").unwrap();
    assert!(node.is_idle);
    assert_eq!(node.software_profile, Some(idle.id));
    assert_eq!(node.state, NodeState::Unresponsive);
}

#[tokio::test]
async fn test_idle_buckets_skipped_nodes() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;
    h.create_named_node("n2", "hw1", "sp1").await;

    {
        let mut txn = h.store.begin();
        let mut n1 = txn.state().get_node("n1").unwrap();
        n1.is_idle = true;
        txn.update_node(&n1).unwrap();
        let mut n2 = txn.state().get_node("n2").unwrap();
        n2.locked = LockedState::HardLocked;
        txn.update_node(&n2).unwrap();
        txn.commit();
    }

    let report = h.manager.idle_node("n*").await.unwrap();
    assert_eq!(report.outcome_of("n1"), Some(&NodeOutcome::AlreadyIdle));
    assert_eq!(report.outcome_of("n2"), Some(&NodeOutcome::Locked));
}

#[tokio::test]
async fn test_idle_without_idle_profile_is_flagged() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;

    let report = h.manager.idle_node("n1").await.unwrap();
    assert_eq!(report.outcome_of("n1"), Some(&NodeOutcome::IdledWithoutProfile));
    assert!(h.manager.get_node("n1").unwrap().is_idle);
}

#[tokio::test]
async fn test_activate_rejects_incompatible_hardware_profile() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    // sp2 is not usable from hw1
    h.seed_software_profile("sp2", 0, false, Vec::new());
    h.create_named_node("n1", "hw1", "sp1").await;

    {
        let mut txn = h.store.begin();
        let mut node = txn.state().get_node("n1").unwrap();
        node.is_idle = true;
        txn.update_node(&node).unwrap();
        txn.commit();
    }

    let before = h.manager.get_node("n1").unwrap();
    let report = h.manager.activate_node("n1", Some("sp2")).await.unwrap();

    assert_eq!(
        report.outcome_of("n1"),
        Some(&NodeOutcome::ProfileMappingNotAllowed {
            hardware_profile: "hw1".to_string(),
            software_profile: "sp2".to_string(),
        })
    );

    // No mutation happened
    let after = h.manager.get_node("n1").unwrap();
    assert_eq!(after.software_profile, before.software_profile);
    assert!(after.is_idle);
    assert!(!h.adapter.calls().iter().any(|c| c.starts_with("activate_idle_node")));
}

#[tokio::test]
async fn test_activate_into_current_profile() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;

    {
        let mut txn = h.store.begin();
        let mut node = txn.state().get_node("n1").unwrap();
        node.is_idle = true;
        txn.update_node(&node).unwrap();
        txn.commit();
    }

    let report = h.manager.activate_node("n1", None).await.unwrap();
    assert_eq!(report.outcome_of("n1"), Some(&NodeOutcome::Success));

    let node = h.manager.get_node("n1").unwrap();
    assert!(!node.is_idle);
    assert!(h
        .adapter
        .calls()
        .iter()
        .any(|c| c.starts_with("activate_idle_node") && c.contains("changed=false")));
}

#[tokio::test]
async fn test_activate_skips_active_and_profileless_nodes() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;
    h.create_named_node("n2", "hw1", "sp1").await;

    {
        let mut txn = h.store.begin();
        let mut n2 = txn.state().get_node("n2").unwrap();
        n2.is_idle = true;
        n2.software_profile = None;
        txn.update_node(&n2).unwrap();
        txn.commit();
    }

    let report = h.manager.activate_node("n*", None).await.unwrap();
    assert_eq!(report.outcome_of("n1"), Some(&NodeOutcome::AlreadyActive));
    assert_eq!(report.outcome_of("n2"), Some(&NodeOutcome::SoftwareProfileNotFound));
}

// =============================================================================
// Transfer
// =============================================================================

#[tokio::test]
async fn test_transfer_node_moves_profile_and_refreshes_kits() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    let sp2 = h.seed_software_profile("sp2", 0, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;
    h.manager
        .update_node_status("n1", Some(NodeState::Installed), None)
        .await
        .unwrap();

    let report = h.manager.transfer_node("n1", "sp2", false).await.unwrap();
    assert_eq!(report.outcome_of("n1"), Some(&NodeOutcome::Success));
    assert_eq!(h.manager.get_node("n1").unwrap().software_profile, Some(sp2.id));

    // Kits saw the membership diff for both profiles
    let refresh = h
        .kit_actions
        .calls()
        .into_iter()
        .find(|c| c.starts_with("refresh"))
        .unwrap();
    assert!(refresh.contains("sp2:+[n1]"));
    assert!(refresh.contains("sp1:+[]-[n1]"));
}

#[tokio::test]
async fn test_transfer_requires_installed_state_unless_forced() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    h.seed_software_profile("sp2", 0, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;

    let report = h.manager.transfer_node("n1", "sp2", false).await.unwrap();
    assert_matches!(
        report.outcome_of("n1"),
        Some(NodeOutcome::TransferNotValid { reason }) if reason.contains("Installed")
    );

    let report = h.manager.transfer_node("n1", "sp2", true).await.unwrap();
    assert_eq!(report.outcome_of("n1"), Some(&NodeOutcome::Success));
}

#[tokio::test]
async fn test_transfer_respects_min_nodes_until_forced() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    let sp1 = h.seed_software_profile("sp1", 1, false, vec![hw.id]);
    let sp2 = h.seed_software_profile("sp2", 0, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;
    h.manager
        .update_node_status("n1", Some(NodeState::Installed), None)
        .await
        .unwrap();

    // Draining sp1 below its minimum fails before any reassignment
    let err = h.manager.transfer_node("n1", "sp2", false).await.unwrap_err();
    assert_matches!(err, Error::OperationFailed(msg) if msg.contains("sp1"));
    assert_eq!(h.manager.get_node("n1").unwrap().software_profile, Some(sp1.id));
    assert!(!h.adapter.calls().iter().any(|c| c.starts_with("transfer_node")));

    // Soft-locked plus force waives the minimum
    h.set_profile_lock("sp1", LockedState::SoftLocked);
    let report = h.manager.transfer_node("n1", "sp2", true).await.unwrap();
    assert!(report.all_succeeded());
    assert_eq!(h.manager.get_node("n1").unwrap().software_profile, Some(sp2.id));
}

#[tokio::test]
async fn test_count_based_transfer_prefers_unlocked() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    h.seed_software_profile("sp2", 0, false, vec![hw.id]);
    for name in ["n1", "n2", "n3"] {
        h.create_named_node(name, "hw1", "sp1").await;
        h.manager
            .update_node_status(name, Some(NodeState::Installed), None)
            .await
            .unwrap();
    }
    {
        let mut txn = h.store.begin();
        let mut n1 = txn.state().get_node("n1").unwrap();
        n1.locked = LockedState::SoftLocked;
        txn.update_node(&n1).unwrap();
        txn.commit();
    }

    // Two unlocked nodes cover the request; the soft-locked one stays put
    let report = h.manager.transfer_nodes("sp1", "sp2", 2, false).await.unwrap();
    assert!(report.all_succeeded());
    assert_eq!(h.manager.get_node("n1").unwrap().software_profile, Some(1));

    // Asking for more without force cannot tap the soft-locked node
    let err = h.manager.transfer_nodes("sp2", "sp1", 3, false).await.unwrap_err();
    assert_matches!(
        err,
        Error::NodeTransferNotValid(msg) if msg.contains("2 available, 3 requested")
    );
}

#[tokio::test]
async fn test_count_based_transfer_with_no_candidates() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    h.seed_software_profile("sp2", 0, false, vec![hw.id]);

    let err = h.manager.transfer_nodes("sp1", "sp2", 1, false).await.unwrap_err();
    assert_matches!(
        err,
        Error::NodeTransferNotValid(msg) if msg.contains("No nodes available")
    );
}

// =============================================================================
// Power control
// =============================================================================

#[tokio::test]
async fn test_reboot_with_reinstall_forces_network_boot() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;

    h.manager.reboot_node("n1", true, true).await.unwrap();

    assert_eq!(h.boot_config.calls_for("set_node_for_network_boot").len(), 1);
    assert!(h
        .adapter
        .calls()
        .iter()
        .any(|c| c.starts_with("reboot_node") && c.contains("n1")));
}

// =============================================================================
// Storage
// =============================================================================

#[tokio::test]
async fn test_storage_volume_attach_detach() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;

    let volume = h
        .san
        .add_volume(DEFAULT_STORAGE_ADAPTER, 1024, "vol-*", true, false)
        .await
        .unwrap();

    h.manager.add_storage_volume("n1", volume.id).await.unwrap();
    assert_eq!(h.san.get_node_volumes("n1").await.len(), 1);

    h.manager.remove_storage_volume("n1", volume.id).await.unwrap();
    assert!(h.san.get_node_volumes("n1").await.is_empty());
}

#[tokio::test]
async fn test_storage_volume_must_be_persistent() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;

    let scratch = h
        .san
        .add_volume(DEFAULT_STORAGE_ADAPTER, 1024, "vol-*", false, false)
        .await
        .unwrap();

    let err = h.manager.add_storage_volume("n1", scratch.id).await.unwrap_err();
    assert_matches!(err, Error::UnsupportedOperation(msg) if msg.contains("persistent"));
    assert!(h.san.get_node_volumes("n1").await.is_empty());
    assert!(!h.adapter.calls().iter().any(|c| c.starts_with("add_volume_to_node")));

    let err = h.manager.remove_storage_volume("n1", scratch.id).await.unwrap_err();
    assert_matches!(err, Error::UnsupportedOperation(_));
}

#[tokio::test]
async fn test_storage_mapping_rolls_back_on_backend_failure() {
    let h = harness();
    let hw = h.seed_hardware_profile("hw1", "names", None);
    h.seed_software_profile("sp1", 0, false, vec![hw.id]);
    h.create_named_node("n1", "hw1", "sp1").await;

    let volume = h
        .san
        .add_volume(DEFAULT_STORAGE_ADAPTER, 1024, "vol-*", true, false)
        .await
        .unwrap();

    h.adapter.fail_on("add_volume_to_node");
    let err = h.manager.add_storage_volume("n1", volume.id).await.unwrap_err();
    assert_matches!(err, Error::AdapterOperationFailed { .. });
    assert!(h.san.get_node_volumes("n1").await.is_empty());
}
