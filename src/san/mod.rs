//! SAN volume store
//!
//! A small transactional mapping of node→drive→volume associations and
//! volume→target-host connections, used to plan and persist storage
//! attach/detach operations while enforcing shared/non-shared exclusivity.
//!
//! The whole store sits behind one async mutex so connect/disconnect are
//! atomic with respect to concurrent callers, and every mutation rewrites the
//! JSON snapshot while the lock is held. The snapshot preserves the legacy
//! key relationships: volume records, per-node drive tables, and per-volume
//! target-host tables.

use crate::adapters::{AdapterRegistry, DEFAULT_STORAGE_ADAPTER};
use crate::domain::model::SoftwareProfile;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

// =============================================================================
// Records
// =============================================================================

/// A block-storage unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: Uuid,
    /// Size in megabytes
    pub size_mb: u64,
    pub storage_adapter: String,
    /// Adapter-specific identifier; `None` for the default adapter
    pub adapter_volume: Option<String>,
    /// Survives node deletion
    pub persistent: bool,
    /// Mountable by multiple nodes simultaneously
    pub shared: bool,
}

/// One node drive slot and the volume bound to it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveRecord {
    pub volume: Uuid,
    /// Device path on the target host once connected
    pub device: Option<String>,
    /// Host the volume is currently presented through
    pub target_host: Option<String>,
}

/// Connection of a volume on one target host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAttachment {
    pub device: Option<String>,
    /// Nodes depending on this connection
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SanState {
    volumes: BTreeMap<Uuid, Volume>,
    /// node name -> drive number -> record
    node_drives: BTreeMap<String, BTreeMap<u32, DriveRecord>>,
    /// volume -> target host -> attachment
    attachments: BTreeMap<Uuid, BTreeMap<String, HostAttachment>>,
}

impl SanState {
    fn volume(&self, id: Uuid) -> Result<&Volume> {
        self.volumes.get(&id).ok_or(Error::VolumeDoesNotExist { volume: id })
    }

    fn drive(&self, node: &str, drive: u32) -> Result<&DriveRecord> {
        self.node_drives
            .get(node)
            .and_then(|drives| drives.get(&drive))
            .ok_or_else(|| Error::DriveNotFound { node: node.to_string(), drive })
    }

    /// Hosts a volume is attached on and every node depending on any of them
    fn attachment_summary(&self, volume: Uuid) -> (Vec<String>, Vec<String>) {
        let mut hosts = Vec::new();
        let mut nodes = Vec::new();

        if let Some(by_host) = self.attachments.get(&volume) {
            for (host, attachment) in by_host {
                hosts.push(host.clone());
                nodes.extend(attachment.nodes.iter().cloned());
            }
        }

        (hosts, nodes)
    }

    fn host_attachment(&self, volume: Uuid, host: &str) -> Option<&HostAttachment> {
        self.attachments.get(&volume).and_then(|by_host| by_host.get(host))
    }

    fn add_host_attachment(&mut self, volume: Uuid, host: &str, device: Option<String>, node: &str) {
        let attachment = self
            .attachments
            .entry(volume)
            .or_default()
            .entry(host.to_string())
            .or_default();

        if attachment.device.is_none() {
            attachment.device = device;
        }
        if !attachment.nodes.iter().any(|n| n == node) {
            attachment.nodes.push(node.to_string());
        }
    }

    fn remove_host_attachment(&mut self, volume: Uuid, host: &str, node: &str) {
        if let Some(by_host) = self.attachments.get_mut(&volume) {
            if let Some(attachment) = by_host.get_mut(host) {
                attachment.nodes.retain(|n| n != node);
                if attachment.nodes.is_empty() {
                    by_host.remove(host);
                }
            }
            if by_host.is_empty() {
                self.attachments.remove(&volume);
            }
        }
    }

    fn set_drive(&mut self, node: &str, drive: u32, record: DriveRecord) {
        self.node_drives
            .entry(node.to_string())
            .or_default()
            .insert(drive, record);
    }

    fn remove_drive(&mut self, node: &str, drive: u32) {
        if let Some(drives) = self.node_drives.get_mut(node) {
            drives.remove(&drive);
            if drives.is_empty() {
                self.node_drives.remove(node);
            }
        }
    }
}

// =============================================================================
// Storage Change Planning
// =============================================================================

/// One drive-level change computed by [`SanStore::discover_storage_changes`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveChange {
    pub size_mb: u64,
    pub adapter: String,
    pub device: Option<String>,
    pub san_volume: Option<Uuid>,
}

/// Diff between a software profile's declared partitions and a node's
/// currently recorded drives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageChanges {
    pub added: BTreeMap<u32, DriveChange>,
    pub unchanged: BTreeMap<u32, DriveChange>,
    pub removed: BTreeMap<u32, DriveChange>,
}

// =============================================================================
// SAN Store
// =============================================================================

/// Transactional SAN mapping store
pub struct SanStore {
    state: Mutex<SanState>,
    snapshot_path: Option<PathBuf>,
    adapters: Arc<AdapterRegistry>,
}

impl SanStore {
    /// Open the store, loading the snapshot when one exists
    pub fn open(snapshot_path: Option<PathBuf>, adapters: Arc<AdapterRegistry>) -> Result<Self> {
        let state = match &snapshot_path {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "Loading SAN snapshot");
                serde_json::from_str(&std::fs::read_to_string(path)?)?
            }
            _ => SanState::default(),
        };

        Ok(Self { state: Mutex::new(state), snapshot_path, adapters })
    }

    /// In-memory store without snapshotting
    pub fn in_memory(adapters: Arc<AdapterRegistry>) -> Self {
        Self { state: Mutex::new(SanState::default()), snapshot_path: None, adapters }
    }

    fn persist(&self, state: &SanState) -> Result<()> {
        if let Some(path) = &self.snapshot_path {
            std::fs::write(path, serde_json::to_string_pretty(state)?)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Volume CRUD
    // -------------------------------------------------------------------------

    /// Allocate a new volume, delegating backing storage to the named adapter
    /// unless it is `default`.
    pub async fn add_volume(
        &self,
        storage_adapter: &str,
        size_mb: u64,
        name_format: &str,
        persistent: bool,
        shared: bool,
    ) -> Result<Volume> {
        let adapter_volume = if storage_adapter != DEFAULT_STORAGE_ADAPTER {
            let adapter = self.adapters.storage_adapter(storage_adapter)?;
            Some(adapter.allocate_volume(size_mb, name_format).await?)
        } else {
            None
        };

        let volume = Volume {
            id: Uuid::new_v4(),
            size_mb,
            storage_adapter: storage_adapter.to_string(),
            adapter_volume,
            persistent,
            shared,
        };

        debug!(
            volume = %volume.id, adapter = storage_adapter, size_mb, persistent,
            "SAN: add volume"
        );

        let mut state = self.state.lock().await;
        state.volumes.insert(volume.id, volume.clone());
        self.persist(&state)?;

        Ok(volume)
    }

    pub async fn get_volume(&self, volume: Uuid) -> Result<Volume> {
        self.state.lock().await.volume(volume).cloned()
    }

    pub async fn volume_list(&self) -> Vec<Volume> {
        self.state.lock().await.volumes.values().cloned().collect()
    }

    /// Change persistence/sharing flags. Fails while any target-host
    /// attachment exists.
    pub async fn update_volume(&self, volume: Uuid, persistent: bool, shared: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let (hosts, _) = state.attachment_summary(volume);
        if !hosts.is_empty() {
            return Err(Error::VolumeStillAttached { volume, host_count: hosts.len() });
        }

        let record = state
            .volumes
            .get_mut(&volume)
            .ok_or(Error::VolumeDoesNotExist { volume })?;
        record.persistent = persistent;
        record.shared = shared;
        self.persist(&state)?;
        Ok(())
    }

    /// Delete a volume and its adapter-side storage. Persistent volumes
    /// require `force`; attached volumes cannot be deleted at all.
    pub async fn delete_volume(&self, volume: Uuid, force: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state.volume(volume)?.clone();

        if record.persistent && !force {
            return Err(Error::DeletePersistentVolumeFailed);
        }

        let (hosts, _) = state.attachment_summary(volume);
        if !hosts.is_empty() {
            return Err(Error::VolumeStillAttached { volume, host_count: hosts.len() });
        }

        if record.storage_adapter != DEFAULT_STORAGE_ADAPTER {
            if let Some(adapter_volume) = &record.adapter_volume {
                let adapter = self.adapters.storage_adapter(&record.storage_adapter)?;
                adapter.delete_volume(adapter_volume).await?;
            }
        }

        state.volumes.remove(&volume);
        self.persist(&state)?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Drive mapping
    // -------------------------------------------------------------------------

    /// Record a node↔drive↔volume association, creating a fresh
    /// non-persistent volume when no existing one is referenced.
    pub async fn add_drive(
        &self,
        node: &str,
        storage_adapter: &str,
        drive_number: u32,
        size_mb: u64,
        san_volume: Option<Uuid>,
    ) -> Result<Uuid> {
        let volume = match san_volume {
            Some(id) => self.get_volume(id).await?,
            None => {
                self.add_volume(
                    storage_adapter,
                    size_mb,
                    &format!("{node}-{drive_number}"),
                    false,
                    false,
                )
                .await?
            }
        };

        debug!(node, drive_number, volume = %volume.id, "SAN: add drive");

        let mut state = self.state.lock().await;
        state.set_drive(node, drive_number, DriveRecord {
            volume: volume.id,
            device: None,
            target_host: None,
        });
        self.persist(&state)?;

        Ok(volume.id)
    }

    /// Unmap a drive and delete its backing volume unless persistent.
    /// Persistent-volume deletion failure here is expected, not an error.
    pub async fn delete_drive(&self, node: &str, drive_number: u32) -> Result<()> {
        let volume = {
            let state = self.state.lock().await;
            state.drive(node, drive_number)?.volume
        };

        self.unmap_drive(node, drive_number).await?;

        // Persistent volumes and volumes shared with other hosts outlive
        // their drive mapping
        match self.delete_volume(volume, false).await {
            Ok(())
            | Err(Error::DeletePersistentVolumeFailed)
            | Err(Error::VolumeStillAttached { .. }) => {}
            Err(err) => return Err(err),
        }

        debug!(node, drive_number, "SAN: drive removed");
        Ok(())
    }

    /// Associate an existing volume with a node on the next free drive number
    pub async fn map_drive(&self, node: &str, volume: Uuid) -> Result<u32> {
        let mut state = self.state.lock().await;
        state.volume(volume)?;

        let drives = state.node_drives.get(node);
        if let Some(drives) = drives {
            if drives.values().any(|rec| rec.volume == volume) {
                return Err(Error::VolumeAlreadyMapped { volume, node: node.to_string() });
            }
        }

        let next = drives
            .and_then(|d| d.keys().max().copied())
            .map(|n| n + 1)
            .unwrap_or(1);

        state.set_drive(node, next, DriveRecord { volume, device: None, target_host: None });
        self.persist(&state)?;
        Ok(next)
    }

    /// Remove a node↔drive association
    pub async fn unmap_drive(&self, node: &str, drive_number: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        state.drive(node, drive_number)?;
        state.remove_drive(node, drive_number);
        self.persist(&state)?;
        Ok(())
    }

    /// Remove every drive association a volume has on a node
    pub async fn unmap_volume(&self, node: &str, volume: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        state.volume(volume)?;

        let drives: Vec<u32> = state
            .node_drives
            .get(node)
            .map(|d| {
                d.iter()
                    .filter(|(_, rec)| rec.volume == volume)
                    .map(|(n, _)| *n)
                    .collect()
            })
            .unwrap_or_default();

        if drives.is_empty() {
            return Err(Error::VolumeNotMapped { volume, node: node.to_string() });
        }

        for drive in drives {
            state.remove_drive(node, drive);
        }
        self.persist(&state)?;
        Ok(())
    }

    /// Volumes currently mapped to a node
    pub async fn get_node_volumes(&self, node: &str) -> Vec<Volume> {
        let state = self.state.lock().await;
        state
            .node_drives
            .get(node)
            .map(|drives| {
                drives
                    .values()
                    .filter_map(|rec| state.volumes.get(&rec.volume).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drive numbers (with device paths) a volume occupies on a node
    pub async fn get_node_volume_info(&self, node: &str, volume: Uuid) -> Vec<(u32, Option<String>)> {
        let state = self.state.lock().await;
        state
            .node_drives
            .get(node)
            .map(|drives| {
                drives
                    .iter()
                    .filter(|(_, rec)| rec.volume == volume)
                    .map(|(n, rec)| (*n, rec.device.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop every drive record a node holds and delete the non-persistent
    /// backing volumes. Persistent volumes lose only their mapping.
    pub async fn delete_node_storage(&self, node: &str) -> Result<()> {
        let drives: Vec<(u32, bool)> = {
            let state = self.state.lock().await;
            state
                .node_drives
                .get(node)
                .map(|d| {
                    d.iter()
                        .map(|(n, rec)| (*n, rec.target_host.is_some()))
                        .collect()
                })
                .unwrap_or_default()
        };

        for (drive, connected) in drives {
            if connected {
                self.disconnect_storage(node, drive, None).await?;
            }
            self.delete_drive(node, drive).await?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Connect / disconnect
    // -------------------------------------------------------------------------

    /// Connect every drive a volume occupies on a node. Fails with
    /// `VolumeNotMapped` when the node has no drive bound to the volume.
    pub async fn connect_storage_volume(
        &self,
        node: &str,
        volume: Uuid,
        target_host: &str,
    ) -> Result<Option<String>> {
        let drives = self.get_node_volume_info(node, volume).await;

        if let Some((drive, _)) = drives.first() {
            return self.connect_storage(node, *drive, target_host).await;
        }

        self.get_volume(volume).await?;
        Err(Error::VolumeNotMapped { volume, node: node.to_string() })
    }

    /// Connect one drive of a node on a target host.
    ///
    /// Exclusivity rules, in order: a non-shared volume attached elsewhere is
    /// only connectable when the requesting node is already a mapped node
    /// (migration) or already connected on this host; the backend attach runs
    /// only when the volume is shared or the host already presents it; the
    /// host/device/node mapping and drive record are updated afterwards.
    pub async fn connect_storage(
        &self,
        node: &str,
        drive_number: u32,
        target_host: &str,
    ) -> Result<Option<String>> {
        let mut state = self.state.lock().await;

        let record = state.drive(node, drive_number)?.clone();
        let volume = state.volume(record.volume)?.clone();
        let adapter = self.adapters.storage_adapter(&volume.storage_adapter)?;
        let adapter_volume = volume
            .adapter_volume
            .clone()
            .unwrap_or_else(|| volume.id.to_string());

        let (_, mapped_nodes) = state.attachment_summary(volume.id);
        let on_host = state.host_attachment(volume.id, target_host).cloned();
        let host_nodes: Vec<String> = on_host.as_ref().map(|a| a.nodes.clone()).unwrap_or_default();
        let host_device = on_host.and_then(|a| a.device);

        debug!(
            volume = %volume.id, node, target_host,
            mapped = mapped_nodes.len(), on_host = host_nodes.len(),
            "SAN: connect storage"
        );

        if !mapped_nodes.is_empty() && !volume.shared {
            if host_nodes.iter().any(|n| n == node) {
                // Already connected here; re-resolve the device and verify
                // the backend still agrees with our records.
                let device = adapter
                    .connect_volume(&adapter_volume, target_host, None)
                    .await?;

                if host_device.as_deref().is_some_and(|d| d != device) {
                    return Err(Error::UnsupportedOperation(format!(
                        "Inconsistent state for volume [{}] on node [{node}]; \
                         the node must be shut down",
                        volume.id
                    )));
                }

                let device = Some(device);
                state.add_host_attachment(volume.id, target_host, device.clone(), node);
                state.set_drive(node, drive_number, DriveRecord {
                    volume: volume.id,
                    device: device.clone(),
                    target_host: Some(target_host.to_string()),
                });
                self.persist(&state)?;
                return Ok(device);
            }

            if !mapped_nodes.iter().any(|n| n == node) {
                return Err(Error::UnsupportedOperation(
                    "Unable to multi-mount non-shared volume".to_string(),
                ));
            }
            // Mapped but not connected on this host: migration in progress,
            // the source host mapping is being drained. Proceed.
        }

        let device = if volume.shared || !host_nodes.is_empty() {
            // Attaching through a hypervisor rather than directly
            let multi_mount = (target_host != node && volume.shared).then_some(node);
            Some(
                adapter
                    .connect_volume(&adapter_volume, target_host, multi_mount)
                    .await?,
            )
        } else {
            host_device
        };

        state.add_host_attachment(volume.id, target_host, device.clone(), node);
        state.set_drive(node, drive_number, DriveRecord {
            volume: volume.id,
            device: device.clone(),
            target_host: Some(target_host.to_string()),
        });
        self.persist(&state)?;

        Ok(device)
    }

    /// Disconnect every drive a volume occupies on a node.
    /// `connected_node` overrides which host mapping is drained when
    /// disconnecting on behalf of another node.
    pub async fn disconnect_storage_volume(
        &self,
        node: &str,
        volume: Uuid,
        connected_node: Option<&str>,
    ) -> Result<()> {
        let drives = self.get_node_volume_info(node, volume).await;

        if drives.is_empty() {
            self.get_volume(volume).await?;
            return Err(Error::VolumeNotMapped { volume, node: node.to_string() });
        }

        for (drive, _) in drives {
            self.disconnect_storage(node, drive, connected_node).await?;
        }
        Ok(())
    }

    /// Symmetric teardown of [`Self::connect_storage`]: the backend detach
    /// runs only when the volume is shared or this node is the sole remaining
    /// dependent; the node always leaves the target-host mapping.
    pub async fn disconnect_storage(
        &self,
        node: &str,
        drive_number: u32,
        connected_node: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;

        let record = state.drive(node, drive_number)?.clone();
        let volume = state.volume(record.volume)?.clone();
        let adapter = self.adapters.storage_adapter(&volume.storage_adapter)?;
        let adapter_volume = volume
            .adapter_volume
            .clone()
            .unwrap_or_else(|| volume.id.to_string());

        let attached_host = match connected_node {
            Some(host) => host.to_string(),
            None => record.target_host.clone().ok_or_else(|| {
                Error::VolumeNotMapped { volume: volume.id, node: node.to_string() }
            })?,
        };

        let host_nodes: Vec<String> = state
            .host_attachment(volume.id, &attached_host)
            .map(|a| a.nodes.clone())
            .unwrap_or_default();

        debug!(
            volume = %volume.id, node, host = %attached_host,
            dependents = host_nodes.len(), "SAN: disconnect storage"
        );

        if volume.shared || (host_nodes.len() == 1 && host_nodes[0] == node) {
            let multi_mount = (attached_host != node && volume.shared).then_some(node);
            adapter
                .disconnect_volume(
                    &adapter_volume,
                    &attached_host,
                    record.device.as_deref().unwrap_or_default(),
                    multi_mount,
                )
                .await?;
        }

        state.remove_host_attachment(volume.id, &attached_host, node);

        // An override disconnect acts on another node's host mapping; leave
        // this node's drive record alone in that case.
        if connected_node.is_none() {
            state.set_drive(node, drive_number, DriveRecord {
                volume: volume.id,
                device: None,
                target_host: None,
            });
        }

        self.persist(&state)?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Storage change planning
    // -------------------------------------------------------------------------

    /// Diff a software profile's declared partitions against the node's
    /// recorded drives. Persistent drives are preserved (moved to the end of
    /// the drive sequence) unless the node itself is being deleted.
    pub async fn discover_storage_changes(
        &self,
        node: &str,
        delete_node: bool,
        software_profile: &SoftwareProfile,
    ) -> Result<StorageChanges> {
        let state = self.state.lock().await;

        let previous: BTreeMap<u32, DriveRecord> =
            state.node_drives.get(node).cloned().unwrap_or_default();

        let mut changes = StorageChanges::default();
        let mut declared: Vec<u32> = Vec::new();
        let mut preserved_volumes: Vec<Uuid> = Vec::new();

        let partitions: Vec<_> = if delete_node {
            Vec::new()
        } else {
            software_profile.partitions.iter().collect()
        };

        for partition in partitions {
            let Some(drive_number) = partition.drive_number() else {
                warn!(
                    profile = %software_profile.name, device = %partition.device,
                    "Partition device has no parsable drive number"
                );
                continue;
            };

            if declared.contains(&drive_number) {
                continue;
            }
            declared.push(drive_number);

            // The volume's own adapter wins over the partition's declaration
            let adapter = match partition.san_volume {
                Some(vol) => state.volume(vol)?.storage_adapter.clone(),
                None => partition.indirect_attachment.clone(),
            };

            let Some(existing) = previous.get(&drive_number) else {
                changes.added.insert(drive_number, DriveChange {
                    size_mb: partition.disk_size,
                    adapter,
                    device: None,
                    san_volume: partition.san_volume,
                });
                continue;
            };

            let volume = state.volume(existing.volume)?.clone();

            if volume.persistent {
                if partition.san_volume == Some(volume.id) {
                    changes.unchanged.insert(drive_number, DriveChange {
                        size_mb: partition.disk_size,
                        adapter,
                        device: existing.device.clone(),
                        san_volume: partition.san_volume,
                    });
                } else {
                    changes.removed.insert(drive_number, DriveChange {
                        size_mb: volume.size_mb,
                        adapter: volume.storage_adapter.clone(),
                        device: existing.device.clone(),
                        san_volume: Some(volume.id),
                    });
                    changes.added.insert(drive_number, DriveChange {
                        size_mb: partition.disk_size,
                        adapter,
                        device: None,
                        san_volume: partition.san_volume,
                    });
                }
                preserved_volumes.push(volume.id);
                continue;
            }

            if adapter == volume.storage_adapter && partition.disk_size == volume.size_mb {
                changes.unchanged.insert(drive_number, DriveChange {
                    size_mb: partition.disk_size,
                    adapter,
                    device: existing.device.clone(),
                    san_volume: None,
                });
                continue;
            }

            changes.removed.insert(drive_number, DriveChange {
                size_mb: volume.size_mb,
                adapter: volume.storage_adapter.clone(),
                device: existing.device.clone(),
                san_volume: None,
            });
            changes.added.insert(drive_number, DriveChange {
                size_mb: partition.disk_size,
                adapter,
                device: None,
                san_volume: partition.san_volume,
            });
        }

        // Pre-existing drives not declared by the profile
        let mut next_free = declared.iter().max().map(|n| n + 1).unwrap_or(1);

        for (drive_number, record) in &previous {
            if declared.contains(drive_number) {
                continue;
            }

            let volume = state.volume(record.volume)?.clone();

            if volume.persistent {
                if preserved_volumes.contains(&volume.id) {
                    continue;
                }

                if delete_node {
                    changes.removed.insert(*drive_number, DriveChange {
                        size_mb: volume.size_mb,
                        adapter: volume.storage_adapter.clone(),
                        device: record.device.clone(),
                        san_volume: Some(volume.id),
                    });
                    continue;
                }

                // Keep the persistent drive, re-slotted after the declared ones
                changes.unchanged.insert(next_free, DriveChange {
                    size_mb: volume.size_mb,
                    adapter: volume.storage_adapter.clone(),
                    device: record.device.clone(),
                    san_volume: Some(volume.id),
                });
                next_free += 1;
                continue;
            }

            changes.removed.insert(*drive_number, DriveChange {
                size_mb: volume.size_mb,
                adapter: volume.storage_adapter.clone(),
                device: record.device.clone(),
                san_volume: None,
            });
        }

        debug!(
            node, added = changes.added.len(), unchanged = changes.unchanged.len(),
            removed = changes.removed.len(), "SAN: storage change plan"
        );

        Ok(changes)
    }
}
