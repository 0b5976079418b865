//! Domain entities for the provisioning orchestrator
//!
//! Entities reference each other through ids resolved via the persistence
//! gateway, never through live back-pointers. This keeps deletion ordering
//! explicit and the entity graph acyclic from an ownership standpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier for a hardware profile record
pub type HardwareProfileId = u32;

/// Identifier for a software profile record
pub type SoftwareProfileId = u32;

/// Identifier for a node record
pub type NodeId = u32;

// =============================================================================
// Node State
// =============================================================================

/// Lifecycle states a node moves through.
///
/// Soft deletion is modeled by setting [`NodeState::Deleted`] and committing
/// before resource-adapter cleanup runs; the legacy `Deleting-<state>`
/// spelling is accepted on parse for adapter callbacks that still use it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    Created,
    Allocated,
    Installed,
    Launching,
    Provisioned,
    Deleted,
    Unresponsive,
    Error,
    Expired,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Created => "Created",
            NodeState::Allocated => "Allocated",
            NodeState::Installed => "Installed",
            NodeState::Launching => "Launching",
            NodeState::Provisioned => "Provisioned",
            NodeState::Deleted => "Deleted",
            NodeState::Unresponsive => "Unresponsive",
            NodeState::Error => "Error",
            NodeState::Expired => "Expired",
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // Legacy agents report soft deletion as "Deleting-<state>"
        let s = if s.starts_with("Deleting-") { "Deleted" } else { s };

        match s {
            "Created" => Ok(NodeState::Created),
            "Allocated" => Ok(NodeState::Allocated),
            "Installed" => Ok(NodeState::Installed),
            "Launching" => Ok(NodeState::Launching),
            "Provisioned" => Ok(NodeState::Provisioned),
            "Deleted" => Ok(NodeState::Deleted),
            "Unresponsive" => Ok(NodeState::Unresponsive),
            "Error" => Ok(NodeState::Error),
            "Expired" => Ok(NodeState::Expired),
            other => Err(format!("unknown node state [{other}]")),
        }
    }
}

// =============================================================================
// Lock State
// =============================================================================

/// Application-level advisory lock on a node or software profile.
///
/// This is a policy check applied before mutating operations, not a
/// concurrency primitive; only the store transaction boundary guards against
/// concurrent requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockedState {
    #[default]
    Unlocked,
    SoftLocked,
    HardLocked,
}

impl LockedState {
    pub fn is_locked(&self) -> bool {
        !matches!(self, LockedState::Unlocked)
    }
}

impl std::fmt::Display for LockedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockedState::Unlocked => write!(f, "Unlocked"),
            LockedState::SoftLocked => write!(f, "SoftLocked"),
            LockedState::HardLocked => write!(f, "HardLocked"),
        }
    }
}

// =============================================================================
// Boot Source
// =============================================================================

/// Which device a node boots from next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BootFrom {
    #[default]
    Network,
    Disk,
}

impl BootFrom {
    /// Wire encoding used by boot agents (0 = network, 1 = disk)
    pub fn from_wire(value: u8) -> Self {
        if value == 1 { BootFrom::Disk } else { BootFrom::Network }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            BootFrom::Network => 0,
            BootFrom::Disk => 1,
        }
    }
}

// =============================================================================
// Node
// =============================================================================

/// Network interface attached to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nic {
    pub ip: Option<String>,
    pub mac: Option<String>,
    /// Whether this NIC is the provisioning/boot interface
    pub boot: bool,
}

/// Cloud instance correlation for a node
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstanceMapping {
    pub instance_id: String,
    pub metadata: BTreeMap<String, String>,
}

/// One managed machine, physical or virtual
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Unique hostname
    pub name: String,
    pub state: NodeState,
    pub locked: LockedState,
    pub is_idle: bool,
    pub boot_from: BootFrom,
    /// Correlates nodes created or deleted together in one request
    pub add_host_session: Option<Uuid>,
    pub rack: Option<String>,
    pub rank: Option<u32>,
    pub vcpus: Option<u32>,
    pub hardware_profile: HardwareProfileId,
    /// Nullable while the node is idle or unprovisioned
    pub software_profile: Option<SoftwareProfileId>,
    pub nics: Vec<Nic>,
    pub tags: Vec<String>,
    pub instance: Option<InstanceMapping>,
    pub last_update: DateTime<Utc>,
}

impl Node {
    /// Boot NIC IP, if any
    pub fn provisioning_ip(&self) -> Option<&str> {
        self.nics
            .iter()
            .find(|n| n.boot)
            .and_then(|n| n.ip.as_deref())
    }
}

// =============================================================================
// Hardware Profile
// =============================================================================

/// Where nodes of this profile live relative to the installer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileLocation {
    #[default]
    Local,
    Remote,
}

/// A class of physical/virtual resource configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub id: HardwareProfileId,
    pub name: String,
    /// Hostname policy. `*` means hostnames are system-generated; anything
    /// else requires the caller to supply them.
    pub name_format: String,
    pub location: ProfileLocation,
    /// Name of the resource adapter responsible for nodes in this profile
    pub resource_adapter: Option<String>,
    /// Software profile nodes are reassigned to when idled
    pub idle_software_profile: Option<SoftwareProfileId>,
    pub kernel: Option<String>,
    pub initrd: Option<String>,
    pub cost: u32,
    pub tags: Vec<String>,
}

impl HardwareProfile {
    /// Whether node names are generated by the system rather than supplied
    pub fn generates_hostnames(&self) -> bool {
        self.name_format == "*"
    }
}

// =============================================================================
// Software Profile
// =============================================================================

/// Role of a software profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileType {
    Installer,
    #[default]
    Compute,
}

/// Partition declared by a software profile. The drive number is the prefix
/// of the device name (`"1.1"` is partition 1 on drive 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub device: String,
    pub mount_point: Option<String>,
    /// Size in megabytes
    pub disk_size: u64,
    /// Existing persistent volume backing this partition, if any
    pub san_volume: Option<Uuid>,
    /// Storage adapter used when no explicit volume is given
    pub indirect_attachment: String,
}

impl Partition {
    /// Drive number portion of the device name
    pub fn drive_number(&self) -> Option<u32> {
        self.device.split('.').next()?.parse().ok()
    }
}

/// Reference to an enabled component on a software profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRef {
    pub kit: String,
    pub kit_version: String,
    pub name: String,
    pub version: String,
}

/// A class of node configuration: OS, components, partitions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SoftwareProfile {
    pub id: SoftwareProfileId,
    pub name: String,
    pub description: Option<String>,
    pub profile_type: ProfileType,
    pub os: Option<OsInfo>,
    pub min_nodes: u32,
    pub locked: LockedState,
    /// Idle profiles hold capacity not currently assigned active work
    pub is_idle: bool,
    /// Hardware profiles allowed to use this software profile
    pub hardware_profiles: Vec<HardwareProfileId>,
    pub components: Vec<ComponentRef>,
    pub partitions: Vec<Partition>,
    pub kernel: Option<String>,
    pub initrd: Option<String>,
    pub tags: Vec<String>,
}

impl SoftwareProfile {
    pub fn allows_hardware_profile(&self, id: HardwareProfileId) -> bool {
        self.hardware_profiles.contains(&id)
    }
}

// =============================================================================
// Kits and Components
// =============================================================================

/// Operating system identification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    pub name: String,
    pub version: String,
    pub arch: String,
}

impl std::fmt::Display for OsInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.name, self.version, self.arch)
    }
}

/// A named, versioned unit of configuration within a kit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub version: String,
    /// OS families this component supports; empty means any
    pub supported_os: Vec<String>,
}

/// A versioned, installable software package providing components
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kit {
    pub name: String,
    pub version: String,
    pub iteration: String,
    /// OS kits provide the base operating system component
    pub is_os: bool,
    pub components: Vec<Component>,
}

impl Kit {
    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }
}

impl std::fmt::Display for Kit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.name, self.version, self.iteration)
    }
}

// =============================================================================
// Tags
// =============================================================================

/// A tag shared between nodes and profiles. Reaped when its last referencing
/// node is deleted and no profile still carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_state_round_trip() {
        for state in [
            NodeState::Created,
            NodeState::Allocated,
            NodeState::Installed,
            NodeState::Launching,
            NodeState::Provisioned,
            NodeState::Deleted,
            NodeState::Unresponsive,
            NodeState::Error,
            NodeState::Expired,
        ] {
            assert_eq!(state.as_str().parse::<NodeState>().unwrap(), state);
        }
    }

    #[test]
    fn test_deleting_prefix_parses_as_deleted() {
        assert_eq!(
            "Deleting-Provisioned".parse::<NodeState>().unwrap(),
            NodeState::Deleted
        );
    }

    #[test]
    fn test_boot_from_wire_encoding() {
        assert_eq!(BootFrom::from_wire(0), BootFrom::Network);
        assert_eq!(BootFrom::from_wire(1), BootFrom::Disk);
        assert_eq!(BootFrom::Disk.to_wire(), 1);
    }

    #[test]
    fn test_partition_drive_number() {
        let p = Partition {
            device: "2.1".to_string(),
            mount_point: None,
            disk_size: 8192,
            san_volume: None,
            indirect_attachment: "default".to_string(),
        };
        assert_eq!(p.drive_number(), Some(2));
    }

    #[test]
    fn test_wildcard_name_format() {
        let hw = HardwareProfile {
            id: 1,
            name: "hw1".to_string(),
            name_format: "*".to_string(),
            location: ProfileLocation::Local,
            resource_adapter: None,
            idle_software_profile: None,
            kernel: None,
            initrd: None,
            cost: 0,
            tags: vec![],
        };
        assert!(hw.generates_hostnames());
    }
}
