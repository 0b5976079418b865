//! Software and hardware profile management
//!
//! Profile CRUD plus component enablement. Component changes run the owning
//! kit's lifecycle hooks around the store mutation, and can trigger a
//! synchronous configuration push or defer it for batching.

use crate::domain::model::{
    Component, ComponentRef, HardwareProfile, Kit, Node, OsInfo, Partition, ProfileType,
    SoftwareProfile,
};
use crate::domain::ports::{ClusterSync, ComponentHook, KitActions};
use crate::error::{Error, Result};
use crate::store::Datastore;
use std::sync::Arc;
use tracing::{info, warn};

/// Kit owning the mandatory `core` component
const BASE_KIT: &str = "base";
const CORE_COMPONENT: &str = "core";

/// Request payload for [`SoftwareProfileManager::create_software_profile`]
#[derive(Debug, Clone, Default)]
pub struct CreateSoftwareProfileRequest {
    pub name: String,
    pub description: Option<String>,
    pub profile_type: ProfileType,
    /// Defaults to the installer node's OS when absent
    pub os: Option<OsInfo>,
    pub min_nodes: u32,
    pub is_idle: bool,
    /// Component names to enable, resolved against installed kits
    pub components: Vec<String>,
    pub partitions: Vec<Partition>,
}

fn validate_profile_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(Error::InvalidArgument(format!(
            "Invalid profile name [{name}]"
        )));
    }
    Ok(())
}

// =============================================================================
// Software Profiles
// =============================================================================

pub struct SoftwareProfileManager {
    store: Arc<Datastore>,
    kit_actions: Arc<dyn KitActions>,
    cluster_sync: Arc<dyn ClusterSync>,
}

impl SoftwareProfileManager {
    pub fn new(
        store: Arc<Datastore>,
        kit_actions: Arc<dyn KitActions>,
        cluster_sync: Arc<dyn ClusterSync>,
    ) -> Self {
        Self { store, kit_actions, cluster_sync }
    }

    /// Resolve a component to its owning kit.
    ///
    /// With no kit named, every installed kit is searched; more than one
    /// match without a version to disambiguate is an error.
    fn resolve_component(
        &self,
        kit_name: Option<&str>,
        component_name: &str,
        version: Option<&str>,
    ) -> Result<(Kit, Component)> {
        let kits = self.store.read(|state| state.kit_list().to_vec());

        let matches: Vec<(Kit, Component)> = kits
            .into_iter()
            .filter(|kit| kit_name.map(|name| kit.name == name).unwrap_or(true))
            .filter_map(|kit| {
                kit.component(component_name)
                    .filter(|c| version.map(|v| c.version == v).unwrap_or(true))
                    .cloned()
                    .map(|c| (kit, c))
            })
            .collect();

        match matches.len() {
            0 => Err(Error::ComponentNotFound { name: component_name.to_string() }),
            1 => Ok(matches.into_iter().next().unwrap()),
            _ => Err(Error::KitNotFound(format!(
                "Multiple kits found providing component [{component_name}]; \
                 specify a kit name or version"
            ))),
        }
    }

    /// Best-matching component for a target OS
    fn resolve_component_for_os(
        &self,
        component_name: &str,
        os: &OsInfo,
    ) -> Result<(Kit, Component)> {
        let (kit, component) = self.resolve_component(None, component_name, None)?;

        if !component.supported_os.is_empty()
            && !component.supported_os.iter().any(|family| *family == os.name)
        {
            return Err(Error::ComponentNotFound {
                name: format!("{component_name} (no version supports OS [{}])", os.name),
            });
        }
        Ok((kit, component))
    }

    fn installer_os(&self) -> Option<OsInfo> {
        self.store.read(|state| {
            state
                .software_profile_list()
                .into_iter()
                .find(|sp| sp.profile_type == ProfileType::Installer)
                .and_then(|sp| sp.os)
        })
    }

    /// Create a software profile and enable its components.
    ///
    /// The OS component and the `base`/`core` component are attached
    /// automatically when not requested; a missing core component is logged,
    /// not fatal. OS-kit components are added directly; regular components go
    /// through the enable hook sequence with the sync push deferred.
    pub async fn create_software_profile(
        &self,
        request: CreateSoftwareProfileRequest,
    ) -> Result<SoftwareProfile> {
        validate_profile_name(&request.name)?;

        let os = match request.os.clone().or_else(|| self.installer_os()) {
            Some(os) => os,
            None => {
                return Err(Error::Configuration(format!(
                    "Cannot determine OS for software profile [{}]: \
                     no OS given and no installer profile exists",
                    request.name
                )))
            }
        };

        let mut requested: Vec<(Kit, Component)> = Vec::new();
        for component_name in &request.components {
            requested.push(self.resolve_component_for_os(component_name, &os)?);
        }

        // The OS component always rides along
        if !requested.iter().any(|(kit, _)| kit.is_os) {
            match self.resolve_component_for_os(&os.name, &os) {
                Ok(resolved) => requested.push(resolved),
                Err(err) => {
                    warn!(
                        profile = %request.name, os = %os.name, %err,
                        "No OS component available"
                    );
                }
            }
        }

        // ... as does base/core, best effort
        let has_core = requested
            .iter()
            .any(|(kit, c)| kit.name == BASE_KIT && c.name == CORE_COMPONENT);
        if !has_core {
            match self.resolve_component(Some(BASE_KIT), CORE_COMPONENT, None) {
                Ok(resolved) => requested.push(resolved),
                Err(err) => {
                    warn!(
                        profile = %request.name, os = %os.name, %err,
                        "No core component for this OS"
                    );
                }
            }
        }

        let profile = SoftwareProfile {
            id: 0,
            name: request.name.clone(),
            description: request.description.clone(),
            profile_type: request.profile_type,
            os: Some(os),
            min_nodes: request.min_nodes,
            locked: Default::default(),
            is_idle: request.is_idle,
            hardware_profiles: Vec::new(),
            components: Vec::new(),
            partitions: request.partitions.clone(),
            kernel: None,
            initrd: None,
            tags: Vec::new(),
        };

        let profile = {
            let mut txn = self.store.begin();
            let profile = txn.insert_software_profile(profile)?;
            txn.commit();
            profile
        };

        for (kit, component) in requested {
            if kit.is_os {
                // OS components carry no lifecycle hooks
                self.attach_component(&profile.name, &kit, &component)?;
            } else {
                self.enable_component(
                    &profile.name,
                    Some(&kit.name),
                    &component.name,
                    Some(&component.version),
                    false,
                )
                .await?;
            }
        }

        info!(profile = %profile.name, "Software profile created");
        self.get_software_profile(&profile.name)
    }

    fn attach_component(&self, profile_name: &str, kit: &Kit, component: &Component) -> Result<()> {
        let mut txn = self.store.begin();
        let mut profile = txn.state().get_software_profile(profile_name)?;

        let already = profile
            .components
            .iter()
            .any(|c| c.kit == kit.name && c.name == component.name);
        if already {
            return Err(Error::ComponentAlreadyEnabled {
                profile: profile.name,
                component: component.name.clone(),
            });
        }

        profile.components.push(ComponentRef {
            kit: kit.name.clone(),
            kit_version: kit.version.clone(),
            name: component.name.clone(),
            version: component.version.clone(),
        });
        txn.update_software_profile(&profile)?;
        txn.commit();
        Ok(())
    }

    fn detach_component(&self, profile_name: &str, kit: &Kit, component: &Component) -> Result<()> {
        let mut txn = self.store.begin();
        let mut profile = txn.state().get_software_profile(profile_name)?;

        let before = profile.components.len();
        profile
            .components
            .retain(|c| !(c.kit == kit.name && c.name == component.name));
        if profile.components.len() == before {
            return Err(Error::ComponentNotFound { name: component.name.clone() });
        }

        txn.update_software_profile(&profile)?;
        txn.commit();
        Ok(())
    }

    /// Enable a component on a profile, running the kit's enable hooks.
    /// `sync=false` defers the configuration push for batching.
    pub async fn enable_component(
        &self,
        profile_name: &str,
        kit_name: Option<&str>,
        component_name: &str,
        version: Option<&str>,
        sync: bool,
    ) -> Result<()> {
        let (kit, component) = self.resolve_component(kit_name, component_name, version)?;
        self.store.read(|state| state.get_software_profile(profile_name))?;

        self.kit_actions
            .component_hook(&kit, &component.name, ComponentHook::PreEnable, profile_name)
            .await?;

        self.attach_component(profile_name, &kit, &component)?;

        self.kit_actions
            .component_hook(&kit, &component.name, ComponentHook::Enable, profile_name)
            .await?;
        self.kit_actions
            .component_hook(&kit, &component.name, ComponentHook::PostEnable, profile_name)
            .await?;

        if sync {
            self.cluster_sync.sync_software_profile(profile_name).await?;
        }

        info!(profile = profile_name, component = %component.name, kit = %kit, "Component enabled");
        Ok(())
    }

    /// Disable a component, running the kit's disable hooks
    pub async fn disable_component(
        &self,
        profile_name: &str,
        kit_name: Option<&str>,
        component_name: &str,
        version: Option<&str>,
        sync: bool,
    ) -> Result<()> {
        let (kit, component) = self.resolve_component(kit_name, component_name, version)?;
        self.store.read(|state| state.get_software_profile(profile_name))?;

        self.kit_actions
            .component_hook(&kit, &component.name, ComponentHook::PreDisable, profile_name)
            .await?;

        self.detach_component(profile_name, &kit, &component)?;

        self.kit_actions
            .component_hook(&kit, &component.name, ComponentHook::Disable, profile_name)
            .await?;
        self.kit_actions
            .component_hook(&kit, &component.name, ComponentHook::PostDisable, profile_name)
            .await?;

        if sync {
            self.cluster_sync.sync_software_profile(profile_name).await?;
        }

        info!(profile = profile_name, component = %component.name, "Component disabled");
        Ok(())
    }

    /// Duplicate a profile under a new name.
    ///
    /// Partitions copy verbatim; only OS-kit components and the `core`
    /// component are re-enabled on the copy.
    pub async fn copy_software_profile(&self, src: &str, dst: &str) -> Result<SoftwareProfile> {
        validate_profile_name(dst)?;
        let source = self.store.read(|state| state.get_software_profile(src))?;

        let copy = SoftwareProfile {
            id: 0,
            name: dst.to_string(),
            components: Vec::new(),
            hardware_profiles: source.hardware_profiles.clone(),
            ..source.clone()
        };

        {
            let mut txn = self.store.begin();
            txn.insert_software_profile(copy)?;
            txn.commit();
        }

        for component_ref in &source.components {
            let (kit, component) = self.resolve_component(
                Some(&component_ref.kit),
                &component_ref.name,
                Some(&component_ref.version),
            )?;

            if kit.is_os {
                self.attach_component(dst, &kit, &component)?;
            } else if component.name == CORE_COMPONENT {
                self.enable_component(
                    dst,
                    Some(&kit.name),
                    &component.name,
                    Some(&component.version),
                    false,
                )
                .await?;
            }
            // Other components are deliberately not copied
        }

        info!(src, dst, "Software profile copied");
        self.get_software_profile(dst)
    }

    pub fn update_software_profile(&self, profile: &SoftwareProfile) -> Result<()> {
        let mut txn = self.store.begin();
        txn.update_software_profile(profile)?;
        txn.commit();
        Ok(())
    }

    /// Delete a profile with no referencing nodes and no hardware profile
    /// using it as its idle profile.
    pub fn delete_software_profile(&self, name: &str) -> Result<()> {
        let profile = self.store.read(|state| state.get_software_profile(name))?;

        let node_count = self
            .store
            .read(|state| state.nodes_in_software_profile(profile.id).len());
        if node_count > 0 {
            return Err(Error::OperationFailed(format!(
                "Software profile [{name}] has {node_count} associated node(s)"
            )));
        }

        let idle_referent = self.store.read(|state| {
            state
                .hardware_profile_list()
                .into_iter()
                .find(|hw| hw.idle_software_profile == Some(profile.id))
                .map(|hw| hw.name)
        });
        if let Some(hw_name) = idle_referent {
            return Err(Error::OperationFailed(format!(
                "Software profile [{name}] is the idle profile of hardware profile [{hw_name}]"
            )));
        }

        let mut txn = self.store.begin();
        txn.remove_software_profile(profile.id)?;
        txn.commit();

        info!(profile = name, "Software profile deleted");
        Ok(())
    }

    /// Allow a hardware profile's nodes to use this software profile
    pub fn add_usable_hardware_profile(&self, profile_name: &str, hw_name: &str) -> Result<()> {
        let mut txn = self.store.begin();
        let hw = txn.state().get_hardware_profile(hw_name)?;
        let mut profile = txn.state().get_software_profile(profile_name)?;

        if !profile.hardware_profiles.contains(&hw.id) {
            profile.hardware_profiles.push(hw.id);
            txn.update_software_profile(&profile)?;
            txn.commit();
        }
        Ok(())
    }

    pub fn remove_usable_hardware_profile(&self, profile_name: &str, hw_name: &str) -> Result<()> {
        let mut txn = self.store.begin();
        let hw = txn.state().get_hardware_profile(hw_name)?;
        let mut profile = txn.state().get_software_profile(profile_name)?;

        profile.hardware_profiles.retain(|id| *id != hw.id);
        txn.update_software_profile(&profile)?;
        txn.commit();
        Ok(())
    }

    pub fn get_software_profile(&self, name: &str) -> Result<SoftwareProfile> {
        self.store.read(|state| state.get_software_profile(name))
    }

    pub fn software_profile_list(&self) -> Vec<SoftwareProfile> {
        self.store.read(|state| state.software_profile_list())
    }

    pub fn get_enabled_component_list(&self, name: &str) -> Result<Vec<ComponentRef>> {
        Ok(self
            .store
            .read(|state| state.get_software_profile(name))?
            .components)
    }

    pub fn get_partition_list(&self, name: &str) -> Result<Vec<Partition>> {
        Ok(self
            .store
            .read(|state| state.get_software_profile(name))?
            .partitions)
    }

    pub fn get_software_profile_nodes(&self, name: &str) -> Result<Vec<Node>> {
        let profile = self.store.read(|state| state.get_software_profile(name))?;
        Ok(self
            .store
            .read(|state| state.nodes_in_software_profile(profile.id)))
    }

    /// Register an installed kit
    pub fn install_kit(&self, kit: Kit) {
        let mut txn = self.store.begin();
        txn.add_kit(kit);
        txn.commit();
    }
}

// =============================================================================
// Hardware Profiles
// =============================================================================

pub struct HardwareProfileManager {
    store: Arc<Datastore>,
}

impl HardwareProfileManager {
    pub fn new(store: Arc<Datastore>) -> Self {
        Self { store }
    }

    pub fn create_hardware_profile(&self, profile: HardwareProfile) -> Result<HardwareProfile> {
        validate_profile_name(&profile.name)?;

        let mut txn = self.store.begin();
        let profile = txn.insert_hardware_profile(profile)?;
        txn.commit();

        info!(profile = %profile.name, "Hardware profile created");
        Ok(profile)
    }

    pub fn get_hardware_profile(&self, name: &str) -> Result<HardwareProfile> {
        self.store.read(|state| state.get_hardware_profile(name))
    }

    pub fn hardware_profile_list(&self) -> Vec<HardwareProfile> {
        self.store.read(|state| state.hardware_profile_list())
    }

    pub fn update_hardware_profile(&self, profile: &HardwareProfile) -> Result<()> {
        let mut txn = self.store.begin();
        txn.update_hardware_profile(profile)?;
        txn.commit();
        Ok(())
    }

    /// Name a software profile as this hardware profile's idle profile.
    /// The profile must be flagged idle.
    pub fn set_idle_software_profile(
        &self,
        hw_name: &str,
        software_profile: Option<&str>,
    ) -> Result<()> {
        let mut txn = self.store.begin();
        let mut hw = txn.state().get_hardware_profile(hw_name)?;

        hw.idle_software_profile = match software_profile {
            Some(name) => {
                let profile = txn.state().get_software_profile(name)?;
                if !profile.is_idle {
                    return Err(Error::InvalidArgument(format!(
                        "Software profile [{name}] is not an idle profile"
                    )));
                }
                Some(profile.id)
            }
            None => None,
        };

        txn.update_hardware_profile(&hw)?;
        txn.commit();
        Ok(())
    }

    /// Delete a profile with no associated nodes
    pub fn delete_hardware_profile(&self, name: &str) -> Result<()> {
        let profile = self.store.read(|state| state.get_hardware_profile(name))?;

        let node_count = self
            .store
            .read(|state| state.nodes_in_hardware_profile(profile.id).len());
        if node_count > 0 {
            return Err(Error::OperationFailed(format!(
                "Hardware profile [{name}] has {node_count} associated node(s)"
            )));
        }

        let mut txn = self.store.begin();
        txn.remove_hardware_profile(profile.id)?;
        txn.commit();

        info!(profile = name, "Hardware profile deleted");
        Ok(())
    }
}
