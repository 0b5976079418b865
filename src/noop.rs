//! No-op collaborators for running without kit or boot infrastructure
//!
//! Stand-ins used by the daemon until real kit-action and boot-config
//! backends are registered. Each call succeeds and logs at debug.

use armada::domain::model::{Kit, Node};
use armada::domain::ports::{
    BootConfigManager, ClusterSync, ComponentHook, KitActions, RefreshDelta,
};
use armada::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

pub struct NoopKitActions;

#[async_trait]
impl KitActions for NoopKitActions {
    async fn pre_add_host(
        &self,
        hardware_profile: &str,
        _software_profile: Option<&str>,
        nodes: &[String],
    ) -> Result<()> {
        debug!(hardware_profile, ?nodes, "pre_add_host (noop)");
        Ok(())
    }

    async fn pre_delete_host(
        &self,
        hardware_profile: &str,
        _software_profile: Option<&str>,
        nodes: &[String],
    ) -> Result<()> {
        debug!(hardware_profile, ?nodes, "pre_delete_host (noop)");
        Ok(())
    }

    async fn post_delete_host(
        &self,
        hardware_profile: &str,
        _software_profile: Option<&str>,
        nodes: &[String],
    ) -> Result<()> {
        debug!(hardware_profile, ?nodes, "post_delete_host (noop)");
        Ok(())
    }

    async fn refresh(&self, deltas: &BTreeMap<String, RefreshDelta>) -> Result<()> {
        debug!(profiles = deltas.len(), "refresh (noop)");
        Ok(())
    }

    async fn component_hook(
        &self,
        kit: &Kit,
        component: &str,
        hook: ComponentHook,
        software_profile: &str,
    ) -> Result<()> {
        debug!(%kit, component, %hook, software_profile, "component hook (noop)");
        Ok(())
    }
}

pub struct NoopBootConfig;

#[async_trait]
impl BootConfigManager for NoopBootConfig {
    async fn write_pxe_file(&self, node: &Node) -> Result<()> {
        debug!(node = %node.name, "write_pxe_file (noop)");
        Ok(())
    }

    async fn set_node_for_network_boot(&self, node: &Node) -> Result<()> {
        debug!(node = %node.name, "set_node_for_network_boot (noop)");
        Ok(())
    }

    async fn delete_puppet_node_cert(&self, node_name: &str) -> Result<()> {
        debug!(node = node_name, "delete_puppet_node_cert (noop)");
        Ok(())
    }

    async fn remove_dhcp_lease(&self, node: &Node) -> Result<()> {
        debug!(node = %node.name, "remove_dhcp_lease (noop)");
        Ok(())
    }

    async fn node_cleanup(&self, node_name: &str) -> Result<()> {
        debug!(node = node_name, "node_cleanup (noop)");
        Ok(())
    }
}

pub struct NoopClusterSync;

#[async_trait]
impl ClusterSync for NoopClusterSync {
    async fn schedule_cluster_update(&self) -> Result<()> {
        debug!("schedule_cluster_update (noop)");
        Ok(())
    }

    async fn sync_software_profile(&self, software_profile: &str) -> Result<()> {
        debug!(software_profile, "sync_software_profile (noop)");
        Ok(())
    }
}
