//! Built-in storage adapter for volumes with no external backend
//!
//! Tracks attachments per target host and hands out stable device paths.
//! Volume allocation is a local bookkeeping operation; there is no remote
//! array to talk to.

use crate::domain::ports::StorageAdapter;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use uuid::Uuid;

const DEVICE_LETTERS: &[u8] = b"bcdefghijklmnopqrstuvwxyz";

#[derive(Default)]
struct HostState {
    /// adapter volume -> device
    attached: BTreeMap<String, String>,
    next_letter: usize,
}

/// Local storage adapter registered under the name `default`
pub struct DefaultStorageAdapter {
    hosts: Mutex<BTreeMap<String, HostState>>,
}

impl DefaultStorageAdapter {
    pub fn new() -> Self {
        Self { hosts: Mutex::new(BTreeMap::new()) }
    }
}

impl Default for DefaultStorageAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for DefaultStorageAdapter {
    fn name(&self) -> &str {
        "default"
    }

    async fn allocate_volume(&self, _size_mb: u64, name_format: &str) -> Result<String> {
        Ok(format!("{}-{}", name_format.trim_end_matches('*'), Uuid::new_v4()))
    }

    async fn delete_volume(&self, _adapter_volume: &str) -> Result<()> {
        Ok(())
    }

    async fn connect_volume(
        &self,
        adapter_volume: &str,
        target_host: &str,
        _multi_mount: Option<&str>,
    ) -> Result<String> {
        let mut hosts = self.hosts.lock();
        let host = hosts.entry(target_host.to_string()).or_default();

        // Reconnecting the same volume returns the same device
        if let Some(device) = host.attached.get(adapter_volume) {
            return Ok(device.clone());
        }

        let letter = DEVICE_LETTERS.get(host.next_letter).ok_or_else(|| {
            Error::UnsupportedOperation(format!(
                "No free device slots on target host [{target_host}]"
            ))
        })?;
        host.next_letter += 1;

        let device = format!("/dev/xvd{}", *letter as char);
        host.attached.insert(adapter_volume.to_string(), device.clone());
        Ok(device)
    }

    async fn disconnect_volume(
        &self,
        adapter_volume: &str,
        target_host: &str,
        _device: &str,
        _multi_mount: Option<&str>,
    ) -> Result<()> {
        let mut hosts = self.hosts.lock();
        if let Some(host) = hosts.get_mut(target_host) {
            host.attached.remove(adapter_volume);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_device_paths_are_stable_per_volume() {
        let adapter = DefaultStorageAdapter::new();
        let first = adapter.connect_volume("vol-a", "hyp01", None).await.unwrap();
        let again = adapter.connect_volume("vol-a", "hyp01", None).await.unwrap();
        assert_eq!(first, again);

        let second = adapter.connect_volume("vol-b", "hyp01", None).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_disconnect_frees_tracking() {
        let adapter = DefaultStorageAdapter::new();
        let device = adapter.connect_volume("vol-a", "hyp01", None).await.unwrap();
        adapter
            .disconnect_volume("vol-a", "hyp01", &device, None)
            .await
            .unwrap();

        // A fresh connect gets a new slot rather than the cached one
        let device2 = adapter.connect_volume("vol-a", "hyp01", None).await.unwrap();
        assert_ne!(device, device2);
    }
}
