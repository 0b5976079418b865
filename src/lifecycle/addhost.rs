//! Add-host sessions and host name generation
//!
//! Every node-creation request runs under an add-host session: a tracked
//! operation id that nodes reference until provisioning completes, and that
//! carries status messages for callers polling long-running adds.
//!
//! Host naming follows the hardware profile's `name_format`: `*` means the
//! system invents names from the profile name, a format containing `#`
//! placeholders (such as `compute-####`) expands the placeholder run to a
//! zero-padded sequence number, and any other format means the caller must
//! supply the name.

use crate::domain::model::HardwareProfile;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

/// One tracked node-creation operation
#[derive(Debug, Clone)]
pub struct AddHostSession {
    pub id: Uuid,
    pub hardware_profile: String,
    pub software_profile: Option<String>,
    pub requested: usize,
    pub running: bool,
    pub messages: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Registry of in-flight and completed add-host sessions
#[derive(Default)]
pub struct AddHostSessionRegistry {
    sessions: DashMap<Uuid, AddHostSession>,
}

impl AddHostSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_session(
        &self,
        hardware_profile: &str,
        software_profile: Option<&str>,
        requested: usize,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.insert(id, AddHostSession {
            id,
            hardware_profile: hardware_profile.to_string(),
            software_profile: software_profile.map(str::to_string),
            requested,
            running: true,
            messages: Vec::new(),
            created_at: Utc::now(),
        });
        info!(session = %id, hardware_profile, requested, "Add-host session started");
        id
    }

    pub fn update_status(&self, session: Uuid, message: &str, running: bool) {
        if let Some(mut entry) = self.sessions.get_mut(&session) {
            entry.messages.push(message.to_string());
            entry.running = running;
        }
    }

    pub fn get_session(&self, session: Uuid) -> Option<AddHostSession> {
        self.sessions.get(&session).map(|entry| entry.clone())
    }

    /// Drop a session once every node referencing it is gone
    pub fn delete_session(&self, session: Uuid) {
        if self.sessions.remove(&session).is_some() {
            info!(session = %session, "Add-host session reclaimed");
        }
    }

    pub fn sessions(&self) -> Vec<AddHostSession> {
        self.sessions.iter().map(|entry| entry.clone()).collect()
    }
}

/// Whether node names come from the system rather than the caller
pub fn profile_generates_names(profile: &HardwareProfile) -> bool {
    profile.generates_hostnames() || profile.name_format.contains('#')
}

/// Reject requests whose hostname presence disagrees with the profile's
/// naming mode.
pub fn check_hostname_request(profile: &HardwareProfile, hostname: Option<&str>) -> Result<()> {
    if profile_generates_names(profile) {
        if hostname.is_some() {
            return Err(Error::Configuration(format!(
                "Hardware profile [{}] generates host names; a host name must not be specified",
                profile.name
            )));
        }
    } else if hostname.is_none() {
        return Err(Error::Configuration(format!(
            "Hardware profile [{}] requires a host name",
            profile.name
        )));
    }
    Ok(())
}

/// Expand a name format for one sequence number
fn format_hostname(profile: &HardwareProfile, sequence: u32) -> String {
    let format = &profile.name_format;

    if format == "*" {
        return format!("{}-{:04}", profile.name.to_lowercase(), sequence);
    }

    match format.find('#') {
        Some(start) => {
            let width = format[start..].bytes().take_while(|b| *b == b'#').count();
            let prefix = &format[..start];
            let suffix = &format[start + width..];
            format!("{prefix}{sequence:0width$}{suffix}")
        }
        None => format.clone(),
    }
}

/// Next unused host name for a generating hardware profile
pub fn next_hostname<F>(
    profile: &HardwareProfile,
    dns_zone: Option<&str>,
    name_exists: F,
) -> Result<String>
where
    F: Fn(&str) -> bool,
{
    if !profile_generates_names(profile) {
        return Err(Error::Configuration(format!(
            "Hardware profile [{}] does not generate host names",
            profile.name
        )));
    }

    for sequence in 1..=u32::MAX {
        let mut name = format_hostname(profile, sequence);
        if let Some(zone) = dns_zone {
            if !name.contains('.') {
                name = format!("{name}.{zone}");
            }
        }
        if !name_exists(&name) {
            return Ok(name);
        }
    }

    Err(Error::Configuration(format!(
        "Name format [{}] for hardware profile [{}] is exhausted",
        profile.name_format, profile.name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::ProfileLocation;
    use assert_matches::assert_matches;

    fn hw_profile(name_format: &str) -> HardwareProfile {
        HardwareProfile {
            id: 1,
            name: "Compute".to_string(),
            name_format: name_format.to_string(),
            location: ProfileLocation::Local,
            resource_adapter: Some("fake".to_string()),
            idle_software_profile: None,
            kernel: None,
            initrd: None,
            cost: 0,
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_wildcard_format_generates_from_profile_name() {
        let hw = hw_profile("*");
        let name = next_hostname(&hw, Some("cluster"), |_| false).unwrap();
        assert_eq!(name, "compute-0001.cluster");
    }

    #[test]
    fn test_placeholder_format_zero_pads() {
        let hw = hw_profile("node-###");
        let taken = ["node-001.cluster".to_string()];
        let name = next_hostname(&hw, Some("cluster"), |n| taken.contains(&n.to_string())).unwrap();
        assert_eq!(name, "node-002.cluster");
    }

    #[test]
    fn test_hostname_presence_validation() {
        let generating = hw_profile("*");
        assert_matches!(
            check_hostname_request(&generating, Some("n1")),
            Err(Error::Configuration(_))
        );
        check_hostname_request(&generating, None).unwrap();

        let user_named = hw_profile("rack1-fixed");
        assert_matches!(
            check_hostname_request(&user_named, None),
            Err(Error::Configuration(_))
        );
        check_hostname_request(&user_named, Some("n1")).unwrap();
    }

    #[test]
    fn test_session_lifecycle() {
        let registry = AddHostSessionRegistry::new();
        let session = registry.create_session("hw1", Some("sp1"), 3);

        registry.update_status(session, "allocating", true);
        registry.update_status(session, "done", false);

        let record = registry.get_session(session).unwrap();
        assert_eq!(record.messages, vec!["allocating", "done"]);
        assert!(!record.running);

        registry.delete_session(session);
        assert!(registry.get_session(session).is_none());
    }
}
