//! Device Registry (C1): authoritative store of device profiles and status.
//!
//! Backed by `DashMap` so per-device mutation is serialized by the map's own
//! per-shard locking without a coordinator-wide mutex; callers never see a
//! torn profile, only ever a consistent snapshot or an exclusive view of one
//! entry at a time.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::domain::error::RegistryError;
use crate::domain::models::{DeviceFilter, DeviceProfile, DeviceStatus};

use super::event_bus::{CoreEvent, EventBus};

#[derive(Debug)]
pub struct DeviceRegistry {
    devices: DashMap<String, DeviceProfile>,
    event_bus: Arc<EventBus>,
}

impl DeviceRegistry {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self { devices: DashMap::new(), event_bus }
    }

    /// Rejects a profile with neither a top-level `os` nor a `metadata.os`
    /// entry, and one whose `endpoint_url` does not parse as a URL.
    pub fn register(&self, mut profile: DeviceProfile) -> Result<(), RegistryError> {
        if self.devices.contains_key(&profile.device_id) {
            return Err(RegistryError::DuplicateId(profile.device_id));
        }

        let (resolved_os, fell_back) = DeviceProfile::resolve_os(Some(&profile.os), &profile.metadata)
            .ok_or_else(|| RegistryError::MissingOs(profile.device_id.clone()))?;
        if fell_back {
            debug!(device_id = %profile.device_id, os = %resolved_os, "os resolved from metadata.os fallback");
        }
        profile.os = resolved_os;

        url::Url::parse(&profile.endpoint_url).map_err(|err| RegistryError::InvalidEndpoint {
            device_id: profile.device_id.clone(),
            reason: err.to_string(),
        })?;

        self.devices.insert(profile.device_id.clone(), profile);
        Ok(())
    }

    pub fn deregister(&self, device_id: &str) -> Result<(), RegistryError> {
        self.devices
            .remove(device_id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::Unknown(device_id.to_string()))
    }

    pub fn snapshot(&self, device_id: &str) -> Result<DeviceProfile, RegistryError> {
        self.devices
            .get(device_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| RegistryError::Unknown(device_id.to_string()))
    }

    pub fn set_status(&self, device_id: &str, new_status: DeviceStatus) -> Result<(), RegistryError> {
        let mut entry = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| RegistryError::Unknown(device_id.to_string()))?;
        if !entry.status.can_transition_to(new_status) {
            return Err(RegistryError::IllegalTransition {
                device_id: device_id.to_string(),
                from: entry.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }
        let from = entry.status;
        entry.status = new_status;
        entry.updated_at = chrono::Utc::now();
        drop(entry);
        self.event_bus.publish(CoreEvent::DeviceStatusChanged {
            device_id: device_id.to_string(),
            from: from.as_str().to_string(),
            to: new_status.as_str().to_string(),
            reason: None,
        });
        Ok(())
    }

    pub fn touch_heartbeat(&self, device_id: &str) -> Result<(), RegistryError> {
        let mut entry = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| RegistryError::Unknown(device_id.to_string()))?;
        entry.last_heartbeat_at = Some(chrono::Utc::now());
        Ok(())
    }

    pub fn increment_attempts(&self, device_id: &str) -> Result<u32, RegistryError> {
        let mut entry = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| RegistryError::Unknown(device_id.to_string()))?;
        entry.connection_attempts += 1;
        Ok(entry.connection_attempts)
    }

    pub fn reset_attempts(&self, device_id: &str) -> Result<(), RegistryError> {
        let mut entry = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| RegistryError::Unknown(device_id.to_string()))?;
        entry.connection_attempts = 0;
        Ok(())
    }

    pub fn set_current_task(&self, device_id: &str, task_id: Option<Uuid>) -> Result<(), RegistryError> {
        let mut entry = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| RegistryError::Unknown(device_id.to_string()))?;
        entry.current_task_id = task_id;
        Ok(())
    }

    pub fn update_system_info(&self, device_id: &str, info: Map<String, Value>) -> Result<(), RegistryError> {
        let mut entry = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| RegistryError::Unknown(device_id.to_string()))?;
        entry.system_info = info;
        Ok(())
    }

    pub fn list(&self, filter: &DeviceFilter) -> Vec<DeviceProfile> {
        self.devices
            .iter()
            .map(|entry| entry.clone())
            .filter(|profile| filter.matches(profile))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str) -> DeviceProfile {
        DeviceProfile::new(id, "wss://relay/dev", "linux", ["office".to_string()], 5)
    }

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(Arc::new(EventBus::new(16)))
    }

    #[test]
    fn register_rejects_duplicate() {
        let reg = registry();
        reg.register(profile("w")).unwrap();
        assert_eq!(reg.register(profile("w")).unwrap_err(), RegistryError::DuplicateId("w".into()));
    }

    #[test]
    fn register_rejects_missing_os() {
        let reg = registry();
        let profile = DeviceProfile::new("w", "wss://relay/dev", "", ["office".to_string()], 5);
        assert_eq!(reg.register(profile).unwrap_err(), RegistryError::MissingOs("w".into()));
    }

    #[test]
    fn register_falls_back_to_metadata_os() {
        let reg = registry();
        let mut profile = DeviceProfile::new("w", "wss://relay/dev", "", ["office".to_string()], 5);
        profile.metadata.insert("os".into(), Value::String("macos".into()));
        reg.register(profile).unwrap();
        assert_eq!(reg.snapshot("w").unwrap().os, "macos");
    }

    #[test]
    fn register_rejects_unparseable_endpoint() {
        let reg = registry();
        let profile = DeviceProfile::new("w", "not a url", "linux", ["office".to_string()], 5);
        assert!(matches!(reg.register(profile).unwrap_err(), RegistryError::InvalidEndpoint { .. }));
    }

    #[test]
    fn set_status_enforces_transition_table() {
        let reg = registry();
        reg.register(profile("w")).unwrap();
        reg.set_status("w", DeviceStatus::Connecting).unwrap();
        reg.set_status("w", DeviceStatus::Connected).unwrap();
        let err = reg.set_status("w", DeviceStatus::Busy).unwrap_err();
        assert!(matches!(err, RegistryError::IllegalTransition { .. }));
    }

    #[test]
    fn unknown_device_operations_fail() {
        let reg = registry();
        assert_eq!(reg.snapshot("ghost").unwrap_err(), RegistryError::Unknown("ghost".into()));
        assert_eq!(
            reg.set_status("ghost", DeviceStatus::Connecting).unwrap_err(),
            RegistryError::Unknown("ghost".into())
        );
    }

    #[test]
    fn list_filters_by_capability() {
        let reg = registry();
        reg.register(profile("w")).unwrap();
        reg.register(DeviceProfile::new("l", "wss://relay/l", "linux", ["pdf".to_string()], 5)).unwrap();
        let filter = DeviceFilter { status: None, capability: Some("pdf".to_string()) };
        let matches = reg.list(&filter);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].device_id, "l");
    }
}
