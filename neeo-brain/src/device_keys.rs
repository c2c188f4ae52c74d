//! Cache of the device keys known by the brain.
//!
//! The brain addresses every device by an opaque key. The set of keys is
//! fetched from the home project once per successful connection and kept as
//! an immutable snapshot, replaced wholesale on the next refresh.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use brain_transport::HttpTransport;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::endpoints;
use crate::error::{BrainError, Result};

/// Point-in-time set of device keys known by the brain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceKeySet {
    keys: BTreeSet<String>,
    by_adapter: BTreeMap<String, BTreeSet<String>>,
}

impl DeviceKeySet {
    /// Build a snapshot from the JSON body of the home project
    pub fn from_project_json(body: &str) -> Result<Self> {
        let project: Value = serde_json::from_str(body)?;
        let rooms = project
            .get("rooms")
            .and_then(Value::as_object)
            .ok_or_else(|| BrainError::Parse("Project has no rooms object".to_string()))?;

        let mut set = DeviceKeySet::default();
        for room in rooms.values() {
            let Some(devices) = room.get("devices").and_then(Value::as_object) else {
                continue;
            };

            for (map_key, device) in devices {
                let key = device
                    .get("key")
                    .and_then(Value::as_str)
                    .unwrap_or(map_key)
                    .to_string();

                if let Some(adapter) = device
                    .get("details")
                    .and_then(|d| d.get("adapterName"))
                    .and_then(Value::as_str)
                {
                    set.by_adapter
                        .entry(adapter.to_string())
                        .or_default()
                        .insert(key.clone());
                }

                set.keys.insert(key);
            }
        }

        Ok(set)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    /// Keys of the devices exposed by the given SDK adapter
    pub fn keys_for_adapter(&self, adapter_name: &str) -> Vec<&str> {
        self.by_adapter
            .get(adapter_name)
            .map(|keys| keys.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// Shared cache holding the latest [`DeviceKeySet`]
#[derive(Debug, Default)]
pub struct DeviceKeys {
    snapshot: RwLock<Arc<DeviceKeySet>>,
}

impl DeviceKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the home project and replace the snapshot.
    ///
    /// On failure the previous snapshot is kept and the error is returned.
    pub async fn refresh(&self, transport: &dyn HttpTransport, brain_url: &str) -> Result<()> {
        let url = format!("{brain_url}{}", endpoints::PROJECTS_HOME);
        debug!(%url, "refreshing device keys");

        let response = transport.get(&url).await?;
        if !response.is_ok() {
            return Err(BrainError::Transport {
                status: response.status,
                body: response.body,
            });
        }

        let set = DeviceKeySet::from_project_json(&response.body)?;
        debug!(count = set.len(), "device keys refreshed");
        *self.snapshot.write() = Arc::new(set);
        Ok(())
    }

    /// The latest snapshot (empty before the first refresh)
    pub fn get(&self) -> Arc<DeviceKeySet> {
        Arc::clone(&self.snapshot.read())
    }
}
