//! Profile manager (C10): partitions settings, sessions, and indices
//! across named profiles. Grounded on `space.rs`'s `SpaceManager` shape
//! (`Mutex<Vec<_>>` index backed by per-entity JSON persistence), extended
//! with the active-profile pointer file and rebinding contract spec.md
//! §4.10/§9 calls for that `SpaceManager` has no counterpart of.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::ProfileSettings;
use crate::error::RagError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileMetadata {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct ProfileManager {
    profiles_root: PathBuf,
    index: Mutex<Vec<ProfileMetadata>>,
    active: Mutex<Option<String>>,
}

impl ProfileManager {
    pub fn new(profiles_root: PathBuf) -> Result<Self, RagError> {
        std::fs::create_dir_all(&profiles_root)
            .map_err(|e| RagError::Store(anyhow::anyhow!("failed to create profiles root: {e}")))?;

        let index = Self::load_index(&profiles_root)?;
        let active = Self::load_active_pointer(&profiles_root);

        Ok(Self {
            profiles_root,
            index: Mutex::new(index),
            active: Mutex::new(active),
        })
    }

    fn load_index(profiles_root: &Path) -> Result<Vec<ProfileMetadata>, RagError> {
        let mut profiles = Vec::new();
        let entries = std::fs::read_dir(profiles_root)
            .map_err(|e| RagError::Store(anyhow::anyhow!("failed to read profiles root: {e}")))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let metadata_path = path.join("profile.json");
            if !metadata_path.exists() {
                continue;
            }
            if let Ok(data) = std::fs::read_to_string(&metadata_path) {
                if let Ok(metadata) = serde_json::from_str::<ProfileMetadata>(&data) {
                    profiles.push(metadata);
                }
            }
        }
        profiles.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(profiles)
    }

    fn active_pointer_path(profiles_root: &Path) -> PathBuf {
        profiles_root.join("active_profile.json")
    }

    fn load_active_pointer(profiles_root: &Path) -> Option<String> {
        let path = Self::active_pointer_path(profiles_root);
        let data = std::fs::read_to_string(path).ok()?;
        serde_json::from_str::<ActivePointer>(&data)
            .ok()
            .map(|p| p.active_id)
    }

    fn save_active_pointer(&self, id: &str) -> Result<(), RagError> {
        let path = Self::active_pointer_path(&self.profiles_root);
        let data = serde_json::to_string_pretty(&ActivePointer {
            active_id: id.to_string(),
        })
        .map_err(|e| RagError::Store(anyhow::anyhow!("failed to serialize active pointer: {e}")))?;
        std::fs::write(path, data)
            .map_err(|e| RagError::Store(anyhow::anyhow!("failed to write active pointer: {e}")))?;
        Ok(())
    }

    pub fn profile_dir(&self, id: &str) -> PathBuf {
        self.profiles_root.join(id)
    }

    pub fn sessions_dir(&self, id: &str) -> PathBuf {
        self.profile_dir(id).join("sessions")
    }

    pub fn store_dir(&self, id: &str) -> PathBuf {
        self.profile_dir(id).join("store")
    }

    pub fn list(&self) -> Vec<ProfileMetadata> {
        self.index.lock().clone()
    }

    pub fn active_profile_id(&self) -> Option<String> {
        self.active.lock().clone()
    }

    pub fn get(&self, id: &str) -> Result<ProfileMetadata, RagError> {
        self.index
            .lock()
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| RagError::Validation(format!("profile '{id}' not found")))
    }

    pub fn create(
        &self,
        id: &str,
        name: &str,
        description: Option<String>,
    ) -> Result<ProfileMetadata, RagError> {
        let mut index = self.index.lock();
        if index.iter().any(|p| p.id == id) {
            return Err(RagError::Validation(format!(
                "profile '{id}' already exists"
            )));
        }

        let metadata = ProfileMetadata {
            id: id.to_string(),
            name: name.to_string(),
            description,
            created_at: Utc::now(),
        };

        let dir = self.profile_dir(id);
        std::fs::create_dir_all(dir.join("store"))
            .map_err(|e| RagError::Store(anyhow::anyhow!("failed to create profile directory: {e}")))?;
        std::fs::create_dir_all(dir.join("sessions"))
            .map_err(|e| RagError::Store(anyhow::anyhow!("failed to create sessions directory: {e}")))?;

        let metadata_json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| RagError::Store(anyhow::anyhow!("failed to serialize profile metadata: {e}")))?;
        std::fs::write(dir.join("profile.json"), metadata_json)
            .map_err(|e| RagError::Store(anyhow::anyhow!("failed to write profile metadata: {e}")))?;

        let settings = ProfileSettings::default();
        let settings_json = serde_json::to_string_pretty(&settings)
            .map_err(|e| RagError::Store(anyhow::anyhow!("failed to serialize profile settings: {e}")))?;
        std::fs::write(dir.join("settings.json"), settings_json)
            .map_err(|e| RagError::Store(anyhow::anyhow!("failed to write profile settings: {e}")))?;

        index.push(metadata.clone());
        Ok(metadata)
    }

    /// Refuses to delete the active profile unless `force` is set.
    pub fn delete(&self, id: &str, force: bool) -> Result<(), RagError> {
        if !force && self.active_profile_id().as_deref() == Some(id) {
            return Err(RagError::Validation(format!(
                "profile '{id}' is active; pass force to delete it anyway"
            )));
        }

        let mut index = self.index.lock();
        let position = index
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| RagError::Validation(format!("profile '{id}' not found")))?;
        index.remove(position);
        drop(index);

        if self.active_profile_id().as_deref() == Some(id) {
            *self.active.lock() = None;
            let _ = std::fs::remove_file(Self::active_pointer_path(&self.profiles_root));
        }

        let dir = self.profile_dir(id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)
                .map_err(|e| RagError::Store(anyhow::anyhow!("failed to delete profile directory: {e}")))?;
        }
        Ok(())
    }

    pub fn load_settings(&self, id: &str) -> Result<ProfileSettings, RagError> {
        let path = self.profile_dir(id).join("settings.json");
        let data = std::fs::read_to_string(&path)
            .map_err(|e| RagError::Store(anyhow::anyhow!("failed to read settings for '{id}': {e}")))?;
        serde_json::from_str(&data)
            .map_err(|e| RagError::Store(anyhow::anyhow!("failed to parse settings for '{id}': {e}")))
    }

    pub fn save_settings(&self, id: &str, settings: &ProfileSettings) -> Result<(), RagError> {
        self.get(id)?;
        let path = self.profile_dir(id).join("settings.json");
        let data = serde_json::to_string_pretty(settings)
            .map_err(|e| RagError::Store(anyhow::anyhow!("failed to serialize settings: {e}")))?;
        std::fs::write(path, data)
            .map_err(|e| RagError::Store(anyhow::anyhow!("failed to write settings for '{id}': {e}")))?;
        Ok(())
    }

    /// Activate exactly one profile. Callers are responsible for treating
    /// this as a full teardown-and-rebuild of C4/C7/C1 bindings (spec.md
    /// §4.10/§9) — this method only records the process-wide pointer.
    pub fn activate(&self, id: &str) -> Result<(), RagError> {
        self.get(id)?;
        *self.active.lock() = Some(id.to_string());
        self.save_active_pointer(id)?;
        tracing::info!(profile_id = id, "activated profile");
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct ActivePointer {
    active_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ProfileManager {
        let dir = tempfile::tempdir().unwrap();
        ProfileManager::new(dir.into_path()).unwrap()
    }

    #[test]
    fn create_then_list_round_trips() {
        let manager = manager();
        manager.create("default", "Default Library", None).unwrap();
        let profiles = manager.list();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].id, "default");
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let manager = manager();
        manager.create("default", "Default", None).unwrap();
        assert!(manager.create("default", "Other", None).is_err());
    }

    #[test]
    fn activate_then_delete_without_force_fails() {
        let manager = manager();
        manager.create("default", "Default", None).unwrap();
        manager.activate("default").unwrap();
        assert!(manager.delete("default", false).is_err());
        assert!(manager.delete("default", true).is_ok());
    }

    #[test]
    fn settings_round_trip() {
        let manager = manager();
        manager.create("default", "Default", None).unwrap();
        let mut settings = manager.load_settings("default").unwrap();
        settings.active_model = "llama3.1".to_string();
        manager.save_settings("default", &settings).unwrap();
        let reloaded = manager.load_settings("default").unwrap();
        assert_eq!(reloaded.active_model, "llama3.1");
    }
}
