//! Sender identity persisted on disk.
//!
//! The file holds the locally generated sender id and the last display name
//! entered. Nothing in it is a credential.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use shared::identity::{IdentityProvider, generate_sender_id};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct StoredIdentity {
    sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FileIdentity {
    path: PathBuf,
    stored: StoredIdentity,
}

impl FileIdentity {
    /// `<config dir>/snackchat/identity.json`, or the working directory when
    /// the platform has no config dir.
    pub fn default_path() -> PathBuf {
        BaseDirs::new().map_or_else(
            || PathBuf::from("./snackchat-identity.json"),
            |dirs| dirs.config_dir().join("snackchat").join("identity.json"),
        )
    }

    /// Reads the identity at `path`, creating and saving a fresh one if the
    /// file does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read identity file {}", path.display()))?;
            let stored: StoredIdentity = serde_json::from_str(&contents)
                .with_context(|| format!("identity file {} is malformed", path.display()))?;
            return Ok(Self {
                path: path.to_path_buf(),
                stored,
            });
        }

        let identity = Self {
            path: path.to_path_buf(),
            stored: StoredIdentity {
                sender_id: generate_sender_id(),
                display_name: None,
            },
        };
        identity.save()?;
        Ok(identity)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create identity directory {}", parent.display())
            })?;
        }
        let json = serde_json::to_string_pretty(&self.stored)?;
        fs::write(&self.path, json)
            .with_context(|| format!("failed to write identity file {}", self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityProvider for FileIdentity {
    fn sender_id(&self) -> &str {
        &self.stored.sender_id
    }

    fn display_name(&self) -> Option<&str> {
        self.stored.display_name.as_deref()
    }

    fn set_display_name(&mut self, name: String) {
        self.stored.display_name = Some(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_load_creates_a_stable_sender_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity.json");

        let first = FileIdentity::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert!(first.display_name().is_none());

        let second = FileIdentity::load_or_create(&path).unwrap();
        assert_eq!(first.sender_id(), second.sender_id());
    }

    #[test]
    fn display_name_survives_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let mut identity = FileIdentity::load_or_create(&path).unwrap();
        identity.set_display_name("Ana".into());
        identity.save().unwrap();

        let reloaded = FileIdentity::load_or_create(&path).unwrap();
        assert_eq!(reloaded.display_name(), Some("Ana"));
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        fs::write(&path, "not json").unwrap();

        let err = FileIdentity::load_or_create(&path).unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }
}
