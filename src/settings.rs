use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const SERVER_ENV: &str = "TIMERECORDER_SERVER";

const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server_url: String,
    pub username: String,
    /// Prefix of this instance's name in refresh markers.
    pub origin_label: String,
    pub refresh_poll_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            username: String::new(),
            origin_label: "cli".into(),
            refresh_poll_ms: 1_000,
        }
    }
}

impl Settings {
    pub fn refresh_poll_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_poll_ms.max(100))
    }

    /// Unique per process, so an instance can recognise its own markers.
    pub fn origin(&self) -> String {
        format!("{}-{}", self.origin_label, std::process::id())
    }
}

/// `settings.json` in the application directory.
pub struct SettingsStore {
    path: PathBuf,
    data: Settings,
}

impl SettingsStore {
    /// A missing or unreadable file yields the defaults.
    pub fn new(dir: PathBuf) -> Result<Self> {
        let path = dir.join(SETTINGS_FILE);
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .inspect_err(|e| warn!("Ignoring malformed {}: {e}", path.display()))
                .unwrap_or_default()
        } else {
            Settings::default()
        };

        Ok(Self { path, data })
    }

    pub fn settings(&self) -> &Settings {
        &self.data
    }

    /// Settings with command line and environment overrides applied. Nothing is persisted.
    pub fn resolved(&self, server: Option<String>, username: Option<String>) -> Settings {
        let mut settings = self.data.clone();
        if let Some(server) = server.or_else(|| std::env::var(SERVER_ENV).ok()) {
            settings.server_url = server;
        }
        if let Some(username) = username {
            settings.username = username;
        }
        settings
    }

    pub fn update_username(&mut self, username: &str) -> Result<()> {
        self.data.username = username.to_string();
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let serialized = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn missing_or_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        assert_eq!(
            SettingsStore::new(dir.path().to_path_buf())
                .unwrap()
                .settings(),
            &Settings::default()
        );

        fs::write(dir.path().join(SETTINGS_FILE), r#"{"username": "alice"}"#).unwrap();
        let store = SettingsStore::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(store.settings().username, "alice");
        assert_eq!(store.settings().refresh_poll_ms, 1_000);
    }

    #[test]
    fn username_is_persisted() {
        let dir = tempdir().unwrap();
        let mut store = SettingsStore::new(dir.path().to_path_buf()).unwrap();
        store.update_username("bob").unwrap();

        let reopened = SettingsStore::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(reopened.settings().username, "bob");
    }

    #[test]
    fn flags_override_file() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path().to_path_buf()).unwrap();
        let settings = store.resolved(Some("http://records".into()), Some("carol".into()));
        assert_eq!(settings.server_url, "http://records");
        assert_eq!(settings.username, "carol");
    }
}
