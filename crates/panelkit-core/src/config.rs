//! Deployment configuration.
//!
//! A deployment is one panel installation: its site identifier (used to tag
//! stored credentials), the backend flavour it talks to and the API base URL.
//!
//! Configuration is stored at `~/.config/panelkit/config.json` and can be
//! overridden from the environment (or a `.env` file).

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Application name used for config/data directory paths
const APP_NAME: &str = "panelkit";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Backend flavour. Forks differ in request encoding and a few parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PanelType {
    #[default]
    V2board,
    #[serde(rename = "Xiao-V2board")]
    XiaoV2board,
    Xboard,
}

impl PanelType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "V2board" => Some(PanelType::V2board),
            "Xiao-V2board" => Some(PanelType::XiaoV2board),
            "Xboard" => Some(PanelType::Xboard),
            _ => None,
        }
    }

    /// These forks expect `application/x-www-form-urlencoded` POST bodies.
    pub fn uses_form_bodies(&self) -> bool {
        matches!(self, PanelType::XiaoV2board | PanelType::Xboard)
    }
}

/// Where the persistent local store lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistentStore {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub site_name: String,
    pub panel_type: PanelType,
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub persistent_store: PersistentStore,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            site_name: APP_NAME.to_string(),
            panel_type: PanelType::default(),
            api_base_url: "http://localhost:8080/api/v1".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            persistent_store: PersistentStore::default(),
        }
    }
}

impl DeploymentConfig {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Load the config file, then apply `PANELKIT_*` overrides from the
    /// environment. A `.env` file in the working directory is honoured.
    pub fn from_env() -> Result<Self> {
        // Silently ignore a missing .env
        let _ = dotenvy::dotenv();
        let mut config = Self::load()?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(site) = var("PANELKIT_SITE_NAME") {
            self.site_name = site;
        }
        if let Some(panel) = var("PANELKIT_PANEL_TYPE") {
            self.panel_type = PanelType::parse(&panel)
                .with_context(|| format!("Unknown panel type: {}", panel))?;
        }
        if let Some(url) = var("PANELKIT_API_BASE_URL") {
            self.api_base_url = url;
        }
        if let Some(secs) = var("PANELKIT_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = secs
                .parse()
                .with_context(|| format!("Invalid request timeout: {}", secs))?;
        }
        debug!(site = %self.site_name, panel = ?self.panel_type, "Configuration resolved");
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Per-site directory for persistent storage.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(&self.site_name))
    }
}
