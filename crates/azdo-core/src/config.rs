//! Configuration management for azdo-tools.
//!
//! Settings come from two layers: an optional TOML file and environment
//! variables, with the environment always winning. Config files are stored
//! in platform-specific locations:
//!
//! - **macOS/Linux**: `~/.config/azdo-tools/config.toml`
//! - **Windows**: `%APPDATA%\azdo-tools\config.toml`
//!
//! Recognized environment variables:
//!
//! - `AZURE_DEVOPS_ORG_URL` — organization URL (e.g. `https://dev.azure.com/acme`)
//! - `AZURE_DEVOPS_PAT` — personal access token
//! - `AZURE_DEVOPS_AUTH_METHOD` — must be `pat` when set
//! - `AZURE_DEVOPS_DEFAULT_PROJECT` — project used when a tool call omits one

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// Config file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Config directory name.
const CONFIG_DIR_NAME: &str = "azdo-tools";

// =============================================================================
// Configuration structures
// =============================================================================

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Azure DevOps connection settings
    #[serde(default)]
    pub azure: AzureConfig,

    /// Test watcher settings
    #[serde(default)]
    pub watch: WatchSettings,
}

/// Azure DevOps connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AzureConfig {
    /// Organization URL, e.g. `https://dev.azure.com/acme`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_url: Option<String>,

    /// Personal access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pat: Option<String>,

    /// Authentication method; only `pat` is supported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,

    /// Project used when a tool call omits one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_project: Option<String>,
}

/// Test watcher configuration as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSettings {
    /// Whether the watcher starts with the server
    #[serde(default = "default_watch_enabled")]
    pub enabled: bool,

    /// Shell command for the watch subprocess
    #[serde(default = "default_watch_command")]
    pub command: String,

    /// Tool-result report mode: `changed`, `always`, or `off`
    #[serde(default = "default_watch_report")]
    pub report: String,

    /// Emit render-heartbeat debug output
    #[serde(default)]
    pub debug: bool,

    /// Emit a notification message on status change
    #[serde(default)]
    pub notify: bool,
}

fn default_watch_enabled() -> bool {
    true
}

fn default_watch_command() -> String {
    "npm run -s test:watch".to_string()
}

fn default_watch_report() -> String {
    "changed".to_string()
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            enabled: default_watch_enabled(),
            command: default_watch_command(),
            report: default_watch_report(),
            debug: false,
            notify: false,
        }
    }
}

// =============================================================================
// Config implementation
// =============================================================================

impl Config {
    /// Get the configuration directory path.
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join(CONFIG_DIR_NAME))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from the default location.
    ///
    /// Returns a default (empty) config if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    ///
    /// Returns a default (empty) config if the file doesn't exist.
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            debug!(path = ?path, "Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        debug!(path = ?path, "Loading config");

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        info!(path = ?path, "Config loaded successfully");
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        // Ensure directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }

        debug!(path = ?path, "Saving config");

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        info!(path = ?path, "Config saved successfully");
        Ok(())
    }

    /// Overlay environment variables on top of file values.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("AZURE_DEVOPS_ORG_URL") {
            if !url.is_empty() {
                self.azure.org_url = Some(url);
            }
        }
        if let Ok(pat) = std::env::var("AZURE_DEVOPS_PAT") {
            if !pat.is_empty() {
                self.azure.pat = Some(pat);
            }
        }
        if let Ok(method) = std::env::var("AZURE_DEVOPS_AUTH_METHOD") {
            if !method.is_empty() {
                self.azure.auth_method = Some(method);
            }
        }
        if let Ok(project) = std::env::var("AZURE_DEVOPS_DEFAULT_PROJECT") {
            if !project.is_empty() {
                self.azure.default_project = Some(project);
            }
        }
    }

    /// Load from the default location with the environment overlaid.
    pub fn resolve() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env();
        Ok(config)
    }

    /// Validate that the connection settings are usable.
    pub fn validate(&self) -> Result<()> {
        let org_url = self
            .azure
            .org_url
            .as_deref()
            .ok_or_else(|| Error::Config("Organization URL is required".to_string()))?;
        if !org_url.starts_with("http://") && !org_url.starts_with("https://") {
            return Err(Error::Config(
                "Organization URL must start with http:// or https://".to_string(),
            ));
        }

        if let Some(method) = self.azure.auth_method.as_deref() {
            if !method.eq_ignore_ascii_case("pat") {
                return Err(Error::Config(format!(
                    "Unsupported auth method '{}': only 'pat' is supported",
                    method
                )));
            }
        }

        if self.azure.pat.as_deref().unwrap_or("").is_empty() {
            return Err(Error::Config(
                "A personal access token is required (AZURE_DEVOPS_PAT)".to_string(),
            ));
        }

        Ok(())
    }

    /// Project to use when a tool call omits one.
    pub fn default_project(&self) -> Option<&str> {
        self.azure.default_project.as_deref()
    }

    /// Set a configuration value by key path.
    ///
    /// Key format: `section.field` (e.g., `azure.org_url`, `watch.command`)
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();
        if parts.len() != 2 {
            return Err(Error::Config(format!(
                "Invalid config key '{}'. Expected format: section.field",
                key
            )));
        }

        let (section, field) = (parts[0], parts[1]);

        match section {
            "azure" => match field {
                "org_url" | "url" => self.azure.org_url = Some(value.to_string()),
                "pat" => self.azure.pat = Some(value.to_string()),
                "auth_method" => self.azure.auth_method = Some(value.to_string()),
                "default_project" | "project" => {
                    self.azure.default_project = Some(value.to_string())
                }
                _ => {
                    return Err(Error::Config(format!(
                        "Unknown Azure config field: {}",
                        field
                    )))
                }
            },
            "watch" => match field {
                "enabled" => {
                    self.watch.enabled = value.parse().map_err(|_| {
                        Error::Config(format!("Invalid boolean for watch.enabled: {}", value))
                    })?
                }
                "command" => self.watch.command = value.to_string(),
                "report" => self.watch.report = value.to_string(),
                "debug" => {
                    self.watch.debug = value.parse().map_err(|_| {
                        Error::Config(format!("Invalid boolean for watch.debug: {}", value))
                    })?
                }
                "notify" => {
                    self.watch.notify = value.parse().map_err(|_| {
                        Error::Config(format!("Invalid boolean for watch.notify: {}", value))
                    })?
                }
                _ => {
                    return Err(Error::Config(format!(
                        "Unknown watch config field: {}",
                        field
                    )))
                }
            },
            _ => {
                return Err(Error::Config(format!("Unknown config section: {}", section)));
            }
        }

        Ok(())
    }

    /// Get a configuration value by key path.
    ///
    /// Key format: `section.field` (e.g., `azure.org_url`, `watch.command`)
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let parts: Vec<&str> = key.split('.').collect();
        if parts.len() != 2 {
            return Err(Error::Config(format!(
                "Invalid config key '{}'. Expected format: section.field",
                key
            )));
        }

        let (section, field) = (parts[0], parts[1]);

        match section {
            "azure" => match field {
                "org_url" | "url" => Ok(self.azure.org_url.clone()),
                "pat" => Ok(self.azure.pat.as_ref().map(|_| "********".to_string())),
                "auth_method" => Ok(self.azure.auth_method.clone()),
                "default_project" | "project" => Ok(self.azure.default_project.clone()),
                _ => Err(Error::Config(format!(
                    "Unknown Azure config field: {}",
                    field
                ))),
            },
            "watch" => match field {
                "enabled" => Ok(Some(self.watch.enabled.to_string())),
                "command" => Ok(Some(self.watch.command.clone())),
                "report" => Ok(Some(self.watch.report.clone())),
                "debug" => Ok(Some(self.watch.debug.to_string())),
                "notify" => Ok(Some(self.watch.notify.to_string())),
                _ => Err(Error::Config(format!(
                    "Unknown watch config field: {}",
                    field
                ))),
            },
            _ => Err(Error::Config(format!("Unknown config section: {}", section))),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
