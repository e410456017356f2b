use crate::constants::{
    APP_NAME, DEFAULT_CONNECT_TIMEOUT, DEFAULT_OUTPUT_CAPACITY, DEFAULT_RECURSION_DEPTH,
};
use crate::project::DisplayOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Settings for locating and talking to the designer host.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    /// Framework version whose host app is launched. `None` picks the newest installed.
    pub framework_version: Option<String>,
    /// Package cache override; otherwise the environment or per-user default.
    pub package_dir: Option<PathBuf>,
    /// Runtime launcher override; otherwise the environment or `dotnet`.
    pub launcher: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub output_capacity: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            framework_version: None,
            package_dir: None,
            launcher: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
        }
    }
}

impl HostConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// Persistent previewer settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PreviewerConfig {
    pub host: HostConfig,
    pub scale: f64,
    pub show_grid_lines: bool,
    pub color_grid_cells: bool,
    pub disable_events: bool,
    pub prefetch_assets: bool,
    pub recursion_depth: usize,
}

impl Default for PreviewerConfig {
    fn default() -> Self {
        Self {
            host: HostConfig::default(),
            scale: 1.0,
            show_grid_lines: false,
            color_grid_cells: false,
            disable_events: false,
            prefetch_assets: false,
            recursion_depth: DEFAULT_RECURSION_DEPTH,
        }
    }
}

impl PreviewerConfig {
    pub fn config_dir() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(APP_NAME);
        path
    }

    pub fn config_file() -> PathBuf {
        let mut path = Self::config_dir();
        path.push("config.toml");
        path
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads the user config, writing defaults when none exists.
    pub fn load() -> Self {
        let path = Self::config_file();
        if path.exists() {
            match Self::from_file(&path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Using default settings: {}", e);
                    return Self::default();
                }
            }
        }
        let default = Self::default();
        if let Err(e) = default.save() {
            tracing::debug!("Could not write default config: {}", e);
        }
        default
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(Self::config_file(), content)?;
        Ok(())
    }

    /// Display flags implied by the boolean settings.
    pub fn display_options(&self) -> DisplayOptions {
        let mut options = DisplayOptions::NONE;
        if self.show_grid_lines {
            options |= DisplayOptions::SHOW_GRID_LINES;
        }
        if self.color_grid_cells {
            options |= DisplayOptions::COLOR_GRID_CELLS;
        }
        if self.disable_events {
            options |= DisplayOptions::DISABLE_EVENTS;
        }
        if self.prefetch_assets {
            options |= DisplayOptions::PREFETCH_ASSETS;
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trips_through_toml() {
        let config = PreviewerConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: PreviewerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let text = "scale = 2.0\n[host]\nconnect_timeout_secs = 3\n";
        let parsed: PreviewerConfig = toml::from_str(text).unwrap();
        assert_eq!(parsed.scale, 2.0);
        assert_eq!(parsed.host.connect_timeout(), Duration::from_secs(3));
        assert_eq!(parsed.host.output_capacity, DEFAULT_OUTPUT_CAPACITY);
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            PreviewerConfig::from_file(&missing),
            Err(ConfigError::Io { .. })
        ));
        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "scale = [").unwrap();
        assert!(matches!(
            PreviewerConfig::from_file(&broken),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_display_options_from_flags() {
        let config = PreviewerConfig {
            show_grid_lines: true,
            disable_events: true,
            ..Default::default()
        };
        let options = config.display_options();
        assert!(options.contains(DisplayOptions::SHOW_GRID_LINES));
        assert!(options.contains(DisplayOptions::DISABLE_EVENTS));
        assert!(!options.contains(DisplayOptions::PREFETCH_ASSETS));
    }
}
