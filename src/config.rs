//! Application configuration
//!
//! Read from `<config dir>/psdview/config.json`. Every field has a default,
//! so a partial or missing file is fine.

use crate::cache::DEFAULT_MAX_CACHE_BYTES;
use crate::render::placeholder;
use crate::render::RenderMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "psdview";
const CONFIG_FILE: &str = "config.json";
const CACHE_SUBDIR: &str = "psd_cache";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Overrides the platform cache directory
    pub dir: Option<PathBuf>,
    pub max_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            max_bytes: DEFAULT_MAX_CACHE_BYTES,
        }
    }
}

impl CacheConfig {
    /// Configured directory, else `<cache dir>/psdview/psd_cache`, else `./psd_cache`
    pub fn resolved_dir(&self) -> PathBuf {
        if let Some(dir) = &self.dir {
            return dir.clone();
        }
        dirs::cache_dir()
            .map(|d| d.join(APP_DIR).join(CACHE_SUBDIR))
            .unwrap_or_else(|| PathBuf::from(CACHE_SUBDIR))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub mode: RenderMode,
    pub placeholder_width: u32,
    pub placeholder_height: u32,
    pub parallel_layer_decode: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            mode: RenderMode::Full,
            placeholder_width: placeholder::DEFAULT_WIDTH,
            placeholder_height: placeholder::DEFAULT_HEIGHT,
            parallel_layer_decode: true,
        }
    }
}

impl RenderConfig {
    pub fn placeholder_size(&self) -> (u32, u32) {
        (self.placeholder_width, self.placeholder_height)
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Platform config file if present; defaults otherwise
    pub fn load_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }

        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Ignoring config {:?}: {}", path, e);
            Self::default()
        })
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.max_bytes, 1024 * 1024 * 1024);
        assert_eq!(config.render.mode, RenderMode::Full);
        assert_eq!(config.render.placeholder_size(), (800, 200));
        assert!(config.render.parallel_layer_decode);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"render": {"mode": "light"}, "cache": {"max_bytes": 4096}}"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.render.mode, RenderMode::Light);
        assert_eq!(config.render.placeholder_width, 800);
        assert_eq!(config.cache.max_bytes, 4096);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = AppConfig::default();
        config.cache.dir = Some(dir.path().join("c"));
        config.cache.enabled = false;

        config.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "[1, 2").unwrap();

        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_explicit_cache_dir_wins() {
        let config = CacheConfig {
            dir: Some(PathBuf::from("/tmp/x")),
            ..CacheConfig::default()
        };
        assert_eq!(config.resolved_dir(), PathBuf::from("/tmp/x"));
    }
}
