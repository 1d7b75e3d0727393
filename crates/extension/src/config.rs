//! Extension configuration, loaded from JSON.
//!
//! Lookup order: `$LUMIX_CONFIG`, then `<config dir>/lumix-webcam/extension.json`.
//! A missing file yields defaults; out-of-range values are clamped.
use std::{
    fs,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{DEFAULT_FRAME_RATE, DEFAULT_GROUP_ID, MAX_FRAME_RATE},
    error::ConfigError,
};
use lumix_core::prelude::MIN_POOL_CAPACITY;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "LUMIX_CONFIG";
/// Default depth of the producer → delivery hand-off queue.
pub const DEFAULT_DELIVERY_QUEUE_DEPTH: usize = 8;

/// Which media host the extension serves frames to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKind {
    /// Frames stay inside the process; useful for smoke tests.
    #[default]
    InProcess,
    /// Frames are written to a v4l2loopback output node.
    V4l2Loopback,
}

/// Runtime settings for the extension process.
///
/// # Example
/// ```rust
/// use lumix_extension::config::ExtensionConfig;
///
/// let cfg = ExtensionConfig::new().frame_rate(0).pool_capacity(1).build();
/// assert_eq!(cfg.frame_rate, 1);
/// assert_eq!(cfg.pool_capacity, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionConfig {
    pub frame_rate: u32,
    pub pool_capacity: usize,
    pub delivery_queue_depth: usize,
    /// Namespace shared with the control app for preferences and notifications.
    pub group_id: String,
    /// Explicit preference file; defaults under the platform data dir.
    pub store_path: Option<PathBuf>,
    /// Directory holding notification sockets; defaults under the runtime dir.
    pub notify_dir: Option<PathBuf>,
    /// When set, logs are also written to daily files here.
    pub log_dir: Option<PathBuf>,
    pub host: HostKind,
    pub loopback_device: PathBuf,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            pool_capacity: MIN_POOL_CAPACITY,
            delivery_queue_depth: DEFAULT_DELIVERY_QUEUE_DEPTH,
            group_id: DEFAULT_GROUP_ID.to_string(),
            store_path: None,
            notify_dir: None,
            log_dir: None,
            host: HostKind::default(),
            loopback_device: PathBuf::from("/dev/video10"),
        }
    }
}

impl ExtensionConfig {
    /// Start building a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps;
        self
    }

    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn delivery_queue_depth(mut self, depth: usize) -> Self {
        self.delivery_queue_depth = depth;
        self
    }

    pub fn group_id(mut self, group: impl Into<String>) -> Self {
        self.group_id = group.into();
        self
    }

    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    pub fn notify_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.notify_dir = Some(dir.into());
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn host(mut self, host: HostKind) -> Self {
        self.host = host;
        self
    }

    /// Finish building, clamping values into range.
    pub fn build(self) -> Self {
        self.sanitized()
    }

    fn sanitized(self) -> Self {
        let group_id = if self.group_id.trim().is_empty() {
            DEFAULT_GROUP_ID.to_string()
        } else {
            self.group_id
        };
        Self {
            frame_rate: self.frame_rate.clamp(1, MAX_FRAME_RATE),
            pool_capacity: self.pool_capacity.max(MIN_POOL_CAPACITY),
            delivery_queue_depth: self.delivery_queue_depth.max(1),
            group_id,
            ..self
        }
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let parsed: Self = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(parsed.sanitized())
    }

    /// Load from `$LUMIX_CONFIG` or the platform config dir.
    pub fn load() -> Result<Self, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Preference file to use for this configuration's group.
    pub fn resolved_store_path(&self) -> Option<PathBuf> {
        self.store_path
            .clone()
            .or_else(|| crate::prefs::default_store_path(&self.group_id))
    }

    /// Notification directory to use for this configuration's group.
    pub fn resolved_notify_dir(&self) -> PathBuf {
        self.notify_dir
            .clone()
            .unwrap_or_else(|| crate::notify::default_notify_dir(&self.group_id))
    }
}

/// Config file location, if one can be determined.
pub fn config_path() -> Option<PathBuf> {
    if let Some(explicit) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(explicit));
    }
    ProjectDirs::from("com", "lumixwebcam", "lumix-webcam")
        .map(|dirs| dirs.config_dir().join("extension.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ExtensionConfig::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(cfg, ExtensionConfig::default());
        assert_eq!(cfg.frame_rate, 30);
        assert_eq!(cfg.pool_capacity, 3);
    }

    #[test]
    fn partial_file_is_merged_and_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extension.json");
        fs::write(
            &path,
            r#"{ "frame_rate": 240, "delivery_queue_depth": 0, "host": "v4l2-loopback" }"#,
        )
        .unwrap();
        let cfg = ExtensionConfig::load_from(&path).unwrap();
        assert_eq!(cfg.frame_rate, MAX_FRAME_RATE);
        assert_eq!(cfg.delivery_queue_depth, 1);
        assert_eq!(cfg.host, HostKind::V4l2Loopback);
        assert_eq!(cfg.group_id, DEFAULT_GROUP_ID);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extension.json");
        fs::write(&path, "{ frame_rate: ").unwrap();
        let err = ExtensionConfig::load_from(&path).unwrap_err();
        assert_eq!(err.code(), "config_parse");
    }
}
