//! Preferences shared between the control app and the extension.
//!
//! The store is a flat JSON object per group. Reads always go to the backing
//! store, so every snapshot is as fresh as the last write by any process, but
//! there is no transactional guarantee across keys.
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use directories::ProjectDirs;
use lumix_core::prelude::Resolution;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use crate::{
    constants::{default_resolution, is_supported_resolution},
    error::StoreError,
};

pub const KEY_SELECTED_CAMERA: &str = "selectedCameraID";
pub const KEY_RESOLUTION_WIDTH: &str = "selectedResolution_width";
pub const KEY_RESOLUTION_HEIGHT: &str = "selectedResolution_height";
pub const KEY_EXTENSION_ACTIVE: &str = "isExtensionActive";

/// Key-value store shared across processes.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write `value`, or remove the key when `None`.
    fn set(&self, key: &str, value: Option<Value>) -> Result<(), StoreError>;
}

/// Default preference file for `group_id` under the platform data dir.
pub fn default_store_path(group_id: &str) -> Option<PathBuf> {
    ProjectDirs::from("com", "lumixwebcam", "lumix-webcam")
        .map(|dirs| dirs.data_dir().join(group_id).join("preferences.json"))
}

/// Preference store backed by one JSON file.
///
/// Writes go to a sibling temp file that is renamed over the original, so a
/// concurrent reader sees either the old or the new object.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for `group_id` at the platform default location.
    pub fn for_group(group_id: &str) -> Result<Self, StoreError> {
        default_store_path(group_id)
            .map(Self::new)
            .ok_or_else(|| StoreError::NoDataDir(group_id.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn write_all(&self, values: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_vec_pretty(values).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self
            .path
            .with_extension(format!("json.{}.tmp", std::process::id()));
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl PreferenceStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: Option<Value>) -> Result<(), StoreError> {
        let mut values = match self.read_all() {
            Ok(values) => values,
            Err(StoreError::Corrupt { path, source }) => {
                warn!(path = %path.display(), error = %source, "discarding corrupt preference store");
                BTreeMap::new()
            }
            Err(other) => return Err(other),
        };
        match value {
            Some(v) => values.insert(key.to_string(), v),
            None => values.remove(key),
        };
        self.write_all(&values)
    }
}

/// In-process store for tests and single-process runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Option<Value>) -> Result<(), StoreError> {
        let mut values = self.values.lock();
        match value {
            Some(v) => values.insert(key.to_string(), v),
            None => values.remove(key),
        };
        Ok(())
    }
}

/// What the control app has asked for, read at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSelection {
    /// `None` means "use the test pattern".
    pub camera_id: Option<String>,
    pub resolution: Resolution,
    pub extension_active: bool,
}

/// Typed view over the shared preference keys.
///
/// Reads never fail: store errors are logged and the documented default is
/// returned instead.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use lumix_core::prelude::Resolution;
/// use lumix_extension::prefs::{MemoryStore, SharedSelection};
///
/// let selection = SharedSelection::new(Arc::new(MemoryStore::new()));
/// assert_eq!(selection.selected_resolution(), Resolution::new(1920, 1080).unwrap());
/// selection.set_selected_camera_id(Some("usb-1")).unwrap();
/// assert_eq!(selection.snapshot().camera_id.as_deref(), Some("usb-1"));
/// ```
#[derive(Clone)]
pub struct SharedSelection {
    store: Arc<dyn PreferenceStore>,
}

impl SharedSelection {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    fn read(&self, key: &str) -> Option<Value> {
        self.store
            .get(key)
            .inspect_err(|err| warn!(key, code = err.code(), error = %err, "preference read failed"))
            .ok()
            .flatten()
    }

    pub fn selected_camera_id(&self) -> Option<String> {
        self.read(KEY_SELECTED_CAMERA)
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|id| !id.is_empty())
    }

    pub fn set_selected_camera_id(&self, id: Option<&str>) -> Result<(), StoreError> {
        let value = id.filter(|s| !s.is_empty()).map(Value::from);
        self.store.set(KEY_SELECTED_CAMERA, value)
    }

    /// Persisted resolution, or 1920x1080 when unset or unsupported.
    pub fn selected_resolution(&self) -> Resolution {
        let dim = |key| {
            self.read(key)
                .and_then(|v| v.as_u64())
                .and_then(|n| u32::try_from(n).ok())
        };
        let (Some(w), Some(h)) = (dim(KEY_RESOLUTION_WIDTH), dim(KEY_RESOLUTION_HEIGHT)) else {
            return default_resolution();
        };
        match Resolution::new(w, h) {
            Some(res) if is_supported_resolution(res) => res,
            _ => {
                warn!(width = w, height = h, "persisted resolution unsupported, using default");
                default_resolution()
            }
        }
    }

    /// Persist `res`; unsupported sizes are refused.
    pub fn set_selected_resolution(&self, res: Resolution) -> Result<(), StoreError> {
        if !is_supported_resolution(res) {
            return Err(StoreError::UnsupportedResolution(res));
        }
        self.store
            .set(KEY_RESOLUTION_WIDTH, Some(Value::from(res.width.get())))?;
        self.store
            .set(KEY_RESOLUTION_HEIGHT, Some(Value::from(res.height.get())))
    }

    pub fn is_extension_active(&self) -> bool {
        self.read(KEY_EXTENSION_ACTIVE)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn set_extension_active(&self, active: bool) -> Result<(), StoreError> {
        self.store
            .set(KEY_EXTENSION_ACTIVE, Some(Value::Bool(active)))
    }

    pub fn snapshot(&self) -> CaptureSelection {
        CaptureSelection {
            camera_id: self.selected_camera_id(),
            resolution: self.selected_resolution(),
            extension_active: self.is_extension_active(),
        }
    }
}
