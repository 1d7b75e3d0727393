//! Installing and removing the virtual camera.
//!
//! Requests complete with one of four outcomes. Re-activating an extension
//! that is already in place fails with [`ERROR_ALREADY_INSTALLED`], which is
//! reported as [`ActivationOutcome::Completed`].
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::debug;

/// Unclassified request failure.
pub const ERROR_UNKNOWN: i64 = 1;
/// The extension is already installed and active.
pub const ERROR_ALREADY_INSTALLED: i64 = 4;

/// How an activation or deactivation request finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActivationOutcome {
    Completed,
    WillCompleteAfterReboot,
    NeedsUserApproval,
    Failed { code: i64, message: String },
}

impl ActivationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Map a request failure to its outcome.
pub fn classify_failure(code: i64, message: impl Into<String>) -> ActivationOutcome {
    if code == ERROR_ALREADY_INSTALLED {
        return ActivationOutcome::Completed;
    }
    ActivationOutcome::Failed {
        code,
        message: message.into(),
    }
}

// OS errnos share the integer space with request codes, so they never go
// through `classify_failure`; the errno stays in the message.
fn io_failure(what: &Path, err: io::Error) -> ActivationOutcome {
    ActivationOutcome::Failed {
        code: ERROR_UNKNOWN,
        message: format!("{}: {err}", what.display()),
    }
}

/// Something that can put the virtual camera in place and take it away.
pub trait ExtensionInstaller {
    fn activate(&self) -> ActivationOutcome;
    fn deactivate(&self) -> ActivationOutcome;
    fn is_installed(&self) -> bool;
    /// What the user has to do when a request answers
    /// [`ActivationOutcome::NeedsUserApproval`].
    fn approval_hint(&self, activating: bool) -> String;
}

const MODULE: &str = "v4l2loopback";

/// Installer backed by the `v4l2loopback` kernel module.
///
/// Loading a module needs root, so this never loads anything itself: it
/// inspects the module state and tells the user what to run.
#[derive(Debug, Clone)]
pub struct LoopbackInstaller {
    device: PathBuf,
    module_dir: PathBuf,
    modules_load_dir: PathBuf,
}

impl LoopbackInstaller {
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
            module_dir: PathBuf::from("/sys/module").join(MODULE),
            modules_load_dir: PathBuf::from("/etc/modules-load.d"),
        }
    }

    /// Override the sysfs and modules-load locations.
    pub fn with_roots(mut self, module_dir: impl Into<PathBuf>, modules_load_dir: impl Into<PathBuf>) -> Self {
        self.module_dir = module_dir.into();
        self.modules_load_dir = modules_load_dir.into();
        self
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    fn module_loaded(&self) -> bool {
        self.module_dir.is_dir()
    }

    fn loads_at_boot(&self) -> io::Result<bool> {
        let entries = match fs::read_dir(&self.modules_load_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "conf") {
                continue;
            }
            let Ok(contents) = fs::read_to_string(&path) else {
                continue;
            };
            if contents
                .lines()
                .map(str::trim)
                .any(|line| line == MODULE)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn video_nr(&self) -> Option<u32> {
        let name = self.device.file_name()?.to_str()?;
        name.strip_prefix("video")?.parse().ok()
    }
}

impl ExtensionInstaller for LoopbackInstaller {
    fn activate(&self) -> ActivationOutcome {
        if self.module_loaded() {
            return match fs::metadata(&self.device) {
                Ok(_) => {
                    debug!(device = %self.device.display(), "loopback device already present");
                    classify_failure(ERROR_ALREADY_INSTALLED, "already installed")
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => classify_failure(
                    ERROR_UNKNOWN,
                    format!(
                        "{MODULE} is loaded but {} does not exist; reload it with the right video_nr",
                        self.device.display()
                    ),
                ),
                Err(err) => io_failure(&self.device, err),
            };
        }
        match self.loads_at_boot() {
            Ok(true) => ActivationOutcome::WillCompleteAfterReboot,
            Ok(false) => ActivationOutcome::NeedsUserApproval,
            Err(err) => io_failure(&self.modules_load_dir, err),
        }
    }

    fn deactivate(&self) -> ActivationOutcome {
        if self.module_loaded() {
            ActivationOutcome::NeedsUserApproval
        } else {
            ActivationOutcome::Completed
        }
    }

    fn is_installed(&self) -> bool {
        self.module_loaded() && self.device.exists()
    }

    fn approval_hint(&self, activating: bool) -> String {
        if !activating {
            return format!("run: sudo modprobe -r {MODULE}");
        }
        let nr = self
            .video_nr()
            .map(|nr| format!(" video_nr={nr}"))
            .unwrap_or_default();
        format!(
            "run: sudo modprobe {MODULE}{nr} card_label=\"{}\" exclusive_caps=1",
            lumix_extension::constants::DEVICE_NAME
        )
    }
}
