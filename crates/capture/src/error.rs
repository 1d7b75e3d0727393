/// Errors opening or driving a physical camera.
///
/// The capture session logs and swallows these; they never reach the
/// caller of `start_capture`.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("camera {0:?} not found")]
    DeviceNotFound(String),
    #[error("camera {0:?} is in use by another process")]
    DeviceBusy(String),
    #[error("camera configuration rejected: {0}")]
    Configuration(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl CaptureError {
    /// Stable string code for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::DeviceNotFound(_) => "device_not_found",
            CaptureError::DeviceBusy(_) => "device_busy",
            CaptureError::Configuration(_) => "configuration_failed",
            CaptureError::Backend(_) => "backend_error",
        }
    }

    /// Whether the camera is unavailable, as opposed to misbehaving.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            CaptureError::DeviceNotFound(_) | CaptureError::DeviceBusy(_)
        )
    }
}
