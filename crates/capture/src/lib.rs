#![doc = include_str!("../README.md")]

use std::sync::Arc;

use lumix_core::prelude::*;

pub mod convert;
pub mod error;
pub mod memory;
pub mod pattern;
pub mod session;
#[cfg(feature = "v4l2")]
pub mod v4l2_backend;

pub use error::CaptureError;

/// Substrings that identify Panasonic Lumix bodies in device metadata.
pub const LUMIX_KEYWORDS: [&str; 7] = [
    "lumix", "panasonic", "dc-s5", "s5ii", "s5iix", "gh6", "gh5",
];

/// Identity of a camera as reported by device discovery.
///
/// # Example
/// ```rust
/// use lumix_capture::prelude::*;
///
/// let cam = CameraInfo::new("usb-1", "LUMIX Webcam", "Panasonic", "DC-S5M2");
/// assert!(cam.is_lumix());
/// let other = CameraInfo::new("usb-2", "FaceTime HD", "Apple", "");
/// assert!(!other.is_lumix());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CameraInfo {
    /// Stable identifier persisted as the selected camera.
    pub unique_id: String,
    pub name: String,
    pub manufacturer: String,
    pub model_id: String,
}

impl CameraInfo {
    pub fn new(
        unique_id: impl Into<String>,
        name: impl Into<String>,
        manufacturer: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            unique_id: unique_id.into(),
            name: name.into(),
            manufacturer: manufacturer.into(),
            model_id: model_id.into(),
        }
    }

    /// Keyword match over name, manufacturer and model id, case-insensitive.
    pub fn is_lumix(&self) -> bool {
        [&self.name, &self.manufacturer, &self.model_id]
            .iter()
            .map(|field| field.to_ascii_lowercase())
            .any(|field| LUMIX_KEYWORDS.iter().any(|kw| field.contains(kw)))
    }
}

/// A mode a camera can be configured to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraMode {
    pub resolution: Resolution,
    pub code: FourCc,
    /// Frame rate to pin, when the device accepts one.
    pub fps: Option<u32>,
}

impl CameraMode {
    pub fn new(resolution: Resolution, code: FourCc) -> Self {
        Self {
            resolution,
            code,
            fps: None,
        }
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = Some(fps);
        self
    }
}

/// What a running camera reports through its [`EventSink`].
#[derive(Debug)]
pub enum CameraEvent {
    /// A frame ready to forward.
    Frame(FrameBuffer),
    /// The device or the copy path discarded a frame.
    Dropped,
}

/// Callback a running camera reports into; invoked on the device's own thread.
pub type EventSink = Arc<dyn Fn(CameraEvent) + Send + Sync>;

/// Callback receiving every frame a source produces.
pub type FrameCallback = Arc<dyn Fn(FrameBuffer) + Send + Sync>;

/// Camera discovery seam.
///
/// # Example
/// ```rust
/// use lumix_capture::prelude::*;
///
/// let provider = MemoryProvider::new();
/// provider.attach(CameraInfo::new("cam-0", "LUMIX", "Panasonic", "DC-S5"));
/// assert!(provider.contains("cam-0"));
/// assert!(!provider.contains("cam-1"));
/// ```
pub trait CameraProvider: Send + Sync {
    /// Cameras currently enumerable.
    fn devices(&self) -> Vec<CameraInfo>;

    /// Open a camera for exclusive use.
    fn open(&self, unique_id: &str) -> Result<Box<dyn CameraDevice>, CaptureError>;

    /// Whether `unique_id` is currently enumerable.
    fn contains(&self, unique_id: &str) -> bool {
        self.devices().iter().any(|d| d.unique_id == unique_id)
    }
}

/// An opened camera. Owned and driven by a single capture worker.
pub trait CameraDevice: Send {
    fn info(&self) -> &CameraInfo;

    /// Modes the device advertises, in device order.
    fn modes(&self) -> Vec<CameraMode>;

    /// Apply a mode. Callers treat failure as non-fatal.
    fn configure(&mut self, mode: &CameraMode) -> Result<(), CaptureError>;

    /// Begin delivering events to `sink` from the device's own context.
    fn start(&mut self, sink: EventSink) -> Result<(), CaptureError>;

    /// Stop delivery and release the device. Safe to call when not started.
    fn stop(&mut self);
}

/// Pick the mode to request from a camera.
///
/// Prefers the last advertised mode of at least `min` in `code`, then the
/// last mode of at least `min` in any layout the capture path can convert
/// to BGRA. The result carries `fps`.
///
/// # Example
/// ```rust
/// use lumix_capture::prelude::*;
///
/// let hd = Resolution::new(1920, 1080).unwrap();
/// let modes = [
///     CameraMode::new(Resolution::new(1280, 720).unwrap(), FourCc::BGRA),
///     CameraMode::new(hd, FourCc::YUYV),
///     CameraMode::new(hd, FourCc::BGRA),
///     CameraMode::new(Resolution::new(3840, 2160).unwrap(), FourCc::YUYV),
/// ];
/// let chosen = select_preferred_mode(&modes, hd, FourCc::BGRA, 30).unwrap();
/// assert_eq!(chosen.resolution, hd);
/// assert_eq!(chosen.fps, Some(30));
/// ```
pub fn select_preferred_mode(
    modes: &[CameraMode],
    min: Resolution,
    code: FourCc,
    fps: u32,
) -> Option<CameraMode> {
    let usable = |m: &&CameraMode| {
        convert::is_convertible(m.code)
            && m.resolution.width >= min.width
            && m.resolution.height >= min.height
    };
    modes
        .iter()
        .filter(usable)
        .rfind(|m| m.code == code)
        .or_else(|| modes.iter().filter(usable).next_back())
        .map(|m| m.with_fps(fps))
}

/// Largest convertible mode, for devices whose current format cannot be
/// turned into BGRA. Ties go to the last advertised.
pub fn select_convertible_mode(modes: &[CameraMode]) -> Option<CameraMode> {
    modes
        .iter()
        .filter(|m| convert::is_convertible(m.code))
        .max_by_key(|m| m.resolution.width_px() * m.resolution.height_px())
        .copied()
}

pub mod prelude {
    pub use crate::{
        CameraDevice, CameraEvent, CameraInfo, CameraMode, CameraProvider, CaptureError,
        EventSink, FrameCallback, LUMIX_KEYWORDS,
        memory::{MemoryCamera, MemoryProvider},
        pattern::{PatternRenderer, TestPatternGenerator},
        select_convertible_mode, select_preferred_mode,
        session::{PhysicalCaptureSession, SessionState},
    };
    pub use lumix_core::prelude::*;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lumix_heuristic_covers_model_ids() {
        assert!(CameraInfo::new("a", "USB Video", "", "GH6").is_lumix());
        assert!(CameraInfo::new("a", "Capture", "", "dc-s5").is_lumix());
        assert!(!CameraInfo::new("a", "Logitech C920", "Logitech", "V-U0028").is_lumix());
    }

    #[test]
    fn preferred_mode_falls_back_to_convertible_layout() {
        let hd = Resolution::new(1920, 1080).unwrap();
        let modes = [
            CameraMode::new(hd, FourCc::YUYV),
            CameraMode::new(Resolution::new(640, 480).unwrap(), FourCc::BGRA),
        ];
        let chosen = select_preferred_mode(&modes, hd, FourCc::BGRA, 30).unwrap();
        assert_eq!(chosen.code, FourCc::YUYV);
        assert!(
            select_preferred_mode(&modes[1..], hd, FourCc::BGRA, 30).is_none()
        );
    }

    #[test]
    fn preferred_mode_skips_compressed_layouts() {
        let mjpg = FourCc::new(*b"MJPG");
        let hd = Resolution::new(1920, 1080).unwrap();
        let modes = [
            CameraMode::new(Resolution::new(1280, 720).unwrap(), FourCc::YUYV),
            CameraMode::new(hd, mjpg),
        ];
        assert_eq!(select_preferred_mode(&modes, hd, FourCc::BGRA, 30), None);

        let with_yuyv = [
            CameraMode::new(hd, FourCc::YUYV),
            CameraMode::new(hd, mjpg),
        ];
        let chosen = select_preferred_mode(&with_yuyv, hd, FourCc::BGRA, 30).unwrap();
        assert_eq!(chosen.code, FourCc::YUYV);
    }

    #[test]
    fn convertible_fallback_ignores_mjpg_default() {
        let mjpg = FourCc::new(*b"MJPG");
        let modes = [
            CameraMode::new(Resolution::new(3840, 2160).unwrap(), mjpg),
            CameraMode::new(Resolution::new(640, 480).unwrap(), FourCc::YUYV),
            CameraMode::new(Resolution::new(1280, 720).unwrap(), FourCc::YUYV),
        ];
        let chosen = select_convertible_mode(&modes).unwrap();
        assert_eq!(chosen.code, FourCc::YUYV);
        assert_eq!(chosen.resolution, Resolution::new(1280, 720).unwrap());
        assert_eq!(select_convertible_mode(&modes[..1]), None);
    }
}
