//! Fixed identity of the virtual device.
use lumix_core::prelude::{FourCc, Resolution};
use uuid::Uuid;

pub const DEVICE_NAME: &str = "Lumix S5 Webcam";
pub const DEVICE_MODEL: &str = "Lumix S5";
pub const MANUFACTURER: &str = "Panasonic (Virtual)";
pub const STREAM_NAME: &str = "Lumix S5 Video";
pub const FORMAT_NAME: &str = "Lumix S5 Video";
pub const FORMAT_VENDOR: &str = "Panasonic";

/// Provider name reported to the media host.
pub const PROVIDER_NAME: &str = DEVICE_NAME;

pub const DEVICE_ID: Uuid = Uuid::from_u128(0xA1B2C3D4_E5F6_7890_ABCD_EF1234567890);
pub const STREAM_ID: Uuid = Uuid::from_u128(0xB2C3D4E5_F6A7_8901_BCDE_F12345678901);

pub const EXTENSION_BUNDLE_ID: &str = "com.lumixwebcam.LumixWebcam.LumixCameraExtension";
pub const DEFAULT_GROUP_ID: &str = "group.com.lumixwebcam";

pub const START_STREAMING_TOPIC: &str = "com.lumixwebcam.startStreaming";
pub const STOP_STREAMING_TOPIC: &str = "com.lumixwebcam.stopStreaming";

pub const DEFAULT_FRAME_RATE: u32 = 30;
pub const MAX_FRAME_RATE: u32 = 60;

/// Transport reported for the virtual device, as a classic four-char code.
pub const TRANSPORT_TYPE_USB: FourCc = FourCc::new(*b"usb ");

pub const DEFAULT_RESOLUTION: (u32, u32) = (1920, 1080);

/// Resolutions the control app may persist, largest first.
pub const SUPPORTED_RESOLUTIONS: [(u32, u32); 3] = [(3840, 2160), (1920, 1080), (1280, 720)];

pub fn is_supported_resolution(res: Resolution) -> bool {
    SUPPORTED_RESOLUTIONS.contains(&(res.width.get(), res.height.get()))
}

pub fn default_resolution() -> Resolution {
    let (w, h) = DEFAULT_RESOLUTION;
    Resolution::new(w, h).unwrap_or(Resolution {
        width: std::num::NonZeroU32::MIN,
        height: std::num::NonZeroU32::MIN,
    })
}
