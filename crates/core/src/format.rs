use std::{fmt, num::NonZeroU32, str::FromStr, time::Duration};

/// Four-character code describing a pixel layout.
///
/// # Example
/// ```rust
/// use lumix_core::prelude::FourCc;
///
/// let fcc = FourCc::new(*b"BGRA");
/// assert_eq!(fcc.to_string(), "BGRA");
/// assert_eq!(fcc, FourCc::BGRA);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc([u8; 4]);

impl FourCc {
    /// 32-bit BGRA, the only layout the virtual stream advertises.
    pub const BGRA: FourCc = FourCc(*b"BGRA");
    /// Packed 4:2:2 YUV as delivered by most UVC cameras.
    pub const YUYV: FourCc = FourCc(*b"YUYV");
    /// Packed 24-bit RGB.
    pub const RG24: FourCc = FourCc(*b"RG24");

    /// Construct from raw bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Little-endian u32 encoding.
    pub fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Raw bytes.
    pub fn bytes(self) -> [u8; 4] {
        self.0
    }

    /// Try to convert to a printable string.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Bytes per pixel for packed single-plane layouts; `None` for anything else.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match &self.0 {
            b"BGRA" | b"RGBA" | b"AR24" | b"AB24" | b"BGR4" | b"RGB4" => Some(4),
            b"RG24" | b"RGB3" | b"BGR3" => Some(3),
            b"YUYV" | b"UYVY" => Some(2),
            _ => None,
        }
    }
}

impl From<u32> for FourCc {
    fn from(value: u32) -> Self {
        Self(value.to_le_bytes())
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.as_str() {
            write!(f, "{s}")
        } else {
            write!(f, "0x{:08x}", self.to_u32())
        }
    }
}

impl FromStr for FourCc {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 {
            return Err("fourcc must be four ASCII bytes".into());
        }
        let mut arr = [0u8; 4];
        arr.copy_from_slice(bytes);
        Ok(FourCc(arr))
    }
}

/// Resolution of a frame.
///
/// # Example
/// ```rust
/// use lumix_core::prelude::Resolution;
///
/// let res: Resolution = "1280x720".parse().unwrap();
/// assert_eq!(res.width.get(), 1280);
/// assert_eq!(res.to_string(), "1280x720");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Resolution {
    /// Width in pixels (non-zero).
    pub width: NonZeroU32,
    /// Height in pixels (non-zero).
    pub height: NonZeroU32,
}

impl Resolution {
    /// Create a resolution, returning `None` if width or height are zero.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Some(Self {
            width: NonZeroU32::new(width)?,
            height: NonZeroU32::new(height)?,
        })
    }

    /// Width as `usize`.
    pub fn width_px(&self) -> usize {
        self.width.get() as usize
    }

    /// Height as `usize`.
    pub fn height_px(&self) -> usize {
        self.height.get() as usize
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
        let width = w.trim().parse::<u32>().map_err(|e| e.to_string())?;
        let height = h.trim().parse::<u32>().map_err(|e| e.to_string())?;
        Resolution::new(width, height).ok_or_else(|| "resolution must be non-zero".into())
    }
}

/// Frame duration expressed as a rational number of seconds.
///
/// # Example
/// ```rust
/// use lumix_core::prelude::Interval;
///
/// let interval = Interval::from_fps(30);
/// assert_eq!(interval.fps(), 30.0);
/// assert_eq!(interval.as_nanos(), 33_333_333);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Interval {
    /// Numerator of the seconds-per-frame rational.
    pub numerator: NonZeroU32,
    /// Denominator of the seconds-per-frame rational.
    pub denominator: NonZeroU32,
}

impl Interval {
    /// One frame at `fps` frames per second. Zero is clamped to one.
    pub fn from_fps(fps: u32) -> Self {
        Self {
            numerator: NonZeroU32::MIN,
            denominator: NonZeroU32::new(fps).unwrap_or(NonZeroU32::MIN),
        }
    }

    /// Frames per second as floating point.
    pub fn fps(&self) -> f32 {
        self.denominator.get() as f32 / self.numerator.get() as f32
    }

    /// Length of one frame in whole nanoseconds (truncated).
    pub fn as_nanos(&self) -> u64 {
        self.numerator.get() as u64 * 1_000_000_000 / self.denominator.get() as u64
    }

    /// Length of one frame as a `Duration`.
    pub fn as_duration(&self) -> Duration {
        Duration::from_nanos(self.as_nanos())
    }
}

/// Pixel layout and timing bounds advertised by the virtual stream.
///
/// Exactly one format is constructed per stream; there is no runtime switching.
///
/// # Example
/// ```rust
/// use lumix_core::prelude::{FourCc, Resolution, StreamFormat};
///
/// let fmt = StreamFormat::bgra(Resolution::new(1920, 1080).unwrap(), 30);
/// assert_eq!(fmt.code, FourCc::BGRA);
/// assert_eq!(fmt.max_frame_duration.fps(), 30.0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFormat {
    /// Pixel layout; always BGRA for streams built with [`StreamFormat::bgra`].
    pub code: FourCc,
    pub resolution: Resolution,
    /// Shortest frame duration a client may request.
    pub min_frame_duration: Interval,
    /// Longest frame duration, i.e. the nominal stream rate.
    pub max_frame_duration: Interval,
    /// Human-readable format name reported to clients.
    pub name: String,
    /// Vendor reported alongside the format name.
    pub vendor: String,
}

impl StreamFormat {
    /// Build a BGRA stream format at `fps`, with a 60 fps ceiling.
    pub fn bgra(resolution: Resolution, fps: u32) -> Self {
        Self {
            code: FourCc::BGRA,
            resolution,
            min_frame_duration: Interval::from_fps(60),
            max_frame_duration: Interval::from_fps(fps),
            name: String::new(),
            vendor: String::new(),
        }
    }

    /// Attach the format-name and vendor extensions.
    pub fn with_description(mut self, name: impl Into<String>, vendor: impl Into<String>) -> Self {
        self.name = name.into();
        self.vendor = vendor.into();
        self
    }

    /// Nominal per-frame duration.
    pub fn frame_duration(&self) -> Interval {
        self.max_frame_duration
    }

    /// Tightly packed row length in bytes.
    pub fn min_stride(&self) -> usize {
        self.resolution.width_px() * self.code.bytes_per_pixel().unwrap_or(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_rounds_down_to_whole_nanos() {
        assert_eq!(Interval::from_fps(60).as_nanos(), 16_666_666);
        assert_eq!(Interval::from_fps(0), Interval::from_fps(1));
    }

    #[test]
    fn resolution_parse_rejects_garbage() {
        assert!("1920".parse::<Resolution>().is_err());
        assert!("0x720".parse::<Resolution>().is_err());
        assert_eq!(
            " 3840 X 2160".trim().parse::<Resolution>().unwrap(),
            Resolution::new(3840, 2160).unwrap()
        );
    }

    #[test]
    fn bgra_format_stride() {
        let fmt = StreamFormat::bgra(Resolution::new(1280, 720).unwrap(), 30)
            .with_description("Lumix S5 Video", "Panasonic");
        assert_eq!(fmt.min_stride(), 1280 * 4);
        assert_eq!(fmt.frame_duration(), Interval::from_fps(30));
        assert_eq!(fmt.vendor, "Panasonic");
    }
}
