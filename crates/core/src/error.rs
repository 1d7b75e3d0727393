use crate::format::{FourCc, Resolution};

/// Errors creating a pixel buffer pool.
///
/// Acquiring from an existing pool never errors; exhaustion is reported as
/// `None` so the producer can skip the frame.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("allocator could not provide a {len}-byte pixel buffer")]
    AllocationFailed { len: usize },
    #[error("stride {stride} too small for {resolution} ({row_bytes} bytes per row)")]
    InvalidGeometry {
        resolution: Resolution,
        stride: usize,
        row_bytes: usize,
    },
    #[error("pixel layout {0} is not a packed single-plane format")]
    UnsupportedFormat(FourCc),
}

impl PoolError {
    /// Stable string code for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            PoolError::AllocationFailed { .. } => "allocation_failed",
            PoolError::InvalidGeometry { .. } => "invalid_geometry",
            PoolError::UnsupportedFormat(_) => "unsupported_format",
        }
    }
}
