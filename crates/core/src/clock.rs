use std::{sync::OnceLock, time::Instant};

use crate::format::Interval;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Process-relative monotonic clock shared by every frame producer.
///
/// Nanoseconds count from the first call in the process, so the first
/// timestamp a fresh process observes is close to zero.
///
/// # Example
/// ```rust
/// use lumix_core::prelude::HostClock;
///
/// let a = HostClock::now_ns();
/// let b = HostClock::now_ns();
/// assert!(b >= a);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct HostClock;

impl HostClock {
    /// Anchor the epoch now if nothing has read the clock yet.
    pub fn init() {
        let _ = EPOCH.get_or_init(Instant::now);
    }

    pub fn now_ns() -> u64 {
        let epoch = *EPOCH.get_or_init(Instant::now);
        Self::ns_since_epoch(Instant::now().saturating_duration_since(epoch))
    }

    /// Host time for an `Instant`; instants before the epoch map to zero.
    pub fn at(instant: Instant) -> u64 {
        let epoch = *EPOCH.get_or_init(Instant::now);
        Self::ns_since_epoch(instant.saturating_duration_since(epoch))
    }

    fn ns_since_epoch(elapsed: std::time::Duration) -> u64 {
        u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Timing attached to every sample handed to the stream sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTiming {
    /// Fixed per-frame duration from the configured frame rate.
    pub duration: Interval,
    /// The frame's own presentation timestamp (host clock ns).
    pub presentation_ns: u64,
    /// Always `None`; frames are never reordered so no decode time is carried.
    pub decode_ns: Option<u64>,
}

impl SampleTiming {
    pub fn new(duration: Interval, presentation_ns: u64) -> Self {
        Self {
            duration,
            presentation_ns,
            decode_ns: None,
        }
    }
}
