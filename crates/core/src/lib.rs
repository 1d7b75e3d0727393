#![doc = include_str!("../README.md")]

pub mod buffer;
pub mod clock;
pub mod error;
pub mod format;
pub mod metrics;
pub mod queue;

pub use error::PoolError;

pub mod prelude {
    pub use crate::{
        buffer::{FrameBuffer, MIN_POOL_CAPACITY, PixelBufferPool, PixelView},
        clock::{HostClock, SampleTiming},
        error::PoolError,
        format::{FourCc, Interval, Resolution, StreamFormat},
        metrics::{Metrics, PoolStats},
        queue::{BoundedRx, BoundedTx, RecvOutcome, SendOutcome, bounded},
    };
}
