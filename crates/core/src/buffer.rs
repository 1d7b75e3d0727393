use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tracing::warn;

use crate::{
    error::PoolError,
    format::{FourCc, Interval, Resolution},
    metrics::{Metrics, PoolStats},
};

/// Smallest pool the pipeline runs with; one buffer in each of produce, hand-off and send.
pub const MIN_POOL_CAPACITY: usize = 3;

const ROW_ALIGN: usize = 64;

/// Borrowed view of a packed single-plane image owned elsewhere.
///
/// Physical camera frames arrive as views over driver memory and are copied
/// into a pooled [`FrameBuffer`] with [`PixelBufferPool::copy_buffer`].
#[derive(Debug, Clone, Copy)]
pub struct PixelView<'a> {
    pub data: &'a [u8],
    pub width: usize,
    pub height: usize,
    /// Bytes per row, including any padding.
    pub stride: usize,
}

impl<'a> PixelView<'a> {
    pub fn new(data: &'a [u8], width: usize, height: usize, stride: usize) -> Self {
        Self {
            data,
            width,
            height,
            stride,
        }
    }

    /// Bytes of row `y`, clipped to the backing slice.
    pub fn row(&self, y: usize) -> &'a [u8] {
        let start = y.saturating_mul(self.stride).min(self.data.len());
        let end = start.saturating_add(self.stride).min(self.data.len());
        &self.data[start..end]
    }
}

/// Image buffer leased from a [`PixelBufferPool`], plus its timing.
///
/// Dropping the frame returns its memory to the pool. Ownership moves along
/// the pipeline with the frame, so the buffer is recycled once the sink has
/// consumed it.
///
/// # Example
/// ```rust
/// use lumix_core::prelude::*;
///
/// let pool = PixelBufferPool::create(Resolution::new(16, 4).unwrap(), FourCc::BGRA, 3).unwrap();
/// let mut frame = pool.acquire_buffer().unwrap();
/// frame.row_mut(0)[..4].copy_from_slice(&[0, 0, 255, 255]);
/// assert_eq!(frame.width(), 16);
/// assert_eq!(pool.outstanding(), 1);
/// drop(frame);
/// assert_eq!(pool.outstanding(), 0);
/// ```
pub struct FrameBuffer {
    pool: Arc<PoolInner>,
    data: Option<Vec<u8>>,
    /// Presentation timestamp on the host clock, in nanoseconds.
    pub pts_ns: u64,
    /// Display duration, when the producer knows it.
    pub duration: Option<Interval>,
}

impl FrameBuffer {
    pub fn width(&self) -> usize {
        self.pool.width
    }

    pub fn height(&self) -> usize {
        self.pool.height
    }

    pub fn stride(&self) -> usize {
        self.pool.stride
    }

    pub fn code(&self) -> FourCc {
        self.pool.code
    }

    pub fn resolution(&self) -> Resolution {
        self.pool.resolution
    }

    /// Whole buffer, `stride * height` bytes.
    pub fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }

    /// Row `y` including padding; empty when out of range.
    pub fn row(&self, y: usize) -> &[u8] {
        let stride = self.pool.stride;
        self.data()
            .get(y * stride..(y + 1) * stride)
            .unwrap_or(&[])
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let stride = self.pool.stride;
        self.data_mut()
            .get_mut(y * stride..(y + 1) * stride)
            .unwrap_or(&mut [])
    }

    /// Pixel bytes of row `y` without trailing padding.
    pub fn pixels(&self, y: usize) -> &[u8] {
        let row = self.row(y);
        &row[..self.pool.row_bytes.min(row.len())]
    }

    /// Borrow as a [`PixelView`], e.g. to hand to a sink that copies.
    pub fn view(&self) -> PixelView<'_> {
        PixelView::new(self.data(), self.width(), self.height(), self.stride())
    }

    /// Attach presentation time and duration.
    pub fn with_timing(mut self, pts_ns: u64, duration: Interval) -> Self {
        self.pts_ns = pts_ns;
        self.duration = Some(duration);
        self
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("resolution", &self.pool.resolution)
            .field("code", &self.pool.code)
            .field("stride", &self.pool.stride)
            .field("pts_ns", &self.pts_ns)
            .finish()
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.data.take() {
            self.pool.recycle(buf);
        }
    }
}

/// Bounded pool of fixed-format image buffers.
///
/// At most `capacity` buffers are leased at once; further acquires return
/// `None` instead of waiting, and the caller skips that frame.
///
/// # Example
/// ```rust
/// use lumix_core::prelude::*;
///
/// let pool = PixelBufferPool::create(Resolution::new(8, 8).unwrap(), FourCc::BGRA, 1).unwrap();
/// assert_eq!(pool.capacity(), 3);
/// let held: Vec<_> = (0..3).filter_map(|_| pool.acquire_buffer()).collect();
/// assert_eq!(held.len(), 3);
/// assert!(pool.acquire_buffer().is_none());
/// ```
#[derive(Clone)]
pub struct PixelBufferPool {
    inner: Arc<PoolInner>,
}

impl PixelBufferPool {
    /// Create a pool for `resolution`/`code` with rows padded to 64 bytes.
    ///
    /// `capacity` is raised to [`MIN_POOL_CAPACITY`]. All buffers are
    /// allocated up front so an allocator that cannot satisfy the format
    /// fails here rather than mid-stream.
    pub fn create(resolution: Resolution, code: FourCc, capacity: usize) -> Result<Self, PoolError> {
        let bpp = code
            .bytes_per_pixel()
            .ok_or(PoolError::UnsupportedFormat(code))?;
        let row_bytes = resolution.width_px() * bpp;
        let stride = row_bytes.div_ceil(ROW_ALIGN) * ROW_ALIGN;
        Self::with_stride(resolution, code, stride, capacity)
    }

    /// Create a pool with an explicit row stride.
    pub fn with_stride(
        resolution: Resolution,
        code: FourCc,
        stride: usize,
        capacity: usize,
    ) -> Result<Self, PoolError> {
        let bpp = code
            .bytes_per_pixel()
            .ok_or(PoolError::UnsupportedFormat(code))?;
        let row_bytes = resolution.width_px() * bpp;
        if stride < row_bytes {
            return Err(PoolError::InvalidGeometry {
                resolution,
                stride,
                row_bytes,
            });
        }
        let len = stride
            .checked_mul(resolution.height_px())
            .ok_or(PoolError::AllocationFailed { len: usize::MAX })?;
        let capacity = capacity.max(MIN_POOL_CAPACITY);
        let metrics = Metrics::default();
        let mut free = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            free.push(allocate(len).ok_or(PoolError::AllocationFailed { len })?);
            metrics.alloc();
        }
        Ok(Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                outstanding: AtomicUsize::new(0),
                capacity,
                resolution,
                width: resolution.width_px(),
                height: resolution.height_px(),
                stride,
                row_bytes,
                len,
                code,
                metrics,
            }),
        })
    }

    /// Lease a buffer ready for writing, or `None` when the pool is exhausted.
    ///
    /// Contents are whatever the previous user left; writers cover every row.
    pub fn acquire_buffer(&self) -> Option<FrameBuffer> {
        let inner = &self.inner;
        if inner
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < inner.capacity).then_some(n + 1)
            })
            .is_err()
        {
            inner.metrics.exhausted();
            return None;
        }
        let recycled = inner.free.lock().pop();
        let buf = match recycled {
            Some(buf) => {
                inner.metrics.hit();
                buf
            }
            None => {
                inner.metrics.miss();
                match allocate(inner.len) {
                    Some(buf) => {
                        inner.metrics.alloc();
                        buf
                    }
                    None => {
                        warn!(len = inner.len, "pixel buffer allocation failed");
                        inner.outstanding.fetch_sub(1, Ordering::AcqRel);
                        inner.metrics.exhausted();
                        return None;
                    }
                }
            }
        };
        Some(FrameBuffer {
            pool: inner.clone(),
            data: Some(buf),
            pts_ns: 0,
            duration: None,
        })
    }

    /// Copy `source` into a freshly leased buffer, row by row.
    ///
    /// Each destination row receives `min(source.stride, dst.stride)` bytes,
    /// and at most `min(source.height, dst.height)` rows are copied. Reads
    /// never go past the end of `source.data`.
    pub fn copy_buffer(&self, source: &PixelView<'_>) -> Option<FrameBuffer> {
        let mut dst = self.acquire_buffer()?;
        let dst_stride = dst.stride();
        let rows = source.height.min(dst.height());
        if source.stride == dst_stride && source.data.len() >= dst_stride * rows {
            let n = dst_stride * rows;
            dst.data_mut()[..n].copy_from_slice(&source.data[..n]);
        } else {
            let per_row = source.stride.min(dst_stride);
            for y in 0..rows {
                let src_row = source.row(y);
                let n = per_row.min(src_row.len());
                dst.row_mut(y)[..n].copy_from_slice(&src_row[..n]);
            }
        }
        Some(dst)
    }

    pub fn resolution(&self) -> Resolution {
        self.inner.resolution
    }

    pub fn code(&self) -> FourCc {
        self.inner.code
    }

    pub fn stride(&self) -> usize {
        self.inner.stride
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Buffers currently leased out.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.metrics.snapshot()
    }
}

impl std::fmt::Debug for PixelBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBufferPool")
            .field("resolution", &self.inner.resolution)
            .field("code", &self.inner.code)
            .field("capacity", &self.inner.capacity)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    outstanding: AtomicUsize,
    capacity: usize,
    resolution: Resolution,
    width: usize,
    height: usize,
    stride: usize,
    row_bytes: usize,
    len: usize,
    code: FourCc,
    metrics: Metrics,
}

impl PoolInner {
    fn recycle(&self, buf: Vec<u8>) {
        {
            let mut free = self.free.lock();
            if free.len() < self.capacity {
                free.push(buf);
            }
        }
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

fn allocate(len: usize) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).ok()?;
    buf.resize(len, 0);
    Some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res(w: u32, h: u32) -> Resolution {
        Resolution::new(w, h).unwrap()
    }

    #[test]
    fn stride_is_row_aligned() {
        let pool = PixelBufferPool::create(res(1281, 2), FourCc::BGRA, 3).unwrap();
        assert_eq!(pool.stride() % ROW_ALIGN, 0);
        assert!(pool.stride() >= 1281 * 4);
    }

    #[test]
    fn rejects_unknown_layout_and_short_stride() {
        assert!(matches!(
            PixelBufferPool::create(res(4, 4), FourCc::new(*b"NV12"), 3),
            Err(PoolError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            PixelBufferPool::with_stride(res(4, 4), FourCc::BGRA, 8, 3),
            Err(PoolError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn exhaustion_returns_none_and_recovers() {
        let pool = PixelBufferPool::create(res(4, 4), FourCc::BGRA, 3).unwrap();
        let a = pool.acquire_buffer().unwrap();
        let _b = pool.acquire_buffer().unwrap();
        let _c = pool.acquire_buffer().unwrap();
        assert!(pool.acquire_buffer().is_none());
        assert_eq!(pool.stats().exhausted, 1);
        drop(a);
        assert!(pool.acquire_buffer().is_some());
        let stats = pool.stats();
        assert_eq!(stats.allocations, 3);
        assert_eq!(stats.hits, 4);
    }

    #[test]
    fn copy_with_narrower_destination_stops_at_destination_stride() {
        let (w, h) = (4usize, 3usize);
        let src_stride = 32;
        let dst_stride = 16;
        let mut src = vec![0u8; src_stride * h];
        for y in 0..h {
            let row = &mut src[y * src_stride..(y + 1) * src_stride];
            row[..dst_stride].fill(y as u8 + 1);
            row[dst_stride..].fill(0xEE);
        }
        let pool =
            PixelBufferPool::with_stride(res(w as u32, h as u32), FourCc::BGRA, dst_stride, 3)
                .unwrap();
        let frame = pool
            .copy_buffer(&PixelView::new(&src, w, h, src_stride))
            .unwrap();
        assert_eq!(frame.data().len(), dst_stride * h);
        for y in 0..h {
            assert!(frame.row(y).iter().all(|&b| b == y as u8 + 1));
        }
        assert!(!frame.data().contains(&0xEE));
    }

    #[test]
    fn copy_with_wider_destination_leaves_padding() {
        let src = vec![7u8; 16 * 2];
        let pool = PixelBufferPool::with_stride(res(4, 2), FourCc::BGRA, 24, 3).unwrap();
        let mut scratch = pool.acquire_buffer().unwrap();
        scratch.data_mut().fill(0);
        drop(scratch);
        let frame = pool.copy_buffer(&PixelView::new(&src, 4, 2, 16)).unwrap();
        assert_eq!(frame.pixels(1), &[7u8; 16][..]);
        assert_eq!(&frame.row(1)[16..], &[0u8; 8][..]);
    }

    #[test]
    fn copy_tolerates_truncated_source() {
        let src = vec![1u8; 16 + 8];
        let pool = PixelBufferPool::with_stride(res(4, 2), FourCc::BGRA, 16, 3).unwrap();
        let frame = pool.copy_buffer(&PixelView::new(&src, 4, 2, 16)).unwrap();
        assert_eq!(&frame.row(1)[..8], &[1u8; 8][..]);
    }
}
