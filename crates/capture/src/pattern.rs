//! Synthetic placeholder source used while no physical camera is selected.
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
        mpsc::{self, RecvTimeoutError},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use lumix_core::prelude::*;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::FrameCallback;

/// Bar colours left to right, as BGRA.
pub const BAR_COLORS: [[u8; 4]; 8] = [
    [255, 255, 255, 255], // white
    [0, 255, 255, 255],   // yellow
    [255, 255, 0, 255],   // cyan
    [0, 255, 0, 255],     // green
    [255, 0, 255, 255],   // magenta
    [0, 0, 255, 255],     // red
    [255, 0, 0, 255],     // blue
    [0, 0, 0, 255],       // black
];

/// Number of ticks after which the bar animation repeats.
pub const ANIMATION_PERIOD: u64 = 60;

/// Size of the centred "no camera" badge.
pub const OVERLAY_SIZE: (usize, usize) = (200, 40);

/// Translucent black, BGRA.
pub const OVERLAY_COLOR: [u8; 4] = [0, 0, 0, 200];

/// Paints test-pattern frames into buffers from a pool.
///
/// Rendering is deterministic in the animation phase: two renderers that
/// have produced the same number of frames produce identical pixels.
///
/// # Example
/// ```rust
/// use lumix_capture::prelude::*;
///
/// let res = Resolution::new(64, 48).unwrap();
/// let pool = PixelBufferPool::create(res, FourCc::BGRA, 3).unwrap();
/// let mut renderer = PatternRenderer::new(pool);
/// let frame = renderer.render(0, Interval::from_fps(30)).unwrap();
/// assert_eq!(&frame.row(0)[..4], &[255, 255, 255, 255]);
/// assert_eq!(renderer.phase(), 1);
/// ```
pub struct PatternRenderer {
    pool: PixelBufferPool,
    phase: u64,
    row: Vec<u8>,
}

impl PatternRenderer {
    pub fn new(pool: PixelBufferPool) -> Self {
        Self {
            pool,
            phase: 0,
            row: Vec::new(),
        }
    }

    /// Animation phase of the next frame, in `0..ANIMATION_PERIOD`.
    pub fn phase(&self) -> u64 {
        self.phase
    }

    pub fn pool(&self) -> &PixelBufferPool {
        &self.pool
    }

    /// Render the next frame, or `None` if no buffer was available.
    ///
    /// The phase only advances when a frame is produced.
    pub fn render(&mut self, pts_ns: u64, duration: Interval) -> Option<FrameBuffer> {
        let mut frame = self.pool.acquire_buffer()?;
        self.paint_bars(&mut frame);
        stamp_overlay(&mut frame);
        self.phase = (self.phase + 1) % ANIMATION_PERIOD;
        Some(frame.with_timing(pts_ns, duration))
    }

    /// Render the frame for timer tick `index` of a run that began at `base_ns`.
    pub fn render_tick(
        &mut self,
        base_ns: u64,
        index: u64,
        interval: Interval,
    ) -> Option<FrameBuffer> {
        let pts = base_ns.saturating_add(index.saturating_mul(interval.as_nanos()));
        self.render(pts, interval)
    }

    fn paint_bars(&mut self, frame: &mut FrameBuffer) {
        let width = frame.width();
        let bar_width = (width / BAR_COLORS.len()).max(1);
        let offset = self.phase as usize;
        self.row.clear();
        self.row.extend(
            (0..width).flat_map(|x| BAR_COLORS[((x + offset) / bar_width) % BAR_COLORS.len()]),
        );
        for y in 0..frame.height() {
            let row = frame.row_mut(y);
            let n = self.row.len().min(row.len());
            row[..n].copy_from_slice(&self.row[..n]);
        }
    }
}

fn stamp_overlay(frame: &mut FrameBuffer) {
    let (width, height) = (frame.width(), frame.height());
    let ow = OVERLAY_SIZE.0.min(width);
    let oh = OVERLAY_SIZE.1.min(height);
    let x0 = (width - ow) / 2;
    let y0 = (height - oh) / 2;
    for y in y0..y0 + oh {
        let row = frame.row_mut(y);
        for px in row[x0 * 4..(x0 + ow) * 4].chunks_exact_mut(4) {
            px.copy_from_slice(&OVERLAY_COLOR);
        }
    }
}

enum GeneratorState {
    Idle,
    Running(Ticker),
}

struct Ticker {
    stop_tx: mpsc::Sender<()>,
    worker: JoinHandle<()>,
}

/// Produces test-pattern frames on a fixed clock.
///
/// Each run starts at phase 0 and stamps frame `n` with
/// `start + n * interval` on the [`HostClock`].
///
/// # Example
/// ```rust
/// use std::sync::{Arc, mpsc};
/// use std::time::Duration;
/// use lumix_capture::prelude::*;
///
/// let res = Resolution::new(32, 16).unwrap();
/// let pool = PixelBufferPool::create(res, FourCc::BGRA, 3).unwrap();
/// let generator = TestPatternGenerator::new(pool, Interval::from_fps(100));
/// let (tx, rx) = mpsc::sync_channel(8);
/// generator.start(Arc::new(move |frame: FrameBuffer| {
///     let _ = tx.try_send(frame.pts_ns);
/// }));
/// assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
/// generator.stop();
/// assert!(!generator.is_running());
/// ```
pub struct TestPatternGenerator {
    pool: PixelBufferPool,
    interval: Interval,
    state: Mutex<GeneratorState>,
    skipped: Arc<AtomicU64>,
}

impl TestPatternGenerator {
    pub fn new(pool: PixelBufferPool, interval: Interval) -> Self {
        Self {
            pool,
            interval,
            state: Mutex::new(GeneratorState::Idle),
            skipped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), GeneratorState::Running(_))
    }

    /// Ticks skipped because the pool had no buffer.
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Begin emitting frames to `on_frame`. No-op while already running.
    pub fn start(&self, on_frame: FrameCallback) {
        let mut state = self.state.lock();
        if matches!(*state, GeneratorState::Running(_)) {
            debug!("test pattern already running");
            return;
        }
        let (stop_tx, stop_rx) = mpsc::channel();
        let renderer = PatternRenderer::new(self.pool.clone());
        let interval = self.interval;
        let skipped = self.skipped.clone();
        let spawned = thread::Builder::new()
            .name("lumix-pattern".into())
            .spawn(move || run_ticker(renderer, interval, stop_rx, on_frame, skipped));
        match spawned {
            Ok(worker) => {
                info!(
                    resolution = %self.pool.resolution(),
                    fps = interval.fps(),
                    "test pattern started"
                );
                *state = GeneratorState::Running(Ticker { stop_tx, worker });
            }
            Err(err) => warn!(error = %err, "failed to spawn test pattern timer"),
        }
    }

    /// Cancel the timer. No frame is emitted after this returns; repeated calls are no-ops.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), GeneratorState::Idle);
        let GeneratorState::Running(ticker) = previous else {
            return;
        };
        let _ = ticker.stop_tx.send(());
        let on_worker = ticker.worker.thread().id() == thread::current().id();
        if !on_worker && ticker.worker.join().is_err() {
            warn!("test pattern timer panicked");
        }
        info!("test pattern stopped");
    }
}

impl Drop for TestPatternGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_ticker(
    mut renderer: PatternRenderer,
    interval: Interval,
    stop_rx: mpsc::Receiver<()>,
    on_frame: FrameCallback,
    skipped: Arc<AtomicU64>,
) {
    let start = Instant::now();
    let base_ns = HostClock::at(start);
    let period = interval.as_nanos();
    let mut index: u64 = 0;
    loop {
        let deadline = start + Duration::from_nanos(index.saturating_mul(period));
        let wait = deadline.saturating_duration_since(Instant::now());
        match stop_rx.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        match renderer.render_tick(base_ns, index, interval) {
            Some(frame) => on_frame(frame),
            None => {
                skipped.fetch_add(1, Ordering::Relaxed);
                debug!(tick = index, "no pixel buffer available, skipping tick");
            }
        }
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;

    fn pool(w: u32, h: u32) -> PixelBufferPool {
        PixelBufferPool::create(Resolution::new(w, h).unwrap(), FourCc::BGRA, 3).unwrap()
    }

    fn bar_at(frame: &FrameBuffer, y: usize, x: usize) -> [u8; 4] {
        let px = &frame.row(y)[x * 4..x * 4 + 4];
        [px[0], px[1], px[2], px[3]]
    }

    #[test]
    fn first_frame_has_eight_equal_bars_and_centred_overlay() {
        let mut renderer = PatternRenderer::new(pool(1280, 720));
        let frame = renderer.render(0, Interval::from_fps(30)).unwrap();
        let bar_width = 1280 / 8;
        for (i, color) in BAR_COLORS.iter().enumerate() {
            for x in [i * bar_width, (i + 1) * bar_width - 1] {
                assert_eq!(&bar_at(&frame, 0, x), color, "bar {i} at x={x}");
            }
        }
        assert_eq!(bar_at(&frame, 360, 640), OVERLAY_COLOR);
        assert_eq!(bar_at(&frame, 340, 540), OVERLAY_COLOR);
        assert_eq!(bar_at(&frame, 339, 540), BAR_COLORS[3]);
        assert_eq!(bar_at(&frame, 340, 539), BAR_COLORS[3]);
    }

    #[test]
    fn bars_shift_with_phase_and_wrap() {
        let mut renderer = PatternRenderer::new(pool(80, 100));
        let first = renderer.render(0, Interval::from_fps(30)).unwrap();
        let first_row = first.pixels(0).to_vec();
        drop(first);
        let second = renderer.render(1, Interval::from_fps(30)).unwrap();
        // bar_width = 10: at phase 1 column 9 already shows the second bar.
        assert_eq!(bar_at(&second, 0, 9), BAR_COLORS[1]);
        drop(second);
        for n in 2..ANIMATION_PERIOD {
            drop(renderer.render(n, Interval::from_fps(30)).unwrap());
        }
        assert_eq!(renderer.phase(), 0);
        let wrapped = renderer.render(99, Interval::from_fps(30)).unwrap();
        assert_eq!(wrapped.pixels(0), &first_row[..]);
    }

    #[test]
    fn tiny_frames_clip_overlay() {
        let mut renderer = PatternRenderer::new(pool(8, 2));
        let frame = renderer.render(0, Interval::from_fps(30)).unwrap();
        assert!(frame.pixels(0).chunks_exact(4).all(|px| px == OVERLAY_COLOR));
    }

    #[test]
    fn failed_allocations_skip_frames_without_advancing_phase() {
        let interval = Interval::from_fps(30);
        let mut renderer = PatternRenderer::new(pool(16, 8));
        let mut held = Vec::new();
        let mut emitted = Vec::new();
        let (ticks, failures) = (10u64, 4u64);
        for index in 0..ticks {
            if index == 3 {
                // Hold every buffer for `failures` ticks.
                while let Some(f) = renderer.pool().acquire_buffer() {
                    held.push(f);
                }
            }
            if index == 3 + failures {
                held.clear();
            }
            if let Some(frame) = renderer.render_tick(1_000, index, interval) {
                emitted.push((index, frame.pts_ns));
            }
        }
        assert_eq!(emitted.len() as u64, ticks - failures);
        for (index, pts) in &emitted {
            assert_eq!(*pts, 1_000 + index * interval.as_nanos());
        }
        assert_eq!(renderer.phase(), ticks - failures);
    }

    #[test]
    fn restart_resets_phase_and_stop_is_final() {
        let generator = TestPatternGenerator::new(pool(64, 64), Interval::from_fps(200));
        let capture = |generator: &TestPatternGenerator| {
            let (tx, rx) = sync_channel::<Vec<u8>>(64);
            generator.start(Arc::new(move |frame: FrameBuffer| {
                let _ = tx.try_send(frame.pixels(0).to_vec());
            }));
            let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            generator.stop();
            while rx.try_recv().is_ok() {}
            thread::sleep(Duration::from_millis(30));
            assert!(rx.try_recv().is_err(), "frame delivered after stop");
            (first, second)
        };
        let (a0, a1) = capture(&generator);
        assert_ne!(a0, a1);
        let (b0, _) = capture(&generator);
        assert_eq!(a0, b0);
        generator.stop();
        generator.stop();
        assert!(!generator.is_running());
    }

    #[test]
    fn start_while_running_is_ignored() {
        let generator = TestPatternGenerator::new(pool(16, 4), Interval::from_fps(100));
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let callback: FrameCallback = Arc::new(move |_: FrameBuffer| {
            c.fetch_add(1, Ordering::Relaxed);
        });
        generator.start(callback.clone());
        generator.start(callback);
        thread::sleep(Duration::from_millis(105));
        generator.stop();
        // A second timer would roughly double the count.
        let n = count.load(Ordering::Relaxed);
        assert!((1..=15).contains(&n), "unexpected frame count {n}");
    }
}
