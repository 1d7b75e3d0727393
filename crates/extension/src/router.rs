//! Routes one frame source at a time to the stream sink.
//!
//! Producers (the capture session callback and the pattern ticker) push
//! frames into a bounded hand-off queue and never block. A single delivery
//! thread drains it in arrival order and is the only caller of
//! [`StreamSink::send`].
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use lumix_capture::{
    CameraProvider, FrameCallback,
    pattern::TestPatternGenerator,
    session::{PhysicalCaptureSession, SessionConfig},
};
use lumix_core::prelude::*;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::{config::ExtensionConfig, host::StreamSink, prefs::SharedSelection};

const DELIVERY_POLL: Duration = Duration::from_millis(100);

/// Which producer the router is draining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveSource {
    Camera(String),
    Pattern,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterState {
    Stopped,
    Streaming(ActiveSource),
}

/// Sizing for a [`FrameRouter`].
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// The one format the stream advertises; pattern frames are rendered at it.
    pub format: StreamFormat,
    pub pool_capacity: usize,
    pub queue_depth: usize,
    pub session: SessionConfig,
}

impl RouterConfig {
    pub fn new(format: StreamFormat) -> Self {
        let frame_rate = format.frame_duration().fps().round().max(1.0) as u32;
        Self {
            format,
            pool_capacity: MIN_POOL_CAPACITY,
            queue_depth: crate::config::DEFAULT_DELIVERY_QUEUE_DEPTH,
            session: SessionConfig {
                frame_rate,
                ..SessionConfig::default()
            },
        }
    }

    pub fn from_extension(config: &ExtensionConfig, format: StreamFormat) -> Self {
        Self {
            pool_capacity: config.pool_capacity,
            queue_depth: config.delivery_queue_depth,
            ..Self::new(format)
        }
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Frames accepted into the hand-off queue.
    pub received: u64,
    /// Frames refused because the queue was full.
    pub dropped: u64,
    /// Frames discarded because no sink was attached.
    pub unrouted: u64,
    pub send_failures: u64,
    /// Frames the sink accepted.
    pub sequence: u64,
    /// Presentation time of the first frame of the current streaming run.
    pub baseline_ns: Option<u64>,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    dropped: AtomicU64,
    unrouted: AtomicU64,
    send_failures: AtomicU64,
    sequence: AtomicU64,
}

struct Delivery {
    sink: RwLock<Option<Arc<dyn StreamSink>>>,
    duration: Interval,
    counters: Counters,
    baseline: Mutex<Option<u64>>,
}

impl Delivery {
    fn deliver(&self, frame: FrameBuffer) {
        let pts = frame.pts_ns;
        {
            let mut baseline = self.baseline.lock();
            if baseline.is_none() {
                *baseline = Some(pts);
                info!(pts_ns = pts, "first frame, timing baseline recorded");
            }
        }
        let Some(sink) = self.sink.read().clone() else {
            self.counters.unrouted.fetch_add(1, Ordering::Relaxed);
            trace!("no sink attached, frame discarded");
            return;
        };
        let timing = SampleTiming::new(self.duration, pts);
        match sink.send(frame, timing, HostClock::now_ns()) {
            Ok(()) => {
                let seq = self.counters.sequence.fetch_add(1, Ordering::AcqRel) + 1;
                trace!(seq, pts_ns = pts, "frame sent");
            }
            Err(err) => {
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                warn!(code = err.code(), error = %err, pts_ns = pts, "sink rejected frame, dropping");
            }
        }
    }
}

fn run_delivery(delivery: Arc<Delivery>, rx: BoundedRx<FrameBuffer>) {
    loop {
        match rx.recv_timeout(DELIVERY_POLL) {
            RecvOutcome::Data(frame) => delivery.deliver(frame),
            RecvOutcome::Empty => {}
            RecvOutcome::Closed => break,
        }
    }
    debug!("delivery thread exiting");
}

/// Bridges the selected frame source to the stream sink.
///
/// `start` and `stop` are idempotent and serialized by one lock, so the host's
/// stream callbacks and the control app's notifications can race freely.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use lumix_capture::prelude::MemoryProvider;
/// use lumix_core::prelude::*;
/// use lumix_extension::prefs::{MemoryStore, SharedSelection};
/// use lumix_extension::router::{ActiveSource, FrameRouter, RouterConfig, RouterState};
///
/// let format = StreamFormat::bgra(Resolution::new(64, 32).unwrap(), 30);
/// let router = FrameRouter::new(
///     RouterConfig::new(format),
///     SharedSelection::new(Arc::new(MemoryStore::new())),
///     Arc::new(MemoryProvider::new()),
/// )
/// .unwrap();
/// router.start();
/// assert_eq!(router.state(), RouterState::Streaming(ActiveSource::Pattern));
/// router.stop();
/// assert_eq!(router.state(), RouterState::Stopped);
/// ```
pub struct FrameRouter {
    state: Mutex<RouterState>,
    selection: SharedSelection,
    provider: Arc<dyn CameraProvider>,
    format: StreamFormat,
    pattern: TestPatternGenerator,
    session: PhysicalCaptureSession,
    on_frame: FrameCallback,
    tx: BoundedTx<FrameBuffer>,
    delivery: Arc<Delivery>,
    worker: Option<JoinHandle<()>>,
}

impl FrameRouter {
    pub fn new(
        config: RouterConfig,
        selection: SharedSelection,
        provider: Arc<dyn CameraProvider>,
    ) -> Result<Self, PoolError> {
        let format = config.format;
        let duration = format.frame_duration();
        let pool = PixelBufferPool::create(format.resolution, FourCc::BGRA, config.pool_capacity)?;
        let pattern = TestPatternGenerator::new(pool, duration);

        let (tx, rx) = bounded::<FrameBuffer>(config.queue_depth);
        let delivery = Arc::new(Delivery {
            sink: RwLock::new(None),
            duration,
            counters: Counters::default(),
            baseline: Mutex::new(None),
        });

        let producer_tx = tx.clone();
        let producer_delivery = delivery.clone();
        let on_frame: FrameCallback = Arc::new(move |frame: FrameBuffer| {
            match producer_tx.send(frame) {
                SendOutcome::Ok => {
                    producer_delivery.counters.received.fetch_add(1, Ordering::Relaxed);
                }
                SendOutcome::Full => {
                    producer_delivery.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("delivery queue full, late frame discarded");
                }
                SendOutcome::Closed => {}
            }
        });
        let session = PhysicalCaptureSession::new(provider.clone(), on_frame.clone(), config.session);

        let worker_delivery = delivery.clone();
        let worker = thread::Builder::new()
            .name("lumix-delivery".into())
            .spawn(move || run_delivery(worker_delivery, rx))
            .inspect_err(|err| error!(error = %err, "failed to spawn delivery thread"))
            .ok();

        Ok(Self {
            state: Mutex::new(RouterState::Stopped),
            selection,
            provider,
            format,
            pattern,
            session,
            on_frame,
            tx,
            delivery,
            worker,
        })
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    /// Per-frame duration stamped on every sample.
    pub fn frame_duration(&self) -> Interval {
        self.delivery.duration
    }

    pub fn state(&self) -> RouterState {
        self.state.lock().clone()
    }

    pub fn set_sink(&self, sink: Arc<dyn StreamSink>) {
        *self.delivery.sink.write() = Some(sink);
    }

    pub fn clear_sink(&self) {
        *self.delivery.sink.write() = None;
    }

    pub fn has_sink(&self) -> bool {
        self.delivery.sink.read().is_some()
    }

    /// Begin streaming from the camera in the persisted selection if it is
    /// attached, otherwise from the test pattern. No-op while streaming.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if let RouterState::Streaming(source) = &*state {
            debug!(?source, "already streaming, ignoring start");
            return;
        }
        let selection = self.selection.snapshot();
        let camera = match selection.camera_id {
            Some(id) if self.provider.contains(&id) => Some(id),
            Some(id) => {
                warn!(camera = %id, "selected camera is not attached, using test pattern");
                None
            }
            None => None,
        };
        *self.delivery.baseline.lock() = None;
        let source = match camera {
            Some(id) => {
                info!(camera = %id, "streaming from camera");
                self.session.start_capture(&id);
                ActiveSource::Camera(id)
            }
            None => {
                info!(resolution = %self.format.resolution, "streaming test pattern");
                self.pattern.start(self.on_frame.clone());
                ActiveSource::Pattern
            }
        };
        *state = RouterState::Streaming(source);
    }

    /// Stop whichever source is active. No-op while stopped.
    ///
    /// Once this returns the source produces nothing further; frames already
    /// queued may still be delivered.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, RouterState::Stopped) {
            RouterState::Stopped => debug!("already stopped, ignoring stop"),
            RouterState::Streaming(ActiveSource::Camera(id)) => {
                self.session.stop_capture();
                info!(camera = %id, "camera stream stopped");
            }
            RouterState::Streaming(ActiveSource::Pattern) => {
                self.pattern.stop();
                info!("test pattern stopped");
            }
        }
    }

    pub fn stats(&self) -> RouterStats {
        let c = &self.delivery.counters;
        RouterStats {
            received: c.received.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            unrouted: c.unrouted.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
            sequence: c.sequence.load(Ordering::Acquire),
            baseline_ns: *self.delivery.baseline.lock(),
        }
    }

    /// Frames the pattern generator skipped for lack of a buffer.
    pub fn skipped_pattern_ticks(&self) -> u64 {
        self.pattern.skipped_ticks()
    }
}

impl Drop for FrameRouter {
    fn drop(&mut self) {
        self.stop();
        self.tx.close();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            error!("delivery thread panicked");
        }
    }
}
