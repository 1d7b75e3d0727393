//! Capture from a physical camera on a dedicated worker thread.
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
        mpsc,
    },
    thread::{self, JoinHandle},
};

use lumix_core::prelude::*;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    CameraDevice, CameraEvent, CameraProvider, CaptureError, EventSink, FrameCallback,
    select_preferred_mode,
};

/// Lifecycle of a [`PhysicalCaptureSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Start queued; the worker is opening the device.
    Starting,
    Running,
}

/// Tunables for a capture session.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Frame rate to pin on the device.
    pub frame_rate: u32,
    /// Smallest mode worth requesting.
    pub min_resolution: Resolution,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            min_resolution: Resolution::new(1920, 1080).unwrap_or(Resolution {
                width: std::num::NonZeroU32::MIN,
                height: std::num::NonZeroU32::MIN,
            }),
        }
    }
}

enum Command {
    Start { unique_id: String, epoch: u64 },
    Stop,
    Shutdown,
}

struct Shared {
    state: Mutex<SessionState>,
    /// Bumped on every start and stop; frames from older runs are discarded.
    epoch: AtomicU64,
    provider: Arc<dyn CameraProvider>,
    on_frame: FrameCallback,
    config: SessionConfig,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

/// Owns the connection to one physical camera at a time.
///
/// `start_capture` and `stop_capture` return immediately; the device is
/// opened and released on the session worker. Failures there are logged and
/// leave the session `Idle`. Frames are forwarded verbatim to the callback
/// given at construction.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use lumix_capture::prelude::*;
/// use lumix_capture::session::SessionConfig;
///
/// let provider = Arc::new(MemoryProvider::new());
/// let session = PhysicalCaptureSession::new(provider, Arc::new(|_frame: FrameBuffer| {}), SessionConfig::default());
/// session.start_capture("missing-camera");
/// session.stop_capture();
/// assert_eq!(session.state(), SessionState::Idle);
/// ```
pub struct PhysicalCaptureSession {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl PhysicalCaptureSession {
    pub fn new(
        provider: Arc<dyn CameraProvider>,
        on_frame: FrameCallback,
        config: SessionConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(SessionState::Idle),
            epoch: AtomicU64::new(0),
            provider,
            on_frame,
            config,
            forwarded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        let (commands, rx) = mpsc::channel();
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("lumix-capture".into())
            .spawn(move || run_worker(worker_shared, rx))
            .inspect_err(|err| error!(error = %err, "failed to spawn capture worker"))
            .ok();
        Self {
            shared,
            commands,
            worker,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    /// Frames handed to the callback so far.
    pub fn forwarded_frames(&self) -> u64 {
        self.shared.forwarded.load(Ordering::Relaxed)
    }

    /// Frames the device reported as dropped.
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Queue a start on `unique_id`. Ignored unless the session is `Idle`.
    pub fn start_capture(&self, unique_id: &str) {
        let mut state = self.shared.state.lock();
        if *state != SessionState::Idle {
            debug!(camera = %unique_id, state = ?*state, "capture already active, ignoring start");
            return;
        }
        let epoch = self.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let command = Command::Start {
            unique_id: unique_id.to_string(),
            epoch,
        };
        if self.commands.send(command).is_err() {
            error!(camera = %unique_id, "capture worker is gone");
            return;
        }
        *state = SessionState::Starting;
    }

    /// Stop forwarding frames now and release the device on the worker.
    ///
    /// Safe to call in any state.
    pub fn stop_capture(&self) {
        let mut state = self.shared.state.lock();
        if *state == SessionState::Idle {
            return;
        }
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        *state = SessionState::Idle;
        let _ = self.commands.send(Command::Stop);
        info!("capture stop requested");
    }
}

impl Drop for PhysicalCaptureSession {
    fn drop(&mut self) {
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(shared: Arc<Shared>, rx: mpsc::Receiver<Command>) {
    let mut device: Option<Box<dyn CameraDevice>> = None;
    while let Ok(command) = rx.recv() {
        match command {
            Command::Start { unique_id, epoch } => {
                release(&mut device);
                if shared.epoch.load(Ordering::Acquire) != epoch {
                    debug!(camera = %unique_id, "start superseded before it ran");
                    continue;
                }
                match open_and_start(&shared, &unique_id, epoch) {
                    Ok(mut opened) => {
                        let mut state = shared.state.lock();
                        if shared.epoch.load(Ordering::Acquire) == epoch {
                            *state = SessionState::Running;
                            info!(camera = %unique_id, name = %opened.info().name, "capture running");
                            device = Some(opened);
                        } else {
                            drop(state);
                            opened.stop();
                            debug!(camera = %unique_id, "capture stopped while starting");
                        }
                    }
                    Err(err) => {
                        error!(camera = %unique_id, code = err.code(), error = %err, "failed to start capture");
                        let mut state = shared.state.lock();
                        if shared.epoch.load(Ordering::Acquire) == epoch {
                            *state = SessionState::Idle;
                        }
                    }
                }
            }
            Command::Stop => {
                if release(&mut device) {
                    info!("capture stopped");
                }
            }
            Command::Shutdown => break,
        }
    }
    release(&mut device);
}

fn release(device: &mut Option<Box<dyn CameraDevice>>) -> bool {
    match device.take() {
        Some(mut d) => {
            d.stop();
            true
        }
        None => false,
    }
}

fn open_and_start(
    shared: &Arc<Shared>,
    unique_id: &str,
    epoch: u64,
) -> Result<Box<dyn CameraDevice>, CaptureError> {
    let mut device = shared.provider.open(unique_id)?;
    let config = shared.config;
    match select_preferred_mode(
        &device.modes(),
        config.min_resolution,
        FourCc::BGRA,
        config.frame_rate,
    ) {
        Some(mode) => {
            if let Err(err) = device.configure(&mode) {
                warn!(
                    camera = %unique_id,
                    code = err.code(),
                    error = %err,
                    "camera configuration failed, using device defaults"
                );
            } else {
                debug!(camera = %unique_id, resolution = %mode.resolution, code = %mode.code, "camera configured");
            }
        }
        None => warn!(
            camera = %unique_id,
            min = %config.min_resolution,
            "no suitable camera mode advertised, using device defaults"
        ),
    }

    let gate = shared.clone();
    let sink: EventSink = Arc::new(move |event: CameraEvent| match event {
        CameraEvent::Frame(frame) => {
            if gate.epoch.load(Ordering::Acquire) == epoch {
                gate.forwarded.fetch_add(1, Ordering::Relaxed);
                (gate.on_frame)(frame);
            }
        }
        CameraEvent::Dropped => {
            let n = gate.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped = n, "camera dropped a frame");
        }
    });
    if let Err(err) = device.start(sink) {
        device.stop();
        return Err(err);
    }
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CameraInfo, CameraMode, memory::MemoryProvider};
    use std::time::{Duration, Instant};

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn frame(pool: &PixelBufferPool) -> CameraEvent {
        CameraEvent::Frame(pool.acquire_buffer().unwrap())
    }

    struct Fixture {
        provider: Arc<MemoryProvider>,
        session: PhysicalCaptureSession,
        received: Arc<AtomicU64>,
        pool: PixelBufferPool,
    }

    fn fixture() -> Fixture {
        let provider = Arc::new(MemoryProvider::new());
        provider.attach(CameraInfo::new("s5", "LUMIX S5", "Panasonic", "DC-S5"));
        let received = Arc::new(AtomicU64::new(0));
        let counter = received.clone();
        let session = PhysicalCaptureSession::new(
            provider.clone(),
            Arc::new(move |_frame: FrameBuffer| {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
            SessionConfig::default(),
        );
        let pool = PixelBufferPool::create(Resolution::new(8, 8).unwrap(), FourCc::BGRA, 3).unwrap();
        Fixture {
            provider,
            session,
            received,
            pool,
        }
    }

    #[test]
    fn forwards_frames_while_running() {
        let f = fixture();
        f.session.start_capture("s5");
        assert!(wait_for(|| f.session.state() == SessionState::Running));
        assert!(f.provider.emit("s5", frame(&f.pool)));
        assert!(f.provider.emit("s5", CameraEvent::Dropped));
        assert_eq!(f.received.load(Ordering::Relaxed), 1);
        assert_eq!(f.session.dropped_frames(), 1);
        let mode = f.provider.configured_mode("s5").unwrap();
        assert_eq!(mode.fps, Some(30));
        assert_eq!(mode.resolution, Resolution::new(3840, 2160).unwrap());
    }

    #[test]
    fn stop_closes_gate_before_device_teardown() {
        let f = fixture();
        f.session.start_capture("s5");
        assert!(wait_for(|| f.session.state() == SessionState::Running));
        f.session.stop_capture();
        assert_eq!(f.session.state(), SessionState::Idle);
        f.provider.emit("s5", frame(&f.pool));
        assert_eq!(f.received.load(Ordering::Relaxed), 0);
        assert!(wait_for(|| !f.provider.is_running("s5")));
        f.session.stop_capture();
    }

    #[test]
    fn missing_camera_returns_to_idle() {
        let f = fixture();
        f.session.start_capture("gone");
        assert!(wait_for(|| f.session.state() == SessionState::Idle));
        assert_eq!(f.provider.open_count(), 0);
    }

    #[test]
    fn busy_camera_is_not_fatal() {
        let f = fixture();
        f.provider.set_busy("s5", true);
        f.session.start_capture("s5");
        assert!(wait_for(|| f.session.state() == SessionState::Idle));
        f.provider.set_busy("s5", false);
        f.session.start_capture("s5");
        assert!(wait_for(|| f.session.state() == SessionState::Running));
    }

    #[test]
    fn repeated_start_opens_once() {
        let f = fixture();
        f.session.start_capture("s5");
        f.session.start_capture("s5");
        assert!(wait_for(|| f.session.state() == SessionState::Running));
        f.session.start_capture("s5");
        thread::sleep(Duration::from_millis(20));
        assert_eq!(f.provider.open_count(), 1);
        assert_eq!(f.provider.running_count(), 1);
    }

    #[test]
    fn configuration_failure_still_captures() {
        let f = fixture();
        f.provider.reject_configuration(true);
        f.session.start_capture("s5");
        assert!(wait_for(|| f.session.state() == SessionState::Running));
        assert!(f.provider.configured_mode("s5").is_none());
        f.provider.emit("s5", frame(&f.pool));
        assert_eq!(f.received.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn compressed_modes_are_never_requested() {
        let f = fixture();
        let mjpg = FourCc::new(*b"MJPG");
        let hd = Resolution::new(1920, 1080).unwrap();
        f.provider.set_modes(
            "s5",
            vec![
                CameraMode::new(Resolution::new(1280, 720).unwrap(), FourCc::YUYV),
                CameraMode::new(hd, mjpg),
            ],
        );
        f.session.start_capture("s5");
        assert!(wait_for(|| f.session.state() == SessionState::Running));
        assert!(f.provider.configured_mode("s5").is_none());
        f.session.stop_capture();

        f.provider.set_modes(
            "s5",
            vec![CameraMode::new(hd, FourCc::YUYV), CameraMode::new(hd, mjpg)],
        );
        f.session.start_capture("s5");
        assert!(wait_for(|| f.session.state() == SessionState::Running));
        assert!(wait_for(|| f.provider.configured_mode("s5").is_some()));
        assert_eq!(f.provider.configured_mode("s5").unwrap().code, FourCc::YUYV);
    }

    #[test]
    fn restart_after_stop_reopens_device() {
        let f = fixture();
        f.session.start_capture("s5");
        assert!(wait_for(|| f.session.state() == SessionState::Running));
        f.session.stop_capture();
        f.session.start_capture("s5");
        assert!(wait_for(|| f.session.state() == SessionState::Running));
        assert!(wait_for(|| f.provider.open_count() == 2));
        assert_eq!(f.provider.running_count(), 1);
    }
}
