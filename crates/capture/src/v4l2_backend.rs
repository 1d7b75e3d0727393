//! V4L2 camera provider.
use std::{
    io,
    path::{Path, PathBuf},
    sync::mpsc,
    thread::{self, JoinHandle},
    time::Duration,
};

use lumix_core::prelude::*;
use tracing::{debug, warn};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::{
    FourCC, buffer::Type, capability::Flags, framesize::FrameSizeEnum, prelude::*,
    video::Capture,
};

use crate::{CameraDevice, CameraEvent, CameraInfo, CameraMode, CameraProvider, CaptureError, EventSink, convert};

const STREAM_BUFFERS: u32 = 4;
const POOL_CAPACITY: usize = 4;

fn read_sysfs(path: &Path, leaf: &str) -> Option<String> {
    let node = path.file_name()?.to_string_lossy();
    std::fs::read_to_string(format!("/sys/class/video4linux/{node}/{leaf}"))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn to_fourcc(code: FourCc) -> FourCC {
    match &code.bytes() {
        // V4L2 spells byte-order B,G,R,A as ABGR32.
        b"BGRA" => FourCC::new(b"AR24"),
        bytes => FourCC::new(bytes),
    }
}

fn from_fourcc(fourcc: FourCC) -> FourCc {
    match &fourcc.repr {
        b"AR24" | b"BGR4" | b"XR24" => FourCc::BGRA,
        bytes => FourCc::new(*bytes),
    }
}

fn map_io(unique_id: &str, err: io::Error) -> CaptureError {
    match err.kind() {
        io::ErrorKind::NotFound => CaptureError::DeviceNotFound(unique_id.to_string()),
        io::ErrorKind::ResourceBusy => CaptureError::DeviceBusy(unique_id.to_string()),
        _ => CaptureError::Backend(format!("{unique_id}: {err}")),
    }
}

/// Enumerates `/dev/video*` capture nodes.
///
/// The unique id is the USB bus path when the driver reports one, so it
/// survives renumbering of device nodes across reboots.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2Provider {
    /// Frame rate stamped on frame durations and pinned when no mode fps is given.
    pub frame_rate: u32,
}

impl V4l2Provider {
    pub fn new(frame_rate: u32) -> Self {
        Self { frame_rate }
    }

    fn probe(&self) -> Vec<(CameraInfo, PathBuf)> {
        let mut found = Vec::new();
        for node in v4l::context::enum_devices() {
            let path = node.path().to_path_buf();
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                continue;
            }
            // v4l2loopback nodes are outputs we may be feeding ourselves.
            if caps.driver.to_ascii_lowercase().contains("loopback") {
                continue;
            }
            let unique_id = if caps.bus.is_empty() {
                path.display().to_string()
            } else {
                caps.bus.clone()
            };
            if found.iter().any(|(info, _): &(CameraInfo, PathBuf)| info.unique_id == unique_id) {
                continue;
            }
            let manufacturer = read_sysfs(&path, "device/../manufacturer").unwrap_or(caps.driver);
            let model_id = read_sysfs(&path, "device/../product")
                .or_else(|| read_sysfs(&path, "name"))
                .unwrap_or_else(|| caps.card.clone());
            found.push((
                CameraInfo::new(unique_id, caps.card, manufacturer, model_id),
                path,
            ));
        }
        found
    }
}

impl CameraProvider for V4l2Provider {
    fn devices(&self) -> Vec<CameraInfo> {
        self.probe().into_iter().map(|(info, _)| info).collect()
    }

    fn open(&self, unique_id: &str) -> Result<Box<dyn CameraDevice>, CaptureError> {
        let (info, path) = self
            .probe()
            .into_iter()
            .find(|(info, _)| info.unique_id == unique_id)
            .ok_or_else(|| CaptureError::DeviceNotFound(unique_id.to_string()))?;
        let device = Device::with_path(&path).map_err(|e| map_io(unique_id, e))?;
        Ok(Box::new(V4l2Camera {
            info,
            path,
            device,
            frame_rate: self.frame_rate.max(1),
            worker: None,
        }))
    }
}

/// An opened V4L2 capture node.
pub struct V4l2Camera {
    info: CameraInfo,
    path: PathBuf,
    device: Device,
    frame_rate: u32,
    worker: Option<(mpsc::Sender<()>, JoinHandle<()>)>,
}

impl CameraDevice for V4l2Camera {
    fn info(&self) -> &CameraInfo {
        &self.info
    }

    fn modes(&self) -> Vec<CameraMode> {
        let mut modes = Vec::new();
        for desc in self.device.enum_formats().unwrap_or_default() {
            let code = from_fourcc(desc.fourcc);
            let Ok(sizes) = self.device.enum_framesizes(desc.fourcc) else {
                continue;
            };
            for size in sizes {
                let res = match size.size {
                    FrameSizeEnum::Discrete(d) => Resolution::new(d.width, d.height),
                    FrameSizeEnum::Stepwise(s) => Resolution::new(s.max_width, s.max_height),
                };
                if let Some(res) = res {
                    modes.push(CameraMode::new(res, code));
                }
            }
        }
        modes
    }

    fn configure(&mut self, mode: &CameraMode) -> Result<(), CaptureError> {
        let id = &self.info.unique_id;
        let mut fmt = self.device.format().map_err(|e| map_io(id, e))?;
        fmt.width = mode.resolution.width.get();
        fmt.height = mode.resolution.height.get();
        fmt.fourcc = to_fourcc(mode.code);
        let applied = self
            .device
            .set_format(&fmt)
            .map_err(|e| CaptureError::Configuration(e.to_string()))?;
        if applied.width != fmt.width || applied.height != fmt.height {
            return Err(CaptureError::Configuration(format!(
                "requested {}x{}, driver chose {}x{}",
                fmt.width, fmt.height, applied.width, applied.height
            )));
        }
        if let Some(fps) = mode.fps {
            let mut params = self
                .device
                .params()
                .map_err(|e| CaptureError::Configuration(e.to_string()))?;
            params.interval.numerator = 1;
            params.interval.denominator = fps;
            self.device
                .set_params(&params)
                .map_err(|e| CaptureError::Configuration(e.to_string()))?;
            self.frame_rate = fps.max(1);
        }
        Ok(())
    }

    fn start(&mut self, sink: EventSink) -> Result<(), CaptureError> {
        let id = self.info.unique_id.clone();
        let mut fmt = self.device.format().map_err(|e| map_io(&id, e))?;
        let current = from_fourcc(fmt.fourcc);
        if !convert::is_convertible(current) {
            let mode = crate::select_convertible_mode(&self.modes()).ok_or_else(|| {
                CaptureError::Configuration(format!(
                    "{id}: no convertible pixel format advertised (current {current})"
                ))
            })?;
            warn!(camera = %id, current = %current, mode = ?mode, "switching to a convertible format");
            if let Err(err) = self.configure(&mode.with_fps(self.frame_rate)) {
                warn!(camera = %id, error = %err, "convertible format only partially applied");
            }
            fmt = self.device.format().map_err(|e| map_io(&id, e))?;
        }
        let code = from_fourcc(fmt.fourcc);
        if !convert::is_convertible(code) {
            return Err(CaptureError::Configuration(format!(
                "unsupported camera pixel format {code}"
            )));
        }
        let bpp = code.bytes_per_pixel().ok_or_else(|| {
            CaptureError::Configuration(format!("unsupported camera pixel format {code}"))
        })?;
        let resolution = Resolution::new(fmt.width, fmt.height)
            .ok_or_else(|| CaptureError::Backend(format!("{id}: driver reported zero size")))?;
        let stride = (fmt.stride as usize).max(resolution.width_px() * bpp);
        let pool = PixelBufferPool::create(resolution, FourCc::BGRA, POOL_CAPACITY)
            .map_err(|e| CaptureError::Backend(e.to_string()))?;
        let mut stream = Stream::with_buffers(&self.device, Type::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| map_io(&id, e))?;
        // Short poll timeout so the worker observes stop promptly.
        stream.set_timeout(Duration::from_millis(50));

        let interval = Interval::from_fps(self.frame_rate);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let path = self.path.clone();
        let worker = thread::Builder::new()
            .name("lumix-v4l2".into())
            .spawn(move || {
                let (width, height) = (resolution.width_px(), resolution.height_px());
                while stop_rx.try_recv().is_err() {
                    match stream.next() {
                        Ok((buf, meta)) => {
                            let used = (meta.bytesused as usize).min(buf.len());
                            let view = PixelView::new(&buf[..used], width, height, stride);
                            match convert::to_bgra(&pool, &view, code) {
                                Some(frame) => sink(CameraEvent::Frame(
                                    frame.with_timing(HostClock::now_ns(), interval),
                                )),
                                None => sink(CameraEvent::Dropped),
                            }
                        }
                        Err(err) if err.kind() == io::ErrorKind::TimedOut => {}
                        Err(err) => {
                            debug!(path = %path.display(), error = %err, "dequeue failed");
                            thread::sleep(Duration::from_millis(5));
                        }
                    }
                }
            })
            .map_err(|e| CaptureError::Backend(e.to_string()))?;
        self.worker = Some((stop_tx, worker));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some((stop_tx, worker)) = self.worker.take() {
            let _ = stop_tx.send(());
            if worker.join().is_err() {
                warn!(camera = %self.info.unique_id, "v4l2 capture thread panicked");
            }
        }
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        self.stop();
    }
}
