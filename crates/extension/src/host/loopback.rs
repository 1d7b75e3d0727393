//! Host backed by a v4l2loopback output node.
//!
//! The loopback module plays the part of the system media host on Linux:
//! frames written to its output side show up as a regular webcam to every
//! consumer. There are no host-initiated stream callbacks, so streaming is
//! driven by the start/stop notifications alone.
//!
//! ```text
//! sudo modprobe v4l2loopback devices=1 video_nr=10 card_label="Lumix S5 Webcam" exclusive_caps=1
//! ```
use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use lumix_core::prelude::{FrameBuffer, Resolution, SampleTiming, StreamFormat};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use v4l::{FourCC, prelude::*, video::Output};

use super::{
    DeviceRegistration, DeviceSource, MediaHost, ObjectKind, ProviderSource, StreamRegistration, StreamSink,
    StreamSource,
};
use crate::error::HostError;

#[derive(Default)]
struct Sources {
    stream: Option<Arc<dyn StreamSource>>,
    device: Option<Arc<dyn DeviceSource>>,
    provider: Option<Arc<dyn ProviderSource>>,
}

/// Writes the virtual stream into `/dev/videoN`.
pub struct LoopbackHost {
    path: PathBuf,
    sources: Mutex<Sources>,
}

impl LoopbackHost {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sources: Mutex::new(Sources::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_registered(&self, kind: ObjectKind) -> bool {
        let sources = self.sources.lock();
        match kind {
            ObjectKind::Provider => sources.provider.is_some(),
            ObjectKind::Device => sources.device.is_some(),
            ObjectKind::Stream => sources.stream.is_some(),
        }
    }

    fn open(&self, format: &StreamFormat) -> Result<LoopbackSink, HostError> {
        if !self.path.exists() {
            return Err(HostError::Registration {
                object: "stream",
                reason: format!("{} does not exist; is v4l2loopback loaded?", self.path.display()),
            });
        }
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|err| match err.kind() {
                io::ErrorKind::PermissionDenied => HostError::Registration {
                    object: "stream",
                    reason: format!("permission denied on {}", self.path.display()),
                },
                _ => HostError::Io(err),
            })?;

        let (width, height) = (format.resolution.width.get(), format.resolution.height.get());
        // BGRA in memory order is AR24 to V4L2.
        let fmt = v4l::Format::new(width, height, FourCC::new(b"AR24"));
        match Device::with_path(&self.path) {
            Ok(device) => {
                if let Err(err) = device.set_format(&fmt) {
                    warn!(path = %self.path.display(), error = %err, "could not set loopback format");
                }
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "could not query loopback device");
            }
        }
        info!(path = %self.path.display(), %width, %height, "loopback output opened");
        Ok(LoopbackSink {
            file: Mutex::new(file),
            resolution: format.resolution,
            row_bytes: format.min_stride(),
            written: AtomicU64::new(0),
        })
    }
}

impl MediaHost for LoopbackHost {
    fn register_stream(
        &self,
        stream: &StreamRegistration,
        source: Arc<dyn StreamSource>,
    ) -> Result<Arc<dyn StreamSink>, HostError> {
        let format = stream.formats.first().ok_or_else(|| HostError::Registration {
            object: "stream",
            reason: "no formats".into(),
        })?;
        let sink = self.open(format)?;
        self.sources.lock().stream = Some(source);
        Ok(Arc::new(sink))
    }

    fn register_device(
        &self,
        device: &DeviceRegistration,
        source: Arc<dyn DeviceSource>,
    ) -> Result<(), HostError> {
        debug!(device = %device.id, name = %device.name, "device bound to loopback node");
        self.sources.lock().device = Some(source);
        Ok(())
    }

    fn register_provider(
        &self,
        name: &str,
        devices: &[Uuid],
        source: Arc<dyn ProviderSource>,
    ) -> Result<(), HostError> {
        info!(provider = name, devices = devices.len(), path = %self.path.display(), "provider ready");
        self.sources.lock().provider = Some(source);
        Ok(())
    }
}

/// Sink writing packed BGRA frames to the loopback file.
pub struct LoopbackSink {
    file: Mutex<File>,
    resolution: Resolution,
    row_bytes: usize,
    written: AtomicU64,
}

impl LoopbackSink {
    pub fn frames_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

impl StreamSink for LoopbackSink {
    fn send(
        &self,
        frame: FrameBuffer,
        _timing: SampleTiming,
        _host_time_ns: u64,
    ) -> Result<(), HostError> {
        if frame.resolution() != self.resolution {
            return Err(HostError::Send(format!(
                "frame is {}, loopback expects {}",
                frame.resolution(),
                self.resolution
            )));
        }
        let mut file = self.file.lock();
        if frame.stride() == self.row_bytes {
            file.write_all(frame.data())?;
        } else {
            let mut packed = Vec::with_capacity(self.row_bytes * frame.height());
            for y in 0..frame.height() {
                packed.extend_from_slice(frame.pixels(y));
            }
            file.write_all(&packed)?;
        }
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
