//! In-memory camera provider for headless runs and tests.
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use lumix_core::prelude::*;
use parking_lot::Mutex;
use tracing::debug;

use crate::{CameraDevice, CameraEvent, CameraInfo, CameraMode, CameraProvider, CaptureError, EventSink};

#[derive(Default)]
struct Registry {
    cameras: Vec<CameraInfo>,
    busy: HashSet<String>,
    reject_configuration: bool,
    running: HashMap<String, EventSink>,
    configured: HashMap<String, CameraMode>,
    modes: HashMap<String, Vec<CameraMode>>,
    opened: u64,
}

/// Camera provider whose devices are attached and driven programmatically.
///
/// Frames are pushed with [`MemoryProvider::emit`] and reach whichever
/// session currently has the camera running.
#[derive(Clone, Default)]
pub struct MemoryProvider {
    registry: Arc<Mutex<Registry>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a camera enumerable.
    pub fn attach(&self, info: CameraInfo) {
        let mut reg = self.registry.lock();
        reg.cameras.retain(|c| c.unique_id != info.unique_id);
        reg.cameras.push(info);
    }

    /// Unplug a camera; a running capture stops receiving frames.
    pub fn detach(&self, unique_id: &str) {
        let mut reg = self.registry.lock();
        reg.cameras.retain(|c| c.unique_id != unique_id);
        reg.running.remove(unique_id);
    }

    /// Simulate another process holding the camera.
    pub fn set_busy(&self, unique_id: &str, busy: bool) {
        let mut reg = self.registry.lock();
        if busy {
            reg.busy.insert(unique_id.to_string());
        } else {
            reg.busy.remove(unique_id);
        }
    }

    /// Make every `configure` call fail.
    pub fn reject_configuration(&self, reject: bool) {
        self.registry.lock().reject_configuration = reject;
    }

    /// Replace the modes `unique_id` advertises. Defaults to BGRA at 720p,
    /// 1080p and 4K.
    pub fn set_modes(&self, unique_id: &str, modes: Vec<CameraMode>) {
        self.registry
            .lock()
            .modes
            .insert(unique_id.to_string(), modes);
    }

    /// Deliver an event to the running capture on `unique_id`.
    ///
    /// Returns `false` when nothing is running on that camera.
    pub fn emit(&self, unique_id: &str, event: CameraEvent) -> bool {
        let sink = self.registry.lock().running.get(unique_id).cloned();
        match sink {
            Some(sink) => {
                sink(event);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, unique_id: &str) -> bool {
        self.registry.lock().running.contains_key(unique_id)
    }

    /// Cameras currently started.
    pub fn running_count(&self) -> usize {
        self.registry.lock().running.len()
    }

    /// Total successful `open` calls.
    pub fn open_count(&self) -> u64 {
        self.registry.lock().opened
    }

    /// Last mode applied to `unique_id`.
    pub fn configured_mode(&self, unique_id: &str) -> Option<CameraMode> {
        self.registry.lock().configured.get(unique_id).copied()
    }
}

impl CameraProvider for MemoryProvider {
    fn devices(&self) -> Vec<CameraInfo> {
        self.registry.lock().cameras.clone()
    }

    fn open(&self, unique_id: &str) -> Result<Box<dyn CameraDevice>, CaptureError> {
        let mut reg = self.registry.lock();
        let info = reg
            .cameras
            .iter()
            .find(|c| c.unique_id == unique_id)
            .cloned()
            .ok_or_else(|| CaptureError::DeviceNotFound(unique_id.to_string()))?;
        if reg.busy.contains(unique_id) || reg.running.contains_key(unique_id) {
            return Err(CaptureError::DeviceBusy(unique_id.to_string()));
        }
        reg.opened += 1;
        Ok(Box::new(MemoryCamera {
            info,
            registry: self.registry.clone(),
            started: false,
        }))
    }
}

/// Device handle produced by [`MemoryProvider::open`].
pub struct MemoryCamera {
    info: CameraInfo,
    registry: Arc<Mutex<Registry>>,
    started: bool,
}

impl CameraDevice for MemoryCamera {
    fn info(&self) -> &CameraInfo {
        &self.info
    }

    fn modes(&self) -> Vec<CameraMode> {
        if let Some(modes) = self.registry.lock().modes.get(&self.info.unique_id) {
            return modes.clone();
        }
        [(1280, 720), (1920, 1080), (3840, 2160)]
            .into_iter()
            .filter_map(|(w, h)| Resolution::new(w, h))
            .map(|res| CameraMode::new(res, FourCc::BGRA))
            .collect()
    }

    fn configure(&mut self, mode: &CameraMode) -> Result<(), CaptureError> {
        let mut reg = self.registry.lock();
        if reg.reject_configuration {
            return Err(CaptureError::Configuration(format!(
                "{} rejected {}",
                self.info.unique_id, mode.resolution
            )));
        }
        reg.configured.insert(self.info.unique_id.clone(), *mode);
        Ok(())
    }

    fn start(&mut self, sink: EventSink) -> Result<(), CaptureError> {
        let mut reg = self.registry.lock();
        if !reg.cameras.iter().any(|c| c.unique_id == self.info.unique_id) {
            return Err(CaptureError::DeviceNotFound(self.info.unique_id.clone()));
        }
        reg.running.insert(self.info.unique_id.clone(), sink);
        self.started = true;
        debug!(camera = %self.info.unique_id, "memory camera started");
        Ok(())
    }

    fn stop(&mut self) {
        if std::mem::take(&mut self.started) {
            self.registry.lock().running.remove(&self.info.unique_id);
            debug!(camera = %self.info.unique_id, "memory camera stopped");
        }
    }
}

impl Drop for MemoryCamera {
    fn drop(&mut self) {
        self.stop();
    }
}
