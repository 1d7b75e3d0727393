//! A media host living inside the extension process.
//!
//! It plays the host's side of the protocol directly: clients are simulated
//! by calling [`InProcessHost::connect_client`] and friends, and delivered
//! samples are collected for inspection. Registration and send failures can
//! be injected.
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use lumix_core::prelude::{FrameBuffer, Resolution, SampleTiming};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    ClientId, DeviceRegistration, DeviceSource, MediaHost, ObjectKind, PropertyKey, PropertyMap,
    PropertySource, ProviderSource, StreamRegistration, StreamSink, StreamSource,
};
use crate::error::HostError;

const DEFAULT_RETAINED_SAMPLES: usize = 256;

/// What the sink saw for one delivered frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredSample {
    pub resolution: Resolution,
    pub timing: SampleTiming,
    pub host_time_ns: u64,
    /// Pixels of the first row, without padding.
    pub first_row: Vec<u8>,
}

/// Sink that records samples and releases their buffers immediately.
pub struct CollectingSink {
    samples: Mutex<Vec<DeliveredSample>>,
    arrived: Condvar,
    total: AtomicU64,
    fail_next: AtomicU64,
    retain: usize,
}

impl CollectingSink {
    pub fn new(retain: usize) -> Self {
        Self {
            samples: Mutex::new(Vec::new()),
            arrived: Condvar::new(),
            total: AtomicU64::new(0),
            fail_next: AtomicU64::new(0),
            retain: retain.max(1),
        }
    }

    /// Reject the next `count` sends.
    pub fn fail_next(&self, count: u64) {
        self.fail_next.store(count, Ordering::Release);
    }

    /// Samples accepted so far, including ones no longer retained.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// The earliest retained samples, oldest first.
    pub fn samples(&self) -> Vec<DeliveredSample> {
        self.samples.lock().clone()
    }

    pub fn clear(&self) {
        self.samples.lock().clear();
    }

    /// Block until at least `count` samples are retained or `timeout` passes.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut samples = self.samples.lock();
        while samples.len() < count {
            if self.arrived.wait_until(&mut samples, deadline).timed_out() {
                return samples.len() >= count;
            }
        }
        true
    }
}

impl StreamSink for CollectingSink {
    fn send(
        &self,
        frame: FrameBuffer,
        timing: SampleTiming,
        host_time_ns: u64,
    ) -> Result<(), HostError> {
        let injected = self
            .fail_next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(HostError::Send("injected failure".into()));
        }
        self.total.fetch_add(1, Ordering::AcqRel);
        let mut samples = self.samples.lock();
        if samples.len() < self.retain {
            samples.push(DeliveredSample {
                resolution: frame.resolution(),
                timing,
                host_time_ns,
                first_row: frame.pixels(0).to_vec(),
            });
        }
        self.arrived.notify_all();
        Ok(())
    }
}

#[derive(Default)]
struct Registered {
    stream: Option<(StreamRegistration, Arc<dyn StreamSource>)>,
    device: Option<(DeviceRegistration, Arc<dyn DeviceSource>)>,
    provider: Option<(String, Vec<Uuid>, Arc<dyn ProviderSource>)>,
}

/// Host that keeps every registered object in memory.
///
/// # Example
/// ```rust
/// use lumix_extension::host::{ObjectKind, in_process::InProcessHost};
///
/// let host = InProcessHost::new();
/// assert!(!host.is_registered(ObjectKind::Device));
/// assert!(host.connect_client().is_err());
/// ```
#[derive(Clone)]
pub struct InProcessHost {
    registered: Arc<Mutex<Registered>>,
    rejected: Arc<Mutex<Vec<ObjectKind>>>,
    sink: Arc<CollectingSink>,
    next_client: Arc<AtomicU64>,
    live_clients: Arc<AtomicUsize>,
}

impl Default for InProcessHost {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessHost {
    pub fn new() -> Self {
        Self {
            registered: Arc::default(),
            rejected: Arc::default(),
            sink: Arc::new(CollectingSink::new(DEFAULT_RETAINED_SAMPLES)),
            next_client: Arc::new(AtomicU64::new(1)),
            live_clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make registration of `kind` fail.
    pub fn reject_registration(&self, kind: ObjectKind) {
        self.rejected.lock().push(kind);
    }

    pub fn sink(&self) -> Arc<CollectingSink> {
        self.sink.clone()
    }

    pub fn is_registered(&self, kind: ObjectKind) -> bool {
        let registered = self.registered.lock();
        match kind {
            ObjectKind::Provider => registered.provider.is_some(),
            ObjectKind::Device => registered.device.is_some(),
            ObjectKind::Stream => registered.stream.is_some(),
        }
    }

    pub fn stream_registration(&self) -> Option<StreamRegistration> {
        self.registered.lock().stream.as_ref().map(|(r, _)| r.clone())
    }

    pub fn device_registration(&self) -> Option<DeviceRegistration> {
        self.registered.lock().device.as_ref().map(|(r, _)| r.clone())
    }

    /// Devices listed under the registered provider.
    pub fn provider_devices(&self) -> Vec<Uuid> {
        self.registered
            .lock()
            .provider
            .as_ref()
            .map(|(_, devices, _)| devices.clone())
            .unwrap_or_default()
    }

    pub fn live_clients(&self) -> usize {
        self.live_clients.load(Ordering::Acquire)
    }

    fn provider(&self) -> Result<Arc<dyn ProviderSource>, HostError> {
        self.registered
            .lock()
            .provider
            .as_ref()
            .map(|(_, _, source)| source.clone())
            .ok_or(HostError::NotRegistered(ObjectKind::Provider))
    }

    fn stream(&self) -> Result<Arc<dyn StreamSource>, HostError> {
        self.registered
            .lock()
            .stream
            .as_ref()
            .map(|(_, source)| source.clone())
            .ok_or(HostError::NotRegistered(ObjectKind::Stream))
    }

    /// Attach a new consumer through the provider.
    pub fn connect_client(&self) -> Result<ClientId, HostError> {
        let provider = self.provider()?;
        let client = ClientId(self.next_client.fetch_add(1, Ordering::AcqRel));
        provider.connect_client(client)?;
        self.live_clients.fetch_add(1, Ordering::AcqRel);
        Ok(client)
    }

    pub fn disconnect_client(&self, client: ClientId) -> Result<(), HostError> {
        self.provider()?.disconnect_client(client);
        let _ = self
            .live_clients
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        Ok(())
    }

    /// Start the stream on behalf of `client`, after asking for authorization.
    pub fn start_stream(&self, client: ClientId) -> Result<(), HostError> {
        let stream = self.stream()?;
        if !stream.authorized_to_start_stream(client) {
            return Err(HostError::Unauthorized(client));
        }
        stream.start_stream()
    }

    pub fn stop_stream(&self) -> Result<(), HostError> {
        self.stream()?.stop_stream()
    }

    pub fn provider_properties(&self, keys: &[PropertyKey]) -> Result<PropertyMap, HostError> {
        Ok(self.provider()?.properties(keys))
    }

    fn object(&self, id: Uuid) -> Result<Arc<dyn PropertySource>, HostError> {
        let registered = self.registered.lock();
        let source: Arc<dyn PropertySource> = match (&registered.stream, &registered.device) {
            (Some((reg, source)), _) if reg.id == id => source.clone(),
            (_, Some((reg, source))) if reg.id == id => source.clone(),
            _ => return Err(HostError::UnknownObject(id)),
        };
        Ok(source)
    }

    /// Property query addressed to the device or stream with `id`.
    pub fn object_properties(&self, id: Uuid, keys: &[PropertyKey]) -> Result<PropertyMap, HostError> {
        Ok(self.object(id)?.properties(keys))
    }

    /// Property write addressed to the device or stream with `id`.
    pub fn set_object_properties(&self, id: Uuid, values: &PropertyMap) -> Result<(), HostError> {
        self.object(id)?.set_properties(values);
        Ok(())
    }

    fn check_rejected(&self, kind: ObjectKind, object: &'static str) -> Result<(), HostError> {
        if self.rejected.lock().contains(&kind) {
            return Err(HostError::Registration {
                object,
                reason: "rejected by host".into(),
            });
        }
        Ok(())
    }
}

impl MediaHost for InProcessHost {
    fn register_stream(
        &self,
        stream: &StreamRegistration,
        source: Arc<dyn StreamSource>,
    ) -> Result<Arc<dyn StreamSink>, HostError> {
        self.check_rejected(ObjectKind::Stream, "stream")?;
        debug!(stream = %stream.id, formats = stream.formats.len(), "stream registered");
        self.registered.lock().stream = Some((stream.clone(), source));
        Ok(self.sink.clone())
    }

    fn register_device(
        &self,
        device: &DeviceRegistration,
        source: Arc<dyn DeviceSource>,
    ) -> Result<(), HostError> {
        self.check_rejected(ObjectKind::Device, "device")?;
        debug!(device = %device.id, streams = device.streams.len(), "device registered");
        self.registered.lock().device = Some((device.clone(), source));
        Ok(())
    }

    fn register_provider(
        &self,
        name: &str,
        devices: &[Uuid],
        source: Arc<dyn ProviderSource>,
    ) -> Result<(), HostError> {
        self.check_rejected(ObjectKind::Provider, "provider")?;
        info!(provider = name, devices = devices.len(), "provider registered");
        self.registered.lock().provider = Some((name.to_string(), devices.to_vec(), source));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumix_core::prelude::{FourCc, Interval, PixelBufferPool};

    fn frame() -> FrameBuffer {
        let pool =
            PixelBufferPool::create(Resolution::new(4, 2).unwrap(), FourCc::BGRA, 3).unwrap();
        let mut frame = pool.acquire_buffer().unwrap();
        frame.row_mut(0)[..4].copy_from_slice(&[1, 2, 3, 4]);
        frame
    }

    #[test]
    fn sink_records_first_row_and_injects_failures() {
        let sink = CollectingSink::new(8);
        let timing = SampleTiming::new(Interval::from_fps(30), 5);
        sink.fail_next(1);
        assert!(sink.send(frame(), timing, 10).is_err());
        sink.send(frame(), timing, 11).unwrap();
        assert_eq!(sink.total(), 1);
        let samples = sink.samples();
        assert_eq!(samples.len(), 1);
        assert_eq!(&samples[0].first_row[..4], &[1, 2, 3, 4]);
        assert_eq!(samples[0].first_row.len(), 16);
        assert_eq!(samples[0].host_time_ns, 11);
    }

    #[test]
    fn retention_is_capped_but_total_keeps_counting() {
        let sink = CollectingSink::new(2);
        let timing = SampleTiming::new(Interval::from_fps(30), 0);
        for _ in 0..5 {
            sink.send(frame(), timing, 0).unwrap();
        }
        assert_eq!(sink.samples().len(), 2);
        assert_eq!(sink.total(), 5);
        assert!(sink.wait_for(2, Duration::from_millis(1)));
        assert!(!sink.wait_for(3, Duration::from_millis(10)));
    }

    #[test]
    fn calls_before_registration_fail() {
        let host = InProcessHost::new();
        assert_eq!(host.stop_stream().unwrap_err().code(), "not_registered");
        assert_eq!(
            host.object_properties(Uuid::nil(), &[]).unwrap_err().code(),
            "unknown_object"
        );
    }
}
