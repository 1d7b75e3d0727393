//! Registers the virtual device with the media host and answers its callbacks.
use std::{collections::BTreeSet, sync::Arc};

use lumix_core::prelude::{FourCc, StreamFormat};
use parking_lot::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    constants::{
        DEVICE_ID, DEVICE_MODEL, DEVICE_NAME, MANUFACTURER, PROVIDER_NAME, STREAM_ID, STREAM_NAME,
        TRANSPORT_TYPE_USB,
    },
    error::HostError,
    host::{
        ClientId, DeviceRegistration, DeviceSource, MediaHost, PropertyKey, PropertyMap,
        PropertySource, PropertyValue, ProviderSource, StreamRegistration, StreamSource,
    },
    router::FrameRouter,
};

/// Fixed identity of the virtual device and its one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDeviceDescriptor {
    pub device_id: Uuid,
    pub stream_id: Uuid,
    pub name: String,
    pub stream_name: String,
    pub model: String,
    pub manufacturer: String,
    pub transport: FourCc,
    pub suspended: bool,
}

impl VirtualDeviceDescriptor {
    pub fn lumix() -> Self {
        Self {
            device_id: DEVICE_ID,
            stream_id: STREAM_ID,
            name: DEVICE_NAME.to_string(),
            stream_name: STREAM_NAME.to_string(),
            model: DEVICE_MODEL.to_string(),
            manufacturer: MANUFACTURER.to_string(),
            transport: TRANSPORT_TYPE_USB,
            suspended: false,
        }
    }
}

impl Default for VirtualDeviceDescriptor {
    fn default() -> Self {
        Self::lumix()
    }
}

/// Which objects the host accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrationStatus {
    pub stream: bool,
    pub device: bool,
    pub provider: bool,
}

impl RegistrationStatus {
    pub fn is_complete(&self) -> bool {
        self.stream && self.device && self.provider
    }
}

struct Shared {
    descriptor: VirtualDeviceDescriptor,
    router: Arc<FrameRouter>,
    clients: Mutex<BTreeSet<ClientId>>,
}

struct ProviderHandle(Arc<Shared>);
struct DeviceHandle(Arc<Shared>);
struct StreamHandle(Arc<Shared>);

impl PropertySource for ProviderHandle {
    fn available_properties(&self) -> &'static [PropertyKey] {
        &PropertyKey::PROVIDER
    }

    fn properties(&self, keys: &[PropertyKey]) -> PropertyMap {
        keys.iter()
            .filter_map(|key| {
                let value = match key {
                    PropertyKey::ProviderName => PropertyValue::Text(PROVIDER_NAME.to_string()),
                    PropertyKey::ProviderManufacturer => {
                        PropertyValue::Text(self.0.descriptor.manufacturer.clone())
                    }
                    _ => return None,
                };
                Some((*key, value))
            })
            .collect()
    }

    fn set_properties(&self, values: &PropertyMap) {
        debug!(count = values.len(), "ignoring provider property write");
    }
}

impl ProviderSource for ProviderHandle {
    fn connect_client(&self, client: ClientId) -> Result<(), HostError> {
        let connected = {
            let mut clients = self.0.clients.lock();
            clients.insert(client);
            clients.len()
        };
        info!(%client, connected, "client connected");
        Ok(())
    }

    fn disconnect_client(&self, client: ClientId) {
        let connected = {
            let mut clients = self.0.clients.lock();
            clients.remove(&client);
            clients.len()
        };
        info!(%client, connected, "client disconnected");
    }
}

impl PropertySource for DeviceHandle {
    fn available_properties(&self) -> &'static [PropertyKey] {
        &PropertyKey::DEVICE
    }

    fn properties(&self, keys: &[PropertyKey]) -> PropertyMap {
        let d = &self.0.descriptor;
        keys.iter()
            .filter_map(|key| {
                let value = match key {
                    PropertyKey::TransportType => PropertyValue::Code(d.transport),
                    PropertyKey::Model => PropertyValue::Text(d.model.clone()),
                    PropertyKey::IsSuspended => PropertyValue::Flag(d.suspended),
                    _ => return None,
                };
                Some((*key, value))
            })
            .collect()
    }

    fn set_properties(&self, values: &PropertyMap) {
        debug!(count = values.len(), "ignoring device property write");
    }
}

impl DeviceSource for DeviceHandle {}

impl PropertySource for StreamHandle {
    fn available_properties(&self) -> &'static [PropertyKey] {
        &PropertyKey::STREAM
    }

    fn properties(&self, keys: &[PropertyKey]) -> PropertyMap {
        keys.iter()
            .filter_map(|key| {
                let value = match key {
                    PropertyKey::ActiveFormatIndex => PropertyValue::Index(0),
                    PropertyKey::FrameDuration => {
                        PropertyValue::Duration(self.0.router.frame_duration())
                    }
                    _ => return None,
                };
                Some((*key, value))
            })
            .collect()
    }

    fn set_properties(&self, values: &PropertyMap) {
        for (key, value) in values {
            match key {
                // Only one format exists; the write is accepted and has no effect.
                PropertyKey::ActiveFormatIndex => {
                    debug!(?value, "active format index write accepted")
                }
                other => debug!(property = ?other, "ignoring read-only stream property"),
            }
        }
    }
}

impl StreamSource for StreamHandle {
    fn authorized_to_start_stream(&self, client: ClientId) -> bool {
        info!(%client, "authorizing client");
        true
    }

    fn start_stream(&self) -> Result<(), HostError> {
        info!("host requested stream start");
        self.0.router.start();
        Ok(())
    }

    fn stop_stream(&self) -> Result<(), HostError> {
        info!("host requested stream stop");
        self.0.router.stop();
        Ok(())
    }
}

/// The extension's single point of contact with the media host.
///
/// Registration failures are logged and leave the registrar with whatever the
/// host did accept; the process keeps running either way.
pub struct VirtualDeviceRegistrar {
    shared: Arc<Shared>,
    format: StreamFormat,
    status: RegistrationStatus,
}

impl VirtualDeviceRegistrar {
    /// Register stream, device and provider with `host`, in that order.
    pub fn register(
        host: &dyn MediaHost,
        router: Arc<FrameRouter>,
        descriptor: VirtualDeviceDescriptor,
    ) -> Self {
        let format = router.format().clone();
        let shared = Arc::new(Shared {
            descriptor,
            router,
            clients: Mutex::new(BTreeSet::new()),
        });
        let d = &shared.descriptor;
        let mut status = RegistrationStatus::default();

        let stream = StreamRegistration {
            id: d.stream_id,
            name: d.stream_name.clone(),
            formats: vec![format.clone()],
        };
        match host.register_stream(&stream, Arc::new(StreamHandle(shared.clone()))) {
            Ok(sink) => {
                shared.router.set_sink(sink);
                status.stream = true;
            }
            Err(err) => {
                error!(code = err.code(), error = %err, stream = %d.stream_id, "stream registration failed");
            }
        }

        let device = DeviceRegistration {
            id: d.device_id,
            name: d.name.clone(),
            manufacturer: d.manufacturer.clone(),
            model: d.model.clone(),
            streams: if status.stream { vec![d.stream_id] } else { Vec::new() },
        };
        match host.register_device(&device, Arc::new(DeviceHandle(shared.clone()))) {
            Ok(()) => status.device = true,
            Err(err) => {
                error!(code = err.code(), error = %err, device = %d.device_id, "device registration failed");
            }
        }

        let devices = if status.device { vec![d.device_id] } else { Vec::new() };
        match host.register_provider(PROVIDER_NAME, &devices, Arc::new(ProviderHandle(shared.clone()))) {
            Ok(()) => status.provider = true,
            Err(err) => {
                error!(code = err.code(), error = %err, "provider registration failed");
            }
        }

        if status.is_complete() {
            info!(
                device = %d.name,
                resolution = %format.resolution,
                fps = format.frame_duration().fps(),
                "virtual device registered"
            );
        } else {
            error!(?status, "virtual device only partially registered, running degraded");
        }
        Self {
            shared,
            format,
            status,
        }
    }

    pub fn status(&self) -> RegistrationStatus {
        self.status
    }

    pub fn descriptor(&self) -> &VirtualDeviceDescriptor {
        &self.shared.descriptor
    }

    /// The one format the stream advertises.
    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    pub fn router(&self) -> &Arc<FrameRouter> {
        &self.shared.router
    }

    pub fn connected_clients(&self) -> Vec<ClientId> {
        self.shared.clients.lock().iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        host::{ObjectKind, in_process::InProcessHost},
        prefs::{MemoryStore, SharedSelection},
        router::{RouterConfig, RouterState},
    };
    use lumix_capture::memory::MemoryProvider;
    use lumix_core::prelude::{Interval, Resolution};

    fn router() -> Arc<FrameRouter> {
        let format = StreamFormat::bgra(Resolution::new(64, 32).unwrap(), 30);
        Arc::new(
            FrameRouter::new(
                RouterConfig::new(format),
                SharedSelection::new(Arc::new(MemoryStore::new())),
                Arc::new(MemoryProvider::new()),
            )
            .unwrap(),
        )
    }

    #[test]
    fn registers_all_objects_and_answers_properties() {
        let host = InProcessHost::new();
        let registrar =
            VirtualDeviceRegistrar::register(&host, router(), VirtualDeviceDescriptor::lumix());
        assert!(registrar.status().is_complete());
        assert_eq!(host.provider_devices(), vec![DEVICE_ID]);
        assert_eq!(host.device_registration().unwrap().streams, vec![STREAM_ID]);
        assert!(registrar.router().has_sink());

        let device = host.object_properties(DEVICE_ID, &PropertyKey::DEVICE).unwrap();
        assert_eq!(device[&PropertyKey::TransportType], PropertyValue::Code(TRANSPORT_TYPE_USB));
        assert_eq!(device[&PropertyKey::Model], PropertyValue::Text("Lumix S5".into()));
        assert_eq!(device[&PropertyKey::IsSuspended], PropertyValue::Flag(false));
        assert!(!device.contains_key(&PropertyKey::LinkedAudioDevice));

        let stream = host.object_properties(STREAM_ID, &PropertyKey::STREAM).unwrap();
        assert_eq!(stream[&PropertyKey::ActiveFormatIndex], PropertyValue::Index(0));
        assert_eq!(
            stream[&PropertyKey::FrameDuration],
            PropertyValue::Duration(Interval::from_fps(30))
        );
        assert_eq!(stream.len(), 2);

        let provider = host.provider_properties(&PropertyKey::PROVIDER).unwrap();
        assert_eq!(
            provider[&PropertyKey::ProviderManufacturer],
            PropertyValue::Text("Panasonic (Virtual)".into())
        );
    }

    #[test]
    fn property_writes_are_accepted_and_ignored() {
        let host = InProcessHost::new();
        let _registrar =
            VirtualDeviceRegistrar::register(&host, router(), VirtualDeviceDescriptor::lumix());
        let write = PropertyMap::from([
            (PropertyKey::ActiveFormatIndex, PropertyValue::Index(3)),
            (PropertyKey::FrameDuration, PropertyValue::Duration(Interval::from_fps(5))),
        ]);
        host.set_object_properties(STREAM_ID, &write).unwrap();
        let stream = host.object_properties(STREAM_ID, &PropertyKey::STREAM).unwrap();
        assert_eq!(stream[&PropertyKey::ActiveFormatIndex], PropertyValue::Index(0));
        assert_eq!(
            stream[&PropertyKey::FrameDuration],
            PropertyValue::Duration(Interval::from_fps(30))
        );
    }

    #[test]
    fn clients_are_tracked_and_drive_the_router() {
        let host = InProcessHost::new();
        let registrar =
            VirtualDeviceRegistrar::register(&host, router(), VirtualDeviceDescriptor::lumix());
        let a = host.connect_client().unwrap();
        let b = host.connect_client().unwrap();
        assert_eq!(registrar.connected_clients(), vec![a, b]);

        host.start_stream(a).unwrap();
        host.start_stream(b).unwrap();
        assert!(matches!(registrar.router().state(), RouterState::Streaming(_)));
        host.stop_stream().unwrap();
        host.stop_stream().unwrap();
        assert_eq!(registrar.router().state(), RouterState::Stopped);

        host.disconnect_client(a).unwrap();
        assert_eq!(registrar.connected_clients(), vec![b]);
    }

    #[test]
    fn rejected_stream_leaves_a_degraded_device() {
        let host = InProcessHost::new();
        host.reject_registration(ObjectKind::Stream);
        let registrar =
            VirtualDeviceRegistrar::register(&host, router(), VirtualDeviceDescriptor::lumix());
        let status = registrar.status();
        assert!(!status.stream && status.device && status.provider);
        assert!(host.device_registration().unwrap().streams.is_empty());
        assert!(!registrar.router().has_sink());
    }
}
