//! Adapter seam between the extension and the media host it serves.
//!
//! The host drives the extension: it queries properties, connects clients and
//! starts or stops the stream. Those callbacks land on the `*Source` traits,
//! which the registrar implements. In the other direction the registrar
//! registers objects through [`MediaHost`] and delivers samples through the
//! [`StreamSink`] returned for the stream.
use std::{collections::BTreeMap, fmt, sync::Arc};

use lumix_core::prelude::{FourCc, FrameBuffer, Interval, SampleTiming, StreamFormat};
use uuid::Uuid;

use crate::error::HostError;

pub mod in_process;
#[cfg(feature = "v4l2")]
pub mod loopback;

/// Identity of a consumer process attached to the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Which registered object a property belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Provider,
    Device,
    Stream,
}

/// Every property the host may ask about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PropertyKey {
    TransportType,
    Model,
    IsSuspended,
    LinkedAudioDevice,
    ProviderName,
    ProviderManufacturer,
    ActiveFormatIndex,
    FrameDuration,
    SinkBufferQueueSize,
    SinkBuffersRequiredForStartup,
}

impl PropertyKey {
    pub const DEVICE: [PropertyKey; 4] = [
        PropertyKey::TransportType,
        PropertyKey::Model,
        PropertyKey::IsSuspended,
        PropertyKey::LinkedAudioDevice,
    ];
    pub const PROVIDER: [PropertyKey; 2] =
        [PropertyKey::ProviderName, PropertyKey::ProviderManufacturer];
    pub const STREAM: [PropertyKey; 4] = [
        PropertyKey::ActiveFormatIndex,
        PropertyKey::FrameDuration,
        PropertyKey::SinkBufferQueueSize,
        PropertyKey::SinkBuffersRequiredForStartup,
    ];

    pub fn object(self) -> ObjectKind {
        match self {
            PropertyKey::TransportType
            | PropertyKey::Model
            | PropertyKey::IsSuspended
            | PropertyKey::LinkedAudioDevice => ObjectKind::Device,
            PropertyKey::ProviderName | PropertyKey::ProviderManufacturer => ObjectKind::Provider,
            PropertyKey::ActiveFormatIndex
            | PropertyKey::FrameDuration
            | PropertyKey::SinkBufferQueueSize
            | PropertyKey::SinkBuffersRequiredForStartup => ObjectKind::Stream,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Text(String),
    Code(FourCc),
    Flag(bool),
    Index(u32),
    Duration(Interval),
}

pub type PropertyMap = BTreeMap<PropertyKey, PropertyValue>;

/// Property callbacks shared by every registered object.
pub trait PropertySource: Send + Sync {
    /// Keys advertised for this object. Some may go unanswered.
    fn available_properties(&self) -> &'static [PropertyKey];

    /// Values for the requested keys this object can answer.
    fn properties(&self, keys: &[PropertyKey]) -> PropertyMap;

    /// Apply writes. Read-only keys are ignored rather than rejected.
    fn set_properties(&self, values: &PropertyMap);
}

pub trait ProviderSource: PropertySource {
    fn connect_client(&self, client: ClientId) -> Result<(), HostError>;
    fn disconnect_client(&self, client: ClientId);
}

pub trait DeviceSource: PropertySource {}

pub trait StreamSource: PropertySource {
    fn authorized_to_start_stream(&self, client: ClientId) -> bool;
    fn start_stream(&self) -> Result<(), HostError>;
    fn stop_stream(&self) -> Result<(), HostError>;
}

/// Receives frames for the one virtual stream.
pub trait StreamSink: Send + Sync {
    /// Hand `frame` to the host. Ownership moves with it.
    fn send(&self, frame: FrameBuffer, timing: SampleTiming, host_time_ns: u64)
    -> Result<(), HostError>;
}

/// Static description of the stream handed to the host at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRegistration {
    pub id: Uuid,
    pub name: String,
    pub formats: Vec<StreamFormat>,
}

/// Static description of the device handed to the host at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRegistration {
    pub id: Uuid,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    /// Streams already registered that belong to this device.
    pub streams: Vec<Uuid>,
}

/// Registration side of the host protocol.
///
/// Objects are registered leaves first: stream, then the device that owns it,
/// then the provider that owns the device.
pub trait MediaHost: Send + Sync {
    fn register_stream(
        &self,
        stream: &StreamRegistration,
        source: Arc<dyn StreamSource>,
    ) -> Result<Arc<dyn StreamSink>, HostError>;

    fn register_device(
        &self,
        device: &DeviceRegistration,
        source: Arc<dyn DeviceSource>,
    ) -> Result<(), HostError>;

    fn register_provider(
        &self,
        name: &str,
        devices: &[Uuid],
        source: Arc<dyn ProviderSource>,
    ) -> Result<(), HostError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_groups_match_their_object() {
        assert!(PropertyKey::DEVICE.iter().all(|k| k.object() == ObjectKind::Device));
        assert!(PropertyKey::PROVIDER.iter().all(|k| k.object() == ObjectKind::Provider));
        assert!(PropertyKey::STREAM.iter().all(|k| k.object() == ObjectKind::Stream));
    }
}
