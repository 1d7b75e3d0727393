#![doc = include_str!("../README.md")]

pub mod config;
pub mod constants;
pub mod error;
pub mod host;
pub mod logging;
pub mod notify;
pub mod prefs;
pub mod registrar;
pub mod router;

pub use error::{ConfigError, HostError, NotifyError, StoreError};

pub mod prelude {
    pub use crate::{
        config::{ExtensionConfig, HostKind},
        constants::*,
        error::{ConfigError, HostError, NotifyError, StoreError},
        host::{
            ClientId, MediaHost, ObjectKind, PropertyKey, PropertyMap, PropertyValue, StreamSink,
            in_process::InProcessHost,
        },
        notify::{SocketNotifier, Subscription},
        prefs::{CaptureSelection, JsonFileStore, MemoryStore, PreferenceStore, SharedSelection},
        registrar::{RegistrationStatus, VirtualDeviceDescriptor, VirtualDeviceRegistrar},
        router::{ActiveSource, FrameRouter, RouterConfig, RouterState, RouterStats},
    };
}
