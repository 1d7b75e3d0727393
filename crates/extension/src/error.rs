use std::{io, path::PathBuf};

/// Failures reported by the media host.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("host rejected {object} registration: {reason}")]
    Registration {
        object: &'static str,
        reason: String,
    },
    #[error("sink rejected sample: {0}")]
    Send(String),
    #[error("unknown host object {0}")]
    UnknownObject(uuid::Uuid),
    #[error("no {0:?} registered with the host")]
    NotRegistered(crate::host::ObjectKind),
    #[error("{0} is not authorized to start the stream")]
    Unauthorized(crate::host::ClientId),
    #[error("host i/o: {0}")]
    Io(#[from] io::Error),
}

impl HostError {
    /// Stable string code for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            HostError::Registration { .. } => "registration_failed",
            HostError::Send(_) => "send_failed",
            HostError::UnknownObject(_) => "unknown_object",
            HostError::NotRegistered(_) => "not_registered",
            HostError::Unauthorized(_) => "unauthorized",
            HostError::Io(_) => "host_io",
        }
    }
}

/// Failures reading or writing the shared preference store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("preference store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("preference store {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no platform data directory for group {0}")]
    NoDataDir(String),
    #[error("resolution {0} is not offered by the virtual camera")]
    UnsupportedResolution(lumix_core::prelude::Resolution),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Io { .. } => "store_io",
            StoreError::Corrupt { .. } => "store_corrupt",
            StoreError::NoDataDir(_) => "store_no_data_dir",
            StoreError::UnsupportedResolution(_) => "store_unsupported_resolution",
        }
    }
}

/// Failures in the cross-process notification channel.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification socket {path}: {source}")]
    Socket {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("subscribe requires a running tokio runtime")]
    NoRuntime,
    #[error("invalid topic {0:?}")]
    InvalidTopic(String),
}

impl NotifyError {
    pub fn code(&self) -> &'static str {
        match self {
            NotifyError::Socket { .. } => "notify_socket",
            NotifyError::NoRuntime => "notify_no_runtime",
            NotifyError::InvalidTopic(_) => "notify_invalid_topic",
        }
    }
}

/// Failures loading the extension configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Io { .. } => "config_io",
            ConfigError::Parse { .. } => "config_parse",
        }
    }
}
