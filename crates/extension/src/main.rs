use std::sync::Arc;

use anyhow::Context;
use lumix_capture::CameraProvider;
use lumix_core::prelude::{HostClock, StreamFormat};
use lumix_extension::{
    config::{ExtensionConfig, HostKind},
    constants::{FORMAT_NAME, FORMAT_VENDOR, START_STREAMING_TOPIC, STOP_STREAMING_TOPIC},
    host::{MediaHost, in_process::InProcessHost},
    logging,
    notify::SocketNotifier,
    prefs::{JsonFileStore, MemoryStore, PreferenceStore, SharedSelection},
    registrar::{VirtualDeviceDescriptor, VirtualDeviceRegistrar},
    router::{FrameRouter, RouterConfig},
};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
enum Control {
    Start,
    Stop,
}

fn camera_provider(config: &ExtensionConfig) -> Arc<dyn CameraProvider> {
    #[cfg(feature = "v4l2")]
    {
        Arc::new(lumix_capture::v4l2_backend::V4l2Provider::new(config.frame_rate))
    }
    #[cfg(not(feature = "v4l2"))]
    {
        let _ = config;
        warn!("built without camera support; only the test pattern is available");
        Arc::new(lumix_capture::memory::MemoryProvider::new())
    }
}

fn media_host(config: &ExtensionConfig) -> Box<dyn MediaHost> {
    match config.host {
        HostKind::InProcess => Box::new(InProcessHost::new()),
        #[cfg(feature = "v4l2")]
        HostKind::V4l2Loopback => Box::new(lumix_extension::host::loopback::LoopbackHost::new(
            config.loopback_device.clone(),
        )),
        #[cfg(not(feature = "v4l2"))]
        HostKind::V4l2Loopback => {
            warn!("v4l2-loopback host requires the v4l2 feature, using in-process host");
            Box::new(InProcessHost::new())
        }
    }
}

fn preference_store(config: &ExtensionConfig) -> Arc<dyn PreferenceStore> {
    match config.resolved_store_path() {
        Some(path) => {
            info!(path = %path.display(), "using shared preferences");
            Arc::new(JsonFileStore::new(path))
        }
        None => {
            warn!("no data directory for shared preferences, selection will not persist");
            Arc::new(MemoryStore::new())
        }
    }
}

fn main() -> anyhow::Result<()> {
    HostClock::init();
    let (config, config_err) = match ExtensionConfig::load() {
        Ok(config) => (config, None),
        Err(err) => (ExtensionConfig::default(), Some(err)),
    };
    let _log_guard = logging::init(config.log_dir.as_deref(), "lumix-extension.log");
    if let Some(err) = config_err {
        warn!(code = err.code(), error = %err, "config unreadable, using defaults");
    }
    info!(pid = std::process::id(), host = ?config.host, "lumix extension starting");

    let selection = SharedSelection::new(preference_store(&config));
    let format = StreamFormat::bgra(selection.selected_resolution(), config.frame_rate)
        .with_description(FORMAT_NAME, FORMAT_VENDOR);
    let router = Arc::new(
        FrameRouter::new(
            RouterConfig::from_extension(&config, format),
            selection.clone(),
            camera_provider(&config),
        )
        .context("allocating frame pool")?,
    );

    let host = media_host(&config);
    let registrar =
        VirtualDeviceRegistrar::register(host.as_ref(), router.clone(), VirtualDeviceDescriptor::lumix());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("lumix-runtime")
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(async {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel::<Control>();
        let notifier = SocketNotifier::new(config.resolved_notify_dir());
        let mut subscriptions = Vec::new();
        for (topic, command) in [
            (START_STREAMING_TOPIC, Control::Start),
            (STOP_STREAMING_TOPIC, Control::Stop),
        ] {
            let tx = control_tx.clone();
            match notifier.subscribe(topic, move || {
                let _ = tx.send(command);
            }) {
                Ok(sub) => subscriptions.push(sub),
                Err(err) => warn!(topic, code = err.code(), error = %err, "notification subscribe failed"),
            }
        }
        info!(dir = %notifier.dir().display(), listening = subscriptions.len(), "waiting for notifications");

        // The loopback node has no stream callbacks; honour the persisted toggle instead.
        if config.host == HostKind::V4l2Loopback && selection.is_extension_active() {
            let _ = control_tx.send(Control::Start);
        }

        // Transitions block on thread joins, so apply them one at a time off the runtime.
        let control_router = router.clone();
        let control = tokio::spawn(async move {
            while let Some(command) = control_rx.recv().await {
                info!(?command, "streaming notification");
                let router = control_router.clone();
                let applied = tokio::task::spawn_blocking(move || match command {
                    Control::Start => router.start(),
                    Control::Stop => router.stop(),
                })
                .await;
                if let Err(err) = applied {
                    warn!(error = %err, "streaming transition panicked");
                }
            }
        });

        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "signal handler failed, shutting down");
        }
        info!("shutting down");
        drop(subscriptions);
        control.abort();
    });

    router.stop();
    let stats = router.stats();
    info!(
        sent = stats.sequence,
        send_failures = stats.send_failures,
        dropped = stats.dropped,
        clients = registrar.connected_clients().len(),
        "lumix extension stopped"
    );
    Ok(())
}
