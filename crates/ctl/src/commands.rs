//! CLI command implementations.
use std::{path::PathBuf, sync::Arc};

use lumix_capture::{CameraInfo, CameraProvider};
use lumix_core::prelude::Resolution;
use lumix_extension::{
    constants::{START_STREAMING_TOPIC, STOP_STREAMING_TOPIC, SUPPORTED_RESOLUTIONS, is_supported_resolution},
    notify::SocketNotifier,
    prefs::SharedSelection,
};
use serde::Serialize;
use tracing::debug;

use crate::{
    activation::{ActivationOutcome, ExtensionInstaller},
    exit_codes::ExitCode,
};

/// How results are printed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    fn emit<T: Serialize>(self, value: &T, human: impl FnOnce()) {
        if self.json {
            match serde_json::to_string_pretty(value) {
                Ok(text) => println!("{text}"),
                Err(err) => eprintln!("error: {err}"),
            }
        } else if !self.quiet {
            human();
        }
    }

    fn error(self, message: &str) {
        if self.json {
            println!("{}", serde_json::json!({ "error": message }));
        } else if !self.quiet {
            eprintln!("error: {message}");
        }
    }
}

/// Everything a command may touch.
pub struct Context {
    pub selection: SharedSelection,
    pub notifier: SocketNotifier,
    pub provider: Arc<dyn CameraProvider>,
    pub installer: Box<dyn ExtensionInstaller>,
    pub store_path: Option<PathBuf>,
    pub output: Output,
}

#[derive(Debug, Serialize)]
pub struct CameraEntry {
    #[serde(flatten)]
    pub info: CameraInfo,
    pub is_lumix: bool,
    pub selected: bool,
}

#[derive(Debug, Serialize)]
pub struct CameraListing {
    pub cameras: Vec<CameraEntry>,
    /// First Lumix body, offered when nothing usable is selected.
    pub suggested: Option<String>,
}

/// Enumerate cameras with Lumix bodies first, keeping discovery order
/// otherwise.
pub fn camera_listing(provider: &dyn CameraProvider, selected: Option<&str>) -> CameraListing {
    let mut cameras: Vec<CameraEntry> = provider
        .devices()
        .into_iter()
        .map(|info| CameraEntry {
            is_lumix: info.is_lumix(),
            selected: selected == Some(info.unique_id.as_str()),
            info,
        })
        .collect();
    cameras.sort_by_key(|entry| !entry.is_lumix);
    let selected_present = cameras.iter().any(|entry| entry.selected);
    let suggested = if selected_present {
        None
    } else {
        cameras
            .iter()
            .find(|entry| entry.is_lumix)
            .map(|entry| entry.info.unique_id.clone())
    };
    CameraListing { cameras, suggested }
}

pub fn cameras(ctx: &Context) -> ExitCode {
    let selected = ctx.selection.selected_camera_id();
    let listing = camera_listing(ctx.provider.as_ref(), selected.as_deref());
    ctx.output.emit(&listing, || {
        if listing.cameras.is_empty() {
            println!("No cameras found; the test pattern will be streamed.");
            return;
        }
        for entry in &listing.cameras {
            let mark = if entry.selected { "*" } else { " " };
            let tag = if entry.is_lumix { " [lumix]" } else { "" };
            println!(
                "{mark} {:<24} {} ({} {}){tag}",
                entry.info.unique_id, entry.info.name, entry.info.manufacturer, entry.info.model_id
            );
        }
        if let Some(id) = &listing.suggested {
            println!("suggested: lumixctl select-camera {id}");
        }
    });
    ExitCode::Success
}

/// Persist `id`, or the suggested Lumix when `id` is `None`.
pub fn select_camera(ctx: &Context, id: Option<&str>, force: bool) -> ExitCode {
    let target = match id {
        Some(id) if force || ctx.provider.contains(id) => id.to_string(),
        Some(id) => {
            ctx.output.error(&format!(
                "camera {id:?} is not connected (use --force to persist it anyway)"
            ));
            return ExitCode::NoCamera;
        }
        None => match ctx.provider.devices().into_iter().find(CameraInfo::is_lumix) {
            Some(info) => info.unique_id,
            None => {
                ctx.output.error("no Lumix camera connected");
                return ExitCode::NoCamera;
            }
        },
    };
    if let Err(err) = ctx.selection.set_selected_camera_id(Some(&target)) {
        ctx.output.error(&err.to_string());
        return ExitCode::StoreFailed;
    }
    ctx.output.emit(&serde_json::json!({ "selected": target }), || {
        println!("Selected {target}; takes effect on the next stream start.");
    });
    ExitCode::Success
}

pub fn clear_camera(ctx: &Context) -> ExitCode {
    if let Err(err) = ctx.selection.set_selected_camera_id(None) {
        ctx.output.error(&err.to_string());
        return ExitCode::StoreFailed;
    }
    ctx.output.emit(&serde_json::json!({ "selected": null }), || {
        println!("Cleared camera selection; the test pattern will be streamed.");
    });
    ExitCode::Success
}

/// Parse `WIDTHxHEIGHT` and require it to be one the virtual camera offers.
pub fn parse_supported_resolution(text: &str) -> Result<Resolution, String> {
    let res: Resolution = text.trim().parse()?;
    if !is_supported_resolution(res) {
        let offered: Vec<String> = SUPPORTED_RESOLUTIONS
            .iter()
            .map(|(w, h)| format!("{w}x{h}"))
            .collect();
        return Err(format!("{res} is not supported (choose {})", offered.join(", ")));
    }
    Ok(res)
}

/// Show or set the persisted resolution.
pub fn resolution(ctx: &Context, requested: Option<&str>) -> ExitCode {
    if let Some(text) = requested {
        let res = match parse_supported_resolution(text) {
            Ok(res) => res,
            Err(message) => {
                ctx.output.error(&message);
                return ExitCode::InvalidArguments;
            }
        };
        if let Err(err) = ctx.selection.set_selected_resolution(res) {
            ctx.output.error(&err.to_string());
            return ExitCode::StoreFailed;
        }
    }
    let current = ctx.selection.selected_resolution();
    let supported: Vec<String> = SUPPORTED_RESOLUTIONS
        .iter()
        .map(|(w, h)| format!("{w}x{h}"))
        .collect();
    ctx.output.emit(
        &serde_json::json!({ "resolution": current.to_string(), "supported": supported }),
        || {
            for option in &supported {
                let mark = if *option == current.to_string() { "*" } else { " " };
                println!("{mark} {option}");
            }
            if requested.is_some() {
                println!("Applies the next time the extension starts.");
            }
        },
    );
    ExitCode::Success
}

#[derive(Debug, Serialize)]
pub struct StreamingReport {
    pub active: bool,
    /// Extension processes that received the notification.
    pub delivered: usize,
}

/// Record the toggle, then tell running extensions about it.
pub fn set_streaming(ctx: &Context, active: bool) -> ExitCode {
    if let Err(err) = ctx.selection.set_extension_active(active) {
        ctx.output.error(&err.to_string());
        return ExitCode::StoreFailed;
    }
    let topic = if active {
        START_STREAMING_TOPIC
    } else {
        STOP_STREAMING_TOPIC
    };
    let delivered = match ctx.notifier.publish(topic) {
        Ok(n) => n,
        Err(err) => {
            ctx.output.error(&err.to_string());
            return ExitCode::NotifyFailed;
        }
    };
    debug!(topic, delivered, "posted streaming notification");
    let report = StreamingReport { active, delivered };
    ctx.output.emit(&report, || {
        let verb = if active { "Started" } else { "Stopped" };
        if delivered == 0 {
            println!("{verb} streaming; no extension is running, it will apply the setting at launch.");
        } else {
            println!("{verb} streaming.");
        }
    });
    ExitCode::Success
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub installed: bool,
    pub device: PathBuf,
    pub extension_active: bool,
    pub camera_id: Option<String>,
    /// Whether the selected camera is currently enumerable.
    pub camera_connected: bool,
    pub resolution: String,
    /// Extension processes listening for streaming notifications.
    pub listeners: usize,
    pub store: Option<PathBuf>,
    pub notify_dir: PathBuf,
}

pub fn status_report(ctx: &Context, device: PathBuf) -> StatusReport {
    let snapshot = ctx.selection.snapshot();
    let camera_connected = snapshot
        .camera_id
        .as_deref()
        .is_some_and(|id| ctx.provider.contains(id));
    let listeners = ctx
        .notifier
        .subscriber_count(START_STREAMING_TOPIC)
        .unwrap_or_default();
    StatusReport {
        installed: ctx.installer.is_installed(),
        device,
        extension_active: snapshot.extension_active,
        camera_id: snapshot.camera_id,
        camera_connected,
        resolution: snapshot.resolution.to_string(),
        listeners,
        store: ctx.store_path.clone(),
        notify_dir: ctx.notifier.dir().to_path_buf(),
    }
}

pub fn status(ctx: &Context, device: PathBuf) -> ExitCode {
    let report = status_report(ctx, device);
    ctx.output.emit(&report, || {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        println!("installed:   {} ({})", yes_no(report.installed), report.device.display());
        println!("streaming:   {}", yes_no(report.extension_active));
        match &report.camera_id {
            Some(id) if report.camera_connected => println!("camera:      {id}"),
            Some(id) => println!("camera:      {id} (disconnected, test pattern)"),
            None => println!("camera:      none (test pattern)"),
        }
        println!("resolution:  {}", report.resolution);
        println!("extensions:  {}", report.listeners);
    });
    ExitCode::Success
}

fn outcome_exit(outcome: &ActivationOutcome) -> ExitCode {
    match outcome {
        ActivationOutcome::Completed => ExitCode::Success,
        ActivationOutcome::WillCompleteAfterReboot | ActivationOutcome::NeedsUserApproval => {
            ExitCode::ActivationPending
        }
        ActivationOutcome::Failed { .. } => ExitCode::ActivationFailed,
    }
}

/// Run an activation request and record a completed one in the shared store.
pub fn activation(ctx: &Context, activating: bool) -> ExitCode {
    let outcome = if activating {
        ctx.installer.activate()
    } else {
        ctx.installer.deactivate()
    };
    if outcome.is_completed()
        && let Err(err) = ctx.selection.set_extension_active(activating)
    {
        ctx.output.error(&err.to_string());
        return ExitCode::StoreFailed;
    }
    let hint = matches!(outcome, ActivationOutcome::NeedsUserApproval)
        .then(|| ctx.installer.approval_hint(activating));
    ctx.output.emit(
        &serde_json::json!({ "result": &outcome, "hint": &hint }),
        || match &outcome {
            ActivationOutcome::Completed => println!("Done."),
            ActivationOutcome::WillCompleteAfterReboot => {
                println!("The virtual camera will be available after a reboot.")
            }
            ActivationOutcome::NeedsUserApproval => {
                println!("Approval required; {}", hint.as_deref().unwrap_or_default())
            }
            ActivationOutcome::Failed { code, message } => {
                eprintln!("error {code}: {message}")
            }
        },
    );
    outcome_exit(&outcome)
}
